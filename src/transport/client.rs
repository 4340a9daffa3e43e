use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::{Method, StatusCode, header};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use super::error::ApiException;
use crate::storage::kv::{AUTH_TOKEN_KEY, Storage};

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

pub type UnauthorizedHook = Arc<dyn Fn() + Send + Sync>;

/// Joins a base URL and an endpoint with exactly one `/` between them,
/// whichever side carried the separator.
pub fn resolve_url(base_url: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}

#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub params: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub timeout: Option<Duration>,
    pub headers: Vec<(String, String)>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::new(Method::GET)
    }
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            params: Vec::new(),
            body: None,
            timeout: None,
            headers: Vec::new(),
        }
    }

    pub fn param(mut self, name: &str, value: Option<impl Into<String>>) -> Self {
        if let Some(value) = value {
            self.params.push((name.to_string(), value.into()));
        }
        self
    }

    pub fn json<B: Serialize>(mut self, body: &B) -> Result<Self, ApiException> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiException::network(format!("Failed to encode request body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload<T> {
    Data(T),
    NoContent,
}

impl<T> Payload<T> {
    pub fn into_data(self) -> Result<T, ApiException> {
        match self {
            Payload::Data(data) => Ok(data),
            Payload::NoContent => Err(ApiException::decode("expected a response body, got 204")),
        }
    }
}

pub struct HttpClient {
    base_url: String,
    client: reqwest::Client,
    storage: Arc<dyn Storage>,
    default_timeout: Duration,
    on_unauthorized: UnauthorizedHook,
    unauthorized_fired: AtomicBool,
}

impl HttpClient {
    pub fn new(base_url: impl Into<String>, storage: Arc<dyn Storage>) -> Self {
        let hook_storage = storage.clone();
        let clear_token: UnauthorizedHook = Arc::new(move || {
            if let Err(e) = hook_storage.remove(AUTH_TOKEN_KEY) {
                error!("Failed to clear auth token after 401: {}", e);
            }
        });

        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            storage,
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            on_unauthorized: clear_token,
            unauthorized_fired: AtomicBool::new(false),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_unauthorized_hook(mut self, hook: UnauthorizedHook) -> Self {
        self.on_unauthorized = hook;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn rearm_unauthorized(&self) {
        self.unauthorized_fired.store(false, Ordering::SeqCst);
    }

    fn auth_token(&self) -> Option<String> {
        match self.storage.get(AUTH_TOKEN_KEY) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                debug!("Auth token unavailable, sending request without it: {}", e);
                None
            }
        }
    }

    fn handle_unauthorized(&self) {
        if !self.unauthorized_fired.swap(true, Ordering::SeqCst) {
            warn!("Received 401, running session reset hook");
            (self.on_unauthorized)();
        }
    }

    pub async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<Payload<T>, ApiException> {
        let url = resolve_url(&self.base_url, endpoint);
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let method = options.method.clone();

        debug!("{} {}", method, url);

        // Dropping the in-flight future on timeout discards any late response.
        let result = match tokio::time::timeout(timeout, self.execute(&url, options)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("{} {} timed out after {:?}", method, url, timeout);
                Err(ApiException::timeout(timeout.as_millis()))
            }
        };

        match &result {
            Err(err) if err.is_unauthorized() => self.handle_unauthorized(),
            Err(err) => debug!("{} {} failed: {}", method, url, err),
            Ok(_) => {}
        }

        result
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<Payload<T>, ApiException> {
        let mut builder = self
            .client
            .request(options.method, url)
            .header(header::ACCEPT, "application/json");

        if !options.params.is_empty() {
            builder = builder.query(&options.params);
        }
        if let Some(token) = self.auth_token() {
            builder = builder.bearer_auth(token);
        }
        for (name, value) in &options.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &options.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();

        if status == StatusCode::NO_CONTENT {
            return Ok(Payload::NoContent);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let status_text = status.canonical_reason().unwrap_or("Request failed");
            return Err(ApiException::from_response(status.as_u16(), status_text, &body));
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes)
            .map(Payload::Data)
            .map_err(|e| ApiException::decode(e.to_string()).with_source(e))
    }
}
