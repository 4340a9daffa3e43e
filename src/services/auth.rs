use std::sync::Arc;

use tracing::{info, warn};

use super::{AuthApi, AuthUser, BackendSwitch, Backends, Credentials};
use crate::storage::kv::{AUTH_TOKEN_KEY, Storage, StorageError};
use crate::transport::{ApiException, HttpClient};

#[derive(Clone)]
pub struct TokenStorage {
    storage: Arc<dyn Storage>,
}

impl TokenStorage {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn save_token(&self, token: &str) -> Result<(), StorageError> {
        self.storage.set(AUTH_TOKEN_KEY, token)
    }

    pub fn load_token(&self) -> Result<Option<String>, StorageError> {
        Ok(self.storage.get(AUTH_TOKEN_KEY)?.filter(|t| !t.is_empty()))
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.storage.remove(AUTH_TOKEN_KEY)
    }
}

#[derive(Clone)]
pub struct AuthService {
    backends: Backends<dyn AuthApi>,
    tokens: TokenStorage,
    http: Arc<HttpClient>,
}

impl AuthService {
    pub fn new(
        remote: Arc<dyn AuthApi>,
        mock: Arc<dyn AuthApi>,
        switch: BackendSwitch,
        tokens: TokenStorage,
        http: Arc<HttpClient>,
    ) -> Self {
        Self {
            backends: Backends::new(remote, mock, switch),
            tokens,
            http,
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthUser, ApiException> {
        let credentials = Credentials {
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        let session = self.backends.current().login(&credentials).await?;

        self.tokens
            .save_token(&session.token)
            .map_err(|e| ApiException::network(format!("Failed to store session: {}", e)).with_source(e))?;
        self.http.rearm_unauthorized();

        info!("Signed in as {}", session.user.email);
        Ok(session.user)
    }

    pub fn logout(&self) {
        if let Err(e) = self.tokens.clear() {
            warn!("Failed to clear auth token: {}", e);
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.tokens.load_token(), Ok(Some(_)))
    }
}
