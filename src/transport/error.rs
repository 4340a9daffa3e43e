use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorKind {
    NetworkError,
    Unauthorized,
    Forbidden,
    NotFound,
    ValidationError,
    Conflict,
    ServerError,
    Timeout,
}

impl ApiErrorKind {
    /// Fixed status table: 400/422 are validation failures, every 5xx is a
    /// server error and any other non-2xx status is a network error.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ApiErrorKind::Unauthorized,
            403 => ApiErrorKind::Forbidden,
            404 => ApiErrorKind::NotFound,
            409 => ApiErrorKind::Conflict,
            400 | 422 => ApiErrorKind::ValidationError,
            500..=599 => ApiErrorKind::ServerError,
            _ => ApiErrorKind::NetworkError,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiErrorKind::NetworkError => "NETWORK_ERROR",
            ApiErrorKind::Unauthorized => "UNAUTHORIZED",
            ApiErrorKind::Forbidden => "FORBIDDEN",
            ApiErrorKind::NotFound => "NOT_FOUND",
            ApiErrorKind::ValidationError => "VALIDATION_ERROR",
            ApiErrorKind::Conflict => "CONFLICT",
            ApiErrorKind::ServerError => "SERVER_ERROR",
            ApiErrorKind::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(default)]
    pub errors: Option<Vec<FieldError>>,
}

impl ErrorBody {
    /// Strict decode. Anything that is not exactly this shape is rejected so
    /// the caller falls back to the status text.
    pub fn decode(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

/// The only error surfaced above the transport boundary.
#[derive(Debug, Clone, Error)]
#[error("{kind} ({status}): {message}")]
pub struct ApiException {
    pub kind: ApiErrorKind,
    pub status: u16,
    pub message: String,
    pub details: Vec<FieldError>,
    pub field: Option<String>,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl ApiException {
    pub fn new(kind: ApiErrorKind, status: u16, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
            details: Vec::new(),
            field: None,
            source: None,
        }
    }

    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::from_status(status), status, message)
    }

    /// Builds the error for a non-2xx response from its raw body, falling back
    /// to the canonical status text when the body is not a valid error body.
    pub fn from_response(status: u16, status_text: &str, raw_body: &str) -> Self {
        match ErrorBody::decode(raw_body) {
            Some(body) => {
                let details = body.errors.unwrap_or_default();
                let mut err = Self::from_status(status, body.message);
                err.field = details.first().map(|d| d.field.clone());
                err.details = details;
                err
            }
            None => Self::from_status(status, status_text),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::NetworkError, 0, message)
    }

    pub fn timeout(after_ms: u128) -> Self {
        Self::new(
            ApiErrorKind::Timeout,
            408,
            format!("Request timed out after {}ms", after_ms),
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::NotFound, 404, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Conflict, 409, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::ServerError, 500, message)
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        let field = field.into();
        let message = message.into();
        let mut err = Self::new(ApiErrorKind::ValidationError, 400, message.clone());
        err.details.push(FieldError {
            field: field.clone(),
            message,
        });
        err.field = Some(field);
        err
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::network(format!("Malformed response: {}", message.into()))
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind == ApiErrorKind::Unauthorized
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status) && self.kind != ApiErrorKind::Timeout
    }
}

impl From<reqwest::Error> for ApiException {
    fn from(err: reqwest::Error) -> Self {
        ApiException::network(err.to_string()).with_source(err)
    }
}
