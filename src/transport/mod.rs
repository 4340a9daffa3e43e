//! HTTP transport for the family organizer backend.
//!
//! Every call resolves its endpoint against the configured base URL, carries
//! the stored bearer token when one exists, and is bounded by a timeout.
//! Failures of any sort leave this module as an [`ApiException`].

pub mod client;
pub mod error;

pub use client::{HttpClient, Payload, RequestOptions, UnauthorizedHook, resolve_url};
pub use error::{ApiErrorKind, ApiException, ErrorBody, FieldError};
