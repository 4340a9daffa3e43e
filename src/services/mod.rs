//! Domain operations over whichever backend is currently selected.
//!
//! Both the HTTP backend ([`remote::RemoteApi`]) and the in-process fake
//! ([`crate::mock::MockBackend`]) implement the same API traits; the
//! [`BackendSwitch`] is consulted on every call, so flipping it takes effect
//! immediately.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::calendar::{EventFilter, EventRecord, EventRequest};
use crate::family::{FamilyData, FamilyInput, FamilyMember, MemberInput};
use crate::transport::ApiException;

pub mod auth;
pub mod calendar;
pub mod family;
pub mod remote;

pub use auth::{AuthService, TokenStorage};
pub use calendar::CalendarService;
pub use family::FamilyService;
pub use remote::RemoteApi;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataEnvelope<T> {
    pub data: T,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationResponse<T> {
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> MutationResponse<T> {
    pub fn new(data: T, message: impl Into<String>) -> Self {
        Self {
            data,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user: AuthUser,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CalendarApi: Send + Sync {
    async fn list_events(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, ApiException>;

    async fn get_event(&self, id: &str) -> Result<EventRecord, ApiException>;

    async fn create_event(
        &self,
        request: &EventRequest,
    ) -> Result<MutationResponse<EventRecord>, ApiException>;

    async fn update_event(
        &self,
        id: &str,
        request: &EventRequest,
    ) -> Result<MutationResponse<EventRecord>, ApiException>;

    async fn delete_event(&self, id: &str) -> Result<(), ApiException>;
}

#[async_trait]
pub trait FamilyApi: Send + Sync {
    async fn get_family(&self) -> Result<Option<FamilyData>, ApiException>;

    async fn create_family(
        &self,
        input: &FamilyInput,
    ) -> Result<MutationResponse<FamilyData>, ApiException>;

    async fn update_family(
        &self,
        input: &FamilyInput,
    ) -> Result<MutationResponse<FamilyData>, ApiException>;

    async fn add_member(
        &self,
        input: &MemberInput,
    ) -> Result<MutationResponse<FamilyMember>, ApiException>;

    async fn update_member(
        &self,
        id: &str,
        input: &MemberInput,
    ) -> Result<MutationResponse<FamilyMember>, ApiException>;

    async fn remove_member(&self, id: &str) -> Result<(), ApiException>;
}

#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<Session, ApiException>;
}

#[derive(Debug, Clone)]
pub struct BackendSwitch(Arc<AtomicBool>);

impl BackendSwitch {
    pub fn new(use_mock: bool) -> Self {
        Self(Arc::new(AtomicBool::new(use_mock)))
    }

    pub fn use_mock(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set_use_mock(&self, use_mock: bool) {
        self.0.store(use_mock, Ordering::SeqCst);
    }
}

pub struct Backends<A: ?Sized> {
    remote: Arc<A>,
    mock: Arc<A>,
    switch: BackendSwitch,
}

impl<A: ?Sized> Clone for Backends<A> {
    fn clone(&self) -> Self {
        Self {
            remote: self.remote.clone(),
            mock: self.mock.clone(),
            switch: self.switch.clone(),
        }
    }
}

impl<A: ?Sized> Backends<A> {
    pub fn new(remote: Arc<A>, mock: Arc<A>, switch: BackendSwitch) -> Self {
        Self { remote, mock, switch }
    }

    pub fn current(&self) -> &A {
        if self.switch.use_mock() {
            &self.mock
        } else {
            &self.remote
        }
    }
}
