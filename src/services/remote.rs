use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tracing::info;

use super::{
    AuthApi, CalendarApi, Credentials, DataEnvelope, FamilyApi, MutationResponse, Session,
};
use crate::calendar::{EventFilter, EventRecord, EventRequest};
use crate::family::{FamilyData, FamilyInput, FamilyMember, MemberInput};
use crate::transport::{ApiException, HttpClient, RequestOptions};

const EVENTS_PATH: &str = "/calendar/events";
const FAMILY_PATH: &str = "/family";
const MEMBERS_PATH: &str = "/family/members";
const LOGIN_PATH: &str = "/auth/login";

pub struct RemoteApi {
    http: Arc<HttpClient>,
}

fn item_path(collection: &str, id: &str) -> String {
    format!("{}/{}", collection, urlencoding::encode(id))
}

impl RemoteApi {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }

    pub fn http(&self) -> &Arc<HttpClient> {
        &self.http
    }

    async fn mutate<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &impl serde::Serialize,
    ) -> Result<MutationResponse<T>, ApiException> {
        let options = RequestOptions::new(method).json(body)?;
        self.http.request(path, options).await?.into_data()
    }

    async fn remove(&self, path: &str) -> Result<(), ApiException> {
        // 204 is the norm; a body, if any, carries nothing we need.
        self.http
            .request::<Value>(path, RequestOptions::new(Method::DELETE))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl CalendarApi for RemoteApi {
    async fn list_events(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, ApiException> {
        let options = filter
            .query_params()
            .into_iter()
            .fold(RequestOptions::default(), |options, (name, value)| options.param(name, value));

        let envelope: DataEnvelope<Vec<EventRecord>> =
            self.http.request(EVENTS_PATH, options).await?.into_data()?;
        info!("Fetched {} events", envelope.data.len());
        Ok(envelope.data)
    }

    async fn get_event(&self, id: &str) -> Result<EventRecord, ApiException> {
        let envelope: DataEnvelope<EventRecord> = self
            .http
            .request(&item_path(EVENTS_PATH, id), RequestOptions::default())
            .await?
            .into_data()?;
        Ok(envelope.data)
    }

    async fn create_event(
        &self,
        request: &EventRequest,
    ) -> Result<MutationResponse<EventRecord>, ApiException> {
        self.mutate(Method::POST, EVENTS_PATH, request).await
    }

    async fn update_event(
        &self,
        id: &str,
        request: &EventRequest,
    ) -> Result<MutationResponse<EventRecord>, ApiException> {
        self.mutate(Method::PUT, &item_path(EVENTS_PATH, id), request).await
    }

    async fn delete_event(&self, id: &str) -> Result<(), ApiException> {
        self.remove(&item_path(EVENTS_PATH, id)).await
    }
}

#[async_trait]
impl FamilyApi for RemoteApi {
    async fn get_family(&self) -> Result<Option<FamilyData>, ApiException> {
        let envelope: DataEnvelope<Option<FamilyData>> = self
            .http
            .request(FAMILY_PATH, RequestOptions::default())
            .await?
            .into_data()?;
        Ok(envelope.data)
    }

    async fn create_family(
        &self,
        input: &FamilyInput,
    ) -> Result<MutationResponse<FamilyData>, ApiException> {
        self.mutate(Method::POST, FAMILY_PATH, input).await
    }

    async fn update_family(
        &self,
        input: &FamilyInput,
    ) -> Result<MutationResponse<FamilyData>, ApiException> {
        self.mutate(Method::PUT, FAMILY_PATH, input).await
    }

    async fn add_member(
        &self,
        input: &MemberInput,
    ) -> Result<MutationResponse<FamilyMember>, ApiException> {
        self.mutate(Method::POST, MEMBERS_PATH, input).await
    }

    async fn update_member(
        &self,
        id: &str,
        input: &MemberInput,
    ) -> Result<MutationResponse<FamilyMember>, ApiException> {
        self.mutate(Method::PUT, &item_path(MEMBERS_PATH, id), input).await
    }

    async fn remove_member(&self, id: &str) -> Result<(), ApiException> {
        self.remove(&item_path(MEMBERS_PATH, id)).await
    }
}

#[async_trait]
impl AuthApi for RemoteApi {
    async fn login(&self, credentials: &Credentials) -> Result<Session, ApiException> {
        let options = RequestOptions::new(Method::POST).json(credentials)?;
        let envelope: DataEnvelope<Session> = self.http.request(LOGIN_PATH, options).await?.into_data()?;
        Ok(envelope.data)
    }
}
