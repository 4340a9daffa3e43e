use std::time::Duration;

use tracing::error;

use super::query_cache::{CacheSubscription, QueryCache, QueryState};
use super::query_key::QueryKey;
use super::retry::RetryPolicy;
use crate::family::{FamilyData, FamilyInput, FamilyMember, MemberInput};
use crate::services::FamilyService;
use crate::storage::{FamilyStore, StorageError};
use crate::transport::ApiException;

fn store_error(e: StorageError) -> ApiException {
    error!("Failed to persist family snapshot: {}", e);
    ApiException::server(format!("Failed to save family locally: {}", e)).with_source(e)
}

/// Family reads and writes. The [`FamilyStore`] owns the family; this keeps
/// a cache entry mirroring it for observers.
#[derive(Clone)]
pub struct FamilyQueries {
    service: FamilyService,
    store: FamilyStore,
    cache: QueryCache<Option<FamilyData>>,
    retry: RetryPolicy,
}

impl FamilyQueries {
    pub fn new(service: FamilyService, store: FamilyStore, stale_time: Duration, retry: RetryPolicy) -> Self {
        Self {
            service,
            store,
            cache: QueryCache::new(stale_time),
            retry,
        }
    }

    pub async fn family(&self) -> Result<Option<FamilyData>, ApiException> {
        let service = self.service.clone();
        let store = self.store.clone();
        let retry = self.retry.clone();
        self.cache
            .fetch(&QueryKey::family(), move || async move {
                match retry.run(|| service.get_family()).await? {
                    Some(family) => store.set_family(family).map_err(store_error)?,
                    None => store.clear().map_err(store_error)?,
                }
                Ok(store.family())
            })
            .await
    }

    pub fn state(&self) -> QueryState<Option<FamilyData>> {
        self.cache.state(&QueryKey::family())
    }

    pub fn subscribe(&self) -> CacheSubscription {
        self.cache.subscribe(&QueryKey::family())
    }

    fn mirror_store(&self) {
        let key = QueryKey::family();
        self.cache.set(&key, self.store.family());
        self.cache.invalidate(&key);
    }

    pub async fn create_family(&self, input: &FamilyInput) -> Result<FamilyData, ApiException> {
        let family = self.service.create_family(input).await?;
        let saved = self.store.set_family(family.clone());
        self.mirror_store();
        saved.map_err(store_error)?;
        Ok(family)
    }

    pub async fn update_family(&self, input: &FamilyInput) -> Result<FamilyData, ApiException> {
        let family = self.service.update_family(input).await?;
        let saved = self.store.set_family(family.clone());
        self.mirror_store();
        saved.map_err(store_error)?;
        Ok(family)
    }

    pub async fn add_member(&self, input: &MemberInput) -> Result<FamilyMember, ApiException> {
        let member = self.service.add_member(input).await?;
        let saved = self.store.add_member(member.clone());
        self.mirror_store();
        saved.map_err(store_error)?;
        Ok(member)
    }

    pub async fn update_member(&self, id: &str, input: &MemberInput) -> Result<FamilyMember, ApiException> {
        let member = self.service.update_member(id, input).await?;
        let saved = self.store.update_member(id, member.clone());
        self.mirror_store();
        saved.map_err(store_error)?;
        Ok(member)
    }

    /// Refused locally unless another member would remain.
    pub async fn remove_member(&self, id: &str) -> Result<(), ApiException> {
        let family = self
            .store
            .family()
            .ok_or_else(|| ApiException::not_found("Family not found"))?;
        if family.member(id).is_none() {
            return Err(ApiException::not_found(format!("Member {} not found", id)));
        }
        if family.members.len() <= 1 {
            return Err(ApiException::validation(
                "members",
                "A family must keep at least one member",
            ));
        }

        self.service.remove_member(id).await?;
        let saved = self.store.remove_member(id);
        self.mirror_store();
        saved.map_err(store_error)?;
        Ok(())
    }
}
