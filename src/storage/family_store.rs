use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{info, warn};

use super::kv::{FAMILY_KEY, Storage, StorageError, lock};
use super::persisted::{Loaded, load_state, save_state};
use crate::family::{FamilyData, FamilyMember};

struct FamilyStoreInner {
    storage: Arc<dyn Storage>,
    family: Mutex<Option<FamilyData>>,
    hydrated: watch::Sender<bool>,
}

/// Durable owner of the family snapshot.
///
/// Hydration validates the stored snapshot and discards it whole when it is
/// malformed. Mutations are local and re-persist immediately. Removing the
/// last member is not prevented here; callers must keep at least one.
#[derive(Clone)]
pub struct FamilyStore {
    inner: Arc<FamilyStoreInner>,
}

impl FamilyStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        let (hydrated, _) = watch::channel(false);
        Self {
            inner: Arc::new(FamilyStoreInner {
                storage,
                family: Mutex::new(None),
                hydrated,
            }),
        }
    }

    fn discard(&self) {
        if let Err(e) = self.inner.storage.remove(FAMILY_KEY) {
            warn!("Failed to remove family snapshot: {}", e);
        }
    }

    pub async fn hydrate(&self) {
        tokio::task::yield_now().await;
        let family = match load_state::<FamilyData>(self.inner.storage.as_ref(), FAMILY_KEY) {
            Ok(Loaded::Found(family)) => match family.validate() {
                Ok(()) => Some(family),
                Err(e) => {
                    warn!("Discarding invalid family snapshot: {}", e);
                    self.discard();
                    None
                }
            },
            Ok(Loaded::Corrupt(reason)) => {
                warn!("Discarding unreadable family snapshot: {}", reason);
                self.discard();
                None
            }
            Ok(Loaded::Missing) => None,
            Err(e) => {
                warn!("Failed to read family snapshot: {}", e);
                None
            }
        };
        match &family {
            Some(f) => info!("Hydrated family '{}' with {} members", f.name, f.members.len()),
            None => info!("No family stored"),
        }
        *lock(&self.inner.family) = family;
        self.inner.hydrated.send_replace(true);
    }

    pub fn has_hydrated(&self) -> bool {
        *self.inner.hydrated.borrow()
    }

    pub async fn wait_until_hydrated(&self) {
        let mut hydrated = self.inner.hydrated.subscribe();
        let _ = hydrated.wait_for(|done| *done).await;
    }

    pub fn family(&self) -> Option<FamilyData> {
        lock(&self.inner.family).clone()
    }

    pub fn member(&self, id: &str) -> Option<FamilyMember> {
        lock(&self.inner.family)
            .as_ref()
            .and_then(|f| f.member(id).cloned())
    }

    pub fn member_ids(&self) -> Vec<String> {
        lock(&self.inner.family)
            .as_ref()
            .map(FamilyData::member_ids)
            .unwrap_or_default()
    }

    pub fn set_family(&self, family: FamilyData) -> Result<(), StorageError> {
        let mut current = lock(&self.inner.family);
        save_state(self.inner.storage.as_ref(), FAMILY_KEY, &family)?;
        *current = Some(family);
        Ok(())
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        let mut current = lock(&self.inner.family);
        self.inner.storage.remove(FAMILY_KEY)?;
        *current = None;
        Ok(())
    }

    fn mutate(&self, f: impl FnOnce(&mut FamilyData) -> bool) -> Result<bool, StorageError> {
        let mut current = lock(&self.inner.family);
        let Some(family) = current.as_ref() else {
            return Ok(false);
        };
        let mut next = family.clone();
        if !f(&mut next) {
            return Ok(false);
        }
        save_state(self.inner.storage.as_ref(), FAMILY_KEY, &next)?;
        *current = Some(next);
        Ok(true)
    }

    pub fn rename(&self, name: &str) -> Result<bool, StorageError> {
        self.mutate(|family| {
            family.name = name.trim().to_string();
            true
        })
    }

    pub fn add_member(&self, member: FamilyMember) -> Result<bool, StorageError> {
        self.mutate(|family| {
            if family.member(&member.id).is_some() {
                return false;
            }
            family.members.push(member);
            family.setup_complete = true;
            true
        })
    }

    pub fn update_member(&self, id: &str, member: FamilyMember) -> Result<bool, StorageError> {
        self.mutate(|family| match family.members.iter_mut().find(|m| m.id == id) {
            Some(slot) => {
                *slot = member;
                true
            }
            None => false,
        })
    }

    pub fn remove_member(&self, id: &str) -> Result<bool, StorageError> {
        self.mutate(|family| {
            let before = family.members.len();
            family.members.retain(|m| m.id != id);
            family.members.len() != before
        })
    }
}
