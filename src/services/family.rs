use std::sync::Arc;

use tracing::info;

use super::{BackendSwitch, Backends, FamilyApi};
use crate::family::{FamilyData, FamilyInput, FamilyMember, MemberInput};
use crate::transport::ApiException;

#[derive(Clone)]
pub struct FamilyService {
    backends: Backends<dyn FamilyApi>,
}

impl FamilyService {
    pub fn new(remote: Arc<dyn FamilyApi>, mock: Arc<dyn FamilyApi>, switch: BackendSwitch) -> Self {
        Self {
            backends: Backends::new(remote, mock, switch),
        }
    }

    pub async fn get_family(&self) -> Result<Option<FamilyData>, ApiException> {
        self.backends.current().get_family().await
    }

    pub async fn create_family(&self, input: &FamilyInput) -> Result<FamilyData, ApiException> {
        let response = self.backends.current().create_family(input).await?;
        info!("Created family {}", response.data.id);
        Ok(response.data)
    }

    pub async fn update_family(&self, input: &FamilyInput) -> Result<FamilyData, ApiException> {
        Ok(self.backends.current().update_family(input).await?.data)
    }

    pub async fn add_member(&self, input: &MemberInput) -> Result<FamilyMember, ApiException> {
        let response = self.backends.current().add_member(input).await?;
        info!("Added member {}", response.data.id);
        Ok(response.data)
    }

    pub async fn update_member(&self, id: &str, input: &MemberInput) -> Result<FamilyMember, ApiException> {
        Ok(self.backends.current().update_member(id, input).await?.data)
    }

    pub async fn remove_member(&self, id: &str) -> Result<(), ApiException> {
        self.backends.current().remove_member(id).await?;
        info!("Removed member {}", id);
        Ok(())
    }
}
