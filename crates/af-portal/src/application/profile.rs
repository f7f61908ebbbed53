use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::domain::directory::{DirectoryService, GroupMembership, MembershipState, ProfileUpdate, UserProfile};

use super::PortalSettings;

#[async_trait]
pub(crate) trait ProfileUseCase {
    /// An unknown or unresolved user gets an empty profile.
    async fn get(&self, unix_name: &str) -> Result<UserProfile>;
    async fn update(&self, unix_name: &str, update: ProfileUpdate) -> Result<()>;
    async fn groups(&self, unix_name: &str) -> Result<Vec<GroupMembership>>;
    async fn request_membership(&self, unix_name: &str) -> Result<bool>;
}

pub(crate) struct ProfileUseCaseImpl {
    settings: Arc<PortalSettings>,
    directory_service: Arc<dyn DirectoryService + Sync + Send>,
}

impl ProfileUseCaseImpl {
    pub fn new(settings: Arc<PortalSettings>, directory_service: Arc<dyn DirectoryService + Sync + Send>) -> Self {
        Self { settings, directory_service }
    }
}

#[async_trait]
impl ProfileUseCase for ProfileUseCaseImpl {
    async fn get(&self, unix_name: &str) -> Result<UserProfile> {
        Ok(self.directory_service.get_user_profile(unix_name).await?.unwrap_or_default())
    }

    async fn update(&self, unix_name: &str, update: ProfileUpdate) -> Result<()> {
        if unix_name.is_empty() {
            return Err(Error::UserNotResolved);
        }
        self.directory_service.update_user_profile(unix_name, &update).await?;

        info!("profile of user(unix_name: {unix_name}) updated.");
        Ok(())
    }

    async fn groups(&self, unix_name: &str) -> Result<Vec<GroupMembership>> {
        Ok(self.directory_service.get_user_groups(unix_name).await?)
    }

    async fn request_membership(&self, unix_name: &str) -> Result<bool> {
        if unix_name.is_empty() {
            return Err(Error::UserNotResolved);
        }
        let requested = self
            .directory_service
            .update_user_group_status(unix_name, &self.settings.portal_group, MembershipState::Pending)
            .await?;

        if requested {
            info!("user(unix_name: {unix_name}) requested membership in {}.", self.settings.portal_group);
        }
        Ok(requested)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("user is not registered in the directory")]
    UserNotResolved,
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
