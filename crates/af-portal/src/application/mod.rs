use std::sync::Arc;

use futures_util::{stream, StreamExt, TryStreamExt};
use url::Url;

use crate::{
    config::ApplicationConfig,
    domain::{
        directory::{ConnectDirectoryService, DirectoryService, UserProfile},
        identity::{IdentityProvider, OAuthIdentityProvider},
        mail::{MailService, MailgunMailService},
        notebook::{ClusterService, KubernetesClusterService, NotebookPolicy},
    },
};

use self::{
    group::{GroupUseCase, GroupUseCaseImpl},
    identity::{IdentityUseCase, IdentityUseCaseImpl},
    notebook::{NotebookUseCase, NotebookUseCaseImpl},
    profile::{ProfileUseCase, ProfileUseCaseImpl},
    report::{ReportUseCase, ReportUseCaseImpl},
};

pub(crate) mod group;
pub(crate) mod identity;
pub(crate) mod notebook;
pub(crate) mod profile;
pub(crate) mod report;

const PROFILE_LOOKUP_CONCURRENCY: usize = 8;

/// Deployment specific names the use cases need besides their collaborators.
#[derive(Debug, Clone)]
pub(crate) struct PortalSettings {
    pub base_url: Url,
    /// Group whose members may use the facility.
    pub portal_group: String,
    /// Group every directory user belongs to.
    pub root_group: String,
    pub sender: String,
    pub staff_email: String,
}

pub(crate) struct Application {
    settings: Arc<PortalSettings>,
    notebook_policy: Arc<NotebookPolicy>,
    identity_provider: Arc<dyn IdentityProvider + Sync + Send>,
    directory_service: Arc<dyn DirectoryService + Sync + Send>,
    cluster_service: Arc<dyn ClusterService + Sync + Send>,
    mail_service: Arc<dyn MailService + Sync + Send>,
}

impl Application {
    pub fn settings(&self) -> &PortalSettings {
        &self.settings
    }

    pub fn identity(&self) -> impl IdentityUseCase {
        IdentityUseCaseImpl::new(
            self.settings.clone(),
            self.identity_provider.clone(),
            self.directory_service.clone(),
        )
    }

    pub fn profile(&self) -> impl ProfileUseCase {
        ProfileUseCaseImpl::new(self.settings.clone(), self.directory_service.clone())
    }

    pub fn group(&self) -> impl GroupUseCase {
        GroupUseCaseImpl::new(self.settings.clone(), self.directory_service.clone(), self.mail_service.clone())
    }

    pub fn notebook(&self) -> impl NotebookUseCase {
        NotebookUseCaseImpl::new(self.notebook_policy.clone(), self.cluster_service.clone())
    }

    pub fn report(&self) -> impl ReportUseCase {
        ReportUseCaseImpl::new(self.settings.clone(), self.directory_service.clone(), self.mail_service.clone())
    }
}

#[cfg(test)]
impl Application {
    pub(crate) fn with_services(
        settings: Arc<PortalSettings>,
        notebook_policy: NotebookPolicy,
        identity_provider: Arc<dyn IdentityProvider + Sync + Send>,
        directory_service: Arc<dyn DirectoryService + Sync + Send>,
        cluster_service: Arc<dyn ClusterService + Sync + Send>,
        mail_service: Arc<dyn MailService + Sync + Send>,
    ) -> Self {
        Self {
            settings,
            notebook_policy: Arc::new(notebook_policy),
            identity_provider,
            directory_service,
            cluster_service,
            mail_service,
        }
    }
}

pub(super) fn init(config: &ApplicationConfig) -> anyhow::Result<Application> {
    let settings = Arc::new(PortalSettings {
        base_url: config.base_url.clone(),
        portal_group: config.directory.portal_group.clone(),
        root_group: config.directory.root_group.clone(),
        sender: config.mail.sender.clone(),
        staff_email: config.mail.staff_email.clone(),
    });

    let identity_provider = Arc::new(OAuthIdentityProvider::new(config.identity.clone()));
    let directory_service = Arc::new(ConnectDirectoryService::new(
        config.directory.url.clone(),
        config.directory.token.clone(),
        config.directory.protected_groups.clone(),
    ));
    let cluster_service = Arc::new(KubernetesClusterService::new(&config.cluster)?);
    let mail_service = Arc::new(MailgunMailService::new(&config.mail));

    Ok(Application {
        settings,
        notebook_policy: Arc::new(config.cluster.policy.clone()),
        identity_provider,
        directory_service,
        cluster_service,
        mail_service,
    })
}

/// Profiles of `unix_names` in order, skipping users the directory no longer knows.
pub(crate) async fn load_profiles(
    directory_service: &(dyn DirectoryService + Sync + Send),
    unix_names: &[String],
) -> anyhow::Result<Vec<UserProfile>> {
    let lookups: Vec<_> = unix_names.iter().map(|unix_name| directory_service.get_user_profile(unix_name)).collect();
    let profiles: Vec<Option<UserProfile>> = stream::iter(lookups)
        .buffered(PROFILE_LOOKUP_CONCURRENCY)
        .try_collect()
        .await?;

    Ok(profiles.into_iter().flatten().collect())
}
