use std::sync::Arc;

use async_trait::async_trait;
use rand::{distributions::Alphanumeric, Rng};
use tracing::{info, warn};

use crate::domain::notebook::{
    self, first_free_notebook_name, is_valid_notebook_name, ClusterService, GpuProduct, Notebook, NotebookPolicy,
    NotebookRejection, NotebookRequest, NotebookSpec,
};

const ACCESS_TOKEN_LENGTH: usize = 32;

/// The member a notebook is deployed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NotebookOwner {
    pub unix_name: String,
    pub subject: String,
}

#[async_trait]
pub(crate) trait NotebookUseCase {
    fn policy(&self) -> &NotebookPolicy;
    async fn generate_name(&self, unix_name: &str) -> Result<String>;
    async fn deploy(&self, request: NotebookRequest, owner: &NotebookOwner) -> Result<String>;
    async fn list_user(&self, unix_name: &str) -> Result<Vec<Notebook>>;
    async fn list_all(&self) -> Result<Vec<Notebook>>;
    async fn get(&self, name: &str) -> Result<Notebook>;
    /// Removes `name` only when `requester` owns it.
    async fn remove(&self, name: &str, requester: &str) -> Result<()>;
    async fn gpu_products(&self) -> Result<Vec<GpuProduct>>;
}

pub(crate) struct NotebookUseCaseImpl {
    policy: Arc<NotebookPolicy>,
    cluster_service: Arc<dyn ClusterService + Sync + Send>,
}

impl NotebookUseCaseImpl {
    pub fn new(policy: Arc<NotebookPolicy>, cluster_service: Arc<dyn ClusterService + Sync + Send>) -> Self {
        Self { policy, cluster_service }
    }
}

fn generate_access_token() -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(ACCESS_TOKEN_LENGTH).map(char::from).collect()
}

#[async_trait]
impl NotebookUseCase for NotebookUseCaseImpl {
    fn policy(&self) -> &NotebookPolicy {
        &self.policy
    }

    async fn generate_name(&self, unix_name: &str) -> Result<String> {
        let existing: Vec<String> =
            self.cluster_service.list_user_notebooks(unix_name).await?.into_iter().map(|notebook| notebook.name).collect();

        Ok(first_free_notebook_name(unix_name, &existing))
    }

    async fn deploy(&self, request: NotebookRequest, owner: &NotebookOwner) -> Result<String> {
        request.validate(&self.policy)?;

        let running = self.cluster_service.list_user_notebooks(&owner.unix_name).await?;
        if running.len() >= self.policy.max_notebooks_per_user {
            return Err(NotebookRejection::QuotaExceeded { limit: self.policy.max_notebooks_per_user }.into());
        }
        if self.cluster_service.get_notebook(&request.name).await?.is_some() {
            return Err(NotebookRejection::NameInUse(request.name).into());
        }

        let spec =
            NotebookSpec::from_request(request, owner.unix_name.clone(), owner.subject.clone(), generate_access_token());
        self.cluster_service.create_notebook(&spec).await?;

        info!("user(unix_name: {}) deployed notebook(name: {}).", owner.unix_name, spec.name);
        Ok(spec.name)
    }

    async fn list_user(&self, unix_name: &str) -> Result<Vec<Notebook>> {
        Ok(self.cluster_service.list_user_notebooks(unix_name).await?)
    }

    async fn list_all(&self) -> Result<Vec<Notebook>> {
        Ok(self.cluster_service.list_all_notebooks().await?)
    }

    async fn get(&self, name: &str) -> Result<Notebook> {
        // no pod can carry a name outside the DNS label grammar
        if !is_valid_notebook_name(name) {
            return Err(Error::NotebookNotFound { name: name.to_owned() });
        }
        self.cluster_service.get_notebook(name).await?.ok_or_else(|| Error::NotebookNotFound { name: name.to_owned() })
    }

    async fn remove(&self, name: &str, requester: &str) -> Result<()> {
        let notebook = self.get(name).await?;
        if requester.is_empty() || notebook.owner != requester {
            warn!("user(unix_name: {requester}) tried to remove notebook(name: {name}) owned by {}.", notebook.owner);
            return Err(Error::NotOwner { name: name.to_owned() });
        }

        self.cluster_service.remove_notebook(name).await?;
        Ok(())
    }

    async fn gpu_products(&self) -> Result<Vec<GpuProduct>> {
        Ok(self.cluster_service.list_gpu_products().await?)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Rejected(#[from] NotebookRejection),
    #[error("{0}")]
    ClusterRejected(String),
    #[error("notebook {name} does not exist")]
    NotebookNotFound { name: String },
    #[error("notebook {name} is owned by another user")]
    NotOwner { name: String },
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Whether the user can fix the request and try again.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::Rejected(_) | Error::ClusterRejected(_))
    }
}

impl From<notebook::Error> for Error {
    fn from(value: notebook::Error) -> Self {
        match value {
            notebook::Error::Rejected(message) => Self::ClusterRejected(message),
            notebook::Error::Anyhow(e) => e.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
