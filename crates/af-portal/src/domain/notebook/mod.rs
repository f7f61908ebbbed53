use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

mod kubernetes;

pub(crate) use kubernetes::KubernetesClusterService;

/// Bounds a notebook request must respect before it reaches the cluster.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NotebookPolicy {
    pub max_cpu: u32,
    /// GiB
    pub max_memory: u32,
    pub max_gpu: u32,
    /// hours
    pub max_duration: u32,
    pub max_notebooks_per_user: usize,
    pub images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotebookRequest {
    pub name: String,
    pub cpu: u32,
    /// GiB
    pub memory: u32,
    pub gpu: u32,
    /// MiB, a scheduling hint only
    pub gpu_memory: u32,
    pub image: String,
    /// hours
    pub duration: u32,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NotebookRejection {
    #[error("The value of {field} must be a whole number")]
    InvalidNumber { field: &'static str },
    #[error(
        "Notebook name {0} is not valid. Use at most 63 lowercase letters, digits or '-', starting and ending with a letter or digit"
    )]
    InvalidName(String),
    #[error("Notebook name {0} is already in use")]
    NameInUse(String),
    #[error("You can run at most {limit} notebooks at a time")]
    QuotaExceeded { limit: usize },
    #[error("Requested {requested} CPUs, but the allowed range is 1 to {max}")]
    CpuOutOfRange { requested: u32, max: u32 },
    #[error("Requested {requested} GB of memory, but the allowed range is 1 to {max}")]
    MemoryOutOfRange { requested: u32, max: u32 },
    #[error("Requested {requested} GPUs, but the allowed range is 0 to {max}")]
    GpuOutOfRange { requested: u32, max: u32 },
    #[error("Requested a duration of {requested} hours, but the allowed range is 1 to {max}")]
    DurationOutOfRange { requested: u32, max: u32 },
    #[error("Image {0} is not supported")]
    UnsupportedImage(String),
}

impl NotebookRequest {
    /// Checks everything that can be decided without asking the cluster.
    pub fn validate(&self, policy: &NotebookPolicy) -> std::result::Result<(), NotebookRejection> {
        if !is_valid_notebook_name(&self.name) {
            return Err(NotebookRejection::InvalidName(self.name.clone()));
        }
        if self.cpu < 1 || self.cpu > policy.max_cpu {
            return Err(NotebookRejection::CpuOutOfRange { requested: self.cpu, max: policy.max_cpu });
        }
        if self.memory < 1 || self.memory > policy.max_memory {
            return Err(NotebookRejection::MemoryOutOfRange { requested: self.memory, max: policy.max_memory });
        }
        if self.gpu > policy.max_gpu {
            return Err(NotebookRejection::GpuOutOfRange { requested: self.gpu, max: policy.max_gpu });
        }
        if self.duration < 1 || self.duration > policy.max_duration {
            return Err(NotebookRejection::DurationOutOfRange {
                requested: self.duration,
                max: policy.max_duration,
            });
        }
        if !policy.images.iter().any(|image| image == &self.image) {
            return Err(NotebookRejection::UnsupportedImage(self.image.clone()));
        }
        Ok(())
    }
}

/// DNS-1123 label, the naming rule pods, services and ingress hosts share.
pub fn is_valid_notebook_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= 63
        && bytes.iter().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes[0] != b'-'
        && bytes[bytes.len() - 1] != b'-'
}

/// First `<unix name>-notebook-<n>` not taken by `existing`.
pub fn first_free_notebook_name(unix_name: &str, existing: &[String]) -> String {
    let prefix: String = unix_name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .trim_matches('-')
        .to_owned();

    (1..)
        .map(|n| format!("{prefix}-notebook-{n}"))
        .find(|name| !existing.contains(name))
        .unwrap_or_default()
}

/// Compute requested for a notebook. CPU and memory may burst to twice the
/// request; GPUs are never overcommitted.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotebookResources {
    pub cpu_request: u32,
    pub cpu_limit: u32,
    pub memory_request: u32,
    pub memory_limit: u32,
    pub gpu_request: u32,
    pub gpu_limit: u32,
}

impl NotebookResources {
    pub fn derive(cpu: u32, memory: u32, gpu: u32) -> Self {
        Self {
            cpu_request: cpu,
            cpu_limit: cpu.saturating_mul(2),
            memory_request: memory,
            memory_limit: memory.saturating_mul(2),
            gpu_request: gpu,
            gpu_limit: gpu,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotebookSpec {
    pub name: String,
    pub owner: String,
    pub owner_subject: String,
    pub image: String,
    pub duration: u32,
    pub gpu_memory: u32,
    pub resources: NotebookResources,
    pub token: String,
}

impl NotebookSpec {
    pub fn from_request(request: NotebookRequest, owner: String, owner_subject: String, token: String) -> Self {
        Self {
            resources: NotebookResources::derive(request.cpu, request.memory, request.gpu),
            name: request.name,
            owner,
            owner_subject,
            image: request.image,
            duration: request.duration,
            gpu_memory: request.gpu_memory,
            token,
        }
    }
}

/// A running (or starting) notebook as seen on the cluster.
#[derive(Serialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Notebook {
    pub name: String,
    pub namespace: String,
    pub owner: String,
    pub status: String,
    pub url: String,
    pub image: String,
    pub creation_date: Option<DateTime<Utc>>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub hours_remaining: Option<i64>,
    pub cpu_request: String,
    pub cpu_limit: String,
    pub memory_request: String,
    pub memory_limit: String,
    pub gpu_request: String,
    pub gpu_limit: String,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct GpuProduct {
    pub product: String,
    /// MiB per device
    pub memory: u32,
    pub count: u32,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub(crate) trait ClusterService {
    async fn create_notebook(&self, spec: &NotebookSpec) -> Result<()>;
    async fn list_all_notebooks(&self) -> Result<Vec<Notebook>>;
    async fn list_user_notebooks(&self, owner: &str) -> Result<Vec<Notebook>>;
    async fn get_notebook(&self, name: &str) -> Result<Option<Notebook>>;
    async fn remove_notebook(&self, name: &str) -> Result<()>;
    async fn list_gpu_products(&self) -> Result<Vec<GpuProduct>>;
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum Error {
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Self::Anyhow(value.into())
    }
}

impl From<url::ParseError> for Error {
    fn from(value: url::ParseError) -> Self {
        Self::Anyhow(value.into())
    }
}

pub(crate) type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod test {
    use super::{
        first_free_notebook_name, is_valid_notebook_name, NotebookPolicy, NotebookRejection, NotebookRequest,
        NotebookResources, NotebookSpec,
    };

    fn policy() -> NotebookPolicy {
        NotebookPolicy {
            max_cpu: 16,
            max_memory: 32,
            max_gpu: 7,
            max_duration: 72,
            max_notebooks_per_user: 2,
            images: vec!["ml-platform:latest".to_owned()],
        }
    }

    fn request() -> NotebookRequest {
        NotebookRequest {
            name: "jdoe-notebook-1".to_owned(),
            cpu: 4,
            memory: 8,
            gpu: 1,
            gpu_memory: 40536,
            image: "ml-platform:latest".to_owned(),
            duration: 24,
        }
    }

    #[test]
    fn limits_double_cpu_and_memory_but_not_gpu() {
        for (cpu, memory, gpu) in [(1, 1, 0), (4, 8, 1), (16, 32, 7)] {
            let resources = NotebookResources::derive(cpu, memory, gpu);

            assert_eq!(resources.cpu_limit, 2 * cpu);
            assert_eq!(resources.memory_limit, 2 * memory);
            assert_eq!(resources.gpu_limit, gpu);
            assert_eq!((resources.cpu_request, resources.memory_request, resources.gpu_request), (cpu, memory, gpu));
        }
    }

    #[test]
    fn spec_from_request_keeps_identity_and_derives_resources() {
        let spec = NotebookSpec::from_request(request(), "jdoe".to_owned(), "subject".to_owned(), "token".to_owned());

        assert_eq!(spec.name, "jdoe-notebook-1");
        assert_eq!(spec.owner, "jdoe");
        assert_eq!(spec.resources, NotebookResources::derive(4, 8, 1));
        assert_eq!(spec.gpu_memory, 40536);
        assert_eq!(spec.duration, 24);
    }

    #[test]
    fn valid_request_passes_validation() {
        assert_eq!(request().validate(&policy()), Ok(()));
    }

    #[test]
    fn out_of_range_requests_are_rejected_with_specific_reason() {
        let policy = policy();

        let cpu = NotebookRequest { cpu: 0, ..request() };
        assert_eq!(cpu.validate(&policy), Err(NotebookRejection::CpuOutOfRange { requested: 0, max: 16 }));

        let memory = NotebookRequest { memory: 64, ..request() };
        assert_eq!(memory.validate(&policy), Err(NotebookRejection::MemoryOutOfRange { requested: 64, max: 32 }));

        let gpu = NotebookRequest { gpu: 8, ..request() };
        assert_eq!(gpu.validate(&policy), Err(NotebookRejection::GpuOutOfRange { requested: 8, max: 7 }));

        let duration = NotebookRequest { duration: 100, ..request() };
        assert_eq!(
            duration.validate(&policy),
            Err(NotebookRejection::DurationOutOfRange { requested: 100, max: 72 })
        );

        let image = NotebookRequest { image: "evil/miner:latest".to_owned(), ..request() };
        assert_eq!(
            image.validate(&policy),
            Err(NotebookRejection::UnsupportedImage("evil/miner:latest".to_owned()))
        );
    }

    #[test]
    fn notebook_names_follow_dns_label_rules() {
        assert!(is_valid_notebook_name("jdoe-notebook-1"));
        assert!(!is_valid_notebook_name(""));
        assert!(!is_valid_notebook_name("-leading"));
        assert!(!is_valid_notebook_name("trailing-"));
        assert!(!is_valid_notebook_name("Upper"));
        assert!(!is_valid_notebook_name("under_score"));
        assert!(!is_valid_notebook_name(&"a".repeat(64)));

        let invalid = NotebookRequest { name: "My Notebook".to_owned(), ..request() };
        assert_eq!(invalid.validate(&policy()), Err(NotebookRejection::InvalidName("My Notebook".to_owned())));
    }

    #[test]
    fn generated_name_is_first_unused_index() {
        assert_eq!(first_free_notebook_name("jdoe", &[]), "jdoe-notebook-1");
        assert_eq!(
            first_free_notebook_name("jdoe", &["jdoe-notebook-1".to_owned(), "jdoe-notebook-3".to_owned()]),
            "jdoe-notebook-2"
        );
        assert_eq!(first_free_notebook_name("J_Doe", &[]), "j-doe-notebook-1");
    }
}
