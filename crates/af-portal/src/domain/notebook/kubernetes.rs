use std::collections::{BTreeMap, HashMap};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use url::Url;

use crate::config::ClusterConfig;

use super::{ClusterService, Error, GpuProduct, Notebook, NotebookSpec, Result};

const APP_LABEL: &str = "k8s-app";
const APP_NAME: &str = "jupyterlab";
const OWNER_LABEL: &str = "owner";
const INSTANCE_LABEL: &str = "instance";
const OWNER_SUBJECT_ANNOTATION: &str = "owner-subject";
const DURATION_ANNOTATION: &str = "duration";
const TOKEN_ANNOTATION: &str = "jupyter-token";
const GPU_RESOURCE: &str = "nvidia.com/gpu";
const GPU_PRODUCT_LABEL: &str = "nvidia.com/gpu.product";
const GPU_MEMORY_LABEL: &str = "nvidia.com/gpu.memory";
const GPU_COUNT_LABEL: &str = "nvidia.com/gpu.count";
const NOTEBOOK_PORT: u16 = 8888;

/// Notebooks as Pod + Service + Ingress triples in one namespace, driven through the Kubernetes REST API.
pub(crate) struct KubernetesClusterService {
    client: reqwest::Client,
    url: Url,
    token: String,
    namespace: String,
    domain: String,
}

impl KubernetesClusterService {
    pub fn new(config: &ClusterConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().danger_accept_invalid_certs(config.accept_invalid_certs).build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            token: config.token.clone(),
            namespace: config.namespace.clone(),
            domain: config.domain.clone(),
        })
    }

    /// Each segment is one path component. Dot segments are refused since `Url::join` would resolve them.
    fn namespaced_url(&self, api: &str, segments: &[&str]) -> Result<Url> {
        if segments.iter().any(|segment| matches!(*segment, "" | "." | "..")) {
            return Err(anyhow!("invalid path segments {segments:?}").into());
        }
        let path = segments.iter().map(|segment| urlencoding::encode(segment)).collect::<Vec<_>>().join("/");
        Ok(self.url.join(&format!("{api}/namespaces/{}/{path}", urlencoding::encode(&self.namespace)))?)
    }

    async fn post(&self, api: &str, resource: &str, manifest: &Value) -> Result<()> {
        let url = self.namespaced_url(api, &[resource])?;
        let response = self.client.post(url).bearer_auth(&self.token).json(manifest).send().await?;
        check_create_response(response).await
    }

    async fn delete(&self, api: &str, resource: &str, name: &str) -> Result<()> {
        let url = self.namespaced_url(api, &[resource, name])?;
        let response = self.client.delete(url).bearer_auth(&self.token).send().await?;
        if response.status() != StatusCode::NOT_FOUND {
            response.error_for_status()?;
        }
        Ok(())
    }

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<Notebook>> {
        let mut url = self.namespaced_url("api/v1", &["pods"])?;
        url.query_pairs_mut().append_pair("labelSelector", label_selector);

        let pods = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?
            .json::<ObjectList<Pod>>()
            .await?;

        let now = Utc::now();
        Ok(pods.items.into_iter().map(|pod| notebook_from_pod(pod, &self.domain, now)).collect())
    }

    fn pod_manifest(&self, spec: &NotebookSpec) -> Value {
        let resources = &spec.resources;
        let mut pod = json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": spec.name,
                "namespace": self.namespace,
                "labels": {
                    APP_LABEL: APP_NAME,
                    OWNER_LABEL: spec.owner,
                    INSTANCE_LABEL: spec.name,
                },
                "annotations": {
                    OWNER_SUBJECT_ANNOTATION: spec.owner_subject,
                    DURATION_ANNOTATION: spec.duration.to_string(),
                    TOKEN_ANNOTATION: spec.token,
                },
            },
            "spec": {
                "restartPolicy": "Never",
                "containers": [{
                    "name": APP_NAME,
                    "image": spec.image,
                    "env": [
                        { "name": "JUPYTER_TOKEN", "value": spec.token },
                        { "name": "OWNER", "value": spec.owner },
                    ],
                    "ports": [{ "containerPort": NOTEBOOK_PORT }],
                    "resources": {
                        "requests": {
                            "cpu": resources.cpu_request.to_string(),
                            "memory": format!("{}Gi", resources.memory_request),
                            GPU_RESOURCE: resources.gpu_request.to_string(),
                        },
                        "limits": {
                            "cpu": resources.cpu_limit.to_string(),
                            "memory": format!("{}Gi", resources.memory_limit),
                            GPU_RESOURCE: resources.gpu_limit.to_string(),
                        },
                    },
                }],
            },
        });

        if resources.gpu_request > 0 && spec.gpu_memory > 0 {
            pod["spec"]["affinity"] = json!({
                "nodeAffinity": {
                    "requiredDuringSchedulingIgnoredDuringExecution": {
                        "nodeSelectorTerms": [{
                            "matchExpressions": [{
                                "key": GPU_MEMORY_LABEL,
                                "operator": "Gt",
                                "values": [(spec.gpu_memory - 1).to_string()],
                            }],
                        }],
                    },
                },
            });
        }

        pod
    }

    fn service_manifest(&self, spec: &NotebookSpec) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {
                "name": spec.name,
                "namespace": self.namespace,
                "labels": { APP_LABEL: APP_NAME, OWNER_LABEL: spec.owner, INSTANCE_LABEL: spec.name },
            },
            "spec": {
                "selector": { INSTANCE_LABEL: spec.name },
                "ports": [{ "port": NOTEBOOK_PORT, "targetPort": NOTEBOOK_PORT }],
            },
        })
    }

    fn ingress_manifest(&self, spec: &NotebookSpec) -> Value {
        json!({
            "apiVersion": "networking.k8s.io/v1",
            "kind": "Ingress",
            "metadata": {
                "name": spec.name,
                "namespace": self.namespace,
                "labels": { APP_LABEL: APP_NAME, OWNER_LABEL: spec.owner, INSTANCE_LABEL: spec.name },
            },
            "spec": {
                "rules": [{
                    "host": format!("{}.{}", spec.name, self.domain),
                    "http": {
                        "paths": [{
                            "path": "/",
                            "pathType": "Prefix",
                            "backend": { "service": { "name": spec.name, "port": { "number": NOTEBOOK_PORT } } },
                        }],
                    },
                }],
            },
        })
    }
}

/// Admission failures (quota, conflicts, invalid objects) are the user's to fix, not faults.
async fn check_create_response(response: Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    if matches!(status, StatusCode::FORBIDDEN | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY) {
        let message = response
            .json::<StatusResponse>()
            .await
            .ok()
            .and_then(|body| body.message)
            .unwrap_or_else(|| format!("The cluster rejected the notebook ({status})"));
        return Err(Error::Rejected(message));
    }
    response.error_for_status()?;
    Ok(())
}

#[async_trait]
impl ClusterService for KubernetesClusterService {
    async fn create_notebook(&self, spec: &NotebookSpec) -> Result<()> {
        self.post("api/v1", "pods", &self.pod_manifest(spec)).await?;

        let exposed = match self.post("api/v1", "services", &self.service_manifest(spec)).await {
            Ok(()) => self.post("apis/networking.k8s.io/v1", "ingresses", &self.ingress_manifest(spec)).await,
            Err(e) => Err(e),
        };
        if let Err(e) = exposed {
            if let Err(cleanup) = self.remove_notebook(&spec.name).await {
                warn!(error = %cleanup, "unable to clean up partially created notebook {}.", spec.name);
            }
            return Err(e);
        }

        info!("notebook(name: {}) created for user(unix_name: {}).", spec.name, spec.owner);
        Ok(())
    }

    async fn list_all_notebooks(&self) -> Result<Vec<Notebook>> {
        self.list_pods(&format!("{APP_LABEL}={APP_NAME}")).await
    }

    async fn list_user_notebooks(&self, owner: &str) -> Result<Vec<Notebook>> {
        self.list_pods(&format!("{APP_LABEL}={APP_NAME},{OWNER_LABEL}={owner}")).await
    }

    async fn get_notebook(&self, name: &str) -> Result<Option<Notebook>> {
        let url = self.namespaced_url("api/v1", &["pods", name])?;
        let response = self.client.get(url).bearer_auth(&self.token).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let pod = response.error_for_status()?.json::<Pod>().await?;
        Ok(Some(notebook_from_pod(pod, &self.domain, Utc::now())))
    }

    async fn remove_notebook(&self, name: &str) -> Result<()> {
        self.delete("apis/networking.k8s.io/v1", "ingresses", name).await?;
        self.delete("api/v1", "services", name).await?;
        self.delete("api/v1", "pods", name).await?;

        info!("notebook(name: {name}) removed.");
        Ok(())
    }

    async fn list_gpu_products(&self) -> Result<Vec<GpuProduct>> {
        let nodes = self
            .client
            .get(self.url.join("api/v1/nodes")?)
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?
            .json::<ObjectList<Node>>()
            .await?;

        Ok(aggregate_gpu_products(&nodes.items))
    }
}

#[derive(Deserialize)]
struct StatusResponse {
    message: Option<String>,
}

#[derive(Deserialize)]
struct ObjectList<T> {
    #[serde(default)]
    items: Vec<T>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    #[serde(default)]
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    labels: HashMap<String, String>,
    #[serde(default)]
    annotations: HashMap<String, String>,
    creation_timestamp: Option<DateTime<Utc>>,
    deletion_timestamp: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Default)]
struct Pod {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: PodSpec,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Deserialize, Default)]
struct PodSpec {
    #[serde(default)]
    containers: Vec<Container>,
}

#[derive(Deserialize, Default)]
struct Container {
    #[serde(default)]
    image: String,
    #[serde(default)]
    resources: ContainerResources,
}

#[derive(Deserialize, Default)]
struct ContainerResources {
    #[serde(default)]
    requests: HashMap<String, String>,
    #[serde(default)]
    limits: HashMap<String, String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PodStatus {
    #[serde(default)]
    phase: String,
    #[serde(default)]
    container_statuses: Vec<ContainerStatus>,
}

#[derive(Deserialize, Default)]
struct ContainerStatus {
    #[serde(default)]
    ready: bool,
}

#[derive(Deserialize, Default)]
struct Node {
    #[serde(default)]
    metadata: ObjectMeta,
}

fn notebook_from_pod(pod: Pod, domain: &str, now: DateTime<Utc>) -> Notebook {
    let Pod { metadata, spec, status } = pod;

    let status_text = if metadata.deletion_timestamp.is_some() {
        "Removing".to_owned()
    } else if status.phase == "Running"
        && !status.container_statuses.is_empty()
        && status.container_statuses.iter().all(|container| container.ready)
    {
        "Ready".to_owned()
    } else if status.phase.is_empty() {
        "Pending".to_owned()
    } else {
        status.phase
    };

    let expiration_date = metadata.creation_timestamp.zip(
        metadata.annotations.get(DURATION_ANNOTATION).and_then(|duration| duration.parse::<i64>().ok()),
    )
    .and_then(|(created, hours)| {
        Duration::try_hours(hours).and_then(|duration| created.checked_add_signed(duration))
    });
    let hours_remaining = expiration_date.map(|expiration| (expiration - now).num_hours().max(0));

    let token = metadata.annotations.get(TOKEN_ANNOTATION).cloned().unwrap_or_default();
    let url = format!("https://{}.{domain}/lab?token={token}", metadata.name);

    let container = spec.containers.into_iter().next().unwrap_or_default();
    let request = |key: &str| container.resources.requests.get(key).cloned().unwrap_or_default();
    let limit = |key: &str| container.resources.limits.get(key).cloned().unwrap_or_default();

    Notebook {
        owner: metadata.labels.get(OWNER_LABEL).cloned().unwrap_or_default(),
        namespace: metadata.namespace,
        status: status_text,
        url,
        creation_date: metadata.creation_timestamp,
        expiration_date,
        hours_remaining,
        cpu_request: request("cpu"),
        cpu_limit: limit("cpu"),
        memory_request: request("memory"),
        memory_limit: limit("memory"),
        gpu_request: request(GPU_RESOURCE),
        gpu_limit: limit(GPU_RESOURCE),
        image: container.image,
        name: metadata.name,
    }
}

fn aggregate_gpu_products(nodes: &[Node]) -> Vec<GpuProduct> {
    let mut products: BTreeMap<&str, GpuProduct> = BTreeMap::new();
    for labels in nodes.iter().map(|node| &node.metadata.labels) {
        let Some(product) = labels.get(GPU_PRODUCT_LABEL) else {
            continue;
        };
        let memory = labels.get(GPU_MEMORY_LABEL).and_then(|memory| memory.parse().ok()).unwrap_or(0);
        let count = labels.get(GPU_COUNT_LABEL).and_then(|count| count.parse().ok()).unwrap_or(0);

        products
            .entry(product.as_str())
            .and_modify(|entry| entry.count = entry.count.saturating_add(count))
            .or_insert_with(|| GpuProduct { product: product.clone(), memory, count });
    }
    products.into_values().collect()
}

#[cfg(test)]
mod test {
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use url::Url;

    use super::{aggregate_gpu_products, notebook_from_pod, KubernetesClusterService, Node, ObjectList, Pod};
    use crate::domain::notebook::{NotebookResources, NotebookSpec};

    fn service() -> KubernetesClusterService {
        KubernetesClusterService {
            client: reqwest::Client::new(),
            url: Url::parse("https://cluster.example.org:6443/").unwrap(),
            token: "token".to_owned(),
            namespace: "af-jupyter".to_owned(),
            domain: "af.example.org".to_owned(),
        }
    }

    fn spec(gpu: u32) -> NotebookSpec {
        NotebookSpec {
            name: "jdoe-notebook-1".to_owned(),
            owner: "jdoe".to_owned(),
            owner_subject: "subject-id".to_owned(),
            image: "ml-platform:latest".to_owned(),
            duration: 12,
            gpu_memory: 40536,
            resources: NotebookResources::derive(4, 8, gpu),
            token: "jupyter-token".to_owned(),
        }
    }

    #[test]
    fn api_path_segments_are_escaped() {
        let url = service().namespaced_url("api/v1", &["pods", "../services/x?watch=1#frag"]).unwrap();

        assert_eq!(url.path(), "/api/v1/namespaces/af-jupyter/pods/..%2Fservices%2Fx%3Fwatch%3D1%23frag");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn dot_segments_are_refused() {
        assert!(service().namespaced_url("api/v1", &["pods", ".."]).is_err());
        assert!(service().namespaced_url("api/v1", &["pods", "."]).is_err());
        assert!(service().namespaced_url("api/v1", &["pods", ""]).is_err());
    }

    #[test]
    fn pod_manifest_requests_and_limits_follow_resources() {
        let pod = service().pod_manifest(&spec(1));
        let resources = &pod["spec"]["containers"][0]["resources"];

        assert_eq!(pod["metadata"]["labels"]["owner"], "jdoe");
        assert_eq!(pod["metadata"]["annotations"]["duration"], "12");
        assert_eq!(resources["requests"]["cpu"], "4");
        assert_eq!(resources["limits"]["cpu"], "8");
        assert_eq!(resources["requests"]["memory"], "8Gi");
        assert_eq!(resources["limits"]["memory"], "16Gi");
        assert_eq!(resources["requests"]["nvidia.com/gpu"], "1");
        assert_eq!(resources["limits"]["nvidia.com/gpu"], "1");
        assert_eq!(
            pod["spec"]["affinity"]["nodeAffinity"]["requiredDuringSchedulingIgnoredDuringExecution"]
                ["nodeSelectorTerms"][0]["matchExpressions"][0]["values"][0],
            "40535"
        );
    }

    #[test]
    fn pod_manifest_without_gpu_has_no_affinity() {
        let pod = service().pod_manifest(&spec(0));

        assert!(pod["spec"].get("affinity").is_none());
        assert_eq!(pod["spec"]["containers"][0]["resources"]["limits"]["nvidia.com/gpu"], "0");
    }

    #[test]
    fn ingress_routes_notebook_host_to_its_service() {
        let ingress = service().ingress_manifest(&spec(0));

        assert_eq!(ingress["spec"]["rules"][0]["host"], "jdoe-notebook-1.af.example.org");
        assert_eq!(ingress["spec"]["rules"][0]["http"]["paths"][0]["backend"]["service"]["name"], "jdoe-notebook-1");
    }

    #[test]
    fn notebook_view_is_read_from_pod() {
        let pod: Pod = serde_json::from_value(json!({
            "metadata": {
                "name": "jdoe-notebook-1",
                "namespace": "af-jupyter",
                "labels": { "owner": "jdoe" },
                "annotations": { "duration": "12", "jupyter-token": "abc" },
                "creationTimestamp": "2024-05-01T10:00:00Z"
            },
            "spec": { "containers": [{
                "image": "ml-platform:latest",
                "resources": { "requests": { "cpu": "4", "memory": "8Gi" }, "limits": { "cpu": "8", "memory": "16Gi" } }
            }] },
            "status": { "phase": "Running", "containerStatuses": [{ "ready": true }] }
        }))
        .unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 13, 30, 0).unwrap();

        let notebook = notebook_from_pod(pod, "af.example.org", now);

        assert_eq!(notebook.owner, "jdoe");
        assert_eq!(notebook.status, "Ready");
        assert_eq!(notebook.url, "https://jdoe-notebook-1.af.example.org/lab?token=abc");
        assert_eq!(notebook.expiration_date, Some(Utc.with_ymd_and_hms(2024, 5, 1, 22, 0, 0).unwrap()));
        assert_eq!(notebook.hours_remaining, Some(8));
        assert_eq!(notebook.memory_limit, "16Gi");
        assert_eq!(notebook.gpu_request, "");
    }

    #[test]
    fn notebook_status_reflects_pod_lifecycle() {
        let pending: Pod = serde_json::from_value(json!({ "metadata": { "name": "a" } })).unwrap();
        assert_eq!(notebook_from_pod(pending, "d", Utc::now()).status, "Pending");

        let starting: Pod = serde_json::from_value(json!({
            "metadata": { "name": "a" },
            "status": { "phase": "Running", "containerStatuses": [{ "ready": false }] }
        }))
        .unwrap();
        assert_eq!(notebook_from_pod(starting, "d", Utc::now()).status, "Running");

        let removing: Pod = serde_json::from_value(json!({
            "metadata": { "name": "a", "deletionTimestamp": "2024-05-01T10:00:00Z" },
            "status": { "phase": "Running" }
        }))
        .unwrap();
        assert_eq!(notebook_from_pod(removing, "d", Utc::now()).status, "Removing");
    }

    #[test]
    fn when_duration_annotation_overflows_then_notebook_has_no_expiration() {
        let pod: Pod = serde_json::from_value(json!({
            "metadata": {
                "name": "jdoe-notebook-1",
                "annotations": { "duration": i64::MAX.to_string() },
                "creationTimestamp": "2024-05-01T10:00:00Z"
            }
        }))
        .unwrap();

        let notebook = notebook_from_pod(pod, "af.example.org", Utc::now());

        assert_eq!(notebook.expiration_date, None);
        assert_eq!(notebook.hours_remaining, None);
    }

    #[test]
    fn gpu_counts_saturate_instead_of_overflowing() {
        let nodes: ObjectList<Node> = serde_json::from_value(json!({ "items": [
            { "metadata": { "labels": { "nvidia.com/gpu.product": "A100", "nvidia.com/gpu.count": u32::MAX.to_string() } } },
            { "metadata": { "labels": { "nvidia.com/gpu.product": "A100", "nvidia.com/gpu.count": "8" } } }
        ] }))
        .unwrap();

        let products = aggregate_gpu_products(&nodes.items);

        assert_eq!(products[0].count, u32::MAX);
    }

    #[test]
    fn gpu_products_are_aggregated_across_nodes() {
        let nodes: ObjectList<Node> = serde_json::from_value(json!({ "items": [
            { "metadata": { "labels": {
                "nvidia.com/gpu.product": "NVIDIA-A100-SXM4-40GB", "nvidia.com/gpu.memory": "40536", "nvidia.com/gpu.count": "4"
            } } },
            { "metadata": { "labels": {
                "nvidia.com/gpu.product": "NVIDIA-A100-SXM4-40GB", "nvidia.com/gpu.memory": "40536", "nvidia.com/gpu.count": "8"
            } } },
            { "metadata": { "labels": {
                "nvidia.com/gpu.product": "Tesla-V100-PCIE-16GB", "nvidia.com/gpu.memory": "16160", "nvidia.com/gpu.count": "2"
            } } },
            { "metadata": { "labels": { "kubernetes.io/hostname": "cpu-only" } } }
        ] }))
        .unwrap();

        let products = aggregate_gpu_products(&nodes.items);

        assert_eq!(products.len(), 2);
        assert_eq!(products[0].product, "NVIDIA-A100-SXM4-40GB");
        assert_eq!(products[0].count, 12);
        assert_eq!(products[0].memory, 40536);
        assert_eq!(products[1].count, 2);
    }
}
