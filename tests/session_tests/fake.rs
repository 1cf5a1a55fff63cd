//! In-memory cluster, client provider and tunnel for session tests

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, Node, NodeSpec, Pod, PodStatus, Service, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;

use ktctl::cleanup::WorkspaceCleanup;
use ktctl::commands::SessionContext;
use ktctl::config::{Settings, DEFAULT_NAMESPACE};
use ktctl::provider::ClusterClientProvider;
use ktctl::tunnel::{Expose, Tunnel, TunnelHandle};
use ktctl_cluster::readiness::WaitOptions;
use ktctl_cluster::{ClusterClient, PodCache};
use ktctl_common::ssh::{Ed25519KeyGenerator, SshCredential};
use ktctl_common::Error;

type Key = (String, String);

fn key(name: &str, namespace: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

#[derive(Default)]
struct Inner {
    namespaces: BTreeMap<String, Namespace>,
    deployments: BTreeMap<Key, Deployment>,
    config_maps: BTreeMap<Key, ConfigMap>,
    services: BTreeMap<Key, Service>,
    nodes: Vec<Node>,
    /// `(deployment, replicas)` for every replace call
    scale_calls: Vec<(String, i32)>,
    pod_phase: String,
    fail_deployment_create: bool,
    /// Delay after a Deployment is stored, before create returns
    create_stall: Option<Duration>,
}

/// In-memory cluster implementing [`ClusterClient`]
pub struct FakeCluster {
    inner: Mutex<Inner>,
}

impl FakeCluster {
    /// Cluster with the default namespace and shadow pods that start Running
    pub fn new() -> Arc<Self> {
        let cluster = Self {
            inner: Mutex::new(Inner {
                pod_phase: "Running".to_string(),
                ..Default::default()
            }),
        };
        cluster.add_namespace(DEFAULT_NAMESPACE);
        Arc::new(cluster)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("fake cluster lock poisoned")
    }

    pub fn add_namespace(&self, name: &str) {
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        self.lock().namespaces.insert(name.to_string(), ns);
    }

    /// Add an origin deployment selecting pods by `match_labels`
    pub fn add_deployment(
        &self,
        name: &str,
        namespace: &str,
        replicas: i32,
        match_labels: &[(&str, &str)],
    ) {
        let labels: BTreeMap<String, String> = match_labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let deployment = Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                selector: LabelSelector {
                    match_labels: Some(labels),
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..Default::default()
        };
        self.lock().deployments.insert(key(name, namespace), deployment);
    }

    pub fn add_service(&self, name: &str, namespace: &str, cluster_ip: &str) {
        let svc = Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                cluster_ip: Some(cluster_ip.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.lock().services.insert(key(name, namespace), svc);
    }

    pub fn add_node(&self, name: &str, pod_cidr: Option<&str>) {
        let node = Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                pod_cidr: pod_cidr.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.lock().nodes.push(node);
    }

    /// Phase reported for every shadow pod
    pub fn set_pod_phase(&self, phase: &str) {
        self.lock().pod_phase = phase.to_string();
    }

    pub fn fail_deployment_create(&self) {
        self.lock().fail_deployment_create = true;
    }

    /// Commit Deployment creates immediately but answer only after `delay`
    pub fn stall_deployment_create(&self, delay: Duration) {
        self.lock().create_stall = Some(delay);
    }

    pub fn deployment(&self, name: &str, namespace: &str) -> Option<Deployment> {
        self.lock().deployments.get(&key(name, namespace)).cloned()
    }

    pub fn replicas(&self, name: &str, namespace: &str) -> Option<i32> {
        self.deployment(name, namespace)
            .and_then(|d| d.spec.and_then(|s| s.replicas))
    }

    pub fn deployment_names(&self, namespace: &str) -> Vec<String> {
        self.lock()
            .deployments
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn config_map_names(&self, namespace: &str) -> Vec<String> {
        self.lock()
            .config_maps
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn has_service(&self, name: &str, namespace: &str) -> bool {
        self.lock().services.contains_key(&key(name, namespace))
    }

    pub fn scale_calls(&self) -> Vec<(String, i32)> {
        self.lock().scale_calls.clone()
    }

    fn shadow_pods(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Vec<Pod> {
        let inner = self.lock();
        inner
            .deployments
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .enumerate()
            .filter_map(|(i, ((_, name), d))| {
                let labels = d
                    .spec
                    .as_ref()?
                    .template
                    .metadata
                    .as_ref()?
                    .labels
                    .clone()?;
                let matches = selector.iter().all(|(k, v)| labels.get(k) == Some(v));
                matches.then(|| Pod {
                    metadata: ObjectMeta {
                        name: Some(format!("{}-6c8f9d-q2x7z", name)),
                        namespace: Some(namespace.to_string()),
                        labels: Some(labels),
                        ..Default::default()
                    },
                    status: Some(PodStatus {
                        phase: Some(inner.pod_phase.clone()),
                        pod_ip: Some(format!("10.244.0.{}", i + 10)),
                        ..Default::default()
                    }),
                    ..Default::default()
                })
            })
            .collect()
    }
}

fn parse_selector(selector: &str) -> BTreeMap<String, String> {
    selector
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

struct SnapshotCache(Vec<Pod>);

impl PodCache for SnapshotCache {
    fn pods(&self) -> Result<Vec<Pod>, Error> {
        Ok(self.0.clone())
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get_namespace(&self, name: &str) -> Result<Namespace, Error> {
        self.lock()
            .namespaces
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("Namespace", name, ""))
    }

    async fn get_deployment(&self, name: &str, namespace: &str) -> Result<Deployment, Error> {
        self.deployment(name, namespace)
            .ok_or_else(|| Error::not_found("Deployment", name, namespace))
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, Error> {
        let name = deployment.name_any();
        let stall = {
            let mut inner = self.lock();
            if inner.fail_deployment_create {
                return Err(Error::internal_with_context(
                    "create_deployment",
                    "admission webhook denied the request",
                ));
            }
            let k = key(&name, namespace);
            if inner.deployments.contains_key(&k) {
                return Err(Error::already_exists("Deployment", name, namespace));
            }
            inner.deployments.insert(k, deployment.clone());
            inner.create_stall
        };
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        Ok(deployment.clone())
    }

    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment, Error> {
        let name = deployment.name_any();
        let namespace = deployment.namespace().unwrap_or_default();
        let mut inner = self.lock();
        let k = key(&name, &namespace);
        if !inner.deployments.contains_key(&k) {
            return Err(Error::not_found("Deployment", name, namespace));
        }
        let replicas = deployment
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(1);
        inner.scale_calls.push((name, replicas));
        inner.deployments.insert(k, deployment.clone());
        Ok(deployment.clone())
    }

    async fn remove_deployment(&self, name: &str, namespace: &str) -> Result<(), Error> {
        self.lock()
            .deployments
            .remove(&key(name, namespace))
            .map(|_| ())
            .ok_or_else(|| Error::not_found("Deployment", name, namespace))
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, Error> {
        let name = config_map.name_any();
        let mut inner = self.lock();
        let k = key(&name, namespace);
        if inner.config_maps.contains_key(&k) {
            return Err(Error::already_exists("ConfigMap", name, namespace));
        }
        inner.config_maps.insert(k, config_map.clone());
        Ok(config_map.clone())
    }

    async fn remove_config_map(&self, name: &str, namespace: &str) -> Result<(), Error> {
        self.lock()
            .config_maps
            .remove(&key(name, namespace))
            .map(|_| ())
            .ok_or_else(|| Error::not_found("ConfigMap", name, namespace))
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, Error> {
        let name = service.name_any();
        let mut inner = self.lock();
        let k = key(&name, namespace);
        if inner.services.contains_key(&k) {
            return Err(Error::already_exists("Service", name, namespace));
        }
        inner.services.insert(k, service.clone());
        Ok(service.clone())
    }

    async fn remove_service(&self, name: &str, namespace: &str) -> Result<(), Error> {
        self.lock()
            .services
            .remove(&key(name, namespace))
            .map(|_| ())
            .ok_or_else(|| Error::not_found("Service", name, namespace))
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>, Error> {
        Ok(self
            .lock()
            .services
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn list_all_services(&self) -> Result<Vec<Service>, Error> {
        Ok(self.lock().services.values().cloned().collect())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, Error> {
        Ok(self.lock().nodes.clone())
    }

    async fn watch_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Box<dyn PodCache>, Error> {
        let selector = parse_selector(label_selector);
        Ok(Box::new(SnapshotCache(self.shadow_pods(namespace, &selector))))
    }
}

/// Hands out the shared fake cluster, or fails every time
pub struct FakeProvider {
    cluster: Arc<FakeCluster>,
    unreachable: bool,
}

impl FakeProvider {
    pub fn new(cluster: Arc<FakeCluster>) -> Arc<Self> {
        Arc::new(Self {
            cluster,
            unreachable: false,
        })
    }

    pub fn unreachable(cluster: Arc<FakeCluster>) -> Arc<Self> {
        Arc::new(Self {
            cluster,
            unreachable: true,
        })
    }
}

#[async_trait]
impl ClusterClientProvider for FakeProvider {
    async fn create(&self) -> Result<Arc<dyn ClusterClient>, Error> {
        if self.unreachable {
            return Err(Error::internal_with_context(
                "create_client",
                "connection refused",
            ));
        }
        let client: Arc<dyn ClusterClient> = self.cluster.clone();
        Ok(client)
    }
}

/// What the cluster and workspace looked like while the tunnel was up
#[derive(Clone, Debug, Default)]
pub struct TunnelObservation {
    pub direction: String,
    pub pod_name: String,
    pub pod_ip: String,
    pub expose: Option<Expose>,
    pub cidrs: Vec<String>,
    pub private_key_path: PathBuf,
    pub private_key_existed: bool,
    pub deployments: Vec<String>,
    pub config_maps: Vec<String>,
}

/// Tunnel that records the cluster state and then simulates Ctrl+C
pub struct FakeTunnel {
    cluster: Arc<FakeCluster>,
    cancel: CancellationToken,
    namespace: String,
    observed: Mutex<Option<TunnelObservation>>,
    /// Called while the tunnel is up
    hook: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl FakeTunnel {
    pub fn new(cluster: Arc<FakeCluster>, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            cluster,
            cancel,
            namespace: DEFAULT_NAMESPACE.to_string(),
            observed: Mutex::new(None),
            hook: Mutex::new(None),
        })
    }

    /// Run `hook` while the tunnel is up, before the simulated signal
    pub fn on_established(&self, hook: impl FnOnce() + Send + 'static) {
        *self.hook.lock().expect("hook lock") = Some(Box::new(hook));
    }

    pub fn observation(&self) -> Option<TunnelObservation> {
        self.observed.lock().expect("observation lock").clone()
    }

    fn establish(&self, mut observation: TunnelObservation, credential: &SshCredential) {
        observation.private_key_path = credential.private_key_path.clone();
        observation.private_key_existed = credential.private_key_path.exists();
        observation.deployments = self.cluster.deployment_names(&self.namespace);
        observation.config_maps = self.cluster.config_map_names(&self.namespace);
        *self.observed.lock().expect("observation lock") = Some(observation);

        if let Some(hook) = self.hook.lock().expect("hook lock").take() {
            hook();
        }
        self.cancel.cancel();
    }
}

struct IdleHandle;

#[async_trait]
impl TunnelHandle for IdleHandle {
    async fn closed(&mut self) -> ktctl::Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[async_trait]
impl Tunnel for FakeTunnel {
    async fn inbound(
        &self,
        expose: Expose,
        pod_name: &str,
        pod_ip: &str,
        credential: &SshCredential,
    ) -> ktctl::Result<Box<dyn TunnelHandle>> {
        self.establish(
            TunnelObservation {
                direction: "inbound".to_string(),
                pod_name: pod_name.to_string(),
                pod_ip: pod_ip.to_string(),
                expose: Some(expose),
                ..Default::default()
            },
            credential,
        );
        Ok(Box::new(IdleHandle))
    }

    async fn outbound(
        &self,
        pod_name: &str,
        pod_ip: &str,
        credential: &SshCredential,
        cidrs: &[String],
    ) -> ktctl::Result<Box<dyn TunnelHandle>> {
        self.establish(
            TunnelObservation {
                direction: "outbound".to_string(),
                pod_name: pod_name.to_string(),
                pod_ip: pod_ip.to_string(),
                cidrs: cidrs.to_vec(),
                ..Default::default()
            },
            credential,
        );
        Ok(Box::new(IdleHandle))
    }
}

/// A session wired to the fake cluster with its workspace under `home`
pub struct Harness {
    pub cluster: Arc<FakeCluster>,
    pub tunnel: Arc<FakeTunnel>,
    pub ctx: SessionContext,
}

impl Harness {
    pub fn new(cluster: Arc<FakeCluster>, home: &Path) -> Self {
        Self::with_provider(cluster.clone(), FakeProvider::new(cluster), home)
    }

    pub fn with_provider(
        cluster: Arc<FakeCluster>,
        provider: Arc<FakeProvider>,
        home: &Path,
    ) -> Self {
        let cancel = CancellationToken::new();
        let tunnel = FakeTunnel::new(cluster.clone(), cancel.clone());
        let settings = Settings {
            namespace: DEFAULT_NAMESPACE.to_string(),
            image: "kt-connect-shadow:v1".to_string(),
            kubeconfig: None,
            app_home: home.to_path_buf(),
            labels: BTreeMap::new(),
            debug: false,
            wait: WaitOptions {
                poll_interval: Duration::from_millis(10),
                timeout: Some(Duration::from_secs(5)),
            },
        };
        let cleanup = WorkspaceCleanup::new(provider.clone(), home)
            .with_jvmrc_path(home.join(".jvmrc"))
            .with_hosts_file(home.join("hosts"));
        let ctx = SessionContext {
            settings,
            provider,
            tunnel: tunnel.clone(),
            keys: Arc::new(Ed25519KeyGenerator),
            cancel,
            cleanup,
        };
        Self {
            cluster,
            tunnel,
            ctx,
        }
    }
}
