//! Cluster client capability surface
//!
//! [`ClusterClient`] is the narrow set of orchestration-API calls ktctl needs.
//! Call sites only ever see the trait; [`KubeClusterClient`] is the single
//! production adapter over kube-rs, and tests substitute a mock or an
//! in-memory fake.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Node, Pod, Service};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::runtime::reflector::{self, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, ResourceExt};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use ktctl_common::Error;

/// How long the pod watch may take to deliver its initial list
pub const CACHE_SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// Locally cached view of a label-scoped pod watch.
///
/// Dropping the cache tears the underlying watch down.
pub trait PodCache: Send + Sync {
    /// Pods currently known to the cache
    fn pods(&self) -> Result<Vec<Pod>, Error>;
}

/// Trait abstracting the orchestration API
///
/// All operations are namespace-scoped unless noted. Failures are already
/// classified: a missing object is `Error::NotFound`, a name clash on create
/// is `Error::AlreadyExists`, an update race is `Error::Conflict`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Get a namespace (cluster-scoped)
    async fn get_namespace(&self, name: &str) -> Result<Namespace, Error>;

    /// Get a deployment
    async fn get_deployment(&self, name: &str, namespace: &str) -> Result<Deployment, Error>;

    /// Create a deployment
    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, Error>;

    /// Replace a deployment with the given object (single attempt, no retry)
    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment, Error>;

    /// Delete a deployment; dependents are garbage-collected in the background
    async fn remove_deployment(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// Create a ConfigMap
    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, Error>;

    /// Delete a ConfigMap
    async fn remove_config_map(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// Create a Service
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, Error>;

    /// Delete a Service
    async fn remove_service(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// List Services in one namespace
    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>, Error>;

    /// List Services across all namespaces
    async fn list_all_services(&self) -> Result<Vec<Service>, Error>;

    /// List cluster nodes
    async fn list_nodes(&self) -> Result<Vec<Node>, Error>;

    /// Open a label-scoped pod watch in `namespace` and return its cache
    /// once the initial list has been received.
    async fn watch_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Box<dyn PodCache>, Error>;
}

/// Production [`ClusterClient`] backed by a kube-rs client
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_namespace(&self, name: &str) -> Result<Namespace, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.get(name)
            .await
            .map_err(|e| Error::from_kube("get", "Namespace", name, "", e))
    }

    async fn get_deployment(&self, name: &str, namespace: &str) -> Result<Deployment, Error> {
        self.deployments(namespace)
            .get(name)
            .await
            .map_err(|e| Error::from_kube("get", "Deployment", name, namespace, e))
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, Error> {
        let name = deployment.name_any();
        self.deployments(namespace)
            .create(&PostParams::default(), deployment)
            .await
            .map_err(|e| Error::from_kube("create", "Deployment", &name, namespace, e))
    }

    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment, Error> {
        let name = deployment.name_any();
        let namespace = deployment.namespace().unwrap_or_default();
        self.deployments(&namespace)
            .replace(&name, &PostParams::default(), deployment)
            .await
            .map_err(|e| Error::from_kube("replace", "Deployment", &name, &namespace, e))
    }

    async fn remove_deployment(&self, name: &str, namespace: &str) -> Result<(), Error> {
        self.deployments(namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube("delete", "Deployment", name, namespace, e))
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, Error> {
        let name = config_map.name_any();
        self.config_maps(namespace)
            .create(&PostParams::default(), config_map)
            .await
            .map_err(|e| Error::from_kube("create", "ConfigMap", &name, namespace, e))
    }

    async fn remove_config_map(&self, name: &str, namespace: &str) -> Result<(), Error> {
        self.config_maps(namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube("delete", "ConfigMap", name, namespace, e))
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, Error> {
        let name = service.name_any();
        self.services(namespace)
            .create(&PostParams::default(), service)
            .await
            .map_err(|e| Error::from_kube("create", "Service", &name, namespace, e))
    }

    async fn remove_service(&self, name: &str, namespace: &str) -> Result<(), Error> {
        self.services(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube("delete", "Service", name, namespace, e))
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>, Error> {
        self.services(namespace)
            .list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| Error::from_kube("list", "Service", "", namespace, e))
    }

    async fn list_all_services(&self) -> Result<Vec<Service>, Error> {
        let api: Api<Service> = Api::all(self.client.clone());
        api.list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| Error::from_kube("list", "Service", "", "", e))
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        api.list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| Error::from_kube("list", "Node", "", "", e))
    }

    async fn watch_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Box<dyn PodCache>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let (store, writer) = reflector::store();
        let config = watcher::Config::default().labels(label_selector);
        let stream = reflector::reflector(writer, watcher::watcher(api, config))
            .default_backoff()
            .applied_objects();

        let selector = label_selector.to_string();
        let task = tokio::spawn(async move {
            let mut stream = std::pin::pin!(stream);
            while let Some(event) = stream.next().await {
                match event {
                    Ok(pod) => debug!(pod = %pod.name_any(), selector = %selector, "Pod event"),
                    Err(e) => warn!(error = %e, selector = %selector, "Pod watch error, retrying"),
                }
            }
        });
        let cache = ReflectorPodCache { store, task };

        let synced = tokio::time::timeout(CACHE_SYNC_TIMEOUT, cache.store.wait_until_ready()).await;
        match synced {
            Ok(Ok(())) => Ok(Box::new(cache)),
            Ok(Err(e)) => Err(Error::internal_with_context(
                "watch_pods",
                format!("pod watch for {} stopped before syncing: {}", label_selector, e),
            )),
            Err(_) => Err(Error::deadline_exceeded(
                "watch_pods",
                format!("initial pod list for {}", label_selector),
                CACHE_SYNC_TIMEOUT,
            )),
        }
    }
}

/// Pod cache fed by a background reflector task
struct ReflectorPodCache {
    store: Store<Pod>,
    task: JoinHandle<()>,
}

impl PodCache for ReflectorPodCache {
    fn pods(&self) -> Result<Vec<Pod>, Error> {
        if self.task.is_finished() {
            return Err(Error::internal_with_context(
                "pod_cache",
                "pod watch terminated",
            ));
        }
        Ok(self.store.state().iter().map(|p| (**p).clone()).collect())
    }
}

impl Drop for ReflectorPodCache {
    fn drop(&mut self) {
        self.task.abort();
    }
}
