//! Cluster client provider for dependency injection
//!
//! Sessions and the cleanup path obtain their [`ClusterClient`] through this
//! trait, so client construction can fail lazily (cleanup still runs its local
//! steps) and tests can hand out an in-memory cluster.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use ktctl_cluster::{ClusterClient, KubeClusterClient};
use ktctl_common::Error;

/// Connection timeout for kube clients
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Read timeout for kube clients
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Trait for obtaining a cluster client
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ClusterClientProvider: Send + Sync {
    /// Create a client for the configured cluster
    async fn create(&self) -> Result<Arc<dyn ClusterClient>, Error>;
}

/// Builds kube-rs backed clients from a kubeconfig path or the environment
#[derive(Clone, Debug, Default)]
pub struct KubeClusterClientProvider {
    kubeconfig: Option<PathBuf>,
}

impl KubeClusterClientProvider {
    /// Provider reading `kubeconfig`, or inferring config when `None`
    pub fn new(kubeconfig: Option<PathBuf>) -> Self {
        Self { kubeconfig }
    }
}

#[async_trait::async_trait]
impl ClusterClientProvider for KubeClusterClientProvider {
    async fn create(&self) -> Result<Arc<dyn ClusterClient>, Error> {
        let client = create_client(self.kubeconfig.as_deref()).await?;
        Ok(Arc::new(KubeClusterClient::new(client)))
    }
}

/// Create a kube client from an optional kubeconfig path
pub async fn create_client(kubeconfig: Option<&std::path::Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}
