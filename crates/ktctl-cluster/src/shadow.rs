//! Shadow workload provisioning
//!
//! Stands up a shadow in sequence: key pair, public key ConfigMap, Deployment,
//! then the readiness wait. Each object is recorded in the session's
//! [`RuntimeState`] as soon as it exists, so when a later step fails the
//! caller's normal cleanup reclaims what was created. Nothing is rolled back
//! here.

use std::collections::BTreeMap;
use std::net::UdpSocket;
use std::path::PathBuf;

use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::ClusterClient;
use crate::readiness::{pod_ip, wait_for_running_pod, WaitOptions};
use crate::template;
use ktctl_common::labels::{
    config_map_name, private_key_path, LABEL_COMPONENT, LABEL_KT, LABEL_REMOTE_ADDRESS,
    LABEL_VERSION,
};
use ktctl_common::ssh::{KeyGenerator, SshCredential};
use ktctl_common::{Error, RuntimeState};

/// What to provision
#[derive(Clone, Debug)]
pub struct ShadowRequest {
    /// Shadow deployment name
    pub name: String,
    /// Target namespace
    pub namespace: String,
    /// Shadow container image
    pub image: String,
    /// Label set; must carry `kt-component` and `version`
    pub labels: BTreeMap<String, String>,
    /// Start the shadow container in debug mode
    pub debug: bool,
}

/// Connection facts for a running shadow
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShadowConnection {
    /// IP of the running shadow pod
    pub pod_ip: String,
    /// Name of the running shadow pod
    pub pod_name: String,
    /// Public key ConfigMap name
    pub config_map_name: String,
    /// SSH credential for the shadow
    pub credential: SshCredential,
}

/// Creates shadow workloads against a [`ClusterClient`]
pub struct ShadowProvisioner<'a> {
    client: &'a dyn ClusterClient,
    keys: &'a dyn KeyGenerator,
    key_dir: PathBuf,
    wait: WaitOptions,
    cancel: CancellationToken,
    remote_address: Option<String>,
}

impl<'a> ShadowProvisioner<'a> {
    /// Provisioner writing private keys under `key_dir`
    pub fn new(
        client: &'a dyn ClusterClient,
        keys: &'a dyn KeyGenerator,
        key_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            keys,
            key_dir: key_dir.into(),
            wait: WaitOptions::default(),
            cancel: CancellationToken::new(),
            remote_address: None,
        }
    }

    /// Readiness wait pacing and deadline
    pub fn with_wait(mut self, wait: WaitOptions) -> Self {
        self.wait = wait;
        self
    }

    /// Token that aborts the readiness wait
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Use a fixed `remoteAddress` label instead of detecting the outbound IP
    pub fn with_remote_address(mut self, address: impl Into<String>) -> Self {
        self.remote_address = Some(address.into());
        self
    }

    /// Stand up a shadow and wait until its pod is running.
    ///
    /// The ConfigMap is labelled `kt=<configmap name>` and the Deployment
    /// `kt=<name>`; the readiness wait selects on the latter.
    pub async fn create_shadow(
        &self,
        request: &ShadowRequest,
        state: &mut RuntimeState,
    ) -> Result<ShadowConnection, Error> {
        let namespace = request.namespace.as_str();
        let component = required_label(&request.labels, LABEL_COMPONENT)?;
        let version = required_label(&request.labels, LABEL_VERSION)?;
        let cm_name = config_map_name(&component, &version);

        let key_path = private_key_path(&self.key_dir, &component, &version);
        let key_pair = self.keys.generate(&key_path)?;

        let mut labels = request.labels.clone();
        labels.insert(LABEL_KT.to_string(), cm_name.clone());
        let config_map =
            template::public_key_config_map(&cm_name, namespace, &labels, &key_pair.public_key);
        self.client.create_config_map(namespace, &config_map).await?;
        state.record_config_map(&cm_name, &component, &version);
        info!(config_map = %cm_name, namespace = %namespace, "Created SSH public key ConfigMap");

        match self.remote_address.clone().or_else(local_outbound_ip) {
            Some(address) => {
                info!(client_address = %address, "Client address");
                labels.insert(LABEL_REMOTE_ADDRESS.to_string(), address);
            }
            None => warn!("Could not determine local outbound address"),
        }

        labels.insert(LABEL_KT.to_string(), request.name.clone());
        let deployment = template::shadow_deployment(
            &request.name,
            namespace,
            &labels,
            &request.image,
            &cm_name,
            request.debug,
        );
        let created = self.client.create_deployment(namespace, &deployment).await?;
        state.record_shadow(&request.name);
        info!(deployment = %created.name_any(), namespace = %namespace, "Deployed shadow");

        let pod = wait_for_running_pod(
            self.client,
            namespace,
            &request.name,
            &self.wait,
            &self.cancel,
        )
        .await?;

        let ip = pod_ip(&pod).map(str::to_string).ok_or_else(|| {
            Error::internal_with_context(
                "create_shadow",
                format!("running pod {} has no IP", pod.name_any()),
            )
        })?;

        Ok(ShadowConnection {
            pod_ip: ip,
            pod_name: pod.name_any(),
            config_map_name: cm_name,
            credential: SshCredential::with_private_key(key_pair.private_key_path),
        })
    }
}

/// Create a ClusterIP Service `name` selecting `labels` on `port`.
pub async fn create_service(
    client: &dyn ClusterClient,
    name: &str,
    namespace: &str,
    port: u16,
    labels: &BTreeMap<String, String>,
) -> Result<Service, Error> {
    let service = template::shadow_service(name, namespace, labels, port);
    let created = client.create_service(namespace, &service).await?;
    info!(service = %name, namespace = %namespace, port, "Created service");
    Ok(created)
}

fn required_label(labels: &BTreeMap<String, String>, key: &str) -> Result<String, Error> {
    labels
        .get(key)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| Error::validation(format!("shadow labels are missing '{}'", key)))
}

/// Address of the interface that routes outbound traffic.
///
/// Connecting a UDP socket sends nothing; it only selects a route.
pub fn local_outbound_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip().to_string())
}
