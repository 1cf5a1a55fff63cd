//! Process-lifetime record of what a session has created
//!
//! A session owns its `RuntimeState` exclusively: provisioning fills fields in
//! as each resource is successfully created, and the cleanup orchestrator
//! reads the same record at shutdown. An empty field means "not created / not
//! applicable", so cleanup of a half-provisioned session only touches what
//! actually exists.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::labels;

/// Identity of a session's SSH key pair.
///
/// Carried explicitly so cleanup doesn't have to re-derive it from the
/// ConfigMap name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShadowKey {
    /// `kt-component` the key was generated for
    pub component: String,
    /// Session version the key was generated for
    pub version: String,
}

/// Mutable record of resources created during a session
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuntimeState {
    /// Namespace every recorded object lives in
    pub namespace: String,
    /// PID file written by this session, if any
    pub pid_file_path: Option<PathBuf>,
    /// Shadow deployment name
    pub shadow_workload_name: Option<String>,
    /// Public key ConfigMap name, `kt-<component>-public-key-<version>`
    pub ssh_config_map_name: Option<String>,
    /// Key identity for the local private key file
    pub shadow_key: Option<ShadowKey>,
    /// Origin deployment whose replica count was altered
    pub origin_workload_name: Option<String>,
    /// Replica count to restore the origin deployment to
    pub origin_replica_count: i32,
    /// Service created for the shadow
    pub service_name: Option<String>,
    /// Hosts-file entries written by this session (name -> ip)
    pub hosts: BTreeMap<String, String>,
}

impl RuntimeState {
    /// Fresh state for a session in `namespace`
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Record the public key ConfigMap and the key it was generated from
    pub fn record_config_map(&mut self, name: &str, component: &str, version: &str) {
        self.ssh_config_map_name = Some(name.to_string());
        self.shadow_key = Some(ShadowKey {
            component: component.to_string(),
            version: version.to_string(),
        });
    }

    /// Record the shadow deployment
    pub fn record_shadow(&mut self, name: &str) {
        self.shadow_workload_name = Some(name.to_string());
    }

    /// Record the origin deployment and the replica count to restore
    pub fn record_origin(&mut self, name: &str, replicas: i32) {
        self.origin_workload_name = Some(name.to_string());
        self.origin_replica_count = replicas;
    }

    /// Record the shadow's Service
    pub fn record_service(&mut self, name: &str) {
        self.service_name = Some(name.to_string());
    }

    /// Key identity for private key removal.
    ///
    /// Prefers the explicitly recorded identity; falls back to parsing the
    /// ConfigMap name for states that only carry the name.
    pub fn key_identity(&self) -> Option<ShadowKey> {
        if let Some(key) = &self.shadow_key {
            return Some(key.clone());
        }
        let name = self.ssh_config_map_name.as_deref()?;
        labels::parse_config_map_name(name).map(|(component, version)| ShadowKey {
            component,
            version,
        })
    }

    /// Whether any cluster-side object has been recorded
    pub fn has_cluster_resources(&self) -> bool {
        self.shadow_workload_name.is_some()
            || self.ssh_config_map_name.is_some()
            || self.origin_workload_name.is_some()
            || self.service_name.is_some()
    }
}
