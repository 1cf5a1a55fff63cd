//! Label schema and naming conventions for shadow workloads
//!
//! Every object ktctl creates carries `kt`, `version`, `kt-component` and
//! `control-by`. The ConfigMap holding the shadow's public key is named
//! `kt-<component>-public-key-<version>`, and the matching private key lives
//! at `<app-home>/pk_<component>_<version>`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::{Error, KUBERNETES_TOOL};

// =============================================================================
// Label Keys
// =============================================================================

/// Label linking a shadow's objects together; the readiness watch selects on it
pub const LABEL_KT: &str = "kt";

/// Label carrying the random per-session version suffix
pub const LABEL_VERSION: &str = "version";

/// Label naming the session kind that created the object (mesh, exchange, ...)
pub const LABEL_COMPONENT: &str = "kt-component";

/// Label marking objects as managed by ktctl
pub const LABEL_CONTROL_BY: &str = "control-by";

/// Label recording the developer machine's outbound address, for troubleshooting
pub const LABEL_REMOTE_ADDRESS: &str = "remoteAddress";

/// Length of the random session version
pub const VERSION_LENGTH: usize = 5;

// =============================================================================
// Components
// =============================================================================

/// Session components, each naming the workflow that owns a shadow
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Component {
    /// Service-mesh traffic split to the local process
    Mesh,
    /// Replace an existing deployment with the shadow
    Exchange,
    /// Stand-alone shadow, optionally exposed as a Service
    Run,
    /// Outbound access from the local machine into the cluster
    Connect,
}

impl Component {
    /// The `kt-component` label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Mesh => "mesh",
            Component::Exchange => "exchange",
            Component::Run => "run",
            Component::Connect => "connect",
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Naming Helpers
// =============================================================================

/// Generate a random lowercase alphanumeric session version.
pub fn random_version() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(VERSION_LENGTH)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

/// Name of the shadow deployment that stands in for `origin`.
pub fn shadow_name(origin: &str, version: &str) -> String {
    format!("{}-kt-{}", origin, version)
}

/// Name of the ConfigMap carrying the shadow's public key.
pub fn config_map_name(component: &str, version: &str) -> String {
    format!("kt-{}-public-key-{}", component, version)
}

/// Recover `(component, version)` from a public key ConfigMap name.
///
/// Takes the second dash-separated segment as the component and the last one
/// as the version. Returns `None` for names that don't follow the
/// `kt-<component>-public-key-<version>` shape.
pub fn parse_config_map_name(name: &str) -> Option<(String, String)> {
    let rest = name.strip_prefix("kt-")?;
    let (component, version) = rest.split_once("-public-key-")?;
    if component.is_empty() || version.is_empty() || component.contains('-') {
        return None;
    }
    Some((component.to_string(), version.to_string()))
}

/// Local path of the private key for a `(component, version)` pair.
pub fn private_key_path(app_home: &Path, component: &str, version: &str) -> PathBuf {
    app_home.join(format!("pk_{}_{}", component, version))
}

// =============================================================================
// Label Sets
// =============================================================================

/// Build the label set for a shadow workload.
///
/// Starts from the four generated labels, then merges `selector_labels` (the
/// origin deployment's match labels, so the shadow receives the origin's
/// traffic), then `overrides` from the user. Later writes win.
pub fn session_labels(
    workload: &str,
    version: &str,
    component: Component,
    selector_labels: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_KT.to_string(), workload.to_string());
    labels.insert(LABEL_VERSION.to_string(), version.to_string());
    labels.insert(LABEL_COMPONENT.to_string(), component.to_string());
    labels.insert(LABEL_CONTROL_BY.to_string(), KUBERNETES_TOOL.to_string());

    for (k, v) in selector_labels {
        labels.insert(k.clone(), v.clone());
    }
    // extra labels must be applied after origin labels
    for (k, v) in overrides {
        labels.insert(k.clone(), v.clone());
    }
    labels
}

/// Parse a `k1=v1,k2=v2` label string.
///
/// Empty input yields an empty map. Whitespace around keys and values is
/// trimmed; a segment without `=` or with an empty key is rejected.
pub fn parse_labels(input: &str) -> Result<BTreeMap<String, String>, Error> {
    let mut labels = BTreeMap::new();
    for pair in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| Error::validation(format!("invalid label '{}', expected k=v", pair)))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::validation(format!(
                "invalid label '{}', key is empty",
                pair
            )));
        }
        labels.insert(key.to_string(), value.trim().to_string());
    }
    Ok(labels)
}

/// Render a label map as a Kubernetes equality selector (`k=v,k2=v2`).
pub fn to_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}
