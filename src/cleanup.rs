//! Workspace cleanup
//!
//! Runs at the end of every session, whether it ended normally, failed
//! part-way through provisioning, or was interrupted by a signal. Steps run in
//! a fixed order and are independent: a failed step is logged and recorded in
//! the [`CleanupReport`], then the next one runs. Every cluster deletion treats
//! "not found" as success, so running cleanup twice is harmless.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use ktctl_cluster::scale::scale_to;
use ktctl_cluster::ClusterClient;
use ktctl_common::error::ignore_not_found;
use ktctl_common::labels::private_key_path;
use ktctl_common::RuntimeState;

use crate::hosts;
use crate::provider::ClusterClientProvider;

/// Marker file some local JVM agents leave in the working directory
pub const JVMRC_FILE: &str = ".jvmrc";

/// Cleanup steps, in execution order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CleanupStep {
    /// Remove the daemon PID file
    PidFile,
    /// Remove the `.jvmrc` marker
    Jvmrc,
    /// Drop hosts-file entries written by the session
    Hosts,
    /// Obtain a cluster client
    Client,
    /// Scale the origin deployment back to its recorded replicas
    RestoreOrigin,
    /// Delete the shadow deployment
    RemoveShadow,
    /// Delete the public key ConfigMap
    RemoveConfigMap,
    /// Delete the local private key
    RemovePrivateKey,
    /// Delete the shadow's Service
    RemoveService,
}

impl fmt::Display for CleanupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CleanupStep::PidFile => "pid-file",
            CleanupStep::Jvmrc => "jvmrc",
            CleanupStep::Hosts => "hosts",
            CleanupStep::Client => "client",
            CleanupStep::RestoreOrigin => "restore-origin",
            CleanupStep::RemoveShadow => "remove-shadow",
            CleanupStep::RemoveConfigMap => "remove-configmap",
            CleanupStep::RemovePrivateKey => "remove-private-key",
            CleanupStep::RemoveService => "remove-service",
        };
        f.write_str(s)
    }
}

/// Result of one cleanup step
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing recorded for this step
    Skipped,
    /// The step ran and the resource is gone (or was already gone)
    Done,
    /// The step ran and failed; later steps still ran
    Failed(String),
}

/// Outcome of every step of one cleanup run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    steps: Vec<(CleanupStep, StepOutcome)>,
}

impl CleanupReport {
    fn record(&mut self, step: CleanupStep, outcome: StepOutcome) {
        if let StepOutcome::Failed(reason) = &outcome {
            error!(step = %step, error = %reason, "Cleanup step failed");
        }
        self.steps.push((step, outcome));
    }

    /// Steps in the order they ran
    pub fn steps(&self) -> &[(CleanupStep, StepOutcome)] {
        &self.steps
    }

    /// Outcome of a given step
    pub fn outcome(&self, step: CleanupStep) -> Option<&StepOutcome> {
        self.steps.iter().find(|(s, _)| *s == step).map(|(_, o)| o)
    }

    /// Steps that failed
    pub fn failures(&self) -> Vec<CleanupStep> {
        self.steps
            .iter()
            .filter(|(_, o)| matches!(o, StepOutcome::Failed(_)))
            .map(|(s, _)| *s)
            .collect()
    }

    /// Whether every step either ran or had nothing to do
    pub fn is_clean(&self) -> bool {
        self.failures().is_empty()
    }
}

fn outcome_of<E: fmt::Display>(result: Result<(), E>) -> StepOutcome {
    match result {
        Ok(()) => StepOutcome::Done,
        Err(e) => StepOutcome::Failed(e.to_string()),
    }
}

fn remove_local_file(path: &Path) -> StepOutcome {
    match std::fs::remove_file(path) {
        Ok(()) => StepOutcome::Done,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => StepOutcome::Done,
        Err(e) => StepOutcome::Failed(format!("{}: {}", path.display(), e)),
    }
}

/// Ordered, best-effort teardown of a session's workspace
pub struct WorkspaceCleanup {
    provider: Arc<dyn ClusterClientProvider>,
    key_dir: PathBuf,
    jvmrc_path: PathBuf,
    hosts_file: PathBuf,
}

impl WorkspaceCleanup {
    /// Cleanup obtaining its client from `provider`; private keys live under
    /// `key_dir`.
    pub fn new(provider: Arc<dyn ClusterClientProvider>, key_dir: impl Into<PathBuf>) -> Self {
        Self {
            provider,
            key_dir: key_dir.into(),
            jvmrc_path: PathBuf::from(JVMRC_FILE),
            hosts_file: PathBuf::from(hosts::DEFAULT_HOSTS_FILE),
        }
    }

    /// Override the `.jvmrc` location
    pub fn with_jvmrc_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.jvmrc_path = path.into();
        self
    }

    /// Override the hosts file location
    pub fn with_hosts_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.hosts_file = path.into();
        self
    }

    /// Hosts file managed entries are removed from
    pub fn hosts_file(&self) -> &Path {
        &self.hosts_file
    }

    /// Run every step against `state`. Never fails; see the report.
    pub async fn run(&self, state: &RuntimeState) -> CleanupReport {
        info!(namespace = %state.namespace, "Cleaning up workspace");
        let mut report = CleanupReport::default();

        // Local steps
        let pid_outcome = match &state.pid_file_path {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "Removing pid file");
                remove_local_file(path)
            }
            _ => StepOutcome::Skipped,
        };
        report.record(CleanupStep::PidFile, pid_outcome);

        let jvmrc_outcome = if self.jvmrc_path.exists() {
            info!(path = %self.jvmrc_path.display(), "Removing .jvmrc");
            remove_local_file(&self.jvmrc_path)
        } else {
            StepOutcome::Skipped
        };
        report.record(CleanupStep::Jvmrc, jvmrc_outcome);

        let hosts_outcome = if state.hosts.is_empty() {
            StepOutcome::Skipped
        } else {
            outcome_of(hosts::drop_hosts(&self.hosts_file, state.hosts.keys()))
        };
        report.record(CleanupStep::Hosts, hosts_outcome);

        // Cluster steps
        if !state.has_cluster_resources() {
            report.record(CleanupStep::Client, StepOutcome::Skipped);
            info!("No cluster resources recorded, workspace is clean");
            return report;
        }

        let client = match self.provider.create().await {
            Ok(client) => {
                report.record(CleanupStep::Client, StepOutcome::Done);
                client
            }
            Err(e) => {
                error!(error = %e, "Failed to create cluster client, skipping cluster cleanup");
                report.record(CleanupStep::Client, StepOutcome::Failed(e.to_string()));
                return report;
            }
        };

        self.cluster_steps(client.as_ref(), state, &mut report).await;

        if report.is_clean() {
            info!("Workspace cleaned up");
        } else {
            warn!(failed = ?report.failures(), "Workspace cleanup finished with failures");
        }
        report
    }

    async fn cluster_steps(
        &self,
        client: &dyn ClusterClient,
        state: &RuntimeState,
        report: &mut CleanupReport,
    ) {
        let ns = state.namespace.as_str();

        let outcome = match &state.origin_workload_name {
            Some(origin) => {
                info!(deployment = %origin, replicas = state.origin_replica_count, "Restoring origin deployment");
                outcome_of(
                    scale_to(client, origin, ns, state.origin_replica_count)
                        .await
                        .map(|_| ()),
                )
            }
            None => StepOutcome::Skipped,
        };
        report.record(CleanupStep::RestoreOrigin, outcome);

        let outcome = match &state.shadow_workload_name {
            Some(shadow) => {
                info!(deployment = %shadow, "Removing shadow deployment");
                outcome_of(ignore_not_found(client.remove_deployment(shadow, ns).await))
            }
            None => StepOutcome::Skipped,
        };
        report.record(CleanupStep::RemoveShadow, outcome);

        let outcome = match &state.ssh_config_map_name {
            Some(cm) => {
                info!(config_map = %cm, "Removing SSH ConfigMap");
                outcome_of(ignore_not_found(client.remove_config_map(cm, ns).await))
            }
            None => StepOutcome::Skipped,
        };
        report.record(CleanupStep::RemoveConfigMap, outcome);

        let outcome = match state.key_identity() {
            Some(key) => {
                let path = private_key_path(&self.key_dir, &key.component, &key.version);
                info!(path = %path.display(), "Removing private key");
                remove_local_file(&path)
            }
            None if state.ssh_config_map_name.is_some() => StepOutcome::Failed(
                "cannot derive private key identity from ConfigMap name".to_string(),
            ),
            None => StepOutcome::Skipped,
        };
        report.record(CleanupStep::RemovePrivateKey, outcome);

        let outcome = match &state.service_name {
            Some(service) => {
                info!(service = %service, "Removing service");
                outcome_of(ignore_not_found(client.remove_service(service, ns).await))
            }
            None => StepOutcome::Skipped,
        };
        report.record(CleanupStep::RemoveService, outcome);
    }
}
