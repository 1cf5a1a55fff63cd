//! Wait for a shadow pod to reach `Running`
//!
//! The wait opens a label-scoped pod watch (`kt=<name>`) and re-reads its
//! cache on a fixed interval until the selected pod reports phase `Running`.
//! The watch is torn down on every return path when the cache is dropped.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::ClusterClient;
use ktctl_common::labels::{to_selector, LABEL_KT};
use ktctl_common::Error;

/// Default interval between cache reads
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default upper bound on a readiness wait
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

const RUNNING_PHASE: &str = "Running";

/// Pacing and deadline for a readiness wait
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WaitOptions {
    /// Sleep between cache reads
    pub poll_interval: Duration,
    /// Overall deadline; `None` waits until cancelled
    pub timeout: Option<Duration>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: Some(DEFAULT_WAIT_TIMEOUT),
        }
    }
}

impl WaitOptions {
    /// Options from a timeout in seconds, where `0` disables the deadline
    pub fn from_timeout_secs(secs: u64) -> Self {
        Self {
            timeout: (secs > 0).then(|| Duration::from_secs(secs)),
            ..Default::default()
        }
    }
}

/// Pick the first pod whose labels carry every required key with the
/// expected value.
pub fn select_target_pod<'a>(
    pods: &'a [Pod],
    required: &BTreeMap<String, String>,
) -> Option<&'a Pod> {
    pods.iter().find(|pod| {
        let labels = pod.labels();
        required
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    })
}

fn pod_phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Unknown")
}

/// The pod's IP once one has been assigned
pub fn pod_ip(pod: &Pod) -> Option<&str> {
    pod.status
        .as_ref()
        .and_then(|s| s.pod_ip.as_deref())
        .filter(|ip| !ip.is_empty())
}

/// Block until the pod labelled `kt=<name>` in `namespace` is `Running`
/// and has an IP.
///
/// Fails with `DeadlineExceeded` once `opts.timeout` elapses and with
/// `Cancelled` as soon as `cancel` fires. Watch errors propagate unchanged.
pub async fn wait_for_running_pod(
    client: &dyn ClusterClient,
    namespace: &str,
    name: &str,
    opts: &WaitOptions,
    cancel: &CancellationToken,
) -> Result<Pod, Error> {
    let mut required = BTreeMap::new();
    required.insert(LABEL_KT.to_string(), name.to_string());
    let selector = to_selector(&required);

    let deadline = opts.timeout.map(|t| Instant::now() + t);

    let cache = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::cancelled("wait_for_running_pod")),
        cache = client.watch_pods(namespace, &selector) => cache?,
    };

    info!(pod_selector = %selector, namespace = %namespace, "Waiting for shadow pod");

    loop {
        let pods = cache.pods()?;
        match select_target_pod(&pods, &required) {
            Some(pod) if pod_phase(pod) == RUNNING_PHASE => match pod_ip(pod) {
                Some(ip) => {
                    info!(pod = %pod.name_any(), pod_ip = %ip, namespace = %namespace, "Shadow pod is running");
                    return Ok(pod.clone());
                }
                None => debug!(pod = %pod.name_any(), "Shadow pod running without an IP yet"),
            },
            Some(pod) => {
                debug!(pod = %pod.name_any(), phase = %pod_phase(pod), "Shadow pod not running yet");
            }
            None => debug!(pod_selector = %selector, known = pods.len(), "No matching pod yet"),
        }

        if let (Some(deadline), Some(timeout)) = (deadline, opts.timeout) {
            if Instant::now() >= deadline {
                return Err(Error::deadline_exceeded(
                    "wait_for_running_pod",
                    format!("pod {} in {}", selector, namespace),
                    timeout,
                ));
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled("wait_for_running_pod")),
            _ = tokio::time::sleep(opts.poll_interval) => {}
        }
    }
}
