//! `ktctl mesh` - split a deployment's traffic to the local machine
//!
//! The shadow copies the origin deployment's selector labels, so the origin's
//! Service balances across both. The origin keeps running.

use std::collections::BTreeMap;

use clap::Args;
use kube::ResourceExt;
use tracing::info;

use ktctl_cluster::shadow::ShadowRequest;
use ktctl_cluster::ClusterClient;
use ktctl_common::labels::{random_version, session_labels, shadow_name, Component};
use ktctl_common::RuntimeState;

use super::{connect_client, SessionContext};
use crate::cleanup::CleanupReport;
use crate::daemon;
use crate::tunnel::Expose;
use crate::{Error, Result};

/// Only mesh provider with sidecar injection support
pub const ISTIO_PROVIDER: &str = "istio";

/// Pod label requesting istio sidecar injection
pub const ISTIO_INJECT_LABEL: &str = "sidecar.istio.io/inject";

const ISTIO_INJECTION_NS_LABEL: &str = "istio-injection";

/// Arguments for `ktctl mesh`
#[derive(Args, Debug, Clone)]
pub struct MeshArgs {
    /// Deployment to mesh
    pub target: Option<String>,

    /// Port to expose: <port> or <remote>:<local>
    #[arg(long)]
    pub expose: Option<String>,

    /// Inject the shadow into the service mesh
    #[arg(long = "autoInject")]
    pub auto_inject: bool,

    /// Service mesh provider
    #[arg(long, default_value = ISTIO_PROVIDER)]
    pub provider: String,
}

impl MeshArgs {
    /// Check required input before touching the cluster
    pub fn validate(&self) -> Result<(String, Expose)> {
        let target = self
            .target
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::validation("mesh target is required"))?;
        let expose = self
            .expose
            .as_deref()
            .filter(|e| !e.is_empty())
            .ok_or_else(|| Error::validation("--expose is required"))?
            .parse()?;
        Ok((target.to_string(), expose))
    }

    fn extra_labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        if self.auto_inject && self.provider == ISTIO_PROVIDER {
            labels.insert(ISTIO_INJECT_LABEL.to_string(), "true".to_string());
        }
        labels
    }
}

/// Run a mesh session until it is interrupted
pub async fn run(ctx: &SessionContext, args: MeshArgs) -> Result<CleanupReport> {
    let (target, expose) = args.validate()?;
    daemon::log_connect_status(&ctx.settings.pid_file());

    let client = connect_client(ctx).await?;
    let mut state = RuntimeState::new(&ctx.settings.namespace);

    let outcome = async {
        let conn = provision(ctx, client.as_ref(), &args, &target, &mut state).await?;
        let tunnel = ctx
            .tunnel
            .inbound(expose, &conn.pod_name, &conn.pod_ip, &conn.credential)
            .await?;
        ctx.hold(tunnel).await
    }
    .await;

    ctx.finish(&state, outcome).await
}

async fn provision(
    ctx: &SessionContext,
    client: &dyn ClusterClient,
    args: &MeshArgs,
    target: &str,
    state: &mut RuntimeState,
) -> Result<ktctl_cluster::shadow::ShadowConnection> {
    let settings = &ctx.settings;
    let ns = settings.namespace.as_str();

    let namespace = client.get_namespace(ns).await?;
    let injection = namespace
        .labels()
        .get(ISTIO_INJECTION_NS_LABEL)
        .is_some_and(|v| v == "enabled");
    info!(namespace = %ns, istio_injection = injection, "Resolved namespace");

    let app = client.get_deployment(target, ns).await?;
    let selector = app
        .spec
        .as_ref()
        .and_then(|s| s.selector.match_labels.clone())
        .unwrap_or_default();

    let version = random_version();
    let workload = shadow_name(&app.name_any(), &version);

    let mut overrides = args.extra_labels();
    overrides.extend(settings.labels.clone());
    let labels = session_labels(&workload, &version, Component::Mesh, &selector, &overrides);

    let request = ShadowRequest {
        name: workload,
        namespace: ns.to_string(),
        image: settings.image.clone(),
        labels,
        debug: settings.debug,
    };
    let conn = ctx.provisioner(client).create_shadow(&request, state).await?;
    Ok(conn)
}
