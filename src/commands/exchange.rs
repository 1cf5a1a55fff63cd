//! `ktctl exchange` - replace a deployment with the local process
//!
//! The shadow takes over the origin's selector labels and the origin is scaled
//! to zero; cleanup scales it back to the replica count it had.

use clap::Args;
use kube::ResourceExt;
use tracing::info;

use ktctl_cluster::scale::{declared_replicas, scale};
use ktctl_cluster::shadow::{ShadowConnection, ShadowRequest};
use ktctl_cluster::ClusterClient;
use ktctl_common::labels::{random_version, session_labels, shadow_name, Component};
use ktctl_common::RuntimeState;

use super::{connect_client, SessionContext};
use crate::cleanup::CleanupReport;
use crate::daemon;
use crate::tunnel::Expose;
use crate::{Error, Result};

/// Arguments for `ktctl exchange`
#[derive(Args, Debug, Clone)]
pub struct ExchangeArgs {
    /// Deployment to replace
    pub target: Option<String>,

    /// Port to expose: <port> or <remote>:<local>
    #[arg(long)]
    pub expose: Option<String>,
}

impl ExchangeArgs {
    /// Check required input before touching the cluster
    pub fn validate(&self) -> Result<(String, Expose)> {
        let target = self
            .target
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::validation("exchange target is required"))?;
        let expose = self
            .expose
            .as_deref()
            .filter(|e| !e.is_empty())
            .ok_or_else(|| Error::validation("--expose is required"))?
            .parse()?;
        Ok((target.to_string(), expose))
    }
}

/// Run an exchange session until it is interrupted
pub async fn run(ctx: &SessionContext, args: ExchangeArgs) -> Result<CleanupReport> {
    let (target, expose) = args.validate()?;
    daemon::log_connect_status(&ctx.settings.pid_file());

    let client = connect_client(ctx).await?;
    let mut state = RuntimeState::new(&ctx.settings.namespace);

    let outcome = async {
        let conn = provision(ctx, client.as_ref(), &target, &mut state).await?;
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
    target: &str,
    state: &mut RuntimeState,
) -> Result<ShadowConnection> {
    let settings = &ctx.settings;
    let ns = settings.namespace.as_str();

    let app = client.get_deployment(target, ns).await?;
    let replicas = declared_replicas(&app);
    let selector = app
        .spec
        .as_ref()
        .and_then(|s| s.selector.match_labels.clone())
        .unwrap_or_default();

    let version = random_version();
    let workload = shadow_name(&app.name_any(), &version);
    let labels = session_labels(
        &workload,
        &version,
        Component::Exchange,
        &selector,
        &settings.labels,
    );

    let request = ShadowRequest {
        name: workload,
        namespace: ns.to_string(),
        image: settings.image.clone(),
        labels,
        debug: settings.debug,
    };
    let conn = ctx.provisioner(client).create_shadow(&request, state).await?;

    state.record_origin(&app.name_any(), replicas);
    info!(deployment = %target, replicas, "Scaling origin deployment to 0");
    scale(client, app, 0).await?;

    Ok(conn)
}
