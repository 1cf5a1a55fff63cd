//! `ktctl run` - publish a local port inside the cluster
//!
//! Creates a stand-alone shadow named after the app, optionally fronted by a
//! ClusterIP Service of the same name.

use std::collections::BTreeMap;

use clap::Args;

use ktctl_cluster::shadow::{create_service, ShadowConnection, ShadowRequest};
use ktctl_cluster::ClusterClient;
use ktctl_common::labels::{random_version, session_labels, Component, LABEL_KT};
use ktctl_common::RuntimeState;

use super::{connect_client, SessionContext};
use crate::cleanup::CleanupReport;
use crate::daemon;
use crate::tunnel::Expose;
use crate::{Error, Result};

/// Arguments for `ktctl run`
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Name of the shadow and, with --expose, its Service
    pub name: Option<String>,

    /// Local port the shadow forwards to
    #[arg(long)]
    pub port: Option<u16>,

    /// Create a Service in front of the shadow
    #[arg(long)]
    pub expose: bool,
}

impl RunArgs {
    /// Check required input before touching the cluster
    pub fn validate(&self) -> Result<(String, u16)> {
        let name = self
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::validation("name is required"))?;
        let port = self
            .port
            .filter(|p| *p != 0)
            .ok_or_else(|| Error::validation("--port is required"))?;
        Ok((name.to_string(), port))
    }
}

/// Run a shadow for a local app until interrupted
pub async fn run(ctx: &SessionContext, args: RunArgs) -> Result<CleanupReport> {
    let (name, port) = args.validate()?;
    daemon::log_connect_status(&ctx.settings.pid_file());

    let client = connect_client(ctx).await?;
    let mut state = RuntimeState::new(&ctx.settings.namespace);

    let outcome = async {
        let conn = provision(ctx, client.as_ref(), &name, port, args.expose, &mut state).await?;
        let expose = Expose {
            remote: port,
            local: port,
        };
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
    name: &str,
    port: u16,
    expose: bool,
    state: &mut RuntimeState,
) -> Result<ShadowConnection> {
    let settings = &ctx.settings;
    let ns = settings.namespace.as_str();

    let version = random_version();
    let labels = session_labels(
        name,
        &version,
        Component::Run,
        &BTreeMap::new(),
        &settings.labels,
    );
    let request = ShadowRequest {
        name: name.to_string(),
        namespace: ns.to_string(),
        image: settings.image.clone(),
        labels,
        debug: settings.debug,
    };
    let conn = ctx.provisioner(client).create_shadow(&request, state).await?;

    if expose {
        let mut selector = BTreeMap::new();
        selector.insert(LABEL_KT.to_string(), name.to_string());
        create_service(client, name, ns, port, &selector).await?;
        state.record_service(name);
    }

    Ok(conn)
}
