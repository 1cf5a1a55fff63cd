//! `ktctl connect` - reach cluster addresses from the local machine
//!
//! Runs a daemon shadow and routes the cluster's pod and service ranges
//! through it. The session's PID file lets other sessions see that `connect`
//! is up.

use clap::Args;
use tracing::info;

use ktctl_cluster::network::{cluster_cidrs, service_hosts};
use ktctl_cluster::shadow::{ShadowConnection, ShadowRequest};
use ktctl_cluster::ClusterClient;
use ktctl_common::labels::{random_version, session_labels, Component};
use ktctl_common::RuntimeState;

use super::{connect_client, SessionContext};
use crate::cleanup::CleanupReport;
use crate::{daemon, hosts, Result};

/// Prefix of the connect daemon's shadow name
pub const CONNECT_DAEMON_PREFIX: &str = "kt-connect-daemon";

/// Arguments for `ktctl connect`
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectArgs {
    /// Pod CIDR for nodes that don't advertise one
    #[arg(long, default_value = "")]
    pub cidr: String,

    /// Write cluster service addresses into the hosts file
    #[arg(long = "dump2hosts")]
    pub dump2hosts: bool,
}

/// Name of the connect daemon shadow for a session version
pub fn daemon_name(version: &str) -> String {
    format!("{}-{}", CONNECT_DAEMON_PREFIX, version)
}

/// Run a connect session until interrupted
pub async fn run(ctx: &SessionContext, args: ConnectArgs) -> Result<CleanupReport> {
    let client = connect_client(ctx).await?;
    let mut state = RuntimeState::new(&ctx.settings.namespace);

    let outcome = async {
        let (conn, cidrs) = provision(ctx, client.as_ref(), &args, &mut state).await?;
        let tunnel = ctx
            .tunnel
            .outbound(&conn.pod_name, &conn.pod_ip, &conn.credential, &cidrs)
            .await?;
        ctx.hold(tunnel).await
    }
    .await;

    ctx.finish(&state, outcome).await
}

async fn provision(
    ctx: &SessionContext,
    client: &dyn ClusterClient,
    args: &ConnectArgs,
    state: &mut RuntimeState,
) -> Result<(ShadowConnection, Vec<String>)> {
    let settings = &ctx.settings;
    let ns = settings.namespace.as_str();

    let pid_file = settings.pid_file();
    daemon::write_pid_file(&pid_file)?;
    state.pid_file_path = Some(pid_file);

    let version = random_version();
    let name = daemon_name(&version);
    let labels = session_labels(
        &name,
        &version,
        Component::Connect,
        &Default::default(),
        &settings.labels,
    );
    let request = ShadowRequest {
        name,
        namespace: ns.to_string(),
        image: settings.image.clone(),
        labels,
        debug: settings.debug,
    };
    let conn = ctx.provisioner(client).create_shadow(&request, state).await?;

    let cidrs = cluster_cidrs(client, &args.cidr).await?;

    if args.dump2hosts {
        let entries = service_hosts(client, ns).await;
        state.hosts = entries.clone();
        hosts::dump_hosts(ctx.cleanup.hosts_file(), &entries)?;
        info!(count = entries.len(), "Service hosts written");
    }

    Ok((conn, cidrs))
}
