//! ktctl - bridge a local process into a Kubernetes cluster
//!
//! Each session stands up a short-lived "shadow" deployment, tunnels traffic
//! between it and the developer machine, and tears everything down again
//! when the session ends or a termination signal arrives.
//!
//! # Modules
//!
//! - [`commands`] - `mesh`, `exchange`, `run` and `connect` sessions
//! - [`cleanup`] - Ordered best-effort workspace teardown
//! - [`config`] - `~/.ktctl` layout and settings resolution
//! - [`provider`] - Cluster client construction
//! - [`tunnel`] - SSH tunnels to the shadow pod
//! - [`signal`] - Termination signal listener
//! - [`hosts`] - Hosts file entries for cluster services
//! - [`daemon`] - PID file for the `connect` daemon

pub mod cleanup;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod error;
pub mod hosts;
pub mod provider;
pub mod signal;
pub mod tunnel;

pub use error::{Error, Result};

use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use ktctl_common::labels::parse_labels;
use ktctl_common::ssh::Ed25519KeyGenerator;

use crate::cleanup::WorkspaceCleanup;
use crate::commands::SessionContext;
use crate::config::{Overrides, ProcessEnv, Settings};
use crate::provider::KubeClusterClientProvider;
use crate::tunnel::SshTunnel;

/// ktctl - Kubernetes development toolkit
#[derive(Parser, Debug)]
#[command(name = "ktctl")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by every session
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Target namespace
    #[arg(short, long, global = true)]
    pub namespace: Option<String>,

    /// Path to kubeconfig
    #[arg(short = 'c', long, global = true)]
    pub kubeconfig: Option<String>,

    /// Shadow container image
    #[arg(short, long, global = true)]
    pub image: Option<String>,

    /// Extra labels for the shadow, e.g. k1=v1,k2=v2
    #[arg(short, long, global = true, default_value = "")]
    pub labels: String,

    /// Debug logging and a verbose shadow container
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Seconds to wait for the shadow pod; 0 waits indefinitely
    #[arg(long, global = true, default_value_t = 300)]
    pub wait_timeout: u64,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Mesh a deployment's traffic to local
    Mesh(commands::mesh::MeshArgs),
    /// Replace a deployment with local
    Exchange(commands::exchange::ExchangeArgs),
    /// Expose a local port inside the cluster
    Run(commands::run::RunArgs),
    /// Route cluster addresses to local
    Connect(commands::connect::ConnectArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        let app_home = config::app_home()?;
        let labels = parse_labels(&self.global.labels)?;
        let overrides = Overrides {
            namespace: self.global.namespace.clone(),
            image: self.global.image.clone(),
            kubeconfig: self.global.kubeconfig.clone(),
        };
        let settings = Settings::resolve(
            app_home.clone(),
            &overrides,
            &ProcessEnv,
            labels,
            self.global.debug,
            self.global.wait_timeout,
        )?;
        debug!(settings = ?settings, "Resolved settings");

        let cancel = CancellationToken::new();
        let listener = signal::spawn_shutdown_listener(cancel.clone());

        let provider = Arc::new(KubeClusterClientProvider::new(settings.kubeconfig.clone()));
        let tunnel = Arc::new(SshTunnel::new(
            settings.namespace.clone(),
            settings.kubeconfig.clone(),
        ));
        let ctx = SessionContext {
            cleanup: WorkspaceCleanup::new(provider.clone(), app_home),
            settings,
            provider,
            tunnel,
            keys: Arc::new(Ed25519KeyGenerator),
            cancel: cancel.clone(),
        };

        let result = match self.command {
            Commands::Mesh(args) => commands::mesh::run(&ctx, args).await,
            Commands::Exchange(args) => commands::exchange::run(&ctx, args).await,
            Commands::Run(args) => commands::run::run(&ctx, args).await,
            Commands::Connect(args) => commands::connect::run(&ctx, args).await,
        };

        cancel.cancel();
        listener.abort();
        result.map(|_| ())
    }
}
