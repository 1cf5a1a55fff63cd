//! Session commands
//!
//! Every session follows the same shape: validate input, provision a shadow
//! while recording each created object in a [`RuntimeState`], start a tunnel,
//! hold it until a termination signal arrives, then run workspace cleanup.
//! Cleanup also runs when provisioning fails part-way, before the error is
//! reported.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use ktctl_cluster::shadow::ShadowProvisioner;
use ktctl_cluster::ClusterClient;
use ktctl_common::ssh::KeyGenerator;
use ktctl_common::RuntimeState;

use crate::cleanup::{CleanupReport, WorkspaceCleanup};
use crate::config::Settings;
use crate::provider::ClusterClientProvider;
use crate::tunnel::{Tunnel, TunnelHandle};
use crate::{Error, Result};

pub mod connect;
pub mod exchange;
pub mod mesh;
pub mod run;

/// Everything a session needs besides its own arguments
pub struct SessionContext {
    /// Resolved settings
    pub settings: Settings,
    /// Source of cluster clients
    pub provider: Arc<dyn ClusterClientProvider>,
    /// Tunnel to the shadow
    pub tunnel: Arc<dyn Tunnel>,
    /// SSH key generator
    pub keys: Arc<dyn KeyGenerator>,
    /// Cancelled on termination signals
    pub cancel: CancellationToken,
    /// Workspace cleanup for this session
    pub cleanup: WorkspaceCleanup,
}

impl SessionContext {
    /// Shadow provisioner bound to this session's wait options and token
    pub fn provisioner<'a>(&'a self, client: &'a dyn ClusterClient) -> ShadowProvisioner<'a> {
        ShadowProvisioner::new(client, self.keys.as_ref(), &self.settings.app_home)
            .with_wait(self.settings.wait.clone())
            .with_cancellation(self.cancel.clone())
    }

    /// Run `fut` unless the session is cancelled first.
    pub async fn until_cancelled<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ktctl_common::Error::cancelled(operation).into()),
            result = fut => result,
        }
    }

    /// Keep `tunnel` alive until the session is cancelled or the tunnel dies.
    pub async fn hold(&self, mut tunnel: Box<dyn TunnelHandle>) -> Result<()> {
        info!("Tunnel established, press Ctrl+C to stop");
        tokio::select! {
            _ = self.cancel.cancelled() => Ok(()),
            closed = tunnel.closed() => match closed {
                Ok(()) => Err(Error::command_failed("tunnel closed unexpectedly")),
                Err(e) => Err(e),
            },
        }
    }

    /// Run cleanup for `state` and settle the session's outcome.
    ///
    /// A cancelled session is a clean exit.
    pub async fn finish(&self, state: &RuntimeState, outcome: Result<()>) -> Result<CleanupReport> {
        if let Err(e) = &outcome {
            if !e.is_cancelled() {
                error!(error = %e, "Session failed, cleaning up");
            }
        }
        let report = self.cleanup.run(state).await;
        match outcome {
            Ok(()) => Ok(report),
            Err(e) if e.is_cancelled() => Ok(report),
            Err(e) => Err(e),
        }
    }
}

/// Obtain a client, treating a pending shutdown as cancellation.
pub(crate) async fn connect_client(ctx: &SessionContext) -> Result<Arc<dyn ClusterClient>> {
    ctx.until_cancelled("create_client", async {
        ctx.provider.create().await.map_err(Error::from)
    })
    .await
}
