//! Termination signal handling
//!
//! A single background task waits for interrupt, hangup, terminate or quit
//! and cancels the session's token. The session notices the cancellation,
//! stops whatever it is waiting on and runs cleanup. SIGKILL can't be caught;
//! a killed session leaves its shadow behind.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Spawn the shutdown listener. Call once per process.
pub fn spawn_shutdown_listener(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            signal = wait_for_termination() => {
                info!(signal = %signal, "Terminal signal received, cleaning up workspace");
                cancel.cancel();
            }
            _ = cancel.cancelled() => {}
        }
    })
}

#[cfg(unix)]
async fn wait_for_termination() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let kinds = [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::hangup(), "SIGHUP"),
        (SignalKind::terminate(), "SIGTERM"),
        (SignalKind::quit(), "SIGQUIT"),
    ];

    let mut streams = Vec::with_capacity(kinds.len());
    for (kind, name) in kinds {
        match signal(kind) {
            Ok(stream) => streams.push((stream, name)),
            Err(e) => warn!(signal = name, error = %e, "Failed to register signal handler"),
        }
    }

    if streams.is_empty() {
        return ctrl_c_fallback().await;
    }

    let waits = streams.iter_mut().map(|(stream, name)| {
        let name = *name;
        Box::pin(async move {
            stream.recv().await;
            name
        })
    });
    let (name, _, _) = futures::future::select_all(waits).await;
    name
}

#[cfg(not(unix))]
async fn wait_for_termination() -> &'static str {
    ctrl_c_fallback().await
}

async fn ctrl_c_fallback() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}
