//! PID file handling for the `connect` daemon

use std::path::Path;

use tracing::info;

use crate::{Error, Result};

/// Write the current process id to `path`, creating parent directories.
pub fn write_pid_file(path: &Path) -> Result<u32> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let pid = std::process::id();
    std::fs::write(path, pid.to_string()).map_err(|e| {
        Error::command_failed(format!("failed to write pid file {}: {}", path.display(), e))
    })?;
    info!(pid, path = %path.display(), "Wrote pid file");
    Ok(pid)
}

/// PID recorded in `path`, if the file exists and parses.
pub fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Whether the daemon recorded in `path` is still alive.
pub fn is_daemon_running(path: &Path) -> bool {
    read_pid(path)
        .map(|pid| Path::new("/proc").join(pid.to_string()).exists())
        .unwrap_or(false)
}

/// Log whether `connect` is running alongside this session.
pub fn log_connect_status(pid_file: &Path) {
    if is_daemon_running(pid_file) {
        info!("'connect' is running, you can access local app from cluster and localhost");
    } else {
        info!("'connect' not running, you can only access local app from cluster");
    }
}
