//! Common types for ktctl: errors, label schema, runtime state and SSH keys

#![deny(missing_docs)]

pub mod error;
pub mod labels;
pub mod ssh;
pub mod state;

pub use error::Error;
pub use state::RuntimeState;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Name of the per-user application directory under the home directory
pub const APP_HOME_DIR: &str = ".ktctl";

/// File name of the daemon PID file inside the application directory
pub const PID_FILE_NAME: &str = "pid";

/// ConfigMap data key holding the shadow's `authorized_keys` content
pub const SSH_AUTH_KEY: &str = "authorized";

/// Value of the `control-by` label on every resource ktctl creates
pub const KUBERNETES_TOOL: &str = "kt";
