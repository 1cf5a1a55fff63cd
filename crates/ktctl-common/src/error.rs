//! Error types for ktctl
//!
//! Errors carry the operation and the resource they were raised for, so a
//! failed cluster call can be traced back to the object that caused it.
//! Raw `kube::Error`s are classified at the adapter boundary into the
//! not-found / already-exists / conflict kinds callers actually branch on.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for ktctl operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Missing or malformed user input, reported before any cluster call
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
    },

    /// The requested object does not exist
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        /// Resource kind (Deployment, ConfigMap, ...)
        kind: String,
        /// Resource name
        name: String,
        /// Namespace, empty for cluster-scoped resources
        namespace: String,
    },

    /// Creation failed because an object with the same name exists
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
        /// Namespace
        namespace: String,
    },

    /// Optimistic-concurrency conflict on update
    #[error("conflict updating {kind} {namespace}/{name}: {message}")]
    Conflict {
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
        /// Namespace
        namespace: String,
        /// Server-provided message
        message: String,
    },

    /// Transport, auth or server-side API failure
    #[error("kubernetes error during {operation} of {kind} {namespace}/{name}: {source}")]
    Api {
        /// Operation that failed (create, delete, list, ...)
        operation: String,
        /// Resource kind
        kind: String,
        /// Resource name, empty for list calls
        name: String,
        /// Namespace
        namespace: String,
        /// The underlying kube-rs error
        #[source]
        source: kube::Error,
    },

    /// A bounded wait ran out of time; callers may retry
    #[error("deadline exceeded after {timeout:?} waiting for {resource} ({operation})")]
    DeadlineExceeded {
        /// Operation that timed out
        operation: String,
        /// What was being waited for
        resource: String,
        /// The deadline that elapsed
        timeout: Duration,
    },

    /// The operation was cancelled by a shutdown request
    #[error("{operation} cancelled")]
    Cancelled {
        /// Operation that was interrupted
        operation: String,
    },

    /// Cluster network layout cannot be expressed as routable ranges
    #[error("unsupported network: {message}")]
    UnsupportedNetwork {
        /// Why the layout is unsupported
        message: String,
    },

    /// SSH key pair generation or persistence failed
    #[error("key generation failed for {}: {message}", path.display())]
    KeyGeneration {
        /// Target private key path
        path: PathBuf,
        /// Description of what failed
        message: String,
    },

    /// Local filesystem error
    #[error("io error [{context}]: {source}")]
    Io {
        /// What was being done
        context: String,
        /// The underlying io error
        #[source]
        source: std::io::Error,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a not-found error for a namespaced resource
    pub fn not_found(
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Create an already-exists error for a namespaced resource
    pub fn already_exists(
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Create a deadline-exceeded error
    pub fn deadline_exceeded(
        operation: impl Into<String>,
        resource: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self::DeadlineExceeded {
            operation: operation.into(),
            resource: resource.into(),
            timeout,
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create an unsupported-network error
    pub fn unsupported_network(msg: impl Into<String>) -> Self {
        Self::UnsupportedNetwork {
            message: msg.into(),
        }
    }

    /// Create a key generation error for the given private key path
    pub fn key_generation(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::KeyGeneration {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Wrap an io error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Classify a kube-rs error raised while operating on a namespaced object.
    ///
    /// 404 maps to `NotFound`, 409 with reason `AlreadyExists` to
    /// `AlreadyExists`, any other 409 to `Conflict`. Everything else keeps the
    /// source error as `Api`.
    pub fn from_kube(
        operation: &str,
        kind: &str,
        name: &str,
        namespace: &str,
        err: kube::Error,
    ) -> Self {
        match err {
            kube::Error::Api(ref resp) if resp.code == 404 => Self::not_found(kind, name, namespace),
            kube::Error::Api(ref resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                Self::already_exists(kind, name, namespace)
            }
            kube::Error::Api(ref resp) if resp.code == 409 => Self::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
                message: resp.message.clone(),
            },
            other => Self::Api {
                operation: operation.to_string(),
                kind: kind.to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
                source: other,
            },
        }
    }

    /// Whether this error means the target object is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether the caller may reasonably retry the failed operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. } | Self::Conflict { .. })
    }
}

/// Treat a not-found failure as success.
///
/// Used by every teardown path: a resource that is already gone is the
/// desired end state.
pub fn ignore_not_found(result: Result<(), Error>) -> Result<(), Error> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}
