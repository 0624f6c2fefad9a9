//! Error types.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors talking to the container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("container runtime did not answer within {0:?}")]
    Timeout(Duration),

    #[error("network {0} has no gateway address")]
    NoGateway(String),
}

/// The Configured Document could not be written.
#[derive(Debug, Error)]
#[error("failed to write {path}: {source}")]
pub struct WriteError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Reasons a reconciliation run was aborted.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("listing running containers failed: {0}")]
    Inventory(#[source] RuntimeError),

    #[error(transparent)]
    Write(#[from] WriteError),

    /// Shutdown has started; no further writes are allowed.
    #[error("reconciler is shut down")]
    Closed,
}

/// Failures of OS level resolution plumbing.
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}")]
    Status {
        command: String,
        status: std::process::ExitStatus,
    },

    #[error("{0} timed out")]
    Timeout(String),

    /// The file exists but another tool owns it.
    #[error("{path} is not managed by docker-domains, refusing to overwrite it")]
    NotManaged { path: PathBuf },
}
