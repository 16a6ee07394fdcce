//! Error types for the injection engine

use thiserror::Error;

/// Main error type for podtap operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The resource reference does not map to any live pod
    #[error("cannot find a running pod for the resource")]
    NoRunningPod,

    /// A synchronous remote execution exceeded its ceiling
    #[error("remote command execution timed out")]
    ExecTimeout,

    /// The local listener never received a connection from the tunnel
    #[error("timed out waiting for the debugger connection")]
    ConnectTimeout,

    /// The cluster CLI or a copy step failed
    #[error("transport error: {0}")]
    Transport(String),

    /// Local file I/O failure (script generation, staging)
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration, caught before any remote call
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create a transport error with the given message
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
