//! Podtap - attach a Python debugger to a process already running in a Kubernetes pod
//!
//! Podtap resolves a workload reference (deployment, replica set, or pod) down to
//! one concrete pod, stages helper scripts into the container over `kubectl cp`,
//! starts a bidirectional debug tunnel, and injects a debugger-attach script into
//! the target process without restarting it.
//!
//! # Architecture
//!
//! The bootstrap is a strictly ordered sequence driven by [`session`]:
//! - Install the debugger package set in the container
//! - Bind a local listener, then start the tunnel relay (half local, half remote)
//! - Stage a generated attach script into the pod
//! - Trigger code injection against the target PID and keep the exec channel open
//!
//! # Modules
//!
//! - [`credentials`] - Cluster connection settings and kubectl flag synthesis
//! - [`reference`] - Workload reference parsing (`deployment/web`, bare pod names)
//! - [`resolve`] - Deployment -> replica set -> pod resolution and discovery
//! - [`command`] - Pipeline composition mixing local sidecar and remote segments
//! - [`exec`] - Remote execution gateway (synchronous exec, backgrounded spawn)
//! - [`transfer`] - File push into the remote container
//! - [`procs`] - In-pod process enumeration
//! - [`session`] - Debugger injection bootstrapper and the live session handle
//! - [`error`] - Error types for the engine

#![deny(missing_docs)]

pub mod command;
pub mod credentials;
pub mod error;
pub mod exec;
pub mod procs;
pub mod reference;
pub mod resolve;
pub mod session;
pub mod transfer;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Namespace used when the credentials leave it unset
pub const DEFAULT_NAMESPACE: &str = "default";

/// Ceiling for synchronous remote executions, in seconds
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 300;

/// How long the local listener waits for the tunnel to call back, in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 60;
