//! Container orchestration
//!
//! This module provides the container side of a sandbox:
//! - [`ContainerRuntime`]: start/stop/list seam
//! - [`DockerCli`]: implementation over the docker CLI
//! - host port probing for the gateway

pub mod docker;
pub mod handle;
pub mod port;

pub use docker::DockerCli;
pub use handle::{ContainerHandle, ContainerSpec, PortMapping, SESSION_LABEL};
pub use port::{find_free_port, is_port_free};

/// Error type for container operations
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("failed to run container runtime: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("{command} failed with status {status:?}: {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("unexpected runtime output: {0}")]
    Parse(String),

    #[error("no free port at or above {start}")]
    NoFreePort { start: u16 },
}

/// Container lifecycle operations a sandbox depends on.
///
/// Calls block; async callers run them on the blocking pool.
pub trait ContainerRuntime: Send + Sync {
    /// Start a detached container
    fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle, ContainerError>;

    /// Stop and remove a container
    fn stop(&self, handle: &ContainerHandle) -> Result<(), ContainerError>;

    /// Running containers carrying label `label=value`
    fn list(&self, label: &str, value: &str) -> Result<Vec<ContainerHandle>, ContainerError>;
}
