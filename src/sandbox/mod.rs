//! Kernel sandboxes
//!
//! A sandbox is one container running Jupyter Kernel Gateway plus a
//! session connected to a kernel inside it:
//!
//! ```text
//! KernelBox::start
//!   ├─ find free host port
//!   ├─ runtime.start(image, port, label session_id=<uuid>)
//!   ├─ GET /api until 200
//!   ├─ POST /api/kernels → kernel id
//!   └─ ws://localhost:<port>/api/kernels/<id>/channels
//! ```
//!
//! [`KernelBox`] is the blocking facade, [`AsyncKernelBox`] the async one.
//! Both can be rebuilt from a [`SessionIdentity`] while the container is
//! still running.

pub mod kernel_box;
pub mod launcher;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::container::{ContainerError, ContainerSpec, PortMapping, SESSION_LABEL};
use crate::kernel::gateway::{GatewayEndpoint, GatewayError};
use crate::kernel::ExecutionError;

pub use kernel_box::{AsyncKernelBox, KernelBox};
pub use launcher::{AsyncContainerLauncher, ContainerLauncher};

/// Error type for sandbox operations
#[derive(Debug, thiserror::Error)]
pub enum BoxError {
    #[error("container error: {0}")]
    Container(#[from] ContainerError),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no container found for session_id {0}")]
    SessionNotFound(Uuid),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Lifecycle status reported by sandbox operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoxStatus {
    Started,
    Running,
    Restarted,
    Stopped,
}

impl fmt::Display for BoxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BoxStatus::Started => "started",
            BoxStatus::Running => "running",
            BoxStatus::Restarted => "restarted",
            BoxStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Everything needed to reattach to a running sandbox from another
/// process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub session_id: Uuid,
    pub kernel_id: Option<String>,
    pub endpoint: GatewayEndpoint,
}

/// Command starting Kernel Gateway on `port`, reachable from outside
/// the container
pub fn gateway_command(port: u16) -> Vec<String> {
    vec![
        "jupyter".to_string(),
        "kernelgateway".to_string(),
        "--KernelGatewayApp.ip=0.0.0.0".to_string(),
        format!("--KernelGatewayApp.port={port}"),
        "--debug".to_string(),
    ]
}

/// Container spec for a gateway published on `port` on both sides
pub fn gateway_spec(image: &str, port: u16, session_id: Uuid) -> ContainerSpec {
    let mut labels = BTreeMap::new();
    labels.insert(SESSION_LABEL.to_string(), session_id.to_string());
    ContainerSpec {
        image: image.to_string(),
        command: gateway_command(port),
        ports: vec![PortMapping::same(port)],
        labels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_spec() {
        let id = Uuid::new_v4();
        let spec = gateway_spec("codebox", 8890, id);
        assert_eq!(spec.ports, vec![PortMapping::same(8890)]);
        assert_eq!(spec.labels.get(SESSION_LABEL), Some(&id.to_string()));
        assert!(spec.command.contains(&"--KernelGatewayApp.port=8890".to_string()));
        assert_eq!(spec.command[..2], ["jupyter", "kernelgateway"]);
    }

    #[test]
    fn test_identity_serde() {
        let identity = SessionIdentity {
            session_id: Uuid::new_v4(),
            kernel_id: Some("k-1".into()),
            endpoint: GatewayEndpoint::localhost(8888),
        };
        let json = serde_json::to_string(&identity).unwrap();
        let back: SessionIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, identity);
        assert_eq!(BoxStatus::Restarted.to_string(), "restarted");
    }
}
