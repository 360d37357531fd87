//! KernelBox - Jupyter kernels in containers, driven over WebSocket
//!
//! This library runs code in a Jupyter kernel hosted by Kernel Gateway
//! inside a container and collects the output, in blocking or async mode.
//!
//! # Modules
//!
//! - `ws` - WebSocket framing, handshake and permessage-deflate (RFC 7692)
//! - `kernel` - Jupyter execute protocol, output aggregation, sessions with retry
//! - `container` - container runtime seam and docker CLI implementation
//! - `sandbox` - `KernelBox` / `AsyncKernelBox` facades
//! - `staging` - local file upload/download area
//! - `deadline` - per-request deadlines
//! - `config` - configuration from defaults and environment
//! - `metrics` - Prometheus metrics for observability
//! - `telemetry` - tracing subscriber and OTLP export
//!
//! # Quick Start
//!
//! ```ignore
//! use kernelbox::{BoxConfig, KernelBox};
//!
//! let mut sandbox = KernelBox::docker(BoxConfig::from_env()?);
//! sandbox.start()?;
//! let outcome = sandbox.run("print('hello')")?;
//! sandbox.stop()?;
//! ```

pub mod config;
pub mod container;
pub mod deadline;
pub mod kernel;
pub mod metrics;
pub mod sandbox;
pub mod staging;
pub mod telemetry;
pub mod ws;

// Re-export commonly used types at crate root for convenience
pub use config::BoxConfig;
pub use deadline::Deadline;
pub use kernel::{ExecutionError, ExecutionOutcome};
pub use sandbox::{AsyncKernelBox, BoxError, BoxStatus, KernelBox, SessionIdentity};
