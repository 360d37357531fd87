//! Jupyter kernel execution
//!
//! # Architecture
//!
//! ```text
//!  run(code) ─► ExecuteRequest ─► transport.send ──────────────► kernel
//!                                                                  │
//!  outcome ◄── OutputAggregator ◄── InboundMessage ◄── receive ◄──┘
//!                      │
//!        ConnectionClosed? ─► launcher.restart ─► resubmit (budget - 1)
//! ```
//!
//! - [`message`]: wire types
//! - [`aggregate`]: sans-IO output aggregation
//! - [`transport`]: the send/receive seam and kernel launchers
//! - [`session`]: blocking and async execution sessions with retry
//! - [`gateway`]: Kernel Gateway REST API

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::ws::WsError;

pub mod aggregate;
pub mod gateway;
pub mod message;
pub mod session;
pub mod transport;

pub use aggregate::OutputAggregator;
pub use message::{DecodeError, ExecuteRequest, InboundMessage, KernelMessage};
pub use session::{AsyncSession, BlockingSession, SessionConfig};
pub use transport::{AsyncKernelLauncher, AsyncKernelTransport, KernelLauncher, KernelTransport};

/// Terminal result of one `run`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// Aggregated stdout and expression results, or a text display
    Text(String),
    /// Base64-encoded PNG from a display
    Image(String),
    /// `"ename: evalue"` or a description of unusable output
    Error(String),
}

impl ExecutionOutcome {
    /// Label used in metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionOutcome::Text(_) => "text",
            ExecutionOutcome::Image(_) => "image",
            ExecutionOutcome::Error(_) => "error",
        }
    }

    pub fn content(&self) -> &str {
        match self {
            ExecutionOutcome::Text(s) | ExecutionOutcome::Image(s) | ExecutionOutcome::Error(s) => s,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ExecutionOutcome::Error(_))
    }

    /// Decoded PNG bytes for image outcomes
    pub fn image_bytes(&self) -> Option<Vec<u8>> {
        match self {
            ExecutionOutcome::Image(encoded) => {
                let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
                STANDARD.decode(compact).ok()
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionOutcome::Image(_) => write!(f, "<image/png>"),
            other => f.write_str(other.content()),
        }
    }
}

/// Error type for execution operations
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// The WebSocket layer failed; `ConnectionClosed` is retried by sessions
    #[error("transport error: {0}")]
    Transport(WsError),

    /// No terminal message arrived within the request timeout
    #[error("timed out waiting for the kernel after {0:?}")]
    Timeout(Duration),

    /// Every attempt lost its connection
    #[error("could not connect to kernel after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("invalid kernel message: {0}")]
    Decode(#[from] DecodeError),

    /// Bringing a kernel up (container, gateway, websocket) failed
    #[error("kernel launch failed: {0}")]
    Launch(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecutionError {
    /// Wrap any error raised while launching or reconnecting a kernel
    pub fn launch<E>(e: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ExecutionError::Launch(Box::new(e))
    }

    pub(crate) fn is_connection_closed(&self) -> bool {
        matches!(self, ExecutionError::Transport(e) if e.is_connection_closed())
    }
}

impl From<WsError> for ExecutionError {
    fn from(e: WsError) -> Self {
        match e {
            WsError::Timeout(elapsed) => ExecutionError::Timeout(elapsed.budget),
            other => ExecutionError::Transport(other),
        }
    }
}

impl From<serde_json::Error> for ExecutionError {
    fn from(e: serde_json::Error) -> Self {
        ExecutionError::InvalidRequest(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deadline::Elapsed;

    #[test]
    fn test_outcome_serializes_tagged() {
        let json = serde_json::to_value(ExecutionOutcome::Error("ValueError: bad".into())).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["content"], "ValueError: bad");
    }

    #[test]
    fn test_image_bytes_ignores_line_breaks() {
        let outcome = ExecutionOutcome::Image("aGVs\nbG8=\n".into());
        assert_eq!(outcome.image_bytes().unwrap(), b"hello");
        assert_eq!(ExecutionOutcome::Text("x".into()).image_bytes(), None);
    }

    #[test]
    fn test_ws_timeout_maps_to_execution_timeout() {
        let err: ExecutionError = WsError::Timeout(Elapsed {
            budget: Duration::from_secs(3),
        })
        .into();
        assert!(matches!(err, ExecutionError::Timeout(d) if d == Duration::from_secs(3)));

        let closed: ExecutionError = WsError::ConnectionClosed { code: None, reason: None }.into();
        assert!(closed.is_connection_closed());
    }
}
