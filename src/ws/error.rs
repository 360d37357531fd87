//! Error taxonomy for the WebSocket layer

use crate::deadline::Elapsed;

/// Errors raised while framing, negotiating or exchanging WebSocket messages
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    /// Malformed frame: bad opcode, masking mismatch, invalid rsv bits, ...
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A declared or decompressed payload exceeded the configured limit
    #[error("payload too big: {0}")]
    PayloadTooBig(String),

    /// Extension negotiation could not reach an acceptable configuration
    #[error("negotiation error: {0}")]
    Negotiation(String),

    #[error("duplicate parameter: {0}")]
    DuplicateParameter(String),

    #[error("invalid parameter name: {0}")]
    InvalidParameterName(String),

    #[error("invalid value for parameter \"{name}\": {value:?}")]
    InvalidParameterValue { name: String, value: Option<String> },

    /// The peer closed the connection (close frame or EOF)
    #[error("connection closed{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    ConnectionClosed { code: Option<u16>, reason: Option<String> },

    #[error("timed out: {0}")]
    Timeout(#[from] Elapsed),

    /// The HTTP upgrade was refused or malformed
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    /// A read timed out earlier and the stream may sit mid-frame
    #[error("connection abandoned after a timeout")]
    Abandoned,

    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

impl WsError {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        WsError::Protocol(msg.into())
    }

    pub(crate) fn negotiation(msg: impl Into<String>) -> Self {
        WsError::Negotiation(msg.into())
    }

    pub(crate) fn closed() -> Self {
        WsError::ConnectionClosed {
            code: None,
            reason: None,
        }
    }

    /// Whether this error means the transport is gone and a reconnect may help
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, WsError::ConnectionClosed { .. })
    }
}

impl From<std::io::Error> for WsError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => WsError::ConnectionClosed {
                code: None,
                reason: Some(e.to_string()),
            },
            _ => WsError::Io(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, WsError>;
