//! WebSocket transport to the kernel gateway
//!
//! ```text
//!  session ──► connection ──► frame codec ──► extensions ──► wire
//!              (messages)     (RFC 6455)      (RFC 7692)
//! ```
//!
//! - [`frame`]: single-frame read/write, masking, size limits
//! - [`extension`] / [`deflate`]: negotiated frame transforms
//! - [`handshake`]: HTTP upgrade
//! - [`connection`]: blocking and async message-level connections

pub mod connection;
pub mod deflate;
pub mod error;
pub mod extension;
pub mod frame;
pub mod handshake;

pub use connection::{
    AsyncClient, AsyncConnection, BlockingClient, BlockingConnection, BlockingStream,
    ConnectionConfig, Message, Role,
};
pub use deflate::{ClientDeflateFactory, CompressionConfig, PerMessageDeflate, ServerDeflateFactory};
pub use error::{Result, WsError};
pub use extension::{Extension, ExtensionParameter};
pub use frame::{Frame, OpCode};
pub use handshake::Rewind;
