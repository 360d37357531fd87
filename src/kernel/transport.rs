//! Transport and launcher seams
//!
//! A session only needs to send a text message and receive the next one.
//! Blocking and async flavours are separate traits, so a session built for
//! one mode cannot be handed a transport of the other.

use std::future::Future;

use crate::deadline::Deadline;
use crate::ws::{AsyncConnection, BlockingConnection, BlockingStream, WsError};

use super::ExecutionError;

/// Blocking message transport to a kernel
pub trait KernelTransport: Send {
    fn send(&mut self, text: &str) -> Result<(), WsError>;

    /// Next text message, waiting no longer than `deadline`
    fn receive(&mut self, deadline: &Deadline) -> Result<String, WsError>;

    fn close(&mut self) -> Result<(), WsError>;
}

/// Async message transport to a kernel
pub trait AsyncKernelTransport: Send {
    fn send(&mut self, text: &str) -> impl Future<Output = Result<(), WsError>> + Send;

    fn receive(&mut self, deadline: &Deadline) -> impl Future<Output = Result<String, WsError>> + Send;

    fn close(&mut self) -> impl Future<Output = Result<(), WsError>> + Send;
}

impl<S: BlockingStream + Send> KernelTransport for BlockingConnection<S> {
    fn send(&mut self, text: &str) -> Result<(), WsError> {
        self.send_text(text)
    }

    fn receive(&mut self, deadline: &Deadline) -> Result<String, WsError> {
        self.recv(deadline)?.into_text()
    }

    fn close(&mut self) -> Result<(), WsError> {
        BlockingConnection::close(self)
    }
}

impl<S> AsyncKernelTransport for AsyncConnection<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, text: &str) -> Result<(), WsError> {
        self.send_text(text).await
    }

    async fn receive(&mut self, deadline: &Deadline) -> Result<String, WsError> {
        self.recv(deadline).await?.into_text()
    }

    async fn close(&mut self) -> Result<(), WsError> {
        AsyncConnection::close(self).await
    }
}

/// Brings kernels up and hands back connected transports (blocking mode)
pub trait KernelLauncher: Send {
    type Transport: KernelTransport;

    /// Connect to the current kernel, creating one if none exists yet
    fn connect(&mut self) -> Result<Self::Transport, ExecutionError>;

    /// Replace a kernel whose connection was lost, then connect to it
    fn restart(&mut self) -> Result<Self::Transport, ExecutionError>;
}

/// Async counterpart of [`KernelLauncher`]
pub trait AsyncKernelLauncher: Send {
    type Transport: AsyncKernelTransport;

    fn connect(&mut self) -> impl Future<Output = Result<Self::Transport, ExecutionError>> + Send;

    fn restart(&mut self) -> impl Future<Output = Result<Self::Transport, ExecutionError>> + Send;
}
