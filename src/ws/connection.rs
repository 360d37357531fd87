//! Message-level WebSocket connections
//!
//! Two connection types, one per execution mode:
//!
//! - [`BlockingConnection`] over any `std::io::Read + Write` stream
//! - [`AsyncConnection`] over any tokio `AsyncRead + AsyncWrite` stream
//!
//! Both speak whole messages. Outgoing messages larger than the configured
//! frame size are split into continuation frames; incoming fragments are
//! reassembled, pings are answered, and a close frame or EOF surfaces as
//! [`WsError::ConnectionClosed`].
//!
//! A read cut short by a deadline may leave a frame half-consumed, so a
//! connection that timed out is abandoned and answers every later call
//! with [`WsError::Abandoned`].

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use reqwest::Url;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::deadline::{Deadline, Elapsed};

use super::deflate::ClientDeflateFactory;
use super::error::{Result, WsError};
use super::extension::Extension;
use super::frame::{read_frame, read_frame_blocking, write_frame, write_frame_blocking, Frame, OpCode};
use super::handshake::{client_handshake, client_handshake_blocking, Rewind};

/// Which end of the connection we are. Clients mask what they send and
/// expect unmasked frames; servers the opposite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    fn masks_outgoing(self) -> bool {
        self == Role::Client
    }

    fn expects_masked(self) -> bool {
        self == Role::Server
    }
}

/// Connection limits
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Largest message accepted after decompression and reassembly
    pub max_message_size: Option<usize>,
    /// Outgoing messages are fragmented into frames of at most this size
    pub frame_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_message_size: Some(16 * 1024 * 1024),
            frame_size: 1024 * 1024,
        }
    }
}

/// Blocking client over TCP
pub type BlockingClient = BlockingConnection<Rewind<TcpStream>>;

/// Async client on a hyper-upgraded TCP stream
pub type AsyncClient = AsyncConnection<TokioIo<Upgraded>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Closed,
    Abandoned,
}

impl State {
    fn check(self) -> Result<()> {
        match self {
            State::Open => Ok(()),
            State::Closed => Err(WsError::closed()),
            State::Abandoned => Err(WsError::Abandoned),
        }
    }
}

/// A complete data message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

impl Message {
    /// Text content, rejecting binary messages
    pub fn into_text(self) -> Result<String> {
        match self {
            Message::Text(text) => Ok(text),
            Message::Binary(_) => Err(WsError::protocol("expected a text message")),
        }
    }
}

/// What the connection must do after a frame has been fed in
enum Step {
    Deliver(Message),
    Pong(Vec<u8>),
    Closed { code: Option<u16>, reason: String },
    Pending,
}

/// Sans-IO reassembly of fragmented messages
struct MessageAssembler {
    opcode: Option<OpCode>,
    buffer: Vec<u8>,
    max_size: Option<usize>,
}

impl MessageAssembler {
    fn new(max_size: Option<usize>) -> Self {
        Self {
            opcode: None,
            buffer: Vec::new(),
            max_size,
        }
    }

    fn push(&mut self, frame: Frame) -> Result<Step> {
        match frame.opcode {
            OpCode::Ping => Ok(Step::Pong(frame.payload)),
            OpCode::Pong => Ok(Step::Pending),
            OpCode::Close => {
                let (code, reason) = frame.close_reason()?;
                Ok(Step::Closed { code, reason })
            }
            OpCode::Text | OpCode::Binary => {
                if self.opcode.is_some() {
                    return Err(WsError::protocol("expected a continuation frame"));
                }
                if frame.fin {
                    return Ok(Step::Deliver(to_message(frame.opcode, frame.payload)?));
                }
                self.opcode = Some(frame.opcode);
                self.buffer = frame.payload;
                Ok(Step::Pending)
            }
            OpCode::Continuation => {
                let opcode = self
                    .opcode
                    .ok_or_else(|| WsError::protocol("unexpected continuation frame"))?;
                self.buffer.extend_from_slice(&frame.payload);
                if let Some(max) = self.max_size {
                    if self.buffer.len() > max {
                        return Err(WsError::PayloadTooBig(format!(
                            "message over size limit ({} > {max} bytes)",
                            self.buffer.len()
                        )));
                    }
                }
                if !frame.fin {
                    return Ok(Step::Pending);
                }
                self.opcode = None;
                let payload = std::mem::take(&mut self.buffer);
                Ok(Step::Deliver(to_message(opcode, payload)?))
            }
        }
    }
}

fn to_message(opcode: OpCode, payload: Vec<u8>) -> Result<Message> {
    match opcode {
        OpCode::Text => String::from_utf8(payload)
            .map(Message::Text)
            .map_err(|_| WsError::protocol("invalid UTF-8 in text message")),
        _ => Ok(Message::Binary(payload)),
    }
}

/// Split a message into frames of at most `frame_size` bytes
fn fragment(opcode: OpCode, payload: &[u8], frame_size: usize) -> Vec<Frame> {
    if payload.len() <= frame_size || frame_size == 0 {
        return vec![Frame::new(opcode, payload.to_vec(), true)];
    }
    let count = payload.len().div_ceil(frame_size);
    payload
        .chunks(frame_size)
        .enumerate()
        .map(|(i, chunk)| {
            let op = if i == 0 { opcode } else { OpCode::Continuation };
            Frame::new(op, chunk.to_vec(), i + 1 == count)
        })
        .collect()
}

fn elapsed(deadline: &Deadline) -> WsError {
    WsError::Timeout(Elapsed {
        budget: deadline.budget().unwrap_or_default(),
    })
}


fn host_port(url: &Url) -> Result<(String, u16)> {
    let host = url
        .host_str()
        .ok_or_else(|| WsError::Handshake(format!("no host in {url}")))?
        .to_string();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| WsError::Handshake(format!("no port in {url}")))?;
    Ok((host, port))
}

// ═══════════════════════════════════════════════════════════════════════════
// Blocking
// ═══════════════════════════════════════════════════════════════════════════

/// A blocking stream whose reads can be bounded in time.
///
/// Streams that cannot time out keep the default no-op; deadlines are then
/// only checked between frames.
pub trait BlockingStream: Read + Write {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<()> {
        let _ = timeout;
        Ok(())
    }
}

impl BlockingStream for TcpStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }
}

/// WebSocket connection driven by blocking I/O
pub struct BlockingConnection<S> {
    stream: S,
    role: Role,
    extensions: Vec<Box<dyn Extension>>,
    assembler: MessageAssembler,
    config: ConnectionConfig,
    state: State,
}

impl BlockingClient {
    /// Open a TCP connection to `url` and perform the client handshake
    pub fn connect(
        url: &Url,
        factory: Option<&ClientDeflateFactory>,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let (host, port) = host_port(url)?;
        let stream = TcpStream::connect((host.as_str(), port))?;
        stream.set_nodelay(true)?;
        let (stream, extensions) = client_handshake_blocking(stream, url, factory)?;
        debug!(%url, "websocket connected");
        Ok(Self::new(stream, Role::Client, extensions, config))
    }
}

impl<S: BlockingStream> BlockingConnection<S> {
    /// Wrap a stream on which the handshake already happened
    pub fn new(
        stream: S,
        role: Role,
        extensions: Vec<Box<dyn Extension>>,
        config: ConnectionConfig,
    ) -> Self {
        let assembler = MessageAssembler::new(config.max_message_size);
        Self {
            stream,
            role,
            extensions,
            assembler,
            config,
            state: State::Open,
        }
    }

    /// Names of the negotiated extensions, in registration order
    pub fn extensions(&self) -> Vec<&str> {
        self.extensions.iter().map(|ext| ext.name()).collect()
    }

    fn write(&mut self, frame: Frame) -> Result<()> {
        write_frame_blocking(
            &mut self.stream,
            frame,
            self.role.masks_outgoing(),
            &mut self.extensions,
        )
    }

    pub fn send_text(&mut self, text: &str) -> Result<()> {
        self.state.check()?;
        for frame in fragment(OpCode::Text, text.as_bytes(), self.config.frame_size) {
            self.write(frame)?;
        }
        Ok(())
    }

    /// Receive the next data message before `deadline`
    pub fn recv(&mut self, deadline: &Deadline) -> Result<Message> {
        self.state.check()?;
        loop {
            let remaining = deadline.remaining()?;
            self.stream.set_read_timeout(remaining)?;
            let frame = match read_frame_blocking(
                &mut self.stream,
                self.role.expects_masked(),
                self.config.max_message_size,
                &mut self.extensions,
            ) {
                Ok(frame) => frame,
                Err(WsError::Io(e))
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    self.state = State::Abandoned;
                    return Err(elapsed(deadline));
                }
                Err(e) => {
                    if e.is_connection_closed() {
                        self.state = State::Closed;
                    }
                    return Err(e);
                }
            };
            trace!(opcode = ?frame.opcode, len = frame.payload.len(), "frame received");

            match self.assembler.push(frame)? {
                Step::Deliver(message) => return Ok(message),
                Step::Pong(payload) => self.write(Frame::pong(payload))?,
                Step::Pending => {}
                Step::Closed { code, reason } => {
                    debug!(?code, %reason, "peer closed websocket");
                    // Echo the close; the peer may already be gone.
                    let _ = self.write(Frame::close(code, ""));
                    self.state = State::Closed;
                    return Err(WsError::ConnectionClosed {
                        code,
                        reason: Some(reason),
                    });
                }
            }
        }
    }

    /// Send a normal-closure frame. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.state != State::Open {
            return Ok(());
        }
        self.state = State::Closed;
        self.write(Frame::close(Some(1000), ""))
    }

    pub fn is_closed(&self) -> bool {
        self.state != State::Open
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Async
// ═══════════════════════════════════════════════════════════════════════════

/// WebSocket connection driven by tokio
pub struct AsyncConnection<S> {
    stream: S,
    role: Role,
    extensions: Vec<Box<dyn Extension>>,
    assembler: MessageAssembler,
    config: ConnectionConfig,
    state: State,
}

impl AsyncClient {
    /// Open a TCP connection to `url` and upgrade it
    pub async fn connect(
        url: &Url,
        factory: Option<&ClientDeflateFactory>,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let (host, port) = host_port(url)?;
        let stream = tokio::net::TcpStream::connect((host.as_str(), port)).await?;
        stream.set_nodelay(true)?;
        let (stream, extensions) = client_handshake(stream, url, factory).await?;
        debug!(%url, "websocket connected");
        Ok(Self::new(stream, Role::Client, extensions, config))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> AsyncConnection<S> {
    /// Wrap a stream on which the handshake already happened
    pub fn new(
        stream: S,
        role: Role,
        extensions: Vec<Box<dyn Extension>>,
        config: ConnectionConfig,
    ) -> Self {
        let assembler = MessageAssembler::new(config.max_message_size);
        Self {
            stream,
            role,
            extensions,
            assembler,
            config,
            state: State::Open,
        }
    }

    pub fn extensions(&self) -> Vec<&str> {
        self.extensions.iter().map(|ext| ext.name()).collect()
    }

    async fn write(&mut self, frame: Frame) -> Result<()> {
        write_frame(
            &mut self.stream,
            frame,
            self.role.masks_outgoing(),
            &mut self.extensions,
        )
        .await
    }

    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.state.check()?;
        for frame in fragment(OpCode::Text, text.as_bytes(), self.config.frame_size) {
            self.write(frame).await?;
        }
        Ok(())
    }

    /// Receive the next data message before `deadline`
    pub async fn recv(&mut self, deadline: &Deadline) -> Result<Message> {
        self.state.check()?;
        loop {
            let remaining = deadline.remaining()?;
            let expects_masked = self.role.expects_masked();
            let max_size = self.config.max_message_size;
            let read = read_frame(&mut self.stream, expects_masked, max_size, &mut self.extensions);
            let result = match remaining {
                Some(left) => match tokio::time::timeout(left, read).await {
                    Ok(result) => result,
                    Err(_) => {
                        self.state = State::Abandoned;
                        return Err(elapsed(deadline));
                    }
                },
                None => read.await,
            };
            let frame = match result {
                Ok(frame) => frame,
                Err(e) => {
                    if e.is_connection_closed() {
                        self.state = State::Closed;
                    }
                    return Err(e);
                }
            };
            trace!(opcode = ?frame.opcode, len = frame.payload.len(), "frame received");

            match self.assembler.push(frame)? {
                Step::Deliver(message) => return Ok(message),
                Step::Pong(payload) => self.write(Frame::pong(payload)).await?,
                Step::Pending => {}
                Step::Closed { code, reason } => {
                    debug!(?code, %reason, "peer closed websocket");
                    let _ = self.write(Frame::close(code, "")).await;
                    self.state = State::Closed;
                    return Err(WsError::ConnectionClosed {
                        code,
                        reason: Some(reason),
                    });
                }
            }
        }
    }

    /// Send a normal-closure frame and shut the write half down. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        if self.state != State::Open {
            return Ok(());
        }
        self.state = State::Closed;
        self.write(Frame::close(Some(1000), "")).await?;
        self.stream.shutdown().await?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.state != State::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::deflate::{CompressionConfig, PerMessageDeflate};
    use std::io::Cursor;

    /// Scripted peer: reads come from `input`, writes land in `output`
    struct Scripted {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Scripted {
        fn new(frames: &[Frame]) -> Self {
            let mut input = Vec::new();
            for frame in frames {
                input.extend(frame.serialize(None));
            }
            Self {
                input: Cursor::new(input),
                output: Vec::new(),
            }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Write::write(&mut self.output, buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl BlockingStream for Scripted {}

    fn client(frames: &[Frame]) -> BlockingConnection<Scripted> {
        BlockingConnection::new(
            Scripted::new(frames),
            Role::Client,
            Vec::new(),
            ConnectionConfig::default(),
        )
    }

    #[test]
    fn test_fragment_splits_large_messages() {
        let frames = fragment(OpCode::Text, b"abcdefgh", 3);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].opcode, OpCode::Text);
        assert!(!frames[0].fin);
        assert_eq!(frames[1].opcode, OpCode::Continuation);
        assert_eq!(frames[2].payload, b"gh");
        assert!(frames[2].fin);

        let single = fragment(OpCode::Text, b"", 3);
        assert_eq!(single.len(), 1);
        assert!(single[0].fin);
    }

    #[test]
    fn test_reassembles_fragments_and_answers_ping() {
        let mut conn = client(&[
            Frame::new(OpCode::Text, "hel", false),
            Frame::ping("are you there"),
            Frame::new(OpCode::Continuation, "lo", true),
        ]);
        let message = conn.recv(&Deadline::unbounded()).unwrap();
        assert_eq!(message, Message::Text("hello".into()));

        let mut written = Cursor::new(conn.stream.output.clone());
        let pong = read_frame_blocking(&mut written, true, None, &mut []).unwrap();
        assert_eq!(pong.opcode, OpCode::Pong);
        assert_eq!(pong.payload, b"are you there");
    }

    #[test]
    fn test_close_frame_is_connection_closed() {
        let mut conn = client(&[Frame::close(Some(1001), "going away")]);
        match conn.recv(&Deadline::unbounded()) {
            Err(WsError::ConnectionClosed { code, reason }) => {
                assert_eq!(code, Some(1001));
                assert_eq!(reason.as_deref(), Some("going away"));
            }
            other => panic!("expected ConnectionClosed, got {:?}", other),
        }
        assert!(conn.is_closed());
        assert!(conn.send_text("late").unwrap_err().is_connection_closed());
    }

    #[test]
    fn test_eof_is_connection_closed() {
        let mut conn = client(&[]);
        let err = conn.recv(&Deadline::unbounded()).unwrap_err();
        assert!(err.is_connection_closed());
    }

    #[test]
    fn test_expired_deadline_is_timeout() {
        let mut conn = client(&[Frame::text("never read")]);
        let err = conn.recv(&Deadline::after(Duration::ZERO)).unwrap_err();
        assert!(matches!(err, WsError::Timeout(_)));
    }

    #[test]
    fn test_stray_continuation_rejected() {
        let mut conn = client(&[Frame::new(OpCode::Continuation, "x", true)]);
        assert!(matches!(
            conn.recv(&Deadline::unbounded()),
            Err(WsError::Protocol(_))
        ));
    }

    #[test]
    fn test_reassembled_message_size_limit() {
        let mut conn = BlockingConnection::new(
            Scripted::new(&[
                Frame::new(OpCode::Binary, vec![0u8; 60], false),
                Frame::new(OpCode::Continuation, vec![0u8; 60], true),
            ]),
            Role::Client,
            Vec::new(),
            ConnectionConfig {
                max_message_size: Some(100),
                ..ConnectionConfig::default()
            },
        );
        assert!(matches!(
            conn.recv(&Deadline::unbounded()),
            Err(WsError::PayloadTooBig(_))
        ));
    }

    #[tokio::test]
    async fn test_async_compressed_fragmented_exchange() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let config = ConnectionConfig {
            frame_size: 16,
            ..ConnectionConfig::default()
        };
        let deflate = |cfg: CompressionConfig| -> Vec<Box<dyn Extension>> {
            vec![Box::new(PerMessageDeflate::new(cfg).unwrap())]
        };
        let mut client = AsyncConnection::new(a, Role::Client, deflate(CompressionConfig::default()), config.clone());
        let mut server = AsyncConnection::new(b, Role::Server, deflate(CompressionConfig::default()), config);

        let text = "a message long enough to be split across several frames";
        client.send_text(text).await.unwrap();
        let received = server.recv(&Deadline::after(Duration::from_secs(5))).await.unwrap();
        assert_eq!(received, Message::Text(text.to_string()));

        server.send_text("reply").await.unwrap();
        let reply = client.recv(&Deadline::after(Duration::from_secs(5))).await.unwrap();
        assert_eq!(reply.into_text().unwrap(), "reply");
    }

    #[tokio::test]
    async fn test_async_recv_times_out_and_abandons() {
        let (a, _b) = tokio::io::duplex(1024);
        let mut client = AsyncConnection::new(a, Role::Client, Vec::new(), ConnectionConfig::default());
        let err = client
            .recv(&Deadline::after(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, WsError::Timeout(_)));
        assert!(client.is_closed());

        // an abandoned connection is not a lost one: no reconnect-and-retry
        let err = client.send_text("late").await.unwrap_err();
        assert!(matches!(err, WsError::Abandoned));
        assert!(!err.is_connection_closed());
    }
}
