//! HTTP/1.1 upgrade handshake (RFC 6455 section 4)
//!
//! ```text
//! client                                              server
//!   │  GET /api/kernels/{id}/channels HTTP/1.1          │
//!   │  Upgrade: websocket                               │
//!   │  Sec-WebSocket-Key: base64(16 random bytes)       │
//!   │  Sec-WebSocket-Extensions: permessage-deflate; …  │
//!   │ ─────────────────────────────────────────────────►│
//!   │  HTTP/1.1 101 Switching Protocols                 │
//!   │  Sec-WebSocket-Accept: base64(sha1(key + GUID))   │
//!   │  Sec-WebSocket-Extensions: permessage-deflate; …  │
//!   │ ◄─────────────────────────────────────────────────│
//! ```
//!
//! The async client upgrade runs on hyper. Blocking peers and the server
//! side parse heads with httparse into `http` types. Bytes that arrive
//! after the head are replayed through [`Rewind`], so a frame sent right
//! behind the `101` is not lost.
//!
//! Only what the kernel channel needs is implemented: no subprotocols,
//! no redirects, no authentication.

use std::io::{self, Read, Write};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http_body_util::Empty;
use hyper::body::Bytes;
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::upgrade::Upgraded;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use reqwest::Url;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::{debug, warn};

use super::connection::BlockingStream;
use super::deflate::{ClientDeflateFactory, ServerDeflateFactory, EXTENSION_NAME};
use super::error::{Result, WsError};
use super::extension::{format_extension, parse_extension_header, Extension};

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on the size of a request or response head
const MAX_HEAD_SIZE: usize = 8 * 1024;

const MAX_HEADERS: usize = 32;

/// Random `Sec-WebSocket-Key`
pub fn generate_key() -> String {
    STANDARD.encode(rand::random::<[u8; 16]>())
}

/// `Sec-WebSocket-Accept` value the server must answer `key` with
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

fn handshake_error(e: impl std::fmt::Display) -> WsError {
    WsError::Handshake(e.to_string())
}

/// All values of a header joined with `, `
fn joined(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    let values: Vec<&str> = headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.join(", "))
    }
}

fn header_contains(headers: &HeaderMap, name: HeaderName, token: &str) -> bool {
    joined(headers, name)
        .map(|value| {
            value
                .split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token))
        })
        .unwrap_or(false)
}

// ═══════════════════════════════════════════════════════════════════════════
// Head parsing
// ═══════════════════════════════════════════════════════════════════════════

/// A complete head and its length in bytes, or `None` while partial
type Parsed<T> = Option<(usize, T)>;

fn to_header_map(raw: &[httparse::Header<'_>]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(raw.len());
    for h in raw {
        let name = HeaderName::from_bytes(h.name.as_bytes()).map_err(handshake_error)?;
        let value = HeaderValue::from_bytes(h.value).map_err(handshake_error)?;
        headers.append(name, value);
    }
    Ok(headers)
}

fn parse_response(buf: &[u8]) -> Result<Parsed<Response<()>>> {
    let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut raw);
    let len = match parsed.parse(buf).map_err(handshake_error)? {
        httparse::Status::Partial => return Ok(None),
        httparse::Status::Complete(len) => len,
    };
    let code = parsed
        .code
        .ok_or_else(|| WsError::Handshake("response without status".into()))?;

    let mut response = Response::new(());
    *response.status_mut() = StatusCode::from_u16(code).map_err(handshake_error)?;
    *response.headers_mut() = to_header_map(parsed.headers)?;
    Ok(Some((len, response)))
}

fn parse_request(buf: &[u8]) -> Result<Parsed<Request<()>>> {
    let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut raw);
    let len = match parsed.parse(buf).map_err(handshake_error)? {
        httparse::Status::Partial => return Ok(None),
        httparse::Status::Complete(len) => len,
    };
    let (Some(method), Some(path)) = (parsed.method, parsed.path) else {
        return Err(WsError::Handshake("incomplete request line".into()));
    };

    let mut request = Request::new(());
    *request.method_mut() = Method::from_bytes(method.as_bytes()).map_err(handshake_error)?;
    *request.uri_mut() = path.parse().map_err(handshake_error)?;
    *request.headers_mut() = to_header_map(parsed.headers)?;
    Ok(Some((len, request)))
}

/// Read until `parse` sees a complete head. Returns the head and the bytes
/// that followed it.
fn read_head_blocking<S, T>(
    stream: &mut S,
    parse: fn(&[u8]) -> Result<Parsed<T>>,
) -> Result<(T, Vec<u8>)>
where
    S: Read,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = match stream.read(&mut chunk) {
            Ok(0) => return Err(WsError::closed()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        buf.extend_from_slice(&chunk[..n]);
        if let Some((len, head)) = parse(&buf)? {
            return Ok((head, buf.split_off(len)));
        }
        if buf.len() > MAX_HEAD_SIZE {
            return Err(WsError::Handshake("head too large".into()));
        }
    }
}

async fn read_head<S, T>(
    stream: &mut S,
    parse: fn(&[u8]) -> Result<Parsed<T>>,
) -> Result<(T, Vec<u8>)>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(WsError::closed());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some((len, head)) = parse(&buf)? {
            return Ok((head, buf.split_off(len)));
        }
        if buf.len() > MAX_HEAD_SIZE {
            return Err(WsError::Handshake("head too large".into()));
        }
    }
}

fn write_headers(head: &mut Vec<u8>, headers: &HeaderMap) {
    for (name, value) in headers {
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    head.extend_from_slice(b"\r\n");
}

fn request_head(request: &Request<()>) -> Vec<u8> {
    let mut head = format!("{} {} HTTP/1.1\r\n", request.method(), request.uri()).into_bytes();
    write_headers(&mut head, request.headers());
    head
}

fn response_head(response: &Response<()>) -> Vec<u8> {
    let status = response.status();
    let mut head = format!(
        "HTTP/1.1 {} {}\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or_default()
    )
    .into_bytes();
    write_headers(&mut head, response.headers());
    head
}

// ═══════════════════════════════════════════════════════════════════════════
// Rewind
// ═══════════════════════════════════════════════════════════════════════════

/// Stream that first replays bytes read past a handshake head, then reads
/// from the wrapped stream
#[derive(Debug)]
pub struct Rewind<S> {
    prefix: Vec<u8>,
    pos: usize,
    inner: S,
}

impl<S> Rewind<S> {
    pub fn new(inner: S, prefix: Vec<u8>) -> Self {
        Self {
            prefix,
            pos: 0,
            inner,
        }
    }

    fn replay(&mut self, len: usize) -> Option<&[u8]> {
        if self.pos >= self.prefix.len() {
            return None;
        }
        let n = len.min(self.prefix.len() - self.pos);
        let start = self.pos;
        self.pos += n;
        Some(&self.prefix[start..start + n])
    }
}

impl<S: Read> Read for Rewind<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(bytes) = self.replay(buf.len()) {
            buf[..bytes.len()].copy_from_slice(bytes);
            return Ok(bytes.len());
        }
        self.inner.read(buf)
    }
}

impl<S: Write> Write for Rewind<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<S: BlockingStream> BlockingStream for Rewind<S> {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.inner.set_read_timeout(timeout)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Rewind<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(bytes) = this.replay(buf.remaining()) {
            buf.put_slice(bytes);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Rewind<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Client side
// ═══════════════════════════════════════════════════════════════════════════

fn host_header(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| WsError::Handshake(format!("no host in {url}")))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn upgrade_request<B>(
    url: &Url,
    key: &str,
    factory: Option<&ClientDeflateFactory>,
    body: B,
) -> Result<Request<B>> {
    let mut target = url.path().to_string();
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }

    let mut builder = Request::builder()
        .method(Method::GET)
        .uri(target)
        .header(header::HOST, host_header(url)?)
        .header(header::UPGRADE, "websocket")
        .header(header::CONNECTION, "Upgrade")
        .header(header::SEC_WEBSOCKET_KEY, key)
        .header(header::SEC_WEBSOCKET_VERSION, "13");
    if let Some(factory) = factory {
        let offer = format_extension(EXTENSION_NAME, &factory.request_params()?);
        builder = builder.header(header::SEC_WEBSOCKET_EXTENSIONS, offer);
    }
    builder.body(body).map_err(handshake_error)
}

fn check_response(
    status: StatusCode,
    headers: &HeaderMap,
    key: &str,
    factory: Option<&ClientDeflateFactory>,
) -> Result<Vec<Box<dyn Extension>>> {
    if status != StatusCode::SWITCHING_PROTOCOLS {
        return Err(WsError::Handshake(format!("server rejected upgrade: {status}")));
    }
    if !header_contains(headers, header::UPGRADE, "websocket") {
        return Err(WsError::Handshake("missing Upgrade: websocket".into()));
    }
    if !header_contains(headers, header::CONNECTION, "upgrade") {
        return Err(WsError::Handshake("missing Connection: Upgrade".into()));
    }
    let expected = accept_key(key);
    match headers
        .get(header::SEC_WEBSOCKET_ACCEPT)
        .and_then(|value| value.to_str().ok())
    {
        Some(accept) if accept == expected => {}
        other => {
            return Err(WsError::Handshake(format!(
                "invalid Sec-WebSocket-Accept: {other:?}"
            )))
        }
    }

    let mut accepted: Vec<Box<dyn Extension>> = Vec::new();
    if let Some(value) = joined(headers, header::SEC_WEBSOCKET_EXTENSIONS) {
        for (name, params) in parse_extension_header(&value)? {
            match factory {
                Some(factory) if name == EXTENSION_NAME => {
                    let extension = factory.process_response_params(&params, &accepted)?;
                    accepted.push(Box::new(extension));
                }
                _ => {
                    return Err(WsError::negotiation(format!(
                        "unsupported extension: {name}"
                    )))
                }
            }
        }
    }
    debug!(extensions = accepted.len(), "websocket upgrade accepted");
    Ok(accepted)
}

/// Perform the client handshake on a blocking stream.
///
/// Returns the stream, positioned at the first frame, and the extensions
/// the server agreed to.
pub fn client_handshake_blocking<S: Read + Write>(
    mut stream: S,
    url: &Url,
    factory: Option<&ClientDeflateFactory>,
) -> Result<(Rewind<S>, Vec<Box<dyn Extension>>)> {
    let key = generate_key();
    let request = upgrade_request(url, &key, factory, ())?;
    debug!(%url, "sending websocket upgrade");
    stream.write_all(&request_head(&request))?;
    stream.flush()?;
    let (response, leftover) = read_head_blocking(&mut stream, parse_response)?;
    let extensions = check_response(response.status(), response.headers(), &key, factory)?;
    Ok((Rewind::new(stream, leftover), extensions))
}

/// Perform the client handshake over hyper and take over the upgraded
/// stream
pub async fn client_handshake<S>(
    stream: S,
    url: &Url,
    factory: Option<&ClientDeflateFactory>,
) -> Result<(TokioIo<Upgraded>, Vec<Box<dyn Extension>>)>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let key = generate_key();
    let request = upgrade_request(url, &key, factory, Empty::<Bytes>::new())?;

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
    tokio::spawn(async move {
        if let Err(e) = conn.with_upgrades().await {
            warn!(error = %e, "websocket upgrade connection failed");
        }
    });

    debug!(%url, "sending websocket upgrade");
    let mut response = sender.send_request(request).await?;
    let extensions = check_response(response.status(), response.headers(), &key, factory)?;
    let upgraded = hyper::upgrade::on(&mut response).await?;
    Ok((TokioIo::new(upgraded), extensions))
}

// ═══════════════════════════════════════════════════════════════════════════
// Server side
// ═══════════════════════════════════════════════════════════════════════════

/// Validate an upgrade request and build the `101` response
fn answer_request(
    request: &Request<()>,
    factory: Option<&ServerDeflateFactory>,
) -> Result<(Response<()>, Vec<Box<dyn Extension>>)> {
    if request.method() != Method::GET {
        return Err(WsError::Handshake(format!(
            "unsupported method: {}",
            request.method()
        )));
    }
    let headers = request.headers();
    if !header_contains(headers, header::UPGRADE, "websocket") {
        return Err(WsError::Handshake("missing Upgrade: websocket".into()));
    }
    let key = headers
        .get(header::SEC_WEBSOCKET_KEY)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| WsError::Handshake("missing Sec-WebSocket-Key".into()))?;

    let mut accepted: Vec<Box<dyn Extension>> = Vec::new();
    let mut response_entries = Vec::new();
    if let (Some(factory), Some(value)) = (factory, joined(headers, header::SEC_WEBSOCKET_EXTENSIONS)) {
        for (name, params) in parse_extension_header(&value)? {
            if name != EXTENSION_NAME {
                continue;
            }
            // An offer we cannot satisfy is skipped; the client may have
            // listed fallbacks after it.
            match factory.process_request_params(&params, &accepted) {
                Ok((response_params, extension)) => {
                    response_entries.push(format_extension(EXTENSION_NAME, &response_params));
                    accepted.push(Box::new(extension));
                }
                Err(e) => debug!(error = %e, "declined extension offer"),
            }
        }
    }

    let mut builder = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::UPGRADE, "websocket")
        .header(header::CONNECTION, "Upgrade")
        .header(header::SEC_WEBSOCKET_ACCEPT, accept_key(key));
    if !response_entries.is_empty() {
        builder = builder.header(header::SEC_WEBSOCKET_EXTENSIONS, response_entries.join(", "));
    }
    let response = builder.body(()).map_err(handshake_error)?;
    Ok((response, accepted))
}

/// Accept a client upgrade on a blocking stream
pub fn server_handshake_blocking<S: Read + Write>(
    mut stream: S,
    factory: Option<&ServerDeflateFactory>,
) -> Result<(Rewind<S>, Vec<Box<dyn Extension>>)> {
    let (request, leftover) = read_head_blocking(&mut stream, parse_request)?;
    let (response, accepted) = answer_request(&request, factory)?;
    stream.write_all(&response_head(&response))?;
    stream.flush()?;
    Ok((Rewind::new(stream, leftover), accepted))
}

/// Accept a client upgrade on a tokio stream
pub async fn server_handshake<S: AsyncRead + AsyncWrite + Unpin>(
    mut stream: S,
    factory: Option<&ServerDeflateFactory>,
) -> Result<(Rewind<S>, Vec<Box<dyn Extension>>)> {
    let (request, leftover) = read_head(&mut stream, parse_request).await?;
    let (response, accepted) = answer_request(&request, factory)?;
    stream.write_all(&response_head(&response)).await?;
    stream.flush().await?;
    Ok((Rewind::new(stream, leftover), accepted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::ws::frame::{read_frame_blocking, Frame};

    const RFC_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    /// Reads come from a fixed script, writes are collected
    struct Scripted {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            Read::read(&mut self.input, buf)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Write::write(&mut self.output, buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn response(raw: &str) -> Response<()> {
        parse_response(raw.as_bytes()).unwrap().unwrap().1
    }

    #[test]
    fn test_accept_key_rfc_example() {
        // RFC 6455 section 1.3
        assert_eq!(accept_key(RFC_KEY), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_generated_key_is_16_bytes() {
        let key = generate_key();
        assert_eq!(STANDARD.decode(&key).unwrap().len(), 16);
        assert_ne!(key, generate_key());
    }

    #[test]
    fn test_request_carries_offer() {
        let url = Url::parse("ws://localhost:8888/api/kernels/abc/channels").unwrap();
        let request = upgrade_request(&url, "k", Some(&ClientDeflateFactory::default()), ()).unwrap();
        let head = String::from_utf8(request_head(&request)).unwrap();
        assert!(head.starts_with("GET /api/kernels/abc/channels HTTP/1.1\r\n"));
        assert!(head.contains("host: localhost:8888\r\n"));
        assert!(head.contains("sec-websocket-extensions: permessage-deflate; client_max_window_bits\r\n"));
        assert!(head.ends_with("\r\n\r\n"));

        // what we write is what a server parses back
        let (len, parsed) = parse_request(head.as_bytes()).unwrap().unwrap();
        assert_eq!(len, head.len());
        assert_eq!(parsed.uri().path(), "/api/kernels/abc/channels");
        assert_eq!(parsed.headers().get(header::SEC_WEBSOCKET_KEY).unwrap(), "k");
    }

    #[test]
    fn test_partial_head_needs_more_bytes() {
        assert!(parse_response(b"HTTP/1.1 101 Switching Protocols\r\nUpgr").unwrap().is_none());
    }

    #[test]
    fn test_response_accept_mismatch() {
        let head = response(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: nope\r\n\r\n",
        );
        assert!(matches!(
            check_response(head.status(), head.headers(), RFC_KEY, None),
            Err(WsError::Handshake(_))
        ));
    }

    #[test]
    fn test_response_with_unrequested_extension() {
        let head = response(&format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: upgrade\r\nSec-WebSocket-Accept: {}\r\nSec-WebSocket-Extensions: permessage-deflate\r\n\r\n",
            accept_key(RFC_KEY)
        ));
        assert!(matches!(
            check_response(head.status(), head.headers(), RFC_KEY, None),
            Err(WsError::Negotiation(_))
        ));
        let accepted = check_response(
            head.status(),
            head.headers(),
            RFC_KEY,
            Some(&ClientDeflateFactory::default()),
        )
        .unwrap();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].name(), EXTENSION_NAME);
    }

    #[test]
    fn test_non_101_rejected() {
        let head = response("HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n");
        assert_eq!(head.status(), StatusCode::NOT_FOUND);
        assert!(matches!(
            check_response(head.status(), head.headers(), "k", None),
            Err(WsError::Handshake(_))
        ));
    }

    #[test]
    fn test_bytes_after_head_are_replayed() {
        let mut input = format!(
            "GET /api/kernels/k/channels HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: {RFC_KEY}\r\nSec-WebSocket-Version: 13\r\n\r\n"
        )
        .into_bytes();
        input.extend(Frame::text("early").serialize(Some([1, 2, 3, 4])));
        let stream = Scripted {
            input: Cursor::new(input),
            output: Vec::new(),
        };

        let (mut stream, accepted) = server_handshake_blocking(stream, None).unwrap();
        assert!(accepted.is_empty());
        let written = String::from_utf8(stream.inner.output.clone()).unwrap();
        assert!(written.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(written.contains("sec-websocket-accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));

        let frame = read_frame_blocking(&mut stream, true, None, &mut []).unwrap();
        assert_eq!(frame.payload, b"early");
    }

    #[test]
    fn test_server_rejects_post() {
        let stream = Scripted {
            input: Cursor::new(b"POST / HTTP/1.1\r\nHost: x\r\n\r\n".to_vec()),
            output: Vec::new(),
        };
        assert!(matches!(
            server_handshake_blocking(stream, None),
            Err(WsError::Handshake(_))
        ));
    }

    #[tokio::test]
    async fn test_client_server_handshake_over_duplex() {
        let (client, server) = tokio::io::duplex(4096);
        let url = Url::parse("ws://localhost:9999/api/kernels/k/channels").unwrap();

        let server_task = tokio::spawn(async move {
            let (_stream, accepted) =
                server_handshake(server, Some(&ServerDeflateFactory::default()))
                    .await
                    .unwrap();
            accepted.len()
        });
        let (_upgraded, accepted) =
            client_handshake(client, &url, Some(&ClientDeflateFactory::default()))
                .await
                .unwrap();

        assert_eq!(accepted.len(), 1);
        assert_eq!(server_task.await.unwrap(), 1);
    }
}
