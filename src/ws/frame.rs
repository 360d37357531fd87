//! WebSocket frame codec (RFC 6455 section 5.2)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                               |   Masking-key, if MASK set    |
//! +-------------------------------+-------------------------------+
//! :                     Payload Data ...                          :
//! +---------------------------------------------------------------+
//! ```
//!
//! Reading and writing come in two flavours that share every parsing rule:
//! [`read_frame`]/[`write_frame`] for tokio streams and
//! [`read_frame_blocking`]/[`write_frame_blocking`] for `std::io` streams.
//!
//! Extensions sit between the wire and the caller. On read they are
//! applied in reverse registration order, on write in registration order.

use std::io::{Read, Write};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::{Result, WsError};
use super::extension::Extension;

/// Largest payload a control frame may carry
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Frame type identifier
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Close, ping and pong are control frames
    pub fn is_control(&self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WsError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(WsError::protocol(format!("invalid opcode {other:#x}"))),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> u8 {
        match op {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// A single WebSocket frame.
///
/// Frames are values: transforms take a frame and hand back a new one
/// rather than editing it behind the caller's back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: OpCode,
    pub payload: Vec<u8>,
    pub fin: bool,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
}

impl Frame {
    pub fn new(opcode: OpCode, payload: impl Into<Vec<u8>>, fin: bool) -> Self {
        Self {
            opcode,
            payload: payload.into(),
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
        }
    }

    pub fn text(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(OpCode::Text, payload, true)
    }

    pub fn binary(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(OpCode::Binary, payload, true)
    }

    pub fn ping(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(OpCode::Ping, payload, true)
    }

    pub fn pong(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(OpCode::Pong, payload, true)
    }

    /// Close frame with an optional status code and reason
    pub fn close(code: Option<u16>, reason: &str) -> Self {
        let mut payload = Vec::new();
        if let Some(code) = code {
            payload.extend_from_slice(&code.to_be_bytes());
            payload.extend_from_slice(reason.as_bytes());
        }
        Self::new(OpCode::Close, payload, true)
    }

    /// Same frame with a different payload
    pub fn with_payload(self, payload: Vec<u8>) -> Self {
        Self { payload, ..self }
    }

    /// Same frame with the RSV1 (compression) bit changed
    pub fn with_rsv1(self, rsv1: bool) -> Self {
        Self { rsv1, ..self }
    }

    /// Decode the status code and reason of a close frame
    pub fn close_reason(&self) -> Result<(Option<u16>, String)> {
        match self.payload.len() {
            0 => Ok((None, String::new())),
            1 => Err(WsError::protocol("close frame too short")),
            _ => {
                let code = u16::from_be_bytes([self.payload[0], self.payload[1]]);
                let reason = std::str::from_utf8(&self.payload[2..])
                    .map_err(|_| WsError::protocol("close reason is not valid UTF-8"))?;
                Ok((Some(code), reason.to_string()))
            }
        }
    }

    /// Validate frame invariants once extensions have had their turn.
    ///
    /// Any reserved bit still set here was not claimed by a negotiated
    /// extension.
    pub fn check(&self) -> Result<()> {
        if self.rsv1 || self.rsv2 || self.rsv3 {
            return Err(WsError::protocol("reserved bits must be 0"));
        }
        if self.opcode.is_control() {
            if self.payload.len() > MAX_CONTROL_PAYLOAD {
                return Err(WsError::protocol("control frame too long"));
            }
            if !self.fin {
                return Err(WsError::protocol("fragmented control frame"));
            }
        }
        Ok(())
    }

    /// Serialize header, optional mask key and (masked) payload into one buffer
    pub fn serialize(&self, mask: Option<[u8; 4]>) -> Vec<u8> {
        let len = self.payload.len();
        let mut out = Vec::with_capacity(2 + 8 + 4 + len);

        let mut head1 = u8::from(self.opcode);
        if self.fin {
            head1 |= 0b1000_0000;
        }
        if self.rsv1 {
            head1 |= 0b0100_0000;
        }
        if self.rsv2 {
            head1 |= 0b0010_0000;
        }
        if self.rsv3 {
            head1 |= 0b0001_0000;
        }
        out.push(head1);

        let mask_bit = if mask.is_some() { 0b1000_0000 } else { 0 };
        if len < 126 {
            out.push(mask_bit | len as u8);
        } else if len <= u16::MAX as usize {
            out.push(mask_bit | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(mask_bit | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }

        match mask {
            Some(key) => {
                out.extend_from_slice(&key);
                let start = out.len();
                out.extend_from_slice(&self.payload);
                apply_mask(&mut out[start..], key);
            }
            None => out.extend_from_slice(&self.payload),
        }
        out
    }
}

/// XOR `data` in place with the 4-byte masking key
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// First two header bytes, decoded
struct Head {
    fin: bool,
    rsv1: bool,
    rsv2: bool,
    rsv3: bool,
    opcode: OpCode,
    len7: u8,
}

fn parse_head(bytes: [u8; 2], expect_mask: bool) -> Result<Head> {
    let [head1, head2] = bytes;
    let opcode = OpCode::try_from(head1 & 0b0000_1111)?;
    if (head2 & 0b1000_0000 != 0) != expect_mask {
        return Err(WsError::protocol("incorrect masking"));
    }
    Ok(Head {
        fin: head1 & 0b1000_0000 != 0,
        rsv1: head1 & 0b0100_0000 != 0,
        rsv2: head1 & 0b0010_0000 != 0,
        rsv3: head1 & 0b0001_0000 != 0,
        opcode,
        len7: head2 & 0b0111_1111,
    })
}

/// Reject a declared length before any payload is allocated
fn check_length(length: u64, max_size: Option<usize>) -> Result<usize> {
    if let Some(max) = max_size {
        if length > max as u64 {
            return Err(WsError::PayloadTooBig(format!(
                "over size limit ({length} > {max} bytes)"
            )));
        }
    }
    usize::try_from(length)
        .map_err(|_| WsError::PayloadTooBig(format!("frame length {length} not addressable")))
}

/// Run decode transforms newest-first, then validate the result
fn finish_read(
    head: Head,
    payload: Vec<u8>,
    extensions: &mut [Box<dyn Extension>],
    max_size: Option<usize>,
) -> Result<Frame> {
    let mut frame = Frame {
        opcode: head.opcode,
        payload,
        fin: head.fin,
        rsv1: head.rsv1,
        rsv2: head.rsv2,
        rsv3: head.rsv3,
    };
    for extension in extensions.iter_mut().rev() {
        frame = extension.decode(frame, max_size)?;
    }
    frame.check()?;
    Ok(frame)
}

/// Validate, run encode transforms oldest-first and serialize
fn prepare_write(
    frame: Frame,
    mask: bool,
    extensions: &mut [Box<dyn Extension>],
) -> Result<Vec<u8>> {
    frame.check()?;
    let mut frame = frame;
    for extension in extensions.iter_mut() {
        frame = extension.encode(frame)?;
    }
    let key = if mask { Some(rand::random::<[u8; 4]>()) } else { None };
    Ok(frame.serialize(key))
}

/// Read one frame from a tokio stream.
///
/// `mask` is the masking the peer must use: servers read masked frames,
/// clients read unmasked ones.
pub async fn read_frame<R>(
    reader: &mut R,
    mask: bool,
    max_size: Option<usize>,
    extensions: &mut [Box<dyn Extension>],
) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; 2];
    reader.read_exact(&mut head).await?;
    let head = parse_head(head, mask)?;

    let length = match head.len7 {
        126 => {
            let mut buf = [0u8; 2];
            reader.read_exact(&mut buf).await?;
            u16::from_be_bytes(buf) as u64
        }
        127 => {
            let mut buf = [0u8; 8];
            reader.read_exact(&mut buf).await?;
            u64::from_be_bytes(buf)
        }
        n => n as u64,
    };
    let length = check_length(length, max_size)?;

    let key = if mask {
        let mut key = [0u8; 4];
        reader.read_exact(&mut key).await?;
        Some(key)
    } else {
        None
    };

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    if let Some(key) = key {
        apply_mask(&mut payload, key);
    }

    finish_read(head, payload, extensions, max_size)
}

/// Blocking counterpart of [`read_frame`]
pub fn read_frame_blocking<R>(
    reader: &mut R,
    mask: bool,
    max_size: Option<usize>,
    extensions: &mut [Box<dyn Extension>],
) -> Result<Frame>
where
    R: Read,
{
    let mut head = [0u8; 2];
    reader.read_exact(&mut head)?;
    let head = parse_head(head, mask)?;

    let length = match head.len7 {
        126 => {
            let mut buf = [0u8; 2];
            reader.read_exact(&mut buf)?;
            u16::from_be_bytes(buf) as u64
        }
        127 => {
            let mut buf = [0u8; 8];
            reader.read_exact(&mut buf)?;
            u64::from_be_bytes(buf)
        }
        n => n as u64,
    };
    let length = check_length(length, max_size)?;

    let key = if mask {
        let mut key = [0u8; 4];
        reader.read_exact(&mut key)?;
        Some(key)
    } else {
        None
    };

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload)?;
    if let Some(key) = key {
        apply_mask(&mut payload, key);
    }

    finish_read(head, payload, extensions, max_size)
}

/// Write one frame to a tokio stream.
///
/// The whole frame goes out in a single `write_all` so that frames from
/// different writers sharing a transport never interleave.
pub async fn write_frame<W>(
    writer: &mut W,
    frame: Frame,
    mask: bool,
    extensions: &mut [Box<dyn Extension>],
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = prepare_write(frame, mask, extensions)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Blocking counterpart of [`write_frame`]
pub fn write_frame_blocking<W>(
    writer: &mut W,
    frame: Frame,
    mask: bool,
    extensions: &mut [Box<dyn Extension>],
) -> Result<()>
where
    W: Write,
{
    let bytes = prepare_write(frame, mask, extensions)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}
