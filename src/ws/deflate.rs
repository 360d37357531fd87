//! Permessage-deflate extension (RFC 7692)
//!
//! Two halves live here:
//!
//! - **Negotiation.** The initiating side (client) sends an offer built by
//!   [`ClientDeflateFactory::request_params`] and reconciles the peer's
//!   answer in [`ClientDeflateFactory::process_response_params`]. The
//!   responding side (server) turns an offer into a response in
//!   [`ServerDeflateFactory::process_request_params`]. Both produce a
//!   [`PerMessageDeflate`] bound to the connection.
//! - **Transform.** [`PerMessageDeflate`] compresses outgoing data frames
//!   and decompresses incoming ones, keeping or dropping the LZ77 window
//!   between messages according to the negotiated context takeover.
//!
//! zlib cannot compress a raw deflate stream with a 256-byte window. Window
//! bits 8 are therefore accepted only for the peer's side, which we decode
//! with a 9-bit window. Negotiation fails when it would leave our own
//! encoder at 8 bits.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use tracing::debug;

use crate::metrics::{DEFLATE_BYTES_IN, DEFLATE_BYTES_OUT, INFLATE_BYTES_OUT};

use super::error::{Result, WsError};
use super::extension::{Extension, ExtensionParameter};
use super::frame::{Frame, OpCode};

/// Registered extension name
pub const EXTENSION_NAME: &str = "permessage-deflate";

/// Trailer produced by a sync flush; stripped on the wire, restored on decode
const EMPTY_UNCOMPRESSED_BLOCK: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

pub const MIN_WINDOW_BITS: u8 = 8;
pub const MAX_WINDOW_BITS: u8 = 15;

/// Smallest window zlib accepts for raw deflate streams
const ZLIB_MIN_WINDOW_BITS: u8 = 9;

const INFLATE_CHUNK: usize = 16 * 1024;
const DEFLATE_CHUNK: usize = 4 * 1024;

const SERVER_NO_CONTEXT_TAKEOVER: &str = "server_no_context_takeover";
const CLIENT_NO_CONTEXT_TAKEOVER: &str = "client_no_context_takeover";
const SERVER_MAX_WINDOW_BITS: &str = "server_max_window_bits";
const CLIENT_MAX_WINDOW_BITS: &str = "client_max_window_bits";

/// Value of `client_max_window_bits`, which may be sent without a number
/// in an offer to advertise support without constraining the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientWindowBits {
    Unconstrained,
    Max(u8),
}

impl ClientWindowBits {
    fn bits(self) -> Option<u8> {
        match self {
            ClientWindowBits::Unconstrained => None,
            ClientWindowBits::Max(bits) => Some(bits),
        }
    }
}

/// Extra codec knobs, excluding window size which negotiation owns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressSettings {
    pub level: Compression,
}

impl Default for CompressSettings {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

/// Settled per-connection compression parameters.
///
/// "Remote" describes what the peer compresses with (our decoder),
/// "local" what we compress with (our encoder).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionConfig {
    pub remote_no_context_takeover: bool,
    pub local_no_context_takeover: bool,
    pub remote_max_window_bits: u8,
    pub local_max_window_bits: u8,
    pub compress_settings: CompressSettings,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            remote_no_context_takeover: false,
            local_no_context_takeover: false,
            remote_max_window_bits: MAX_WINDOW_BITS,
            local_max_window_bits: MAX_WINDOW_BITS,
            compress_settings: CompressSettings::default(),
        }
    }
}

/// The four recognized parameters, as found in an offer or response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeflateParameters {
    pub server_no_context_takeover: bool,
    pub client_no_context_takeover: bool,
    pub server_max_window_bits: Option<u8>,
    pub client_max_window_bits: Option<ClientWindowBits>,
}

fn check_window_bits(name: &str, bits: u8) -> Result<()> {
    if (MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&bits) {
        Ok(())
    } else {
        Err(WsError::InvalidParameterValue {
            name: name.to_string(),
            value: Some(bits.to_string()),
        })
    }
}

/// Our encoder's window must be one zlib can run
fn check_local_window_bits(name: &str, bits: u8) -> Result<()> {
    check_window_bits(name, bits)?;
    if bits < ZLIB_MIN_WINDOW_BITS {
        return Err(WsError::negotiation(format!(
            "{name}={bits} is below the smallest compression window ({ZLIB_MIN_WINDOW_BITS})"
        )));
    }
    Ok(())
}

fn parse_window_bits(name: &str, value: Option<&str>) -> Result<u8> {
    let invalid = || WsError::InvalidParameterValue {
        name: name.to_string(),
        value: value.map(str::to_string),
    };
    // Only the canonical decimal strings "8".."15" are accepted.
    let text = value.ok_or_else(invalid)?;
    if text.starts_with('0') || text.starts_with('+') {
        return Err(invalid());
    }
    let bits: u8 = text.parse().map_err(|_| invalid())?;
    if !(MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&bits) {
        return Err(invalid());
    }
    Ok(bits)
}

/// Extract compression parameters from an ordered list.
///
/// Each parameter may appear once. `is_offer` allows a valueless
/// `client_max_window_bits`, which is legal only in a client offer.
pub fn extract_parameters(params: &[ExtensionParameter], is_offer: bool) -> Result<DeflateParameters> {
    let mut out = DeflateParameters::default();

    for param in params {
        let name = param.name.as_str();
        let value = param.value.as_deref();
        match name {
            SERVER_NO_CONTEXT_TAKEOVER | CLIENT_NO_CONTEXT_TAKEOVER => {
                let slot = if name == SERVER_NO_CONTEXT_TAKEOVER {
                    &mut out.server_no_context_takeover
                } else {
                    &mut out.client_no_context_takeover
                };
                if *slot {
                    return Err(WsError::DuplicateParameter(name.to_string()));
                }
                if value.is_some() {
                    return Err(WsError::InvalidParameterValue {
                        name: name.to_string(),
                        value: value.map(str::to_string),
                    });
                }
                *slot = true;
            }
            SERVER_MAX_WINDOW_BITS => {
                if out.server_max_window_bits.is_some() {
                    return Err(WsError::DuplicateParameter(name.to_string()));
                }
                out.server_max_window_bits = Some(parse_window_bits(name, value)?);
            }
            CLIENT_MAX_WINDOW_BITS => {
                if out.client_max_window_bits.is_some() {
                    return Err(WsError::DuplicateParameter(name.to_string()));
                }
                out.client_max_window_bits = Some(if is_offer && value.is_none() {
                    ClientWindowBits::Unconstrained
                } else {
                    ClientWindowBits::Max(parse_window_bits(name, value)?)
                });
            }
            _ => return Err(WsError::InvalidParameterName(name.to_string())),
        }
    }

    Ok(out)
}

/// Build the ordered `(name, value)` list for a set of parameters
pub fn build_parameters(params: &DeflateParameters) -> Vec<ExtensionParameter> {
    let mut out = Vec::new();
    if params.server_no_context_takeover {
        out.push(ExtensionParameter::flag(SERVER_NO_CONTEXT_TAKEOVER));
    }
    if params.client_no_context_takeover {
        out.push(ExtensionParameter::flag(CLIENT_NO_CONTEXT_TAKEOVER));
    }
    if let Some(bits) = params.server_max_window_bits {
        out.push(ExtensionParameter::new(SERVER_MAX_WINDOW_BITS, bits.to_string()));
    }
    match params.client_max_window_bits {
        Some(ClientWindowBits::Unconstrained) => {
            out.push(ExtensionParameter::flag(CLIENT_MAX_WINDOW_BITS));
        }
        Some(ClientWindowBits::Max(bits)) => {
            out.push(ExtensionParameter::new(CLIENT_MAX_WINDOW_BITS, bits.to_string()));
        }
        None => {}
    }
    out
}

fn ensure_not_accepted(accepted: &[Box<dyn Extension>], verb: &str) -> Result<()> {
    if accepted.iter().any(|ext| ext.name() == EXTENSION_NAME) {
        return Err(WsError::negotiation(format!("{verb} duplicate {EXTENSION_NAME}")));
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// Client (initiator) side
// ═══════════════════════════════════════════════════════════════════════════

/// Client-side negotiation settings.
///
/// `server_max_window_bits` / `client_max_window_bits` set to `None` are
/// left out of the offer entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientDeflateFactory {
    pub server_no_context_takeover: bool,
    pub client_no_context_takeover: bool,
    pub server_max_window_bits: Option<u8>,
    pub client_max_window_bits: Option<ClientWindowBits>,
    pub compress_settings: CompressSettings,
}

impl Default for ClientDeflateFactory {
    fn default() -> Self {
        Self {
            server_no_context_takeover: false,
            client_no_context_takeover: false,
            server_max_window_bits: None,
            client_max_window_bits: Some(ClientWindowBits::Unconstrained),
            compress_settings: CompressSettings::default(),
        }
    }
}

impl ClientDeflateFactory {
    fn validate(&self) -> Result<()> {
        if let Some(bits) = self.server_max_window_bits {
            check_window_bits(SERVER_MAX_WINDOW_BITS, bits)?;
        }
        if let Some(ClientWindowBits::Max(bits)) = self.client_max_window_bits {
            check_local_window_bits(CLIENT_MAX_WINDOW_BITS, bits)?;
        }
        Ok(())
    }

    /// Parameters to send in the handshake offer
    pub fn request_params(&self) -> Result<Vec<ExtensionParameter>> {
        self.validate()?;
        Ok(build_parameters(&DeflateParameters {
            server_no_context_takeover: self.server_no_context_takeover,
            client_no_context_takeover: self.client_no_context_takeover,
            server_max_window_bits: self.server_max_window_bits,
            client_max_window_bits: self.client_max_window_bits,
        }))
    }

    /// Reconcile the server's response with what was offered
    pub fn process_response_params(
        &self,
        params: &[ExtensionParameter],
        accepted: &[Box<dyn Extension>],
    ) -> Result<PerMessageDeflate> {
        self.validate()?;
        ensure_not_accepted(accepted, "received")?;

        let response = extract_parameters(params, false)?;

        // server_no_context_takeover: the server may add it, never drop it.
        if self.server_no_context_takeover && !response.server_no_context_takeover {
            return Err(WsError::negotiation("expected server_no_context_takeover"));
        }

        // client_no_context_takeover: the server may omit it, we honor it anyway.
        let client_no_context_takeover =
            response.client_no_context_takeover || self.client_no_context_takeover;

        // server_max_window_bits
        if let Some(cap) = self.server_max_window_bits {
            match response.server_max_window_bits {
                None => return Err(WsError::negotiation("expected server_max_window_bits")),
                Some(bits) if bits > cap => {
                    return Err(WsError::negotiation("unsupported server_max_window_bits"))
                }
                Some(_) => {}
            }
        }

        // client_max_window_bits
        let client_max_window_bits = match self.client_max_window_bits {
            None => {
                if response.client_max_window_bits.is_some() {
                    return Err(WsError::negotiation("unexpected client_max_window_bits"));
                }
                None
            }
            Some(ClientWindowBits::Unconstrained) => {
                response.client_max_window_bits.and_then(ClientWindowBits::bits)
            }
            Some(ClientWindowBits::Max(cap)) => match response
                .client_max_window_bits
                .and_then(ClientWindowBits::bits)
            {
                None => Some(cap),
                Some(bits) if bits > cap => {
                    return Err(WsError::negotiation("unsupported client_max_window_bits"))
                }
                Some(bits) => Some(bits),
            },
        };

        let config = CompressionConfig {
            remote_no_context_takeover: response.server_no_context_takeover,
            local_no_context_takeover: client_no_context_takeover,
            remote_max_window_bits: response.server_max_window_bits.unwrap_or(MAX_WINDOW_BITS),
            local_max_window_bits: client_max_window_bits.unwrap_or(MAX_WINDOW_BITS),
            compress_settings: self.compress_settings,
        };
        debug!(?config, "negotiated {} as client", EXTENSION_NAME);
        PerMessageDeflate::new(config)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Server (responder) side
// ═══════════════════════════════════════════════════════════════════════════

/// Server-side negotiation limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDeflateFactory {
    pub server_no_context_takeover: bool,
    pub client_no_context_takeover: bool,
    pub server_max_window_bits: Option<u8>,
    pub client_max_window_bits: Option<u8>,
    pub compress_settings: CompressSettings,
    /// Refuse to enable compression if the client does not advertise
    /// `client_max_window_bits`
    pub require_client_max_window_bits: bool,
}

impl Default for ServerDeflateFactory {
    fn default() -> Self {
        Self {
            server_no_context_takeover: false,
            client_no_context_takeover: false,
            server_max_window_bits: Some(12),
            client_max_window_bits: Some(12),
            compress_settings: CompressSettings::default(),
            require_client_max_window_bits: false,
        }
    }
}

impl ServerDeflateFactory {
    /// Factory with every limit switched off
    pub fn unconstrained() -> Self {
        Self {
            server_max_window_bits: None,
            client_max_window_bits: None,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if let Some(bits) = self.server_max_window_bits {
            check_local_window_bits(SERVER_MAX_WINDOW_BITS, bits)?;
        }
        if let Some(bits) = self.client_max_window_bits {
            check_window_bits(CLIENT_MAX_WINDOW_BITS, bits)?;
        }
        if self.client_max_window_bits.is_none() && self.require_client_max_window_bits {
            return Err(WsError::negotiation(
                "require_client_max_window_bits is enabled, but client_max_window_bits isn't configured",
            ));
        }
        Ok(())
    }

    /// Turn a client offer into response parameters plus the extension
    pub fn process_request_params(
        &self,
        params: &[ExtensionParameter],
        accepted: &[Box<dyn Extension>],
    ) -> Result<(Vec<ExtensionParameter>, PerMessageDeflate)> {
        self.validate()?;
        ensure_not_accepted(accepted, "skipped")?;

        let mut response = extract_parameters(params, true)?;

        // Requiring no context takeover unilaterally is always allowed.
        if self.server_no_context_takeover {
            response.server_no_context_takeover = true;
        }
        if self.client_no_context_takeover {
            response.client_no_context_takeover = true;
        }

        // server_max_window_bits: clamp down to our cap, or impose it.
        if let Some(cap) = self.server_max_window_bits {
            response.server_max_window_bits = Some(match response.server_max_window_bits {
                Some(bits) => bits.min(cap),
                None => cap,
            });
        }

        // client_max_window_bits
        response.client_max_window_bits = match (self.client_max_window_bits, response.client_max_window_bits) {
            (None, Some(ClientWindowBits::Unconstrained)) => None,
            (None, offered) => offered,
            (Some(_), None) => {
                if self.require_client_max_window_bits {
                    return Err(WsError::negotiation("required client_max_window_bits"));
                }
                None
            }
            (Some(cap), Some(ClientWindowBits::Unconstrained)) => Some(ClientWindowBits::Max(cap)),
            (Some(cap), Some(ClientWindowBits::Max(bits))) => {
                Some(ClientWindowBits::Max(bits.min(cap)))
            }
        };

        let config = CompressionConfig {
            remote_no_context_takeover: response.client_no_context_takeover,
            local_no_context_takeover: response.server_no_context_takeover,
            remote_max_window_bits: response
                .client_max_window_bits
                .and_then(ClientWindowBits::bits)
                .unwrap_or(MAX_WINDOW_BITS),
            local_max_window_bits: response.server_max_window_bits.unwrap_or(MAX_WINDOW_BITS),
            compress_settings: self.compress_settings,
        };
        debug!(?config, "negotiated {} as server", EXTENSION_NAME);

        Ok((build_parameters(&response), PerMessageDeflate::new(config)?))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Frame transform
// ═══════════════════════════════════════════════════════════════════════════

/// Negotiated permessage-deflate state for one connection
pub struct PerMessageDeflate {
    config: CompressionConfig,
    encoder: Option<Compress>,
    decoder: Option<Decompress>,
    /// Set while a compressed fragmented message is being received
    decode_cont_data: bool,
}

impl PerMessageDeflate {
    pub fn new(config: CompressionConfig) -> Result<Self> {
        check_window_bits("remote_max_window_bits", config.remote_max_window_bits)?;
        check_local_window_bits("local_max_window_bits", config.local_max_window_bits)?;
        let mut ext = Self {
            config,
            encoder: None,
            decoder: None,
            decode_cont_data: false,
        };
        if !config.remote_no_context_takeover {
            ext.decoder = Some(ext.new_decoder());
        }
        if !config.local_no_context_takeover {
            ext.encoder = Some(ext.new_encoder());
        }
        Ok(ext)
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    fn new_decoder(&self) -> Decompress {
        let bits = self.config.remote_max_window_bits.max(ZLIB_MIN_WINDOW_BITS);
        Decompress::new_with_window_bits(false, bits)
    }

    fn new_encoder(&self) -> Compress {
        Compress::new_with_window_bits(
            self.config.compress_settings.level,
            false,
            self.config.local_max_window_bits,
        )
    }
}

impl std::fmt::Debug for PerMessageDeflate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerMessageDeflate")
            .field("config", &self.config)
            .field("encoder_live", &self.encoder.is_some())
            .field("decoder_live", &self.decoder.is_some())
            .field("decode_cont_data", &self.decode_cont_data)
            .finish()
    }
}

impl Extension for PerMessageDeflate {
    fn name(&self) -> &str {
        EXTENSION_NAME
    }

    fn decode(&mut self, frame: Frame, max_size: Option<usize>) -> Result<Frame> {
        if frame.opcode.is_control() {
            return Ok(frame);
        }

        let frame = if frame.opcode == OpCode::Continuation {
            if !self.decode_cont_data {
                return Ok(frame);
            }
            if frame.fin {
                self.decode_cont_data = false;
            }
            frame
        } else {
            if !frame.rsv1 {
                return Ok(frame);
            }
            if !frame.fin {
                self.decode_cont_data = true;
            }
            if self.config.remote_no_context_takeover {
                self.decoder = None;
            }
            frame.with_rsv1(false)
        };

        let mut frame = frame;
        let fin = frame.fin;
        let mut data = std::mem::take(&mut frame.payload);
        if fin {
            data.extend_from_slice(&EMPTY_UNCOMPRESSED_BLOCK);
        }

        if self.decoder.is_none() {
            self.decoder = Some(self.new_decoder());
        }
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| WsError::protocol("decompressor unavailable"))?;
        let inflated = inflate(decoder, &data, max_size)?;
        INFLATE_BYTES_OUT.inc_by(inflated.len() as u64);

        if fin && self.config.remote_no_context_takeover {
            self.decoder = None;
        }

        Ok(frame.with_payload(inflated))
    }

    fn encode(&mut self, frame: Frame) -> Result<Frame> {
        if frame.opcode.is_control() {
            return Ok(frame);
        }

        let frame = if frame.opcode != OpCode::Continuation {
            if self.config.local_no_context_takeover {
                self.encoder = None;
            }
            frame.with_rsv1(true)
        } else {
            frame
        };

        if self.encoder.is_none() {
            self.encoder = Some(self.new_encoder());
        }
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| WsError::protocol("compressor unavailable"))?;
        let mut data = deflate(encoder, &frame.payload)?;
        if frame.fin && data.ends_with(&EMPTY_UNCOMPRESSED_BLOCK) {
            data.truncate(data.len() - EMPTY_UNCOMPRESSED_BLOCK.len());
        }
        DEFLATE_BYTES_IN.inc_by(frame.payload.len() as u64);
        DEFLATE_BYTES_OUT.inc_by(data.len() as u64);

        if frame.fin && self.config.local_no_context_takeover {
            self.encoder = None;
        }

        Ok(frame.with_payload(data))
    }
}

/// Sync-flush `input` through the compressor
fn deflate(encoder: &mut Compress, input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() / 2 + 64);
    let mut consumed = 0usize;
    loop {
        if out.capacity() - out.len() < 64 {
            out.reserve(DEFLATE_CHUNK);
        }
        let before_in = encoder.total_in();
        encoder
            .compress_vec(&input[consumed..], &mut out, FlushCompress::Sync)
            .map_err(|e| WsError::protocol(format!("compression failed: {e}")))?;
        consumed += (encoder.total_in() - before_in) as usize;

        // The flush is complete once zlib stops filling the whole buffer.
        if consumed >= input.len() && out.len() < out.capacity() {
            break;
        }
    }
    Ok(out)
}

/// Decompress `input`, refusing to produce more than `max_size` bytes
fn inflate(decoder: &mut Decompress, input: &[u8], max_size: Option<usize>) -> Result<Vec<u8>> {
    let limit = max_size.unwrap_or(usize::MAX);
    let too_big = || WsError::PayloadTooBig(format!("over size limit (? > {limit} bytes)"));
    let failed = |e: flate2::DecompressError| WsError::protocol(format!("decompression failed: {e}"));

    let mut out = Vec::new();
    let mut consumed = 0usize;

    loop {
        let room = (limit - out.len()).min(INFLATE_CHUNK);
        if room == 0 {
            // At the limit: any further output is over budget, but trailing
            // input that inflates to nothing (block ends, flush markers) is fine.
            let mut spare = [0u8; 1];
            let before_in = decoder.total_in();
            let before_out = decoder.total_out();
            decoder
                .decompress(&input[consumed..], &mut spare, FlushDecompress::Sync)
                .map_err(failed)?;
            if decoder.total_out() > before_out {
                return Err(too_big());
            }
            consumed += (decoder.total_in() - before_in) as usize;
            break;
        }

        let start = out.len();
        out.resize(start + room, 0);
        let before_in = decoder.total_in();
        let before_out = decoder.total_out();
        let status = decoder
            .decompress(&input[consumed..], &mut out[start..], FlushDecompress::Sync)
            .map_err(failed)?;
        let read = (decoder.total_in() - before_in) as usize;
        let written = (decoder.total_out() - before_out) as usize;
        out.truncate(start + written);
        consumed += read;

        if status == Status::StreamEnd {
            break;
        }
        if consumed >= input.len() && written < room {
            break;
        }
        if read == 0 && written == 0 {
            break;
        }
    }

    if consumed < input.len() {
        return Err(too_big());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(name: &str, value: Option<&str>) -> ExtensionParameter {
        ExtensionParameter {
            name: name.to_string(),
            value: value.map(str::to_string),
        }
    }

    fn pair(config: CompressionConfig) -> (PerMessageDeflate, PerMessageDeflate) {
        let mirrored = CompressionConfig {
            remote_no_context_takeover: config.local_no_context_takeover,
            local_no_context_takeover: config.remote_no_context_takeover,
            remote_max_window_bits: config.local_max_window_bits,
            local_max_window_bits: config.remote_max_window_bits,
            compress_settings: config.compress_settings,
        };
        (
            PerMessageDeflate::new(config).unwrap(),
            PerMessageDeflate::new(mirrored).unwrap(),
        )
    }

    // ─── parameter extraction ────────────────────────────────────────────

    #[test]
    fn test_extract_parameters() {
        let params = vec![
            p("server_no_context_takeover", None),
            p("client_no_context_takeover", None),
            p("server_max_window_bits", Some("10")),
            p("client_max_window_bits", Some("9")),
        ];
        let out = extract_parameters(&params, false).unwrap();
        assert_eq!(
            out,
            DeflateParameters {
                server_no_context_takeover: true,
                client_no_context_takeover: true,
                server_max_window_bits: Some(10),
                client_max_window_bits: Some(ClientWindowBits::Max(9)),
            }
        );
        assert_eq!(build_parameters(&out), params);
    }

    #[test]
    fn test_extract_rejects_malformed_input() {
        let cases: Vec<(Vec<ExtensionParameter>, bool, &str)> = vec![
            (vec![p("server_no_context_takeover", None), p("server_no_context_takeover", None)], true, "duplicate"),
            (vec![p("client_max_window_bits", Some("9")), p("client_max_window_bits", None)], true, "duplicate"),
            (vec![p("server_max_window_bits", Some("9")), p("server_max_window_bits", Some("9"))], true, "duplicate"),
            (vec![p("client_no_context_takeover", Some("1"))], true, "value"),
            (vec![p("server_max_window_bits", Some("7"))], true, "value"),
            (vec![p("server_max_window_bits", Some("16"))], true, "value"),
            (vec![p("server_max_window_bits", Some("09"))], true, "value"),
            (vec![p("server_max_window_bits", None)], true, "value"),
            (vec![p("client_max_window_bits", None)], false, "value"),
            (vec![p("client_max_window_bits", Some("x"))], true, "value"),
            (vec![p("unknown", None)], true, "name"),
        ];
        for (params, is_offer, kind) in cases {
            let err = extract_parameters(&params, is_offer).unwrap_err();
            let ok = match kind {
                "duplicate" => matches!(err, WsError::DuplicateParameter(_)),
                "value" => matches!(err, WsError::InvalidParameterValue { .. }),
                "name" => matches!(err, WsError::InvalidParameterName(_)),
                _ => false,
            };
            assert!(ok, "{:?} (offer={}) gave {:?}", params, is_offer, err);
        }
    }

    #[test]
    fn test_valueless_client_window_bits_only_in_offer() {
        let params = vec![p("client_max_window_bits", None)];
        assert_eq!(
            extract_parameters(&params, true).unwrap().client_max_window_bits,
            Some(ClientWindowBits::Unconstrained)
        );
    }

    // ─── client side ─────────────────────────────────────────────────────

    #[test]
    fn test_default_client_offer() {
        let params = ClientDeflateFactory::default().request_params().unwrap();
        assert_eq!(params, vec![p("client_max_window_bits", None)]);
    }

    #[test]
    fn test_client_no_context_takeover_matrix() {
        // (required by client, present in response) -> Ok(resolved) | Err
        let server_cases = [
            (false, false, Some(false)),
            (false, true, Some(true)),
            (true, false, None),
            (true, true, Some(true)),
        ];
        for (required, present, expected) in server_cases {
            let factory = ClientDeflateFactory {
                server_no_context_takeover: required,
                ..ClientDeflateFactory::default()
            };
            let response = if present {
                vec![p("server_no_context_takeover", None)]
            } else {
                vec![]
            };
            let result = factory.process_response_params(&response, &[]);
            match expected {
                Some(value) => assert_eq!(
                    result.unwrap().config().remote_no_context_takeover,
                    value
                ),
                None => assert!(matches!(result, Err(WsError::Negotiation(_)))),
            }
        }

        let client_cases = [(false, false, false), (false, true, true), (true, false, true), (true, true, true)];
        for (required, present, expected) in client_cases {
            let factory = ClientDeflateFactory {
                client_no_context_takeover: required,
                ..ClientDeflateFactory::default()
            };
            let response = if present {
                vec![p("client_no_context_takeover", None)]
            } else {
                vec![]
            };
            let ext = factory.process_response_params(&response, &[]).unwrap();
            assert_eq!(ext.config().local_no_context_takeover, expected);
        }
    }

    #[test]
    fn test_client_server_max_window_bits_matrix() {
        // (offered cap, response value) -> resolved remote bits or error
        let cases: [(Option<u8>, Option<&str>, Option<u8>); 6] = [
            (None, None, Some(15)),
            (None, Some("10"), Some(10)),
            (Some(12), None, None),
            (Some(12), Some("12"), Some(12)),
            (Some(12), Some("9"), Some(9)),
            (Some(12), Some("13"), None),
        ];
        for (cap, value, expected) in cases {
            let factory = ClientDeflateFactory {
                server_max_window_bits: cap,
                ..ClientDeflateFactory::default()
            };
            let response: Vec<_> = value
                .map(|v| vec![p("server_max_window_bits", Some(v))])
                .unwrap_or_default();
            let result = factory.process_response_params(&response, &[]);
            match expected {
                Some(bits) => assert_eq!(result.unwrap().config().remote_max_window_bits, bits),
                None => assert!(
                    matches!(result, Err(WsError::Negotiation(_))),
                    "cap={:?} value={:?}",
                    cap,
                    value
                ),
            }
        }
    }

    #[test]
    fn test_client_client_max_window_bits_matrix() {
        use ClientWindowBits::*;
        // (offered, response value) -> resolved local bits or error
        let cases: [(Option<ClientWindowBits>, Option<&str>, Option<u8>); 7] = [
            (None, None, Some(15)),
            (None, Some("10"), None),
            (Some(Unconstrained), None, Some(15)),
            (Some(Unconstrained), Some("10"), Some(10)),
            (Some(Max(12)), None, Some(12)),
            (Some(Max(12)), Some("10"), Some(10)),
            (Some(Max(12)), Some("13"), None),
        ];
        for (offered, value, expected) in cases {
            let factory = ClientDeflateFactory {
                client_max_window_bits: offered,
                ..ClientDeflateFactory::default()
            };
            let response: Vec<_> = value
                .map(|v| vec![p("client_max_window_bits", Some(v))])
                .unwrap_or_default();
            let result = factory.process_response_params(&response, &[]);
            match expected {
                Some(bits) => assert_eq!(result.unwrap().config().local_max_window_bits, bits),
                None => assert!(
                    matches!(result, Err(WsError::Negotiation(_))),
                    "offered={:?} value={:?}",
                    offered,
                    value
                ),
            }
        }
    }

    #[test]
    fn test_client_rejects_duplicate_extension() {
        let accepted: Vec<Box<dyn Extension>> =
            vec![Box::new(PerMessageDeflate::new(CompressionConfig::default()).unwrap())];
        let result = ClientDeflateFactory::default().process_response_params(&[], &accepted);
        assert!(matches!(result, Err(WsError::Negotiation(_))));
    }

    #[test]
    fn test_client_factory_validates_bits() {
        let factory = ClientDeflateFactory {
            server_max_window_bits: Some(16),
            ..ClientDeflateFactory::default()
        };
        assert!(factory.request_params().is_err());
    }

    // ─── server side ─────────────────────────────────────────────────────

    #[test]
    fn test_server_no_context_takeover_matrix() {
        // (config, offered) -> response flag
        let cases = [(false, false, false), (false, true, true), (true, false, true), (true, true, true)];
        for (config, offered, expected) in cases {
            let factory = ServerDeflateFactory {
                server_no_context_takeover: config,
                client_no_context_takeover: config,
                ..ServerDeflateFactory::unconstrained()
            };
            let offer = if offered {
                vec![p("server_no_context_takeover", None), p("client_no_context_takeover", None)]
            } else {
                vec![]
            };
            let (response, ext) = factory.process_request_params(&offer, &[]).unwrap();
            let params = extract_parameters(&response, false).unwrap();
            assert_eq!(params.server_no_context_takeover, expected);
            assert_eq!(params.client_no_context_takeover, expected);
            assert_eq!(ext.config().local_no_context_takeover, expected);
            assert_eq!(ext.config().remote_no_context_takeover, expected);
        }
    }

    #[test]
    fn test_server_server_max_window_bits_matrix() {
        // (config cap, offered) -> response value
        let cases: [(Option<u8>, Option<&str>, Option<u8>); 5] = [
            (None, None, None),
            (None, Some("10"), Some(10)),
            (Some(12), None, Some(12)),
            (Some(12), Some("10"), Some(10)),
            (Some(12), Some("14"), Some(12)),
        ];
        for (cap, offered, expected) in cases {
            let factory = ServerDeflateFactory {
                server_max_window_bits: cap,
                ..ServerDeflateFactory::unconstrained()
            };
            let offer: Vec<_> = offered
                .map(|v| vec![p("server_max_window_bits", Some(v))])
                .unwrap_or_default();
            let (response, ext) = factory.process_request_params(&offer, &[]).unwrap();
            let params = extract_parameters(&response, false).unwrap();
            assert_eq!(params.server_max_window_bits, expected);
            assert_eq!(ext.config().local_max_window_bits, expected.unwrap_or(15));
        }
    }

    #[test]
    fn test_server_client_max_window_bits_matrix() {
        // (config cap, required, offered) -> Ok(response value) | Err
        let cases: [(Option<u8>, bool, Option<Option<&str>>, std::result::Result<Option<u8>, ()>); 8] = [
            (None, false, None, Ok(None)),
            (None, false, Some(None), Ok(None)),
            (None, false, Some(Some("10")), Ok(Some(10))),
            (Some(12), false, None, Ok(None)),
            (Some(12), true, None, Err(())),
            (Some(12), false, Some(None), Ok(Some(12))),
            (Some(12), false, Some(Some("10")), Ok(Some(10))),
            (Some(12), false, Some(Some("14")), Ok(Some(12))),
        ];
        for (cap, required, offered, expected) in cases {
            let factory = ServerDeflateFactory {
                client_max_window_bits: cap,
                require_client_max_window_bits: required,
                ..ServerDeflateFactory::unconstrained()
            };
            let offer: Vec<_> = offered
                .map(|v| vec![p("client_max_window_bits", v)])
                .unwrap_or_default();
            let result = factory.process_request_params(&offer, &[]);
            match expected {
                Ok(bits) => {
                    let (response, ext) = result.unwrap();
                    let params = extract_parameters(&response, false).unwrap();
                    assert_eq!(
                        params.client_max_window_bits,
                        bits.map(ClientWindowBits::Max),
                        "cap={:?} offered={:?}",
                        cap,
                        offered
                    );
                    assert_eq!(ext.config().remote_max_window_bits, bits.unwrap_or(15));
                }
                Err(()) => assert!(matches!(result, Err(WsError::Negotiation(_)))),
            }
        }
    }

    #[test]
    fn test_server_rejects_require_without_cap() {
        let factory = ServerDeflateFactory {
            client_max_window_bits: None,
            require_client_max_window_bits: true,
            ..ServerDeflateFactory::unconstrained()
        };
        assert!(factory.process_request_params(&[], &[]).is_err());
    }

    #[test]
    fn test_full_negotiation_between_factories() {
        let client = ClientDeflateFactory {
            client_no_context_takeover: true,
            ..ClientDeflateFactory::default()
        };
        let server = ServerDeflateFactory::default();

        let offer = client.request_params().unwrap();
        let (response, mut server_ext) = server.process_request_params(&offer, &[]).unwrap();
        let mut client_ext = client.process_response_params(&response, &[]).unwrap();

        assert_eq!(client_ext.config().local_max_window_bits, 12);
        assert_eq!(client_ext.config().remote_max_window_bits, 12);
        assert!(client_ext.config().local_no_context_takeover);
        assert!(server_ext.config().remote_no_context_takeover);

        let message = b"negotiated both ways ".repeat(20);
        let encoded = client_ext.encode(Frame::text(message.clone())).unwrap();
        let decoded = server_ext.decode(encoded, None).unwrap();
        assert_eq!(decoded.payload, message);
    }

    // ─── transform ───────────────────────────────────────────────────────

    #[test]
    fn test_single_frame_round_trip() {
        let (mut local, mut remote) = pair(CompressionConfig::default());
        for payload in [&b""[..], b"a", b"Hello, kernel!", &[0u8; 5000][..]] {
            let encoded = local.encode(Frame::text(payload.to_vec())).unwrap();
            assert!(encoded.rsv1);
            assert!(!encoded.payload.ends_with(&EMPTY_UNCOMPRESSED_BLOCK));
            let decoded = remote.decode(encoded, None).unwrap();
            assert!(!decoded.rsv1);
            assert_eq!(decoded.payload, payload);
        }
    }

    #[test]
    fn test_fragmented_round_trip() {
        let (mut local, mut remote) = pair(CompressionConfig::default());
        let parts = [
            Frame::new(OpCode::Text, b"first part, ".to_vec(), false),
            Frame::new(OpCode::Continuation, b"second part, ".to_vec(), false),
            Frame::new(OpCode::Continuation, b"last part".to_vec(), true),
        ];
        for part in parts {
            let expected = part.payload.clone();
            let encoded = local.encode(part).unwrap();
            assert_eq!(encoded.rsv1, encoded.opcode == OpCode::Text);
            let decoded = remote.decode(encoded, None).unwrap();
            assert_eq!(decoded.payload, expected);
        }
        assert!(!remote.decode_cont_data);
    }

    #[test]
    fn test_uncompressed_messages_pass_through() {
        let (_, mut remote) = pair(CompressionConfig::default());
        let first = Frame::new(OpCode::Text, b"plain".to_vec(), false);
        let cont = Frame::new(OpCode::Continuation, b" text".to_vec(), true);
        assert_eq!(remote.decode(first.clone(), None).unwrap(), first);
        assert_eq!(remote.decode(cont.clone(), None).unwrap(), cont);
    }

    #[test]
    fn test_control_frames_untouched() {
        let (mut local, mut remote) = pair(CompressionConfig::default());
        for frame in [Frame::ping("p"), Frame::pong("q"), Frame::close(Some(1000), "bye")] {
            assert_eq!(local.encode(frame.clone()).unwrap(), frame);
            assert_eq!(remote.decode(frame.clone(), None).unwrap(), frame);
        }
    }

    #[test]
    fn test_no_context_takeover_is_independent_of_history() {
        let config = CompressionConfig {
            local_no_context_takeover: true,
            ..CompressionConfig::default()
        };
        let message_a = b"The quick brown fox jumps over the lazy dog. ".repeat(10);
        let message_b = b"The quick brown fox jumps over the lazy cat. ".repeat(10);

        let mut with_history = PerMessageDeflate::new(config).unwrap();
        with_history.encode(Frame::text(message_a)).unwrap();
        assert!(with_history.encoder.is_none());
        let b_after_a = with_history.encode(Frame::text(message_b.clone())).unwrap();

        let mut fresh = PerMessageDeflate::new(config).unwrap();
        let b_alone = fresh.encode(Frame::text(message_b)).unwrap();

        assert_eq!(b_after_a.payload, b_alone.payload);
    }

    #[test]
    fn test_context_takeover_reuses_dictionary() {
        let (mut local, mut remote) = pair(CompressionConfig::default());
        let message = b"The quick brown fox jumps over the lazy dog. ".repeat(10);

        let first = local.encode(Frame::text(message.clone())).unwrap();
        let first_len = first.payload.len();
        remote.decode(first, None).unwrap();

        let second = local.encode(Frame::text(message.clone())).unwrap();
        assert!(second.payload.len() < first_len);
        assert_eq!(remote.decode(second, None).unwrap().payload, message);
    }

    #[test]
    fn test_remote_no_context_takeover_drops_decoder() {
        let (mut sender, mut receiver) = pair(CompressionConfig {
            local_no_context_takeover: true,
            ..CompressionConfig::default()
        });
        assert!(receiver.config().remote_no_context_takeover);
        for _ in 0..3 {
            let encoded = sender.encode(Frame::text("repeat me".as_bytes().to_vec())).unwrap();
            let decoded = receiver.decode(encoded, None).unwrap();
            assert_eq!(decoded.payload, b"repeat me");
            assert!(receiver.decoder.is_none());
        }
    }

    #[test]
    fn test_decompression_respects_max_size() {
        let (mut local, mut remote) = pair(CompressionConfig::default());
        let encoded = local.encode(Frame::binary(vec![0u8; 100_000])).unwrap();
        assert!(encoded.payload.len() < 1_000);
        let result = remote.decode(encoded, Some(1_024));
        assert!(matches!(result, Err(WsError::PayloadTooBig(_))));
    }

    #[test]
    fn test_max_size_exact_fit_is_accepted() {
        let (mut local, mut remote) = pair(CompressionConfig::default());
        let encoded = local.encode(Frame::binary(vec![3u8; 2_048])).unwrap();
        let decoded = remote.decode(encoded, Some(2_048)).unwrap();
        assert_eq!(decoded.payload.len(), 2_048);
    }

    #[test]
    fn test_corrupt_payload_is_protocol_error() {
        let (_, mut remote) = pair(CompressionConfig::default());
        let frame = Frame::text(vec![0xff, 0xff, 0xff, 0xff]).with_rsv1(true);
        assert!(matches!(remote.decode(frame, None), Err(WsError::Protocol(_))));
    }

    #[test]
    fn test_small_windows_round_trip() {
        let (mut local, mut remote) = pair(CompressionConfig {
            local_max_window_bits: 9,
            remote_max_window_bits: 9,
            ..CompressionConfig::default()
        });
        let message = b"window bits nine ".repeat(100);
        let encoded = local.encode(Frame::text(message.clone())).unwrap();
        assert_eq!(remote.decode(encoded, None).unwrap().payload, message);
    }

    #[test]
    fn test_eight_bit_window_is_decode_only() {
        // peer compresses with 8 bits: decoded with a 9-bit window
        let ext = PerMessageDeflate::new(CompressionConfig {
            remote_max_window_bits: 8,
            ..CompressionConfig::default()
        })
        .unwrap();
        assert_eq!(ext.config().remote_max_window_bits, 8);

        let result = PerMessageDeflate::new(CompressionConfig {
            local_max_window_bits: 8,
            ..CompressionConfig::default()
        });
        assert!(matches!(result, Err(WsError::Negotiation(_))));
    }

    #[test]
    fn test_eight_bit_local_window_fails_negotiation() {
        // server pins our encoder to 8 bits
        let response = vec![p("client_max_window_bits", Some("8"))];
        let result = ClientDeflateFactory::default().process_response_params(&response, &[]);
        assert!(matches!(result, Err(WsError::Negotiation(_))));

        // client asks our encoder for 8 bits; the offer is declined
        let offer = vec![p("server_max_window_bits", Some("8"))];
        let result = ServerDeflateFactory::unconstrained().process_request_params(&offer, &[]);
        assert!(matches!(result, Err(WsError::Negotiation(_))));

        // 8 bits for the peer's side stays negotiable
        let offer = vec![p("client_max_window_bits", Some("8"))];
        let (_, ext) = ServerDeflateFactory::unconstrained()
            .process_request_params(&offer, &[])
            .unwrap();
        assert_eq!(ext.config().remote_max_window_bits, 8);

        // a factory configured to compress with 8 bits is rejected up front
        let factory = ClientDeflateFactory {
            client_max_window_bits: Some(ClientWindowBits::Max(8)),
            ..ClientDeflateFactory::default()
        };
        assert!(factory.request_params().is_err());
    }
}
