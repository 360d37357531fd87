//! Extension plumbing shared by every negotiated WebSocket extension
//!
//! An extension is a per-connection frame transform. Parameters travel in
//! the `Sec-WebSocket-Extensions` header as an ordered list of
//! `name[=value]` pairs, e.g.
//!
//! ```text
//! permessage-deflate; client_max_window_bits; server_max_window_bits=12
//! ```

use std::fmt;

use super::error::{Result, WsError};
use super::frame::Frame;

/// One `name[=value]` pair from an extension offer or response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionParameter {
    pub name: String,
    pub value: Option<String>,
}

impl ExtensionParameter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// Parameter without a value
    pub fn flag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

impl fmt::Display for ExtensionParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={}", self.name, value),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A negotiated, stateful frame transform bound to one connection.
///
/// Implementations are not shared between connections or threads; the
/// connection owning them drives encode and decode sequentially.
pub trait Extension: Send {
    /// Registered extension name, e.g. `permessage-deflate`
    fn name(&self) -> &str;

    /// Transform an incoming frame. `max_size` bounds any expansion.
    fn decode(&mut self, frame: Frame, max_size: Option<usize>) -> Result<Frame>;

    /// Transform an outgoing frame
    fn encode(&mut self, frame: Frame) -> Result<Frame>;
}

/// Render `name; p1; p2=v` for a request or response header
pub fn format_extension(name: &str, params: &[ExtensionParameter]) -> String {
    let mut out = name.to_string();
    for param in params {
        out.push_str("; ");
        out.push_str(&param.to_string());
    }
    out
}

/// Parse a `Sec-WebSocket-Extensions` header value into
/// `(extension name, parameters)` entries, in order.
pub fn parse_extension_header(header: &str) -> Result<Vec<(String, Vec<ExtensionParameter>)>> {
    let mut extensions = Vec::new();
    for entry in header.split(',') {
        let mut parts = entry.split(';').map(str::trim);
        let name = match parts.next() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => continue,
        };
        let mut params = Vec::new();
        for part in parts {
            if part.is_empty() {
                continue;
            }
            let param = match part.split_once('=') {
                Some((key, value)) => {
                    let value = value.trim().trim_matches('"');
                    if value.is_empty() {
                        return Err(WsError::InvalidParameterValue {
                            name: key.trim().to_string(),
                            value: Some(String::new()),
                        });
                    }
                    ExtensionParameter::new(key.trim(), value)
                }
                None => ExtensionParameter::flag(part),
            };
            params.push(param);
        }
        extensions.push((name, params));
    }
    Ok(extensions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_extension() {
        let header = format_extension(
            "permessage-deflate",
            &[
                ExtensionParameter::flag("client_max_window_bits"),
                ExtensionParameter::new("server_max_window_bits", "12"),
            ],
        );
        assert_eq!(
            header,
            "permessage-deflate; client_max_window_bits; server_max_window_bits=12"
        );
    }

    #[test]
    fn test_parse_extension_header() {
        let parsed = parse_extension_header(
            "permessage-deflate; server_no_context_takeover; client_max_window_bits=\"10\", x-other",
        )
        .unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].0, "permessage-deflate");
        assert_eq!(
            parsed[0].1,
            vec![
                ExtensionParameter::flag("server_no_context_takeover"),
                ExtensionParameter::new("client_max_window_bits", "10"),
            ]
        );
        assert_eq!(parsed[1], ("x-other".to_string(), vec![]));
    }

    #[test]
    fn test_parse_empty_value_rejected() {
        assert!(parse_extension_header("permessage-deflate; server_max_window_bits=").is_err());
    }
}
