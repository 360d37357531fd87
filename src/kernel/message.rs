//! Jupyter messaging wire types
//!
//! Only the subset a code-execution client needs: the `execute_request`
//! we send on the shell channel and the iopub messages that carry its
//! output back.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Errors turning a received text message into a [`InboundMessage`]
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed kernel message: {0}")]
    Json(#[from] serde_json::Error),

    /// A well-formed message of a type this client does not consume
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
struct RequestHeader {
    msg_id: String,
    msg_type: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct ExecuteContent {
    code: String,
    silent: bool,
    store_history: bool,
    user_expressions: Map<String, Value>,
    allow_stdin: bool,
    stop_on_error: bool,
}

/// `execute_request` envelope sent on the shell channel
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteRequest {
    header: RequestHeader,
    parent_header: Map<String, Value>,
    metadata: Map<String, Value>,
    content: ExecuteContent,
    channel: &'static str,
    buffers: Vec<Value>,
}

impl ExecuteRequest {
    /// Build a request for `code` under a fresh correlation id
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            header: RequestHeader {
                msg_id: Uuid::new_v4().simple().to_string(),
                msg_type: "execute_request",
            },
            parent_header: Map::new(),
            metadata: Map::new(),
            content: ExecuteContent {
                code: code.into(),
                silent: false,
                store_history: true,
                user_expressions: Map::new(),
                allow_stdin: false,
                stop_on_error: true,
            },
            channel: "shell",
            buffers: Vec::new(),
        }
    }

    /// Correlation id that replies carry as `parent_header.msg_id`
    pub fn msg_id(&self) -> &str {
        &self.header.msg_id
    }

    pub fn code(&self) -> &str {
        &self.content.code
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawHeader {
    msg_type: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawParentHeader {
    #[serde(default)]
    msg_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    header: RawHeader,
    #[serde(default)]
    parent_header: RawParentHeader,
    #[serde(default)]
    content: Value,
}

/// Content of the message types the aggregator understands
#[derive(Debug, Clone, PartialEq)]
pub enum KernelMessage {
    /// `stream`: stdout/stderr text
    Stream { name: String, text: String },
    /// `execute_result`: value of the last expression, keyed by MIME type
    ExecuteResult { data: HashMap<String, Value> },
    /// `display_data`: rich output such as plots, keyed by MIME type
    DisplayData { data: HashMap<String, Value> },
    /// `status`: `busy`, `idle` or `starting`
    Status { execution_state: String },
    /// `error`: an exception raised by the executed code
    Error {
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },
}

#[derive(Deserialize)]
struct StreamContent {
    #[serde(default)]
    name: String,
    text: String,
}

#[derive(Deserialize)]
struct DataContent {
    #[serde(default)]
    data: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct StatusContent {
    execution_state: String,
}

#[derive(Deserialize)]
struct ErrorContent {
    ename: String,
    evalue: String,
    #[serde(default)]
    traceback: Vec<String>,
}

/// A decoded iopub message together with the request it answers
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub parent_id: Option<String>,
    pub message: KernelMessage,
}

impl InboundMessage {
    /// Decode one JSON text message.
    ///
    /// Message types other than the five in [`KernelMessage`] are reported
    /// as [`DecodeError::UnknownMessageType`] so the caller decides whether
    /// to skip them.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let raw: RawMessage = serde_json::from_str(text)?;
        let content = raw.content;
        let message = match raw.header.msg_type.as_str() {
            "stream" => {
                let c: StreamContent = serde_json::from_value(content)?;
                KernelMessage::Stream {
                    name: c.name,
                    text: c.text,
                }
            }
            "execute_result" => {
                let c: DataContent = serde_json::from_value(content)?;
                KernelMessage::ExecuteResult { data: c.data }
            }
            "display_data" => {
                let c: DataContent = serde_json::from_value(content)?;
                KernelMessage::DisplayData { data: c.data }
            }
            "status" => {
                let c: StatusContent = serde_json::from_value(content)?;
                KernelMessage::Status {
                    execution_state: c.execution_state,
                }
            }
            "error" => {
                let c: ErrorContent = serde_json::from_value(content)?;
                KernelMessage::Error {
                    ename: c.ename,
                    evalue: c.evalue,
                    traceback: c.traceback,
                }
            }
            other => return Err(DecodeError::UnknownMessageType(other.to_string())),
        };
        Ok(Self {
            parent_id: raw.parent_header.msg_id,
            message,
        })
    }

    /// Whether this message answers the request with id `msg_id`
    pub fn answers(&self, msg_id: &str) -> bool {
        self.parent_id.as_deref() == Some(msg_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_execute_request_shape() {
        let request = ExecuteRequest::new("print(1)");
        let value: Value = serde_json::from_str(&request.to_json().unwrap()).unwrap();

        assert_eq!(value["header"]["msg_type"], "execute_request");
        assert_eq!(value["header"]["msg_id"], request.msg_id());
        assert_eq!(request.msg_id().len(), 32);
        assert_eq!(value["parent_header"], json!({}));
        assert_eq!(value["metadata"], json!({}));
        assert_eq!(
            value["content"],
            json!({
                "code": "print(1)",
                "silent": false,
                "store_history": true,
                "user_expressions": {},
                "allow_stdin": false,
                "stop_on_error": true,
            })
        );
        assert_eq!(value["channel"], "shell");
        assert_eq!(value["buffers"], json!([]));
    }

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(ExecuteRequest::new("x").msg_id(), ExecuteRequest::new("x").msg_id());
    }

    #[test]
    fn test_decode_stream() {
        let text = json!({
            "header": {"msg_type": "stream", "msg_id": "m1"},
            "parent_header": {"msg_id": "req"},
            "content": {"name": "stdout", "text": "hi\n"},
        })
        .to_string();
        let msg = InboundMessage::decode(&text).unwrap();
        assert!(msg.answers("req"));
        assert_eq!(
            msg.message,
            KernelMessage::Stream {
                name: "stdout".into(),
                text: "hi\n".into()
            }
        );
    }

    #[test]
    fn test_decode_error_without_traceback() {
        let text = json!({
            "header": {"msg_type": "error"},
            "parent_header": {"msg_id": "req"},
            "content": {"ename": "ValueError", "evalue": "bad"},
        })
        .to_string();
        match InboundMessage::decode(&text).unwrap().message {
            KernelMessage::Error { ename, evalue, traceback } => {
                assert_eq!(ename, "ValueError");
                assert_eq!(evalue, "bad");
                assert!(traceback.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_empty_parent_header() {
        let text = json!({
            "header": {"msg_type": "status"},
            "parent_header": {},
            "content": {"execution_state": "starting"},
        })
        .to_string();
        let msg = InboundMessage::decode(&text).unwrap();
        assert_eq!(msg.parent_id, None);
        assert!(!msg.answers("req"));
    }

    #[test]
    fn test_unknown_type_is_explicit() {
        let text = json!({
            "header": {"msg_type": "execute_input"},
            "parent_header": {"msg_id": "req"},
            "content": {"code": "1"},
        })
        .to_string();
        assert!(matches!(
            InboundMessage::decode(&text),
            Err(DecodeError::UnknownMessageType(t)) if t == "execute_input"
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(InboundMessage::decode("{not json"), Err(DecodeError::Json(_))));
        let missing_text = json!({
            "header": {"msg_type": "stream"},
            "content": {"name": "stdout"},
        })
        .to_string();
        assert!(matches!(InboundMessage::decode(&missing_text), Err(DecodeError::Json(_))));
    }
}
