//! Output aggregation for one execution request
//!
//! A sans-IO state machine: both session flavours feed it decoded messages
//! and stop reading as soon as it yields an outcome.
//!
//! ```text
//!   stream ─────────┐
//!   execute_result ─┴─► append to buffer ─┐
//!   status(idle) ──────────────────────────┴─► Text(buffer, truncated)
//!   display_data ──────────────────────────────► Image | Text | Error
//!   error ─────────────────────────────────────► Error("ename: evalue")
//! ```
//!
//! Messages whose parent id does not match the request are ignored.

use serde_json::Value;

use super::message::{InboundMessage, KernelMessage};
use super::ExecutionOutcome;

/// Accumulated text beyond this many characters is cut from the front
pub const OUTPUT_LIMIT: usize = 500;

/// Marker prepended to truncated output
pub const TRUNCATION_MARKER: &str = "[...]\n";

/// Returned when the kernel went idle without producing any output
pub const NO_OUTPUT: &str = "code run successfully (no output)";

/// pip chatter that would otherwise drown real output
const SUPPRESSED_NOISE: &str = "Requirement already satisfied:";

/// Keep only the last [`OUTPUT_LIMIT`] characters, marking the cut
pub fn truncate_output(text: &str) -> String {
    let count = text.chars().count();
    if count <= OUTPUT_LIMIT {
        return text.to_string();
    }
    let start = text
        .char_indices()
        .nth(count - OUTPUT_LIMIT)
        .map(|(i, _)| i)
        .unwrap_or(0);
    format!("{TRUNCATION_MARKER}{}", &text[start..])
}

/// MIME bundle values are strings, or lists of lines in older kernels
fn mime_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => parts
            .iter()
            .map(|part| part.as_str())
            .collect::<Option<Vec<_>>>()
            .map(|parts| parts.concat()),
        _ => None,
    }
}

/// Aggregation state for a single request
#[derive(Debug)]
pub struct OutputAggregator {
    msg_id: String,
    buffer: String,
}

impl OutputAggregator {
    pub fn new(msg_id: impl Into<String>) -> Self {
        Self {
            msg_id: msg_id.into(),
            buffer: String::new(),
        }
    }

    pub fn msg_id(&self) -> &str {
        &self.msg_id
    }

    /// Text accumulated so far
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Feed one message. Returns the outcome once the request is finished.
    pub fn apply(&mut self, msg: &InboundMessage) -> Option<ExecutionOutcome> {
        if !msg.answers(&self.msg_id) {
            return None;
        }

        match &msg.message {
            KernelMessage::Stream { text, .. } => {
                let text = text.trim();
                if !text.contains(SUPPRESSED_NOISE) {
                    self.buffer.push_str(text);
                    self.buffer.push('\n');
                }
                None
            }
            KernelMessage::ExecuteResult { data } => {
                if let Some(text) = data.get("text/plain").and_then(mime_text) {
                    self.buffer.push_str(text.trim());
                    self.buffer.push('\n');
                }
                None
            }
            KernelMessage::DisplayData { data } => {
                if let Some(png) = data.get("image/png").and_then(mime_text) {
                    return Some(ExecutionOutcome::Image(png));
                }
                if let Some(text) = data.get("text/plain").and_then(mime_text) {
                    return Some(ExecutionOutcome::Text(text));
                }
                Some(ExecutionOutcome::Error("Could not parse output".to_string()))
            }
            KernelMessage::Status { execution_state } if execution_state == "idle" => {
                if self.buffer.is_empty() {
                    Some(ExecutionOutcome::Text(NO_OUTPUT.to_string()))
                } else {
                    Some(ExecutionOutcome::Text(truncate_output(&self.buffer)))
                }
            }
            KernelMessage::Status { .. } => None,
            KernelMessage::Error { ename, evalue, .. } => {
                Some(ExecutionOutcome::Error(format!("{ename}: {evalue}")))
            }
        }
    }
}
