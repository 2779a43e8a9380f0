//! Step/part event protocol, as emitted by `opencode run --format json`.
//!
//! Output is organized as parts of a session rather than discrete turns:
//! `step-start` opens work, `text` and `tool` parts carry complete
//! fragments (no partial deltas), and `step-finish` reports per-step token
//! counts plus a finish reason. The session ends when a step finishes with
//! the `stop` reason.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use commands::{DecodeError, Decoded, Decoder};

use crate::{mint_id, parse_line};

pub const FINISH_REASON_STOP: &str = "stop";

/// Discriminant of a part.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum PartType {
    StepStart,
    StepFinish,
    Text,
    Tool,
    #[default]
    #[serde(other)]
    Unknown,
}

/// One line of opencode JSON output.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Message {
    #[serde(rename = "sessionID", alias = "session_id", default)]
    pub session_id: String,
    #[serde(default)]
    pub part: Part,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Part {
    #[serde(rename = "type", default)]
    pub kind: PartType,
    #[serde(rename = "messageID", alias = "message_id", default)]
    pub message_id: String,
    /// text parts
    #[serde(default)]
    pub text: String,
    /// tool parts
    #[serde(default)]
    pub tool: String,
    #[serde(default)]
    pub state: Option<ToolState>,
    /// step-finish parts
    #[serde(default)]
    pub tokens: Option<Tokens>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ToolState {
    #[serde(default)]
    pub status: ToolStatus,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub output: Value,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Error,
    #[serde(other)]
    Unknown,
}

/// Per-step token deltas. Floats on the wire.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct Tokens {
    #[serde(default)]
    pub input: f64,
    #[serde(default)]
    pub output: f64,
    #[serde(default)]
    pub reasoning: f64,
}

/// Surfaces raw typed [`Message`] values without normalization.
#[derive(Debug, Default)]
pub struct MessageDecoder;

impl Decoder for MessageDecoder {
    type Output = Message;

    fn decode(&mut self, line: &[u8]) -> Result<Decoded<Message>, DecodeError> {
        parse_line(line).map(Decoded::Output)
    }
}

/// Folds the step/part protocol onto the canonical lifecycle.
///
/// Every text or tool part arrives complete, so each becomes an atomic
/// start/delta/end group under a freshly minted content ID. Token counts
/// accumulate across `step-finish` parts and become the block's usage when
/// one of them carries the stop reason.
#[derive(Debug, Default)]
pub struct AcpDecoder {
    block_id: Option<String>,
    input_tokens: f64,
    completion_tokens: f64,
}

impl AcpDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Running usage totals observed so far. Non-decreasing over a session.
    pub fn usage(&self) -> acp::Usage {
        acp::Usage {
            prompt_tokens: self.input_tokens as i64,
            completion_tokens: self.completion_tokens as i64,
        }
    }
}

impl Decoder for AcpDecoder {
    type Output = Vec<acp::Event>;

    fn decode(&mut self, line: &[u8]) -> Result<Decoded<Vec<acp::Event>>, DecodeError> {
        let msg: Message = parse_line(line)?;
        let mut events = Vec::new();

        match msg.part.kind {
            PartType::StepStart => {
                if self.block_id.is_none() {
                    self.block_id = Some(msg.session_id.clone());
                    events.push(acp::Event::block_start(msg.session_id));
                }
            }
            PartType::Text => {
                let content_id = mint_id();
                events.push(acp::Event::content_start(
                    &content_id,
                    self.block_id.clone().unwrap_or_default(),
                ));
                events.push(acp::Event::content_delta(
                    &content_id,
                    acp::Payload::Text(msg.part.text),
                ));
                events.push(acp::Event::content_end(content_id));
            }
            PartType::Tool => {
                let Some(state) = msg.part.state else {
                    return Err(DecodeError::Parse {
                        line: String::from_utf8_lossy(line).into_owned(),
                        message: "tool part missing state".to_string(),
                    });
                };
                if state.status == ToolStatus::Completed {
                    let content_id = mint_id();
                    events.push(acp::Event::content_start(
                        &content_id,
                        self.block_id.clone().unwrap_or_default(),
                    ));
                    events.push(acp::Event::content_delta(
                        &content_id,
                        acp::Payload::ToolCall(msg.part.tool),
                    ));
                    events.push(acp::Event::content_delta(
                        &content_id,
                        acp::Payload::ToolArgs(state.input),
                    ));
                    events.push(acp::Event::content_delta(
                        &content_id,
                        acp::Payload::ToolResult(state.output),
                    ));
                    events.push(acp::Event::content_end(content_id));
                }
            }
            PartType::StepFinish => {
                if let Some(tokens) = msg.part.tokens {
                    self.input_tokens += tokens.input;
                    self.completion_tokens += tokens.output + tokens.reasoning;
                }
                if msg.part.reason.as_deref() == Some(FINISH_REASON_STOP) {
                    events.push(acp::Event::block_end(
                        self.block_id.clone().unwrap_or_default(),
                        Some(self.usage()),
                    ));
                }
            }
            PartType::Unknown => {}
        }

        if events.is_empty() {
            Ok(Decoded::Skip)
        } else {
            Ok(Decoded::Output(events))
        }
    }
}
