//! Turn/item event protocol, as emitted by `codex exec --json`.
//!
//! Lifecycle edges on the wire: `thread.started`, then
//! `turn.started`/`turn.completed`/`turn.failed` around one turn, with
//! `item.*` events streaming output and tool activity in between. Items
//! carry an `id` that correlates `item.started` with `item.completed`.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use serde_json::Value;

use commands::{DecodeError, Decoded, Decoder};

use crate::{mint_id, parse_line};

/// Discriminant of one JSONL event line.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
pub enum MessageType {
    #[serde(rename = "thread.started")]
    ThreadStarted,
    #[serde(rename = "turn.started")]
    TurnStarted,
    #[serde(rename = "turn.completed")]
    TurnCompleted,
    #[serde(rename = "turn.failed")]
    TurnFailed,
    #[serde(rename = "item.started")]
    ItemStarted,
    #[serde(rename = "item.updated")]
    ItemUpdated,
    #[serde(rename = "item.completed")]
    ItemCompleted,
    #[serde(rename = "error")]
    Error,
    #[default]
    #[serde(other)]
    Unknown,
}

/// One line of `codex exec --json` output.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Message {
    #[serde(rename = "type", default)]
    pub kind: MessageType,
    /// Only on `thread.started`.
    #[serde(default)]
    pub thread_id: Option<String>,
    /// Carried by `item.*` events.
    #[serde(default)]
    pub item: Option<Item>,
    /// Carried by `turn.completed`.
    #[serde(default)]
    pub usage: Option<Usage>,
    /// Failure text on `turn.failed` and `error`.
    #[serde(default)]
    pub message: Option<String>,
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    AgentMessage,
    Reasoning,
    CommandExecution,
    FileChange,
    McpToolCall,
    WebSearch,
    TodoList,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Work item carried by `item.started`/`item.completed`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Item {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: ItemType,
    /// agent_message / reasoning
    #[serde(default)]
    pub text: String,
    /// command_execution
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub aggregated_output: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub exit_code: i32,
    /// file_change
    #[serde(default)]
    pub changes: Vec<FileChange>,
    /// todo_list
    #[serde(default)]
    pub items: Vec<TodoItem>,
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct FileChange {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub kind: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct TodoItem {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: i64,
    #[serde(default)]
    pub cached_input_tokens: i64,
    #[serde(default)]
    pub output_tokens: i64,
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

/// Folds the turn/item protocol onto the canonical block/content lifecycle.
///
/// The block ID is minted fresh rather than reused from the source thread.
/// Command executions correlate their started and completed halves through
/// `items`; an execution that never completes leaves its entry behind until
/// the decoder is dropped with its session. Plain text and reasoning
/// content is never closed with `ContentEnd`; this protocol has no signal
/// to close it on.
#[derive(Debug, Default)]
pub struct AcpDecoder {
    block_id: Option<String>,
    items: HashMap<String, String>,
}

impl AcpDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn item_events(&mut self, kind: MessageType, item: &Item) -> Vec<acp::Event> {
        let block_id = self.block_id.clone().unwrap_or_default();
        match item.kind {
            ItemType::AgentMessage => {
                let content_id = mint_id();
                vec![
                    acp::Event::content_start(&content_id, block_id),
                    acp::Event::content_delta(content_id, acp::Payload::Text(item.text.clone())),
                ]
            }
            ItemType::Reasoning => {
                let content_id = mint_id();
                vec![
                    acp::Event::content_start(&content_id, block_id),
                    acp::Event::content_delta(
                        content_id,
                        acp::Payload::Thinking(item.text.clone()),
                    ),
                ]
            }
            ItemType::CommandExecution => match kind {
                MessageType::ItemStarted => {
                    let content_id = mint_id();
                    self.items.insert(item.id.clone(), content_id.clone());
                    vec![
                        acp::Event::content_start(&content_id, block_id),
                        acp::Event::content_delta(
                            content_id,
                            acp::Payload::Command(item.command.clone()),
                        ),
                    ]
                }
                MessageType::ItemCompleted => match self.items.remove(&item.id) {
                    Some(content_id) => vec![acp::Event::content_delta(
                        content_id,
                        acp::Payload::CommandResult {
                            output: item.aggregated_output.clone(),
                            exit_code: item.exit_code,
                        },
                    )],
                    // Completion for an execution this decoder never saw
                    // start; tolerate it.
                    None => Vec::new(),
                },
                _ => Vec::new(),
            },
            // file_change, mcp_tool_call, web_search and todo_list have no
            // canonical projection yet.
            _ => Vec::new(),
        }
    }
}

impl Decoder for AcpDecoder {
    type Output = Vec<acp::Event>;

    fn decode(&mut self, line: &[u8]) -> Result<Decoded<Vec<acp::Event>>, DecodeError> {
        let msg: Message = parse_line(line)?;

        let events = match msg.kind {
            MessageType::TurnStarted => {
                if self.block_id.is_some() {
                    return Ok(Decoded::Skip);
                }
                let block_id = mint_id();
                let event = acp::Event::block_start(&block_id);
                self.block_id = Some(block_id);
                vec![event]
            }
            MessageType::TurnCompleted => {
                let usage = msg.usage.map(|usage| acp::Usage {
                    prompt_tokens: usage.input_tokens,
                    completion_tokens: usage.output_tokens,
                });
                vec![acp::Event::block_end(
                    self.block_id.clone().unwrap_or_default(),
                    usage,
                )]
            }
            MessageType::TurnFailed => {
                return Ok(Decoded::Failed {
                    output: Some(vec![acp::Event::block_end(
                        self.block_id.clone().unwrap_or_default(),
                        None,
                    )]),
                    error: DecodeError::TurnFailed(msg.message.unwrap_or_default()),
                });
            }
            MessageType::ItemStarted | MessageType::ItemCompleted => match &msg.item {
                Some(item) => self.item_events(msg.kind, item),
                None => Vec::new(),
            },
            MessageType::ThreadStarted
            | MessageType::ItemUpdated
            | MessageType::Error
            | MessageType::Unknown => Vec::new(),
        };

        if events.is_empty() {
            Ok(Decoded::Skip)
        } else {
            Ok(Decoded::Output(events))
        }
    }
}
