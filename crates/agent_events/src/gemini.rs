//! Init/message/tool event protocol, as emitted by
//! `gemini --output-format stream-json`.
//!
//! The wire shape is one flat object per line discriminated by `type`:
//! `init` carries the session, `message` streams role-tagged text,
//! `tool_use`/`tool_result` bracket tool activity by `tool_id`, `result`
//! closes the turn with stats, and `error` reports a backend fault.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use serde_json::{Map, Value};

use commands::{DecodeError, Decoded, Decoder};

use crate::{mint_id, parse_line};

pub const TOOL_SHELL_COMMAND: &str = "run_shell_command";
pub const TOOL_WEB_SEARCH: &str = "google_web_search";

pub const ROLE_ASSISTANT: &str = "assistant";

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_ERROR: &str = "error";

/// Discriminant of one JSONL message line.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Init,
    Message,
    ToolUse,
    ToolResult,
    Result,
    Error,
    #[default]
    #[serde(other)]
    Unknown,
}

/// One line of gemini stream-json output. Fields are populated per type;
/// everything is optional on the wire.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Message {
    #[serde(rename = "type", default)]
    pub kind: MessageType,
    #[serde(default)]
    pub timestamp: Option<String>,
    /// init
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// message
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub delta: bool,
    /// tool_use
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_id: Option<String>,
    #[serde(default)]
    pub parameters: Option<Map<String, Value>>,
    /// tool_result
    #[serde(default)]
    pub output: Option<String>,
    /// result
    #[serde(default)]
    pub stats: Option<Stats>,
    /// tool_result and result
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<ErrorInfo>,
    /// error
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct Stats {
    #[serde(default)]
    pub total_tokens: i64,
    #[serde(default)]
    pub input_tokens: i64,
    #[serde(default)]
    pub output_tokens: i64,
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default)]
    pub tool_calls: i64,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub message: String,
}

impl ErrorInfo {
    fn to_acp(&self) -> acp::Error {
        acp::Error {
            kind: self.kind.clone(),
            message: self.message.clone(),
        }
    }
}

/// Payload of a successful `google_web_search` tool result.
#[derive(Debug, Default, Deserialize)]
struct SearchOutput {
    #[serde(default)]
    answer: String,
    #[serde(default)]
    results: Vec<acp::SearchResult>,
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

/// Folds the init/message/tool protocol onto the canonical lifecycle.
///
/// The session ID from `init` becomes the block ID. `content_id` tracks the
/// one open primary text stream; tool activity closes it before opening its
/// own bracketed content. `tool_calls` bridges a `tool_use` to its
/// `tool_result` by the source tool ID; entries are removed on completion,
/// and a call that never completes leaves its entry until the decoder is
/// dropped with its session.
#[derive(Debug, Default)]
pub struct AcpDecoder {
    session_id: String,
    content_id: Option<String>,
    tool_calls: HashMap<String, ToolCall>,
}

#[derive(Clone, Debug)]
struct ToolCall {
    content_id: String,
    tool_name: String,
}

impl AcpDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn flush_open_content(&mut self, events: &mut Vec<acp::Event>) {
        if let Some(content_id) = self.content_id.take() {
            events.push(acp::Event::content_end(content_id));
        }
    }

    fn tool_use(&mut self, msg: &Message, events: &mut Vec<acp::Event>) -> Result<(), DecodeError> {
        self.flush_open_content(events);

        let tool_id = msg.tool_id.clone().unwrap_or_default();
        let call = match self.tool_calls.get(&tool_id) {
            Some(call) => call.clone(),
            None => {
                let call = ToolCall {
                    content_id: mint_id(),
                    tool_name: msg.tool_name.clone().unwrap_or_default(),
                };
                self.tool_calls.insert(tool_id, call.clone());
                call
            }
        };

        events.push(acp::Event::content_start(&call.content_id, &self.session_id));

        let empty = Map::new();
        let parameters = msg.parameters.as_ref().unwrap_or(&empty);
        match call.tool_name.as_str() {
            TOOL_SHELL_COMMAND => {
                let Some(command) = parameters.get("command").and_then(Value::as_str) else {
                    return Err(DecodeError::InvalidToolParameters {
                        tool: TOOL_SHELL_COMMAND,
                        parameter: "command",
                    });
                };
                events.push(acp::Event::content_delta(
                    call.content_id,
                    acp::Payload::Command(command.to_string()),
                ));
            }
            TOOL_WEB_SEARCH => {
                let Some(query) = parameters.get("query").and_then(Value::as_str) else {
                    return Err(DecodeError::InvalidToolParameters {
                        tool: TOOL_WEB_SEARCH,
                        parameter: "query",
                    });
                };
                events.push(acp::Event::content_delta(
                    call.content_id,
                    acp::Payload::WebSearchQuery(query.to_string()),
                ));
            }
            _ => {
                events.push(acp::Event::content_delta(
                    &call.content_id,
                    acp::Payload::ToolCall(call.tool_name.clone()),
                ));
                events.push(acp::Event::content_delta(
                    call.content_id,
                    acp::Payload::ToolArgs(Value::Object(parameters.clone())),
                ));
            }
        }
        Ok(())
    }

    fn tool_result(
        &mut self,
        msg: &Message,
        events: &mut Vec<acp::Event>,
    ) -> Result<(), DecodeError> {
        let tool_id = msg.tool_id.clone().unwrap_or_default();
        let Some(call) = self.tool_calls.get(&tool_id).cloned() else {
            // Result for a call this decoder never saw start; tolerate
            // duplicated or out-of-order completions.
            return Ok(());
        };

        let output = msg.output.clone().unwrap_or_default();
        let payload = match call.tool_name.as_str() {
            TOOL_SHELL_COMMAND => match &msg.error {
                Some(error) => acp::Payload::CommandError(error.to_acp()),
                None => acp::Payload::CommandResult {
                    output,
                    exit_code: 0,
                },
            },
            TOOL_WEB_SEARCH => match &msg.error {
                Some(error) => acp::Payload::WebSearchError(error.to_acp()),
                None => {
                    let search: SearchOutput =
                        serde_json::from_str(&output).map_err(|err| DecodeError::Parse {
                            line: output.clone(),
                            message: err.to_string(),
                        })?;
                    acp::Payload::WebSearchResult {
                        answer: search.answer,
                        results: search.results,
                    }
                }
            },
            _ => match &msg.error {
                Some(error) => acp::Payload::ToolError(error.to_acp()),
                None => acp::Payload::ToolResult(Value::String(output)),
            },
        };

        events.push(acp::Event::content_delta(&call.content_id, payload));
        events.push(acp::Event::content_end(call.content_id));
        self.tool_calls.remove(&tool_id);
        Ok(())
    }
}

impl Decoder for AcpDecoder {
    type Output = Vec<acp::Event>;

    fn decode(&mut self, line: &[u8]) -> Result<Decoded<Vec<acp::Event>>, DecodeError> {
        let msg: Message = parse_line(line)?;
        let mut events = Vec::new();

        match msg.kind {
            MessageType::Init => {
                // At most one open block per decoder instance.
                if self.session_id.is_empty() {
                    self.session_id = msg.session_id.unwrap_or_default();
                    events.push(acp::Event::block_start(&self.session_id));
                }
            }
            MessageType::Message => {
                if msg.role.as_deref() == Some(ROLE_ASSISTANT) {
                    let content_id = match &self.content_id {
                        Some(content_id) => content_id.clone(),
                        None => {
                            let content_id = mint_id();
                            self.content_id = Some(content_id.clone());
                            events.push(acp::Event::content_start(&content_id, &self.session_id));
                            content_id
                        }
                    };
                    events.push(acp::Event::content_delta(
                        content_id,
                        acp::Payload::Text(msg.content.unwrap_or_default()),
                    ));
                }
            }
            MessageType::ToolUse => self.tool_use(&msg, &mut events)?,
            MessageType::ToolResult => self.tool_result(&msg, &mut events)?,
            MessageType::Result => {
                self.flush_open_content(&mut events);
                let usage = msg.stats.map(|stats| acp::Usage {
                    prompt_tokens: stats.input_tokens,
                    completion_tokens: stats.output_tokens,
                });
                events.push(acp::Event::block_end(&self.session_id, usage));

                if msg.status.as_deref() == Some(STATUS_ERROR) {
                    let message = msg.error.map(|error| error.message).unwrap_or_default();
                    return Ok(Decoded::Failed {
                        output: Some(events),
                        error: DecodeError::TurnFailed(message),
                    });
                }
            }
            MessageType::Error => {
                return Err(DecodeError::Backend {
                    severity: msg.severity.unwrap_or_default(),
                    message: msg.message.unwrap_or_default(),
                });
            }
            // Unknown lines flush the open text stream defensively.
            MessageType::Unknown => self.flush_open_content(&mut events),
        }

        if events.is_empty() {
            Ok(Decoded::Skip)
        } else {
            Ok(Decoded::Output(events))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(decoder: &mut AcpDecoder, line: &str) -> Decoded<Vec<acp::Event>> {
        decoder.decode(line.as_bytes()).expect("decode")
    }

    fn events(decoded: Decoded<Vec<acp::Event>>) -> Vec<acp::Event> {
        match decoded {
            Decoded::Output(events) => events,
            other => panic!("expected output, got {other:?}"),
        }
    }

    #[test]
    fn message_decoder_surfaces_typed_lines() {
        let mut decoder = MessageDecoder;
        let Decoded::Output(msg) = decoder
            .decode(
                r#"{"type":"tool_use","tool_id":"t1","tool_name":"run_shell_command","parameters":{"command":"ls"}}"#
                    .as_bytes(),
            )
            .expect("decode")
        else {
            panic!("expected output");
        };
        assert_eq!(msg.kind, MessageType::ToolUse);
        assert_eq!(msg.tool_name.as_deref(), Some("run_shell_command"));
        assert_eq!(
            msg.parameters.unwrap().get("command"),
            Some(&Value::String("ls".to_string()))
        );
    }

    #[test]
    fn shell_tool_round_trip_matches_the_lifecycle() {
        let mut decoder = AcpDecoder::new();

        let init = events(decode(&mut decoder, r#"{"type":"init","session_id":"s1"}"#));
        assert_eq!(init, vec![acp::Event::block_start("s1")]);

        let used = events(decode(
            &mut decoder,
            r#"{"type":"tool_use","tool_id":"t1","tool_name":"run_shell_command","parameters":{"command":"ls"}}"#,
        ));
        let [acp::Event::ContentStart {
            content_id,
            block_id,
        }, acp::Event::ContentDelta { payload, .. }] = used.as_slice()
        else {
            panic!("expected start + delta, got {used:?}");
        };
        assert_eq!(block_id, "s1");
        assert_eq!(payload, &acp::Payload::Command("ls".to_string()));

        let resolved = events(decode(
            &mut decoder,
            r#"{"type":"tool_result","tool_id":"t1","output":"a.txt"}"#,
        ));
        assert_eq!(
            resolved,
            vec![
                acp::Event::content_delta(
                    content_id.clone(),
                    acp::Payload::CommandResult {
                        output: "a.txt".to_string(),
                        exit_code: 0,
                    },
                ),
                acp::Event::content_end(content_id.clone()),
            ]
        );

        let done = events(decode(
            &mut decoder,
            r#"{"type":"result","status":"success"}"#,
        ));
        assert_eq!(done, vec![acp::Event::block_end("s1", None)]);
    }

    #[test]
    fn assistant_messages_share_one_content_until_a_switch() {
        let mut decoder = AcpDecoder::new();
        decode(&mut decoder, r#"{"type":"init","session_id":"s1"}"#);

        let first = events(decode(
            &mut decoder,
            r#"{"type":"message","role":"assistant","content":"hel"}"#,
        ));
        let [acp::Event::ContentStart { content_id, .. }, acp::Event::ContentDelta { .. }] =
            first.as_slice()
        else {
            panic!("expected start + delta, got {first:?}");
        };
        let content_id = content_id.clone();

        let second = events(decode(
            &mut decoder,
            r#"{"type":"message","role":"assistant","content":"lo"}"#,
        ));
        assert_eq!(
            second,
            vec![acp::Event::content_delta(
                content_id.clone(),
                acp::Payload::Text("lo".to_string()),
            )]
        );

        // A tool switch closes the primary stream before its own content.
        let switched = events(decode(
            &mut decoder,
            r#"{"type":"tool_use","tool_id":"t1","tool_name":"list_files","parameters":{"dir":"."}}"#,
        ));
        assert_eq!(switched[0], acp::Event::content_end(content_id));
        assert!(matches!(switched[1], acp::Event::ContentStart { .. }));
        assert!(matches!(
            &switched[2],
            acp::Event::ContentDelta {
                payload: acp::Payload::ToolCall(name),
                ..
            } if name == "list_files"
        ));
        assert!(matches!(
            &switched[3],
            acp::Event::ContentDelta {
                payload: acp::Payload::ToolArgs(_),
                ..
            }
        ));
    }

    #[test]
    fn user_messages_produce_nothing() {
        let mut decoder = AcpDecoder::new();
        decode(&mut decoder, r#"{"type":"init","session_id":"s1"}"#);
        assert!(matches!(
            decode(
                &mut decoder,
                r#"{"type":"message","role":"user","content":"prompt"}"#,
            ),
            Decoded::Skip
        ));
    }

    #[test]
    fn missing_shell_command_parameter_is_a_hard_error() {
        let mut decoder = AcpDecoder::new();
        decode(&mut decoder, r#"{"type":"init","session_id":"s1"}"#);

        let err = decoder
            .decode(
                r#"{"type":"tool_use","tool_id":"t1","tool_name":"run_shell_command","parameters":{}}"#
                    .as_bytes(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::InvalidToolParameters {
                tool: "run_shell_command",
                parameter: "command",
            }
        ));
    }

    #[test]
    fn web_search_parses_answer_and_results() {
        let mut decoder = AcpDecoder::new();
        decode(&mut decoder, r#"{"type":"init","session_id":"s1"}"#);

        let used = events(decode(
            &mut decoder,
            r#"{"type":"tool_use","tool_id":"w1","tool_name":"google_web_search","parameters":{"query":"rust async"}}"#,
        ));
        assert!(matches!(
            &used[1],
            acp::Event::ContentDelta {
                payload: acp::Payload::WebSearchQuery(query),
                ..
            } if query == "rust async"
        ));

        let output = r#"{\"answer\":\"use tokio\",\"results\":[{\"title\":\"Tokio\",\"url\":\"https://tokio.rs\"}]}"#;
        let resolved = events(decode(
            &mut decoder,
            &format!(r#"{{"type":"tool_result","tool_id":"w1","output":"{output}"}}"#),
        ));
        let [acp::Event::ContentDelta { payload, .. }, acp::Event::ContentEnd { .. }] =
            resolved.as_slice()
        else {
            panic!("expected delta + end, got {resolved:?}");
        };
        assert_eq!(
            payload,
            &acp::Payload::WebSearchResult {
                answer: "use tokio".to_string(),
                results: vec![acp::SearchResult {
                    title: "Tokio".to_string(),
                    url: "https://tokio.rs".to_string(),
                    snippet: None,
                }],
            }
        );
    }

    #[test]
    fn tool_errors_dispatch_by_remembered_tool_name() {
        let mut decoder = AcpDecoder::new();
        decode(&mut decoder, r#"{"type":"init","session_id":"s1"}"#);
        decode(
            &mut decoder,
            r#"{"type":"tool_use","tool_id":"t1","tool_name":"run_shell_command","parameters":{"command":"rm x"}}"#,
        );

        let resolved = events(decode(
            &mut decoder,
            r#"{"type":"tool_result","tool_id":"t1","error":{"type":"permission","message":"denied"}}"#,
        ));
        assert!(matches!(
            &resolved[0],
            acp::Event::ContentDelta {
                payload: acp::Payload::CommandError(error),
                ..
            } if error.kind == "permission" && error.message == "denied"
        ));
        assert!(matches!(resolved[1], acp::Event::ContentEnd { .. }));
    }

    #[test]
    fn unknown_tool_result_is_dropped_silently() {
        let mut decoder = AcpDecoder::new();
        decode(&mut decoder, r#"{"type":"init","session_id":"s1"}"#);
        assert!(matches!(
            decode(
                &mut decoder,
                r#"{"type":"tool_result","tool_id":"never-started","output":"x"}"#,
            ),
            Decoded::Skip
        ));
    }

    #[test]
    fn result_with_stats_attaches_usage_and_error_status_fails_after_events() {
        let mut decoder = AcpDecoder::new();
        decode(&mut decoder, r#"{"type":"init","session_id":"s1"}"#);
        decode(
            &mut decoder,
            r#"{"type":"message","role":"assistant","content":"hi"}"#,
        );

        let outcome = decoder
            .decode(
                r#"{"type":"result","status":"error","stats":{"input_tokens":7,"output_tokens":3},"error":{"type":"quota","message":"exhausted"}}"#
                    .as_bytes(),
            )
            .expect("decode");
        let Decoded::Failed { output, error } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        let output = output.expect("closing events");
        assert!(matches!(output[0], acp::Event::ContentEnd { .. }));
        assert_eq!(
            output[1],
            acp::Event::block_end(
                "s1",
                Some(acp::Usage {
                    prompt_tokens: 7,
                    completion_tokens: 3,
                }),
            )
        );
        assert!(matches!(
            error,
            DecodeError::TurnFailed(ref msg) if msg == "exhausted"
        ));
    }

    #[test]
    fn top_level_error_fails_without_a_block_end() {
        let mut decoder = AcpDecoder::new();
        decode(&mut decoder, r#"{"type":"init","session_id":"s1"}"#);

        let err = decoder
            .decode(r#"{"type":"error","severity":"fatal","message":"backend down"}"#.as_bytes())
            .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Backend { ref severity, ref message }
                if severity == "fatal" && message == "backend down"
        ));
    }

    #[test]
    fn unrecognized_types_flush_the_open_text_stream() {
        let mut decoder = AcpDecoder::new();
        decode(&mut decoder, r#"{"type":"init","session_id":"s1"}"#);
        decode(
            &mut decoder,
            r#"{"type":"message","role":"assistant","content":"hi"}"#,
        );

        let flushed = events(decode(&mut decoder, r#"{"type":"wire.future"}"#));
        assert!(matches!(flushed.as_slice(), [acp::Event::ContentEnd { .. }]));

        // Nothing left open: the next unknown line is a pure skip.
        assert!(matches!(
            decode(&mut decoder, r#"{"type":"wire.future"}"#),
            Decoded::Skip
        ));
    }
}
