use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload of one [`ContentDelta`](crate::Event::ContentDelta) fragment.
///
/// Closed set: normalizers construct variants explicitly rather than
/// shuttling untyped maps downstream. Streaming text arrives as repeated
/// `Text`/`Thinking` deltas; tool and command activity arrives as the
/// matching call/result (or error) pairs against one content ID.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Thinking(String),
    Command(String),
    CommandResult { output: String, exit_code: i32 },
    CommandError(Error),
    ToolCall(String),
    ToolArgs(Value),
    ToolResult(Value),
    ToolError(Error),
    WebSearchQuery(String),
    WebSearchResult {
        answer: String,
        results: Vec<SearchResult>,
    },
    WebSearchError(Error),
}

/// Failure reported by a backend for a tool, command, or search.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
pub struct Error {
    pub kind: String,
    pub message: String,
}

/// One hit in a web search result set.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
pub struct SearchResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}
