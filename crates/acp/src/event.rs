use serde::{Deserialize, Serialize};

use crate::Payload;

/// One canonical lifecycle event.
///
/// A *block* is one agent turn (one prompt/response cycle); *content* is a
/// sub-stream of output within it: a text span, a tool invocation, a
/// command execution. Identifiers are opaque strings chosen by the producing
/// normalizer; correlation is by equality only.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Opens a block. Emitted exactly once per turn.
    BlockStart { block_id: String },
    /// Closes a block, carrying the turn's token cost when the backend
    /// reported one.
    BlockEnd {
        block_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
    /// Opens a content sub-stream within `block_id`.
    ContentStart {
        content_id: String,
        block_id: String,
    },
    /// An incremental fragment of an open content sub-stream.
    ContentDelta {
        content_id: String,
        payload: Payload,
    },
    /// Closes a content sub-stream.
    ContentEnd { content_id: String },
}

impl Event {
    pub fn block_start(block_id: impl Into<String>) -> Self {
        Event::BlockStart {
            block_id: block_id.into(),
        }
    }

    pub fn block_end(block_id: impl Into<String>, usage: Option<Usage>) -> Self {
        Event::BlockEnd {
            block_id: block_id.into(),
            usage,
        }
    }

    pub fn content_start(content_id: impl Into<String>, block_id: impl Into<String>) -> Self {
        Event::ContentStart {
            content_id: content_id.into(),
            block_id: block_id.into(),
        }
    }

    pub fn content_delta(content_id: impl Into<String>, payload: Payload) -> Self {
        Event::ContentDelta {
            content_id: content_id.into(),
            payload,
        }
    }

    pub fn content_end(content_id: impl Into<String>) -> Self {
        Event::ContentEnd {
            content_id: content_id.into(),
        }
    }
}

/// Token cost accumulated over a block.
///
/// Non-decreasing within a block. Backends that report per-step deltas fold
/// `output + reasoning` tokens into `completion_tokens`.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
pub struct Usage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
}
