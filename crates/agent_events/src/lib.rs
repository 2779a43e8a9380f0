#![forbid(unsafe_code)]
//! Stateful decoders that normalize each agent CLI's line-delimited JSON
//! vocabulary onto the canonical [`acp`] block/content lifecycle.
//!
//! One module per backend. Each provides:
//! - a typed message model for the backend's wire format, tolerant of
//!   unknown discriminants and extra fields;
//! - a `MessageDecoder` that surfaces raw typed messages, for consumers
//!   that want the backend's own vocabulary;
//! - an `AcpDecoder` implementing [`commands::Decoder`] with
//!   `Output = Vec<acp::Event>`, the normalizing state machine.
//!
//! A decoder instance belongs to exactly one chat session (one
//! [`commands::EventStream`]) and is discarded with it. Whether a backend
//! brackets its text content with explicit `ContentEnd` events is a
//! per-backend property: the turn/item protocol ([`codex`]) never closes
//! plain text or reasoning content, while [`gemini`] and [`opencode`]
//! always do.

pub mod codex;
pub mod gemini;
pub mod opencode;

pub(crate) fn parse_line<T: serde::de::DeserializeOwned>(
    line: &[u8],
) -> Result<T, commands::DecodeError> {
    serde_json::from_slice(line).map_err(|err| commands::DecodeError::Parse {
        line: String::from_utf8_lossy(line).into_owned(),
        message: err.to_string(),
    })
}

pub(crate) fn mint_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
