#![forbid(unsafe_code)]
//! Canonical agent chat protocol events.
//!
//! Every agent backend speaks its own line-delimited JSON vocabulary; the
//! normalizers in `agent_events` fold those onto this one shape so consumers
//! can render any backend with a single code path.
//!
//! Lifecycle contract for a well-formed turn:
//! - exactly one [`Event::BlockStart`] followed, eventually, by exactly one
//!   [`Event::BlockEnd`] per block;
//! - each [`Event::ContentStart`] is followed by at most one matching
//!   [`Event::ContentEnd`] for the same content ID (some backends never
//!   bracket plain text content; whether `ContentEnd` arrives for a given
//!   content kind is a property of the producing backend, not of this
//!   protocol);
//! - [`Event::ContentDelta`] fragments carry the actual payloads and share
//!   the content ID of the start event they extend.

mod event;
mod payload;

pub use event::{Event, Usage};
pub use payload::{Error, Payload, SearchResult};
