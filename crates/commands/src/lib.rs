#![forbid(unsafe_code)]
//! Pull-based streaming of line-delimited JSON output from agent processes.
//!
//! An [`EventStream`] owns exactly one external process for its whole life:
//! a background task drains the process through a [`ProcessHandle`],
//! admitting only chunks that form self-contained JSON documents, and a
//! single consumer pulls decoded values with [`EventStream::recv`]. The
//! per-line translation is a pluggable [`Decoder`], selected at stream
//! construction, so the same stream works for every backend vocabulary.
//!
//! Consumers must call [`EventStream::close`] on every exit path (error,
//! early abandonment, or a clean end of stream) to avoid leaking the
//! process. Reaching the natural end also kills the process (a no-op by
//! then, since it has already exited), but abandonment without `close`
//! leaves it running.

mod decoder;
mod error;
mod process;
mod stream;

pub use decoder::{Decoded, Decoder};
pub use error::{DecodeError, ProcessError, StreamError};
pub use process::{ChildHandle, KillSignal, LineSink, ProcessHandle, ProcessKiller};
pub use stream::{EventStream, StreamCloser};
