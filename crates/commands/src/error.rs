use thiserror::Error;

/// Errors from the process transport underneath a stream.
///
/// All variants carry owned message text so a latched error can be handed
/// back on every subsequent `recv` call.
#[derive(Debug, Clone, Error)]
pub enum ProcessError {
    #[error("failed to spawn `{binary}`: {message}")]
    Spawn { binary: String, message: String },
    #[error("failed waiting for process exit: {0}")]
    Wait(String),
    #[error("process exited with non-zero status {status}")]
    NonZeroExit { status: i32 },
    #[error("process ended without reporting an exit status")]
    MissingExit,
    #[error("failed reading process output: {0}")]
    Io(String),
    #[error("failed to kill process: {0}")]
    Kill(String),
}

/// Errors raised by a [`Decoder`](crate::Decoder) for a single admitted line.
///
/// `TurnFailed` and `Backend` are the expected terminus of a failed chat
/// turn rather than transport faults; callers distinguish the two by
/// matching on the variant, not by a separate code path.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    #[error("failed to parse backend event: {message}: `{line}`")]
    Parse { line: String, message: String },
    #[error("`{tool}` invocation missing required `{parameter}` parameter")]
    InvalidToolParameters {
        tool: &'static str,
        parameter: &'static str,
    },
    #[error("turn failed: {0}")]
    TurnFailed(String),
    #[error("backend error, severity: {severity}, message: {message}")]
    Backend { severity: String, message: String },
}

/// Terminal failure surfaced by [`EventStream::recv`](crate::EventStream::recv).
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}
