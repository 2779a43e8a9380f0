use crate::DecodeError;

/// Per-line translation from admitted JSON bytes to typed values.
///
/// One decoder instance serves one stream and is never shared; stateful
/// implementations (the normalizers) rely on being called once per line, in
/// emission order. After a call returns an error or a
/// [`Decoded::Failed`], the owning stream latches and never calls
/// `decode` again on this instance.
pub trait Decoder: Send + 'static {
    type Output: Send + 'static;

    fn decode(&mut self, line: &[u8]) -> Result<Decoded<Self::Output>, DecodeError>;
}

/// Outcome of decoding one admitted line.
#[derive(Debug)]
pub enum Decoded<T> {
    /// The line was recognized but carries nothing for the consumer; the
    /// stream keeps reading.
    Skip,
    /// Typed output to hand to the consumer.
    Output(T),
    /// The backend signalled a terminal turn failure on this line. The
    /// stream yields `output` first (closing lifecycle events belong to the
    /// consumer) and surfaces `error` on the following `recv`.
    Failed {
        output: Option<T>,
        error: DecodeError,
    },
}
