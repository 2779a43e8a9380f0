//! End-to-end checks of [`ChildHandle`] driving an [`EventStream`] over a
//! real local process.

#![cfg(unix)]

use commands::{ChildHandle, Decoded, DecodeError, Decoder, EventStream};
use tokio::process::Command;

/// Echoes each admitted line back as a trimmed string.
struct TextDecoder;

impl Decoder for TextDecoder {
    type Output = String;

    fn decode(&mut self, line: &[u8]) -> Result<Decoded<String>, DecodeError> {
        Ok(Decoded::Output(
            String::from_utf8_lossy(line).trim_end().to_string(),
        ))
    }
}

fn shell(script: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script);
    command
}

#[tokio::test]
async fn streams_json_stdout_and_drops_stderr_and_noise() {
    let handle = ChildHandle::spawn(shell(
        r#"echo '{"step":1}'; echo 'plain banner'; echo 'diagnostics' >&2; echo '{"step":2}'"#,
    ))
    .expect("spawn sh");
    let mut stream = EventStream::new(handle, TextDecoder);

    assert_eq!(stream.recv().await.unwrap(), Some(r#"{"step":1}"#.to_string()));
    assert_eq!(stream.recv().await.unwrap(), Some(r#"{"step":2}"#.to_string()));
    assert_eq!(stream.recv().await.unwrap(), None);

    stream.close().await.unwrap();
}

#[tokio::test]
async fn close_kills_a_long_running_process() {
    let handle = ChildHandle::spawn(shell(r#"echo '{"ready":true}'; sleep 30"#)).expect("spawn sh");
    let mut stream = EventStream::new(handle, TextDecoder);

    assert_eq!(
        stream.recv().await.unwrap(),
        Some(r#"{"ready":true}"#.to_string())
    );

    stream.close().await.unwrap();
    stream.close().await.unwrap();
    assert_eq!(stream.recv().await.unwrap(), None);
}

#[tokio::test]
async fn non_zero_exit_surfaces_as_a_stream_error() {
    let handle = ChildHandle::spawn(shell(r#"echo '{"step":1}'; exit 3"#)).expect("spawn sh");
    let mut stream = EventStream::new(handle, TextDecoder);

    assert_eq!(stream.recv().await.unwrap(), Some(r#"{"step":1}"#.to_string()));
    let err = stream.recv().await.unwrap_err();
    assert!(err.to_string().contains("non-zero status 3"), "{err}");

    stream.close().await.unwrap();
}
