use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader, Lines},
    process::{Child, Command},
    sync::{mpsc, Notify},
};
use tracing::{debug, trace};

use crate::ProcessError;

const CHUNK_SIZE: usize = 4096;

/// Forwards output chunks from a running process into the owning stream.
///
/// A stdout chunk is admitted only when it forms one self-contained JSON
/// document; anything else is diagnostic noise (shell banners, progress
/// output) and is dropped without entering the event sequence. Stderr goes
/// to the log side-channel only.
pub struct LineSink {
    tx: mpsc::Sender<Vec<u8>>,
}

impl LineSink {
    pub(crate) fn new(tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self { tx }
    }

    /// Offers one stdout chunk to the stream. Blocks while the consumer is
    /// behind; that backpressure is what keeps the producer honest.
    pub async fn stdout(&self, chunk: &[u8]) {
        if serde_json::from_slice::<serde::de::IgnoredAny>(chunk).is_err() {
            trace!(bytes = chunk.len(), "dropping non-JSON stdout chunk");
            return;
        }
        // A send failure means the stream was dropped; nothing left to feed.
        let _ = self.tx.send(chunk.to_vec()).await;
    }

    /// Routes one stderr chunk to the diagnostic log.
    pub fn stderr(&self, chunk: &[u8]) {
        debug!(stderr = %String::from_utf8_lossy(chunk), "process stderr");
    }
}

/// One live external process, as a stream sees it.
///
/// `wait` drives the process to exit, forwarding every observed chunk
/// through the sink; a non-zero exit is an error, matching the transport
/// contract. `killer` hands out an independent kill capability usable while
/// `wait` is in flight on another task.
pub trait ProcessHandle: Send + 'static {
    type Killer: ProcessKiller;

    fn killer(&self) -> Self::Killer;

    fn wait(self, sink: LineSink) -> impl Future<Output = Result<(), ProcessError>> + Send;
}

/// Idempotent kill capability detached from the waiting task.
pub trait ProcessKiller: Clone + Send + Sync + 'static {
    fn kill(&self) -> impl Future<Output = Result<(), ProcessError>> + Send;
}

/// [`ProcessHandle`] over a locally spawned [`tokio::process::Child`].
pub struct ChildHandle {
    child: Child,
    signal: KillSignal,
}

impl ChildHandle {
    /// Spawns `command` with piped stdout/stderr and a null stdin.
    pub fn spawn(mut command: Command) -> Result<Self, ProcessError> {
        command
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let child = spawn_with_retry(&mut command)?;
        Ok(Self {
            child,
            signal: KillSignal::new(),
        })
    }
}

impl ProcessHandle for ChildHandle {
    type Killer = KillSignal;

    fn killer(&self) -> KillSignal {
        self.signal.clone()
    }

    fn wait(self, sink: LineSink) -> impl Future<Output = Result<(), ProcessError>> + Send {
        let Self { mut child, signal } = self;
        async move {
            // Pipe reads deliver arbitrary byte runs, so stdout is re-chunked
            // at line boundaries here; the JSONL protocols are line-oriented
            // and the sink's admission check needs one document per chunk.
            let mut stdout = child.stdout.take().map(|out| BufReader::new(out).lines());
            let mut stderr = child.stderr.take();
            let mut err_buf = [0u8; CHUNK_SIZE];
            let mut kill_sent = false;

            while stdout.is_some() || stderr.is_some() {
                tokio::select! {
                    line = next_line(stdout.as_mut()), if stdout.is_some() => {
                        match line.map_err(|err| ProcessError::Io(err.to_string()))? {
                            Some(line) => sink.stdout(line.as_bytes()).await,
                            None => stdout = None,
                        }
                    }
                    read = read_some(stderr.as_mut(), &mut err_buf), if stderr.is_some() => {
                        match read.map_err(|err| ProcessError::Io(err.to_string()))? {
                            0 => stderr = None,
                            n => sink.stderr(&err_buf[..n]),
                        }
                    }
                    _ = signal.requested(), if !kill_sent => {
                        kill_sent = true;
                        if let Err(err) = child.start_kill() {
                            debug!(error = %err, "kill signal delivery failed");
                        }
                    }
                }
            }

            // Pipes are gone but the process may still be running; keep the
            // kill signal live while waiting for the exit status.
            let status = loop {
                let mut kill_requested = false;
                tokio::select! {
                    status = child.wait() => break status,
                    _ = signal.requested(), if !kill_sent => {
                        kill_requested = true;
                    }
                }
                if kill_requested {
                    kill_sent = true;
                    if let Err(err) = child.start_kill() {
                        debug!(error = %err, "kill signal delivery failed");
                    }
                }
            };
            let status = status.map_err(|err| ProcessError::Wait(err.to_string()))?;
            if !status.success() {
                return Err(ProcessError::NonZeroExit {
                    status: status.code().unwrap_or(-1),
                });
            }
            Ok(())
        }
    }
}

async fn read_some<R: AsyncRead + Unpin>(
    reader: Option<&mut R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match reader {
        Some(reader) => reader.read(buf).await,
        // Guarded out by the select precondition.
        None => std::future::pending().await,
    }
}

async fn next_line<R: AsyncBufRead + Unpin>(
    lines: Option<&mut Lines<R>>,
) -> std::io::Result<Option<String>> {
    match lines {
        Some(lines) => lines.next_line().await,
        // Guarded out by the select precondition.
        None => std::future::pending().await,
    }
}

/// Kill capability for a [`ChildHandle`].
///
/// `start_kill` needs exclusive access to the child, which the wait loop
/// holds; the killer therefore raises a signal the loop races against
/// instead of touching the child directly. Requesting a kill after the
/// process has exited is a no-op.
#[derive(Clone)]
pub struct KillSignal {
    inner: Arc<SignalInner>,
}

struct SignalInner {
    requested: AtomicBool,
    notify: Notify,
}

impl KillSignal {
    fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                requested: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    async fn requested(&self) {
        if !self.inner.requested.load(Ordering::SeqCst) {
            self.inner.notify.notified().await;
        }
    }
}

impl ProcessKiller for KillSignal {
    fn kill(&self) -> impl Future<Output = Result<(), ProcessError>> + Send {
        let inner = Arc::clone(&self.inner);
        async move {
            inner.requested.store(true, Ordering::SeqCst);
            inner.notify.notify_one();
            Ok(())
        }
    }
}

/// Spawns, retrying briefly when the binary is still being written
/// (text-file-busy races right after an install).
fn spawn_with_retry(command: &mut Command) -> Result<Child, ProcessError> {
    let binary = command.as_std().get_program().to_string_lossy().into_owned();
    let mut backoff = Duration::from_millis(2);
    for attempt in 0..5 {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(source) => {
                let is_busy = matches!(source.kind(), std::io::ErrorKind::ExecutableFileBusy)
                    || source.raw_os_error() == Some(26);
                if is_busy && attempt < 4 {
                    std::thread::sleep(backoff);
                    backoff = std::cmp::min(backoff * 2, Duration::from_millis(50));
                    continue;
                }
                return Err(ProcessError::Spawn {
                    binary,
                    message: source.to_string(),
                });
            }
        }
    }

    unreachable!("spawn_with_retry returns before exhausting retries")
}
