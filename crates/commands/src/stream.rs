use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use tokio::sync::{mpsc, Notify};
use tracing::debug;

use crate::{
    Decoded, Decoder, LineSink, ProcessError, ProcessHandle, ProcessKiller, StreamError,
};

/// Pull-based, single-consumer stream of decoded events from one process.
///
/// Construction spawns a drain task that runs the process to exit and hands
/// admitted lines over a capacity-one channel; a slow consumer parks the
/// producer, which is the intended backpressure. The stream owns the
/// process: [`close`](EventStream::close) kills it, and the drain task kills
/// it once more on natural exit (a no-op by then), so a fully consumed
/// stream never leaks. A consumer that abandons the stream early must still
/// call `close`.
///
/// `recv` is terminal-state idempotent: after end-of-stream it keeps
/// returning `Ok(None)`, and after any error it keeps returning the same
/// error.
pub struct EventStream<D: Decoder, K: ProcessKiller> {
    rx: mpsc::Receiver<Vec<u8>>,
    decoder: D,
    killer: K,
    shared: Arc<Shared>,
    latched: Option<StreamError>,
}

struct Shared {
    wait_error: Mutex<Option<ProcessError>>,
    closed: AtomicBool,
    close_notify: Notify,
    killed: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            wait_error: Mutex::new(None),
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
            killed: AtomicBool::new(false),
        }
    }

    fn latch_wait_error(&self, err: ProcessError) {
        let mut slot = self
            .wait_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(err);
    }

    fn wait_error(&self) -> Option<ProcessError> {
        self.wait_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn request_close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.close_notify.notify_one();
    }

    /// True for the caller that gets to deliver the one kill.
    fn claim_kill(&self) -> bool {
        !self.killed.swap(true, Ordering::SeqCst)
    }
}

impl<D: Decoder, K: ProcessKiller> EventStream<D, K> {
    /// Starts draining `handle`, decoding admitted lines with `decoder`.
    pub fn new<H>(handle: H, decoder: D) -> Self
    where
        H: ProcessHandle<Killer = K>,
    {
        let (tx, rx) = mpsc::channel(1);
        let shared = Arc::new(Shared::new());
        let killer = handle.killer();

        tokio::spawn(drain(handle, tx, Arc::clone(&shared), killer.clone()));

        Self {
            rx,
            decoder,
            killer,
            shared,
            latched: None,
        }
    }

    /// Receives the next decoded value.
    ///
    /// `Ok(Some(_))` per decoded batch, `Ok(None)` once the process has
    /// exited and every admitted line is consumed (or after `close`), `Err`
    /// for the latched terminal error. Lines the decoder reports as
    /// carrying nothing are skipped internally.
    pub async fn recv(&mut self) -> Result<Option<D::Output>, StreamError> {
        loop {
            if let Some(err) = &self.latched {
                return Err(err.clone());
            }
            if self.shared.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }

            let next = tokio::select! {
                line = self.rx.recv() => line,
                _ = self.shared.close_notify.notified() => return Ok(None),
            };

            let Some(line) = next else {
                // Producer finished: a latched transport error outranks a
                // clean end of stream.
                if let Some(err) = self.shared.wait_error() {
                    let err = StreamError::from(err);
                    self.latched = Some(err.clone());
                    return Err(err);
                }
                return Ok(None);
            };

            match self.decoder.decode(&line) {
                Ok(Decoded::Skip) => continue,
                Ok(Decoded::Output(out)) => return Ok(Some(out)),
                Ok(Decoded::Failed { output, error }) => {
                    let err = StreamError::from(error);
                    self.latched = Some(err.clone());
                    return match output {
                        Some(out) => Ok(Some(out)),
                        None => Err(err),
                    };
                }
                Err(error) => {
                    let err = StreamError::from(error);
                    self.latched = Some(err.clone());
                    return Err(err);
                }
            }
        }
    }

    /// Closes the stream: stops accepting lines, wakes a parked `recv`, and
    /// kills the process. Safe to call repeatedly: at most one kill
    /// reaches the process across all `close` calls and the drain task's
    /// end-of-stream kill.
    pub async fn close(&mut self) -> Result<(), ProcessError> {
        self.rx.close();
        self.shared.request_close();
        if self.shared.claim_kill() {
            self.killer.kill().await?;
        }
        Ok(())
    }

    /// Detaches a handle that can close this stream from another task,
    /// e.g. a deadline watchdog while `recv` is parked here.
    pub fn closer(&self) -> StreamCloser<K> {
        StreamCloser {
            shared: Arc::clone(&self.shared),
            killer: self.killer.clone(),
        }
    }
}

/// Clonable capability to close an [`EventStream`] from another task.
#[derive(Clone)]
pub struct StreamCloser<K: ProcessKiller> {
    shared: Arc<Shared>,
    killer: K,
}

impl<K: ProcessKiller> StreamCloser<K> {
    pub async fn close(&self) -> Result<(), ProcessError> {
        self.shared.request_close();
        if self.shared.claim_kill() {
            self.killer.kill().await?;
        }
        Ok(())
    }
}

/// Runs the process to exit, then reports and cleans up.
///
/// The sink gets a clone of `tx` while this task keeps the original, so the
/// consumer observes end-of-stream only after the terminal error is latched
/// and the end-of-stream kill has run.
async fn drain<H: ProcessHandle>(
    handle: H,
    tx: mpsc::Sender<Vec<u8>>,
    shared: Arc<Shared>,
    killer: H::Killer,
) {
    if let Err(err) = handle.wait(LineSink::new(tx.clone())).await {
        debug!(error = %err, "process wait finished with error");
        shared.latch_wait_error(err);
    }
    if shared.claim_kill() {
        let _ = killer.kill().await;
    }
    drop(tx);
}
