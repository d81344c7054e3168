//! Background read loop, one per active connection.
//!
//! The reader polls the shared port, forwards every chunk immediately, and
//! reports trouble as events. It never touches manager state and never closes
//! the port; stopping is cooperative through a flag, with the owner aborting
//! the task if the flag is ignored for too long.
//!
//! Driver calls can block for as long as the driver likes, so each poll runs
//! on the blocking pool. The async side only awaits it, which keeps `abort()`
//! effective even while a read is stuck in the OS.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};
use tokio::time::{sleep, timeout};

use crate::logutil::hex_snippet;
use crate::port::{lock_port, ErrorClass, ErrorClassifier, SharedPort};

/// What the reader reports to its owner, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReaderEvent {
    Data(Vec<u8>),
    Error(String),
    /// Sent right before the loop exits on a fatal error.
    ConnectionLost,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReaderSettings {
    /// Sleep between polls when no input is waiting.
    pub poll_interval: Duration,
    /// Consecutive failed reads tolerated before the link is declared lost.
    pub max_consecutive_errors: u32,
    /// Pause after generic error `n` is `n * error_backoff_step`, capped.
    pub error_backoff_step: Duration,
    pub max_error_backoff: Duration,
    /// Fixed pause after an error that looks like a removal.
    pub removal_pause: Duration,
    /// Largest single read.
    pub read_chunk_size: usize,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            max_consecutive_errors: 5,
            error_backoff_step: Duration::from_millis(100),
            max_error_backoff: Duration::from_secs(5),
            removal_pause: Duration::from_millis(50),
            read_chunk_size: 4096,
        }
    }
}

impl ReaderSettings {
    pub(crate) fn error_pause(&self, consecutive: u32) -> Duration {
        self.error_backoff_step
            .saturating_mul(consecutive)
            .min(self.max_error_backoff)
    }
}

enum Poll {
    Data(usize),
    Idle,
    Closed,
}

struct Reader {
    name: String,
    port: SharedPort,
    stop: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<ReaderEvent>,
    classifier: Arc<dyn ErrorClassifier>,
    settings: ReaderSettings,
}

impl Reader {
    async fn run(self) {
        let name = self.name.as_str();
        debug!("Reader started on {}", name);
        let chunk = self.settings.read_chunk_size.max(1);
        let mut buf = vec![0u8; chunk];
        let mut consecutive: u32 = 0;

        while !self.stop.load(Ordering::Acquire) {
            let port = self.port.clone();
            let polled = task::spawn_blocking(move || {
                let result = poll(&port, &mut buf);
                (result, buf)
            })
            .await;
            let result = match polled {
                Ok((result, returned)) => {
                    buf = returned;
                    result
                }
                Err(e) => {
                    buf = vec![0u8; chunk];
                    Err(io::Error::new(
                        io::ErrorKind::Other,
                        format!("read task failed: {}", e),
                    ))
                }
            };
            match result {
                Ok(Poll::Data(n)) => {
                    consecutive = 0;
                    trace!("RX {} bytes: {}", n, hex_snippet(&buf[..n], 64));
                    if self.tx.send(ReaderEvent::Data(buf[..n].to_vec())).is_err() {
                        debug!("Reader owner went away, stopping");
                        break;
                    }
                }
                Ok(Poll::Idle) => sleep(self.settings.poll_interval).await,
                Ok(Poll::Closed) => {
                    warn!("Port {} is closed, reader exiting", name);
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    sleep(self.settings.poll_interval).await;
                }
                Err(e) => {
                    consecutive += 1;
                    match self.classifier.classify(&e, consecutive) {
                        ErrorClass::DeviceRemoved(reason) => {
                            warn!("Device removal detected on {}: {}", name, e);
                            self.fatal(reason.to_string());
                            break;
                        }
                        class => {
                            warn!("Serial read error on {} (#{}): {}", name, consecutive, e);
                            if consecutive >= self.settings.max_consecutive_errors {
                                self.fatal(format!("Too many consecutive read errors: {}", e));
                                break;
                            }
                            let pause = match class {
                                ErrorClass::Suspect => self.settings.removal_pause,
                                _ => self.settings.error_pause(consecutive),
                            };
                            sleep(pause).await;
                        }
                    }
                }
            }
        }
        debug!("Reader on {} finished", name);
    }

    fn fatal(&self, message: String) {
        let _ = self.tx.send(ReaderEvent::Error(message));
        let _ = self.tx.send(ReaderEvent::ConnectionLost);
    }
}

/// One look at the port, run on the blocking pool. The lock is released before returning.
fn poll(port: &SharedPort, buf: &mut [u8]) -> io::Result<Poll> {
    let mut port = lock_port(port);
    if !port.is_open() {
        return Ok(Poll::Closed);
    }
    let waiting = port.bytes_to_read()?;
    if waiting == 0 {
        return Ok(Poll::Idle);
    }
    let want = waiting.min(buf.len());
    match port.read(&mut buf[..want])? {
        0 => Ok(Poll::Idle),
        n => Ok(Poll::Data(n)),
    }
}

/// How a reader ended when asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopOutcome {
    Graceful,
    Forced,
}

/// Owner's handle on a running reader.
pub(crate) struct ReaderHandle {
    stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl ReaderHandle {
    pub(crate) fn spawn(
        port: SharedPort,
        tx: mpsc::UnboundedSender<ReaderEvent>,
        classifier: Arc<dyn ErrorClassifier>,
        settings: ReaderSettings,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let name = lock_port(&port).name().to_string();
        let reader = Reader {
            name,
            port,
            stop: stop.clone(),
            tx,
            classifier,
            settings,
        };
        let task = tokio::spawn(reader.run());
        Self { stop, task }
    }

    /// Set the stop flag, wait up to `grace`, then abort and wait up to `force_wait`.
    ///
    /// Safe to call after the reader already exited on its own.
    pub(crate) async fn shutdown(mut self, grace: Duration, force_wait: Duration) -> StopOutcome {
        self.stop.store(true, Ordering::Release);
        match timeout(grace, &mut self.task).await {
            Ok(Err(e)) if e.is_panic() => {
                warn!("Reader task panicked: {}", e);
                StopOutcome::Graceful
            }
            Ok(_) => StopOutcome::Graceful,
            Err(_) => {
                warn!("Reader did not stop within {:?}, aborting it", grace);
                self.task.abort();
                if timeout(force_wait, &mut self.task).await.is_err() {
                    warn!("Aborted reader still running after {:?}", force_wait);
                }
                StopOutcome::Forced
            }
        }
    }
}

impl Drop for ReaderHandle {
    // A dropped owner must not leave the loop polling a port nobody reads.
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}
