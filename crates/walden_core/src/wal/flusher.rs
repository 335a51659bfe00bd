//! Background syncing for batched writes.

use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, trace};
use walden_storage::{StorageBackend, StorageResult};

/// Called from the flusher thread when a background sync fails.
pub(crate) type FailureHook = Arc<dyn Fn(&CoreError) + Send + Sync>;

/// Owns the thread that syncs a log file on behalf of batched writers.
///
/// Every batched write sends one request. The thread waits one flush
/// interval after the first request, drains whatever else arrived and
/// issues a single `sync_data` for the whole batch. A failed sync stops the
/// thread, is passed to the failure hook right away and is reported to the
/// writer on its next call.
pub(crate) struct Flusher {
    requests: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
    failure: Arc<Mutex<Option<String>>>,
}

impl Flusher {
    pub(crate) fn start(
        backend: Arc<dyn StorageBackend>,
        interval: Duration,
        path: &Path,
        on_failure: Option<FailureHook>,
    ) -> CoreResult<Self> {
        let (sender, receiver) = mpsc::channel();
        let failure = Arc::new(Mutex::new(None));
        let label = path.display().to_string();
        let worker = thread::Builder::new()
            .name("walden-flusher".to_string())
            .spawn({
                let failure = Arc::clone(&failure);
                move || {
                    if let Err(e) = run(&*backend, &receiver, interval, &label) {
                        error!(path = %label, error = %e, "Background flush failed");
                        *failure.lock() = Some(e.to_string());
                        if let Some(hook) = on_failure {
                            hook(&CoreError::FlushFailed {
                                message: e.to_string(),
                            });
                        }
                    }
                }
            })?;
        Ok(Self {
            requests: Some(sender),
            worker: Some(worker),
            failure,
        })
    }

    /// Fails if an earlier background sync failed.
    pub(crate) fn check(&self) -> CoreResult<()> {
        match self.failure.lock().as_ref() {
            Some(message) => Err(CoreError::FlushFailed {
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    pub(crate) fn request(&self) -> CoreResult<()> {
        self.check()?;
        let sent = self
            .requests
            .as_ref()
            .is_some_and(|requests| requests.send(()).is_ok());
        if sent {
            Ok(())
        } else {
            Err(CoreError::FlushFailed {
                message: "flusher thread has stopped".to_string(),
            })
        }
    }

    /// Syncs outstanding requests and stops the thread.
    pub(crate) fn shutdown(mut self) -> CoreResult<()> {
        self.stop();
        self.check()
    }

    fn stop(&mut self) {
        drop(self.requests.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                self.failure
                    .lock()
                    .get_or_insert_with(|| "flusher thread panicked".to_string());
            }
        }
    }
}

impl Drop for Flusher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    backend: &dyn StorageBackend,
    requests: &Receiver<()>,
    interval: Duration,
    label: &str,
) -> StorageResult<()> {
    debug!(path = label, "Flusher started");
    while requests.recv().is_ok() {
        if !interval.is_zero() {
            thread::sleep(interval);
        }
        let mut batch = 1u64;
        let mut disconnected = false;
        loop {
            match requests.try_recv() {
                Ok(()) => batch += 1,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }
        backend.sync_data()?;
        trace!(path = label, batch, "Flushed batched writes");
        if disconnected {
            break;
        }
    }
    debug!(path = label, "Flusher stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use walden_storage::InMemoryBackend;

    #[test]
    fn requests_are_synced() {
        let backend = Arc::new(InMemoryBackend::new());
        let flusher = Flusher::start(
            Arc::clone(&backend) as Arc<dyn StorageBackend>,
            Duration::from_millis(1),
            Path::new("mem"),
            None,
        )
        .unwrap();

        for _ in 0..10 {
            flusher.request().unwrap();
        }
        flusher.shutdown().unwrap();

        let syncs = backend.sync_count();
        assert!((1..=10).contains(&syncs), "syncs = {syncs}");
    }

    #[test]
    fn idle_shutdown_does_not_sync() {
        let backend = Arc::new(InMemoryBackend::new());
        let flusher = Flusher::start(
            Arc::clone(&backend) as Arc<dyn StorageBackend>,
            Duration::ZERO,
            Path::new("mem"),
            None,
        )
        .unwrap();
        flusher.shutdown().unwrap();
        assert_eq!(backend.sync_count(), 0);
    }
}
