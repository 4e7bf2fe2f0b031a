//! Background compaction
//!
//! A single worker thread that periodically folds the log tail into a new
//! snapshot. Shutdown is signalled over a crossbeam channel so the worker
//! wakes immediately instead of waiting out its interval.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};

use crate::engine::{Shared, StoreValue};
use crate::error::Result;

/// Handle to the running compactor thread
pub(crate) struct Compactor {
    shutdown: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Compactor {
    pub(crate) fn spawn<V: StoreValue>(shared: Arc<Shared<V>>, interval: Duration) -> Result<Self> {
        let (shutdown, shutdown_rx) = channel::bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("keelkv-compactor".to_string())
            .spawn(move || {
                tracing::debug!(interval_ms = interval.as_millis() as u64, "compactor started");
                loop {
                    match shutdown_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            if shared.tail_records() == 0 {
                                continue;
                            }
                            if let Err(e) = shared.compact() {
                                tracing::error!(error = %e, "background compaction failed");
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("compactor stopped");
            })?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Signal the worker and wait for it to exit
    pub(crate) fn stop(mut self) {
        let _ = self.shutdown.try_send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("compactor thread panicked");
            }
        }
    }
}
