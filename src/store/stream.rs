use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError, TrySendError};

use crate::error::{ExecutionError, SimError, SimResult};

use super::simulation::Snapshot;
use super::subscribers::{SubscriberRegistry, Subscription};

/// A channel-backed subscription to store snapshots.
///
/// Snapshots are buffered up to the configured capacity; when the reader
/// falls behind, the oldest buffered snapshots are evicted and counted, so the
/// buffer always ends with the current record set. Dropping the stream
/// unsubscribes.
#[derive(Debug)]
pub struct SnapshotStream {
    subscription: Subscription,
    rx: Receiver<Arc<Snapshot>>,
    dropped: Arc<AtomicU64>,
}

impl SnapshotStream {
    pub(crate) fn attach(
        registry: &Arc<SubscriberRegistry<Snapshot>>,
        capacity: usize,
        initial: impl FnOnce() -> Option<(u64, Arc<Snapshot>)>,
    ) -> Self {
        let (tx, rx) = bounded::<Arc<Snapshot>>(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&dropped);
        let evict = rx.clone();
        let subscription = registry.register_with(
            move |snapshot| {
                let mut pending = snapshot;
                loop {
                    match tx.try_send(pending) {
                        Ok(()) => return,
                        Err(TrySendError::Full(back)) => {
                            if evict.try_recv().is_ok() {
                                counter.fetch_add(1, Ordering::Relaxed);
                            }
                            pending = back;
                        }
                        Err(TrySendError::Disconnected(_)) => {
                            counter.fetch_add(1, Ordering::Relaxed);
                            return;
                        }
                    }
                }
            },
            initial,
        );
        Self {
            subscription,
            rx,
            dropped,
        }
    }

    /// The underlying subscription.
    #[must_use]
    pub const fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Stops delivery. Idempotent.
    pub fn unsubscribe(&self) {
        self.subscription.unsubscribe();
    }

    /// Snapshots discarded because the buffer was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Receive the next snapshot (blocking).
    pub fn recv(&self) -> SimResult<Arc<Snapshot>> {
        self.rx.recv().map_err(|_| disconnected())
    }

    /// Receive the next snapshot with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> SimResult<Arc<Snapshot>> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => SimError::Execution(ExecutionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            RecvTimeoutError::Disconnected => disconnected(),
        })
    }

    /// Returns a buffered snapshot without blocking.
    pub fn try_recv(&self) -> SimResult<Option<Arc<Snapshot>>> {
        match self.rx.try_recv() {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(disconnected()),
        }
    }

    /// Drains the buffer and returns the newest snapshot, if any.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.rx.try_iter().last()
    }
}

fn disconnected() -> SimError {
    SimError::Execution(ExecutionError::Disconnected {
        path: "snapshot_stream".to_string(),
    })
}
