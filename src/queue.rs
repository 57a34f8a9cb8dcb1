//! Unbounded FIFO whose producers can wait until every item has been
//! consumed *and* acknowledged.
//!
//! ```text
//! producer ── push ──► [ crossbeam channel ] ──► consumer
//!    │                                             │
//!    └─ pending += 1                 task_done ── pending -= 1
//!                                                  │
//! join() blocks until pending == 0 ◄───────────────┘
//! ```

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    drained: Condvar,
}

pub struct TrackedQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    pending: Arc<Pending>,
}

impl<T> Clone for TrackedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            pending: self.pending.clone(),
        }
    }
}

impl<T> TrackedQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            pending: Arc::new(Pending::default()),
        }
    }

    pub fn push(&self, item: T) {
        *self.pending.count.lock() += 1;
        // Both ends live in `self`, so the channel cannot be disconnected.
        if self.tx.send(item).is_err() {
            self.task_done();
        }
    }

    /// Non-blocking dequeue. The item still counts as pending until
    /// [`TrackedQueue::task_done`] is called for it.
    pub fn try_pop(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Acknowledge one consumed item.
    pub fn task_done(&self) {
        let mut count = self.pending.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.pending.drained.notify_all();
        }
    }

    /// Items pushed but not yet acknowledged.
    pub fn pending(&self) -> usize {
        *self.pending.count.lock()
    }

    /// Items still sitting in the channel.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Block until every pushed item has been acknowledged. No timeout.
    pub fn join(&self) {
        let mut count = self.pending.count.lock();
        while *count > 0 {
            self.pending.drained.wait(&mut count);
        }
    }
}

impl<T> Default for TrackedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
