//! Queue load information
//!
//! Subscribers receive the number of queued items every time it goes up or
//! down. Each subscriber gets its own unbounded channel; a subscriber that
//! drops its receiver is pruned on the next update.

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Publisher of queued-item counts
#[derive(Debug)]
pub struct LoadInfo {
    subscribers: Mutex<Vec<Sender<usize>>>,
    producing: AtomicBool,
}

impl LoadInfo {
    /// Create a publisher with no subscribers
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            producing: AtomicBool::new(true),
        }
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> Receiver<usize> {
        let (tx, rx) = channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Send `queued` to every live subscriber
    pub fn publish(&self, queued: usize) {
        if !self.producing.load(Ordering::Acquire) {
            return;
        }
        self.subscribers
            .lock()
            .retain(|tx| tx.send(queued).is_ok());
    }

    /// Stop sending updates until [`resume`](Self::resume)
    pub fn pause(&self) {
        self.producing.store(false, Ordering::Release);
    }

    /// Resume sending updates
    pub fn resume(&self) {
        self.producing.store(true, Ordering::Release);
    }

    /// Check if updates are being sent
    pub fn is_producing(&self) -> bool {
        self.producing.load(Ordering::Acquire)
    }

    /// Number of live subscribers as of the last update
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Disconnect every subscriber
    pub fn close(&self) {
        self.producing.store(false, Ordering::Release);
        self.subscribers.lock().clear();
    }
}

impl Default for LoadInfo {
    fn default() -> Self {
        Self::new()
    }
}
