//! ==============================================================================
//! queue.rs - bounded hand-off between decode and forward
//! ==============================================================================
//!
//! purpose:
//!     decoding is cheap and runs in the notification path. forwarding is a
//!     network round trip and runs in its own task. this queue sits between
//!     the two so a slow state store cannot stall the device link.
//!
//! backpressure policies:
//!     - block:       producer waits for room (tokio mpsc). nothing is lost.
//!     - drop_oldest: producer never waits. when the queue already holds
//!                    `capacity` readings the oldest one is discarded
//!                    (VecDeque ring + tokio Notify).
//!
//! relationships:
//!     - sender owned by: supervisor.rs
//!     - receiver owned by: forward.rs (worker)
//!
//! ==============================================================================

use crate::domain::Reading;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{mpsc, Notify};

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Backpressure {
    #[default]
    Block,
    DropOldest,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("reading queue closed")]
pub struct QueueClosed;

pub enum ReadingSender {
    Block(mpsc::Sender<Reading>),
    DropOldest(RingSender),
}

pub enum ReadingReceiver {
    Block(mpsc::Receiver<Reading>),
    DropOldest(RingReceiver),
}

/// create a queue holding at most `capacity` readings
pub fn reading_queue(capacity: usize, policy: Backpressure) -> (ReadingSender, ReadingReceiver) {
    // mpsc panics on zero capacity, and an empty ring would drop everything
    let capacity = capacity.max(1);
    match policy {
        Backpressure::Block => {
            let (tx, rx) = mpsc::channel(capacity);
            (ReadingSender::Block(tx), ReadingReceiver::Block(rx))
        }
        Backpressure::DropOldest => {
            let ring = Arc::new(Ring {
                state: Mutex::new(RingState {
                    items: VecDeque::with_capacity(capacity),
                    capacity,
                    sender_gone: false,
                    receiver_gone: false,
                }),
                ready: Notify::new(),
            });
            (
                ReadingSender::DropOldest(RingSender(ring.clone())),
                ReadingReceiver::DropOldest(RingReceiver(ring)),
            )
        }
    }
}

impl ReadingSender {
    /// hand a reading to the forward worker
    ///
    /// only waits under the block policy.
    pub async fn send(&self, reading: Reading) -> Result<(), QueueClosed> {
        match self {
            ReadingSender::Block(tx) => tx.send(reading).await.map_err(|_| QueueClosed),
            ReadingSender::DropOldest(tx) => tx.push(reading),
        }
    }
}

impl ReadingReceiver {
    /// next reading in arrival order, or None once every sender is gone
    pub async fn recv(&mut self) -> Option<Reading> {
        match self {
            ReadingReceiver::Block(rx) => rx.recv().await,
            ReadingReceiver::DropOldest(rx) => rx.pop().await,
        }
    }
}

// ==============================================================================
// drop-oldest ring
// ==============================================================================

struct RingState {
    items: VecDeque<Reading>,
    capacity: usize,
    sender_gone: bool,
    receiver_gone: bool,
}

struct Ring {
    state: Mutex<RingState>,
    /// one permit per push or close; Notify keeps it if nobody is waiting yet
    ready: Notify,
}

impl Ring {
    fn lock(&self) -> MutexGuard<'_, RingState> {
        // the guarded data is plain values, so a poisoned lock is still usable
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct RingSender(Arc<Ring>);

pub struct RingReceiver(Arc<Ring>);

impl RingSender {
    fn push(&self, reading: Reading) -> Result<(), QueueClosed> {
        {
            let mut state = self.0.lock();
            if state.receiver_gone {
                return Err(QueueClosed);
            }
            if state.items.len() >= state.capacity {
                state.items.pop_front();
                tracing::warn!(capacity = state.capacity, "forward queue full, discarded oldest reading");
            }
            state.items.push_back(reading);
        }
        self.0.ready.notify_one();
        Ok(())
    }
}

impl Drop for RingSender {
    fn drop(&mut self) {
        self.0.lock().sender_gone = true;
        self.0.ready.notify_one();
    }
}

impl RingReceiver {
    async fn pop(&mut self) -> Option<Reading> {
        loop {
            {
                let mut state = self.0.lock();
                if let Some(reading) = state.items.pop_front() {
                    return Some(reading);
                }
                if state.sender_gone {
                    return None;
                }
            }
            self.0.ready.notified().await;
        }
    }
}

impl Drop for RingReceiver {
    fn drop(&mut self) {
        self.0.lock().receiver_gone = true;
    }
}
