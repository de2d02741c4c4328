//! Single-slot buffers.
//!
//! A slot is a capacity-1, single-producer/single-consumer channel between the
//! scheduler and a body's exchange task. Neither side ever waits on the other
//! from the scheduler's point of view:
//! - [`SlotWriter::offer`] into a full slot drops the new value (drop-on-full).
//! - [`SlotReader::take`] from an empty slot returns `None` (drop-on-empty).
//!
//! The exchange side may additionally `await` a value with [`SlotReader::recv`].

use tokio::sync::mpsc::{self, error::TrySendError};

/// Result of offering a value to a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Accepted,
    /// The slot already held an unconsumed value; the offered one was dropped.
    Dropped,
    /// The reader is gone.
    Closed,
}

/// Creates a connected writer/reader pair.
pub fn slot<T>() -> (SlotWriter<T>, SlotReader<T>) {
    let (tx, rx) = mpsc::channel(1);
    (SlotWriter { tx }, SlotReader { rx })
}

/// Producer end of a slot.
#[derive(Debug)]
pub struct SlotWriter<T> {
    tx: mpsc::Sender<T>,
}

impl<T> SlotWriter<T> {
    /// Stores `value` if the slot is empty.
    pub fn offer(&self, value: T) -> Offer {
        match self.tx.try_send(value) {
            Ok(()) => Offer::Accepted,
            Err(TrySendError::Full(_)) => Offer::Dropped,
            Err(TrySendError::Closed(_)) => Offer::Closed,
        }
    }
}

/// Consumer end of a slot.
#[derive(Debug)]
pub struct SlotReader<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> SlotReader<T> {
    /// Takes the pending value without waiting.
    pub fn take(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Waits for the next value; `None` once the writer is gone and the slot is empty.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}
