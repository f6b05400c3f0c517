#![forbid(unsafe_code)]

//! Claimable payload slot with a one-shot completion signal.
//!
//! A slot starts out holding a live object (`Raw`). Exactly one thread may
//! claim it, which moves it to `Serializing`; that thread later settles it as
//! `Bytes` or `Failed`. Anyone who observes `Serializing` can block until the
//! slot settles.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

enum Payload<T> {
    Raw(Arc<T>),
    Serializing,
    Bytes(Bytes),
    Failed,
}

/// Observable state of a [`PayloadSlot`].
#[derive(Clone, Debug)]
pub enum SlotState {
    /// Holds the live object, nobody has claimed it.
    Raw,
    /// Claimed; conversion in progress.
    Serializing,
    /// Converted.
    Bytes(Bytes),
    /// Conversion failed; the payload is gone.
    Failed,
}

impl SlotState {
    /// True for `Bytes` and `Failed`.
    pub fn is_settled(&self) -> bool {
        matches!(self, SlotState::Bytes(_) | SlotState::Failed)
    }
}

/// Payload slot shared between the producer, the worker and readers.
pub struct PayloadSlot<T> {
    payload: Mutex<Payload<T>>,
    settled: Condvar,
}

impl<T> PayloadSlot<T> {
    /// Creates a slot holding `object`.
    pub fn new(object: Arc<T>) -> Self {
        Self {
            payload: Mutex::new(Payload::Raw(object)),
            settled: Condvar::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> SlotState {
        observe(&self.payload.lock())
    }

    /// Moves `Raw → Serializing` and hands the object to the caller.
    ///
    /// Returns `None` when the slot was already claimed or settled.
    pub fn try_claim(&self) -> Option<Arc<T>> {
        let mut payload = self.payload.lock();
        if !matches!(*payload, Payload::Raw(_)) {
            return None;
        }
        match std::mem::replace(&mut *payload, Payload::Serializing) {
            Payload::Raw(object) => Some(object),
            _ => None,
        }
    }

    /// Swaps in a newer object while the slot is still unclaimed.
    pub fn replace_raw(&self, object: Arc<T>) -> bool {
        let mut payload = self.payload.lock();
        if let Payload::Raw(current) = &mut *payload {
            *current = object;
            true
        } else {
            false
        }
    }

    /// Settles a claimed slot with its serialized form and wakes waiters.
    pub fn complete(&self, bytes: Bytes) {
        self.settle(Payload::Bytes(bytes));
    }

    /// Settles a claimed slot as failed and wakes waiters.
    pub fn fail(&self) {
        self.settle(Payload::Failed);
    }

    fn settle(&self, outcome: Payload<T>) {
        let mut payload = self.payload.lock();
        if matches!(*payload, Payload::Serializing) {
            *payload = outcome;
            self.settled.notify_all();
        }
    }

    /// Blocks while the slot is `Serializing`.
    ///
    /// With a `timeout`, returns `Err(waited)` once it elapses without the
    /// slot settling.
    pub fn wait_while_serializing(
        &self,
        timeout: Option<Duration>,
    ) -> std::result::Result<SlotState, Duration> {
        let start = Instant::now();
        let mut payload = self.payload.lock();
        while matches!(*payload, Payload::Serializing) {
            match timeout {
                None => self.settled.wait(&mut payload),
                Some(limit) => {
                    let Some(remaining) = limit.checked_sub(start.elapsed()) else {
                        return Err(start.elapsed());
                    };
                    if self.settled.wait_for(&mut payload, remaining).timed_out()
                        && matches!(*payload, Payload::Serializing)
                    {
                        return Err(start.elapsed());
                    }
                }
            }
        }
        Ok(observe(&payload))
    }
}

fn observe<T>(payload: &Payload<T>) -> SlotState {
    match payload {
        Payload::Raw(_) => SlotState::Raw,
        Payload::Serializing => SlotState::Serializing,
        Payload::Bytes(bytes) => SlotState::Bytes(bytes.clone()),
        Payload::Failed => SlotState::Failed,
    }
}
