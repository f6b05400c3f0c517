//! Per-session queue of objects waiting to be serialized.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::primitives::concurrency::{PayloadSlot, SlotState};
use crate::types::VersionKey;

/// One queued object version.
pub(crate) struct PendingEntry<T> {
    pub(crate) key: VersionKey,
    pub(crate) seq: u64,
    pub(crate) slot: PayloadSlot<T>,
    cancelled: AtomicBool,
}

impl<T> PendingEntry<T> {
    fn new(key: VersionKey, seq: u64, object: Arc<T>) -> Self {
        Self {
            key,
            seq,
            slot: PayloadSlot::new(object),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Set once the entry's object, version or session was removed.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// What [`SessionQueue::push`] did with a new object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushOutcome {
    /// A new entry was appended.
    Appended,
    /// An unclaimed entry for the same key now holds the new object.
    Replaced,
    /// An entry for the same key already holds bytes and was left alone.
    AlreadySerialized,
}

/// One step of a reader draining the queue newest-first.
pub(crate) enum ReaderStep<T> {
    /// Nothing left.
    Empty,
    /// The newest entry was unclaimed; the reader now owns its conversion.
    /// It stays queued until the reader detaches it.
    Claimed(Arc<PendingEntry<T>>, Arc<T>),
    /// The newest entry had already settled and was popped.
    Settled(Arc<PendingEntry<T>>, SlotState),
    /// The newest entry is being converted by someone else.
    InFlight(Arc<PendingEntry<T>>),
}

/// Ordered list of a session's not-yet-serialized objects, oldest first.
pub(crate) struct SessionQueue<T> {
    session_id: String,
    entries: Mutex<VecDeque<Arc<PendingEntry<T>>>>,
    scheduled: AtomicBool,
}

impl<T> SessionQueue<T> {
    pub(crate) fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            entries: Mutex::new(VecDeque::new()),
            scheduled: AtomicBool::new(false),
        }
    }

    pub(crate) fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Queues `object` under `key`.
    pub(crate) fn push(&self, key: VersionKey, seq: u64, object: Arc<T>) -> PushOutcome {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.iter().rev().find(|entry| entry.key == key) {
            match existing.slot.state() {
                SlotState::Raw => {
                    if existing.slot.replace_raw(Arc::clone(&object)) {
                        return PushOutcome::Replaced;
                    }
                }
                SlotState::Bytes(_) => return PushOutcome::AlreadySerialized,
                SlotState::Serializing | SlotState::Failed => {}
            }
        }
        entries.push_back(Arc::new(PendingEntry::new(key, seq, object)));
        PushOutcome::Appended
    }

    /// Claims the newest unclaimed entry for the background worker.
    ///
    /// The entry stays queued so readers can find and wait on it.
    pub(crate) fn claim_newest(&self) -> Option<(Arc<PendingEntry<T>>, Arc<T>)> {
        let entries = self.entries.lock();
        entries.iter().rev().find_map(|entry| {
            entry
                .slot
                .try_claim()
                .map(|object| (Arc::clone(entry), object))
        })
    }

    /// Drops `entry` from the queue if it is still there.
    pub(crate) fn detach(&self, entry: &Arc<PendingEntry<T>>) {
        let mut entries = self.entries.lock();
        if let Some(pos) = entries.iter().position(|queued| Arc::ptr_eq(queued, entry)) {
            entries.remove(pos);
        }
    }

    /// Advances a reader's drain by one entry.
    ///
    /// A claimed entry stays queued while it converts so concurrent readers
    /// see it in flight instead of missing it.
    pub(crate) fn reader_step(&self) -> ReaderStep<T> {
        let mut entries = self.entries.lock();
        let Some(newest) = entries.back().cloned() else {
            return ReaderStep::Empty;
        };
        if let Some(object) = newest.slot.try_claim() {
            return ReaderStep::Claimed(newest, object);
        }
        match newest.slot.state() {
            SlotState::Serializing => ReaderStep::InFlight(newest),
            state => {
                entries.pop_back();
                ReaderStep::Settled(newest, state)
            }
        }
    }

    /// Cancels and unlinks every entry whose key matches `predicate`.
    pub(crate) fn cancel_where(&self, predicate: impl Fn(&VersionKey) -> bool) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| {
            if predicate(&entry.key) {
                entry.cancelled.store(true, Ordering::Release);
                false
            } else {
                true
            }
        });
        before - entries.len()
    }

    /// Sub-versions of matching entries that have not failed.
    pub(crate) fn sub_versions(&self, matches: impl Fn(&VersionKey) -> bool) -> Vec<u32> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| matches(&entry.key))
            .filter(|entry| !matches!(entry.slot.state(), SlotState::Failed))
            .map(|entry| entry.key.sub_version())
            .collect()
    }

    /// True while an unclaimed entry is waiting.
    pub(crate) fn has_unclaimed(&self) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|entry| matches!(entry.slot.state(), SlotState::Raw))
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Marks the queue as handed to the worker. Returns false if it already was.
    pub(crate) fn mark_scheduled(&self) -> bool {
        !self.scheduled.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn clear_scheduled(&self) {
        self.scheduled.store(false, Ordering::Release);
    }
}
