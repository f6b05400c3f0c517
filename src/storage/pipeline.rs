#![forbid(unsafe_code)]

//! Two-stage write-behind pipeline.
//!
//! Stored objects are queued per session. A serialize worker converts the
//! newest queued object of each scheduled session, publishes the bytes to the
//! [`PendingCache`] and hands a save job to the save worker, which writes the
//! record through [`DiskStore`]. Readers never wait for either worker: they
//! drain the session's queue themselves, converting unclaimed entries inline
//! and blocking only on an entry another thread is converting.
//!
//! Removal takes `removal` exclusively; publishing and saving take it shared,
//! so a record removed by the caller can never be re-created by a worker that
//! was mid-flight.

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use super::cache::PendingCache;
use super::metrics::{PipelineMetrics, PipelineStatsSnapshot};
use super::pending::{PendingEntry, PushOutcome, ReaderStep, SessionQueue};
use super::ser::PageSerializer;
use crate::primitives::concurrency::SlotState;
use crate::primitives::io::DiskStore;
use crate::types::{ObjectId, Result, StoreError, VersionKey};

/// Worker settings taken from [`super::StoreOptions`].
#[derive(Clone, Copy, Debug)]
pub(crate) struct PipelineConfig {
    pub(crate) idle_interval: Duration,
    pub(crate) stall_timeout: Option<Duration>,
    pub(crate) flush_on_shutdown: bool,
}

enum SaveMessage {
    Save(SaveJob),
    Shutdown,
}

struct SaveJob {
    key: VersionKey,
    bytes: Bytes,
}

enum NextWork<T> {
    Session(Arc<SessionQueue<T>>),
    Sweep,
    Stop,
}

struct Schedule<T> {
    ready: VecDeque<Arc<SessionQueue<T>>>,
    shutdown: bool,
}

struct PipelineShared<T> {
    disk: DiskStore,
    cache: PendingCache,
    serializer: Arc<dyn PageSerializer<T>>,
    sessions: RwLock<HashMap<String, Arc<SessionQueue<T>>>>,
    schedule: Mutex<Schedule<T>>,
    wakeup: Condvar,
    save_tx: Mutex<Option<Sender<SaveMessage>>>,
    removal: RwLock<()>,
    next_seq: AtomicU64,
    metrics: PipelineMetrics,
    config: PipelineConfig,
}

struct Workers {
    serialize: JoinHandle<()>,
    save: JoinHandle<()>,
}

/// Serialize queue, pending cache and background workers for one store.
pub(crate) struct SerializationPipeline<T: Send + Sync + 'static> {
    shared: Arc<PipelineShared<T>>,
    workers: Mutex<Option<Workers>>,
}

impl<T: Send + Sync + 'static> SerializationPipeline<T> {
    /// Starts both workers.
    pub(crate) fn start(
        disk: DiskStore,
        serializer: Arc<dyn PageSerializer<T>>,
        cache_max_bytes: Option<usize>,
        config: PipelineConfig,
    ) -> Result<Self> {
        let (save_tx, save_rx) = mpsc::channel();
        let shared = Arc::new(PipelineShared {
            disk,
            cache: PendingCache::new(cache_max_bytes),
            serializer,
            sessions: RwLock::new(HashMap::new()),
            schedule: Mutex::new(Schedule {
                ready: VecDeque::new(),
                shutdown: false,
            }),
            wakeup: Condvar::new(),
            save_tx: Mutex::new(Some(save_tx)),
            removal: RwLock::new(()),
            next_seq: AtomicU64::new(1),
            metrics: PipelineMetrics::default(),
            config,
        });

        let save = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("pagekeep-save".into())
                .spawn(move || shared.save_loop(save_rx))?
        };
        let serialize = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("pagekeep-serialize".into())
                .spawn(move || shared.serialize_loop())
        };
        let serialize = match serialize {
            Ok(handle) => handle,
            Err(err) => {
                shared.send_shutdown();
                let _ = save.join();
                return Err(err.into());
            }
        };
        debug!(
            root = %shared.disk.root().display(),
            idle_ms = config.idle_interval.as_millis() as u64,
            "pipeline.start"
        );
        Ok(Self {
            shared,
            workers: Mutex::new(Some(Workers { serialize, save })),
        })
    }

    /// Queues `object` for serialization under `key`.
    ///
    /// Returns [`PushOutcome::AlreadySerialized`] when `key` already holds
    /// bytes; the new object is then ignored.
    pub(crate) fn enqueue(&self, key: VersionKey, object: Arc<T>) -> PushOutcome {
        self.shared.enqueue(key, object)
    }

    /// Bytes for `key`, draining the session's queue first.
    pub(crate) fn resolve_bytes(&self, key: &VersionKey) -> Result<Option<Bytes>> {
        self.shared.resolve_bytes(key)
    }

    /// Deserializes `bytes`. Failures are logged and read as absent.
    pub(crate) fn decode(&self, key: &VersionKey, bytes: &[u8]) -> Option<T> {
        match self.shared.serializer.deserialize(bytes) {
            Ok(object) => Some(object),
            Err(err) => {
                warn!(key = %key, error = %err, "pipeline.deserialize.failed");
                None
            }
        }
    }

    /// Highest sub-version of `version` known anywhere in the pipeline.
    pub(crate) fn highest_sub_version(
        &self,
        session_id: &str,
        namespace: &str,
        object_id: ObjectId,
        version: u32,
    ) -> Option<u32> {
        let shared = &self.shared;
        let mut subs = Vec::new();
        if let Some(queue) = shared.queue(session_id) {
            subs.extend(queue.sub_versions(|key| {
                key.namespace() == namespace
                    && key.object_id() == object_id
                    && key.version() == version
            }));
        }
        subs.extend(
            shared
                .cache
                .sub_versions(session_id, namespace, object_id, version),
        );
        match shared
            .disk
            .sub_versions(session_id, namespace, object_id, version)
        {
            Ok(on_disk) => subs.extend(on_disk),
            Err(err) => {
                warn!(session = session_id, error = %err, "pipeline.sub_versions.disk_failed")
            }
        }
        subs.into_iter().max()
    }

    /// Removes every sub-version of one version of an object.
    pub(crate) fn remove_version(
        &self,
        session_id: &str,
        namespace: &str,
        object_id: ObjectId,
        version: u32,
    ) {
        let shared = &self.shared;
        let _guard = shared.removal.write();
        let matches = |key: &VersionKey| {
            key.session_id() == session_id
                && key.namespace() == namespace
                && key.object_id() == object_id
                && key.version() == version
        };
        let queued = shared.cancel_queued(session_id, &matches);
        let cached = shared.cache.remove_where(matches);
        let files = shared
            .disk
            .remove_version(session_id, namespace, object_id, version);
        debug!(
            session = session_id,
            namespace,
            object = %object_id,
            version,
            queued,
            cached,
            files,
            "pipeline.remove_version"
        );
    }

    /// Removes every version of an object.
    pub(crate) fn remove_object(&self, session_id: &str, namespace: &str, object_id: ObjectId) {
        let shared = &self.shared;
        let _guard = shared.removal.write();
        let matches = |key: &VersionKey| {
            key.session_id() == session_id
                && key.namespace() == namespace
                && key.object_id() == object_id
        };
        let queued = shared.cancel_queued(session_id, &matches);
        let cached = shared.cache.remove_where(matches);
        let files = shared.disk.remove_object(session_id, namespace, object_id);
        debug!(
            session = session_id,
            namespace,
            object = %object_id,
            queued,
            cached,
            files,
            "pipeline.remove_object"
        );
    }

    /// Removes every object of a namespace.
    pub(crate) fn remove_namespace(&self, session_id: &str, namespace: &str) {
        let shared = &self.shared;
        let _guard = shared.removal.write();
        let matches =
            |key: &VersionKey| key.session_id() == session_id && key.namespace() == namespace;
        let queued = shared.cancel_queued(session_id, &matches);
        let cached = shared.cache.remove_where(matches);
        let files = shared.disk.remove_namespace(session_id, namespace);
        debug!(
            session = session_id,
            namespace,
            queued,
            cached,
            files,
            "pipeline.remove_namespace"
        );
    }

    /// Forgets the session's queue, cached records and directory.
    pub(crate) fn remove_session(&self, session_id: &str) -> Result<()> {
        let shared = &self.shared;
        let _guard = shared.removal.write();
        let queued = shared
            .sessions
            .write()
            .remove(session_id)
            .map(|queue| queue.cancel_where(|_| true))
            .unwrap_or(0);
        let cached = shared
            .cache
            .remove_where(|key| key.session_id() == session_id);
        shared.disk.remove_session(session_id)?;
        debug!(session = session_id, queued, cached, "pipeline.remove_session");
        Ok(())
    }

    /// Counters of both workers.
    pub(crate) fn stats(&self) -> PipelineStatsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Records currently held in the pending cache and their payload bytes.
    pub(crate) fn cache_usage(&self) -> (usize, usize) {
        (self.shared.cache.len(), self.shared.cache.total_bytes())
    }

    /// Entries still queued for serialization across all sessions.
    pub(crate) fn queued(&self) -> usize {
        self.shared
            .sessions
            .read()
            .values()
            .map(|queue| queue.len())
            .sum()
    }

    /// Queues `object` and serializes it on this thread, leaving the settled
    /// entry queued without waking the worker.
    #[cfg(test)]
    pub(crate) fn enqueue_serialized_for_test(&self, key: VersionKey, object: Arc<T>) {
        let queue = self.shared.queue_or_create(key.session_id());
        let seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed);
        queue.push(key, seq, object);
        if let Some((entry, object)) = queue.claim_newest() {
            self.shared.convert(&entry, &object, true);
        }
    }

    /// Stops both workers, flushing queued work first when configured to.
    ///
    /// Idempotent; later calls return immediately.
    pub(crate) fn shutdown(&self) {
        let Some(workers) = self.workers.lock().take() else {
            return;
        };
        let shared = &self.shared;
        shared.schedule.lock().shutdown = true;
        shared.wakeup.notify_all();
        if workers.serialize.join().is_err() {
            error!("pipeline.serialize.join_failed");
        }
        shared.send_shutdown();
        if workers.save.join().is_err() {
            error!("pipeline.save.join_failed");
        }
        let stats = shared.metrics.snapshot();
        info!(
            serialized = stats.serialized(),
            saved = stats.records_saved,
            failures = stats.serialization_failures + stats.save_failures,
            "pipeline.shutdown"
        );
    }
}

impl<T: Send + Sync + 'static> Drop for SerializationPipeline<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<T: Send + Sync + 'static> PipelineShared<T> {
    fn queue(&self, session_id: &str) -> Option<Arc<SessionQueue<T>>> {
        self.sessions.read().get(session_id).cloned()
    }

    fn queue_or_create(&self, session_id: &str) -> Arc<SessionQueue<T>> {
        if let Some(queue) = self.queue(session_id) {
            return queue;
        }
        let mut sessions = self.sessions.write();
        Arc::clone(
            sessions
                .entry(session_id.to_owned())
                .or_insert_with(|| Arc::new(SessionQueue::new(session_id))),
        )
    }

    fn enqueue(&self, key: VersionKey, object: Arc<T>) -> PushOutcome {
        let queue = self.queue_or_create(key.session_id());
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let outcome = queue.push(key.clone(), seq, object);
        trace!(key = %key, ?outcome, "pipeline.enqueue");
        if outcome == PushOutcome::Appended {
            self.schedule(queue);
        }
        outcome
    }

    fn schedule(&self, queue: Arc<SessionQueue<T>>) {
        if !queue.mark_scheduled() {
            return;
        }
        self.schedule.lock().ready.push_back(queue);
        self.wakeup.notify_one();
    }

    fn cancel_queued(&self, session_id: &str, matches: &impl Fn(&VersionKey) -> bool) -> usize {
        self.queue(session_id)
            .map(|queue| queue.cancel_where(matches))
            .unwrap_or(0)
    }

    fn resolve_bytes(&self, key: &VersionKey) -> Result<Option<Bytes>> {
        let mut found = None;
        if let Some(queue) = self.queue(key.session_id()) {
            loop {
                match queue.reader_step() {
                    ReaderStep::Empty => break,
                    ReaderStep::Claimed(entry, object) => {
                        let bytes = self.convert(&entry, &object, true);
                        queue.detach(&entry);
                        if found.is_none() && entry.key == *key {
                            found = bytes;
                        }
                    }
                    ReaderStep::Settled(entry, state) => {
                        if let SlotState::Bytes(bytes) = state {
                            if found.is_none() && entry.key == *key {
                                found = Some(bytes);
                            }
                        }
                    }
                    ReaderStep::InFlight(entry) => {
                        entry
                            .slot
                            .wait_while_serializing(self.config.stall_timeout)
                            .map_err(|waited| {
                                warn!(key = %entry.key, ?waited, "pipeline.read.stalled");
                                StoreError::Stalled {
                                    key: entry.key.clone(),
                                    waited,
                                }
                            })?;
                    }
                }
            }
        }
        if found.is_none() {
            found = self.cache.get(key);
        }
        if found.is_none() {
            found = match self.disk.read(key) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(key = %key, error = %err, "pipeline.read.disk_failed");
                    None
                }
            };
        }
        Ok(found)
    }

    /// Serializes a claimed entry, publishes the result and settles the slot.
    fn convert(&self, entry: &PendingEntry<T>, object: &T, inline: bool) -> Option<Bytes> {
        let start = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.serializer.serialize(object)));
        match outcome {
            Ok(Ok(raw)) => {
                let bytes = Bytes::from(raw);
                self.metrics.record_serialized(inline, start.elapsed());
                self.publish(entry, bytes.clone());
                entry.slot.complete(bytes.clone());
                Some(bytes)
            }
            Ok(Err(err)) => {
                error!(key = %entry.key, inline, error = %err, "pipeline.serialize.failed");
                self.metrics.record_serialization_failure();
                entry.slot.fail();
                None
            }
            Err(_) => {
                error!(key = %entry.key, inline, "pipeline.serialize.panicked");
                self.metrics.record_serialization_failure();
                entry.slot.fail();
                None
            }
        }
    }

    fn publish(&self, entry: &PendingEntry<T>, bytes: Bytes) {
        let _guard = self.removal.read();
        if entry.is_cancelled() {
            trace!(key = %entry.key, "pipeline.publish.cancelled");
            return;
        }
        if !self.cache.insert(entry.key.clone(), bytes.clone(), entry.seq) {
            trace!(key = %entry.key, "pipeline.publish.superseded");
            return;
        }
        let job = SaveJob {
            key: entry.key.clone(),
            bytes,
        };
        let job = match self.save_tx.lock().as_ref() {
            Some(tx) => match tx.send(SaveMessage::Save(job)) {
                Ok(()) => return,
                Err(mpsc::SendError(SaveMessage::Save(job))) => job,
                Err(mpsc::SendError(SaveMessage::Shutdown)) => return,
            },
            None => job,
        };
        // Save worker is gone; write on this thread instead.
        self.save_locked(job);
    }

    fn send_shutdown(&self) {
        if let Some(tx) = self.save_tx.lock().take() {
            let _ = tx.send(SaveMessage::Shutdown);
        }
    }

    fn next_work(&self) -> NextWork<T> {
        let mut schedule = self.schedule.lock();
        loop {
            if let Some(queue) = schedule.ready.pop_front() {
                return NextWork::Session(queue);
            }
            if schedule.shutdown {
                return NextWork::Stop;
            }
            let timed_out = self
                .wakeup
                .wait_for(&mut schedule, self.config.idle_interval)
                .timed_out();
            if timed_out && schedule.ready.is_empty() && !schedule.shutdown {
                return NextWork::Sweep;
            }
        }
    }

    fn serialize_loop(&self) {
        trace!("pipeline.serialize.started");
        loop {
            match self.next_work() {
                NextWork::Session(queue) => {
                    queue.clear_scheduled();
                    self.drain(&queue);
                }
                NextWork::Sweep => self.sweep(),
                NextWork::Stop => break,
            }
        }
        if self.config.flush_on_shutdown {
            self.sweep();
        }
        trace!("pipeline.serialize.stopped");
    }

    fn drain(&self, queue: &SessionQueue<T>) {
        while let Some((entry, object)) = queue.claim_newest() {
            self.convert(&entry, &object, false);
            queue.detach(&entry);
        }
    }

    fn sweep(&self) {
        let queues: Vec<_> = self.sessions.read().values().cloned().collect();
        for queue in queues.iter().filter(|queue| queue.has_unclaimed()) {
            trace!(session = queue.session_id(), "pipeline.sweep");
            self.drain(queue);
        }
    }

    fn save_loop(&self, rx: Receiver<SaveMessage>) {
        trace!("pipeline.save.started");
        loop {
            match rx.recv_timeout(self.config.idle_interval) {
                Ok(SaveMessage::Save(job)) => {
                    let _guard = self.removal.read();
                    self.save_locked(job);
                }
                Ok(SaveMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => continue,
            }
        }
        trace!("pipeline.save.stopped");
    }

    /// Writes one job. The caller holds `removal` shared.
    fn save_locked(&self, job: SaveJob) {
        if !self.cache.needs_persist(&job.key, &job.bytes) {
            self.metrics.record_save_skipped();
            trace!(key = %job.key, "pipeline.save.skipped");
            return;
        }
        let start = Instant::now();
        match self.disk.write(&job.key, &job.bytes) {
            Ok(written) => {
                self.metrics.record_saved(written, start.elapsed());
                self.cache.mark_persisted(&job.key, &job.bytes);
            }
            Err(err) => {
                self.metrics.record_save_failure();
                error!(key = %job.key, error = %err, "pipeline.save.failed");
            }
        }
    }
}
