#![forbid(unsafe_code)]

//! Session-scoped facade tying the pipeline, version indexes and access stacks
//! together.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, trace};

use super::access_stack::{AccessOutcome, AccessStack, RollbackStep};
use super::eviction::{EvictionAction, EvictionStrategy, NoEviction, OldestObjectFirst};
use super::metrics::PipelineStatsSnapshot;
use super::options::StoreOptions;
use super::pending::PushOutcome;
use super::pipeline::{PipelineConfig, SerializationPipeline};
use super::ser::{PageSerializer, VersionedObject};
use super::version_index::VersionIndex;
use crate::primitives::io::DiskStore;
use crate::types::{normalize_namespace, ObjectId, Result, StoreError, VersionCursor, VersionKey};

/// Most recently stored object of a namespace, kept live for cheap re-reads.
struct LastObject<T> {
    object_id: ObjectId,
    version: u32,
    sub_version: u32,
    object: Arc<T>,
}

impl<T> LastObject<T> {
    fn matches(&self, object_id: ObjectId, version: Option<u32>, sub_version: Option<u32>) -> bool {
        self.object_id == object_id
            && version.map_or(true, |v| v == self.version)
            && sub_version.map_or(true, |s| s == self.sub_version)
    }
}

struct NamespaceState<T> {
    index: VersionIndex,
    stack: AccessStack,
    last: Option<LastObject<T>>,
}

impl<T> NamespaceState<T> {
    fn forget_last(&mut self, object_id: ObjectId, version: Option<u32>) {
        if self
            .last
            .as_ref()
            .is_some_and(|last| last.matches(object_id, version, None))
        {
            self.last = None;
        }
    }
}

type SharedNamespace<T> = Arc<Mutex<NamespaceState<T>>>;

struct SessionState<T> {
    namespaces: Mutex<HashMap<String, SharedNamespace<T>>>,
}

/// Point-in-time view of a store's activity.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct StoreStats {
    /// Worker counters.
    pub pipeline: PipelineStatsSnapshot,
    /// Serialized records held in memory.
    pub cached_records: usize,
    /// Payload bytes held in memory.
    pub cached_bytes: usize,
    /// Objects still waiting to be serialized.
    pub queued: usize,
    /// Sessions with in-memory state.
    pub sessions: usize,
}

/// Versioned, write-behind store of view objects, partitioned by session.
///
/// Objects are queued on [`store`](Self::store) and serialized in the
/// background; [`get`](Self::get) always observes every version stored before
/// it, whether or not the workers have caught up.
pub struct SessionPageStore<T: VersionedObject> {
    options: StoreOptions,
    pipeline: SerializationPipeline<T>,
    sessions: RwLock<HashMap<String, Arc<SessionState<T>>>>,
    eviction: Arc<dyn EvictionStrategy>,
    closed: AtomicBool,
}

impl<T: VersionedObject> SessionPageStore<T> {
    /// Opens a store under `options.root` and starts its workers.
    ///
    /// With `max_tracked_objects` set, the oldest tracked objects are evicted
    /// as new ones arrive; otherwise nothing is evicted.
    pub fn open(options: StoreOptions, serializer: impl PageSerializer<T>) -> Result<Self> {
        let eviction: Arc<dyn EvictionStrategy> = match options.max_tracked_objects {
            Some(max) => Arc::new(OldestObjectFirst::new(max)),
            None => Arc::new(NoEviction),
        };
        Self::open_with_eviction(options, serializer, eviction)
    }

    /// Opens a store with a custom eviction policy.
    pub fn open_with_eviction(
        options: StoreOptions,
        serializer: impl PageSerializer<T>,
        eviction: Arc<dyn EvictionStrategy>,
    ) -> Result<Self> {
        options.validate()?;
        let disk = DiskStore::open(&options.root)?;
        let pipeline = SerializationPipeline::start(
            disk,
            Arc::new(serializer),
            options.pending_cache_max_bytes,
            PipelineConfig {
                idle_interval: options.idle_interval,
                stall_timeout: options.stall_timeout,
                flush_on_shutdown: options.flush_on_shutdown,
            },
        )?;
        info!(root = %options.root.display(), "store.open");
        Ok(Self {
            options,
            pipeline,
            sessions: RwLock::new(HashMap::new()),
            eviction,
            closed: AtomicBool::new(false),
        })
    }

    /// Options the store was opened with.
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Fetches one object version.
    ///
    /// `version == None` means the latest recorded version; `sub_version ==
    /// None` means the latest sub-version of the chosen version. Anything
    /// unavailable, unreadable or undecodable yields `Ok(None)`.
    pub fn get(
        &self,
        session_id: &str,
        namespace: Option<&str>,
        object_id: ObjectId,
        version: Option<u32>,
        sub_version: Option<u32>,
    ) -> Result<Option<Arc<T>>> {
        self.ensure_open()?;
        let namespace = normalize_namespace(namespace);

        let indexed = match self.namespace(session_id, namespace) {
            Some(state) => {
                let state = state.lock();
                if let Some(last) = state
                    .last
                    .as_ref()
                    .filter(|last| last.matches(object_id, version, sub_version))
                {
                    trace!(session = session_id, namespace, object = %object_id, "store.get.last_hit");
                    return Ok(Some(Arc::clone(&last.object)));
                }
                state.index.resolve(object_id, version)
            }
            None => None,
        };

        let (version, sub_version) = match (version, sub_version, indexed) {
            (Some(v), Some(s), _) => (v, s),
            (None, Some(s), Some((v, _))) => (v, s),
            (_, None, Some(revision)) => revision,
            (Some(v), None, None) => {
                match self
                    .pipeline
                    .highest_sub_version(session_id, namespace, object_id, v)
                {
                    Some(s) => (v, s),
                    None => {
                        debug!(session = session_id, namespace, object = %object_id, version = v, "store.get.unknown_version");
                        return Ok(None);
                    }
                }
            }
            (None, _, None) => {
                debug!(session = session_id, namespace, object = %object_id, "store.get.not_indexed");
                return Ok(None);
            }
        };

        let key = VersionKey::new(session_id, Some(namespace), object_id, version, sub_version);
        let Some(bytes) = self.pipeline.resolve_bytes(&key)? else {
            debug!(key = %key, "store.get.miss");
            return Ok(None);
        };
        Ok(self.pipeline.decode(&key, &bytes).map(Arc::new))
    }

    /// Queues `object` for persistence and makes it the latest version of its id.
    ///
    /// Storing a key whose bytes were already produced keeps those bytes;
    /// `object` is then ignored, and later reads return the earlier content.
    ///
    /// Navigation is recorded separately through [`access`](Self::access).
    pub fn store(&self, session_id: &str, object: Arc<T>) -> Result<()> {
        self.ensure_open()?;
        let namespace = object.namespace().to_owned();
        let object_id = object.object_id();
        let version = object.version();
        let sub_version = object.sub_version();
        let key = VersionKey::new(session_id, Some(&namespace), object_id, version, sub_version)
            .with_type_name(object.type_name());
        trace!(key = %key, "store.store");
        let outcome = self.pipeline.enqueue(key, Arc::clone(&object));

        let state = self.namespace_or_create(session_id, &namespace);
        let mut state = state.lock();
        let is_new =
            state.index.resolve(object_id, None).is_none() && !state.stack.tracks(object_id);
        state.index.record(object_id, version, sub_version);
        // Serialized bytes for this key win over the ignored object.
        if outcome != PushOutcome::AlreadySerialized {
            state.last = Some(LastObject {
                object_id,
                version,
                sub_version,
                object,
            });
        }
        if is_new {
            let actions = self.eviction.evict(&state.stack, object_id);
            for action in actions {
                self.apply_eviction(session_id, &namespace, &mut state, action);
            }
        }
        Ok(())
    }

    /// Records that `version` of `object_id` was shown to the user.
    ///
    /// Returning to a version deeper in the history discards everything
    /// accessed after it.
    pub fn access(
        &self,
        session_id: &str,
        namespace: Option<&str>,
        object_id: ObjectId,
        version: u32,
    ) -> Result<()> {
        self.ensure_open()?;
        let namespace = normalize_namespace(namespace);
        let state = self.namespace_or_create(session_id, namespace);
        let mut state = state.lock();
        let steps = match state.stack.access(object_id, version) {
            AccessOutcome::Unchanged | AccessOutcome::Pushed => return Ok(()),
            AccessOutcome::Rollback(steps) => steps,
        };
        debug!(
            session = session_id,
            namespace,
            object = %object_id,
            version,
            discarded = steps.len(),
            "store.rollback"
        );
        for step in steps {
            match step {
                RollbackStep::TrimVersion { object_id, version } => {
                    self.pipeline
                        .remove_version(session_id, namespace, object_id, version);
                    state.forget_last(object_id, Some(version));
                    self.repoint_index(session_id, namespace, &mut state, object_id);
                }
                RollbackStep::RemoveObject { object_id } => {
                    self.pipeline.remove_object(session_id, namespace, object_id);
                    state.index.forget(object_id);
                    state.forget_last(object_id, None);
                }
            }
        }
        Ok(())
    }

    /// Blocks until the version `object` carries has been serialized and
    /// handed to the save stage.
    pub fn accessed(&self, session_id: &str, object: &T) -> Result<()> {
        self.ensure_open()?;
        let key = VersionKey::new(
            session_id,
            Some(object.namespace()),
            object.object_id(),
            object.version(),
            object.sub_version(),
        );
        self.pipeline.resolve_bytes(&key)?;
        Ok(())
    }

    /// Removes one object, or with `object_id == None` a whole namespace.
    pub fn remove(
        &self,
        session_id: &str,
        namespace: Option<&str>,
        object_id: Option<ObjectId>,
    ) -> Result<()> {
        self.ensure_open()?;
        let namespace = normalize_namespace(namespace);
        match object_id {
            Some(object_id) => {
                self.pipeline.remove_object(session_id, namespace, object_id);
                if let Some(state) = self.namespace(session_id, namespace) {
                    let mut state = state.lock();
                    state.stack.remove_object(object_id);
                    state.index.forget(object_id);
                    state.forget_last(object_id, None);
                }
            }
            None => {
                self.pipeline.remove_namespace(session_id, namespace);
                if let Some(session) = self.session(session_id) {
                    session.namespaces.lock().remove(namespace);
                }
            }
        }
        Ok(())
    }

    /// Forgets everything stored for `session_id`, in memory and on disk.
    pub fn unbind(&self, session_id: &str) -> Result<()> {
        self.ensure_open()?;
        self.sessions.write().remove(session_id);
        self.pipeline.remove_session(session_id)?;
        info!(session = session_id, "store.unbind");
        Ok(())
    }

    /// Whether any sub-version of `version` is retrievable.
    pub fn contains(
        &self,
        session_id: &str,
        namespace: Option<&str>,
        object_id: ObjectId,
        version: u32,
    ) -> Result<bool> {
        self.ensure_open()?;
        let namespace = normalize_namespace(namespace);
        Ok(self
            .pipeline
            .highest_sub_version(session_id, namespace, object_id, version)
            .is_some())
    }

    /// Fetches the object `steps` sub-versions behind `cursor`.
    pub fn rollback(
        &self,
        session_id: &str,
        namespace: Option<&str>,
        object_id: ObjectId,
        cursor: VersionCursor,
        steps: u32,
    ) -> Result<Option<Arc<T>>> {
        let (version, sub_version) = cursor.step_back(steps)?;
        debug!(
            session = session_id,
            object = %object_id,
            from = %cursor,
            version,
            sub_version,
            "store.rollback.resolve"
        );
        self.get(
            session_id,
            namespace,
            object_id,
            Some(version),
            Some(sub_version),
        )
    }

    /// Current activity counters.
    pub fn stats(&self) -> StoreStats {
        let (cached_records, cached_bytes) = self.pipeline.cache_usage();
        StoreStats {
            pipeline: self.pipeline.stats(),
            cached_records,
            cached_bytes,
            queued: self.pipeline.queued(),
            sessions: self.sessions.read().len(),
        }
    }

    /// Stops the workers, flushing queued work when configured to. Every
    /// later call other than `stats` fails with [`StoreError::ShutDown`].
    pub fn destroy(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.pipeline.shutdown();
        info!(root = %self.options.root.display(), "store.destroy");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::ShutDown);
        }
        Ok(())
    }

    fn session(&self, session_id: &str) -> Option<Arc<SessionState<T>>> {
        self.sessions.read().get(session_id).cloned()
    }

    fn namespace(&self, session_id: &str, namespace: &str) -> Option<SharedNamespace<T>> {
        self.session(session_id)?
            .namespaces
            .lock()
            .get(namespace)
            .cloned()
    }

    fn namespace_or_create(&self, session_id: &str, namespace: &str) -> SharedNamespace<T> {
        let session = match self.session(session_id) {
            Some(session) => session,
            None => Arc::clone(
                self.sessions
                    .write()
                    .entry(session_id.to_owned())
                    .or_insert_with(|| {
                        Arc::new(SessionState {
                            namespaces: Mutex::new(HashMap::new()),
                        })
                    }),
            ),
        };
        let capacity = self.options.version_index_capacity;
        let mut namespaces = session.namespaces.lock();
        Arc::clone(namespaces.entry(namespace.to_owned()).or_insert_with(|| {
            Arc::new(Mutex::new(NamespaceState {
                index: VersionIndex::new(capacity),
                stack: AccessStack::new(),
                last: None,
            }))
        }))
    }

    /// Points the index at the newest version of `object_id` still on the stack.
    fn repoint_index(
        &self,
        session_id: &str,
        namespace: &str,
        state: &mut NamespaceState<T>,
        object_id: ObjectId,
    ) {
        let surviving = state.stack.latest_version(object_id).and_then(|version| {
            self.pipeline
                .highest_sub_version(session_id, namespace, object_id, version)
                .map(|sub| (version, sub))
        });
        match surviving {
            Some((version, sub_version)) => state.index.record(object_id, version, sub_version),
            None => {
                state.index.forget(object_id);
            }
        }
    }

    fn apply_eviction(
        &self,
        session_id: &str,
        namespace: &str,
        state: &mut NamespaceState<T>,
        action: EvictionAction,
    ) {
        debug!(session = session_id, namespace, ?action, "store.evict");
        match action {
            EvictionAction::RemoveObject(object_id) => {
                self.pipeline.remove_object(session_id, namespace, object_id);
                state.stack.remove_object(object_id);
                state.index.forget(object_id);
                state.forget_last(object_id, None);
            }
            EvictionAction::RemoveVersion { object_id, version } => {
                self.pipeline
                    .remove_version(session_id, namespace, object_id, version);
                state.stack.remove_version(object_id, version);
                state.forget_last(object_id, Some(version));
                if state.index.resolve(object_id, Some(version)).is_some() {
                    self.repoint_index(session_id, namespace, state, object_id);
                }
            }
        }
    }
}

impl<T: VersionedObject> Drop for SessionPageStore<T> {
    fn drop(&mut self) {
        self.destroy();
    }
}
