//! Policies deciding which tracked objects to drop as a namespace grows.

use std::collections::HashMap;

use super::access_stack::AccessStack;
use crate::types::ObjectId;

/// Removal requested by an [`EvictionStrategy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvictionAction {
    /// Drop every version of the object.
    RemoveObject(ObjectId),
    /// Drop a single version of the object.
    RemoveVersion {
        /// Object to trim.
        object_id: ObjectId,
        /// Version to drop.
        version: u32,
    },
}

/// Decides what to evict when a new object starts being tracked.
pub trait EvictionStrategy: Send + Sync {
    /// Inspects `stack` right before `incoming` joins it. Must never name
    /// `incoming` itself.
    fn evict(&self, stack: &AccessStack, incoming: ObjectId) -> Vec<EvictionAction>;
}

/// Keeps everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoEviction;

impl EvictionStrategy for NoEviction {
    fn evict(&self, _stack: &AccessStack, _incoming: ObjectId) -> Vec<EvictionAction> {
        Vec::new()
    }
}

/// Bounds the number of distinct tracked objects.
///
/// While over the bound, the object at the bottom of the stack loses its
/// oldest version; once it has a single version left, the whole object goes.
#[derive(Clone, Copy, Debug)]
pub struct OldestObjectFirst {
    /// Distinct objects allowed, counting the incoming one.
    pub max_objects: usize,
}

impl OldestObjectFirst {
    /// Creates the strategy. A bound of zero is treated as one.
    pub fn new(max_objects: usize) -> Self {
        Self {
            max_objects: max_objects.max(1),
        }
    }
}

impl EvictionStrategy for OldestObjectFirst {
    fn evict(&self, stack: &AccessStack, incoming: ObjectId) -> Vec<EvictionAction> {
        let mut remaining: Vec<_> = stack
            .entries()
            .iter()
            .filter(|entry| entry.object_id != incoming)
            .copied()
            .collect();
        let mut versions: HashMap<ObjectId, usize> = HashMap::new();
        for entry in &remaining {
            *versions.entry(entry.object_id).or_default() += 1;
        }

        let mut actions = Vec::new();
        // The incoming object always counts toward the bound.
        while versions.len() + 1 > self.max_objects && !remaining.is_empty() {
            let oldest = remaining.remove(0);
            let count = versions.entry(oldest.object_id).or_default();
            if *count > 1 {
                *count -= 1;
                actions.push(EvictionAction::RemoveVersion {
                    object_id: oldest.object_id,
                    version: oldest.version,
                });
            } else {
                versions.remove(&oldest.object_id);
                actions.push(EvictionAction::RemoveObject(oldest.object_id));
            }
        }
        actions
    }
}
