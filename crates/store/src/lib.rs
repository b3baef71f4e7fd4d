//! Stitch store: idempotent cache fed by a snapshot and its change stream.
//!
//! The snapshot/stream boundary is best-effort, so the same object version may
//! show up both in a listing and as a watch event, and a re-list may repeat what
//! the stream already delivered. The cache absorbs both: applying an event it has
//! already seen is a no-op, and [`Cache::replace`] reports only real differences.

#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use stitch_core::{ChangeEvent, ChangeKind, ObjectRef, ResourceItem};
use tracing::{debug, trace};

/// Effect of applying one event to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Updated,
    Removed,
    /// Same version already cached.
    Duplicate,
    /// Older than the cached version.
    Stale,
    /// Delete for an object the cache does not hold.
    Missing,
}

impl Applied {
    /// Whether the event changed the cache and is worth reporting downstream.
    pub fn is_change(&self) -> bool { matches!(self, Applied::Inserted | Applied::Updated | Applied::Removed) }
}

/// Frozen view of the cache, ordered by identity.
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    pub epoch: u64,
    pub items: Vec<ResourceItem>,
}

// resourceVersion is opaque; only order when both sides are plain integers (etcd revisions).
fn compare_versions(incoming: &str, cached: &str) -> Option<Ordering> {
    if incoming == cached {
        return Some(Ordering::Equal);
    }
    match (incoming.parse::<u64>(), cached.parse::<u64>()) {
        (Ok(a), Ok(b)) => Some(a.cmp(&b)),
        _ => None,
    }
}

/// Identity-keyed view of a collection.
#[derive(Debug, Default)]
pub struct Cache {
    items: FxHashMap<ObjectRef, ResourceItem>,
    epoch: u64,
}

impl Cache {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    /// Number of mutations applied so far.
    pub fn epoch(&self) -> u64 { self.epoch }
    pub fn get(&self, key: &ObjectRef) -> Option<&ResourceItem> { self.items.get(key) }

    /// Apply a watch event. Replays and out-of-order versions leave the cache untouched.
    pub fn apply(&mut self, ev: &ChangeEvent) -> Applied {
        let key = ev.item.object_ref();
        let outcome = match ev.kind {
            ChangeKind::Added | ChangeKind::Modified => match self.items.get(&key) {
                None => {
                    self.items.insert(key.clone(), ev.item.clone());
                    Applied::Inserted
                }
                Some(cached) => match compare_versions(&ev.item.resource_version, &cached.resource_version) {
                    Some(Ordering::Equal) => Applied::Duplicate,
                    Some(Ordering::Less) => Applied::Stale,
                    _ => {
                        self.items.insert(key.clone(), ev.item.clone());
                        Applied::Updated
                    }
                },
            },
            ChangeKind::Deleted => match self.items.get(&key) {
                None => Applied::Missing,
                Some(cached) if compare_versions(&ev.item.resource_version, &cached.resource_version) == Some(Ordering::Less) => {
                    Applied::Stale
                }
                Some(_) => {
                    self.items.remove(&key);
                    Applied::Removed
                }
            },
        };
        if outcome.is_change() {
            self.epoch = self.epoch.saturating_add(1);
        }
        trace!(object = %key, event = %ev.kind, ?outcome, "cache apply");
        outcome
    }

    /// Replace the contents with a fresh listing and return the differences as events.
    ///
    /// Objects absent from the listing come back as `Deleted` with their last known state.
    pub fn replace(&mut self, items: impl IntoIterator<Item = ResourceItem>) -> Vec<ChangeEvent> {
        let mut next: FxHashMap<ObjectRef, ResourceItem> = FxHashMap::default();
        for item in items {
            next.insert(item.object_ref(), item);
        }

        let mut diff = Vec::new();
        for (key, item) in &next {
            match self.items.get(key) {
                None => diff.push(ChangeEvent { kind: ChangeKind::Added, item: item.clone() }),
                Some(cached) if cached.resource_version != item.resource_version => {
                    diff.push(ChangeEvent { kind: ChangeKind::Modified, item: item.clone() })
                }
                Some(_) => {}
            }
        }
        for (key, cached) in &self.items {
            if !next.contains_key(key) {
                diff.push(ChangeEvent { kind: ChangeKind::Deleted, item: cached.clone() });
            }
        }
        diff.sort_by(|a, b| a.item.object_ref().cmp(&b.item.object_ref()));

        self.items = next;
        if !diff.is_empty() {
            self.epoch = self.epoch.saturating_add(1);
        }
        debug!(size = self.items.len(), changes = diff.len(), "cache replaced");
        diff
    }

    pub fn freeze(&self) -> Arc<CacheSnapshot> {
        let mut items: Vec<ResourceItem> = self.items.values().cloned().collect();
        items.sort_by(|a, b| a.object_ref().cmp(&b.object_ref()));
        Arc::new(CacheSnapshot { epoch: self.epoch, items })
    }
}
