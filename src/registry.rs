//! Object Registry (spec.md §4.2): an ordered map from `(owner_queue,
//! local_key)` to binder objects, with a per-object notifier list guarded
//! by its own lock to keep death-notification churn off the registry lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::message::{ObjectId, QueueId};

/// A registered object. `real_cookie` is only meaningful on the owner's own
/// registry entry for an object it exported (spec.md invariant I1); a
/// reference entry's `real_cookie` is left at its default and never read.
pub struct BinderObject {
    pub id: ObjectId,
    real_cookie: AtomicU64,
    /// Keyed by `(cookie, notify_queue)` rather than stored as a `Vec`, per
    /// the design note in spec.md §9 ("Notifier list deletion") — removal
    /// is then a single map remove instead of a linear scan.
    notifiers: Mutex<HashMap<(u64, QueueId), ()>>,
}

impl BinderObject {
    fn new(id: ObjectId) -> Self {
        Self {
            id,
            real_cookie: AtomicU64::new(0),
            notifiers: Mutex::new(HashMap::new()),
        }
    }

    pub fn real_cookie(&self) -> u64 {
        self.real_cookie.load(Ordering::Acquire)
    }

    pub fn set_real_cookie(&self, cookie: u64) {
        self.real_cookie.store(cookie, Ordering::Release);
    }

    /// Record a death notifier. Idempotent re-registration with the same
    /// `(cookie, notify_queue)` is a no-op.
    pub fn add_notifier(&self, cookie: u64, notify_queue: QueueId) {
        self.notifiers.lock().unwrap().insert((cookie, notify_queue), ());
    }

    /// Remove a matching notifier. Returns whether one was actually
    /// present, so the caller can emit `BR_CLEAR_DEATH_NOTIFICATION_DONE`
    /// only when something was cleared (spec.md §4.4).
    pub fn remove_notifier(&self, cookie: u64, notify_queue: QueueId) -> bool {
        self.notifiers.lock().unwrap().remove(&(cookie, notify_queue)).is_some()
    }

    /// Drain every notifier (used by the owner-release fan-out, spec.md
    /// invariant I5). Each entry's `cookie` is what `BR_DEAD_BINDER`
    /// carries to its `notify_queue`.
    pub fn drain_notifiers(&self) -> Vec<(u64, QueueId)> {
        self.notifiers.lock().unwrap().drain().map(|(k, _)| k).collect()
    }
}

pub struct ObjectRegistry {
    self_queue: QueueId,
    entries: Mutex<BTreeMap<ObjectId, Arc<BinderObject>>>,
}

impl ObjectRegistry {
    pub fn new(self_queue: QueueId) -> Self {
        Self {
            self_queue,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn self_queue(&self) -> QueueId {
        self.self_queue
    }

    pub fn find(&self, owner: QueueId, local_key: u64) -> Option<Arc<BinderObject>> {
        self.entries.lock().unwrap().get(&ObjectId { owner, local_key }).cloned()
    }

    /// Shorthand for `find(self.self_queue(), key)`.
    pub fn find_local(&self, local_key: u64) -> Option<Arc<BinderObject>> {
        self.find(self.self_queue, local_key)
    }

    /// Idempotent insert: if a concurrent caller already won the race for
    /// this key, the candidate this call would have created is discarded
    /// and the winner is returned instead.
    pub fn insert_or_get(&self, owner: QueueId, local_key: u64) -> Arc<BinderObject> {
        let id = ObjectId { owner, local_key };
        let mut entries = self.entries.lock().unwrap();
        entries.entry(id).or_insert_with(|| Arc::new(BinderObject::new(id))).clone()
    }

    pub fn erase(&self, object: &Arc<BinderObject>) {
        self.entries.lock().unwrap().remove(&object.id);
    }

    /// Every object this registry owns (spec.md invariant I1: entries whose
    /// `owner == self_queue` were exported by this process). Used by the
    /// owner-release fan-out.
    pub fn owned_objects(&self) -> Vec<Arc<BinderObject>> {
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|obj| obj.id.owner == self.self_queue)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_or_get_is_idempotent() {
        let registry = ObjectRegistry::new(QueueId::from_u64(1));
        let a = registry.insert_or_get(QueueId::from_u64(1), 42);
        let b = registry.insert_or_get(QueueId::from_u64(1), 42);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn find_local_is_shorthand_for_find_self() {
        let registry = ObjectRegistry::new(QueueId::from_u64(9));
        let created = registry.insert_or_get(QueueId::from_u64(9), 1);
        let found = registry.find_local(1).unwrap();
        assert!(Arc::ptr_eq(&created, &found));
    }

    #[test]
    fn owned_objects_excludes_references() {
        let registry = ObjectRegistry::new(QueueId::from_u64(5));
        registry.insert_or_get(QueueId::from_u64(5), 1); // owned
        registry.insert_or_get(QueueId::from_u64(6), 2); // reference
        let owned = registry.owned_objects();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].id.local_key, 1);
    }

    #[test]
    fn notifier_add_remove_round_trip() {
        let obj = BinderObject::new(ObjectId { owner: QueueId::from_u64(1), local_key: 1 });
        assert!(!obj.remove_notifier(7, QueueId::from_u64(2)));
        obj.add_notifier(7, QueueId::from_u64(2));
        assert!(obj.remove_notifier(7, QueueId::from_u64(2)));
        assert!(!obj.remove_notifier(7, QueueId::from_u64(2)));
    }

    #[test]
    fn erase_removes_entry() {
        let registry = ObjectRegistry::new(QueueId::from_u64(1));
        let obj = registry.insert_or_get(QueueId::from_u64(1), 3);
        registry.erase(&obj);
        assert!(registry.find_local(3).is_none());
    }
}
