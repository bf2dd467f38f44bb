//! Insertion-ordered, lock-guarded set of device identifiers.

use crate::device::DeviceId;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// The registry's authoritative set of present devices.
///
/// Every operation holds the lock for exactly one insert, remove or copy, so
/// readers never see a half-applied mutation and never wait longer than one.
#[derive(Debug, Default)]
pub struct DeviceSet {
    devices: RwLock<Vec<DeviceId>>,
}

impl DeviceSet {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave the Vec half-written, so
    // poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, Vec<DeviceId>> {
        self.devices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<DeviceId>> {
        self.devices.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `id` unless present. Returns whether the set changed.
    pub fn insert(&self, id: DeviceId) -> bool {
        let mut devices = self.write();
        if devices.contains(&id) {
            return false;
        }
        devices.push(id);
        true
    }

    /// Remove `id` if present, keeping the order of the rest. Returns whether the set changed.
    pub fn remove(&self, id: &DeviceId) -> bool {
        let mut devices = self.write();
        match devices.iter().position(|d| d == id) {
            Some(index) => {
                devices.remove(index);
                true
            }
            None => false,
        }
    }

    /// Replace the whole contents, dropping duplicates after their first occurrence.
    pub fn replace_all(&self, ids: impl IntoIterator<Item = DeviceId>) {
        let mut fresh: Vec<DeviceId> = Vec::new();
        for id in ids {
            if !fresh.contains(&id) {
                fresh.push(id);
            }
        }
        *self.write() = fresh;
    }

    /// Bring the set in line with `present` under one write lock.
    ///
    /// Surviving devices keep their order and new ones are appended in the
    /// order given. Returns the added and removed identifiers.
    pub fn reconcile(
        &self,
        present: impl IntoIterator<Item = DeviceId>,
    ) -> (Vec<DeviceId>, Vec<DeviceId>) {
        let present: Vec<DeviceId> = present.into_iter().collect();
        let mut devices = self.write();

        let mut removed = Vec::new();
        devices.retain(|id| {
            let keep = present.contains(id);
            if !keep {
                removed.push(id.clone());
            }
            keep
        });

        let mut added = Vec::new();
        for id in present {
            if !devices.contains(&id) {
                devices.push(id.clone());
                added.push(id);
            }
        }
        (added, removed)
    }

    /// Copy of the current contents in insertion order.
    pub fn snapshot(&self) -> Vec<DeviceId> {
        self.read().clone()
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.read().contains(id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<DeviceId> {
        names.iter().map(|n| DeviceId::from(*n)).collect()
    }

    #[test]
    fn test_insert_is_idempotent() {
        let set = DeviceSet::new();
        assert!(set.insert("A".into()));
        assert!(!set.insert("A".into()));
        assert_eq!(set.snapshot(), ids(&["A"]));
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let set = DeviceSet::new();
        set.insert("A".into());
        assert!(!set.remove(&"B".into()));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_remove_keeps_order() {
        let set = DeviceSet::new();
        set.replace_all(ids(&["A", "B", "C"]));
        assert!(set.remove(&"B".into()));
        assert_eq!(set.snapshot(), ids(&["A", "C"]));
    }

    #[test]
    fn test_replace_all_dedupes() {
        let set = DeviceSet::new();
        set.insert("Z".into());
        set.replace_all(ids(&["A", "B", "A"]));
        assert_eq!(set.snapshot(), ids(&["A", "B"]));
        assert!(!set.contains(&"Z".into()));
    }

    #[test]
    fn test_reconcile_keeps_survivor_order() {
        let set = DeviceSet::new();
        set.replace_all(ids(&["C", "A", "B"]));

        let (added, removed) = set.reconcile(ids(&["A", "B", "D", "D"]));

        assert_eq!(set.snapshot(), ids(&["A", "B", "D"]));
        assert_eq!(added, ids(&["D"]));
        assert_eq!(removed, ids(&["C"]));
    }

    #[test]
    fn test_reconcile_unchanged() {
        let set = DeviceSet::new();
        set.replace_all(ids(&["A", "B"]));
        let (added, removed) = set.reconcile(ids(&["B", "A"]));
        assert!(added.is_empty() && removed.is_empty());
        assert_eq!(set.snapshot(), ids(&["A", "B"]));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let set = DeviceSet::new();
        set.insert("A".into());
        let before = set.snapshot();
        set.insert("B".into());
        assert_eq!(before, ids(&["A"]));
        assert!(!set.is_empty());
    }
}
