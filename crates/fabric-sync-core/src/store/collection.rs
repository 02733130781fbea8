// ── Keyed record collection ──
//
// DashMap-backed storage that republishes an ordered snapshot through a
// `watch` channel after every mutation.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

/// Records of one type, keyed and ordered by `K`.
pub(crate) struct EntityCollection<K, T>
where
    K: Eq + Hash + Ord + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    by_key: DashMap<K, Arc<T>>,
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<K, T> EntityCollection<K, T>
where
    K: Eq + Hash + Ord + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            by_key: DashMap::new(),
            snapshot,
        }
    }

    /// Insert or replace a record. Returns `true` if the key was new.
    pub(crate) fn upsert(&self, key: K, entity: T) -> bool {
        let is_new = self.by_key.insert(key, Arc::new(entity)).is_none();
        self.publish();
        is_new
    }

    /// Subscribers are only woken when something was actually removed.
    pub(crate) fn remove(&self, key: &K) -> Option<Arc<T>> {
        let removed = self.by_key.remove(key).map(|(_, v)| v);
        if removed.is_some() {
            self.publish();
        }
        removed
    }

    pub(crate) fn get(&self, key: &K) -> Option<Arc<T>> {
        self.by_key.get(key).map(|r| Arc::clone(r.value()))
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        self.snapshot.subscribe()
    }

    fn publish(&self) {
        let mut entries: Vec<(K, Arc<T>)> = self
            .by_key
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let values = entries.into_iter().map(|(_, v)| v).collect();
        // `send_modify` updates even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn upsert_reports_new_keys() {
        let col: EntityCollection<u64, String> = EntityCollection::new();
        assert!(col.upsert(1, "hello".into()));
        assert!(!col.upsert(1, "world".into()));
        assert_eq!(*col.get(&1).unwrap(), "world");
        assert_eq!(col.snapshot().len(), 1);
    }

    #[test]
    fn snapshot_is_ordered_by_key() {
        let col: EntityCollection<u64, &'static str> = EntityCollection::new();
        col.upsert(30, "c");
        col.upsert(10, "a");
        col.upsert(20, "b");

        let snap = col.snapshot();
        let values: Vec<&str> = snap.iter().map(|v| **v).collect();
        assert_eq!(values, vec!["a", "b", "c"]);
    }

    #[test]
    fn removing_an_unknown_key_does_not_notify() {
        let col: EntityCollection<u64, String> = EntityCollection::new();
        col.upsert(1, "x".into());
        let mut rx = col.subscribe();
        rx.borrow_and_update();

        assert!(col.remove(&2).is_none());
        assert!(!rx.has_changed().unwrap());

        assert_eq!(*col.remove(&1).unwrap(), "x");
        assert!(rx.has_changed().unwrap());
        assert!(col.get(&1).is_none());
    }

    #[tokio::test]
    async fn subscribers_see_mutations() {
        let col: EntityCollection<u64, String> = EntityCollection::new();
        let mut rx = col.subscribe();

        col.upsert(7, "seven".into());
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 1);
    }
}
