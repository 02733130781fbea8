// ── Record watches ──
//
// Change notification for `DeviceStore` collections.

use std::sync::Arc;

use tokio::sync::watch;

/// Ordered snapshot of one record type.
pub type Snapshot<T> = Arc<Vec<Arc<T>>>;

/// Follows one collection of the device store.
///
/// Every wakeup yields the whole ordered snapshot; intermediate states
/// may be skipped when several mutations land between two polls.
pub struct EntityStream<T: Send + Sync + 'static> {
    receiver: watch::Receiver<Snapshot<T>>,
}

impl<T: Send + Sync + 'static> EntityStream<T> {
    pub(crate) fn new(receiver: watch::Receiver<Snapshot<T>>) -> Self {
        Self { receiver }
    }

    /// Latest snapshot, marking it seen.
    pub fn current(&mut self) -> Snapshot<T> {
        self.receiver.borrow_and_update().clone()
    }

    /// Next snapshot after the one last seen. `None` once the store is
    /// dropped.
    pub async fn changed(&mut self) -> Option<Snapshot<T>> {
        self.receiver.changed().await.ok()?;
        Some(self.current())
    }

    /// First snapshot, starting with the current one, for which
    /// `predicate` holds.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Option<Snapshot<T>>
    where
        F: FnMut(&[Arc<T>]) -> bool,
    {
        let snapshot = self.current();
        if predicate(&snapshot) {
            return Some(snapshot);
        }
        loop {
            let snapshot = self.changed().await?;
            if predicate(&snapshot) {
                return Some(snapshot);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn wait_for_accepts_the_current_snapshot() {
        let (tx, rx) = watch::channel(Arc::new(vec![Arc::new(1u8)]));
        let mut stream = EntityStream::new(rx);

        let snapshot = stream.wait_for(|records| records.len() == 1).await.unwrap();
        assert_eq!(*snapshot[0], 1);
        drop(tx);
    }

    #[tokio::test]
    async fn wait_for_skips_snapshots_until_the_predicate_holds() {
        let (tx, rx) = watch::channel(Arc::new(Vec::<Arc<u8>>::new()));
        let mut stream = EntityStream::new(rx);

        let waiter =
            tokio::spawn(async move { stream.wait_for(|records| records.len() >= 2).await });
        tx.send_replace(Arc::new(vec![Arc::new(1)]));
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send_replace(Arc::new(vec![Arc::new(1), Arc::new(2)]));

        let snapshot = waiter.await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test]
    async fn dropped_store_ends_the_wait() {
        let (tx, rx) = watch::channel(Arc::new(Vec::<Arc<u8>>::new()));
        let mut stream = EntityStream::new(rx);
        drop(tx);

        assert!(stream.wait_for(|records| !records.is_empty()).await.is_none());
    }
}
