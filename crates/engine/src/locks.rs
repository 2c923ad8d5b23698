//! Single-writer-per-entity discipline.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per entity id, created on first use and dropped once no
/// task holds or waits for it.
///
/// Every state-mutating engine operation and every timer firing holds the
/// entity's guard for its whole read-validate-write sequence.
#[derive(Debug, Default)]
pub struct EntityLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, entity_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Only the map references an idle lock.
            locks.retain(|id, lock| id == entity_id || Arc::strong_count(lock) > 1);
            locks
                .entry(entity_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_entity_is_serialized() {
        let locks = Arc::new(EntityLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let (locks, inside, peak) = (locks.clone(), inside.clone(), peak.clone());
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("lead-1").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_entities_do_not_block() {
        let locks = EntityLocks::new();
        let _a = locks.lock("lead-1").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("lead-2")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn idle_locks_are_pruned() {
        let locks = EntityLocks::new();
        for id in ["ghost-1", "ghost-2", "ghost-3"] {
            drop(locks.lock(id).await);
        }
        assert_eq!(locks.len(), 1);

        let held = locks.lock("lead-1").await;
        drop(locks.lock("lead-2").await);
        assert_eq!(locks.len(), 2);
        drop(held);
        drop(locks.lock("lead-3").await);
        assert_eq!(locks.len(), 1);
    }
}
