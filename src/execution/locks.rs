// =============================================================================
// Symbol lock directory — spec §5
// =============================================================================
//
// At-most-one concurrent opening per symbol (spec §4.E). Grounded on the
// teacher-adjacent `atomic_execution.rs`'s `HEDGE_LOCKS: Mutex<HashSet<String>>`
// + `HedgeLock` Drop-release pattern, reshaped into an owned, non-global
// directory as SPEC_FULL.md §5 calls for: a `parking_lot::RwLock`-guarded
// `HashMap` of per-key `tokio::sync::Mutex`, matching the teacher's
// `exit/monitor.rs` `BarrierStates` map-of-locks shape.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A directory of per-key locks, keyed by `K`. Holding the guard returned
/// by `acquire` for the lifetime of an operation is what gives that
/// operation exclusive access to its key; dropping the guard releases it.
pub struct KeyedLocks<K> {
    locks: RwLock<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: std::hash::Hash + Eq + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self { locks: RwLock::new(HashMap::new()) }
    }

    pub async fn acquire(&self, key: &K) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.write();
            // Sweep out keys nobody holds or is waiting on before inserting
            // this one, so a long-lived directory doesn't grow unboundedly
            // as new keys are seen. `strong_count == 1` means only the
            // map's own clone remains — no `OwnedMutexGuard` is live.
            locks.retain(|k, v| k == key || Arc::strong_count(v) > 1);
            locks.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        mutex.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.read().len()
    }
}

impl<K: std::hash::Hash + Eq + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn second_acquire_waits_for_first_to_drop() {
        let locks = Arc::new(KeyedLocks::<String>::new());
        let key = "ETH".to_string();

        let guard = locks.acquire(&key).await;
        let locks_clone = locks.clone();
        let key_ref = key.clone();

        let waiter = tokio::spawn(async move { locks_clone.acquire(&key_ref).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        let _second = tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("waiter should complete after release")
            .expect("task should not panic");
    }

    #[tokio::test]
    async fn released_keys_are_pruned_on_next_acquire() {
        let locks = KeyedLocks::<String>::new();

        let guard_a = locks.acquire(&"ETH".to_string()).await;
        drop(guard_a);
        assert_eq!(locks.len(), 1, "ETH's entry is still there until the next acquire sweeps it");

        let _guard_b = locks.acquire(&"BTC".to_string()).await;
        assert_eq!(locks.len(), 1, "acquiring BTC should have pruned ETH, leaving only BTC");
    }
}
