use dashmap::DashMap;
use parking_lot::Mutex;
use std::hash::Hash;
use std::sync::Arc;

/// table of per-key mutexes
///
/// Callers holding different keys never wait on each other. An entry lives only while some
/// caller holds or waits on its lock.
pub struct KeyedLocks<K> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// run `f` while holding the lock for `key`
    pub fn with_lock<T>(&self, key: &K, f: impl FnOnce() -> T) -> T {
        // clone the handle so the map shard is released before blocking
        let lock = self.locks.entry(key.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock();
            f()
        };
        drop(lock);

        // handles are cloned under the shard lock, so a count of one means no other caller
        self.locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_same_key_is_exclusive() {
        let locks = KeyedLocks::new();
        let inside = AtomicUsize::new(0);
        let max_inside = AtomicUsize::new(0);
        let total = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..50 {
                        locks.with_lock(&"loan-1", || {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_inside.fetch_max(now, Ordering::SeqCst);
                            total.fetch_add(1, Ordering::SeqCst);
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                });
            }
        });

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(total.load(Ordering::SeqCst), 400);
        assert!(locks.is_empty());
    }

    #[test]
    fn test_entry_kept_while_held() {
        let locks = KeyedLocks::new();

        locks.with_lock(&"outer", || {
            assert_eq!(locks.len(), 1);
            locks.with_lock(&"inner", || assert_eq!(locks.len(), 2));
            assert_eq!(locks.len(), 1);
        });
        assert!(locks.is_empty());
    }

    #[test]
    fn test_different_keys_run_in_parallel() {
        let table = KeyedLocks::new();
        let locks = &table;
        let (a_tx, a_rx) = mpsc::channel();
        let (b_tx, b_rx) = mpsc::channel();

        // each holder waits for the other while inside its own critical section
        let (a_saw_b, b_saw_a) = thread::scope(|s| {
            let a = s.spawn(move || {
                locks.with_lock(&"a", || {
                    a_tx.send(()).unwrap();
                    b_rx.recv_timeout(Duration::from_secs(5)).is_ok()
                })
            });
            let b = s.spawn(move || {
                locks.with_lock(&"b", || {
                    b_tx.send(()).unwrap();
                    a_rx.recv_timeout(Duration::from_secs(5)).is_ok()
                })
            });
            (a.join().unwrap(), b.join().unwrap())
        });

        assert!(a_saw_b);
        assert!(b_saw_a);
    }
}
