//! Writer-preferring reader/writer lock, plus a per-key lock map
//! (spec §4.7, §5).
//!
//! The system this replaces deadlocked: `acquire_write` awaited the
//! reader-drain condition while still holding the coordinating mutex,
//! but `release_read` needed that same mutex to decrement the reader
//! count — a write arriving while readers were active could never drain.
//! This version never holds the coordinating state across an await: a
//! writer registers intent, then loops waiting on a `Notify` that every
//! release fires, re-checking the condition each time. New readers check
//! the waiting-writer count before incrementing, which gives writer
//! preference for free.
//!
//! Lock ordering throughout this crate: acquire a per-key lock first,
//! then the store-wide lock, never the reverse.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, Notify};

struct State {
    readers: u32,
    writer_active: bool,
}

/// Coordinates shared/exclusive access to a resource with writer
/// preference: once a writer is waiting, new readers queue behind it.
pub struct RwCoordinator {
    state: std::sync::Mutex<State>,
    waiting_writers: AtomicU32,
    notify: Notify,
}

impl RwCoordinator {
    pub fn new() -> Self {
        Self {
            state: std::sync::Mutex::new(State {
                readers: 0,
                writer_active: false,
            }),
            waiting_writers: AtomicU32::new(0),
            notify: Notify::new(),
        }
    }

    /// Acquire a read guard. Blocks (asynchronously) while a writer holds
    /// the lock or is waiting for it.
    pub async fn acquire_read(&self) -> ReadGuard<'_> {
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if !state.writer_active && self.waiting_writers.load(Ordering::SeqCst) == 0 {
                    state.readers += 1;
                    return ReadGuard { coordinator: self };
                }
            }
            self.notify.notified().await;
        }
    }

    /// Acquire the exclusive write guard. Blocks while readers are active
    /// or another writer holds the lock.
    pub async fn acquire_write(&self) -> WriteGuard<'_> {
        self.waiting_writers.fetch_add(1, Ordering::SeqCst);
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if !state.writer_active && state.readers == 0 {
                    state.writer_active = true;
                    self.waiting_writers.fetch_sub(1, Ordering::SeqCst);
                    return WriteGuard { coordinator: self };
                }
            }
            self.notify.notified().await;
        }
    }

    fn release_read(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.readers -= 1;
        }
        self.notify.notify_waiters();
    }

    fn release_write(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.writer_active = false;
        }
        self.notify.notify_waiters();
    }
}

impl Default for RwCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ReadGuard<'a> {
    coordinator: &'a RwCoordinator,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.release_read();
    }
}

pub struct WriteGuard<'a> {
    coordinator: &'a RwCoordinator,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.release_write();
    }
}

/// A map of fine-grained per-key locks, used so unrelated documents don't
/// serialize behind the store-wide lock. Lock ordering: a per-key lock is
/// always acquired before the enclosing `RwCoordinator`.
pub struct KeyLockMap<K: Eq + Hash + Clone> {
    locks: DashMap<K, Arc<AsyncMutex<()>>>,
}

impl<K: Eq + Hash + Clone> KeyLockMap<K> {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Get (creating if necessary) the mutex guarding `key`.
    pub fn lock_for(&self, key: &K) -> Arc<AsyncMutex<()>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Drop the entry for `key` once nothing else references it, so the
    /// map doesn't grow without bound as keys churn. Safe to call any time
    /// — a concurrent acquirer just recreates the entry.
    pub fn remove_if_unused(&self, key: &K) {
        self.locks.remove_if(key, |_, v| Arc::strong_count(v) == 1);
    }
}

impl<K: Eq + Hash + Clone> Default for KeyLockMap<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use std::time::Duration;

    #[tokio::test]
    async fn readers_can_share() {
        let coord = StdArc::new(RwCoordinator::new());
        let g1 = coord.acquire_read().await;
        let g2 = coord.acquire_read().await;
        drop(g1);
        drop(g2);
    }

    #[tokio::test]
    async fn writer_excludes_readers() {
        let coord = StdArc::new(RwCoordinator::new());
        let _write = coord.acquire_write().await;
        let coord2 = coord.clone();
        let handle = tokio::spawn(async move {
            let _read = coord2.acquire_read().await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        drop(_write);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reader should unblock after writer releases")
            .unwrap();
    }

    #[tokio::test]
    async fn writer_does_not_starve_when_readers_active() {
        let coord = StdArc::new(RwCoordinator::new());
        let read = coord.acquire_read().await;
        let coord2 = coord.clone();
        let handle = tokio::spawn(async move {
            let _write = coord2.acquire_write().await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        drop(read);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("writer should acquire once reader releases")
            .unwrap();
    }

    #[tokio::test]
    async fn key_lock_map_serializes_same_key() {
        let map: KeyLockMap<String> = KeyLockMap::new();
        let lock = map.lock_for(&"a".to_string());
        let _guard = lock.lock().await;
        let lock2 = map.lock_for(&"a".to_string());
        assert!(lock2.try_lock().is_err());
    }
}
