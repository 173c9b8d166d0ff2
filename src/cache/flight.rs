//! Per-key in-flight suppression for cache misses.
//!
//! The first request to miss on a key becomes the leader; concurrent requests
//! for the same key queue on the leader's lock and re-check the store once it
//! is released, so one upstream execution serves them all.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::keys::CacheKey;

#[derive(Default, Clone)]
pub struct SingleFlight {
    inflight: Arc<DashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(DashMap::new()),
        }
    }

    /// Wait for exclusive ownership of `key`'s miss window.
    pub async fn acquire(&self, key: &CacheKey) -> FlightPermit {
        let (lock, leader) = match self.inflight.entry(key.clone()) {
            Entry::Occupied(occupied) => (Arc::clone(occupied.get()), false),
            Entry::Vacant(vacant) => {
                let lock = Arc::new(Mutex::new(()));
                vacant.insert(Arc::clone(&lock));
                (lock, true)
            }
        };

        let guard = Arc::clone(&lock).lock_owned().await;
        FlightPermit {
            key: key.clone(),
            lock,
            leader,
            inflight: Arc::clone(&self.inflight),
            _guard: guard,
        }
    }

    /// Number of keys with an active leader.
    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }
}

pub struct FlightPermit {
    key: CacheKey,
    lock: Arc<Mutex<()>>,
    leader: bool,
    inflight: Arc<DashMap<CacheKey, Arc<Mutex<()>>>>,
    _guard: OwnedMutexGuard<()>,
}

impl FlightPermit {
    /// True when this permit opened the flight rather than joining one.
    pub fn is_leader(&self) -> bool {
        self.leader
    }
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        if self.leader {
            self.inflight
                .remove_if(&self.key, |_, lock| Arc::ptr_eq(lock, &self.lock));
        }
    }
}
