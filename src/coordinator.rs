//! Per-brand fetch locks.
//!
//! At most one fetch cycle runs per brand at a time. `try_acquire` never
//! blocks or queues: a caller that loses the race must no-op (or come back
//! through the debouncer), so rejected triggers cannot pile up. Additional
//! request ids may be registered under a held lock for coordinated fan-out
//! (the current + previous period sub-requests of one cycle), but an
//! unrelated trigger is always rejected while the lock is held.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

/// Identity of one logical fetch request, for diagnosability.
pub type RequestId = Uuid;

/// Brand-keyed mutual exclusion for metrics fetches.
///
/// Cheap to clone; clones share the same lock table.
#[derive(Clone, Default)]
pub struct FetchCoordinator {
    locks: Arc<DashMap<String, HashSet<RequestId>>>,
}

impl FetchCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking acquire. Returns `false` immediately when a fetch for
    /// this brand is already in flight.
    pub fn try_acquire(&self, brand_id: &str, request_id: RequestId) -> bool {
        match self.locks.entry(brand_id.to_string()) {
            Entry::Occupied(mut held) => {
                if held.get().is_empty() {
                    held.get_mut().insert(request_id);
                    true
                } else {
                    log::debug!(
                        "coordinator: rejected {} for {} (lock held by {} request(s))",
                        request_id,
                        brand_id,
                        held.get().len()
                    );
                    false
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(HashSet::from([request_id]));
                true
            }
        }
    }

    /// Register an additional request id under an already-held lock.
    /// Returns `false` when the lock is not held — sub-requests cannot
    /// sneak in a lock acquisition of their own.
    pub fn register(&self, brand_id: &str, request_id: RequestId) -> bool {
        match self.locks.get_mut(brand_id) {
            Some(mut held) if !held.is_empty() => {
                held.insert(request_id);
                true
            }
            _ => false,
        }
    }

    /// Remove a request id; the lock clears when the active set empties.
    pub fn release(&self, brand_id: &str, request_id: RequestId) {
        if let Entry::Occupied(mut held) = self.locks.entry(brand_id.to_string()) {
            held.get_mut().remove(&request_id);
            if held.get().is_empty() {
                held.remove();
            }
        }
    }

    /// Read-only probe.
    pub fn is_busy(&self, brand_id: &str) -> bool {
        self.locks
            .get(brand_id)
            .map(|held| !held.is_empty())
            .unwrap_or(false)
    }

    /// Acquire the brand lock and wrap it in a guard that releases on drop.
    /// This is the path the engine uses: even if the fetch future is
    /// cancelled mid-flight, dropping the guard frees the lock.
    pub fn acquire(&self, brand_id: &str) -> Option<FetchGuard> {
        let request_id = Uuid::new_v4();
        if self.try_acquire(brand_id, request_id) {
            log::debug!("coordinator: {} acquired by {}", brand_id, request_id);
            Some(FetchGuard {
                coordinator: self.clone(),
                brand_id: brand_id.to_string(),
                request_ids: vec![request_id],
            })
        } else {
            None
        }
    }
}

/// RAII handle to a held brand lock.
pub struct FetchGuard {
    coordinator: FetchCoordinator,
    brand_id: String,
    request_ids: Vec<RequestId>,
}

impl FetchGuard {
    /// The id the lock was acquired under.
    pub fn primary(&self) -> RequestId {
        self.request_ids[0]
    }

    pub fn brand_id(&self) -> &str {
        &self.brand_id
    }

    /// Register a sub-request (one network call of a coordinated cycle)
    /// under this held lock.
    pub fn subrequest(&mut self) -> RequestId {
        let request_id = Uuid::new_v4();
        self.coordinator.register(&self.brand_id, request_id);
        self.request_ids.push(request_id);
        request_id
    }
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        for request_id in self.request_ids.drain(..) {
            self.coordinator.release(&self.brand_id, request_id);
        }
        log::debug!("coordinator: {} released", self.brand_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_rejected_while_held() {
        let coordinator = FetchCoordinator::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        assert!(coordinator.try_acquire("acme", first));
        assert!(!coordinator.try_acquire("acme", second));
        assert!(coordinator.is_busy("acme"));
    }

    #[test]
    fn test_release_clears_lock() {
        let coordinator = FetchCoordinator::new();
        let id = Uuid::new_v4();
        assert!(coordinator.try_acquire("acme", id));
        coordinator.release("acme", id);
        assert!(!coordinator.is_busy("acme"));
        assert!(coordinator.try_acquire("acme", Uuid::new_v4()));
    }

    #[test]
    fn test_lock_held_until_all_requests_released() {
        let coordinator = FetchCoordinator::new();
        let primary = Uuid::new_v4();
        let sub = Uuid::new_v4();
        assert!(coordinator.try_acquire("acme", primary));
        assert!(coordinator.register("acme", sub));
        coordinator.release("acme", primary);
        assert!(coordinator.is_busy("acme"), "sub-request still active");
        coordinator.release("acme", sub);
        assert!(!coordinator.is_busy("acme"));
    }

    #[test]
    fn test_register_requires_held_lock() {
        let coordinator = FetchCoordinator::new();
        assert!(!coordinator.register("acme", Uuid::new_v4()));
    }

    #[test]
    fn test_brands_lock_independently() {
        let coordinator = FetchCoordinator::new();
        assert!(coordinator.try_acquire("acme", Uuid::new_v4()));
        assert!(coordinator.try_acquire("globex", Uuid::new_v4()));
        assert!(coordinator.is_busy("acme"));
        assert!(coordinator.is_busy("globex"));
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let coordinator = FetchCoordinator::new();
        {
            let mut guard = coordinator.acquire("acme").expect("lock free");
            guard.subrequest();
            guard.subrequest();
            assert!(coordinator.is_busy("acme"));
            assert!(coordinator.acquire("acme").is_none());
        }
        // All request ids, sub-requests included, released by the drop
        assert!(!coordinator.is_busy("acme"));
        assert!(coordinator.acquire("acme").is_some());
    }

    #[test]
    fn test_concurrent_acquire_admits_exactly_one() {
        let coordinator = FetchCoordinator::new();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let coordinator = coordinator.clone();
            handles.push(std::thread::spawn(move || {
                coordinator.try_acquire("acme", Uuid::new_v4())
            }));
        }
        let admitted = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|acquired| *acquired)
            .count();
        assert_eq!(admitted, 1);
    }
}
