//! Redundant-update suppression.
//!
//! Compares a canonical serialization of the incoming comparison against
//! the previously published one so an unchanged refresh does not trigger a
//! re-render. Purely an optimization: any ambiguity (serialization failure)
//! conservatively reports "changed".

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::types::ComparisonResult;

/// Canonical fingerprint of the displayed data. `fetched_at` is excluded
/// deliberately: a refetch that returns identical numbers must compare
/// equal even though its timestamp moved.
fn fingerprint(comparison: &ComparisonResult) -> Option<String> {
    serde_json::to_string(&(
        &comparison.current,
        &comparison.previous,
        &comparison.previous_label,
    ))
    .ok()
}

/// Should consumers re-render when `next` replaces `previous`?
pub fn should_update(previous: Option<&ComparisonResult>, next: &ComparisonResult) -> bool {
    let Some(previous) = previous else {
        return true;
    };
    match (fingerprint(previous), fingerprint(next)) {
        (Some(a), Some(b)) => a != b,
        // Can't prove they're identical — let the update through
        _ => true,
    }
}

/// Stateful per-brand detector used by the engine.
#[derive(Default)]
pub struct ChangeDetector {
    last: Mutex<HashMap<String, String>>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `next` as the published data for a brand and report whether
    /// it differs from what was published before.
    pub fn observe(&self, brand_id: &str, next: &ComparisonResult) -> bool {
        let Some(next_print) = fingerprint(next) else {
            return true;
        };
        let mut last = self.last.lock();
        let changed = last.get(brand_id) != Some(&next_print);
        last.insert(brand_id.to_string(), next_print);
        changed
    }

    /// Forget a brand's published state (e.g. after a cache clear).
    pub fn reset(&self, brand_id: &str) {
        self.last.lock().remove(brand_id);
    }
}
