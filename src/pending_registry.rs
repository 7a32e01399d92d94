//! C4 Pending-Buy Registry: an in-memory set of tokens with a BUY currently
//! in flight through the pipeline, used to stall a SELL that races ahead of
//! its own BUY (spec.md §4.4).
//!
//! Grounded on `brain/src/decision_engine/guardrails.rs`'s `open_positions`
//! map — an `Arc<Mutex<...>>` guarding a small keyed set, queried and
//! mutated from multiple tasks. `dashmap::DashSet` replaces the `Mutex` here
//! since the registry's only operations are single-key insert/remove/check,
//! which DashMap/DashSet shard internally without a single global lock.

use dashmap::DashSet;

#[derive(Default)]
pub struct PendingBuyRegistry {
    pending: DashSet<String>,
}

impl PendingBuyRegistry {
    pub fn new() -> Self {
        Self { pending: DashSet::new() }
    }

    pub fn mark_pending(&self, token: &str) {
        self.pending.insert(token.to_string());
    }

    pub fn is_pending(&self, token: &str) -> bool {
        self.pending.contains(token)
    }

    pub fn clear_pending(&self, token: &str) {
        self.pending.remove(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_pending_state_per_token() {
        let registry = PendingBuyRegistry::new();
        assert!(!registry.is_pending("TOKEN"));
        registry.mark_pending("TOKEN");
        assert!(registry.is_pending("TOKEN"));
        registry.clear_pending("TOKEN");
        assert!(!registry.is_pending("TOKEN"));
    }

    #[test]
    fn unrelated_tokens_do_not_interfere() {
        let registry = PendingBuyRegistry::new();
        registry.mark_pending("A");
        assert!(!registry.is_pending("B"));
    }
}
