//! C8 Position State Machine: PENDING/SENT -> CONFIRMED/FAILED, plus the
//! stale-pending reaper that force-resolves positions stuck past a timeout
//! (spec.md §4.8).
//!
//! Grounded on `brain/src/decision_engine/position_tracker.rs`'s provisional
//! -> active transition (`add_provisional` / `confirm_provisional` /
//! `fail_provisional` / `check_provisional_timeouts`), adapted from an
//! in-memory `HashMap` to the durable `Store` since positions here must
//! survive a process restart (spec.md §3: "durable, keyed state").

use anyhow::Result;
use chrono::Utc;
use num_bigint::BigInt;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::model::{Position, PositionStatus};
use crate::store::Store;

pub struct PositionManager<'a> {
    store: &'a Store,
}

impl<'a> PositionManager<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Live-mode entry: the BUY transaction was broadcast but not yet
    /// confirmed on-chain (spec.md §9, Open Question 1: SENT-then-confirm).
    /// `bought_raw` is added to any existing balance (spec.md §4.8: "new_total
    /// = existing + quoted out") and remembered as `pending_delta` so a later
    /// `fail` can roll back exactly this buy's contribution.
    pub fn open_sent(&self, token: &str, bought_raw: BigInt, token_decimals: u8) -> Result<(), StoreError> {
        self.credit(token, bought_raw, token_decimals, PositionStatus::Sent)
    }

    /// Simulation mode, or live mode skipping straight to confirmed (not
    /// used by the live executor, kept for simulation's synchronous fills).
    pub fn open_confirmed(&self, token: &str, bought_raw: BigInt, token_decimals: u8) -> Result<(), StoreError> {
        self.credit(token, bought_raw, token_decimals, PositionStatus::Confirmed)
    }

    fn credit(&self, token: &str, bought_raw: BigInt, token_decimals: u8, status: PositionStatus) -> Result<(), StoreError> {
        let existing = self.store.get_position(token)?.map(|p| p.raw_balance).unwrap_or_else(|| BigInt::from(0));
        let pending_delta = match status {
            PositionStatus::Sent => Some(bought_raw.clone()),
            PositionStatus::Confirmed => None,
        };
        let position = Position {
            token: token.to_string(),
            raw_balance: existing + bought_raw,
            token_decimals,
            status,
            last_update: Utc::now().timestamp(),
            pending_delta,
        };
        self.store.upsert_position(&position)?;
        info!(token, status = status.as_str(), "position credited");
        Ok(())
    }

    /// On-chain confirmation arrives for a SENT position: the reservation
    /// becomes permanent, so there is nothing left to roll back.
    pub fn confirm(&self, token: &str) -> Result<(), StoreError> {
        if let Some(mut position) = self.store.get_position(token)? {
            position.status = PositionStatus::Confirmed;
            position.pending_delta = None;
            position.last_update = Utc::now().timestamp();
            self.store.upsert_position(&position)?;
            info!(token, "position confirmed");
        }
        Ok(())
    }

    /// The BUY never landed on-chain: roll back by subtracting the pending
    /// quantity it contributed (spec.md §4.8). Deletes the row if the result
    /// is non-positive, otherwise keeps the pre-existing balance as
    /// CONFIRMED. Falls back to deleting the whole row when no pending
    /// delta is on record (e.g. a position opened before this field
    /// existed, or confirmed already) — there is nothing else to subtract.
    pub fn fail(&self, token: &str, reason: &str, pending_raw: &BigInt) -> Result<(), StoreError> {
        match self.store.get_position(token)? {
            Some(mut position) => {
                let rollback = position.pending_delta.clone().unwrap_or_else(|| pending_raw.clone());
                position.raw_balance -= rollback;
                if position.raw_balance <= BigInt::from(0) {
                    self.store.delete_position(token)?;
                    warn!(token, reason, "position failed, removed");
                } else {
                    position.status = PositionStatus::Confirmed;
                    position.pending_delta = None;
                    position.last_update = Utc::now().timestamp();
                    self.store.upsert_position(&position)?;
                    warn!(token, reason, balance = %position.raw_balance, "position failed, rolled back to prior balance");
                }
            }
            None => warn!(token, reason, "fail() called with no position on record"),
        }
        Ok(())
    }

    /// A SELL fully exits a position.
    pub fn close(&self, token: &str) -> Result<(), StoreError> {
        self.store.delete_position(token)?;
        info!(token, "position closed");
        Ok(())
    }

    /// A partial SELL reduces the held balance without closing the row.
    pub fn reduce(&self, token: &str, sold_raw: &BigInt) -> Result<(), StoreError> {
        if let Some(mut position) = self.store.get_position(token)? {
            position.raw_balance -= sold_raw;
            position.last_update = Utc::now().timestamp();
            if position.raw_balance <= BigInt::from(0) {
                self.store.delete_position(token)?;
            } else {
                self.store.upsert_position(&position)?;
            }
        }
        Ok(())
    }

    /// Force-resolves positions stuck in SENT past the configured timeout,
    /// via the same rollback `fail()` performs (spec.md §4.8 reaper: "invokes
    /// fail() on each"). Returns the tokens that were reaped, for metrics/
    /// notification.
    pub fn reap_stale_sent(&self, timeout_minutes: u64) -> Result<Vec<String>, StoreError> {
        let cutoff = Utc::now().timestamp() - (timeout_minutes as i64) * 60;
        let stale = self.store.list_stale_sent(cutoff)?;
        let mut reaped = Vec::new();
        for position in stale {
            warn!(token = %position.token, "reaping stale SENT position");
            let pending = position.pending_delta.clone().unwrap_or_else(|| position.raw_balance.clone());
            self.fail(&position.token, "stale SENT position reaped", &pending)?;
            reaped.push(position.token);
        }
        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sent_then_confirm_transitions() {
        let store = Store::open_in_memory().unwrap();
        let manager = PositionManager::new(&store);
        manager.open_sent("TOKEN", BigInt::from(100u64), 6).unwrap();
        let position = store.get_position("TOKEN").unwrap().unwrap();
        assert_eq!(position.status, PositionStatus::Sent);

        manager.confirm("TOKEN").unwrap();
        let position = store.get_position("TOKEN").unwrap().unwrap();
        assert_eq!(position.status, PositionStatus::Confirmed);
    }

    #[test]
    fn second_buy_adds_to_existing_balance() {
        let store = Store::open_in_memory().unwrap();
        let manager = PositionManager::new(&store);
        manager.open_confirmed("TOKEN", BigInt::from(100u64), 6).unwrap();
        manager.open_confirmed("TOKEN", BigInt::from(50u64), 6).unwrap();
        let position = store.get_position("TOKEN").unwrap().unwrap();
        assert_eq!(position.raw_balance, BigInt::from(150u64));
    }

    #[test]
    fn failed_position_is_removed_when_it_had_no_prior_balance() {
        let store = Store::open_in_memory().unwrap();
        let manager = PositionManager::new(&store);
        manager.open_sent("TOKEN", BigInt::from(100u64), 6).unwrap();
        manager.fail("TOKEN", "tx dropped", &BigInt::from(100u64)).unwrap();
        assert!(store.get_position("TOKEN").unwrap().is_none());
    }

    #[test]
    fn failed_second_buy_rolls_back_to_prior_confirmed_balance() {
        let store = Store::open_in_memory().unwrap();
        let manager = PositionManager::new(&store);
        manager.open_confirmed("TOKEN", BigInt::from(100u64), 6).unwrap();
        manager.open_sent("TOKEN", BigInt::from(50u64), 6).unwrap();
        manager.fail("TOKEN", "tx dropped", &BigInt::from(50u64)).unwrap();
        let position = store.get_position("TOKEN").unwrap().unwrap();
        assert_eq!(position.raw_balance, BigInt::from(100u64));
        assert_eq!(position.status, PositionStatus::Confirmed);
    }

    #[test]
    fn partial_reduce_keeps_position_open() {
        let store = Store::open_in_memory().unwrap();
        let manager = PositionManager::new(&store);
        manager.open_confirmed("TOKEN", BigInt::from(1000u64), 6).unwrap();
        manager.reduce("TOKEN", &BigInt::from(400u64)).unwrap();
        let position = store.get_position("TOKEN").unwrap().unwrap();
        assert_eq!(position.raw_balance, BigInt::from(600u64));
    }

    #[test]
    fn full_reduce_closes_position() {
        let store = Store::open_in_memory().unwrap();
        let manager = PositionManager::new(&store);
        manager.open_confirmed("TOKEN", BigInt::from(1000u64), 6).unwrap();
        manager.reduce("TOKEN", &BigInt::from(1000u64)).unwrap();
        assert!(store.get_position("TOKEN").unwrap().is_none());
    }

    #[test]
    fn reaper_only_reaps_stale_sent() {
        let store = Store::open_in_memory().unwrap();
        let manager = PositionManager::new(&store);
        store
            .upsert_position(&Position {
                token: "FRESH".into(),
                raw_balance: BigInt::from(1u64),
                token_decimals: 6,
                status: PositionStatus::Sent,
                last_update: Utc::now().timestamp(),
                pending_delta: Some(BigInt::from(1u64)),
            })
            .unwrap();
        store
            .upsert_position(&Position {
                token: "STALE".into(),
                raw_balance: BigInt::from(1u64),
                token_decimals: 6,
                status: PositionStatus::Sent,
                last_update: Utc::now().timestamp() - 600,
                pending_delta: Some(BigInt::from(1u64)),
            })
            .unwrap();
        let reaped = manager.reap_stale_sent(5).unwrap();
        assert_eq!(reaped, vec!["STALE".to_string()]);
        assert!(store.get_position("FRESH").unwrap().is_some());
    }
}
