//! C10 Scheduler: independent periodic tasks outside the pipeline's
//! single-writer section — PnL snapshotting, stale-SENT reaping, and
//! metrics pruning (spec.md §4.10). Each runs in its own `tokio::spawn`
//! loop so one task's failure never stalls another (SPEC_FULL.md §C).
//!
//! Grounded on `brain/src/main.rs`'s pattern of spawning one loop per
//! concern (position monitor, PnL ticker, cleanup) rather than a single
//! cron-like dispatcher.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::notify::Notifier;
use crate::position::PositionManager;
use crate::store::Store;

const PNL_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(60);
const STALE_REAP_INTERVAL: Duration = Duration::from_secs(120);
const METRICS_PRUNE_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);
const METRICS_RETENTION_SECS: i64 = 14 * 24 * 60 * 60;
const LEDGER_RETENTION_SECS: i64 = 48 * 60 * 60;

pub fn spawn_all(config: Arc<Config>, store: Arc<Store>, notifier: Arc<dyn Notifier>) {
    tokio::spawn(run_guarded("pnl-snapshot", pnl_snapshot_loop(store.clone())));
    tokio::spawn(run_guarded(
        "stale-reap",
        stale_reap_loop(config.clone(), store.clone(), notifier.clone()),
    ));
    tokio::spawn(run_guarded("metrics-prune", metrics_prune_loop(store)));
}

/// Wraps a scheduler task so a panic inside it is logged instead of taking
/// down the process — every other spawned task keeps running regardless.
async fn run_guarded(name: &'static str, task: impl std::future::Future<Output = ()>) {
    use futures::FutureExt;
    if std::panic::AssertUnwindSafe(task).catch_unwind().await.is_err() {
        error!(task = name, "scheduler task panicked and exited");
    }
}

async fn pnl_snapshot_loop(store: Arc<Store>) {
    let mut ticker = tokio::time::interval(PNL_SNAPSHOT_INTERVAL);
    loop {
        ticker.tick().await;
        let open_positions = match store.list_open_positions() {
            Ok(positions) => positions.len(),
            Err(e) => {
                warn!(error = %e, "pnl snapshot failed to read positions");
                continue;
            }
        };
        let spent_today = match store.spent_today() {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "pnl snapshot failed to read daily budget");
                continue;
            }
        };
        let virtual_cash = store.virtual_cash().ok();
        if let Err(e) = store.record_pnl_snapshot(open_positions, spent_today, virtual_cash) {
            warn!(error = %e, "pnl snapshot failed to persist");
        } else {
            info!(open_positions, %spent_today, "pnl snapshot recorded");
        }
    }
}

async fn stale_reap_loop(config: Arc<Config>, store: Arc<Store>, notifier: Arc<dyn Notifier>) {
    let mut ticker = tokio::time::interval(STALE_REAP_INTERVAL);
    loop {
        ticker.tick().await;
        let manager = PositionManager::new(&store);
        match manager.reap_stale_sent(config.confirmation.pending_position_timeout_minutes) {
            Ok(reaped) => {
                for token in reaped {
                    warn!(token = %token, "stale SENT position force-resolved");
                    notifier
                        .notify_emergency_exit(&token, "position stuck in SENT past timeout")
                        .await;
                }
            }
            Err(e) => warn!(error = %e, "stale position reap failed"),
        }
    }
}

async fn metrics_prune_loop(store: Arc<Store>) {
    let mut ticker = tokio::time::interval(METRICS_PRUNE_INTERVAL);
    loop {
        ticker.tick().await;
        let now = chrono::Utc::now().timestamp();
        match store.prune_metrics_before(now - METRICS_RETENTION_SECS) {
            Ok(removed) => info!(removed, "pruned old pipeline metrics"),
            Err(e) => warn!(error = %e, "metrics prune failed"),
        }
        match store.prune_processed_signatures_before(now - LEDGER_RETENTION_SECS) {
            Ok(removed) => info!(removed, "pruned old idempotency ledger entries"),
            Err(e) => warn!(error = %e, "idempotency ledger prune failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_guarded_survives_a_panicking_task() {
        run_guarded("panics", async {
            panic!("boom");
        })
        .await;
        // reaching here means the panic did not propagate out of run_guarded
    }
}
