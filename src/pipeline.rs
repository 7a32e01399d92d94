//! C5 Pipeline Serializer: a single FIFO worker that every ingestion source
//! feeds through an mpsc channel, so the idempotency check, risk decision,
//! execution, and metric emission for one signature always complete before
//! the next signature starts (spec.md §5, single-writer critical section).
//!
//! Grounded on `brain/src/main.rs`'s UDP-bus consumer loop (receive, decide,
//! forward, one message at a time) collapsed into an in-process channel per
//! SPEC_FULL.md §A — the teacher's inter-process bus becomes a
//! `tokio::sync::mpsc` channel feeding one `tokio::spawn`ed worker task.

use futures::FutureExt;
use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::aggregator::AggregatorClient;
use crate::chain::ChainClient;
use crate::circuit_breaker::CircuitBreaker;
use crate::config::Config;
use crate::executor::Executor;
use crate::model::{Direction, PipelineMetric, SwapDescriptor, TradeOutcome};
use crate::notify::Notifier;
use crate::pending_registry::PendingBuyRegistry;
use crate::position::PositionManager;
use crate::risk::{RiskEngine, RiskOutcome};
use crate::store::Store;

pub struct PipelineItem {
    pub descriptor: SwapDescriptor,
    pub received_at: Instant,
    /// Computed by the producer (`sources::ingest`) before submission, not
    /// here — the SELL-before-BUY wait must not occupy the single worker
    /// (spec.md §5).
    pub sell_buffered: bool,
    pub sell_buffer_ms: u64,
}

pub struct Pipeline {
    sender: mpsc::Sender<PipelineItem>,
}

impl Pipeline {
    /// Spawns the single worker task and returns a handle whose `submit`
    /// enqueues work for it. The channel itself enforces FIFO delivery;
    /// there is exactly one consumer.
    pub fn spawn(
        config: Arc<Config>,
        store: Arc<Store>,
        breaker: Arc<CircuitBreaker>,
        aggregator: Arc<dyn AggregatorClient>,
        chain: Arc<dyn ChainClient>,
        notifier: Arc<dyn Notifier>,
        pending: Arc<PendingBuyRegistry>,
        paused: Arc<AtomicBool>,
    ) -> Self {
        let (sender, mut receiver) = mpsc::channel::<PipelineItem>(256);

        tokio::spawn(async move {
            while let Some(item) = receiver.recv().await {
                if let Err(e) = std::panic::AssertUnwindSafe(process_item(
                    &item,
                    &config,
                    &store,
                    &breaker,
                    aggregator.as_ref(),
                    chain.as_ref(),
                    notifier.as_ref(),
                    &pending,
                    &paused,
                    store.clone(),
                    chain.clone(),
                    notifier.clone(),
                ))
                .catch_unwind()
                .await
                {
                    warn!(error = ?e, "pipeline item processing panicked, continuing");
                }
            }
        });

        Pipeline { sender }
    }

    pub async fn submit(&self, descriptor: SwapDescriptor, sell_buffered: bool, sell_buffer_ms: u64) {
        let item = PipelineItem { descriptor, received_at: Instant::now(), sell_buffered, sell_buffer_ms };
        if self.sender.send(item).await.is_err() {
            warn!("pipeline worker is gone, dropping item");
        }
    }
}

async fn process_item(
    item: &PipelineItem,
    config: &Config,
    store: &Store,
    breaker: &CircuitBreaker,
    aggregator: &dyn AggregatorClient,
    chain: &dyn ChainClient,
    notifier: &dyn Notifier,
    pending: &PendingBuyRegistry,
    paused: &AtomicBool,
    store_handle: Arc<Store>,
    chain_handle: Arc<dyn ChainClient>,
    notifier_handle: Arc<dyn Notifier>,
) {
    let descriptor = &item.descriptor;

    match store.try_mark_processed(&descriptor.signature, descriptor.source) {
        Ok(false) => {
            return; // duplicate from a redundant source, silently dropped
        }
        Err(e) => {
            warn!(error = %e, "idempotency ledger write failed, dropping item");
            return;
        }
        Ok(true) => {}
    }

    // spec.md §4.5 step (b): persist the swap record ahead of the risk
    // decision, independent of whatever that decision turns out to be.
    if let Err(e) = store.record_source_trade(descriptor) {
        warn!(error = %e, "failed to persist source trade record");
    }

    let sell_buffered = item.sell_buffered;
    let sell_buffer_ms = item.sell_buffer_ms;

    let risk_start = Instant::now();
    let position_manager = PositionManager::new(store);
    let mut confirm_wait_ms = 0u64;
    let (outcome, reject_reason, base_amount, token_raw_amount, price_drift_pct) = match descriptor.direction {
        Direction::Buy => {
            let wallet_balance = chain
                .get_balance_lamports(&config.network.wallet_pubkey)
                .await
                .unwrap_or(0);
            let engine = RiskEngine::new(&config.risk, store, breaker, aggregator, chain, &config.network.wallet_pubkey, paused);
            match engine.evaluate_buy(descriptor, wallet_balance).await {
                RiskOutcome::Execute { quote, base_amount, token_raw_amount, price_drift_pct } => {
                    (Some(quote), None, Some(base_amount), Some(token_raw_amount), price_drift_pct)
                }
                RiskOutcome::ExecuteWithImpactWarning { quote, base_amount, token_raw_amount } => {
                    (Some(quote), None, Some(base_amount), Some(token_raw_amount), None)
                }
                RiskOutcome::Reject { reason, price_drift_pct } => (None, Some(reason), None, None, price_drift_pct),
            }
        }
        Direction::Sell => {
            let mut position = store.get_position(&descriptor.token).ok().flatten();
            let is_sent = |p: &Option<crate::model::Position>| {
                p.as_ref().map(|p| p.status == crate::model::PositionStatus::Sent).unwrap_or(false)
            };

            // spec.md SELL step 2: a position still SENT (not yet CONFIRMED)
            // blocks a sell unless explicitly allowed, with a bounded poll
            // for the confirmation to land before giving up.
            if is_sent(&position) && !config.confirmation.allow_sell_on_sent_position {
                let timeout_ms = config.confirmation.sell_on_sent_timeout_seconds * 1_000;
                let mut waited = 0u64;
                while waited < timeout_ms && is_sent(&position) {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    waited += 500;
                    position = store.get_position(&descriptor.token).ok().flatten();
                }
                confirm_wait_ms = waited.min(timeout_ms);
            }

            if is_sent(&position) && !config.confirmation.allow_sell_on_sent_position {
                (None, Some(crate::error::RejectReason::PositionNotConfirmed), None, None, None)
            } else {
                let engine = RiskEngine::new(&config.risk, store, breaker, aggregator, chain, &config.network.wallet_pubkey, paused);
                match engine.evaluate_sell(descriptor, position.as_ref()).await {
                    RiskOutcome::Execute { quote, base_amount, token_raw_amount, price_drift_pct } => {
                        (Some(quote), None, Some(base_amount), Some(token_raw_amount), price_drift_pct)
                    }
                    RiskOutcome::ExecuteWithImpactWarning { quote, base_amount, token_raw_amount } => {
                        (Some(quote), None, Some(base_amount), Some(token_raw_amount), None)
                    }
                    RiskOutcome::Reject { reason, price_drift_pct } => (None, Some(reason), None, None, price_drift_pct),
                }
            }
        }
    };
    let latency_risk_ms = risk_start.elapsed().as_millis() as u64;
    let no_position = reject_reason == Some(crate::error::RejectReason::NoPosition);

    let mut trade_outcome = TradeOutcome::Rejected;
    let mut latency_exec_ms = 0u64;

    if let (Some(quote), Some(base_amount), Some(token_raw_amount)) = (outcome, base_amount, token_raw_amount) {
        let exec_start = Instant::now();
        let executor = Executor::new(&config.execution, store, chain, aggregator, &config.network.wallet_pubkey);
        match executor.execute(descriptor, quote, base_amount, token_raw_amount).await {
            Ok(result) => {
                trade_outcome = TradeOutcome::Copied;
                apply_position_effects(descriptor, &position_manager, &result);
                // spec.md §3/§4.6 step 4: the daily budget and cooldown are
                // BUY-only bookkeeping — a SELL's proceeds must never inflate
                // spent_today or cool the token down.
                if descriptor.direction == Direction::Buy {
                    let _ = store.add_spent_today(base_amount);
                    if config.risk.cooldown_seconds > 0 {
                        let _ = store.set_cooldown(
                            &descriptor.token,
                            chrono::Utc::now().timestamp() + config.risk.cooldown_seconds as i64,
                        );
                    }
                }
                notifier.notify_trade(descriptor, &result).await;

                if !result.simulated {
                    spawn_post_live_execution_tasks(
                        descriptor.clone(),
                        result.clone(),
                        config.execution.compare_alert_pct,
                        config.network.wallet_pubkey.clone(),
                        store_handle.clone(),
                        chain_handle.clone(),
                        notifier_handle.clone(),
                    );
                }
            }
            Err(e) => {
                warn!(token = %descriptor.token, error = %e, "execution failed");
                trade_outcome = TradeOutcome::Failed;
                notifier.notify_failure(descriptor, &e.to_string()).await;
            }
        }
        latency_exec_ms = exec_start.elapsed().as_millis() as u64;
    }

    if breaker.is_open() && trade_outcome != TradeOutcome::Failed {
        trade_outcome = TradeOutcome::CircuitBreaker;
    }

    breaker.record(trade_outcome, latency_risk_ms + latency_exec_ms, no_position);

    let metric = PipelineMetric {
        signature: descriptor.signature.clone(),
        direction: descriptor.direction,
        token: descriptor.token.clone(),
        source: descriptor.source,
        outcome: trade_outcome,
        reject_reason: reject_reason.map(|r| r.as_str().to_string()),
        sell_buffered,
        sell_buffer_ms,
        confirm_wait_ms,
        latency_risk_ms,
        latency_exec_ms,
        latency_total_ms: item.received_at.elapsed().as_millis() as u64,
        price_drift_pct,
        unsafe_parse: descriptor.unsafe_parse,
        recorded_at: chrono::Utc::now().timestamp(),
    };
    if let Err(e) = store.record_metric(&metric) {
        warn!(error = %e, "failed to record pipeline metric");
    }

    if descriptor.direction == Direction::Buy {
        pending.clear_pending(&descriptor.token);
    }

    info!(
        signature = %descriptor.signature,
        direction = descriptor.direction.as_str(),
        outcome = trade_outcome.as_str(),
        "pipeline item processed"
    );
}

fn apply_position_effects(
    descriptor: &SwapDescriptor,
    manager: &PositionManager,
    result: &crate::executor::ExecutionResult,
) {
    match descriptor.direction {
        Direction::Buy => {
            let outcome = if result.simulated {
                manager.open_confirmed(&descriptor.token, result.token_raw_amount.clone(), descriptor.token_decimals)
            } else {
                manager.open_sent(&descriptor.token, result.token_raw_amount.clone(), descriptor.token_decimals)
            };
            if let Err(e) = outcome {
                warn!(error = %e, "failed to open position");
            }
        }
        Direction::Sell => {
            if let Err(e) = manager.reduce(&descriptor.token, &result.token_raw_amount) {
                warn!(error = %e, "failed to update position after sell");
            }
        }
    }
}

/// Off-critical-path follow-up for a live (non-simulated) fill: confirm or
/// roll back a BUY's SENT position (spec.md §9, Open Question 1), then
/// record the quoted-vs-real execution comparison (spec.md §4.7). Neither
/// step runs inside C5's single-writer section.
fn spawn_post_live_execution_tasks(
    descriptor: SwapDescriptor,
    result: crate::executor::ExecutionResult,
    compare_alert_pct: f64,
    wallet_pubkey: String,
    store: Arc<Store>,
    chain: Arc<dyn ChainClient>,
    notifier: Arc<dyn Notifier>,
) {
    tokio::spawn(async move {
        // ~2.5s is the spec's own figure for the comparison task's delay; the
        // BUY confirmation wait shares it rather than sleeping twice.
        tokio::time::sleep(Duration::from_millis(2_500)).await;

        if descriptor.direction == Direction::Buy {
            confirm_or_rollback_buy(&descriptor, &result, &store, chain.as_ref(), notifier.as_ref()).await;
        }

        record_execution_comparison(
            &descriptor,
            &result,
            compare_alert_pct,
            &wallet_pubkey,
            &store,
            chain.as_ref(),
            notifier.as_ref(),
        )
        .await;
    });
}

/// Bounded-retry on-chain confirmation check (spec.md §5: "bounded retry
/// (<=3 attempts, 300ms x attempt backoff)"). A BUY that never confirms is
/// rolled back via `PositionManager::fail`; the scheduler's stale-SENT
/// reaper is the backstop if this task itself never runs (process restart).
async fn confirm_or_rollback_buy(
    descriptor: &SwapDescriptor,
    result: &crate::executor::ExecutionResult,
    store: &Store,
    chain: &dyn ChainClient,
    notifier: &dyn Notifier,
) {
    let manager = PositionManager::new(store);
    let mut confirmed = false;
    for attempt in 1..=3u32 {
        match chain.confirm_signature(&result.signature).await {
            Ok(true) => {
                confirmed = true;
                break;
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, attempt, "confirmation check failed"),
        }
        if attempt < 3 {
            tokio::time::sleep(Duration::from_millis(300 * attempt as u64)).await;
        }
    }

    if confirmed {
        if let Err(e) = manager.confirm(&descriptor.token) {
            warn!(error = %e, "failed to confirm position");
        }
    } else {
        warn!(token = %descriptor.token, signature = %result.signature, "buy did not confirm after retries, rolling back");
        if let Err(e) = manager.fail(&descriptor.token, "not confirmed on chain", &result.token_raw_amount) {
            warn!(error = %e, "failed to roll back unconfirmed position");
        }
        notifier.notify_emergency_exit(&descriptor.token, "buy transaction not confirmed").await;
    }
}

/// Fetches the finalised transaction's real balance deltas (when available)
/// and compares them against the quoted amounts the risk engine sized the
/// trade from, recording the result and alerting on excess slippage
/// (spec.md §4.7).
async fn record_execution_comparison(
    descriptor: &SwapDescriptor,
    result: &crate::executor::ExecutionResult,
    compare_alert_pct: f64,
    wallet_pubkey: &str,
    store: &Store,
    chain: &dyn ChainClient,
    notifier: &dyn Notifier,
) {
    let snapshot = match chain.get_balance_snapshot(&result.signature, wallet_pubkey).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, signature = %result.signature, "failed to fetch finalised transaction for comparison");
            None
        }
    };

    let (real_base_amount, real_token_raw_amount, slippage_pct) = match snapshot {
        Some(s) => {
            let real_base = rust_decimal::Decimal::from_str(&s.native_delta_lamports.abs().to_string())
                .unwrap_or_default()
                / rust_decimal::Decimal::from(1_000_000_000u64);
            let slippage = if result.base_amount != rust_decimal::Decimal::ZERO {
                ((real_base / result.base_amount - rust_decimal::Decimal::ONE) * rust_decimal::Decimal::from(100))
                    .to_string()
                    .parse::<f64>()
                    .ok()
            } else {
                None
            };
            let real_token = s
                .token_deltas
                .iter()
                .find(|d| d.owner == wallet_pubkey)
                .map(|d| d.raw_delta.clone());
            (Some(real_base), real_token, slippage)
        }
        None => (None, None, None),
    };

    let comparison = crate::store::ExecutionComparison {
        signature: result.signature.clone(),
        token: descriptor.token.clone(),
        direction: descriptor.direction,
        quoted_base_amount: result.base_amount,
        quoted_token_raw_amount: result.token_raw_amount.clone(),
        real_base_amount,
        real_token_raw_amount,
        fee_lamports: result.fee_lamports,
        compute_units: None,
        slippage_pct,
    };
    if let Err(e) = store.record_execution_comparison(&comparison) {
        warn!(error = %e, "failed to record execution comparison");
    }

    if let Some(slippage) = slippage_pct {
        if slippage.abs() > compare_alert_pct {
            notifier.notify_slippage_alert(&descriptor.token, &result.signature, slippage).await;
        }
    }
}
