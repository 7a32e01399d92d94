//! C6 Risk Engine: the BUY and SELL policy gates of spec.md §4.6. Every gate
//! is a pure decision given the current store/config state plus one
//! aggregator round trip; the pipeline serializer (C5) is the only caller
//! and runs these under the single-writer critical section.
//!
//! Grounded on `brain/src/decision_engine/guardrails.rs`'s `check_decision_
//! allowed` (an ordered chain of independent checks, each returning
//! `Err(reason)` on the first violation) generalized from the teacher's
//! fixed anti-churn rules to spec.md §4.6's 12-step BUY pipeline and its
//! SELL counterpart.

use num_bigint::BigInt;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use crate::aggregator::{AggregatorClient, QuoteRequest, QuoteResponse};
use crate::chain::ChainClient;
use crate::circuit_breaker::CircuitBreaker;
use crate::config::RiskConfig;
use crate::error::RejectReason;
use crate::model::{Direction, Position, SwapDescriptor};
use crate::store::Store;

pub enum RiskOutcome {
    Execute { quote: QuoteResponse, base_amount: Decimal, token_raw_amount: BigInt, price_drift_pct: Option<f64> },
    /// SELL-only: quote succeeded but impact is high — proceed anyway,
    /// logged rather than rejected (spec.md §4.6, SELL step).
    ExecuteWithImpactWarning { quote: QuoteResponse, base_amount: Decimal, token_raw_amount: BigInt },
    Reject { reason: RejectReason, price_drift_pct: Option<f64> },
}

impl RiskOutcome {
    fn reject(reason: RejectReason) -> Self {
        RiskOutcome::Reject { reason, price_drift_pct: None }
    }
}

pub struct RiskEngine<'a> {
    config: &'a RiskConfig,
    store: &'a Store,
    breaker: &'a CircuitBreaker,
    aggregator: &'a dyn AggregatorClient,
    chain: &'a dyn ChainClient,
    wallet_pubkey: &'a str,
    paused: &'a AtomicBool,
}

impl<'a> RiskEngine<'a> {
    pub fn new(
        config: &'a RiskConfig,
        store: &'a Store,
        breaker: &'a CircuitBreaker,
        aggregator: &'a dyn AggregatorClient,
        chain: &'a dyn ChainClient,
        wallet_pubkey: &'a str,
        paused: &'a AtomicBool,
    ) -> Self {
        Self { config, store, breaker, aggregator, chain, wallet_pubkey, paused }
    }

    fn common_gates(&self, descriptor: &SwapDescriptor) -> Option<RejectReason> {
        if self.paused.load(Ordering::Relaxed) {
            return Some(RejectReason::Paused);
        }
        if self.breaker.is_open() {
            return Some(RejectReason::CircuitBreaker);
        }
        if descriptor.unsafe_parse && !self.config.allow_unsafe_parse_trades {
            return Some(RejectReason::UnsafeParse);
        }
        None
    }

    pub async fn evaluate_buy(&self, descriptor: &SwapDescriptor, wallet_balance_lamports: u64) -> RiskOutcome {
        if let Some(reason) = self.common_gates(descriptor) {
            return RiskOutcome::reject(reason);
        }

        let open_positions = match self.store.open_position_count() {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "store error counting open positions");
                return RiskOutcome::reject(RejectReason::NoPosition);
            }
        };
        if open_positions >= self.config.max_open_positions {
            return RiskOutcome::reject(RejectReason::MaxOpenPositions);
        }

        let sized = descriptor.upstream_amount * Decimal::from_f64_retain(self.config.copy_ratio).unwrap_or(Decimal::ONE);
        let mut sized = sized.min(self.config.max_per_trade);
        if sized < self.config.min_per_trade {
            return RiskOutcome::reject(RejectReason::BelowMinTrade);
        }

        // Daily budget: shrink to the remaining headroom rather than reject
        // outright when close to the cap (spec.md §4.6, BUY step 4).
        let spent_today = match self.store.spent_today() {
            Ok(v) => v,
            Err(_) => Decimal::ZERO,
        };
        if spent_today + sized > self.config.max_per_day {
            let remaining = (self.config.max_per_day - spent_today).max(Decimal::ZERO);
            if remaining < self.config.min_per_trade {
                return RiskOutcome::reject(RejectReason::BudgetExhausted);
            }
            sized = remaining;
        }

        if let Ok(Some(until)) = self.store.cooldown_until(&descriptor.token) {
            if until > now() {
                return RiskOutcome::reject(RejectReason::Cooldown);
            }
        }

        // Adaptive fee guard: tighter for small trades, looser at full size
        // (spec.md §4.6: base threshold at s >= 0.5, 2x at s >= 0.1, 3x below).
        let fee_budget_pct = if sized >= Decimal::new(5, 1) {
            self.config.max_fee_pct
        } else if sized >= Decimal::new(1, 1) {
            self.config.max_fee_pct * 2.0
        } else {
            self.config.max_fee_pct * 3.0
        };

        let reserve_minor = lamports_to_decimal(wallet_balance_lamports);
        let estimated_fee = estimate_fee_decimal(sized);
        if sized + estimated_fee + self.config.min_reserve > reserve_minor {
            return RiskOutcome::reject(RejectReason::InsufficientBalance);
        }

        if self.config.restrict_intermediate_tokens && crate::model::is_intermediate(&descriptor.token) {
            return RiskOutcome::reject(RejectReason::UnsafeMint);
        }

        if self.config.block_if_mint_authority || self.config.block_if_freeze_authority {
            match self.chain.get_mint_safety(&descriptor.token).await {
                Ok(safety) => {
                    if self.config.block_if_mint_authority && safety.mint_authority_present {
                        return RiskOutcome::reject(RejectReason::UnsafeMint);
                    }
                    if self.config.block_if_freeze_authority && safety.freeze_authority_present {
                        return RiskOutcome::reject(RejectReason::UnsafeMint);
                    }
                }
                Err(e) => {
                    warn!(token = %descriptor.token, error = %e, "mint safety lookup failed, rejecting conservatively");
                    return RiskOutcome::reject(RejectReason::UnsafeMint);
                }
            }
        }

        let quote = match self
            .quote_with_one_retry(crate::model::INTERMEDIATE_TOKENS[0], &descriptor.token, decimal_to_lamports_string(sized))
            .await
        {
            Some(q) => q,
            None => return RiskOutcome::reject(RejectReason::UnroutableToken),
        };

        let fee_pct = estimate_fee_pct(sized);
        if fee_pct > fee_budget_pct {
            return RiskOutcome::reject(RejectReason::FeeOverhead);
        }

        if (quote.price_impact_pct.abs() * 100.0) > self.config.max_price_impact_bps as f64 {
            return RiskOutcome::reject(RejectReason::PriceImpactTooHigh);
        }

        let drift = if self.config.max_price_drift_pct > 0.0
            && !(descriptor.unsafe_parse && self.config.disable_drift_guard_on_unsafe_parse)
        {
            price_drift_pct(descriptor, &quote, sized)
        } else {
            None
        };
        if let Some(d) = drift {
            if self.config.max_price_drift_pct > 0.0 && d.abs() > self.config.max_price_drift_pct {
                return RiskOutcome::Reject { reason: RejectReason::PriceDriftTooHigh, price_drift_pct: Some(d) };
            }
        }

        let token_raw_amount = BigInt::parse_bytes(quote.out_amount_raw.as_bytes(), 10).unwrap_or_else(|| BigInt::from(0));
        info!(token = %descriptor.token, amount = %sized, "BUY approved");
        RiskOutcome::Execute { quote, base_amount: sized, token_raw_amount, price_drift_pct: drift }
    }

    /// Assumes the caller has already resolved the SENT-but-not-CONFIRMED
    /// gate (spec.md SELL step 2): by the time `position` reaches here it is
    /// either confirmed, still pending under an explicit allow flag, or this
    /// call never happens because the caller rejected with
    /// `PositionNotConfirmed` first.
    pub async fn evaluate_sell(
        &self,
        descriptor: &SwapDescriptor,
        position: Option<&Position>,
    ) -> RiskOutcome {
        if let Some(reason) = self.common_gates(descriptor) {
            return RiskOutcome::reject(reason);
        }

        let position = match position {
            Some(p) => p,
            None => return RiskOutcome::reject(RejectReason::NoPosition),
        };

        // Proportional sell sizing: mirror the fraction of the upstream
        // wallet's own pre-trade token balance that it sold, not a flat
        // copy-ratio of the base amount it received (spec.md §4.6, SELL
        // step 3 — cooldown is never applied to a SELL, step 4).
        let my_sell_raw = self.compute_proportional_sell(descriptor, position).await;
        if my_sell_raw <= BigInt::from(0) {
            return RiskOutcome::reject(RejectReason::NoPosition);
        }

        let quote = match self
            .quote_with_one_retry(&descriptor.token, crate::model::INTERMEDIATE_TOKENS[0], my_sell_raw.to_string())
            .await
        {
            Some(q) => q,
            None => return RiskOutcome::reject(RejectReason::UnroutableToken),
        };

        let base_received = lamports_str_to_decimal(&quote.out_amount_raw);

        if (quote.price_impact_pct.abs() * 100.0) > self.config.max_price_impact_bps as f64 {
            warn!(token = %descriptor.token, impact = quote.price_impact_pct, "SELL proceeding despite high impact");
            return RiskOutcome::ExecuteWithImpactWarning {
                quote,
                base_amount: base_received,
                token_raw_amount: my_sell_raw,
            };
        }

        RiskOutcome::Execute { quote, base_amount: base_received, token_raw_amount: my_sell_raw, price_drift_pct: None }
    }

    /// `fraction = upstream_sold / (upstream_current_balance + upstream_sold)`,
    /// capped at 1.0; `my_sell = floor(my_balance * fraction)`, clamped to
    /// `my_balance`. Falls back to a full exit (`my_balance`) when the
    /// upstream's current balance can't be fetched (spec.md §4.6, SELL
    /// step 3: "full exit is the safe default").
    async fn compute_proportional_sell(&self, descriptor: &SwapDescriptor, position: &Position) -> BigInt {
        let upstream_sold = descriptor.raw_token_amount.clone();
        let b_now = match self.chain.get_token_raw_balance(self.wallet_pubkey, &descriptor.token).await {
            Ok(b) => b,
            Err(e) => {
                warn!(token = %descriptor.token, error = %e, "upstream balance lookup failed, falling back to full exit");
                return position.raw_balance.clone();
            }
        };
        let b_before = &b_now + &upstream_sold;
        if b_before <= BigInt::from(0) {
            return position.raw_balance.clone();
        }

        let upstream_sold_dec = match Decimal::from_str(&upstream_sold.to_string()) {
            Ok(d) => d,
            Err(_) => return position.raw_balance.clone(),
        };
        let b_before_dec = match Decimal::from_str(&b_before.to_string()) {
            Ok(d) if !d.is_zero() => d,
            _ => return position.raw_balance.clone(),
        };
        let fraction = (upstream_sold_dec / b_before_dec).min(Decimal::ONE);

        let my_balance_dec = match Decimal::from_str(&position.raw_balance.to_string()) {
            Ok(d) => d,
            Err(_) => return position.raw_balance.clone(),
        };
        let my_sell_dec = (my_balance_dec * fraction).floor();
        match BigInt::parse_bytes(my_sell_dec.trunc().to_string().as_bytes(), 10) {
            Some(raw) => raw.min(position.raw_balance.clone()),
            None => position.raw_balance.clone(),
        }
    }

    async fn quote_with_one_retry(&self, input_mint: &str, output_mint: &str, amount_raw: String) -> Option<QuoteResponse> {
        let request = QuoteRequest {
            input_mint: input_mint.to_string(),
            output_mint: output_mint.to_string(),
            amount_raw,
            slippage_bps: self.config.slippage_bps,
        };
        if let Ok(quote) = self.aggregator.quote(request.clone()).await {
            return Some(quote);
        }
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        self.aggregator.quote(request).await.ok()
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn lamports_to_decimal(lamports: u64) -> Decimal {
    Decimal::from(lamports) / Decimal::from(1_000_000_000u64)
}

fn decimal_to_lamports_string(amount: Decimal) -> String {
    let lamports = (amount * Decimal::from(1_000_000_000u64)).trunc();
    lamports.to_string()
}

/// Inverse of [`decimal_to_lamports_string`]: a SELL quote's `out_amount_raw`
/// is base-asset lamports, converted back to a `Decimal` base amount for the
/// virtual ledger / metric.
fn lamports_str_to_decimal(raw: &str) -> Decimal {
    Decimal::from_str(raw).unwrap_or(Decimal::ZERO) / Decimal::from(1_000_000_000u64)
}

/// Flat fixed-cost fee estimate (base tx fee + priority fee), used by both
/// the adaptive fee guard and the balance-reserve guard (spec.md §4.6, BUY
/// steps 6-7). Mirrors the executor's ESTIMATE formula without requiring the
/// full `ExecutionConfig`.
fn estimate_fee_decimal(_base_amount: Decimal) -> Decimal {
    Decimal::new(15_000, 9)
}

fn estimate_fee_pct(base_amount: Decimal) -> f64 {
    if base_amount.is_zero() {
        return 100.0;
    }
    (estimate_fee_decimal(base_amount) / base_amount * Decimal::from(100)).to_string().parse().unwrap_or(100.0)
}

/// `p_src = upstream_base / (upstream_token / 10^dec)`, `p_quote = s /
/// (quote_out / 10^dec)` where `s` is the bot's own proposed spend, not the
/// upstream wallet's trade size (spec.md §4.6 step 11) — using
/// `upstream_amount` for both sides understates drift whenever
/// `copy_ratio != 1` since a fair quote at a smaller size would falsely
/// compare against the upstream's full-size price.
fn price_drift_pct(descriptor: &SwapDescriptor, quote: &QuoteResponse, sized: Decimal) -> Option<f64> {
    use rust_decimal::prelude::ToPrimitive;
    let upstream_price = descriptor.upstream_amount.to_f64()? / descriptor.token_amount_f64().max(1e-12);
    let quote_out: f64 = quote.out_amount_raw.parse().ok()?;
    if quote_out <= 0.0 {
        return None;
    }
    let scale = 10f64.powi(descriptor.token_decimals as i32);
    let quote_price = sized.to_f64()? / (quote_out / scale);
    if upstream_price <= 0.0 {
        return None;
    }
    Some(((quote_price - upstream_price) / upstream_price) * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainClient, MintSafety, SimulationOutcome};
    use crate::model::{Direction, Position, PositionStatus, SourceTag};
    use async_trait::async_trait;
    use num_bigint::BigInt;
    use std::sync::atomic::AtomicBool;

    struct StubAggregator {
        routable: bool,
        price_impact_pct: f64,
    }

    #[async_trait]
    impl AggregatorClient for StubAggregator {
        async fn quote(&self, _request: QuoteRequest) -> anyhow::Result<QuoteResponse> {
            if !self.routable {
                anyhow::bail!("not routable");
            }
            Ok(QuoteResponse {
                out_amount_raw: "500000".to_string(),
                price_impact_pct: self.price_impact_pct,
                route_plan_summary: "direct".to_string(),
            })
        }
        async fn swap(&self, _request: crate::aggregator::SwapRequest) -> anyhow::Result<crate::aggregator::SwapResponse> {
            Ok(crate::aggregator::SwapResponse { unsigned_transaction_b64: "".to_string() })
        }
        async fn is_routable(&self, _mint: &str) -> anyhow::Result<bool> {
            Ok(self.routable)
        }
    }

    struct StubChain {
        wallet_token_balance: BigInt,
        mint_safety: MintSafety,
    }

    impl Default for StubChain {
        fn default() -> Self {
            Self { wallet_token_balance: BigInt::from(0), mint_safety: MintSafety::default() }
        }
    }

    #[async_trait]
    impl ChainClient for StubChain {
        async fn get_balance_lamports(&self, _pubkey: &str) -> anyhow::Result<u64> {
            Ok(10_000_000_000)
        }
        async fn get_token_raw_balance(&self, _owner: &str, _mint: &str) -> anyhow::Result<BigInt> {
            Ok(self.wallet_token_balance.clone())
        }
        async fn get_balance_snapshot(&self, _s: &str, _w: &str) -> anyhow::Result<Option<crate::model::RawBalanceSnapshot>> {
            Ok(None)
        }
        async fn recent_signatures(&self, _w: &str, _limit: usize) -> anyhow::Result<Vec<String>> {
            Ok(vec![])
        }
        async fn simulate(&self, _tx: &str) -> anyhow::Result<SimulationOutcome> {
            Ok(SimulationOutcome { success: true, units_consumed: Some(1_000), logs: vec![] })
        }
        async fn send_and_confirm(&self, _tx: &str) -> anyhow::Result<String> {
            Ok("LIVE_SIG".to_string())
        }
        async fn confirm_signature(&self, _sig: &str) -> anyhow::Result<bool> {
            Ok(true)
        }
        async fn get_mint_safety(&self, _mint: &str) -> anyhow::Result<MintSafety> {
            Ok(self.mint_safety)
        }
    }

    fn test_config() -> RiskConfig {
        RiskConfig {
            copy_ratio: 0.5,
            max_per_trade: Decimal::new(100, 1),
            min_per_trade: Decimal::new(1, 2),
            max_per_day: Decimal::new(1000, 1),
            max_open_positions: 5,
            cooldown_seconds: 0,
            max_fee_pct: 50.0,
            min_reserve: Decimal::ZERO,
            slippage_bps: 100,
            max_price_impact_bps: 10_000,
            max_price_drift_pct: 0.0,
            block_if_mint_authority: false,
            block_if_freeze_authority: false,
            allow_unsafe_parse_trades: false,
            disable_drift_guard_on_unsafe_parse: false,
            restrict_intermediate_tokens: true,
        }
    }

    fn test_descriptor() -> SwapDescriptor {
        SwapDescriptor {
            signature: "sig".into(),
            direction: Direction::Buy,
            token: "TOKEN".into(),
            upstream_amount: Decimal::new(1, 0),
            raw_token_amount: BigInt::from(500_000u64),
            token_decimals: 6,
            source: SourceTag::Webhook,
            unsafe_parse: false,
        }
    }

    #[tokio::test]
    async fn rejects_when_paused() {
        let store = Store::open_in_memory().unwrap();
        let breaker = CircuitBreaker::new(crate::config::CircuitBreakerConfig {
            fail_rate_pct: 50.0,
            fail_window_minutes: 60,
            latency_p99_ms: 5000,
            no_position_spike: 5,
            auto_reset_minutes: 30,
            window_capacity: 50,
        });
        let aggregator = StubAggregator { routable: true, price_impact_pct: 0.0 };
        let chain = StubChain::default();
        let paused = AtomicBool::new(true);
        let config = test_config();
        let engine = RiskEngine::new(&config, &store, &breaker, &aggregator, &chain, "WALLET", &paused);
        let outcome = engine.evaluate_buy(&test_descriptor(), 10_000_000_000).await;
        assert!(matches!(outcome, RiskOutcome::Reject { reason: RejectReason::Paused, .. }));
    }

    #[tokio::test]
    async fn rejects_unsafe_parse_by_default() {
        let store = Store::open_in_memory().unwrap();
        let breaker = CircuitBreaker::new(crate::config::CircuitBreakerConfig {
            fail_rate_pct: 50.0,
            fail_window_minutes: 60,
            latency_p99_ms: 5000,
            no_position_spike: 5,
            auto_reset_minutes: 30,
            window_capacity: 50,
        });
        let aggregator = StubAggregator { routable: true, price_impact_pct: 0.0 };
        let chain = StubChain::default();
        let paused = AtomicBool::new(false);
        let config = test_config();
        let engine = RiskEngine::new(&config, &store, &breaker, &aggregator, &chain, "WALLET", &paused);
        let mut descriptor = test_descriptor();
        descriptor.unsafe_parse = true;
        let outcome = engine.evaluate_buy(&descriptor, 10_000_000_000).await;
        assert!(matches!(outcome, RiskOutcome::Reject { reason: RejectReason::UnsafeParse, .. }));
    }

    #[tokio::test]
    async fn approves_sane_buy() {
        let store = Store::open_in_memory().unwrap();
        let breaker = CircuitBreaker::new(crate::config::CircuitBreakerConfig {
            fail_rate_pct: 50.0,
            fail_window_minutes: 60,
            latency_p99_ms: 5000,
            no_position_spike: 5,
            auto_reset_minutes: 30,
            window_capacity: 50,
        });
        let aggregator = StubAggregator { routable: true, price_impact_pct: 0.01 };
        let chain = StubChain::default();
        let paused = AtomicBool::new(false);
        let config = test_config();
        let engine = RiskEngine::new(&config, &store, &breaker, &aggregator, &chain, "WALLET", &paused);
        let outcome = engine.evaluate_buy(&test_descriptor(), 10_000_000_000).await;
        assert!(matches!(outcome, RiskOutcome::Execute { .. }));
    }

    #[tokio::test]
    async fn rejects_unroutable_token() {
        let store = Store::open_in_memory().unwrap();
        let breaker = CircuitBreaker::new(crate::config::CircuitBreakerConfig {
            fail_rate_pct: 50.0,
            fail_window_minutes: 60,
            latency_p99_ms: 5000,
            no_position_spike: 5,
            auto_reset_minutes: 30,
            window_capacity: 50,
        });
        let aggregator = StubAggregator { routable: false, price_impact_pct: 0.0 };
        let chain = StubChain::default();
        let paused = AtomicBool::new(false);
        let config = test_config();
        let engine = RiskEngine::new(&config, &store, &breaker, &aggregator, &chain, "WALLET", &paused);
        let outcome = engine.evaluate_buy(&test_descriptor(), 10_000_000_000).await;
        assert!(matches!(outcome, RiskOutcome::Reject { reason: RejectReason::UnroutableToken, .. }));
    }

    #[tokio::test]
    async fn sell_sizes_proportionally_to_upstream_fraction_sold() {
        let store = Store::open_in_memory().unwrap();
        let breaker = CircuitBreaker::new(crate::config::CircuitBreakerConfig {
            fail_rate_pct: 50.0,
            fail_window_minutes: 60,
            latency_p99_ms: 5000,
            no_position_spike: 5,
            auto_reset_minutes: 30,
            window_capacity: 50,
        });
        let aggregator = StubAggregator { routable: true, price_impact_pct: 0.01 };
        // Upstream sold 500_000 raw and now holds 500_000 raw, so it sold half
        // its pre-trade balance; our own 1_000_000 raw position should sell half.
        let chain = StubChain { wallet_token_balance: BigInt::from(500_000u64), mint_safety: MintSafety::default() };
        let paused = AtomicBool::new(false);
        let config = test_config();
        let engine = RiskEngine::new(&config, &store, &breaker, &aggregator, &chain, "WALLET", &paused);
        let mut descriptor = test_descriptor();
        descriptor.direction = Direction::Sell;
        let position = Position {
            token: "TOKEN".into(),
            raw_balance: BigInt::from(1_000_000u64),
            token_decimals: 6,
            status: PositionStatus::Confirmed,
            last_update: 0,
            pending_delta: None,
        };
        let outcome = engine.evaluate_sell(&descriptor, Some(&position)).await;
        match outcome {
            RiskOutcome::Execute { token_raw_amount, .. } => {
                assert_eq!(token_raw_amount, BigInt::from(500_000u64));
            }
            _ => panic!("expected Execute, got a reject"),
        }
    }

    #[tokio::test]
    async fn sell_falls_back_to_full_exit_when_balance_lookup_fails() {
        let store = Store::open_in_memory().unwrap();
        let breaker = CircuitBreaker::new(crate::config::CircuitBreakerConfig {
            fail_rate_pct: 50.0,
            fail_window_minutes: 60,
            latency_p99_ms: 5000,
            no_position_spike: 5,
            auto_reset_minutes: 30,
            window_capacity: 50,
        });
        let aggregator = StubAggregator { routable: true, price_impact_pct: 0.01 };
        let chain = StubChain::default();
        let paused = AtomicBool::new(false);
        let config = test_config();
        let engine = RiskEngine::new(&config, &store, &breaker, &aggregator, &chain, "WALLET", &paused);
        let mut descriptor = test_descriptor();
        descriptor.direction = Direction::Sell;
        descriptor.raw_token_amount = BigInt::from(0u64);
        let position = Position {
            token: "TOKEN".into(),
            raw_balance: BigInt::from(750_000u64),
            token_decimals: 6,
            status: PositionStatus::Confirmed,
            last_update: 0,
            pending_delta: None,
        };
        let outcome = engine.evaluate_sell(&descriptor, Some(&position)).await;
        match outcome {
            RiskOutcome::Execute { token_raw_amount, .. } => {
                assert_eq!(token_raw_amount, BigInt::from(750_000u64));
            }
            _ => panic!("expected Execute, got a reject"),
        }
    }

    #[tokio::test]
    async fn buy_blocked_by_mint_authority_gate() {
        let store = Store::open_in_memory().unwrap();
        let breaker = CircuitBreaker::new(crate::config::CircuitBreakerConfig {
            fail_rate_pct: 50.0,
            fail_window_minutes: 60,
            latency_p99_ms: 5000,
            no_position_spike: 5,
            auto_reset_minutes: 30,
            window_capacity: 50,
        });
        let aggregator = StubAggregator { routable: true, price_impact_pct: 0.0 };
        let chain = StubChain {
            wallet_token_balance: BigInt::from(0),
            mint_safety: MintSafety { mint_authority_present: true, freeze_authority_present: false },
        };
        let paused = AtomicBool::new(false);
        let mut config = test_config();
        config.block_if_mint_authority = true;
        let engine = RiskEngine::new(&config, &store, &breaker, &aggregator, &chain, "WALLET", &paused);
        let outcome = engine.evaluate_buy(&test_descriptor(), 10_000_000_000).await;
        assert!(matches!(outcome, RiskOutcome::Reject { reason: RejectReason::UnsafeMint, .. }));
    }
}
