//! Core data model shared across the pipeline: the in-flight swap descriptor,
//! the durable position row, and the small value types layered on top of them.
//!
//! Grounded on `data-mining/src/types/mod.rs` (plain serde structs, a side
//! enum with an `as_str()` helper) generalized from pump.fun trade events to
//! the copy-trading swap descriptor of spec.md §3.

use num_bigint::BigInt;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trade direction, mirrored from the upstream wallet's balance deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
        }
    }
}

/// Where a raw transaction record was first observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceTag {
    Webhook,
    WebhookFallback,
    Subscription,
    Poll,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Webhook => "webhook",
            SourceTag::WebhookFallback => "webhook-fallback",
            SourceTag::Subscription => "subscription",
            SourceTag::Poll => "poll",
        }
    }

    pub fn from_path_segment(segment: &str) -> Self {
        match segment {
            "fallback" => SourceTag::WebhookFallback,
            _ => SourceTag::Webhook,
        }
    }
}

/// A canonical description of one upstream swap, produced by the parser
/// (§4.2) and carried through dedup, the pipeline, and risk/execution.
///
/// `upstream_amount` is the base-asset amount paid (BUY) or received (SELL)
/// by the upstream wallet, kept as a `Decimal` rather than `f64` so drift and
/// budget arithmetic never pick up floating-point noise. `raw_token_amount`
/// is the token-native integer amount at `token_decimals` precision, kept as
/// a `BigInt` because token supply on a programmable chain is not bounded by
/// a machine word in the general case (spec.md §9: "never through floating
/// point except for the drift computation").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapDescriptor {
    pub signature: String,
    pub direction: Direction,
    pub token: String,
    pub upstream_amount: Decimal,
    pub raw_token_amount: BigInt,
    pub token_decimals: u8,
    pub source: SourceTag,
    pub unsafe_parse: bool,
}

impl SwapDescriptor {
    /// Token amount as a float, for price ratios only (never for balances).
    pub fn token_amount_f64(&self) -> f64 {
        let scale = 10f64.powi(self.token_decimals as i32);
        // BigInt -> f64 via string round-trip keeps this honest for amounts
        // that don't fit a u128 without pulling in a second numeric crate.
        self.raw_token_amount.to_string().parse::<f64>().unwrap_or(0.0) / scale
    }
}

/// Fixed set of mints that must never be selected as the canonical swap
/// token (wrapped base asset, main stablecoins, staked-base derivatives).
pub const INTERMEDIATE_TOKENS: &[&str] = &[
    "So11111111111111111111111111111111111111112", // wrapped SOL
    "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v", // USDC
    "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB", // USDT
    "J1toso1uCk3RLmjorhTtrVwY9HJ7X8V9yYac6Y7kGCPn", // jitoSOL
    "mSoLzYCxHdYgdzU16g5QSh3i5K3z3KZK7ytfqcJm7So",  // mSOL
];

pub fn is_intermediate(mint: &str) -> bool {
    INTERMEDIATE_TOKENS.contains(&mint)
}

/// Minimum base amount (0.00005 base asset, 50_000 base-minor-units) for a
/// structured-event match to be accepted as a swap (spec.md §4.2, step 1).
pub const MIN_SWAP_BASE_MINOR_UNITS: u64 = 50_000;

/// Position lifecycle status (spec.md §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    /// Live mode, immediately after broadcast: reserved, not yet final.
    Sent,
    /// Simulation default, or live after on-chain confirmation.
    Confirmed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Sent => "SENT",
            PositionStatus::Confirmed => "CONFIRMED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "SENT" => Some(PositionStatus::Sent),
            "CONFIRMED" => Some(PositionStatus::Confirmed),
            _ => None,
        }
    }
}

/// Durable position row, keyed by token identifier.
///
/// `pending_delta` is the raw amount added by the BUY currently reserved in
/// `SENT` status, if any (spec.md §4.8's "rollback by subtracting pending
/// quantity" needs to know how much of the balance the outstanding buy
/// contributed, not just the balance itself).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub token: String,
    pub raw_balance: BigInt,
    pub token_decimals: u8,
    pub status: PositionStatus,
    pub last_update: i64,
    pub pending_delta: Option<BigInt>,
}

/// Outcome recorded for a processed signature (spec.md §3, Pipeline Metric).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeOutcome {
    Copied,
    Rejected,
    Failed,
    CircuitBreaker,
}

impl TradeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeOutcome::Copied => "COPIED",
            TradeOutcome::Rejected => "REJECTED",
            TradeOutcome::Failed => "FAILED",
            TradeOutcome::CircuitBreaker => "CIRCUIT_BREAKER",
        }
    }
}

/// One row of the trade_pipeline_metrics table.
#[derive(Debug, Clone)]
pub struct PipelineMetric {
    pub signature: String,
    pub direction: Direction,
    pub token: String,
    pub source: SourceTag,
    pub outcome: TradeOutcome,
    pub reject_reason: Option<String>,
    pub sell_buffered: bool,
    pub sell_buffer_ms: u64,
    pub confirm_wait_ms: u64,
    pub latency_risk_ms: u64,
    pub latency_exec_ms: u64,
    pub latency_total_ms: u64,
    pub price_drift_pct: Option<f64>,
    pub unsafe_parse: bool,
    pub recorded_at: i64,
}

/// A single raw transaction as received by any of the three ingestion
/// sources. Corresponds to spec.md §9's "tagged variant over the three
/// parser inputs."
#[derive(Debug, Clone, Deserialize)]
pub struct RawTransaction {
    pub signature: String,
    #[serde(rename = "feePayer")]
    pub fee_payer: String,
    pub events: Option<RawEvents>,
    #[serde(rename = "tokenTransfers", default)]
    pub token_transfers: Vec<RawTokenTransfer>,
    #[serde(rename = "nativeTransfers", default)]
    pub native_transfers: Vec<RawNativeTransfer>,
    pub description: Option<String>,
    /// Present only when a pre/post balance snapshot was fetched via RPC
    /// (parser path 2); absent for push-webhook payloads that never made an
    /// RPC round trip.
    #[serde(skip)]
    pub balances: Option<RawBalanceSnapshot>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEvents {
    pub swap: Option<RawSwapEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSwapEvent {
    #[serde(rename = "nativeInput")]
    pub native_input: Option<RawNativeLeg>,
    #[serde(rename = "nativeOutput")]
    pub native_output: Option<RawNativeLeg>,
    #[serde(rename = "tokenInputs", default)]
    pub token_inputs: Vec<RawTokenLeg>,
    #[serde(rename = "tokenOutputs", default)]
    pub token_outputs: Vec<RawTokenLeg>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawNativeLeg {
    pub account: String,
    pub amount: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTokenLeg {
    pub account: String,
    pub mint: String,
    #[serde(rename = "rawTokenAmount")]
    pub raw_token_amount: RawTokenAmount,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTokenAmount {
    #[serde(rename = "tokenAmount")]
    pub token_amount: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTokenTransfer {
    #[serde(rename = "fromUserAccount")]
    pub from_user_account: String,
    #[serde(rename = "toUserAccount")]
    pub to_user_account: String,
    pub mint: String,
    #[serde(rename = "tokenAmount")]
    pub token_amount: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawNativeTransfer {
    #[serde(rename = "fromUserAccount")]
    pub from_user_account: String,
    #[serde(rename = "toUserAccount")]
    pub to_user_account: String,
    pub amount: u64,
}

/// Wallet-indexed pre/post balance snapshot, fetched via chain RPC for the
/// parser's second-priority path.
#[derive(Debug, Clone)]
pub struct RawBalanceSnapshot {
    pub native_delta_lamports: i64,
    pub token_deltas: Vec<TokenDelta>,
}

#[derive(Debug, Clone)]
pub struct TokenDelta {
    pub mint: String,
    pub owner: String,
    pub raw_delta: BigInt,
    pub decimals: u8,
}
