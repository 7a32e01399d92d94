//! Typed error kinds for the library surface; call sites further up
//! (producers, scheduler tasks, `main`) collapse these into `anyhow::Result`
//! with `.context(...)`, the same split the teacher uses between its
//! `rusqlite`-backed `Database` (typed-ish via `anyhow::Context`) and its
//! `main.rs` orchestration.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("no position found for token {0}")]
    NoPosition(String),
    #[error("position for {token} has invalid status transition: {detail}")]
    InvalidTransition { token: String, detail: String },
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("not a swap")]
    NotASwap,
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Stable reason tags. These strings flow into metrics, notifications, and
/// the breaker's no-position spike detector (spec.md §7: "Reason tags are
/// stable strings").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Paused,
    CircuitBreaker,
    UnsafeParse,
    MaxOpenPositions,
    BelowMinTrade,
    BudgetExhausted,
    Cooldown,
    FeeOverhead,
    InsufficientBalance,
    UnsafeMint,
    UnroutableToken,
    PriceImpactTooHigh,
    PriceDriftTooHigh,
    NoPosition,
    PositionNotConfirmed,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Paused => "PAUSED",
            RejectReason::CircuitBreaker => "CIRCUIT_BREAKER",
            RejectReason::UnsafeParse => "UNSAFE_PARSE",
            RejectReason::MaxOpenPositions => "MAX_OPEN_POSITIONS",
            RejectReason::BelowMinTrade => "BELOW_MIN_TRADE",
            RejectReason::BudgetExhausted => "BUDGET_EXHAUSTED",
            RejectReason::Cooldown => "COOLDOWN",
            RejectReason::FeeOverhead => "FEE_OVERHEAD",
            RejectReason::InsufficientBalance => "INSUFFICIENT_BALANCE",
            RejectReason::UnsafeMint => "UNSAFE_MINT",
            RejectReason::UnroutableToken => "UNROUTABLE_TOKEN",
            RejectReason::PriceImpactTooHigh => "PRICE_IMPACT_TOO_HIGH",
            RejectReason::PriceDriftTooHigh => "PRICE_DRIFT_TOO_HIGH",
            RejectReason::NoPosition => "NO_POSITION",
            RejectReason::PositionNotConfirmed => "POSITION_NOT_CONFIRMED",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
