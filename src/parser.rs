//! C2 Swap Parser: turns a raw, loosely-structured transaction record into a
//! canonical [`SwapDescriptor`], or decides it isn't a swap at all.
//!
//! Grounded on `data-mining/src/parser/mod.rs`'s discriminator cascade
//! (try the structured event path first, fall back to a lower-confidence
//! reconstruction, and flag the result when it came from the fallback) —
//! generalized here from pump.fun's fixed BUY/SELL/CREATE discriminators to
//! spec.md §4.2's three-priority swap reconstruction:
//!   1. a structured aggregator swap event (`events.swap`)
//!   2. pre/post balance deltas, fetched via chain RPC
//!   3. transfer-list reconstruction (flagged `unsafe_parse`)
//!
//! A pure function: no I/O, no store access. Callers fetch the RPC balance
//! snapshot (path 2) ahead of time and attach it to `RawTransaction::balances`.

use num_bigint::BigInt;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::model::{
    is_intermediate, Direction, RawTransaction, SourceTag, SwapDescriptor,
    MIN_SWAP_BASE_MINOR_UNITS,
};

const LAMPORTS_PER_BASE_UNIT: u64 = 1_000_000_000;
/// Decimal precision assumed for path-3 reconstructions that never saw a
/// token mint's real decimals (spec.md §4.2, step 3: "approximated to 6").
const FALLBACK_TOKEN_DECIMALS: u8 = 6;

pub fn parse_swap(raw: &RawTransaction, source: SourceTag) -> Option<SwapDescriptor> {
    if let Some(descriptor) = parse_structured_event(raw, source) {
        debug!(signature = %raw.signature, "parsed via structured aggregator event");
        return Some(descriptor);
    }

    if let Some(balances) = &raw.balances {
        if let Some(descriptor) = parse_balance_deltas(raw, balances, source) {
            debug!(signature = %raw.signature, "parsed via balance deltas");
            return Some(descriptor);
        }
    }

    if let Some(descriptor) = parse_transfer_list(raw, source) {
        warn!(signature = %raw.signature, "parsed via unsafe transfer-list reconstruction");
        return Some(descriptor);
    }

    None
}

/// Priority 1: a structured `events.swap` payload naming exactly one native
/// leg and one token leg.
fn parse_structured_event(raw: &RawTransaction, source: SourceTag) -> Option<SwapDescriptor> {
    let swap = raw.events.as_ref()?.swap.as_ref()?;
    let wallet = &raw.fee_payer;

    // spec.md §4.2 path 1 is restricted to entries where the account equals
    // the monitored wallet; a multi-party swap event can carry counterparty
    // legs that must not be mistaken for the wallet's own side of the trade.
    let (native_amount, is_buy) = match (&swap.native_input, &swap.native_output) {
        (Some(input), None) if &input.account == wallet => (parse_u64(&input.amount)?, true),
        (None, Some(output)) if &output.account == wallet => (parse_u64(&output.amount)?, false),
        _ => return None,
    };

    if native_amount < MIN_SWAP_BASE_MINOR_UNITS {
        return None;
    }

    let token_legs = if is_buy { &swap.token_outputs } else { &swap.token_inputs };
    let leg = select_canonical_leg(
        token_legs.iter().filter(|l| &l.account == wallet).map(|l| (l.mint.as_str(), &l.raw_token_amount)),
    )?;

    let raw_amount = BigInt::parse_bytes(leg.1.token_amount.as_bytes(), 10)?;
    let upstream_amount = lamports_to_decimal(native_amount);

    Some(SwapDescriptor {
        signature: raw.signature.clone(),
        direction: if is_buy { Direction::Buy } else { Direction::Sell },
        token: leg.0.to_string(),
        upstream_amount,
        raw_token_amount: raw_amount,
        token_decimals: leg.1.decimals,
        source,
        unsafe_parse: false,
    })
}

/// Priority 2: derive direction and amounts from a wallet-indexed pre/post
/// balance snapshot. Cross-validates the native delta's sign against the
/// token delta's sign (spec.md §4.2: "direction cross-validation").
fn parse_balance_deltas(
    raw: &RawTransaction,
    balances: &crate::model::RawBalanceSnapshot,
    source: SourceTag,
) -> Option<SwapDescriptor> {
    if balances.native_delta_lamports == 0 {
        return None;
    }
    let native_magnitude = balances.native_delta_lamports.unsigned_abs();
    if native_magnitude < MIN_SWAP_BASE_MINOR_UNITS {
        return None;
    }
    let is_buy = balances.native_delta_lamports < 0;

    // spec.md §4.2 path 2: filter token balance changes to those owned by
    // the monitored wallet before picking the canonical delta, so a
    // counterparty's balance change in the same snapshot is never selected.
    let candidate = select_canonical_token_delta(&balances.token_deltas, &raw.fee_payer)?;
    let token_is_gain = candidate.raw_delta.sign() == num_bigint::Sign::Plus;

    // Cross-validate: a BUY must gain tokens while spending base asset, a
    // SELL must lose tokens while receiving base asset.
    if is_buy != token_is_gain {
        return None;
    }

    Some(SwapDescriptor {
        signature: raw.signature.clone(),
        direction: if is_buy { Direction::Buy } else { Direction::Sell },
        token: candidate.mint.clone(),
        upstream_amount: lamports_to_decimal(native_magnitude),
        raw_token_amount: candidate.raw_delta.magnitude().clone().into(),
        token_decimals: candidate.decimals,
        source,
        unsafe_parse: false,
    })
}

/// Priority 3: reconstruct from the raw transfer lists, with no structured
/// event and no balance snapshot available. Lowest confidence; always
/// flagged `unsafe_parse` so the risk engine can gate on it (spec.md §4.6).
fn parse_transfer_list(raw: &RawTransaction, source: SourceTag) -> Option<SwapDescriptor> {
    let wallet = &raw.fee_payer;

    let native_out: u64 = raw
        .native_transfers
        .iter()
        .filter(|t| &t.from_user_account == wallet)
        .map(|t| t.amount)
        .sum();
    let native_in: u64 = raw
        .native_transfers
        .iter()
        .filter(|t| &t.to_user_account == wallet)
        .map(|t| t.amount)
        .sum();

    if native_out == 0 && native_in == 0 {
        return None;
    }
    let is_buy = native_out > native_in;
    let native_amount = if is_buy { native_out - native_in } else { native_in - native_out };
    if native_amount < MIN_SWAP_BASE_MINOR_UNITS {
        return None;
    }

    let mut candidates: std::collections::HashMap<String, f64> = std::collections::HashMap::new();
    for t in &raw.token_transfers {
        if is_intermediate(&t.mint) {
            continue;
        }
        if &t.to_user_account == wallet {
            *candidates.entry(t.mint.clone()).or_insert(0.0) += t.token_amount;
        } else if &t.from_user_account == wallet {
            *candidates.entry(t.mint.clone()).or_insert(0.0) -= t.token_amount;
        }
    }

    let (mint, net_amount) = candidates
        .into_iter()
        .filter(|(_, amt)| if is_buy { *amt > 0.0 } else { *amt < 0.0 })
        .max_by(|a, b| a.1.abs().partial_cmp(&b.1.abs()).unwrap_or(std::cmp::Ordering::Equal))?;

    let scale = 10f64.powi(FALLBACK_TOKEN_DECIMALS as i32);
    let raw_amount = (net_amount.abs() * scale).round() as i128;
    if raw_amount <= 0 {
        return None;
    }

    Some(SwapDescriptor {
        signature: raw.signature.clone(),
        direction: if is_buy { Direction::Buy } else { Direction::Sell },
        token: mint,
        upstream_amount: lamports_to_decimal(native_amount),
        raw_token_amount: BigInt::from(raw_amount),
        token_decimals: FALLBACK_TOKEN_DECIMALS,
        source,
        unsafe_parse: true,
    })
}

/// Filter-then-max-delta canonical token selection (spec.md §4.2): excludes
/// intermediate tokens, then picks the leg with the largest magnitude.
fn select_canonical_leg<'a, I>(legs: I) -> Option<(&'a str, &'a crate::model::RawTokenAmount)>
where
    I: Iterator<Item = (&'a str, &'a crate::model::RawTokenAmount)>,
{
    legs.filter(|(mint, _)| !is_intermediate(mint))
        .max_by_key(|(_, amt)| amt.token_amount.parse::<i128>().unwrap_or(0).abs())
}

fn select_canonical_token_delta<'a>(
    deltas: &'a [crate::model::TokenDelta],
    wallet: &str,
) -> Option<&'a crate::model::TokenDelta> {
    deltas
        .iter()
        .filter(|d| d.owner == wallet && !is_intermediate(&d.mint) && d.raw_delta.sign() != num_bigint::Sign::NoSign)
        .max_by_key(|d| d.raw_delta.magnitude().clone())
}

fn parse_u64(s: &str) -> Option<u64> {
    s.parse::<u64>().ok()
}

fn lamports_to_decimal(lamports: u64) -> Decimal {
    Decimal::from_u64(lamports).unwrap_or(Decimal::ZERO) / Decimal::from_u64(LAMPORTS_PER_BASE_UNIT).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        RawBalanceSnapshot, RawEvents, RawNativeLeg, RawNativeTransfer, RawSwapEvent, RawTokenAmount,
        RawTokenLeg, RawTokenTransfer, TokenDelta,
    };

    fn base_tx() -> RawTransaction {
        RawTransaction {
            signature: "sig".into(),
            fee_payer: "wallet".into(),
            events: None,
            token_transfers: vec![],
            native_transfers: vec![],
            description: None,
            balances: None,
        }
    }

    #[test]
    fn structured_event_buy_parses() {
        let mut tx = base_tx();
        tx.events = Some(RawEvents {
            swap: Some(RawSwapEvent {
                native_input: Some(RawNativeLeg { account: "wallet".into(), amount: "1000000000".into() }),
                native_output: None,
                token_inputs: vec![],
                token_outputs: vec![RawTokenLeg {
                    account: "wallet".into(),
                    mint: "TOKEN_MINT".into(),
                    raw_token_amount: RawTokenAmount { token_amount: "500000".into(), decimals: 6 },
                }],
            }),
        });
        let descriptor = parse_swap(&tx, SourceTag::Webhook).unwrap();
        assert_eq!(descriptor.direction, Direction::Buy);
        assert_eq!(descriptor.token, "TOKEN_MINT");
        assert!(!descriptor.unsafe_parse);
        assert_eq!(descriptor.upstream_amount, Decimal::from_str("1.0").unwrap());
    }

    #[test]
    fn structured_event_excludes_intermediate_tokens() {
        let mut tx = base_tx();
        tx.events = Some(RawEvents {
            swap: Some(RawSwapEvent {
                native_input: Some(RawNativeLeg { account: "wallet".into(), amount: "1000000000".into() }),
                native_output: None,
                token_inputs: vec![],
                token_outputs: vec![
                    RawTokenLeg {
                        account: "wallet".into(),
                        mint: crate::model::INTERMEDIATE_TOKENS[1].to_string(),
                        raw_token_amount: RawTokenAmount { token_amount: "999999999".into(), decimals: 6 },
                    },
                    RawTokenLeg {
                        account: "wallet".into(),
                        mint: "REAL_MINT".into(),
                        raw_token_amount: RawTokenAmount { token_amount: "42".into(), decimals: 6 },
                    },
                ],
            }),
        });
        let descriptor = parse_swap(&tx, SourceTag::Webhook).unwrap();
        assert_eq!(descriptor.token, "REAL_MINT");
    }

    #[test]
    fn below_minimum_amount_is_not_a_swap() {
        let mut tx = base_tx();
        tx.events = Some(RawEvents {
            swap: Some(RawSwapEvent {
                native_input: Some(RawNativeLeg { account: "wallet".into(), amount: "100".into() }),
                native_output: None,
                token_inputs: vec![],
                token_outputs: vec![RawTokenLeg {
                    account: "wallet".into(),
                    mint: "TOKEN_MINT".into(),
                    raw_token_amount: RawTokenAmount { token_amount: "1".into(), decimals: 6 },
                }],
            }),
        });
        assert!(parse_swap(&tx, SourceTag::Webhook).is_none());
    }

    #[test]
    fn structured_event_ignores_a_counterparty_token_leg() {
        let mut tx = base_tx();
        tx.events = Some(RawEvents {
            swap: Some(RawSwapEvent {
                native_input: Some(RawNativeLeg { account: "wallet".into(), amount: "1000000000".into() }),
                native_output: None,
                token_inputs: vec![],
                token_outputs: vec![
                    RawTokenLeg {
                        account: "pool".into(),
                        mint: "COUNTERPARTY_MINT".into(),
                        raw_token_amount: RawTokenAmount { token_amount: "999999999".into(), decimals: 6 },
                    },
                    RawTokenLeg {
                        account: "wallet".into(),
                        mint: "WALLET_MINT".into(),
                        raw_token_amount: RawTokenAmount { token_amount: "42".into(), decimals: 6 },
                    },
                ],
            }),
        });
        let descriptor = parse_swap(&tx, SourceTag::Webhook).unwrap();
        assert_eq!(descriptor.token, "WALLET_MINT");
    }

    #[test]
    fn structured_event_rejects_when_native_leg_is_not_the_wallets() {
        let mut tx = base_tx();
        tx.events = Some(RawEvents {
            swap: Some(RawSwapEvent {
                native_input: Some(RawNativeLeg { account: "someone_else".into(), amount: "1000000000".into() }),
                native_output: None,
                token_inputs: vec![],
                token_outputs: vec![RawTokenLeg {
                    account: "someone_else".into(),
                    mint: "TOKEN_MINT".into(),
                    raw_token_amount: RawTokenAmount { token_amount: "500000".into(), decimals: 6 },
                }],
            }),
        });
        assert!(parse_swap(&tx, SourceTag::Webhook).is_none());
    }

    #[test]
    fn balance_delta_ignores_a_counterparty_owned_delta() {
        let mut tx = base_tx();
        tx.balances = Some(RawBalanceSnapshot {
            native_delta_lamports: -1_000_000_000,
            token_deltas: vec![
                TokenDelta {
                    mint: "COUNTERPARTY_MINT".into(),
                    owner: "pool".into(),
                    raw_delta: BigInt::from(999_999_999i64),
                    decimals: 6,
                },
                TokenDelta {
                    mint: "WALLET_MINT".into(),
                    owner: "wallet".into(),
                    raw_delta: BigInt::from(500_000i64),
                    decimals: 6,
                },
            ],
        });
        let descriptor = parse_swap(&tx, SourceTag::Webhook).unwrap();
        assert_eq!(descriptor.token, "WALLET_MINT");
        assert_eq!(descriptor.direction, Direction::Buy);
    }

    #[test]
    fn transfer_list_fallback_is_flagged_unsafe() {
        let mut tx = base_tx();
        tx.native_transfers.push(RawNativeTransfer {
            from_user_account: "wallet".into(),
            to_user_account: "pool".into(),
            amount: 2_000_000_000,
        });
        tx.token_transfers.push(RawTokenTransfer {
            from_user_account: "pool".into(),
            to_user_account: "wallet".into(),
            mint: "TOKEN_MINT".into(),
            token_amount: 123.456,
        });
        let descriptor = parse_swap(&tx, SourceTag::Poll).unwrap();
        assert!(descriptor.unsafe_parse);
        assert_eq!(descriptor.direction, Direction::Buy);
        assert_eq!(descriptor.token_decimals, FALLBACK_TOKEN_DECIMALS);
    }

    #[test]
    fn no_transfers_is_not_a_swap() {
        let tx = base_tx();
        assert!(parse_swap(&tx, SourceTag::Webhook).is_none());
    }
}
