//! Aggregator client: quote/swap contract against the DEX aggregator that
//! executes the mirrored trade (spec.md §6, EXTERNAL INTERFACES).
//!
//! Grounded on `execution/src/trading.rs`'s `reqwest`-backed HTTP clients
//! (a thin `Client` wrapper, typed request/response structs, `.context(...)`
//! on every network call) but expressed as a trait so the risk engine and
//! executor can be tested against a canned implementation instead of a live
//! aggregator, the way the pack's integration-test crates swap out network
//! boundaries.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct QuoteRequest {
    pub input_mint: String,
    pub output_mint: String,
    pub amount_raw: String,
    pub slippage_bps: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteResponse {
    pub out_amount_raw: String,
    pub price_impact_pct: f64,
    pub route_plan_summary: String,
}

#[derive(Debug, Clone)]
pub struct SwapRequest {
    pub quote: QuoteResponse,
    pub user_pubkey: String,
    pub priority_fee_lamports: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwapResponse {
    /// Base64-encoded unsigned transaction, ready for the executor to sign.
    pub unsigned_transaction_b64: String,
}

#[async_trait]
pub trait AggregatorClient: Send + Sync {
    async fn quote(&self, request: QuoteRequest) -> Result<QuoteResponse>;
    async fn swap(&self, request: SwapRequest) -> Result<SwapResponse>;
    /// Whether `mint` is routable at all — used by the risk engine's
    /// UNROUTABLE_TOKEN gate ahead of requesting a real quote.
    async fn is_routable(&self, mint: &str) -> Result<bool>;
}

pub struct HttpAggregatorClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAggregatorClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(8))
                .build()
                .expect("failed to build aggregator http client"),
            base_url,
        }
    }
}

#[derive(Serialize)]
struct QuoteQuery<'a> {
    #[serde(rename = "inputMint")]
    input_mint: &'a str,
    #[serde(rename = "outputMint")]
    output_mint: &'a str,
    amount: &'a str,
    #[serde(rename = "slippageBps")]
    slippage_bps: u16,
}

#[async_trait]
impl AggregatorClient for HttpAggregatorClient {
    async fn quote(&self, request: QuoteRequest) -> Result<QuoteResponse> {
        let query = QuoteQuery {
            input_mint: &request.input_mint,
            output_mint: &request.output_mint,
            amount: &request.amount_raw,
            slippage_bps: request.slippage_bps,
        };
        let response = self
            .client
            .get(format!("{}/quote", self.base_url))
            .query(&query)
            .send()
            .await
            .context("aggregator quote request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("aggregator quote returned {}", response.status());
        }
        response.json::<QuoteResponse>().await.context("failed to decode quote response")
    }

    async fn swap(&self, request: SwapRequest) -> Result<SwapResponse> {
        let payload = serde_json::json!({
            "quoteResponse": {
                "outAmount": request.quote.out_amount_raw,
                "priceImpactPct": request.quote.price_impact_pct,
            },
            "userPublicKey": request.user_pubkey,
            "prioritizationFeeLamports": request.priority_fee_lamports,
        });
        let response = self
            .client
            .post(format!("{}/swap", self.base_url))
            .json(&payload)
            .send()
            .await
            .context("aggregator swap request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("aggregator swap returned {}", response.status());
        }
        response.json::<SwapResponse>().await.context("failed to decode swap response")
    }

    async fn is_routable(&self, mint: &str) -> Result<bool> {
        let probe = QuoteRequest {
            input_mint: crate::model::INTERMEDIATE_TOKENS[0].to_string(),
            output_mint: mint.to_string(),
            amount_raw: "1000000".to_string(),
            slippage_bps: 50,
        };
        Ok(self.quote(probe).await.is_ok())
    }
}

pub fn decimal_price_per_token(base_spent: Decimal, raw_out: &str, out_decimals: u8) -> Option<Decimal> {
    use rust_decimal::prelude::FromStr;
    let raw: Decimal = Decimal::from_str(raw_out).ok()?;
    if raw.is_zero() {
        return None;
    }
    let scale = Decimal::from(10u64.pow(out_decimals as u32));
    let token_amount = raw / scale;
    if token_amount.is_zero() {
        return None;
    }
    Some(base_spent / token_amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::FromStr;

    #[test]
    fn price_per_token_divides_correctly() {
        let price = decimal_price_per_token(Decimal::from_str("1.0").unwrap(), "500000", 6).unwrap();
        assert_eq!(price, Decimal::from_str("2").unwrap());
    }

    #[test]
    fn price_per_token_guards_zero_output() {
        assert!(decimal_price_per_token(Decimal::from_str("1.0").unwrap(), "0", 6).is_none());
    }
}
