//! Poll ingestion source: periodic `getSignaturesForAddress` sweep over the
//! upstream wallet, the lowest-latency-but-always-correct backstop behind
//! the webhook and subscription sources (spec.md §4.3, path C).
//!
//! Grounded on `execution/src/trading.rs`'s polling loop shape (a
//! `tokio::time::interval` driving one RPC call, diffed against what was
//! already seen) adapted from confirmation polling to signature discovery.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::chain::ChainClient;
use crate::config::NetworkConfig;
use crate::model::{RawTransaction, SourceTag};
use crate::pending_registry::PendingBuyRegistry;
use crate::pipeline::Pipeline;

pub async fn run(
    network: NetworkConfig,
    chain: Arc<dyn ChainClient>,
    pipeline: Arc<Pipeline>,
    pending: Arc<PendingBuyRegistry>,
) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(network.poll_interval_secs));

    loop {
        ticker.tick().await;
        let signatures = match chain
            .recent_signatures(&network.wallet_pubkey, network.poll_signature_limit)
            .await
        {
            Ok(sigs) => sigs,
            Err(e) => {
                warn!(error = %e, "poll source failed to fetch signatures");
                continue;
            }
        };

        for signature in signatures {
            if !seen.insert(signature.clone()) {
                continue;
            }
            debug!(%signature, "poll source observed new signature");

            // The poll source only has the bare signature; the balance
            // snapshot fetched by `ingest` carries the rest of the
            // reconstruction since no enriched webhook payload exists here.
            let raw = RawTransaction {
                signature,
                fee_payer: network.wallet_pubkey.clone(),
                events: None,
                token_transfers: vec![],
                native_transfers: vec![],
                description: None,
                balances: None,
            };
            super::ingest(raw, SourceTag::Poll, &chain, &network.wallet_pubkey, &pipeline, &pending).await;
        }

        // Bound the seen-set so a long-running process doesn't grow it
        // unboundedly; the idempotency ledger in the store is the real
        // dedup authority, this is just a cheap per-tick skip.
        if seen.len() > 10_000 {
            seen.clear();
        }
    }
}
