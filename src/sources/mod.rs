//! C3 Ingestion Sources: the three independent feeds of raw upstream
//! transactions, each normalized into a [`SwapDescriptor`] via [`crate::parser`]
//! and handed to the pipeline. Redundant by design (spec.md §4.3) — the same
//! signature can arrive from more than one source; [`crate::store::Store::
//! try_mark_processed`] is what actually deduplicates.

pub mod poll;
pub mod subscription;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::chain::ChainClient;
use crate::model::{Direction, RawTransaction, SourceTag};
use crate::parser::parse_swap;
use crate::pending_registry::PendingBuyRegistry;
use crate::pipeline::Pipeline;

/// Upper bound on how long a SELL waits for its own token's BUY to clear
/// [`PendingBuyRegistry`] before giving up and entering the pipeline anyway
/// (spec.md §4.4/§5).
const SELL_BUFFER_POLL_MS: u64 = 500;
const SELL_BUFFER_MAX_MS: u64 = 4_000;

/// Shared fan-in point: fetches a balance snapshot when the structured event
/// path can't resolve the swap on its own, parses, and submits to the
/// pipeline. Used by all three sources so the priority cascade and the RPC
/// round trip for path 2 live in exactly one place.
///
/// BUY registration in [`PendingBuyRegistry`] and the SELL-before-BUY buffer
/// both happen here, in the producer, rather than inside the pipeline's
/// single-writer section (spec.md §4.3/§4.4/§9) — a BUY must be visible to a
/// racing SELL as soon as it is parsed, and the SELL's wait must not stall
/// the one FIFO worker that every other item is also waiting on.
pub async fn ingest(
    mut raw: RawTransaction,
    source: SourceTag,
    chain: &Arc<dyn ChainClient>,
    wallet: &str,
    pipeline: &Pipeline,
    pending: &Arc<PendingBuyRegistry>,
) {
    if raw.events.as_ref().and_then(|e| e.swap.as_ref()).is_none() {
        if let Ok(snapshot) = chain.get_balance_snapshot(&raw.signature, wallet).await {
            raw.balances = snapshot;
        }
    }

    let descriptor = match parse_swap(&raw, source) {
        Some(descriptor) => descriptor,
        None => {
            debug!(signature = %raw.signature, "raw transaction was not a swap");
            return;
        }
    };

    let (sell_buffered, sell_buffer_ms) = match descriptor.direction {
        Direction::Buy => {
            pending.mark_pending(&descriptor.token);
            (false, 0)
        }
        Direction::Sell if pending.is_pending(&descriptor.token) => {
            let mut waited = 0u64;
            while pending.is_pending(&descriptor.token) && waited < SELL_BUFFER_MAX_MS {
                tokio::time::sleep(Duration::from_millis(SELL_BUFFER_POLL_MS)).await;
                waited += SELL_BUFFER_POLL_MS;
            }
            (true, waited)
        }
        Direction::Sell => (false, 0),
    };

    pipeline.submit(descriptor, sell_buffered, sell_buffer_ms).await;
}
