//! Webhook ingestion source: push delivery from the transaction-enrichment
//! provider at `POST /webhook/:source`, acknowledged with `200` immediately
//! and processed sequentially in the background (spec.md §4.3, path A).
//!
//! Grounded on the teacher's axum usage pattern elsewhere in the pack
//! (shared `Arc<State>` extractor, `tower-http` tracing layer) — the
//! teacher itself has no HTTP listener, so the server skeleton is adapted
//! from `other_examples/` axum usage instead.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::chain::ChainClient;
use crate::config::NetworkConfig;
use crate::model::{RawTransaction, SourceTag};
use crate::pending_registry::PendingBuyRegistry;
use crate::pipeline::Pipeline;

/// Accepts either a single transaction object or a batch array in the same
/// request body (spec.md §6: "body is a JSON array, or a single object").
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

#[derive(Serialize)]
struct WebhookAck {
    ok: bool,
}

struct WebhookState {
    chain: Arc<dyn ChainClient>,
    wallet: String,
    pipeline: Arc<Pipeline>,
    pending: Arc<PendingBuyRegistry>,
    rate_limiter: RateLimiter,
}

/// Fixed-window rate limiter: resets its counter once per minute rather than
/// tracking a sliding window, since the webhook only needs a coarse abuse
/// guard (spec.md §4.3: "reject above N/min with 429").
struct RateLimiter {
    limit_per_min: u32,
    count: AtomicU32,
    window_start: Mutex<Instant>,
}

impl RateLimiter {
    fn new(limit_per_min: u32) -> Self {
        Self { limit_per_min, count: AtomicU32::new(0), window_start: Mutex::new(Instant::now()) }
    }

    async fn allow(&self) -> bool {
        {
            let mut window_start = self.window_start.lock().await;
            if window_start.elapsed() >= Duration::from_secs(60) {
                *window_start = Instant::now();
                self.count.store(0, Ordering::SeqCst);
            }
        }
        self.count.fetch_add(1, Ordering::SeqCst) < self.limit_per_min
    }
}

pub async fn serve(
    network: &NetworkConfig,
    chain: Arc<dyn ChainClient>,
    pipeline: Arc<Pipeline>,
    pending: Arc<PendingBuyRegistry>,
) -> anyhow::Result<()> {
    let state = Arc::new(WebhookState {
        chain,
        wallet: network.wallet_pubkey.clone(),
        pipeline,
        pending,
        rate_limiter: RateLimiter::new(network.webhook_rate_limit_per_min),
    });

    let app = Router::new()
        .route("/webhook/:source", post(handle_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::new(network.webhook_bind_address, network.webhook_port);
    info!(%addr, "webhook server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn handle_webhook(
    State(state): State<Arc<WebhookState>>,
    Path(source): Path<String>,
    Json(body): Json<OneOrMany<RawTransaction>>,
) -> (StatusCode, Json<WebhookAck>) {
    if !state.rate_limiter.allow().await {
        warn!("webhook rate limit exceeded, rejecting batch");
        return (StatusCode::TOO_MANY_REQUESTS, Json(WebhookAck { ok: false }));
    }

    let tag = SourceTag::from_path_segment(&source);
    let chain = state.chain.clone();
    let wallet = state.wallet.clone();
    let pipeline = state.pipeline.clone();
    let pending = state.pending.clone();
    let payloads = body.into_vec();

    // Acknowledge immediately; the pipeline's single worker processes each
    // item in submission order regardless of how fast this task runs.
    tokio::spawn(async move {
        for raw in payloads {
            super::ingest(raw, tag, &chain, &wallet, &pipeline, &pending).await;
        }
    });

    (StatusCode::OK, Json(WebhookAck { ok: true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_limiter_allows_up_to_the_configured_limit() {
        let limiter = RateLimiter::new(3);
        assert!(limiter.allow().await);
        assert!(limiter.allow().await);
        assert!(limiter.allow().await);
        assert!(!limiter.allow().await);
    }
}
