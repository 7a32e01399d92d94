//! Service entry point: loads and validates configuration, opens the store,
//! wires every module into the pipeline, and spawns the three ingestion
//! sources plus the scheduler (spec.md §D, startup sequence).
//!
//! Grounded on `brain/src/main.rs`'s startup shape (init logging, load
//! config, open the database, spawn independent tasks, then block forever)
//! with `tracing`/`tracing-subscriber` in place of the teacher's `log`/
//! `env_logger` pair, matching the rest of this crate's ambient stack.

use anyhow::{Context, Result};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use swapmirror::aggregator::HttpAggregatorClient;
use swapmirror::chain::RpcChainClient;
use swapmirror::circuit_breaker::CircuitBreaker;
use swapmirror::config::Config;
use swapmirror::notify::{NullNotifier, TelegramNotifier};
use swapmirror::pending_registry::PendingBuyRegistry;
use swapmirror::pipeline::Pipeline;
use swapmirror::scheduler;
use swapmirror::sources::{poll, subscription, webhook};
use swapmirror::store::Store;

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = run().await {
        error!(error = ?e, "fatal startup error");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    init_tracing(&config.logging);

    if let Err(e) = config.validate() {
        error!(error = %e, "configuration failed validation");
        std::process::exit(1);
    }
    info!("configuration loaded and validated");

    let config = Arc::new(config);
    let store = Arc::new(Store::open(&config.database.sqlite_path).context("failed to open store")?);
    let breaker = Arc::new(CircuitBreaker::new(config.breaker.clone()));
    let aggregator: Arc<dyn swapmirror::aggregator::AggregatorClient> =
        Arc::new(HttpAggregatorClient::new(config.network.aggregator_base_url.clone()));
    let chain: Arc<dyn swapmirror::chain::ChainClient> =
        Arc::new(RpcChainClient::new(config.network.rpc_url.clone()));
    let pending = Arc::new(PendingBuyRegistry::new());
    let paused = Arc::new(AtomicBool::new(false));

    let notifier: Arc<dyn swapmirror::notify::Notifier> =
        if config.notify.telegram_bot_token.is_empty() || config.notify.telegram_chat_id.is_empty() {
            Arc::new(NullNotifier)
        } else {
            Arc::new(TelegramNotifier::new(
                config.notify.telegram_bot_token.clone(),
                config.notify.telegram_chat_id.clone(),
            ))
        };

    let pipeline = Arc::new(Pipeline::spawn(
        config.clone(),
        store.clone(),
        breaker.clone(),
        aggregator.clone(),
        chain.clone(),
        notifier.clone(),
        pending.clone(),
        paused.clone(),
    ));

    scheduler::spawn_all(config.clone(), store.clone(), notifier.clone());

    let webhook_network = config.network.clone();
    let webhook_chain = chain.clone();
    let webhook_pipeline = pipeline.clone();
    let webhook_pending = pending.clone();
    tokio::spawn(async move {
        if let Err(e) = webhook::serve(&webhook_network, webhook_chain, webhook_pipeline, webhook_pending).await {
            error!(error = %e, "webhook server exited");
        }
    });

    tokio::spawn(subscription::run(config.network.clone(), chain.clone(), pipeline.clone(), pending.clone()));
    tokio::spawn(poll::run(config.network.clone(), chain.clone(), pipeline.clone(), pending.clone()));

    info!("swapmirror pipeline running");
    std::future::pending::<()>().await;
    Ok(())
}

fn init_tracing(logging: &swapmirror::config::LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
