//! Configuration management for the copy-trading pipeline.
//!
//! Loads configuration from environment variables (via a `.env` file) and
//! provides validated, type-safe access to all service parameters. Follows
//! the helper-function idiom of the teacher's `brain/src/config.rs`: small
//! `get_env_*` readers with defaults, grouped sub-configs, and a single
//! `validate()` pass that `anyhow::bail!`s on the first violated invariant.

use anyhow::{Context, Result};
use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub risk: RiskConfig,
    pub execution: ExecutionConfig,
    pub breaker: CircuitBreakerConfig,
    pub confirmation: ConfirmationConfig,
    pub network: NetworkConfig,
    pub database: DatabaseConfig,
    pub notify: NotifyConfig,
    pub logging: LoggingConfig,
}

/// Buy/sell policy thresholds enforced by the Risk Engine (§4.6).
#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Fraction of the upstream trade size to mirror (0 < x <= 1).
    pub copy_ratio: f64,
    pub max_per_trade: Decimal,
    pub min_per_trade: Decimal,
    pub max_per_day: Decimal,
    pub max_open_positions: usize,
    pub cooldown_seconds: u64,
    /// Max fee as percent of trade size at full size (`s >= 0.5`).
    pub max_fee_pct: f64,
    pub min_reserve: Decimal,
    pub slippage_bps: u16,
    pub max_price_impact_bps: u32,
    /// 0 disables the drift guard.
    pub max_price_drift_pct: f64,
    pub block_if_mint_authority: bool,
    pub block_if_freeze_authority: bool,
    pub allow_unsafe_parse_trades: bool,
    pub disable_drift_guard_on_unsafe_parse: bool,
    pub restrict_intermediate_tokens: bool,
}

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub dry_run: bool,
    pub priority_fee_lamports: u64,
    pub base_tx_fee_lamports: u64,
    pub ata_creation_rent_lamports: u64,
    pub virtual_starting_balance: Decimal,
    pub compare_alert_pct: f64,
    /// Use RPC-simulated compute units (ACCURATE) instead of the fixed
    /// fee formula (ESTIMATE) when estimating fees in simulation mode.
    pub accurate_fee_estimate: bool,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub fail_rate_pct: f64,
    pub fail_window_minutes: u64,
    pub latency_p99_ms: u64,
    pub no_position_spike: usize,
    pub auto_reset_minutes: u64,
    pub window_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct ConfirmationConfig {
    pub pending_position_timeout_minutes: u64,
    pub allow_sell_on_sent_position: bool,
    pub sell_on_sent_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub webhook_bind_address: IpAddr,
    pub webhook_port: u16,
    pub webhook_rate_limit_per_min: u32,
    pub rpc_url: String,
    pub yellowstone_endpoint: String,
    pub yellowstone_token: Option<String>,
    pub aggregator_base_url: String,
    pub wallet_pubkey: String,
    pub poll_interval_secs: u64,
    pub poll_signature_limit: usize,
    pub subscription_health_check_secs: u64,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub sqlite_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub telegram_bot_token: String,
    pub telegram_chat_id: String,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_level: String,
    pub json: bool,
}

use rust_decimal::Decimal;

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenv::dotenv();

        Ok(Config {
            risk: RiskConfig {
                copy_ratio: get_env_f64("COPY_RATIO", 0.1)?,
                max_per_trade: get_env_decimal("MAX_PER_TRADE", "1.0")?,
                min_per_trade: get_env_decimal("MIN_PER_TRADE", "0.01")?,
                max_per_day: get_env_decimal("MAX_PER_DAY", "10.0")?,
                max_open_positions: get_env_usize("MAX_OPEN_POSITIONS", 10)?,
                cooldown_seconds: get_env_u64("COOLDOWN_SECONDS", 60)?,
                max_fee_pct: get_env_f64("MAX_FEE_PCT", 5.0)?,
                min_reserve: get_env_decimal("MIN_RESERVE", "0.05")?,
                slippage_bps: get_env_u16("SLIPPAGE_BPS", 100)?,
                max_price_impact_bps: get_env_u32("MAX_PRICE_IMPACT_BPS", 300)?,
                max_price_drift_pct: get_env_f64("MAX_PRICE_DRIFT_PCT", 20.0)?,
                block_if_mint_authority: get_env_bool("BLOCK_IF_MINT_AUTHORITY", false)?,
                block_if_freeze_authority: get_env_bool("BLOCK_IF_FREEZE_AUTHORITY", false)?,
                allow_unsafe_parse_trades: get_env_bool("ALLOW_UNSAFE_PARSE_TRADES", false)?,
                disable_drift_guard_on_unsafe_parse: get_env_bool(
                    "DISABLE_DRIFT_GUARD_ON_UNSAFE_PARSE",
                    false,
                )?,
                restrict_intermediate_tokens: get_env_bool("RESTRICT_INTERMEDIATE_TOKENS", true)?,
            },
            execution: ExecutionConfig {
                dry_run: get_env_bool("DRY_RUN", true)?,
                priority_fee_lamports: get_env_u64("PRIORITY_FEE_LAMPORTS", 10_000)?,
                base_tx_fee_lamports: get_env_u64("BASE_TX_FEE_LAMPORTS", 5_000)?,
                ata_creation_rent_lamports: get_env_u64("ATA_CREATION_RENT_LAMPORTS", 2_039_280)?,
                virtual_starting_balance: get_env_decimal("VIRTUAL_STARTING_BALANCE", "10.0")?,
                compare_alert_pct: get_env_f64("COMPARE_ALERT_PCT", 5.0)?,
                accurate_fee_estimate: get_env_bool("ACCURATE_FEE_ESTIMATE", false)?,
            },
            breaker: CircuitBreakerConfig {
                fail_rate_pct: get_env_f64("CB_FAIL_RATE_PCT", 50.0)?,
                fail_window_minutes: get_env_u64("CB_FAIL_WINDOW_MINUTES", 10)?,
                latency_p99_ms: get_env_u64("CB_LATENCY_P99_MS", 8_000)?,
                no_position_spike: get_env_usize("CB_NO_POSITION_SPIKE", 5)?,
                auto_reset_minutes: get_env_u64("CB_AUTO_RESET_MINUTES", 30)?,
                window_capacity: get_env_usize("CB_WINDOW_CAPACITY", 200)?,
            },
            confirmation: ConfirmationConfig {
                pending_position_timeout_minutes: get_env_u64(
                    "PENDING_POSITION_TIMEOUT_MINUTES",
                    5,
                )?,
                allow_sell_on_sent_position: get_env_bool("ALLOW_SELL_ON_SENT_POSITION", false)?,
                sell_on_sent_timeout_seconds: get_env_u64("SELL_ON_SENT_TIMEOUT_SECONDS", 10)?,
            },
            network: NetworkConfig {
                webhook_bind_address: IpAddr::from_str(&get_env_string(
                    "WEBHOOK_BIND_ADDRESS",
                    "0.0.0.0",
                )?)
                .context("Invalid WEBHOOK_BIND_ADDRESS")?,
                webhook_port: get_env_u16("WEBHOOK_PORT", 8787)?,
                webhook_rate_limit_per_min: get_env_u32("WEBHOOK_RATE_LIMIT_PER_MIN", 120)?,
                rpc_url: get_env_string("RPC_URL", "https://api.mainnet-beta.solana.com")?,
                yellowstone_endpoint: get_env_string(
                    "YELLOWSTONE_ENDPOINT",
                    "http://127.0.0.1:10000",
                )?,
                yellowstone_token: env::var("YELLOWSTONE_TOKEN").ok(),
                aggregator_base_url: get_env_string(
                    "AGGREGATOR_BASE_URL",
                    "https://quote-api.jup.ag/v6",
                )?,
                wallet_pubkey: get_env_string("WALLET_PUBKEY", "")?,
                poll_interval_secs: get_env_u64("POLL_INTERVAL_SECS", 5)?,
                poll_signature_limit: get_env_usize("POLL_SIGNATURE_LIMIT", 20)?,
                subscription_health_check_secs: get_env_u64(
                    "SUBSCRIPTION_HEALTH_CHECK_SECS",
                    30,
                )?,
            },
            database: DatabaseConfig {
                sqlite_path: PathBuf::from(get_env_string(
                    "SQLITE_PATH",
                    "./data/swapmirror.db",
                )?),
            },
            notify: NotifyConfig {
                telegram_bot_token: get_env_string("TELEGRAM_BOT_TOKEN", "")?,
                telegram_chat_id: get_env_string("TELEGRAM_CHAT_ID", "")?,
            },
            logging: LoggingConfig {
                log_level: get_env_string("LOG_LEVEL", "info")?,
                json: get_env_bool("LOG_JSON", false)?,
            },
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.risk.copy_ratio <= 0.0 || self.risk.copy_ratio > 1.0 {
            anyhow::bail!("COPY_RATIO must be in (0, 1]");
        }
        if self.risk.min_per_trade > self.risk.max_per_trade {
            anyhow::bail!("MIN_PER_TRADE cannot exceed MAX_PER_TRADE");
        }
        if self.risk.max_open_positions == 0 {
            anyhow::bail!("MAX_OPEN_POSITIONS must be > 0");
        }
        if self.risk.slippage_bps == 0 || self.risk.slippage_bps > 5000 {
            anyhow::bail!("SLIPPAGE_BPS must be between 1 and 5000");
        }
        if self.risk.max_price_drift_pct < 0.0 {
            anyhow::bail!("MAX_PRICE_DRIFT_PCT must be >= 0 (0 disables the guard)");
        }
        if self.execution.compare_alert_pct < 0.0 {
            anyhow::bail!("COMPARE_ALERT_PCT must be >= 0");
        }
        if self.breaker.fail_rate_pct < 0.0 || self.breaker.fail_rate_pct > 100.0 {
            anyhow::bail!("CB_FAIL_RATE_PCT must be between 0 and 100");
        }
        if self.network.webhook_port == 0 {
            anyhow::bail!("WEBHOOK_PORT must be > 0");
        }
        if self.network.wallet_pubkey.is_empty() {
            anyhow::bail!("WALLET_PUBKEY must be set");
        }
        if self.network.rpc_url.is_empty() {
            anyhow::bail!("RPC_URL must be set");
        }
        if self.network.aggregator_base_url.is_empty() {
            anyhow::bail!("AGGREGATOR_BASE_URL must be set");
        }
        if self.notify.telegram_bot_token.is_empty() {
            tracing::warn!("TELEGRAM_BOT_TOKEN is empty - notifications will be disabled");
        }
        if self.notify.telegram_chat_id.is_empty() {
            tracing::warn!("TELEGRAM_CHAT_ID is empty - notifications will be disabled");
        }
        Ok(())
    }
}

fn get_env_string(key: &str, default: &str) -> Result<String> {
    Ok(env::var(key).unwrap_or_else(|_| default.to_string()))
}

fn get_env_bool(key: &str, default: bool) -> Result<bool> {
    match env::var(key) {
        Ok(v) => v
            .parse::<bool>()
            .with_context(|| format!("Invalid {} value", key)),
        Err(_) => Ok(default),
    }
}

fn get_env_u16(key: &str, default: u16) -> Result<u16> {
    env::var(key)
        .ok()
        .map(|s| s.parse::<u16>())
        .transpose()
        .with_context(|| format!("Invalid {} value", key))
        .map(|v| v.unwrap_or(default))
}

fn get_env_u32(key: &str, default: u32) -> Result<u32> {
    env::var(key)
        .ok()
        .map(|s| s.parse::<u32>())
        .transpose()
        .with_context(|| format!("Invalid {} value", key))
        .map(|v| v.unwrap_or(default))
}

fn get_env_u64(key: &str, default: u64) -> Result<u64> {
    env::var(key)
        .ok()
        .map(|s| s.parse::<u64>())
        .transpose()
        .with_context(|| format!("Invalid {} value", key))
        .map(|v| v.unwrap_or(default))
}

fn get_env_usize(key: &str, default: usize) -> Result<usize> {
    env::var(key)
        .ok()
        .map(|s| s.parse::<usize>())
        .transpose()
        .with_context(|| format!("Invalid {} value", key))
        .map(|v| v.unwrap_or(default))
}

fn get_env_f64(key: &str, default: f64) -> Result<f64> {
    env::var(key)
        .ok()
        .map(|s| s.parse::<f64>())
        .transpose()
        .with_context(|| format!("Invalid {} value", key))
        .map(|v| v.unwrap_or(default))
}

fn get_env_decimal(key: &str, default: &str) -> Result<Decimal> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    Decimal::from_str(&raw).with_context(|| format!("Invalid {} value", key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        std::env::set_var("WALLET_PUBKEY", "11111111111111111111111111111111");
        Config::from_env().expect("config should load with defaults")
    }

    #[test]
    fn validates_with_sane_defaults() {
        let config = base_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_copy_ratio_out_of_range() {
        let mut config = base_config();
        config.risk.copy_ratio = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_trade_bounds() {
        let mut config = base_config();
        config.risk.min_per_trade = Decimal::from_str("5.0").unwrap();
        config.risk.max_per_trade = Decimal::from_str("1.0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_missing_wallet_pubkey() {
        let mut config = base_config();
        config.network.wallet_pubkey.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_drift_is_allowed_but_negative_is_not() {
        let mut config = base_config();
        config.risk.max_price_drift_pct = 0.0;
        assert!(config.validate().is_ok());
        config.risk.max_price_drift_pct = -1.0;
        assert!(config.validate().is_err());
    }
}
