//! Outbound notifications for trade outcomes (spec.md §G). Kept behind a
//! small trait rather than the teacher's concrete `TelegramClient` since the
//! content scope here is just three events (trade, failure, emergency exit)
//! instead of the teacher's full strategy-annotated message set.
//!
//! Grounded on `brain/src/telegram.rs` (rate-limited `reqwest` client, one
//! `send_message` primitive, typed `notify_*` wrappers around it).

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

use crate::executor::ExecutionResult;
use crate::model::SwapDescriptor;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_trade(&self, descriptor: &SwapDescriptor, result: &ExecutionResult);
    async fn notify_failure(&self, descriptor: &SwapDescriptor, reason: &str);
    async fn notify_emergency_exit(&self, token: &str, reason: &str);
    /// Quoted-vs-real fill deviation from the executor's post-send comparison
    /// task exceeded the configured alert threshold (spec.md §4.7).
    async fn notify_slippage_alert(&self, token: &str, signature: &str, slippage_pct: f64);
}

/// No-op implementation used when Telegram credentials are unset
/// (`Config::validate` only warns, it doesn't refuse to start).
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify_trade(&self, _descriptor: &SwapDescriptor, _result: &ExecutionResult) {}
    async fn notify_failure(&self, _descriptor: &SwapDescriptor, _reason: &str) {}
    async fn notify_emergency_exit(&self, _token: &str, _reason: &str) {}
    async fn notify_slippage_alert(&self, _token: &str, _signature: &str, _slippage_pct: f64) {}
}

pub struct TelegramNotifier {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
    last_message_time: Arc<Mutex<Instant>>,
    min_message_delay_ms: u64,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("failed to build telegram http client"),
            bot_token,
            chat_id,
            last_message_time: Arc::new(Mutex::new(Instant::now())),
            min_message_delay_ms: 100,
        }
    }

    async fn send_message(&self, text: &str) {
        {
            let mut last = self.last_message_time.lock().await;
            let elapsed = last.elapsed();
            if elapsed.as_millis() < self.min_message_delay_ms as u128 {
                tokio::time::sleep(Duration::from_millis(self.min_message_delay_ms) - elapsed).await;
            }
            *last = Instant::now();
        }

        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let payload = json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML",
        });

        match self.client.post(&url).json(&payload).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!(status = %response.status(), "telegram API returned an error status");
            }
            Err(e) => warn!(error = %e, "failed to send telegram notification"),
            _ => {}
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify_trade(&self, descriptor: &SwapDescriptor, result: &ExecutionResult) {
        let mode = if result.simulated { "SIM" } else { "LIVE" };
        let message = format!(
            "{} <b>{} {}</b>\n\nToken: <code>{}</code>\nSize: {} base\nFee: {} lamports\nSignature: <code>{}</code>",
            if descriptor.direction.as_str() == "BUY" { "🟢" } else { "💰" },
            mode,
            descriptor.direction.as_str(),
            descriptor.token,
            result.base_amount,
            result.fee_lamports,
            result.signature,
        );
        self.send_message(&message).await;
    }

    async fn notify_failure(&self, descriptor: &SwapDescriptor, reason: &str) {
        let message = format!(
            "❌ <b>{} FAILED</b>\n\nToken: <code>{}</code>\nReason: {}",
            descriptor.direction.as_str(),
            descriptor.token,
            reason,
        );
        self.send_message(&message).await;
    }

    async fn notify_emergency_exit(&self, token: &str, reason: &str) {
        let message = format!(
            "🚨 <b>EMERGENCY EXIT</b>\n\nToken: <code>{}</code>\nReason: {}",
            token, reason,
        );
        self.send_message(&message).await;
    }

    async fn notify_slippage_alert(&self, token: &str, signature: &str, slippage_pct: f64) {
        let message = format!(
            "⚠️ <b>SLIPPAGE ALERT</b>\n\nToken: <code>{}</code>\nSignature: <code>{}</code>\nSlippage: {:.2}%",
            token, signature, slippage_pct,
        );
        self.send_message(&message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Direction, SourceTag};
    use num_bigint::BigInt;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn null_notifier_does_not_panic() {
        let notifier = NullNotifier;
        let descriptor = SwapDescriptor {
            signature: "sig".into(),
            direction: Direction::Buy,
            token: "TOKEN".into(),
            upstream_amount: Decimal::ONE,
            raw_token_amount: BigInt::from(1u64),
            token_decimals: 6,
            source: SourceTag::Webhook,
            unsafe_parse: false,
        };
        let result = ExecutionResult {
            signature: "SIM-1".into(),
            base_amount: Decimal::ONE,
            token_raw_amount: BigInt::from(500_000u64),
            simulated: true,
            fee_lamports: 0,
        };
        notifier.notify_trade(&descriptor, &result).await;
        notifier.notify_failure(&descriptor, "test").await;
        notifier.notify_emergency_exit("TOKEN", "test").await;
        notifier.notify_slippage_alert("TOKEN", "sig", 6.5).await;
    }
}
