//! C9 Circuit Breaker: trips the pipeline into a paused state when recent
//! outcomes look unhealthy, and stays tripped until an explicit or timed
//! reset (spec.md §4.9 — monotonic: nothing but reset closes it).
//!
//! Grounded on `brain/src/decision_engine/guardrails.rs`'s loss-backoff
//! window (`VecDeque` of timestamped outcomes, pruned to a rolling window,
//! threshold-triggered pause) generalized from a fixed loss-count trigger to
//! the three independent triggers of spec.md §4.9: fail-rate, no-position
//! spike, and P99 latency.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

use crate::config::CircuitBreakerConfig;
use crate::model::TradeOutcome;

#[derive(Debug, Clone, Copy)]
struct Sample {
    outcome: TradeOutcome,
    /// Rejected specifically for `RejectReason::NoPosition` (spec.md §4.9:
    /// the no-position-spike trigger counts this reason, not any rejection).
    is_no_position: bool,
    latency_ms: u64,
    timestamp: i64,
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    window: Mutex<VecDeque<Sample>>,
    open_since: Mutex<Option<i64>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            window: Mutex::new(VecDeque::new()),
            open_since: Mutex::new(None),
        }
    }

    pub fn is_open(&self) -> bool {
        if let Some(opened_at) = *self.open_since.lock().unwrap() {
            let elapsed = now() - opened_at;
            if elapsed >= (self.config.auto_reset_minutes as i64) * 60 {
                *self.open_since.lock().unwrap() = None;
                warn!("circuit breaker auto-reset after {}m", self.config.auto_reset_minutes);
                return false;
            }
            true
        } else {
            false
        }
    }

    /// Feed one outcome into the sliding window and re-evaluate the trip
    /// conditions. Call after every pipeline execution (copy or reject).
    /// `no_position` flags a reject whose reason was `NoPosition`.
    pub fn record(&self, outcome: TradeOutcome, latency_ms: u64, no_position: bool) {
        let sample = Sample { outcome, is_no_position: no_position, latency_ms, timestamp: now() };
        let mut window = self.window.lock().unwrap();
        window.push_back(sample);
        while window.len() > self.config.window_capacity {
            window.pop_front();
        }
        let cutoff = now() - (self.config.fail_window_minutes as i64) * 60;
        window.retain(|s| s.timestamp >= cutoff);
        drop(window);

        self.evaluate();
    }

    /// Explicit reset, e.g. an operator command.
    pub fn reset(&self) {
        *self.open_since.lock().unwrap() = None;
        self.window.lock().unwrap().clear();
    }

    fn evaluate(&self) {
        if self.is_open() {
            return;
        }
        let window = self.window.lock().unwrap();
        if window.len() < 3 {
            return;
        }

        let total = window.len();
        let fails = window.iter().filter(|s| s.outcome == TradeOutcome::Failed).count();
        let fail_rate = (fails as f64 / total as f64) * 100.0;
        if fail_rate >= self.config.fail_rate_pct {
            drop(window);
            self.trip(format!("fail-rate {:.1}% over {} samples", fail_rate, total));
            return;
        }

        let no_position_count = window.iter().filter(|s| s.is_no_position).count();
        if no_position_count >= self.config.no_position_spike {
            drop(window);
            self.trip(format!("{} no-position rejections over {} samples", no_position_count, total));
            return;
        }

        // spec.md §4.9: P99 is computed over COPIED trades only and needs
        // >=5 COPIED samples, not 5 samples of any outcome — a burst of
        // REJECTED/FAILED rows (near-zero latency) would otherwise dilute
        // a real latency spike into invisibility.
        let mut copied_latencies: Vec<u64> =
            window.iter().filter(|s| s.outcome == TradeOutcome::Copied).map(|s| s.latency_ms).collect();
        if copied_latencies.len() >= 5 {
            copied_latencies.sort_unstable();
            let p99_idx = ((copied_latencies.len() as f64) * 0.99).ceil() as usize;
            let p99 = copied_latencies[p99_idx.saturating_sub(1).min(copied_latencies.len() - 1)];
            if p99 >= self.config.latency_p99_ms {
                drop(window);
                self.trip(format!("P99 latency {}ms over {} COPIED samples", p99, copied_latencies.len()));
            }
        }
    }

    fn trip(&self, reason: String) {
        let mut open_since = self.open_since.lock().unwrap();
        if open_since.is_none() {
            *open_since = Some(now());
            warn!(reason = %reason, "circuit breaker tripped");
        }
    }
}

fn now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            fail_rate_pct: 50.0,
            fail_window_minutes: 60,
            latency_p99_ms: 5_000,
            no_position_spike: 3,
            auto_reset_minutes: 30,
            window_capacity: 50,
        }
    }

    #[test]
    fn trips_on_fail_rate() {
        let breaker = CircuitBreaker::new(test_config());
        breaker.record(TradeOutcome::Copied, 100, false);
        breaker.record(TradeOutcome::Failed, 100, false);
        breaker.record(TradeOutcome::Failed, 100, false);
        assert!(breaker.is_open());
    }

    #[test]
    fn trips_on_no_position_spike() {
        let breaker = CircuitBreaker::new(test_config());
        breaker.record(TradeOutcome::Rejected, 100, true);
        breaker.record(TradeOutcome::Rejected, 100, true);
        breaker.record(TradeOutcome::Rejected, 100, true);
        assert!(breaker.is_open());
    }

    #[test]
    fn no_position_count_is_window_wide_not_a_trailing_streak() {
        let breaker = CircuitBreaker::new(test_config());
        breaker.record(TradeOutcome::Rejected, 100, true);
        breaker.record(TradeOutcome::Rejected, 100, true);
        // Interrupt the streak with a copy, then resume: a trailing-streak
        // count would reset to 1 here, but the window-wide count is 3.
        breaker.record(TradeOutcome::Copied, 100, false);
        breaker.record(TradeOutcome::Rejected, 100, true);
        assert!(breaker.is_open());
    }

    #[test]
    fn stays_closed_under_threshold() {
        let breaker = CircuitBreaker::new(test_config());
        breaker.record(TradeOutcome::Copied, 100, false);
        breaker.record(TradeOutcome::Copied, 100, false);
        breaker.record(TradeOutcome::Failed, 100, false);
        assert!(!breaker.is_open());
    }

    #[test]
    fn explicit_reset_closes_breaker() {
        let breaker = CircuitBreaker::new(test_config());
        breaker.record(TradeOutcome::Failed, 100, false);
        breaker.record(TradeOutcome::Failed, 100, false);
        breaker.record(TradeOutcome::Failed, 100, false);
        assert!(breaker.is_open());
        breaker.reset();
        assert!(!breaker.is_open());
    }
}
