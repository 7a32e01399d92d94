//! C1 Store: durable, keyed state behind a pooled SQLite connection.
//!
//! Grounded on `data-mining/src/db/mod.rs` (an `execute_batch` schema, typed
//! row-mapping helpers, a thin wrapper struct around the connection) but
//! pooled with `r2d2`/`r2d2_sqlite` instead of a bare `Connection` because
//! every pipeline stage (webhook handler, subscription task, poll task,
//! scheduler) needs its own connection out of the same database rather than
//! a single `&mut Connection` passed around.

use anyhow::{Context, Result};
use chrono::Utc;
use num_bigint::BigInt;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::model::{
    Direction, PipelineMetric, Position, PositionStatus, SourceTag, TradeOutcome,
};

pub type Pooled = r2d2::PooledConnection<SqliteConnectionManager>;

#[derive(Clone)]
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).context("failed to create database directory")?;
        }

        let manager = SqliteConnectionManager::file(path.as_ref()).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        });
        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .context("failed to build sqlite connection pool")?;

        let store = Store { pool };
        store.migrate()?;
        info!("store initialized");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .context("failed to build in-memory sqlite pool")?;
        let store = Store { pool };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> Result<Pooled, StoreError> {
        Ok(self.pool.get()?)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS processed_signatures (
                signature TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                processed_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS positions (
                token TEXT PRIMARY KEY,
                raw_balance TEXT NOT NULL,
                token_decimals INTEGER NOT NULL,
                status TEXT NOT NULL,
                last_update INTEGER NOT NULL,
                pending_delta TEXT
            );

            CREATE TABLE IF NOT EXISTS daily_budget (
                day TEXT PRIMARY KEY,
                spent TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cooldowns (
                token TEXT PRIMARY KEY,
                until INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS trade_pipeline_metrics (
                signature TEXT PRIMARY KEY,
                direction TEXT NOT NULL,
                token TEXT NOT NULL,
                source TEXT NOT NULL,
                outcome TEXT NOT NULL,
                reject_reason TEXT,
                sell_buffered INTEGER NOT NULL DEFAULT 0,
                sell_buffer_ms INTEGER NOT NULL DEFAULT 0,
                confirm_wait_ms INTEGER NOT NULL DEFAULT 0,
                latency_risk_ms INTEGER NOT NULL DEFAULT 0,
                latency_exec_ms INTEGER NOT NULL DEFAULT 0,
                latency_total_ms INTEGER NOT NULL DEFAULT 0,
                price_drift_pct REAL,
                unsafe_parse INTEGER NOT NULL DEFAULT 0,
                recorded_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_metrics_recorded_at ON trade_pipeline_metrics(recorded_at);
            CREATE INDEX IF NOT EXISTS idx_metrics_outcome ON trade_pipeline_metrics(outcome, recorded_at);

            CREATE TABLE IF NOT EXISTS virtual_ledger (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                starting_balance TEXT NOT NULL,
                cash TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS virtual_token_ledger (
                token TEXT PRIMARY KEY,
                spent TEXT NOT NULL,
                received TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS virtual_trade_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                token TEXT NOT NULL,
                direction TEXT NOT NULL,
                base_amount TEXT NOT NULL,
                recorded_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS source_trades (
                signature TEXT PRIMARY KEY,
                direction TEXT NOT NULL,
                token TEXT NOT NULL,
                source TEXT NOT NULL,
                upstream_amount TEXT NOT NULL,
                raw_token_amount TEXT NOT NULL,
                token_decimals INTEGER NOT NULL,
                unsafe_parse INTEGER NOT NULL,
                recorded_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS pnl_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                open_positions INTEGER NOT NULL,
                spent_today TEXT NOT NULL,
                virtual_cash TEXT,
                recorded_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS execution_comparisons (
                signature TEXT PRIMARY KEY,
                token TEXT NOT NULL,
                direction TEXT NOT NULL,
                quoted_base_amount TEXT NOT NULL,
                quoted_token_raw_amount TEXT NOT NULL,
                real_base_amount TEXT,
                real_token_raw_amount TEXT,
                fee_lamports INTEGER NOT NULL,
                compute_units INTEGER,
                slippage_pct REAL,
                recorded_at INTEGER NOT NULL
            );
            "#,
        )
        .context("failed to run store migrations")?;
        Ok(())
    }

    // -- idempotency ledger (C1 / C3) ------------------------------------

    /// Inserts `signature` into the processed ledger if absent. Returns
    /// `true` when this call performed the insert (first-seen), `false` if
    /// the signature was already recorded (a duplicate from a redundant
    /// source).
    pub fn try_mark_processed(&self, signature: &str, source: SourceTag) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let now = Utc::now().timestamp();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO processed_signatures (signature, source, processed_at) VALUES (?1, ?2, ?3)",
            params![signature, source.as_str(), now],
        )?;
        Ok(changed == 1)
    }

    pub fn is_processed(&self, signature: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let exists: bool = conn
            .query_row(
                "SELECT 1 FROM processed_signatures WHERE signature = ?1",
                params![signature],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        Ok(exists)
    }

    /// Bounded prune of the idempotency ledger older than `cutoff` (unix
    /// seconds), run by the scheduler's periodic cleanup task (spec.md §3:
    /// the ledger is "periodically pruned by age, default 48h").
    pub fn prune_processed_signatures_before(&self, cutoff: i64) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM processed_signatures WHERE processed_at < ?1",
            params![cutoff],
        )?;
        Ok(removed)
    }

    // -- positions (C8) ---------------------------------------------------

    pub fn get_position(&self, token: &str) -> Result<Option<Position>, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT token, raw_balance, token_decimals, status, last_update, pending_delta FROM positions WHERE token = ?1",
            params![token],
            |row| row_to_position(row),
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn list_open_positions(&self) -> Result<Vec<Position>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT token, raw_balance, token_decimals, status, last_update, pending_delta FROM positions")?;
        let rows = stmt.query_map([], row_to_position)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn open_position_count(&self) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM positions", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn upsert_position(&self, position: &Position) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO positions (token, raw_balance, token_decimals, status, last_update, pending_delta)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(token) DO UPDATE SET
                raw_balance = excluded.raw_balance,
                token_decimals = excluded.token_decimals,
                status = excluded.status,
                last_update = excluded.last_update,
                pending_delta = excluded.pending_delta
            "#,
            params![
                position.token,
                position.raw_balance.to_string(),
                position.token_decimals,
                position.status.as_str(),
                position.last_update,
                position.pending_delta.as_ref().map(|d| d.to_string()),
            ],
        )?;
        debug!(token = %position.token, status = %position.status.as_str(), "position upserted");
        Ok(())
    }

    pub fn delete_position(&self, token: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM positions WHERE token = ?1", params![token])?;
        Ok(())
    }

    /// Positions stuck in `SENT` past `cutoff` (unix seconds), for the
    /// stale-pending reaper (spec.md §4.8).
    pub fn list_stale_sent(&self, cutoff: i64) -> Result<Vec<Position>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT token, raw_balance, token_decimals, status, last_update, pending_delta FROM positions WHERE status = 'SENT' AND last_update < ?1",
        )?;
        let rows = stmt.query_map(params![cutoff], row_to_position)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    // -- daily budget (C6) -------------------------------------------------

    fn today_key() -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }

    pub fn spent_today(&self) -> Result<Decimal, StoreError> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT spent FROM daily_budget WHERE day = ?1",
                params![Self::today_key()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw
            .and_then(|s| Decimal::from_str(&s).ok())
            .unwrap_or(Decimal::ZERO))
    }

    /// Atomically adds `amount` to today's spend and returns the new total.
    pub fn add_spent_today(&self, amount: Decimal) -> Result<Decimal, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let day = Self::today_key();
        let current: Option<String> = tx
            .query_row(
                "SELECT spent FROM daily_budget WHERE day = ?1",
                params![day],
                |row| row.get(0),
            )
            .optional()?;
        let current = current
            .and_then(|s| Decimal::from_str(&s).ok())
            .unwrap_or(Decimal::ZERO);
        let updated = current + amount;
        tx.execute(
            "INSERT INTO daily_budget (day, spent) VALUES (?1, ?2) ON CONFLICT(day) DO UPDATE SET spent = excluded.spent",
            params![day, updated.to_string()],
        )?;
        tx.commit()?;
        Ok(updated)
    }

    // -- cooldowns (C6) -----------------------------------------------------

    pub fn cooldown_until(&self, token: &str) -> Result<Option<i64>, StoreError> {
        let conn = self.conn()?;
        let until: Option<i64> = conn
            .query_row(
                "SELECT until FROM cooldowns WHERE token = ?1",
                params![token],
                |row| row.get(0),
            )
            .optional()?;
        Ok(until)
    }

    pub fn set_cooldown(&self, token: &str, until: i64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO cooldowns (token, until) VALUES (?1, ?2) ON CONFLICT(token) DO UPDATE SET until = excluded.until",
            params![token, until],
        )?;
        Ok(())
    }

    // -- pipeline metrics (C1 / C9) ------------------------------------------

    pub fn record_metric(&self, metric: &PipelineMetric) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO trade_pipeline_metrics (
                signature, direction, token, source, outcome, reject_reason,
                sell_buffered, sell_buffer_ms, confirm_wait_ms, latency_risk_ms,
                latency_exec_ms, latency_total_ms, price_drift_pct, unsafe_parse,
                recorded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            params![
                metric.signature,
                metric.direction.as_str(),
                metric.token,
                metric.source.as_str(),
                metric.outcome.as_str(),
                metric.reject_reason,
                metric.sell_buffered as i32,
                metric.sell_buffer_ms,
                metric.confirm_wait_ms,
                metric.latency_risk_ms,
                metric.latency_exec_ms,
                metric.latency_total_ms,
                metric.price_drift_pct,
                metric.unsafe_parse as i32,
                metric.recorded_at,
            ],
        )?;
        Ok(())
    }

    /// Outcomes recorded in the last `window_secs`, newest first — feeds the
    /// circuit breaker's sliding-window evaluation (spec.md §4.9).
    pub fn recent_outcomes(&self, window_secs: i64, limit: usize) -> Result<Vec<(TradeOutcome, i64)>, StoreError> {
        let conn = self.conn()?;
        let cutoff = Utc::now().timestamp() - window_secs;
        let mut stmt = conn.prepare(
            "SELECT outcome, latency_total_ms FROM trade_pipeline_metrics WHERE recorded_at >= ?1 ORDER BY recorded_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![cutoff, limit as i64], |row| {
            let outcome_str: String = row.get(0)?;
            let latency: i64 = row.get(1)?;
            Ok((outcome_str, latency))
        })?;
        let mut out = Vec::new();
        for r in rows {
            let (outcome_str, latency) = r?;
            let outcome = match outcome_str.as_str() {
                "COPIED" => TradeOutcome::Copied,
                "REJECTED" => TradeOutcome::Rejected,
                "FAILED" => TradeOutcome::Failed,
                _ => TradeOutcome::CircuitBreaker,
            };
            out.push((outcome, latency));
        }
        Ok(out)
    }

    /// Bounded prune of metrics older than `cutoff` (unix seconds), run by
    /// the scheduler's periodic cleanup task.
    pub fn prune_metrics_before(&self, cutoff: i64) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM trade_pipeline_metrics WHERE recorded_at < ?1",
            params![cutoff],
        )?;
        Ok(removed)
    }

    // -- virtual ledger (simulation mode) ------------------------------------

    pub fn init_virtual_ledger(&self, starting_balance: Decimal) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO virtual_ledger (id, starting_balance, cash) VALUES (1, ?1, ?1)",
            params![starting_balance.to_string(), starting_balance.to_string()],
        )?;
        Ok(())
    }

    pub fn virtual_cash(&self) -> Result<Decimal, StoreError> {
        let conn = self.conn()?;
        let raw: String = conn.query_row("SELECT cash FROM virtual_ledger WHERE id = 1", [], |row| row.get(0))?;
        Ok(Decimal::from_str(&raw).unwrap_or(Decimal::ZERO))
    }

    /// Applies a simulated trade to the virtual cash/token ledgers inside a
    /// single transaction, preserving the conservation invariant of
    /// spec.md §8 (`cash = starting - Σspent + Σreceived`).
    pub fn apply_virtual_trade(
        &self,
        token: &str,
        direction: Direction,
        base_amount: Decimal,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let cash_raw: String = tx.query_row("SELECT cash FROM virtual_ledger WHERE id = 1", [], |row| row.get(0))?;
        let cash = Decimal::from_str(&cash_raw).unwrap_or(Decimal::ZERO);
        let new_cash = match direction {
            Direction::Buy => cash - base_amount,
            Direction::Sell => cash + base_amount,
        };
        tx.execute(
            "UPDATE virtual_ledger SET cash = ?1 WHERE id = 1",
            params![new_cash.to_string()],
        )?;

        let existing: Option<(String, String)> = tx
            .query_row(
                "SELECT spent, received FROM virtual_token_ledger WHERE token = ?1",
                params![token],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (spent, received) = existing
            .map(|(s, r)| {
                (
                    Decimal::from_str(&s).unwrap_or(Decimal::ZERO),
                    Decimal::from_str(&r).unwrap_or(Decimal::ZERO),
                )
            })
            .unwrap_or((Decimal::ZERO, Decimal::ZERO));
        let (spent, received) = match direction {
            Direction::Buy => (spent + base_amount, received),
            Direction::Sell => (spent, received + base_amount),
        };
        tx.execute(
            "INSERT INTO virtual_token_ledger (token, spent, received) VALUES (?1, ?2, ?3)
             ON CONFLICT(token) DO UPDATE SET spent = excluded.spent, received = excluded.received",
            params![token, spent.to_string(), received.to_string()],
        )?;

        tx.execute(
            "INSERT INTO virtual_trade_log (token, direction, base_amount, recorded_at) VALUES (?1, ?2, ?3, ?4)",
            params![token, direction.as_str(), base_amount.to_string(), Utc::now().timestamp()],
        )?;

        tx.commit()?;
        Ok(())
    }

    // -- source trades (C1 / C5 step b) --------------------------------------

    /// Persists the swap record itself, independent of its eventual outcome
    /// (spec.md §4.5 step (b): "persist the swap record"). This is the
    /// descriptor's durable audit trail, distinct from `trade_pipeline_metrics`
    /// which records the *decision* made about it.
    pub fn record_source_trade(&self, descriptor: &crate::model::SwapDescriptor) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO source_trades (
                signature, direction, token, source, upstream_amount,
                raw_token_amount, token_decimals, unsafe_parse, recorded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                descriptor.signature,
                descriptor.direction.as_str(),
                descriptor.token,
                descriptor.source.as_str(),
                descriptor.upstream_amount.to_string(),
                descriptor.raw_token_amount.to_string(),
                descriptor.token_decimals,
                descriptor.unsafe_parse as i32,
                Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    // -- pnl snapshots (C10) --------------------------------------------------

    /// Periodic snapshot of the things this store can observe without an
    /// upstream price feed (spec.md §6 names `pnl_snapshots`; no USD/SOL
    /// price source is specified anywhere in EXTERNAL INTERFACES, so the
    /// snapshot is position/budget/cash counts rather than a realised-PnL
    /// figure — see DESIGN.md for the reasoning).
    pub fn record_pnl_snapshot(
        &self,
        open_positions: usize,
        spent_today: Decimal,
        virtual_cash: Option<Decimal>,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO pnl_snapshots (open_positions, spent_today, virtual_cash, recorded_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                open_positions as i64,
                spent_today.to_string(),
                virtual_cash.map(|c| c.to_string()),
                Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    // -- execution comparisons (C7) -------------------------------------------

    /// Quoted-vs-real fill comparison, recorded by the executor's post-send
    /// comparison task (spec.md §4.7). `real_base`/`real_token_raw`/
    /// `compute_units` are `None` when the finalised transaction's balance
    /// deltas could not be reconstructed (see `ChainClient::get_balance_snapshot`'s
    /// documented gap) — the row is still written so quoted-side data and the
    /// fee are not lost.
    pub fn record_execution_comparison(&self, comparison: &ExecutionComparison) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO execution_comparisons (
                signature, token, direction, quoted_base_amount, quoted_token_raw_amount,
                real_base_amount, real_token_raw_amount, fee_lamports, compute_units,
                slippage_pct, recorded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                comparison.signature,
                comparison.token,
                comparison.direction.as_str(),
                comparison.quoted_base_amount.to_string(),
                comparison.quoted_token_raw_amount.to_string(),
                comparison.real_base_amount.map(|d| d.to_string()),
                comparison.real_token_raw_amount.as_ref().map(|d| d.to_string()),
                comparison.fee_lamports,
                comparison.compute_units,
                comparison.slippage_pct,
                Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }
}

/// One row of the execution_comparisons table (spec.md §4.7).
#[derive(Debug, Clone)]
pub struct ExecutionComparison {
    pub signature: String,
    pub token: String,
    pub direction: Direction,
    pub quoted_base_amount: Decimal,
    pub quoted_token_raw_amount: BigInt,
    pub real_base_amount: Option<Decimal>,
    pub real_token_raw_amount: Option<BigInt>,
    pub fee_lamports: u64,
    pub compute_units: Option<u64>,
    pub slippage_pct: Option<f64>,
}

fn row_to_position(row: &rusqlite::Row) -> rusqlite::Result<Position> {
    let raw_balance_str: String = row.get(1)?;
    let status_str: String = row.get(3)?;
    let pending_delta_str: Option<String> = row.get(5)?;
    Ok(Position {
        token: row.get(0)?,
        raw_balance: BigInt::from_str(&raw_balance_str).unwrap_or_default(),
        token_decimals: row.get(2)?,
        status: PositionStatus::from_str(&status_str).unwrap_or(PositionStatus::Confirmed),
        last_update: row.get(4)?,
        pending_delta: pending_delta_str.and_then(|s| BigInt::from_str(&s).ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_ledger_rejects_duplicates() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.try_mark_processed("sig1", SourceTag::Webhook).unwrap());
        assert!(!store.try_mark_processed("sig1", SourceTag::Poll).unwrap());
        assert!(store.is_processed("sig1").unwrap());
    }

    #[test]
    fn position_lifecycle_round_trips() {
        let store = Store::open_in_memory().unwrap();
        let position = Position {
            token: "TOKEN".into(),
            raw_balance: BigInt::from(1_000_000u64),
            token_decimals: 6,
            status: PositionStatus::Sent,
            last_update: Utc::now().timestamp(),
            pending_delta: Some(BigInt::from(1_000_000u64)),
        };
        store.upsert_position(&position).unwrap();
        assert_eq!(store.open_position_count().unwrap(), 1);

        let fetched = store.get_position("TOKEN").unwrap().unwrap();
        assert_eq!(fetched.status, PositionStatus::Sent);

        store.delete_position("TOKEN").unwrap();
        assert!(store.get_position("TOKEN").unwrap().is_none());
        assert_eq!(store.open_position_count().unwrap(), 0);
    }

    #[test]
    fn daily_budget_accumulates() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.spent_today().unwrap(), Decimal::ZERO);
        let total = store.add_spent_today(Decimal::from_str("0.5").unwrap()).unwrap();
        assert_eq!(total, Decimal::from_str("0.5").unwrap());
        let total = store.add_spent_today(Decimal::from_str("0.25").unwrap()).unwrap();
        assert_eq!(total, Decimal::from_str("0.75").unwrap());
    }

    #[test]
    fn virtual_ledger_preserves_conservation() {
        let store = Store::open_in_memory().unwrap();
        store.init_virtual_ledger(Decimal::from_str("10.0").unwrap()).unwrap();
        store
            .apply_virtual_trade("TOKEN", Direction::Buy, Decimal::from_str("2.0").unwrap())
            .unwrap();
        assert_eq!(store.virtual_cash().unwrap(), Decimal::from_str("8.0").unwrap());
        store
            .apply_virtual_trade("TOKEN", Direction::Sell, Decimal::from_str("3.0").unwrap())
            .unwrap();
        assert_eq!(store.virtual_cash().unwrap(), Decimal::from_str("11.0").unwrap());
    }

    #[test]
    fn stale_sent_positions_are_found_past_cutoff() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now().timestamp();
        store
            .upsert_position(&Position {
                token: "OLD".into(),
                raw_balance: BigInt::from(1u64),
                token_decimals: 6,
                status: PositionStatus::Sent,
                last_update: now - 600,
                pending_delta: Some(BigInt::from(1u64)),
            })
            .unwrap();
        let stale = store.list_stale_sent(now - 300).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].token, "OLD");
    }

    #[test]
    fn source_trade_round_trips() {
        let store = Store::open_in_memory().unwrap();
        let descriptor = crate::model::SwapDescriptor {
            signature: "sig1".into(),
            direction: Direction::Buy,
            token: "TOKEN".into(),
            upstream_amount: Decimal::from_str("1.5").unwrap(),
            raw_token_amount: BigInt::from(2_000_000u64),
            token_decimals: 6,
            source: SourceTag::Webhook,
            unsafe_parse: false,
        };
        store.record_source_trade(&descriptor).unwrap();
        // re-recording the same signature (e.g. a duplicate-but-unique replay
        // path) must not error or duplicate the row.
        store.record_source_trade(&descriptor).unwrap();
        let conn = store.conn().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM source_trades WHERE signature = 'sig1'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn pnl_snapshot_round_trips() {
        let store = Store::open_in_memory().unwrap();
        store.record_pnl_snapshot(3, Decimal::from_str("1.25").unwrap(), Some(Decimal::from_str("8.0").unwrap())).unwrap();
        let conn = store.conn().unwrap();
        let open_positions: i64 = conn
            .query_row("SELECT open_positions FROM pnl_snapshots ORDER BY id DESC LIMIT 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(open_positions, 3);
    }

    #[test]
    fn execution_comparison_round_trips_with_unknown_real_fill() {
        let store = Store::open_in_memory().unwrap();
        let comparison = ExecutionComparison {
            signature: "sig1".into(),
            token: "TOKEN".into(),
            direction: Direction::Buy,
            quoted_base_amount: Decimal::from_str("1.0").unwrap(),
            quoted_token_raw_amount: BigInt::from(1_000_000u64),
            real_base_amount: None,
            real_token_raw_amount: None,
            fee_lamports: 5_000,
            compute_units: None,
            slippage_pct: None,
        };
        store.record_execution_comparison(&comparison).unwrap();
        let conn = store.conn().unwrap();
        let fee: i64 = conn
            .query_row("SELECT fee_lamports FROM execution_comparisons WHERE signature = 'sig1'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fee, 5_000);
    }
}
