//! Durable Engine Store
//!
//! SQLite mirror of the settlement engine. The in-memory engine is the
//! authority during a round; the store is written after every mutation so a
//! crash replays from the last durable checkpoint. Settlement records, the
//! post-settlement snapshot, and winner account credits are committed in a
//! single transaction - a payout is never visible without the settlement
//! that produced it.

use crate::engine::ledger::{Currency, WitnessEntry};
use crate::engine::randomness::RandomnessRequest;
use crate::engine::reserve::Reserve;
use crate::engine::settlement::{EngineSnapshot, SettlementReport, WitnessState};
use crate::engine::weather::WeatherOutcome;
use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Clone)]
pub struct EngineStore {
    conn: Arc<Mutex<Connection>>,
}

impl EngineStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open engine db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS engine_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                state TEXT NOT NULL,
                request_nonce INTEGER NOT NULL,
                pending_json TEXT,
                last_request_json TEXT,
                last_outcome_json TEXT,
                native_balance TEXT NOT NULL,
                eth_balance TEXT NOT NULL,
                native_limit_fee TEXT NOT NULL,
                eth_limit_fee TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS witnesses (
                id TEXT PRIMARY KEY,
                seq INTEGER NOT NULL,
                participant TEXT NOT NULL,
                beneficiary TEXT NOT NULL,
                predicted_index INTEGER NOT NULL,
                currency TEXT NOT NULL,
                amount TEXT NOT NULL,
                accepted_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS settlements (
                request_id TEXT PRIMARY KEY,
                outcome_index INTEGER NOT NULL,
                weather TEXT NOT NULL,
                total_paid_native TEXT NOT NULL,
                total_paid_eth TEXT NOT NULL,
                retained_native TEXT NOT NULL,
                retained_eth TEXT NOT NULL,
                settled_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS payouts (
                id TEXT PRIMARY KEY,
                request_id TEXT NOT NULL,
                recipient TEXT NOT NULL,
                currency TEXT NOT NULL,
                amount TEXT NOT NULL,
                entry_id TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_payouts_request ON payouts(request_id)",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS accounts (
                recipient TEXT NOT NULL,
                currency TEXT NOT NULL,
                balance TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (recipient, currency)
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Mirror the engine after a non-settling mutation (wager, deposit,
    /// state switch, upkeep trigger).
    pub async fn checkpoint(&self, snapshot: &EngineSnapshot, now: i64) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        write_snapshot(&tx, snapshot, now)?;
        tx.commit().context("commit checkpoint")
    }

    /// Commit a settlement: the post-settlement snapshot, the settlement
    /// record, its payouts, and the winner account credits - atomically.
    pub async fn record_settlement(
        &self,
        snapshot: &EngineSnapshot,
        report: &SettlementReport,
        now: i64,
    ) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        write_snapshot(&tx, snapshot, now)?;

        tx.execute(
            "INSERT INTO settlements (request_id, outcome_index, weather,
                total_paid_native, total_paid_eth, retained_native, retained_eth, settled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                report.request_id.to_hex(),
                report.outcome.index,
                report.outcome.weather.label(),
                report.total_paid_native.to_string(),
                report.total_paid_eth.to_string(),
                report.retained_native.to_string(),
                report.retained_eth.to_string(),
                report.settled_at,
            ],
        )?;

        for payout in &report.payouts {
            tx.execute(
                "INSERT INTO payouts (id, request_id, recipient, currency, amount, entry_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    Uuid::new_v4().to_string(),
                    report.request_id.to_hex(),
                    payout.recipient,
                    payout.currency.as_str(),
                    payout.amount.to_string(),
                    payout.entry_id.to_string(),
                ],
            )?;
            credit_account(&tx, &payout.recipient, payout.currency, payout.amount, now)?;
        }

        tx.commit().context("commit settlement")
    }

    /// Credit refunds from a force-close, alongside the closing snapshot.
    pub async fn record_refunds(
        &self,
        snapshot: &EngineSnapshot,
        refunds: &[crate::engine::settlement::Payout],
        now: i64,
    ) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        write_snapshot(&tx, snapshot, now)?;
        for refund in refunds {
            credit_account(&tx, &refund.recipient, refund.currency, refund.amount, now)?;
        }
        tx.commit().context("commit refunds")
    }

    /// Restore the engine image from the last checkpoint, if one exists.
    pub async fn load(&self) -> Result<Option<EngineSnapshot>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT state, request_nonce, pending_json, last_request_json,
                        last_outcome_json, native_balance, eth_balance,
                        native_limit_fee, eth_limit_fee
                 FROM engine_state WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u64>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            state,
            request_nonce,
            pending_json,
            last_request_json,
            last_outcome_json,
            native_balance,
            eth_balance,
            native_limit_fee,
            eth_limit_fee,
        )) = row
        else {
            return Ok(None);
        };

        let state = WitnessState::parse(&state)
            .ok_or_else(|| anyhow!("unknown witness state in db: {}", state))?;
        let pending: Option<RandomnessRequest> = parse_json_opt(pending_json)?;
        let last_request: Option<RandomnessRequest> = parse_json_opt(last_request_json)?;
        let last_outcome: Option<WeatherOutcome> = parse_json_opt(last_outcome_json)?;
        let reserve = Reserve {
            native_balance: parse_amount(&native_balance)?,
            eth_balance: parse_amount(&eth_balance)?,
            native_limit_fee: parse_amount(&native_limit_fee)?,
            eth_limit_fee: parse_amount(&eth_limit_fee)?,
        };

        let mut stmt = conn.prepare(
            "SELECT id, participant, beneficiary, predicted_index, currency, amount, accepted_at
             FROM witnesses ORDER BY seq ASC",
        )?;
        let entries = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u8>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut witnesses = Vec::with_capacity(entries.len());
        for (id, participant, beneficiary, predicted_index, currency, amount, accepted_at) in
            entries
        {
            witnesses.push(WitnessEntry {
                id: id.parse().context("witness id")?,
                participant,
                beneficiary,
                predicted_index,
                currency: Currency::parse(&currency)
                    .ok_or_else(|| anyhow!("unknown currency in db: {}", currency))?,
                amount: parse_amount(&amount)?,
                accepted_at,
            });
        }

        Ok(Some(EngineSnapshot {
            state,
            entries: witnesses,
            reserve,
            request_nonce,
            pending,
            last_request,
            last_outcome,
        }))
    }

    /// Credited winnings and refunds for one identity.
    pub async fn account_balance(&self, recipient: &str, currency: Currency) -> Result<u128> {
        let conn = self.conn.lock().await;
        let balance: Option<String> = conn
            .query_row(
                "SELECT balance FROM accounts WHERE recipient = ?1 AND currency = ?2",
                params![recipient, currency.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match balance {
            Some(b) => parse_amount(&b),
            None => Ok(0),
        }
    }

    pub async fn settlement_count(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM settlements", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn write_snapshot(tx: &rusqlite::Transaction<'_>, snapshot: &EngineSnapshot, now: i64) -> Result<()> {
    tx.execute(
        "INSERT INTO engine_state (id, state, request_nonce, pending_json, last_request_json,
             last_outcome_json, native_balance, eth_balance, native_limit_fee, eth_limit_fee, updated_at)
         VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
             state = excluded.state,
             request_nonce = excluded.request_nonce,
             pending_json = excluded.pending_json,
             last_request_json = excluded.last_request_json,
             last_outcome_json = excluded.last_outcome_json,
             native_balance = excluded.native_balance,
             eth_balance = excluded.eth_balance,
             native_limit_fee = excluded.native_limit_fee,
             eth_limit_fee = excluded.eth_limit_fee,
             updated_at = excluded.updated_at",
        params![
            snapshot.state.as_str(),
            snapshot.request_nonce,
            to_json_opt(&snapshot.pending)?,
            to_json_opt(&snapshot.last_request)?,
            to_json_opt(&snapshot.last_outcome)?,
            snapshot.reserve.native_balance.to_string(),
            snapshot.reserve.eth_balance.to_string(),
            snapshot.reserve.native_limit_fee.to_string(),
            snapshot.reserve.eth_limit_fee.to_string(),
            now,
        ],
    )?;

    // The witnesses table mirrors the current round's ledger exactly.
    tx.execute("DELETE FROM witnesses", [])?;
    for (seq, entry) in snapshot.entries.iter().enumerate() {
        tx.execute(
            "INSERT INTO witnesses (id, seq, participant, beneficiary, predicted_index,
                 currency, amount, accepted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.id.to_string(),
                seq as i64,
                entry.participant,
                entry.beneficiary,
                entry.predicted_index,
                entry.currency.as_str(),
                entry.amount.to_string(),
                entry.accepted_at,
            ],
        )?;
    }
    Ok(())
}

fn credit_account(
    tx: &rusqlite::Transaction<'_>,
    recipient: &str,
    currency: Currency,
    amount: u128,
    now: i64,
) -> Result<()> {
    let existing: Option<String> = tx
        .query_row(
            "SELECT balance FROM accounts WHERE recipient = ?1 AND currency = ?2",
            params![recipient, currency.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    let balance = match existing {
        Some(b) => parse_amount(&b)? + amount,
        None => amount,
    };
    tx.execute(
        "INSERT INTO accounts (recipient, currency, balance, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(recipient, currency) DO UPDATE SET
             balance = excluded.balance,
             updated_at = excluded.updated_at",
        params![recipient, currency.as_str(), balance.to_string(), now],
    )?;
    Ok(())
}

fn parse_amount(s: &str) -> Result<u128> {
    s.parse::<u128>()
        .with_context(|| format!("bad amount in db: {}", s))
}

fn to_json_opt<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(|v| serde_json::to_string(v).context("serialize engine column"))
        .transpose()
}

fn parse_json_opt<T: serde::de::DeserializeOwned>(value: Option<String>) -> Result<Option<T>> {
    value
        .map(|v| serde_json::from_str(&v).context("deserialize engine column"))
        .transpose()
}
