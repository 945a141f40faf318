// =============================================================================
// Write-behind trade store — spec §4.B
// =============================================================================
//
// Structured after the teacher's `AsyncTradeRecorder` in
// `backtest_v2/trade_recorder.rs`: a bounded mpsc channel feeds a single
// background writer task that batches inserts into one transaction. The
// core never blocks on disk I/O to record state; it blocks only on
// `close()`, which drains the channel and flushes everything buffered.
// =============================================================================

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::events::Event;
use crate::trade::{FundingRate, Order, Trade};
use crate::types::{Symbol, VenueId};

const DEFAULT_CHANNEL_CAPACITY: usize = 4096;
const DEFAULT_BATCH_SIZE: usize = 50;

enum StoreMessage {
    UpsertTrade(Box<Trade>),
    UpsertOrder { trade_id: Ulid, order: Box<Order> },
    RecordFill { trade_id: Ulid, order_id: String, filled_qty: Decimal, avg_fill_px: Decimal, fee: Decimal, was_reset: bool, observed_at: DateTime<Utc> },
    RecordFundingSnapshot(Box<FundingRate>),
    RecordFundingRealized { trade_id: Ulid, symbol: Symbol, venue: VenueId, amount: Decimal },
    RecordEvent(Box<Event>),
    Flush(oneshot::Sender<()>),
}

/// Cheaply-cloneable handle for submitting writes without touching disk
/// on the caller's task.
#[derive(Clone)]
pub struct TradeStoreHandle {
    tx: mpsc::Sender<StoreMessage>,
}

impl TradeStoreHandle {
    pub fn upsert_trade(&self, trade: Trade) {
        let _ = self.tx.try_send(StoreMessage::UpsertTrade(Box::new(trade)));
    }

    pub fn upsert_order(&self, trade_id: Ulid, order: Order) {
        let _ = self.tx.try_send(StoreMessage::UpsertOrder { trade_id, order: Box::new(order) });
    }

    pub fn record_fill(
        &self,
        trade_id: Ulid,
        order_id: impl Into<String>,
        filled_qty: Decimal,
        avg_fill_px: Decimal,
        fee: Decimal,
        was_reset: bool,
        observed_at: DateTime<Utc>,
    ) {
        let _ = self.tx.try_send(StoreMessage::RecordFill {
            trade_id,
            order_id: order_id.into(),
            filled_qty,
            avg_fill_px,
            fee,
            was_reset,
            observed_at,
        });
    }

    pub fn record_funding_snapshot(&self, rate: FundingRate) {
        let _ = self.tx.try_send(StoreMessage::RecordFundingSnapshot(Box::new(rate)));
    }

    pub fn record_funding_realized(&self, trade_id: Ulid, symbol: Symbol, venue: VenueId, amount: Decimal) {
        let _ = self.tx.try_send(StoreMessage::RecordFundingRealized { trade_id, symbol, venue, amount });
    }

    pub fn record_event(&self, event: Event) {
        let _ = self.tx.try_send(StoreMessage::RecordEvent(Box::new(event)));
    }

    /// Blocks until every message sent before this call has been written.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(StoreMessage::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }
}

pub struct TradeStore {
    conn: Arc<Mutex<Connection>>,
    handle: TradeStoreHandle,
    writer: Option<JoinHandle<()>>,
}

impl TradeStore {
    pub fn open(db_path: impl AsRef<Path>, batch_size: usize) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context("creating trade store parent directory")?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)
            .with_context(|| format!("opening trade store at {}", path.display()))?;
        super::schema::migrate(&conn)?;

        info!(path = %path.display(), "trade store opened");
        Ok(Self::from_connection(conn, batch_size))
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        super::schema::migrate(&conn)?;
        Ok(Self::from_connection(conn, DEFAULT_BATCH_SIZE))
    }

    fn from_connection(conn: Connection, batch_size: usize) -> Self {
        let conn = Arc::new(Mutex::new(conn));
        let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let writer = tokio::spawn(Self::run_writer(conn.clone(), rx, batch_size.max(1)));

        Self { conn, handle: TradeStoreHandle { tx }, writer: Some(writer) }
    }

    pub fn handle(&self) -> TradeStoreHandle {
        self.handle.clone()
    }

    /// Drains any in-flight writes, stops the writer task, and closes the
    /// connection. Safe to call more than once.
    pub async fn close(&mut self) {
        self.handle.flush().await;
        if let Some(writer) = self.writer.take() {
            drop(self.handle.tx.clone());
            let _ = writer.await;
        }
    }

    async fn run_writer(conn: Arc<Mutex<Connection>>, mut rx: mpsc::Receiver<StoreMessage>, batch_size: usize) {
        let mut buffer: Vec<StoreMessage> = Vec::with_capacity(batch_size);
        let flush_interval = std::time::Duration::from_millis(200);

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(StoreMessage::Flush(ack)) => {
                            Self::drain(&conn, &mut buffer);
                            let _ = ack.send(());
                        }
                        Some(msg) => {
                            buffer.push(msg);
                            if buffer.len() >= batch_size {
                                Self::drain(&conn, &mut buffer);
                            }
                        }
                        None => {
                            Self::drain(&conn, &mut buffer);
                            debug!("trade store writer exiting, channel closed");
                            return;
                        }
                    }
                }
                _ = tokio::time::sleep(flush_interval) => {
                    Self::drain(&conn, &mut buffer);
                }
            }
        }
    }

    fn drain(conn: &Arc<Mutex<Connection>>, buffer: &mut Vec<StoreMessage>) {
        if buffer.is_empty() {
            return;
        }
        let conn = conn.lock();
        if let Err(e) = Self::write_batch(&conn, buffer) {
            warn!(error = %e, dropped = buffer.len(), "trade store batch write failed");
        }
        buffer.clear();
    }

    fn write_batch(conn: &Connection, messages: &[StoreMessage]) -> Result<()> {
        conn.execute("BEGIN IMMEDIATE", [])?;
        for msg in messages {
            if let Err(e) = Self::apply(conn, msg) {
                warn!(error = %e, "dropping one trade-store record");
            }
        }
        conn.execute("COMMIT", [])?;
        Ok(())
    }

    fn apply(conn: &Connection, msg: &StoreMessage) -> Result<()> {
        match msg {
            StoreMessage::UpsertTrade(trade) => {
                let data = serde_json::to_string(trade)?;
                conn.execute(
                    r#"INSERT INTO trades (trade_id, symbol, status, exec_state, created_at, updated_at, data)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                       ON CONFLICT(trade_id) DO UPDATE SET
                           symbol = excluded.symbol, status = excluded.status,
                           exec_state = excluded.exec_state, updated_at = excluded.updated_at,
                           data = excluded.data"#,
                    params![
                        trade.trade_id.to_string(),
                        trade.symbol.0,
                        trade.status.to_string(),
                        trade.exec_state.to_string(),
                        trade.created_at.timestamp_millis(),
                        Utc::now().timestamp_millis(),
                        data,
                    ],
                )?;
            }
            StoreMessage::UpsertOrder { trade_id, order } => {
                let data = serde_json::to_string(order)?;
                conn.execute(
                    r#"INSERT INTO orders (order_id, trade_id, venue, status, updated_at, data)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                       ON CONFLICT(order_id) DO UPDATE SET
                           status = excluded.status, updated_at = excluded.updated_at, data = excluded.data"#,
                    params![
                        order.order_id,
                        trade_id.to_string(),
                        order.request.venue.to_string(),
                        order.status.to_string(),
                        Utc::now().timestamp_millis(),
                        data,
                    ],
                )?;
            }
            StoreMessage::RecordFill { trade_id, order_id, filled_qty, avg_fill_px, fee, was_reset, observed_at } => {
                conn.execute(
                    r#"INSERT INTO fills (trade_id, order_id, filled_qty, avg_fill_px, fee, was_reset, observed_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
                    params![
                        trade_id.to_string(),
                        order_id,
                        filled_qty.to_string(),
                        avg_fill_px.to_string(),
                        fee.to_string(),
                        *was_reset as i64,
                        observed_at.timestamp_millis(),
                    ],
                )?;
            }
            StoreMessage::RecordFundingSnapshot(rate) => {
                conn.execute(
                    r#"INSERT INTO funding_snapshots (symbol, venue, rate_hourly, next_funding_time, observed_at)
                       VALUES (?1, ?2, ?3, ?4, ?5)"#,
                    params![
                        rate.symbol.0,
                        rate.venue.to_string(),
                        rate.rate_hourly.to_string(),
                        rate.next_funding_time.timestamp_millis(),
                        rate.observed_at.timestamp_millis(),
                    ],
                )?;
            }
            StoreMessage::RecordFundingRealized { trade_id, symbol, venue, amount } => {
                conn.execute(
                    r#"INSERT INTO funding_realized (trade_id, symbol, venue, amount, recorded_at)
                       VALUES (?1, ?2, ?3, ?4, ?5)"#,
                    params![trade_id.to_string(), symbol.0, venue.to_string(), amount.to_string(), Utc::now().timestamp_millis()],
                )?;
            }
            StoreMessage::RecordEvent(event) => {
                let kind = event_kind(event);
                let payload = serde_json::to_string(&format!("{event:?}"))?;
                conn.execute(
                    "INSERT INTO events (kind, payload, created_at) VALUES (?1, ?2, ?3)",
                    params![kind, payload, Utc::now().timestamp_millis()],
                )?;
            }
            StoreMessage::Flush(_) => {}
        }
        Ok(())
    }

    // -- synchronous read paths, used by reconciliation and the CLI ------

    pub fn load_trade(&self, trade_id: &Ulid) -> Result<Option<Trade>> {
        let conn = self.conn.lock();
        let data: Option<String> = conn
            .query_row("SELECT data FROM trades WHERE trade_id = ?1", params![trade_id.to_string()], |row| row.get(0))
            .ok();
        Ok(match data {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        })
    }

    pub fn load_open_trades(&self) -> Result<Vec<Trade>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT data FROM trades WHERE status NOT IN ('Closed', 'Rejected', 'Failed') ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(|json| Ok(serde_json::from_str(&json)?)).collect()
    }

    pub fn load_orders_for_trade(&self, trade_id: &Ulid) -> Result<Vec<Order>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT data FROM orders WHERE trade_id = ?1")?;
        let rows = stmt
            .query_map(params![trade_id.to_string()], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(|json| Ok(serde_json::from_str(&json)?)).collect()
    }

    pub fn total_funding_realized(&self, trade_id: &Ulid) -> Result<Decimal> {
        let conn = self.conn.lock();
        let total: Option<String> = conn.query_row(
            "SELECT CAST(SUM(CAST(amount AS REAL)) AS TEXT) FROM funding_realized WHERE trade_id = ?1",
            params![trade_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(total.and_then(|s| s.parse().ok()).unwrap_or(Decimal::ZERO))
    }

    pub fn latest_funding_snapshot(&self, symbol: &Symbol, venue: VenueId) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock();
        let ms: Option<i64> = conn
            .query_row(
                "SELECT MAX(observed_at) FROM funding_snapshots WHERE symbol = ?1 AND venue = ?2",
                params![symbol.0, venue.to_string()],
                |row| row.get(0),
            )
            .ok()
            .flatten();
        Ok(ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
    }
}

fn event_kind(event: &Event) -> &'static str {
    match event {
        Event::TradeOpened { .. } => "trade_opened",
        Event::TradeClosed { .. } => "trade_closed",
        Event::LegFilled { .. } => "leg_filled",
        Event::RollbackInitiated { .. } => "rollback_initiated",
        Event::BrokenHedgeDetected { .. } => "broken_hedge_detected",
        Event::CircuitBreakerTripped { .. } => "circuit_breaker_tripped",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade::{ExecutionState, TradeLeg, TradeStatus};
    use crate::types::Side;

    fn sample_trade() -> Trade {
        Trade {
            trade_id: Ulid::new(),
            symbol: "ETH".into(),
            leg1: TradeLeg {
                venue: VenueId::Maker,
                side: Side::Long,
                order_id: None,
                qty_target: Decimal::ONE,
                qty_filled: Decimal::ZERO,
                entry_px: Decimal::ZERO,
                exit_px: Decimal::ZERO,
                fees: Decimal::ZERO,
                qty_closed: Decimal::ZERO,
                last_close_order_id: None,
            },
            leg2: TradeLeg {
                venue: VenueId::Hedge,
                side: Side::Short,
                order_id: None,
                qty_target: Decimal::ONE,
                qty_filled: Decimal::ZERO,
                entry_px: Decimal::ZERO,
                exit_px: Decimal::ZERO,
                fees: Decimal::ZERO,
                qty_closed: Decimal::ZERO,
                last_close_order_id: None,
            },
            target_qty: Decimal::ONE,
            target_notional_usd: Decimal::from(350),
            status: TradeStatus::Pending,
            exec_state: ExecutionState::Pending,
            entry_apy: Decimal::ZERO,
            entry_spread: Decimal::ZERO,
            funding_collected: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            high_water_mark: Decimal::ZERO,
            close_reason: None,
            created_at: Utc::now(),
            opened_at: None,
            closed_at: None,
        }
    }

    #[tokio::test]
    async fn upsert_and_load_trade_roundtrips() {
        let mut store = TradeStore::open_memory().unwrap();
        let trade = sample_trade();
        let trade_id = trade.trade_id;

        store.handle().upsert_trade(trade.clone());
        store.close().await;

        let loaded = store.load_trade(&trade_id).unwrap().unwrap();
        assert_eq!(loaded.trade_id, trade_id);
        assert_eq!(loaded.symbol, trade.symbol);
    }

    #[tokio::test]
    async fn open_trades_excludes_closed_status() {
        let mut store = TradeStore::open_memory().unwrap();
        let mut open_trade = sample_trade();
        open_trade.status = TradeStatus::Open;
        let mut closed_trade = sample_trade();
        closed_trade.status = TradeStatus::Closed;

        store.handle().upsert_trade(open_trade.clone());
        store.handle().upsert_trade(closed_trade);
        store.close().await;

        let open = store.load_open_trades().unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].trade_id, open_trade.trade_id);
    }

    #[tokio::test]
    async fn funding_realized_sums_across_records() {
        let mut store = TradeStore::open_memory().unwrap();
        let trade_id = Ulid::new();

        store.handle().record_funding_realized(trade_id, "ETH".into(), VenueId::Maker, "1.5".parse().unwrap());
        store.handle().record_funding_realized(trade_id, "ETH".into(), VenueId::Hedge, "-0.5".parse().unwrap());
        store.close().await;

        let total = store.total_funding_realized(&trade_id).unwrap();
        assert_eq!(total, Decimal::from(1));
    }
}
