//! SQLite persistence for the trade journal.
//!
//! Every order the engine places is journaled so a run can be reconstructed
//! after the fact:
//! - Session starts (symbol and the parameters in force)
//! - Orders (entry / limit close / stop-loss) with venue order ids
//!
//! Journal writes are best-effort: a failed insert is a warning upstream,
//! never a trading-path error.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::exchange::OrderSide;

/// What an order did in the funding-window lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    Entry,
    LimitClose,
    StopLoss,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Entry => "entry",
            OrderKind::LimitClose => "limit_close",
            OrderKind::StopLoss => "stop_loss",
        }
    }
}

/// One journaled order row.
#[derive(Debug, Clone)]
pub struct JournalRow {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub kind: String,
    pub side: String,
    pub qty: Decimal,
    pub price: Option<Decimal>,
    pub order_id: String,
}

/// SQLite-backed journal. The connection is mutex-guarded so the journal can
/// be shared across the runner's tasks.
pub struct TradeJournal {
    conn: Mutex<Connection>,
}

impl TradeJournal {
    /// Open (or create) the journal database.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {:?}", parent))?;
            }
        }
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        let journal = Self {
            conn: Mutex::new(conn),
        };
        journal.init_schema()?;

        info!("Trade journal opened at {:?}", db_path.as_ref());
        Ok(journal)
    }

    /// In-memory journal for tests.
    pub fn in_memory() -> Result<Self> {
        let journal = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        journal.init_schema()?;
        Ok(journal)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.lock().unwrap().execute_batch(
            r#"
            -- Session starts
            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                started_at TEXT NOT NULL,
                symbol TEXT NOT NULL,
                qty TEXT NOT NULL,
                entry_lead_secs REAL NOT NULL,
                profit_pct TEXT NOT NULL,
                stop_loss_pct TEXT
            );

            -- Orders placed by the engine
            CREATE TABLE IF NOT EXISTS orders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                symbol TEXT NOT NULL,
                kind TEXT NOT NULL,
                side TEXT NOT NULL,
                qty TEXT NOT NULL,
                price TEXT,
                order_id TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_orders_timestamp ON orders(timestamp);
            CREATE INDEX IF NOT EXISTS idx_orders_symbol ON orders(symbol);
            "#,
        )?;

        debug!("Journal schema initialized");
        Ok(())
    }

    /// Record a session start.
    pub fn record_session(
        &self,
        symbol: &str,
        qty: Decimal,
        entry_lead_secs: f64,
        profit_pct: Decimal,
        stop_loss_pct: Option<Decimal>,
    ) -> Result<()> {
        self.conn.lock().unwrap().execute(
            r#"
            INSERT INTO sessions (started_at, symbol, qty, entry_lead_secs, profit_pct, stop_loss_pct)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                Utc::now().to_rfc3339(),
                symbol,
                qty.to_string(),
                entry_lead_secs,
                profit_pct.to_string(),
                stop_loss_pct.map(|p| p.to_string()),
            ],
        )?;
        Ok(())
    }

    /// Record one placed order.
    pub fn record_order(
        &self,
        symbol: &str,
        kind: OrderKind,
        side: OrderSide,
        qty: Decimal,
        price: Option<Decimal>,
        order_id: &str,
    ) -> Result<()> {
        self.conn.lock().unwrap().execute(
            r#"
            INSERT INTO orders (timestamp, symbol, kind, side, qty, price, order_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                Utc::now().to_rfc3339(),
                symbol,
                kind.as_str(),
                side.to_string(),
                qty.to_string(),
                price.map(|p| p.to_string()),
                order_id,
            ],
        )?;
        Ok(())
    }

    /// Most recent orders, newest first.
    pub fn recent_orders(&self, limit: usize) -> Result<Vec<JournalRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT timestamp, symbol, kind, side, qty, price, order_id
            FROM orders ORDER BY id DESC LIMIT ?1
            "#,
        )?;

        let raw = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(ts, symbol, kind, side, qty, price, order_id)| {
                Ok(JournalRow {
                    timestamp: DateTime::parse_from_rfc3339(&ts)
                        .context("Invalid timestamp in journal")?
                        .with_timezone(&Utc),
                    symbol,
                    kind,
                    side,
                    qty: Decimal::from_str(&qty).context("Invalid qty in journal")?,
                    price: match price {
                        Some(p) => Some(Decimal::from_str(&p).context("Invalid price in journal")?),
                        None => None,
                    },
                    order_id,
                })
            })
            .collect()
    }
}
