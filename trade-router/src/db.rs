//! SQLite persistence layer

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Mutex, MutexGuard};
use swapbook_matching_engine::{
    Amount, Currency, Fill, LogEntry, Order, OrderFilter, OrderId, OrderRepository, Platform,
    RepositoryError,
};

const ORDER_COLUMNS: &str = "id, sender_pk, receiver_pk, buy_currency, sell_currency, buy_amount, \
    sell_amount, platform, signature, filled, counterparty_id, creator_id";

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(path: &str) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        init_tables(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    #[cfg(test)]
    pub fn in_memory() -> rusqlite::Result<Self> {
        Self::new(":memory:")
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, RepositoryError> {
        self.conn.lock().map_err(|_| RepositoryError::Poisoned)
    }
}

fn init_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Orders, scanned in insertion (seq) order
        CREATE TABLE IF NOT EXISTS orders (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT UNIQUE NOT NULL,
            sender_pk TEXT NOT NULL,
            receiver_pk TEXT NOT NULL,
            buy_currency TEXT NOT NULL,
            sell_currency TEXT NOT NULL,
            buy_amount TEXT NOT NULL,
            sell_amount TEXT NOT NULL,
            platform TEXT NOT NULL,
            signature TEXT,
            filled TEXT,
            counterparty_id TEXT,
            creator_id TEXT
        );

        -- Rejected submissions
        CREATE TABLE IF NOT EXISTS log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            logtime TEXT NOT NULL,
            message TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_orders_filled ON orders(filled);
    "#,
    )
}

fn backend(e: rusqlite::Error) -> RepositoryError {
    RepositoryError::Backend(Box::new(e))
}

fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn insert_row(conn: &Connection, order: &Order) -> Result<(), RepositoryError> {
    let result = conn.execute(
        &format!("INSERT INTO orders ({ORDER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"),
        params![
            order.id.0.to_string(),
            order.sender_pk,
            order.receiver_pk,
            order.buy_currency.as_str(),
            order.sell_currency.as_str(),
            order.buy_amount.to_string(),
            order.sell_amount.to_string(),
            order.platform.as_str(),
            order.signature,
            order.filled.map(format_time),
            order.counterparty_id.map(|id| id.0.to_string()),
            order.creator_id.map(|id| id.0.to_string()),
        ],
    );

    result.map(|_| ()).map_err(|e| insert_error(e, order.id))
}

/// Only a UNIQUE violation on `id` means the order already exists
fn insert_error(e: rusqlite::Error, id: OrderId) -> RepositoryError {
    match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            RepositoryError::Duplicate(id)
        }
        e => backend(e),
    }
}

/// Raw column values of an `orders` row
struct StoredOrder {
    id: String,
    sender_pk: String,
    receiver_pk: String,
    buy_currency: String,
    sell_currency: String,
    buy_amount: String,
    sell_amount: String,
    platform: String,
    signature: Option<String>,
    filled: Option<String>,
    counterparty_id: Option<String>,
    creator_id: Option<String>,
}

impl StoredOrder {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            sender_pk: row.get(1)?,
            receiver_pk: row.get(2)?,
            buy_currency: row.get(3)?,
            sell_currency: row.get(4)?,
            buy_amount: row.get(5)?,
            sell_amount: row.get(6)?,
            platform: row.get(7)?,
            signature: row.get(8)?,
            filled: row.get(9)?,
            counterparty_id: row.get(10)?,
            creator_id: row.get(11)?,
        })
    }

    fn into_order(self) -> Result<Order, RepositoryError> {
        Ok(Order {
            id: parse_id(&self.id)?,
            sender_pk: self.sender_pk,
            receiver_pk: self.receiver_pk,
            buy_currency: Currency::new(self.buy_currency),
            sell_currency: Currency::new(self.sell_currency),
            buy_amount: parse_amount(&self.buy_amount)?,
            sell_amount: parse_amount(&self.sell_amount)?,
            platform: self
                .platform
                .parse::<Platform>()
                .map_err(|e| RepositoryError::Corrupt(e.to_string()))?,
            signature: self.signature,
            filled: self.filled.as_deref().map(parse_time).transpose()?,
            counterparty_id: self.counterparty_id.as_deref().map(parse_id).transpose()?,
            creator_id: self.creator_id.as_deref().map(parse_id).transpose()?,
        })
    }
}

fn parse_id(s: &str) -> Result<OrderId, RepositoryError> {
    s.parse()
        .map_err(|_| RepositoryError::Corrupt(format!("order id {s:?}")))
}

fn parse_amount(s: &str) -> Result<Amount, RepositoryError> {
    s.parse()
        .map_err(|_| RepositoryError::Corrupt(format!("amount {s:?}")))
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| RepositoryError::Corrupt(format!("timestamp {s:?}")))
}

impl OrderRepository for Database {
    fn insert(&self, order: &Order) -> Result<(), RepositoryError> {
        let conn = self.lock()?;
        insert_row(&conn, order)
    }

    fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let conn = self.lock()?;
        let stored = conn
            .query_row(
                &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1"),
                params![id.0.to_string()],
                StoredOrder::from_row,
            )
            .optional()
            .map_err(backend)?;
        stored.map(StoredOrder::into_order).transpose()
    }

    fn scan(&self, filter: OrderFilter) -> Result<Vec<Order>, RepositoryError> {
        let conn = self.lock()?;
        let sql = match filter {
            OrderFilter::All => format!("SELECT {ORDER_COLUMNS} FROM orders ORDER BY seq"),
            OrderFilter::Unfilled => {
                format!("SELECT {ORDER_COLUMNS} FROM orders WHERE filled IS NULL ORDER BY seq")
            }
        };

        let mut stmt = conn.prepare(&sql).map_err(backend)?;
        let rows = stmt
            .query_map([], StoredOrder::from_row)
            .map_err(backend)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(backend)?;

        rows.into_iter().map(StoredOrder::into_order).collect()
    }

    fn record_fill(&self, fill: &Fill) -> Result<(), RepositoryError> {
        let mut conn = self.lock()?;
        // Dropping the transaction without commit rolls everything back
        let tx = conn.transaction().map_err(backend)?;

        for (side, counterparty) in [(&fill.taker, fill.maker.id), (&fill.maker, fill.taker.id)] {
            let filled = side
                .filled
                .ok_or_else(|| RepositoryError::Corrupt(format!("fill for {} has no timestamp", side.id)))?;

            let updated = tx
                .execute(
                    "UPDATE orders SET filled = ?1, counterparty_id = ?2 WHERE id = ?3 AND filled IS NULL",
                    params![format_time(filled), counterparty.0.to_string(), side.id.0.to_string()],
                )
                .map_err(backend)?;

            if updated != 1 {
                let exists: bool = tx
                    .query_row(
                        "SELECT EXISTS(SELECT 1 FROM orders WHERE id = ?1)",
                        params![side.id.0.to_string()],
                        |row| row.get(0),
                    )
                    .map_err(backend)?;
                return Err(if exists {
                    RepositoryError::Conflict(side.id)
                } else {
                    RepositoryError::NotFound(side.id)
                });
            }
        }

        if let Some(child) = &fill.child {
            insert_row(&tx, child)?;
        }

        tx.commit().map_err(backend)
    }

    fn append_log(&self, entry: &LogEntry) -> Result<(), RepositoryError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO log (logtime, message) VALUES (?1, ?2)",
            params![format_time(entry.logtime), entry.message],
        )
        .map_err(backend)?;
        Ok(())
    }

    fn logs(&self) -> Result<Vec<LogEntry>, RepositoryError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT logtime, message FROM log ORDER BY id")
            .map_err(backend)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(backend)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(backend)?;

        rows.into_iter()
            .map(|(logtime, message)| -> Result<LogEntry, RepositoryError> {
                Ok(LogEntry {
                    logtime: parse_time(&logtime)?,
                    message,
                })
            })
            .collect()
    }
}
