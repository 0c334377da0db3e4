//! SQLite storage layer -- schema, queries, and the event source seam.

pub mod schema;

use crate::analysis::{AnalyticsError, RawEvent};
use anyhow::{Context, Result};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Layout written to `occurred_at`: naive UTC, fractional seconds only when present.
pub const STORED_LAYOUT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Render an instant in the single layout the store writes.
pub fn stored_timestamp<Tz: chrono::TimeZone>(ts: &chrono::DateTime<Tz>) -> String {
    ts.naive_utc().format(STORED_LAYOUT).to_string()
}

/// Record one access event. `occurred_at` is stored as given (UTC).
pub fn insert_event(pool: &Pool, occurred_at: &str, status: &str) -> Result<i64> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO access_events (occurred_at, status) VALUES (?1, ?2)",
        rusqlite::params![occurred_at, status],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Where access events come from. Implementations own retry and timeout
/// policy; the analytics core only sees rows or `UpstreamUnavailable`.
pub trait EventSource: Send + Sync {
    /// Every stored event, in no particular order.
    fn fetch_events(&self) -> Result<Vec<RawEvent>, AnalyticsError>;
}

/// [`EventSource`] backed by the `access_events` table.
#[derive(Clone)]
pub struct SqliteEventSource {
    pool: Pool,
}

impl SqliteEventSource {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

fn upstream<E: std::fmt::Display>(e: E) -> AnalyticsError {
    AnalyticsError::UpstreamUnavailable(e.to_string())
}

impl EventSource for SqliteEventSource {
    fn fetch_events(&self) -> Result<Vec<RawEvent>, AnalyticsError> {
        let conn = self.pool.get().map_err(upstream)?;
        let mut stmt = conn
            .prepare("SELECT occurred_at, status FROM access_events")
            .map_err(upstream)?;

        let rows = stmt
            .query_map([], |row| {
                Ok(RawEvent {
                    timestamp: row.get(0)?,
                    status: row.get(1)?,
                })
            })
            .map_err(upstream)?;

        let events = rows.collect::<Result<Vec<_>, _>>().map_err(upstream)?;
        tracing::debug!(rows = events.len(), "fetched access events");
        Ok(events)
    }
}

/// Fixed in-memory [`EventSource`], handy for tests and offline runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventSource {
    events: Vec<RawEvent>,
}

impl MemoryEventSource {
    pub fn new(events: Vec<RawEvent>) -> Self {
        Self { events }
    }
}

impl EventSource for MemoryEventSource {
    fn fetch_events(&self) -> Result<Vec<RawEvent>, AnalyticsError> {
        Ok(self.events.clone())
    }
}
