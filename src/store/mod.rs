//! SQLite-backed event storage with indexed queries and retention purge.
//!
//! A single connection owns all writes; WAL journaling plus a 5 second busy
//! timeout let CLI subcommands open their own read handles safely.

mod dedup;

pub use dedup::CooldownDecision;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};
use thiserror::Error;
use tracing::debug;

use crate::event::{Event, Severity, Tier};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("raw field serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Filter for [`Store::query`]; unset bounds are open.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub tier: Option<Tier>,
    pub instance_id: Option<String>,
    pub limit: Option<u32>,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Opens or creates the events database, ensuring the parent directory
    /// exists and the schema is current.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let conn = Connection::open(path)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.busy_timeout(Duration::from_secs(5))?;

        let store = Store { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS events (
                id          TEXT PRIMARY KEY,
                instance_id TEXT NOT NULL,
                timestamp   TEXT NOT NULL,
                tier        TEXT NOT NULL,
                severity    TEXT NOT NULL,
                summary     TEXT NOT NULL,
                process     TEXT,
                pid         INTEGER,
                unit        TEXT,
                detail      TEXT,
                raw_json    TEXT,
                notified    BOOLEAN DEFAULT FALSE
            );
            CREATE INDEX IF NOT EXISTS idx_events_instance_ts ON events(instance_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_tier ON events(tier, timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_dedup ON events(instance_id, tier, process, unit);
            ",
        )?;
        debug!("database schema up to date");
        Ok(())
    }

    /// Appends an event row. Events are never updated after insertion
    /// except for the notified flag.
    pub fn insert(&self, ev: &Event) -> Result<(), StoreError> {
        let raw_json = serde_json::to_string(&ev.raw_fields)?;
        self.conn.execute(
            "INSERT INTO events
                (id, instance_id, timestamp, tier, severity, summary, process, pid, unit, detail, raw_json, notified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                ev.id,
                ev.instance_id,
                format_timestamp(ev.timestamp),
                ev.tier.as_str(),
                ev.severity.as_str(),
                ev.summary,
                ev.process,
                ev.pid,
                ev.unit,
                ev.detail,
                raw_json,
                false,
            ],
        )?;
        Ok(())
    }

    /// Marks an event as notified. Idempotent.
    pub fn mark_notified(&self, id: &str) -> Result<(), StoreError> {
        self.conn
            .execute("UPDATE events SET notified = TRUE WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Returns events matching the filter, ordered by timestamp descending.
    pub fn query(&self, filter: &EventFilter) -> Result<Vec<Event>, StoreError> {
        let mut sql = String::from(
            "SELECT id, instance_id, timestamp, tier, severity, summary, process, pid, unit, detail, raw_json
             FROM events WHERE 1=1",
        );
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(since) = filter.since {
            sql.push_str(" AND timestamp >= ?");
            args.push(Box::new(format_timestamp(since)));
        }
        if let Some(until) = filter.until {
            sql.push_str(" AND timestamp <= ?");
            args.push(Box::new(format_timestamp(until)));
        }
        if let Some(tier) = filter.tier {
            sql.push_str(" AND tier = ?");
            args.push(Box::new(tier.as_str()));
        }
        if let Some(instance_id) = &filter.instance_id {
            sql.push_str(" AND instance_id = ?");
            args.push(Box::new(instance_id.clone()));
        }

        sql.push_str(" ORDER BY timestamp DESC");

        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            args.push(Box::new(limit));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), scan_event)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Deletes events older than the retention window; returns how many
    /// rows were removed.
    pub fn purge(&self, retention: Duration) -> Result<usize, StoreError> {
        let cutoff = Utc::now() - retention;
        let removed = self.conn.execute(
            "DELETE FROM events WHERE timestamp < ?1",
            params![format_timestamp(cutoff)],
        )?;
        Ok(removed)
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count)
    }
}

/// Fixed-width UTC formatting keeps lexicographic and chronological order
/// identical for the TEXT timestamp column.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn scan_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    let ts: String = row.get(2)?;
    let tier: String = row.get(3)?;
    let severity: String = row.get(4)?;
    let raw_json: Option<String> = row.get(10)?;

    let timestamp = DateTime::parse_from_rfc3339(&ts)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| conversion_error(2, err))?;
    let tier = Tier::from_str(&tier).map_err(|err| conversion_error(3, err))?;
    let severity = Severity::from_str(&severity).map_err(|err| conversion_error(4, err))?;
    let raw_fields = raw_json
        .as_deref()
        .filter(|s| !s.is_empty())
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();

    Ok(Event {
        id: row.get(0)?,
        instance_id: row.get(1)?,
        timestamp,
        tier,
        severity,
        summary: row.get(5)?,
        process: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        pid: row.get::<_, Option<i64>>(7)?.unwrap_or_default(),
        unit: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        detail: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
        raw_fields,
    })
}

fn conversion_error(
    column: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}
