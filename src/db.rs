use crate::error::{AuctionError, Result};
use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared handle to the auction database.
///
/// A single connection behind a mutex: every write goes through one writer,
/// so "read max, insert max + 1" inside a transaction cannot interleave.
/// UNIQUE constraints on serial/team numbers and on sales.player_id are the
/// backstop if anything ever writes around this handle.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file and make sure the schema exists.
    pub fn open(path: &Path, busy_timeout: Duration) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;
        conn.busy_timeout(busy_timeout)
            .context("Failed to set busy timeout")?;
        setup_database(&conn).context("Failed to set up schema")?;
        tracing::info!(path = ?path, "Database opened");

        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Database {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `f` with the connection. The lock is released when `f` returns,
    /// so never call this across an `.await`.
    pub fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|_| AuctionError::Storage("database lock poisoned".to_string()))?;
        f(&conn)
    }

    /// Run `f` inside a transaction; commits only if `f` succeeds.
    pub fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| AuctionError::Storage("database lock poisoned".to_string()))?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

/// Event for audit trail ("every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl AuditEvent {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery (in-memory databases report "memory")
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Players
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS players (
            id TEXT PRIMARY KEY,
            serial_no INTEGER NOT NULL UNIQUE,
            name TEXT NOT NULL,
            dob TEXT,
            age INTEGER,
            category TEXT,
            village TEXT,
            mobile_no TEXT,
            batting_style TEXT,
            bowling_style TEXT,
            economically_weaker TEXT NOT NULL DEFAULT 'No',
            base_price REAL NOT NULL DEFAULT 0,
            profile_photo TEXT,
            status TEXT NOT NULL DEFAULT 'Available',
            -- sale cache, rebuilt from sales by reconciliation
            sold_to TEXT,
            sold_price REAL,
            sold_at TEXT,
            team_name TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Leaders / Teams
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS leaders (
            id TEXT PRIMARY KEY,
            team_name TEXT NOT NULL,
            team_number INTEGER NOT NULL UNIQUE,
            team_logo TEXT,
            leader_name TEXT NOT NULL,
            leader_village TEXT,
            leader_mobile_no TEXT,
            icon_player TEXT,
            icon_player_mobile_no TEXT,
            max_amount REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS roster_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            leader_id TEXT NOT NULL REFERENCES leaders(id) ON DELETE CASCADE,
            player_id TEXT NOT NULL UNIQUE,
            player_name TEXT NOT NULL,
            sold_amount REAL NOT NULL,
            category TEXT,
            added_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Sale ledger (append-only, one row per player)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sales (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            sale_id TEXT UNIQUE NOT NULL,
            player_id TEXT UNIQUE NOT NULL,
            player_name TEXT NOT NULL,
            player_category TEXT,
            player_base_price REAL NOT NULL DEFAULT 0,
            player_photo TEXT,
            team_id TEXT NOT NULL,
            team_name TEXT NOT NULL,
            team_logo TEXT,
            leader_name TEXT NOT NULL,
            amount REAL NOT NULL,
            sold_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_players_status ON players(status)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_leaders_mobile ON leaders(leader_mobile_no)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_leaders_team_name ON leaders(team_name COLLATE NOCASE)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_roster_leader ON roster_entries(leader_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sales_team ON sales(team_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &AuditEvent) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Audit writes never fail the operation they describe.
pub(crate) fn record_event(conn: &Connection, event: AuditEvent) {
    if let Err(e) = insert_event(conn, &event) {
        tracing::warn!(
            event_type = %event.event_type,
            entity_id = %event.entity_id,
            error = %e,
            "Failed to write audit event"
        );
    }
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<AuditEvent>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(AuditEvent {
                event_id: row.get(0)?,
                timestamp: parse_timestamp(1, &timestamp_str)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        5,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?,
                actor: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(events)
}

/// Parse an RFC 3339 column into UTC
pub(crate) fn parse_timestamp(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn parse_optional_timestamp(
    idx: usize,
    s: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_timestamp(idx, &s)).transpose()
}

/// Count rows of a table (tables are fixed names, never user input)
pub fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
        row.get(0)
    })?;
    Ok(count)
}

/// Next value of a sequential number column: max + 1, starting at 1
pub(crate) fn next_number(conn: &Connection, table: &str, column: &str) -> Result<i64> {
    let max: Option<i64> = conn
        .query_row(&format!("SELECT MAX({}) FROM {}", column, table), [], |row| {
            row.get(0)
        })
        .optional()?
        .flatten();
    Ok(max.unwrap_or(0) + 1)
}
