use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::QueueError;
use crate::settings::{DefaultSettings, SettingsScope};
use crate::store::{GenerationRecordStore, SettingsStore};
use crate::types::{GenerationRecord, Sampler};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS image_generations (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id      TEXT NOT NULL,
    sort_order      INTEGER NOT NULL,
    member_id       TEXT,
    prompt          TEXT NOT NULL,
    negative_prompt TEXT NOT NULL DEFAULT '',
    sampler_name    TEXT NOT NULL,
    use_hires_fix   INTEGER NOT NULL DEFAULT 0,
    seed            INTEGER NOT NULL,
    subseed         INTEGER,
    subseed_strength REAL NOT NULL DEFAULT 0,
    width           INTEGER NOT NULL,
    height          INTEGER NOT NULL,
    created_at      TEXT NOT NULL,
    UNIQUE(message_id, sort_order)
);

CREATE TABLE IF NOT EXISTS default_settings (
    scope           TEXT PRIMARY KEY,
    width           INTEGER NOT NULL,
    height          INTEGER NOT NULL,
    batch_count     INTEGER NOT NULL,
    batch_size      INTEGER NOT NULL,
    updated_at      TEXT NOT NULL
);
"#;

const RECORD_COLUMNS: &str = "id, message_id, sort_order, member_id, prompt, negative_prompt, \
     sampler_name, use_hires_fix, seed, subseed, subseed_strength, width, height, created_at";

/// Open (or create) the bot database. Pass `None` for an in-memory database.
pub fn open_database(path: Option<&Path>) -> Result<Connection> {
    let conn = match path {
        Some(p) => Connection::open(p).context("Failed to open invision database")?,
        None => Connection::open_in_memory().context("Failed to open in-memory database")?,
    };

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
    .context("Failed to set PRAGMA options")?;

    conn.execute_batch(SCHEMA)
        .context("Failed to create invision schema")?;

    Ok(conn)
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<GenerationRecord> {
    let sampler_name: String = row.get(6)?;
    let sampler = Sampler::parse(&sampler_name).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            format!("unknown sampler '{}'", sampler_name).into(),
        )
    })?;
    Ok(GenerationRecord {
        id: Some(row.get(0)?),
        message_id: row.get(1)?,
        sort_order: row.get(2)?,
        member_id: row.get(3)?,
        prompt: row.get(4)?,
        negative_prompt: row.get(5)?,
        sampler,
        use_hires_fix: row.get(7)?,
        seed: row.get(8)?,
        subseed: row.get(9)?,
        subseed_strength: row.get(10)?,
        width: row.get(11)?,
        height: row.get(12)?,
        created_at: Some(row.get(13)?),
    })
}

/// Insert a generation record. Returns the stored record with id and timestamp.
pub fn insert_record(conn: &Connection, record: &GenerationRecord) -> Result<GenerationRecord> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO image_generations
            (message_id, sort_order, member_id, prompt, negative_prompt,
             sampler_name, use_hires_fix, seed, subseed, subseed_strength,
             width, height, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            record.message_id,
            record.sort_order,
            record.member_id,
            record.prompt,
            record.negative_prompt,
            record.sampler.as_str(),
            record.use_hires_fix,
            record.seed,
            record.subseed,
            record.subseed_strength,
            record.width,
            record.height,
            now,
        ],
    )
    .with_context(|| {
        format!(
            "Failed to insert generation record ({}, {})",
            record.message_id, record.sort_order
        )
    })?;

    let mut stored = record.clone();
    stored.id = Some(conn.last_insert_rowid());
    stored.created_at = Some(now);
    Ok(stored)
}

/// Get the record for image `sort_order` of the grid hosted by `message_id`.
pub fn get_record(
    conn: &Connection,
    message_id: &str,
    sort_order: u32,
) -> Result<Option<GenerationRecord>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM image_generations WHERE message_id = ?1 AND sort_order = ?2",
            RECORD_COLUMNS
        ),
        params![message_id, sort_order],
        record_from_row,
    )
    .optional()
    .context("Failed to query generation record")
}

/// All records for one message, in grid order.
pub fn list_records_by_message(conn: &Connection, message_id: &str) -> Result<Vec<GenerationRecord>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM image_generations WHERE message_id = ?1 ORDER BY sort_order ASC",
            RECORD_COLUMNS
        ))
        .context("Failed to prepare list_records_by_message query")?;

    let rows = stmt
        .query_map(params![message_id], record_from_row)
        .context("Failed to execute list_records_by_message query")?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row.context("Failed to read generation record row")?);
    }
    Ok(records)
}

/// Delete records older than the specified number of days.
/// Returns the number of records deleted.
pub fn prune_old_records(conn: &Connection, days: u32) -> Result<u32> {
    let cutoff = chrono::Utc::now() - chrono::Duration::days(days as i64);
    let count = conn
        .execute(
            "DELETE FROM image_generations WHERE created_at < ?1",
            params![cutoff.to_rfc3339()],
        )
        .context("Failed to prune old generation records")?;
    Ok(count as u32)
}

pub fn get_settings(conn: &Connection, scope_key: &str) -> Result<Option<DefaultSettings>> {
    conn.query_row(
        "SELECT width, height, batch_count, batch_size, updated_at
         FROM default_settings WHERE scope = ?1",
        params![scope_key],
        |row| {
            Ok(DefaultSettings {
                width: row.get(0)?,
                height: row.get(1)?,
                batch_count: row.get(2)?,
                batch_size: row.get(3)?,
                updated_at: Some(row.get(4)?),
            })
        },
    )
    .optional()
    .context("Failed to query default settings")
}

/// Insert or replace the settings for a scope, stamping `updated_at`.
pub fn upsert_settings(
    conn: &Connection,
    scope_key: &str,
    settings: &DefaultSettings,
) -> Result<DefaultSettings> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO default_settings (scope, width, height, batch_count, batch_size, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(scope) DO UPDATE SET
            width = excluded.width,
            height = excluded.height,
            batch_count = excluded.batch_count,
            batch_size = excluded.batch_size,
            updated_at = excluded.updated_at",
        params![
            scope_key,
            settings.width,
            settings.height,
            settings.batch_count,
            settings.batch_size,
            now,
        ],
    )
    .context("Failed to upsert default settings")?;

    let mut stored = settings.clone();
    stored.updated_at = Some(now);
    Ok(stored)
}

/// SQLite-backed implementation of both storage ports.
///
/// Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, or in memory for `None`.
    pub fn open(path: Option<&Path>) -> Result<Self, QueueError> {
        let conn = open_database(path).map_err(QueueError::persistence)?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T, QueueError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| QueueError::Persistence(e.to_string()))?;
        f(&conn).map_err(QueueError::persistence)
    }

    pub fn list_by_message(&self, message_id: &str) -> Result<Vec<GenerationRecord>, QueueError> {
        self.with_conn(|conn| list_records_by_message(conn, message_id))
    }

    /// Delete generation records older than `days`. Returns the number deleted.
    pub fn prune_older_than(&self, days: u32) -> Result<u32, QueueError> {
        let pruned = self.with_conn(|conn| prune_old_records(conn, days))?;
        if pruned > 0 {
            tracing::info!(pruned, days, "Pruned old generation records");
        }
        Ok(pruned)
    }
}

#[async_trait]
impl GenerationRecordStore for SqliteStore {
    async fn create(&self, record: GenerationRecord) -> Result<GenerationRecord, QueueError> {
        self.with_conn(|conn| insert_record(conn, &record))
    }

    async fn get_by_message_and_sort(
        &self,
        message_id: &str,
        sort_order: u32,
    ) -> Result<GenerationRecord, QueueError> {
        self.with_conn(|conn| get_record(conn, message_id, sort_order))?
            .ok_or_else(|| {
                QueueError::NotFound(format!("image #{} of message {}", sort_order, message_id))
            })
    }
}

#[async_trait]
impl SettingsStore for SqliteStore {
    async fn get(&self, scope: &SettingsScope) -> Result<Option<DefaultSettings>, QueueError> {
        self.with_conn(|conn| get_settings(conn, &scope.key()))
    }

    async fn upsert(
        &self,
        scope: &SettingsScope,
        settings: &DefaultSettings,
    ) -> Result<DefaultSettings, QueueError> {
        self.with_conn(|conn| upsert_settings(conn, &scope.key(), settings))
    }
}
