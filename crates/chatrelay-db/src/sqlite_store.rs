use async_trait::async_trait;
use chatrelay_common::{ConversationId, Error, Result, Turn, TurnRole};
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{Connection, params};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{info, instrument, warn};

use crate::migrations;
use crate::record::{TurnRecord, derive_batch, format_timestamp, parse_timestamp};
use crate::turn_store::TurnStore;

/// SQLite-backed turn store. Every `persist` call runs in one transaction.
pub struct SqliteTurnStore {
    conn: Mutex<Connection>,
}

impl SqliteTurnStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening turn store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.connection()?;
        migrations::apply(&conn)?;
        Ok(())
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("turn database lock poisoned".into()))
    }

    fn records_sync(&self, conversation_id: &ConversationId) -> Result<Vec<TurnRecord>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, conversation_id, role, content, metadata, created_at, updated_at
                 FROM turns
                 WHERE conversation_id = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare turn query: {e}")))?;

        let rows = stmt
            .query_map(params![conversation_id.as_str()], row_to_record)
            .map_err(|e| Error::Database(format!("failed to execute turn query: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to collect turn rows: {e}")))
    }

    fn persist_sync(&self, conversation_id: &ConversationId, turns: &[Turn]) -> Result<Vec<String>> {
        let stored = derive_batch(conversation_id, turns)?;
        let now = format_timestamp(Utc::now());

        let mut conn = self.connection()?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;

        tx.execute(
            "INSERT INTO conversations (id, created_at, updated_at) VALUES (?1, ?2, ?2)
             ON CONFLICT(id) DO NOTHING",
            params![conversation_id.as_str(), now],
        )
        .map_err(|e| Error::Database(format!("failed to upsert conversation: {e}")))?;

        let mut ids = Vec::with_capacity(stored.len());
        for turn in stored {
            let metadata = turn.metadata_json()?;
            tx.execute(
                "INSERT INTO turns (
                    id, conversation_id, role, content, metadata, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                ON CONFLICT(id) DO UPDATE SET
                    content = excluded.content,
                    metadata = excluded.metadata,
                    updated_at = excluded.updated_at",
                params![
                    turn.id,
                    turn.conversation_id,
                    turn.role.as_str(),
                    turn.content,
                    metadata,
                    now,
                ],
            )
            .map_err(|e| Error::Database(format!("failed to upsert turn {}: {e}", turn.id)))?;
            ids.push(turn.id);
        }

        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit turns: {e}")))?;

        Ok(ids)
    }
}

#[async_trait]
impl TurnStore for SqliteTurnStore {
    fn backend(&self) -> &str {
        "sqlite"
    }

    async fn records(&self, conversation_id: &ConversationId) -> Result<Vec<TurnRecord>> {
        self.records_sync(conversation_id)
    }

    #[instrument(skip(self, turns), fields(conversation_id = %conversation_id, count = turns.len()))]
    async fn persist(&self, conversation_id: &ConversationId, turns: &[Turn]) -> Result<Vec<String>> {
        self.persist_sync(conversation_id, turns)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<TurnRecord> {
    let role_str: String = row.get(2)?;
    let role = role_str
        .parse::<TurnRole>()
        .map_err(|e| conversion_error(2, e))?;

    let metadata_str: Option<String> = row.get(4)?;
    let metadata = metadata_str.and_then(|raw| {
        match serde_json::from_str::<Map<String, Value>>(&raw) {
            Ok(map) if !map.is_empty() => Some(map),
            Ok(_) => None,
            Err(e) => {
                warn!("ignoring unreadable turn metadata: {e}");
                None
            }
        }
    });

    let created_at_str: String = row.get(5)?;
    let created_at = parse_timestamp(&created_at_str).map_err(|e| conversion_error(5, e))?;
    let updated_at_str: String = row.get(6)?;
    let updated_at = parse_timestamp(&updated_at_str).map_err(|e| conversion_error(6, e))?;

    Ok(TurnRecord {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role,
        content: row.get(3)?,
        metadata,
        created_at,
        updated_at,
    })
}

fn conversion_error(column: usize, err: Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        Type::Text,
        Box::new(std::io::Error::other(err.to_string())),
    )
}
