//! Compliance audit trail for the safety path.
//!
//! Every assessment and every protocol transition is appended here,
//! regardless of outcome. The sink is an external collaborator in
//! production; the SQLite implementation below is the default adapter and
//! the in-memory one backs tests.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::safety::protocol::{ProtocolState, TransitionCause};
use crate::types::RiskLevel;

/// What happened on the safety path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEvent {
    Assessment {
        assessment_id: Uuid,
        level: RiskLevel,
        score: f64,
        triggers: Vec<String>,
        degraded_inputs: bool,
    },
    Transition {
        from: ProtocolState,
        to: ProtocolState,
        cause: TransitionCause,
    },
}

/// One appended audit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub user_id: String,
    pub session_id: String,
    pub at: DateTime<Utc>,
    pub event: AuditEvent,
}

impl AuditRecord {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>, event: AuditEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            at: Utc::now(),
            event,
        }
    }
}

/// Append-only audit collaborator.
pub trait AuditSink: Send + Sync + fmt::Debug {
    fn append(&self, record: &AuditRecord) -> Result<(), anyhow::Error>;
}

/// SQLite-backed audit log.
///
/// Opens a connection per append; audit volume is one row per turn plus
/// transitions, so connection churn is not a concern here.
#[derive(Debug)]
pub struct SqliteAuditLog {
    pub db_path: PathBuf,
}

impl SqliteAuditLog {
    pub fn new(db_path: PathBuf) -> Result<Self, anyhow::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let log = Self { db_path };
        log.initialize_db()?;
        Ok(log)
    }

    fn initialize_db(&self) -> Result<(), anyhow::Error> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS safety_audit (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                at TEXT NOT NULL,
                event TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Load all records for a session, oldest first.
    pub fn records_for_session(&self, session_id: &str) -> Result<Vec<AuditRecord>, anyhow::Error> {
        let conn = Connection::open(&self.db_path)?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, session_id, at, event FROM safety_audit
             WHERE session_id = ?1 ORDER BY at ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            let id: String = row.get(0)?;
            let user_id: String = row.get(1)?;
            let session_id: String = row.get(2)?;
            let at: String = row.get(3)?;
            let event: String = row.get(4)?;
            Ok((id, user_id, session_id, at, event))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, user_id, session_id, at, event) = row?;
            records.push(AuditRecord {
                id: id.parse()?,
                user_id,
                session_id,
                at: at.parse()?,
                event: serde_json::from_str(&event)?,
            });
        }
        Ok(records)
    }
}

impl AuditSink for SqliteAuditLog {
    fn append(&self, record: &AuditRecord) -> Result<(), anyhow::Error> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "INSERT INTO safety_audit (id, user_id, session_id, at, event)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id.to_string(),
                record.user_id,
                record.session_id,
                record.at.to_rfc3339(),
                serde_json::to_string(&record.event)?,
            ],
        )?;
        Ok(())
    }
}

/// In-memory audit log for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditLog {
    fn append(&self, record: &AuditRecord) -> Result<(), anyhow::Error> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}
