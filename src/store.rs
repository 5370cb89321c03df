//! Lead / Thread / Message persistence
//!
//! SQLite with unique keys on the thread id, the message id and each contact field, so a
//! replayed message or a racing invocation converges on existing rows instead of adding
//! new ones.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::error::{IngestError, Result};
use crate::models::{Classification, LeadSource};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS leads (
    id              TEXT PRIMARY KEY,
    first_name      TEXT NOT NULL,
    last_name       TEXT NOT NULL,
    email           TEXT UNIQUE,
    phone           TEXT UNIQUE,
    source          TEXT NOT NULL,
    origin_address  TEXT NOT NULL,
    intent          TEXT NOT NULL,
    urgency         TEXT NOT NULL,
    temperature     TEXT NOT NULL,
    lead_type       TEXT NOT NULL,
    status          TEXT NOT NULL DEFAULT 'new',
    vehicle         TEXT,
    vehicle_url     TEXT,
    notes           TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS threads (
    thread_id        TEXT PRIMARY KEY,
    lead_id          TEXT NOT NULL REFERENCES leads(id),
    participants     TEXT NOT NULL,
    first_message_at TEXT NOT NULL,
    last_message_at  TEXT NOT NULL,
    message_count    INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS messages (
    message_id    TEXT PRIMARY KEY,
    thread_id     TEXT NOT NULL REFERENCES threads(thread_id),
    lead_id       TEXT NOT NULL REFERENCES leads(id),
    sender        TEXT NOT NULL,
    recipient     TEXT NOT NULL,
    plain_body    TEXT NOT NULL,
    html_body     TEXT NOT NULL,
    clean_message TEXT,
    received_at   TEXT NOT NULL,
    source        TEXT NOT NULL,
    parsed        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_threads_lead ON threads(lead_id);
CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id);
";

/// Lead to create when nothing matched
#[derive(Debug, Clone)]
pub struct NewLead {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub source: LeadSource,
    pub origin_address: String,
    pub classification: Classification,
    pub vehicle: Option<String>,
    pub vehicle_url: Option<String>,
    pub notes: String,
}

/// Stored lead, as read back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadRecord {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub source: String,
    pub lead_type: String,
    pub temperature: String,
    pub status: String,
    pub vehicle: Option<String>,
    pub notes: String,
}

#[derive(Debug, Clone)]
pub struct NewThread {
    pub thread_id: String,
    pub lead_id: String,
    pub participants: Vec<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRecord {
    pub thread_id: String,
    pub lead_id: String,
    pub message_count: i64,
    pub first_message_at: String,
    pub last_message_at: String,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub message_id: String,
    pub thread_id: String,
    pub lead_id: String,
    pub sender: String,
    pub recipient: String,
    pub plain_body: String,
    pub html_body: String,
    pub clean_message: Option<String>,
    pub received_at: DateTime<Utc>,
    pub source: LeadSource,
    /// Serialized parse result
    pub parsed: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub leads: u64,
    pub threads: u64,
    pub messages: u64,
}

/// Row-level operations, run against the database or an open transaction
pub trait LeadRepository {
    fn find_thread(&self, thread_id: &str) -> Result<Option<ThreadRecord>>;

    /// Lead id matching the contact: by either field when both are given
    fn find_lead_by_contact(&self, email: Option<&str>, phone: Option<&str>)
        -> Result<Option<String>>;

    /// Insert a lead, or return the id of the lead that already owns its contact fields
    fn insert_lead(&self, lead: &NewLead) -> Result<String>;

    /// Insert a thread; an existing thread id is left untouched
    fn insert_thread(&self, thread: &NewThread) -> Result<()>;

    /// Bump message count and last-seen
    fn touch_thread(&self, thread_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Append a message; `false` when the message id was already stored
    fn insert_message(&self, message: &NewMessage) -> Result<bool>;

    fn get_lead(&self, lead_id: &str) -> Result<Option<LeadRecord>>;

    fn counts(&self) -> Result<StoreCounts>;
}

/// Shared store used by the pipeline
pub trait LeadStore: LeadRepository + Send + Sync {
    /// Run `work` as one unit: an error from it rolls back every write it made
    fn atomically(&self, work: &mut dyn FnMut(&dyn LeadRepository) -> Result<()>) -> Result<()>;
}

/// SQLite-backed store; one connection behind a mutex
pub struct SqliteLeadStore {
    conn: Mutex<Connection>,
}

impl SqliteLeadStore {
    /// Open (or create) the database file and apply the schema
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| IngestError::StoreUnavailable(format!("connection lock poisoned: {}", e)))
    }
}

/// Serde name of an enum value (`"hot"`, `"trade_in_request"`, ...)
fn label<T: Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

impl LeadRepository for Connection {
    fn find_thread(&self, thread_id: &str) -> Result<Option<ThreadRecord>> {
        let thread = self
            .query_row(
                "SELECT thread_id, lead_id, message_count, first_message_at, last_message_at
                 FROM threads WHERE thread_id = ?1",
                params![thread_id],
                |row| {
                    Ok(ThreadRecord {
                        thread_id: row.get(0)?,
                        lead_id: row.get(1)?,
                        message_count: row.get(2)?,
                        first_message_at: row.get(3)?,
                        last_message_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(thread)
    }

    fn find_lead_by_contact(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Option<String>> {
        let found = match (email, phone) {
            (Some(email), Some(phone)) => self
                .query_row(
                    "SELECT id FROM leads WHERE email = ?1 OR phone = ?2
                     ORDER BY CASE WHEN email = ?1 THEN 0 ELSE 1 END, created_at LIMIT 1",
                    params![email, phone],
                    |row| row.get(0),
                )
                .optional()?,
            (Some(email), None) => self
                .query_row(
                    "SELECT id FROM leads WHERE email = ?1 LIMIT 1",
                    params![email],
                    |row| row.get(0),
                )
                .optional()?,
            (None, Some(phone)) => self
                .query_row(
                    "SELECT id FROM leads WHERE phone = ?1 LIMIT 1",
                    params![phone],
                    |row| row.get(0),
                )
                .optional()?,
            (None, None) => None,
        };
        Ok(found)
    }

    fn insert_lead(&self, lead: &NewLead) -> Result<String> {
        let id = Uuid::new_v4().to_string();

        let inserted = self.execute(
            "INSERT INTO leads (
                id, first_name, last_name, email, phone, source, origin_address,
                intent, urgency, temperature, lead_type, vehicle, vehicle_url, notes, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT DO NOTHING",
            params![
                id,
                lead.first_name,
                lead.last_name,
                lead.email,
                lead.phone,
                lead.source.as_str(),
                lead.origin_address,
                label(&lead.classification.intent)?,
                label(&lead.classification.urgency)?,
                label(&lead.classification.temperature)?,
                label(&lead.classification.tag)?,
                lead.vehicle,
                lead.vehicle_url,
                lead.notes,
                Utc::now().to_rfc3339(),
            ],
        )?;

        if inserted == 1 {
            debug!("Created lead {}", id);
            return Ok(id);
        }

        // Another writer owns one of the contact fields
        self.find_lead_by_contact(lead.email.as_deref(), lead.phone.as_deref())?
            .ok_or(IngestError::PersistenceError(
                rusqlite::Error::QueryReturnedNoRows,
            ))
    }

    fn insert_thread(&self, thread: &NewThread) -> Result<()> {
        let at = thread.started_at.to_rfc3339();
        self.execute(
            "INSERT INTO threads (thread_id, lead_id, participants, first_message_at, last_message_at, message_count)
             VALUES (?1, ?2, ?3, ?4, ?4, 1)
             ON CONFLICT(thread_id) DO NOTHING",
            params![
                thread.thread_id,
                thread.lead_id,
                thread.participants.join(", "),
                at
            ],
        )?;
        Ok(())
    }

    fn touch_thread(&self, thread_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.execute(
            "UPDATE threads
             SET message_count = message_count + 1,
                 last_message_at = MAX(last_message_at, ?2)
             WHERE thread_id = ?1",
            params![thread_id, at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn insert_message(&self, message: &NewMessage) -> Result<bool> {
        let inserted = self.execute(
            "INSERT INTO messages (
                message_id, thread_id, lead_id, sender, recipient, plain_body, html_body,
                clean_message, received_at, source, parsed
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(message_id) DO NOTHING",
            params![
                message.message_id,
                message.thread_id,
                message.lead_id,
                message.sender,
                message.recipient,
                message.plain_body,
                message.html_body,
                message.clean_message,
                message.received_at.to_rfc3339(),
                message.source.as_str(),
                message.parsed,
            ],
        )?;
        Ok(inserted == 1)
    }

    fn get_lead(&self, lead_id: &str) -> Result<Option<LeadRecord>> {
        let lead = self
            .query_row(
                "SELECT id, first_name, last_name, email, phone, source, lead_type, temperature,
                        status, vehicle, notes
                 FROM leads WHERE id = ?1",
                params![lead_id],
                |row| {
                    Ok(LeadRecord {
                        id: row.get(0)?,
                        first_name: row.get(1)?,
                        last_name: row.get(2)?,
                        email: row.get(3)?,
                        phone: row.get(4)?,
                        source: row.get(5)?,
                        lead_type: row.get(6)?,
                        temperature: row.get(7)?,
                        status: row.get(8)?,
                        vehicle: row.get(9)?,
                        notes: row.get(10)?,
                    })
                },
            )
            .optional()?;
        Ok(lead)
    }

    fn counts(&self) -> Result<StoreCounts> {
        let count = |table: &str| -> Result<u64> {
            let n: i64 =
                self.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
            Ok(n as u64)
        };

        Ok(StoreCounts {
            leads: count("leads")?,
            threads: count("threads")?,
            messages: count("messages")?,
        })
    }
}

impl LeadRepository for SqliteLeadStore {
    fn find_thread(&self, thread_id: &str) -> Result<Option<ThreadRecord>> {
        self.conn()?.find_thread(thread_id)
    }

    fn find_lead_by_contact(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Option<String>> {
        self.conn()?.find_lead_by_contact(email, phone)
    }

    fn insert_lead(&self, lead: &NewLead) -> Result<String> {
        self.conn()?.insert_lead(lead)
    }

    fn insert_thread(&self, thread: &NewThread) -> Result<()> {
        self.conn()?.insert_thread(thread)
    }

    fn touch_thread(&self, thread_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.conn()?.touch_thread(thread_id, at)
    }

    fn insert_message(&self, message: &NewMessage) -> Result<bool> {
        self.conn()?.insert_message(message)
    }

    fn get_lead(&self, lead_id: &str) -> Result<Option<LeadRecord>> {
        self.conn()?.get_lead(lead_id)
    }

    fn counts(&self) -> Result<StoreCounts> {
        self.conn()?.counts()
    }
}

impl LeadStore for SqliteLeadStore {
    fn atomically(&self, work: &mut dyn FnMut(&dyn LeadRepository) -> Result<()>) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        // Dropping the transaction on error rolls it back
        work(&*tx)?;
        tx.commit()?;
        Ok(())
    }
}
