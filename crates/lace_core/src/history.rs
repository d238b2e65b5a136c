//! Per-connection query history: an append-only log capped at a configurable
//! size, persisted to `<data_dir>/history/<connection_id>.json` mode 0600.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::DbError;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Statement kind, detected from the leading keyword of the SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryEntryType {
    Query,
    Select,
    Update,
    Delete,
    Insert,
    Ddl,
}

impl HistoryEntryType {
    /// Classify `sql` by its first keyword, case-insensitively, skipping
    /// leading whitespace. Anything not recognised falls back to `Query`.
    pub fn detect(sql: &str) -> Self {
        let first_word = sql
            .trim_start()
            .split(|c: char| c.is_whitespace() || c == '(')
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();

        match first_word.as_str() {
            "SELECT" | "WITH" => Self::Select,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "INSERT" => Self::Insert,
            "CREATE" | "ALTER" | "DROP" | "TRUNCATE" => Self::Ddl,
            _ => Self::Query,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sql: String,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub entry_type: HistoryEntryType,
}

impl HistoryEntry {
    pub fn new(sql: impl Into<String>) -> Self {
        let sql = sql.into();
        let entry_type = HistoryEntryType::detect(&sql);
        Self { sql, timestamp: chrono::Utc::now().timestamp(), entry_type }
    }
}

/// Append-only history for a single connection. Size-capped: pushing past
/// `max_entries` evicts the oldest entry first, never the newest.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    connection_id: Uuid,
    entries: Vec<HistoryEntry>,
    max_entries: usize,
}

impl HistoryLog {
    pub const DEFAULT_MAX_ENTRIES: usize = 1000;

    pub fn new(connection_id: Uuid) -> Self {
        Self { connection_id, entries: Vec::new(), max_entries: Self::DEFAULT_MAX_ENTRIES }
    }

    pub fn with_max_entries(connection_id: Uuid, max_entries: usize) -> Self {
        Self { connection_id, entries: Vec::new(), max_entries: max_entries.max(1) }
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn push(&mut self, sql: impl Into<String>) {
        if self.entries.len() >= self.max_entries {
            self.entries.remove(0);
        }
        self.entries.push(HistoryEntry::new(sql));
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Persists a `HistoryLog` to `<data_dir>/history/<connection_id>.json`.
/// In-memory mode (no persistence) is just a `HistoryLog` used directly;
/// this wraps one with a path and enforces 0600 on save.
pub struct HistoryStore {
    path: PathBuf,
    log: HistoryLog,
}

impl HistoryStore {
    pub fn open(connection_id: Uuid) -> Result<Self, DbError> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| DbError::IoError(std::io::Error::other("could not resolve data directory")))?;
        let history_dir = data_dir.join("lace").join("history");
        std::fs::create_dir_all(&history_dir).map_err(DbError::IoError)?;
        Self::at_path(connection_id, history_dir.join(format!("{}.json", connection_id)))
    }

    pub fn at_path(connection_id: Uuid, path: PathBuf) -> Result<Self, DbError> {
        let entries = Self::load(&path)?;
        let mut log = HistoryLog::new(connection_id);
        log.entries = entries;
        Ok(Self { path, log })
    }

    fn load(path: &PathBuf) -> Result<Vec<HistoryEntry>, DbError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(path).map_err(DbError::IoError)?;
        serde_json::from_str(&content).or_else(|_| Ok(Vec::new()))
    }

    pub fn log(&self) -> &HistoryLog {
        &self.log
    }

    pub fn push(&mut self, sql: impl Into<String>) {
        self.log.push(sql);
    }

    pub fn save(&self) -> Result<(), DbError> {
        let content = serde_json::to_string_pretty(&self.log.entries)
            .map_err(|e| DbError::InvalidProfile(e.to_string()))?;
        std::fs::write(&self.path, content).map_err(DbError::IoError)?;
        enforce_owner_only(&self.path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn enforce_owner_only(path: &std::path::Path) -> Result<(), DbError> {
    let mut perms = std::fs::metadata(path).map_err(DbError::IoError)?.permissions();
    perms.set_mode(0o600);
    std::fs::set_permissions(path, perms).map_err(DbError::IoError)
}

#[cfg(not(unix))]
fn enforce_owner_only(_path: &std::path::Path) -> Result<(), DbError> {
    Ok(())
}
