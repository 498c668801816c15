//! Storage layer for qrattend.
//!
//! A small `SQLite` key-value store. The attendance log lives under a single
//! key as a JSON array; the capacity cap is enforced by the engine, not here.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::config::DEFAULT_LOG_KEY;
use crate::error::{Error, Result};
use crate::record::AttendanceLog;

/// Persistence contract for the attendance log.
pub trait LogStore {
    /// Load the log, empty if nothing has been saved yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or holds invalid JSON.
    fn load(&self) -> Result<AttendanceLog>;

    /// Replace the stored log.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be serialized or written.
    fn save(&self, log: &AttendanceLog) -> Result<()>;

    /// Remove the stored log.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn clear(&self) -> Result<()>;
}

/// `SQLite`-backed key-value storage.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
    /// Key the log is stored under.
    log_key: String,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            path,
            conn,
            log_key: DEFAULT_LOG_KEY.to_string(),
        })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
            log_key: DEFAULT_LOG_KEY.to_string(),
        })
    }

    /// Use a different key for the attendance log.
    #[must_use]
    pub fn with_log_key(mut self, key: impl Into<String>) -> Self {
        self.log_key = key.into();
        self
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the key the log is stored under.
    #[must_use]
    pub fn log_key(&self) -> &str {
        &self.log_key
    }

    /// Read a raw value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Write a raw value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            r"
            INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            ",
            params![key, value],
        )?;
        Ok(())
    }

    /// Delete a value. Returns `true` if something was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let affected = self.conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
        Ok(affected > 0)
    }

    /// Get storage statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub fn stats(&self) -> Result<StorageStats> {
        let log = self.load()?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_records: log.len(),
            newest_date: log.records().first().map(|r| r.date.clone()),
            db_size_bytes,
        })
    }
}

impl LogStore for Storage {
    fn load(&self) -> Result<AttendanceLog> {
        match self.get(&self.log_key)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(AttendanceLog::new()),
        }
    }

    fn save(&self, log: &AttendanceLog) -> Result<()> {
        let json = serde_json::to_string(log)?;
        self.set(&self.log_key, &json)?;
        debug!(records = log.len(), "Saved attendance log");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.remove(&self.log_key)? {
            info!("Cleared attendance log");
        }
        Ok(())
    }
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of records in the log.
    pub total_records: usize,
    /// Date of the newest record.
    pub newest_date: Option<String>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}
