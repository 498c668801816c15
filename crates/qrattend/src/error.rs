//! Error types for qrattend.
//!
//! This module defines the crate-wide error type. Decoder failures have their
//! own type in [`crate::decoder`] since they are transient and never leave a
//! scan tick.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for qrattend operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    /// The attendance log could not be persisted.
    #[error("log save failed: {message}")]
    LogSave {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Capability Errors ===
    /// The camera could not be started or stopped delivering frames.
    #[error("camera unavailable: {message}")]
    CameraUnavailable {
        /// Description of what went wrong.
        message: String,
    },

    /// Neither the native nor the fallback decoder can be used.
    #[error("decoder unavailable: {message}")]
    DecoderUnavailable {
        /// Description of what went wrong.
        message: String,
    },

    /// A scan session is already running.
    #[error("scan session already running")]
    AlreadyScanning,

    // === Input Errors ===
    /// A user-supplied image could not be read or decoded.
    #[error("invalid image {path}: {source}")]
    InvalidImage {
        /// Path of the rejected image.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: image::ImageError,
    },

    /// Encoding a frame (snapshot or annotated copy) failed.
    #[error("image encoding failed: {0}")]
    ImageEncode(#[from] image::ImageError),

    // === Export Errors ===
    /// There is nothing to export.
    #[error("no entries")]
    EmptyLog,

    /// Writing CSV failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An operation timed out.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
    },

    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for qrattend operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a camera unavailable error.
    #[must_use]
    pub fn camera_unavailable(message: impl Into<String>) -> Self {
        Self::CameraUnavailable {
            message: message.into(),
        }
    }

    /// Create a decoder unavailable error.
    #[must_use]
    pub fn decoder_unavailable(message: impl Into<String>) -> Self {
        Self::DecoderUnavailable {
            message: message.into(),
        }
    }

    /// Wrap any error raised while persisting the log.
    #[must_use]
    pub fn log_save(err: &Error) -> Self {
        Self::LogSave {
            message: err.to_string(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error means a capability (camera or decoder) is missing.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::CameraUnavailable { .. } | Self::DecoderUnavailable { .. }
        )
    }
}
