//! `qrattend` - QR code attendance logger
//!
//! This library provides the scan loop, the dedup and log engine, QR decoder
//! selection and the persistent attendance log behind the `qrattend` binary.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod actions;
pub mod cli;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod export;
pub mod frame;
pub mod logging;
pub mod overlay;
pub mod record;
pub mod scan;
pub mod storage;

pub use config::Config;
pub use engine::{Engine, EngineSettings, Outcome};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use record::{AttendanceLog, AttendanceRecord, ScanSource};
pub use scan::{ScanHandle, ScanSession};
pub use storage::{LogStore, Storage, StorageStats};
