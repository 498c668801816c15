//! Attendance records and the capped log that holds them.
//!
//! The JSON shape of a record (`text`, `date`, `logIn`, `logOut`, `type`,
//! `snapshot`) is the persisted format, so field names are fixed.

use serde::{Deserialize, Serialize};

/// Where a detection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanSource {
    /// A frame from the live camera loop.
    Camera,
    /// A single still image supplied by the user.
    Image,
}

impl std::fmt::Display for ScanSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Camera => write!(f, "camera"),
            Self::Image => write!(f, "image"),
        }
    }
}

/// One log-in/log-out pair for a payload on a calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    /// Decoded payload text.
    pub text: String,
    /// Calendar day in local time.
    pub date: String,
    /// Time of the first accepted detection that day.
    pub log_in: String,
    /// Time of the latest later detection that day, empty until there is one.
    #[serde(default)]
    pub log_out: String,
    /// Source of the detection that created the record.
    #[serde(rename = "type")]
    pub source: ScanSource,
    /// `data:image/jpeg;base64,...` snapshot taken when the record was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
}

impl AttendanceRecord {
    /// Create a record for a first detection; `log_out` starts empty.
    #[must_use]
    pub fn new(
        text: impl Into<String>,
        date: impl Into<String>,
        log_in: impl Into<String>,
        source: ScanSource,
        snapshot: Option<String>,
    ) -> Self {
        Self {
            text: text.into(),
            date: date.into(),
            log_in: log_in.into(),
            log_out: String::new(),
            source,
            snapshot,
        }
    }

    /// Whether a log-out time has been recorded.
    #[must_use]
    pub fn has_logged_out(&self) -> bool {
        !self.log_out.is_empty()
    }
}

/// Newest-first list of attendance records.
///
/// Serializes as a bare JSON array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttendanceLog {
    records: Vec<AttendanceRecord>,
}

impl AttendanceLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the record for `text` on `date`.
    #[must_use]
    pub fn find(&self, text: &str, date: &str) -> Option<&AttendanceRecord> {
        self.records
            .iter()
            .find(|r| r.text == text && r.date == date)
    }

    /// Find the record for `text` on `date`, mutably.
    pub fn find_mut(&mut self, text: &str, date: &str) -> Option<&mut AttendanceRecord> {
        self.records
            .iter_mut()
            .find(|r| r.text == text && r.date == date)
    }

    /// Insert a record as the newest entry.
    pub fn push_front(&mut self, record: AttendanceRecord) {
        self.records.insert(0, record);
    }

    /// Drop the oldest records beyond `capacity`. Returns how many were dropped.
    pub fn truncate(&mut self, capacity: usize) -> usize {
        let dropped = self.records.len().saturating_sub(capacity);
        self.records.truncate(capacity);
        dropped
    }

    /// Records, newest first.
    #[must_use]
    pub fn records(&self) -> &[AttendanceRecord] {
        &self.records
    }

    /// Iterate over records, newest first.
    pub fn iter(&self) -> std::slice::Iter<'_, AttendanceRecord> {
        self.records.iter()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the log has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<'a> IntoIterator for &'a AttendanceLog {
    type Item = &'a AttendanceRecord;
    type IntoIter = std::slice::Iter<'a, AttendanceRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl From<Vec<AttendanceRecord>> for AttendanceLog {
    fn from(records: Vec<AttendanceRecord>) -> Self {
        Self { records }
    }
}
