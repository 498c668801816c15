//! CSV export of the attendance log.

use std::path::Path;

use csv::{QuoteStyle, Terminator, WriterBuilder};
use tracing::info;

use crate::error::{Error, Result};
use crate::record::AttendanceLog;

/// Default file name for exports.
pub const DEFAULT_EXPORT_FILE: &str = "attendance-log.csv";

/// Header row, written as-is.
const HEADER: &str = "Employee,Date,Log In,Log Out,Type";

/// Render the log as CSV: a fixed header, then one fully quoted row per
/// record in log order. There is no newline after the last row.
///
/// # Errors
///
/// Returns [`Error::EmptyLog`] if there is nothing to export.
pub fn export_csv(log: &AttendanceLog) -> Result<Vec<u8>> {
    if log.is_empty() {
        return Err(Error::EmptyLog);
    }

    let mut out = Vec::with_capacity(HEADER.len() + 1 + log.len() * 64);
    out.extend_from_slice(HEADER.as_bytes());
    out.push(b'\n');

    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .quote_style(QuoteStyle::Always)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(out);

    for record in log {
        let source = record.source.to_string();
        writer.write_record([
            record.text.as_str(),
            record.date.as_str(),
            record.log_in.as_str(),
            record.log_out.as_str(),
            source.as_str(),
        ])?;
    }

    let mut out = writer
        .into_inner()
        .map_err(|e| Error::Io(e.into_error()))?;
    // Rows are newline-separated, not terminated
    if out.last() == Some(&b'\n') {
        out.pop();
    }
    Ok(out)
}

/// Export the log to `path`.
///
/// # Errors
///
/// Returns [`Error::EmptyLog`] for an empty log (no file is written), or an
/// I/O error if the file cannot be written.
pub fn write_csv(log: &AttendanceLog, path: &Path) -> Result<()> {
    let bytes = export_csv(log)?;
    std::fs::write(path, bytes)?;
    info!(path = %path.display(), records = log.len(), "Exported log");
    Ok(())
}
