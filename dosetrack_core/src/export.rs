//! CSV export of a user's journal and timestamp display.

use crate::journal::Journal;
use crate::logs::LogQuery;
use crate::types::LogRow;
use crate::{Context, Result};
use chrono::{DateTime, FixedOffset, Local};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Render unix seconds in the display zone (`None` is the local zone).
/// Zero renders as an empty string.
pub fn format_timestamp(ts: i64, offset: Option<FixedOffset>) -> String {
    if ts == 0 {
        return String::new();
    }
    let Some(utc) = DateTime::from_timestamp(ts, 0) else {
        return ts.to_string();
    };
    match offset {
        Some(offset) => utc.with_timezone(&offset).to_rfc3339(),
        None => utc.with_timezone(&Local).to_rfc3339(),
    }
}

/// A row in the CSV output
#[derive(Debug, serde::Serialize)]
struct CsvRow<'a> {
    id: i64,
    started_at: String,
    ended_at: String,
    username: &'a str,
    drug: &'a str,
    dose: f64,
    units: &'a str,
    route: &'a str,
    cost: f64,
    currency: &'a str,
}

impl<'a> CsvRow<'a> {
    fn new(row: &'a LogRow, offset: Option<FixedOffset>) -> Self {
        Self {
            id: row.start_time,
            started_at: format_timestamp(row.start_time, offset),
            ended_at: format_timestamp(row.end_time, offset),
            username: &row.username,
            drug: &row.drug_name,
            dose: row.dose,
            units: &row.dose_units,
            route: &row.drug_route,
            cost: row.cost,
            currency: &row.cost_currency,
        }
    }
}

/// Write `rows` as CSV with a header line
pub fn write_csv<W: Write>(rows: &[LogRow], offset: Option<FixedOffset>, writer: W) -> Result<usize> {
    let mut writer = csv::Writer::from_writer(writer);
    for row in rows {
        writer.serialize(CsvRow::new(row, offset))?;
    }
    writer.flush()?;
    Ok(rows.len())
}

impl Journal {
    /// Export every log of `username`, oldest first, to `path`.
    ///
    /// The file is written to a sibling temp file, synced, then renamed over
    /// `path`.
    pub fn export_csv(&self, ctx: &Context, username: &str, path: &Path) -> Result<usize> {
        let rows = self.get_logs(ctx, &LogQuery::new(username))?;
        let offset = self.config().timezone_offset()?;

        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        let mut temp = NamedTempFile::new_in(parent)?;
        let written = write_csv(&rows, offset, &mut temp)?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| crate::Error::Io(e.error))?;

        tracing::info!("Exported {} logs of {} to {:?}", written, username, path);
        Ok(written)
    }
}
