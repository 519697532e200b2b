//! Delimited-text reading shared by the profile and timeline parsers

use crate::error::{BenchwrapError, Result};

/// Header plus raw string rows of a delimited artifact
///
/// Rows keep their own width; callers decide what a malformed row is.
#[derive(Debug, Default)]
pub(crate) struct DelimitedTable {
    /// Trimmed header cells; empty when the input has no records
    pub header: Vec<String>,
    /// Non-empty data records
    pub rows: Vec<Vec<String>>,
    /// Records the reader could not decode
    pub rejected: usize,
}

/// Read `text` with a single-byte delimiter
///
/// Quoted fields may contain the delimiter. `#` lines and blank lines are
/// ignored, and cells are trimmed.
pub(crate) fn read_delimited(text: &str, delimiter: u8) -> Result<DelimitedTable> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(text.as_bytes());

    let header: Vec<String> = reader
        .headers()
        .map_err(|e| BenchwrapError::Telemetry(format!("unreadable header: {}", e)))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut table = DelimitedTable {
        header,
        ..Default::default()
    };
    for record in reader.records() {
        match record {
            Ok(record) if record.iter().all(str::is_empty) => {}
            Ok(record) => table.rows.push(record.iter().map(str::to_string).collect()),
            Err(_) => table.rejected += 1,
        }
    }
    Ok(table)
}
