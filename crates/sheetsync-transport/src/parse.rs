//! Delimited-text parsing for the raw-text export

use sheetsync_core::domain::RawTable;

use crate::TransportError;

/// Reject bodies that cannot be a data export
///
/// Proxies and sign-in walls answer with HTML pages and a 200 status, so
/// the body itself has to be checked.
pub fn validate_text_payload(body: &str) -> Result<(), TransportError> {
    let trimmed = body.trim_start_matches('\u{feff}').trim();
    if trimmed.is_empty() {
        return Err(TransportError::InvalidPayload("empty response".to_string()));
    }

    let head: String = trimmed.chars().take(64).collect::<String>().to_lowercase();
    if head.starts_with("<!doctype html") || head.starts_with("<html") || head.starts_with("<head")
    {
        return Err(TransportError::InvalidPayload(
            "received an HTML page instead of data".to_string(),
        ));
    }
    Ok(())
}

/// Reject tables without a header row or without data rows
pub fn validate_table(table: &RawTable) -> Result<(), TransportError> {
    if table.headers().is_empty() {
        return Err(TransportError::InvalidPayload("no header row".to_string()));
    }
    if table.is_empty() {
        return Err(TransportError::InvalidPayload(
            "header row present but no data rows".to_string(),
        ));
    }
    Ok(())
}

/// Parse comma-separated text into a table
///
/// Quoted fields may contain delimiters and line breaks. The first non-empty
/// record is the header row, fields are trimmed and blank lines skipped.
pub fn parse_delimited(body: &str) -> Result<RawTable, TransportError> {
    validate_text_payload(body)?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.trim_start_matches('\u{feff}').as_bytes());

    let records = reader
        .records()
        .collect::<Result<Vec<csv::StringRecord>, csv::Error>>()
        .map_err(|e| TransportError::InvalidPayload(format!("malformed delimited text: {e}")))?;

    RawTable::from_records(records.iter().map(|r| r.iter()))
        .map_err(|e| TransportError::InvalidPayload(e.to_string()))
}
