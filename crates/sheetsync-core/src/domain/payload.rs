//! Wire payloads of the structured endpoint
//!
//! The fast endpoint answers with one of three shapes:
//!
//! | Shape | Detected by | Meaning |
//! |-------|-------------|---------|
//! | Snapshot  | object with `headers` + `rows` | full versioned export |
//! | ChangeSet | object with `changes` or `toVersion` | delta between versions |
//! | Legacy    | bare 2D array (or `{data: [[..]]}`) | unversioned grid |
//!
//! [`SheetPayload::decode`] detects the shape once at the transport boundary;
//! downstream code only ever sees a [`Snapshot`] or a [`ChangeSet`].

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::errors::DomainError;
use super::table::{cell_from_json, CellValue};

fn default_true() -> bool {
    true
}

// ============================================================================
// Snapshot
// ============================================================================

/// One keyed row of a snapshot, values in header order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    #[serde(deserialize_with = "string_or_number")]
    pub key: String,
    #[serde(default)]
    pub values: Vec<CellValue>,
}

/// Full, self-consistent view of one sheet at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default = "default_true")]
    pub ok: bool,
    /// Change counter of the remote source; strictly increasing
    pub version: i64,
    pub headers: Vec<String>,
    #[serde(default)]
    pub rows: Vec<SnapshotRow>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub generated_at: Option<DateTime<Utc>>,
}

// ============================================================================
// ChangeSet
// ============================================================================

/// A row-level change between two versions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "string_or_number")]
    pub row_key: String,
    #[serde(default)]
    pub changed_columns: Vec<String>,
    #[serde(default)]
    pub values: Vec<CellValue>,
}

/// Delta between `from_version` and `to_version`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    #[serde(default = "default_true")]
    pub ok: bool,
    #[serde(default)]
    pub from_version: i64,
    pub to_version: i64,
    #[serde(default)]
    pub changes: Vec<Change>,
    #[serde(default)]
    pub needs_full_resync: bool,
}

// ============================================================================
// SheetPayload
// ============================================================================

/// Decoded response of the structured endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum SheetPayload {
    Snapshot(Snapshot),
    ChangeSet(ChangeSet),
    /// Bare grid without an envelope; row 0 holds the headers
    Legacy(Vec<Vec<CellValue>>),
}

impl SheetPayload {
    /// Detect the wire shape of `value` and decode it.
    ///
    /// # Errors
    /// - [`DomainError::SourceRejected`] for an `ok: false` envelope
    /// - [`DomainError::InvalidCell`] for a grid cell outside the scalar union
    /// - [`DomainError::UnrecognizedPayload`] for anything else
    pub fn decode(value: serde_json::Value) -> Result<Self, DomainError> {
        match value {
            serde_json::Value::Array(grid) => decode_grid(&grid).map(SheetPayload::Legacy),
            serde_json::Value::Object(ref map) => {
                if map.get("ok") == Some(&serde_json::Value::Bool(false)) {
                    let message = map
                        .get("error")
                        .or_else(|| map.get("message"))
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or("no reason given");
                    return Err(DomainError::SourceRejected(message.to_string()));
                }

                if map.contains_key("changes") || map.contains_key("toVersion") {
                    return serde_json::from_value(value)
                        .map(SheetPayload::ChangeSet)
                        .map_err(|e| {
                            DomainError::UnrecognizedPayload(format!("malformed change set: {e}"))
                        });
                }

                if map.contains_key("headers") && map.contains_key("rows") {
                    return serde_json::from_value(value)
                        .map(SheetPayload::Snapshot)
                        .map_err(|e| {
                            DomainError::UnrecognizedPayload(format!("malformed snapshot: {e}"))
                        });
                }

                if let Some(serde_json::Value::Array(grid)) = map.get("data") {
                    return decode_grid(grid).map(SheetPayload::Legacy);
                }

                let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
                keys.sort_unstable();
                Err(DomainError::UnrecognizedPayload(format!(
                    "object with keys [{}]",
                    keys.join(", ")
                )))
            }
            other => Err(DomainError::UnrecognizedPayload(format!(
                "expected object or array, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Normalize into a snapshot.
    ///
    /// A legacy grid has no version of its own; it is stamped with `now_ms`,
    /// which also becomes its `generated_at`.
    ///
    /// # Errors
    /// Returns an error for change sets and for grids without a header row
    pub fn into_snapshot(self, now_ms: i64) -> Result<Snapshot, DomainError> {
        match self {
            SheetPayload::Snapshot(snapshot) => Ok(snapshot),
            SheetPayload::Legacy(grid) => legacy_to_snapshot(grid, now_ms),
            SheetPayload::ChangeSet(_) => Err(DomainError::UnrecognizedPayload(
                "expected a snapshot, got a change set".to_string(),
            )),
        }
    }

    /// Extract a change set.
    ///
    /// # Errors
    /// Returns an error if the payload is not a change set
    pub fn into_change_set(self) -> Result<ChangeSet, DomainError> {
        match self {
            SheetPayload::ChangeSet(change_set) => Ok(change_set),
            SheetPayload::Snapshot(_) => Err(DomainError::UnrecognizedPayload(
                "expected a change set, got a snapshot".to_string(),
            )),
            SheetPayload::Legacy(_) => Err(DomainError::UnrecognizedPayload(
                "expected a change set, got a legacy grid".to_string(),
            )),
        }
    }
}

fn decode_grid(grid: &[serde_json::Value]) -> Result<Vec<Vec<CellValue>>, DomainError> {
    grid.iter()
        .enumerate()
        .map(|(row_index, row)| match row {
            serde_json::Value::Array(cells) => cells
                .iter()
                .enumerate()
                .map(|(column, cell)| cell_from_json(cell, row_index, column))
                .collect(),
            other => Err(DomainError::UnrecognizedPayload(format!(
                "grid row {row_index} is {}, expected array",
                json_kind(other)
            ))),
        })
        .collect()
}

fn legacy_to_snapshot(grid: Vec<Vec<CellValue>>, now_ms: i64) -> Result<Snapshot, DomainError> {
    let mut rows = grid.into_iter();
    let headers: Vec<String> = rows
        .next()
        .ok_or_else(|| DomainError::EmptyTable("legacy grid has no header row".to_string()))?
        .iter()
        .map(|cell| cell.to_string().trim().to_string())
        .collect();

    let rows = rows
        .enumerate()
        .map(|(index, values)| SnapshotRow {
            key: (index + 1).to_string(),
            values,
        })
        .collect();

    Ok(Snapshot {
        ok: true,
        version: now_ms,
        headers,
        rows,
        generated_at: Utc.timestamp_millis_opt(now_ms).single(),
    })
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

// ============================================================================
// Lenient field decoders
// ============================================================================

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            json_kind(&other)
        ))),
    }
}

/// Accepts RFC 3339 strings, Unix milliseconds, or null.
fn lenient_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom),
        serde_json::Value::Number(n) => Ok(n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())),
        other => Err(serde::de::Error::custom(format!(
            "expected timestamp, got {}",
            json_kind(&other)
        ))),
    }
}
