//! Tabular rows as they come off the wire
//!
//! A [`RawTable`] is the uniform shape every transport produces, whether the
//! data arrived as a structured [`Snapshot`] or as delimited text. Cells are
//! restricted to the [`CellValue`] scalar union at the parse boundary; nothing
//! downstream ever sees an untyped value.
//!
//! An empty cell is always `CellValue::Text("")`. A wire `null`, a missing
//! trailing cell and an empty CSV field all decode to that one value.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

use super::errors::DomainError;
use super::payload::{Snapshot, SnapshotRow};

/// Output of a transformer: opaque to the sync engine, persisted as JSON.
pub type DomainRow = serde_json::Value;

/// Largest integer that survives an f64 round trip unchanged.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

// ============================================================================
// CellValue
// ============================================================================

/// A single spreadsheet cell: string or number
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
}

impl CellValue {
    /// The empty cell.
    #[must_use]
    pub fn empty() -> Self {
        CellValue::Text(String::new())
    }

    /// True for `Text("")` and whitespace-only text.
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Text(s) if s.trim().is_empty())
    }

    /// Text content, if this is a text cell.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            CellValue::Number(_) => None,
        }
    }

    /// Numeric content; text cells that parse as a number are accepted.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        }
    }

    fn from_json(value: &serde_json::Value) -> Result<Self, String> {
        match value {
            serde_json::Value::Null => Ok(CellValue::empty()),
            serde_json::Value::String(s) => Ok(CellValue::Text(s.clone())),
            serde_json::Value::Bool(b) => Ok(CellValue::Text(b.to_string())),
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(CellValue::Number)
                .ok_or_else(|| format!("number out of range: {n}")),
            serde_json::Value::Array(_) => Err("nested array".to_string()),
            serde_json::Value::Object(_) => Err("nested object".to_string()),
        }
    }
}

impl Default for CellValue {
    fn default() -> Self {
        CellValue::empty()
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(s) => write!(f, "{s}"),
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER => {
                write!(f, "{}", *n as i64)
            }
            CellValue::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CellValue::Text(s) => serializer.serialize_str(s),
            // Integral values are written without a fractional part so that
            // cached documents stay stable across encode/decode cycles.
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER => {
                serializer.serialize_i64(*n as i64)
            }
            CellValue::Number(n) => serializer.serialize_f64(*n),
        }
    }
}

struct CellValueVisitor;

impl<'de> Visitor<'de> for CellValueVisitor {
    type Value = CellValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string, a number, a boolean or null")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<CellValue, E> {
        Ok(CellValue::Text(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<CellValue, E> {
        Ok(CellValue::Text(v))
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<CellValue, E> {
        Ok(CellValue::Text(v.to_string()))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<CellValue, E> {
        Ok(CellValue::Number(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<CellValue, E> {
        Ok(CellValue::Number(v as f64))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<CellValue, E> {
        Ok(CellValue::Number(v))
    }

    fn visit_unit<E: de::Error>(self) -> Result<CellValue, E> {
        Ok(CellValue::empty())
    }

    fn visit_none<E: de::Error>(self) -> Result<CellValue, E> {
        Ok(CellValue::empty())
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<CellValue, D::Error> {
        deserializer.deserialize_any(CellValueVisitor)
    }
}

impl<'de> Deserialize<'de> for CellValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(CellValueVisitor)
    }
}

// ============================================================================
// RawRow
// ============================================================================

/// One row keyed by column header
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRow(BTreeMap<String, CellValue>);

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, header: impl Into<String>, value: CellValue) {
        self.0.insert(header.into(), value);
    }

    pub fn get(&self, header: &str) -> Option<&CellValue> {
        self.0.get(header)
    }

    /// Text of the cell, with numbers rendered as text.
    pub fn text(&self, header: &str) -> Option<String> {
        self.0.get(header).map(ToString::to_string)
    }

    pub fn number(&self, header: &str) -> Option<f64> {
        self.0.get(header).and_then(CellValue::as_number)
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if every cell is empty.
    pub fn is_blank(&self) -> bool {
        self.0.values().all(CellValue::is_empty)
    }
}

impl FromIterator<(String, CellValue)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (String, CellValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ============================================================================
// RawTable
// ============================================================================

/// Rows of one fetch together with their header order and row keys
///
/// `headers` are kept exactly as received. Rows are keyed by `columns`, the
/// same list made unique and non-empty, so blank or repeated headers never
/// collapse two cells into one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTable {
    headers: Vec<String>,
    columns: Vec<String>,
    rows: Vec<RawRow>,
    row_keys: Vec<String>,
}

impl RawTable {
    /// Build a table from a snapshot.
    ///
    /// Rows shorter than the header list are padded with empty cells; extra
    /// trailing values beyond the last header are dropped with a warning.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let headers = snapshot.headers.clone();
        let columns = normalize_headers(headers.iter().map(String::as_str));
        let mut rows = Vec::with_capacity(snapshot.rows.len());
        let mut row_keys = Vec::with_capacity(snapshot.rows.len());

        for row in &snapshot.rows {
            rows.push(zip_row(&columns, &row.key, row.values.iter().cloned()));
            row_keys.push(row.key.clone());
        }

        Self {
            headers,
            columns,
            rows,
            row_keys,
        }
    }

    /// Build a table from delimited-text records.
    ///
    /// Every field is trimmed, blank records are skipped, and the first
    /// non-blank record becomes the header row. Data rows are keyed by their
    /// one-based position among data rows.
    ///
    /// # Errors
    /// Returns [`DomainError::EmptyTable`] if no header row is found
    pub fn from_records<I, R, S>(records: I) -> Result<Self, DomainError>
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut records = records
            .into_iter()
            .map(|r| {
                r.into_iter()
                    .map(|f| f.as_ref().trim().to_string())
                    .collect::<Vec<_>>()
            })
            .filter(|r| r.iter().any(|f| !f.is_empty()));

        let header_record = records
            .next()
            .ok_or_else(|| DomainError::EmptyTable("no header row".to_string()))?;
        let columns = normalize_headers(header_record.iter().map(String::as_str));

        let mut rows = Vec::new();
        let mut row_keys = Vec::new();
        for (index, record) in records.enumerate() {
            let key = (index + 1).to_string();
            rows.push(zip_row(&columns, &key, record.into_iter().map(CellValue::Text)));
            row_keys.push(key);
        }

        Ok(Self {
            headers: header_record,
            columns,
            rows,
            row_keys,
        })
    }

    /// Convert back into a snapshot with the headers as received.
    pub fn to_snapshot(&self, version: i64, generated_at: Option<DateTime<Utc>>) -> Snapshot {
        let rows = self
            .rows
            .iter()
            .zip(&self.row_keys)
            .map(|(row, key)| SnapshotRow {
                key: key.clone(),
                values: self
                    .columns
                    .iter()
                    .map(|c| row.get(c).cloned().unwrap_or_default())
                    .collect(),
            })
            .collect();

        Snapshot {
            ok: true,
            version,
            headers: self.headers.clone(),
            rows,
            generated_at,
        }
    }

    /// Header row exactly as received
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Unique column names the rows are keyed by, in header order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[RawRow] {
        &self.rows
    }

    pub fn row_keys(&self) -> &[String] {
        &self.row_keys
    }

    pub fn into_rows(self) -> Vec<RawRow> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Make headers unique and non-empty.
///
/// Empty headers become `column_<n>` (one-based); duplicates get a `_<k>`
/// suffix so every row map keeps every column.
fn normalize_headers<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut headers = Vec::new();

    for (index, header) in raw.enumerate() {
        let base = match header.trim() {
            "" => format!("column_{}", index + 1),
            h => h.to_string(),
        };
        let mut candidate = base.clone();
        let mut suffix = 2;
        while !seen.insert(candidate.clone()) {
            candidate = format!("{base}_{suffix}");
            suffix += 1;
        }
        headers.push(candidate);
    }

    headers
}

fn zip_row(columns: &[String], key: &str, values: impl Iterator<Item = CellValue>) -> RawRow {
    let mut values = values;
    let row: RawRow = columns
        .iter()
        .map(|c| (c.clone(), values.next().unwrap_or_default()))
        .collect();

    let dropped = values.count();
    if dropped > 0 {
        warn!(
            row = key,
            columns = columns.len(),
            dropped,
            "Row has more values than headers, dropping the extras"
        );
    }
    row
}

/// Decode a JSON grid cell into the scalar union.
pub(crate) fn cell_from_json(
    value: &serde_json::Value,
    row: usize,
    column: usize,
) -> Result<CellValue, DomainError> {
    CellValue::from_json(value).map_err(|reason| DomainError::InvalidCell {
        row,
        column,
        reason,
    })
}
