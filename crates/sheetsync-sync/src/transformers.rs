//! Built-in transformers and the registry that names them
//!
//! A [`TransformerRegistry`] maps ids to transformers. The transform
//! pipeline hands a clone of it to the worker thread and resolves inline
//! fallbacks from the same registry, so both paths run the same code.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use sheetsync_core::domain::{CellValue, DomainRow, RawRow};
use sheetsync_core::ports::{TransformFailure, TransformInput, Transformer};

const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Report progress roughly every tenth of the input
fn report_progress(index: usize, total: usize, last: &mut u8, progress: &mut dyn FnMut(u8)) {
    let percent = (((index + 1) * 100) / total.max(1)).min(100) as u8;
    if percent >= last.saturating_add(10) || percent == 100 {
        *last = percent;
        progress(percent);
    }
}

/// Integral values become JSON integers so they compare equal to `json!(n)`
fn number_to_json(n: f64) -> Option<Value> {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return Some(Value::from(n as i64));
    }
    serde_json::Number::from_f64(n).map(Value::Number)
}

fn cell_to_json(cell: &CellValue) -> Value {
    match cell {
        CellValue::Number(n) => {
            number_to_json(*n).unwrap_or_else(|| Value::String(cell.to_string()))
        }
        CellValue::Text(text) => Value::String(text.clone()),
    }
}

// ============================================================================
// RowsTransformer
// ============================================================================

/// One JSON object per non-blank row, keyed by header
#[derive(Debug, Default, Clone, Copy)]
pub struct RowsTransformer;

impl RowsTransformer {
    pub const ID: &'static str = "rows";
}

impl Transformer for RowsTransformer {
    fn id(&self) -> &str {
        Self::ID
    }

    fn transform(
        &self,
        input: &TransformInput,
        progress: &mut dyn FnMut(u8),
    ) -> Result<Vec<DomainRow>, TransformFailure> {
        let total = input.rows.len();
        let mut last = 0u8;
        let mut out = Vec::with_capacity(total);

        for (index, row) in input.rows.iter().enumerate() {
            if !row.is_blank() {
                let object: Map<String, Value> = row
                    .headers()
                    .filter_map(|h| row.get(h).map(|cell| (h.to_string(), cell_to_json(cell))))
                    .collect();
                out.push(Value::Object(object));
            }
            report_progress(index, total, &mut last, progress);
        }
        Ok(out)
    }
}

// ============================================================================
// ColumnsTransformer
// ============================================================================

/// Projects a fixed set of columns, coercing numeric text to numbers
///
/// Rows where every selected column is empty are dropped. Input without all
/// of the columns is rejected.
#[derive(Debug, Clone)]
pub struct ColumnsTransformer {
    id: String,
    columns: Vec<String>,
}

impl ColumnsTransformer {
    pub fn new(id: impl Into<String>, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            id: id.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    fn project(&self, row: &RawRow) -> Option<Value> {
        let mut object = Map::new();
        let mut any = false;
        for column in &self.columns {
            let cell = row.get(column).cloned().unwrap_or_default();
            any |= !cell.is_empty();
            let value = cell
                .as_number()
                .and_then(number_to_json)
                .unwrap_or_else(|| cell_to_json(&cell));
            object.insert(column.clone(), value);
        }
        any.then_some(Value::Object(object))
    }
}

impl Transformer for ColumnsTransformer {
    fn id(&self) -> &str {
        &self.id
    }

    fn required_columns(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn transform(
        &self,
        input: &TransformInput,
        progress: &mut dyn FnMut(u8),
    ) -> Result<Vec<DomainRow>, TransformFailure> {
        if let Some(first) = input.rows.first() {
            let missing: Vec<&str> = self
                .columns
                .iter()
                .filter(|c| first.get(c).is_none())
                .map(String::as_str)
                .collect();
            if !missing.is_empty() {
                return Err(TransformFailure::new(format!(
                    "missing columns: {}",
                    missing.join(", ")
                )));
            }
        }

        let total = input.rows.len();
        let mut last = 0u8;
        let mut out = Vec::new();
        for (index, row) in input.rows.iter().enumerate() {
            if let Some(value) = self.project(row) {
                out.push(value);
            }
            report_progress(index, total, &mut last, progress);
        }
        Ok(out)
    }
}

// ============================================================================
// TransformerRegistry
// ============================================================================

/// Id → transformer lookup shared by the worker and the inline fallback
#[derive(Clone, Default)]
pub struct TransformerRegistry {
    transformers: HashMap<String, Arc<dyn Transformer>>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding [`RowsTransformer`]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(RowsTransformer));
        registry
    }

    /// Register `transformer` under its id, replacing any previous entry
    pub fn register(&mut self, transformer: Arc<dyn Transformer>) {
        self.transformers
            .insert(transformer.id().to_string(), transformer);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Transformer>> {
        self.transformers.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.transformers.contains_key(id)
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.transformers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl fmt::Debug for TransformerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformerRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}
