//! Explode JSON-shaped labels into one column per key.

use std::collections::{HashMap, HashSet};

use hotpulse_core::LabeledRecord;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

const BASE_COLUMNS: [&str; 3] = ["id", "content", "label"];

/// `id, content, label` plus the outer union of every label's keys, in
/// first-seen order. Cells for keys a row's label lacks are empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedTable {
    label_columns: Vec<String>,
    rows: Vec<Vec<String>>,
    stats: ExpandStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExpandStats {
    pub rows: usize,
    pub expanded: usize,
    /// Rows whose label is not a JSON object (including empty labels).
    pub unparsed: usize,
}

impl ExpandedTable {
    pub fn header(&self) -> Vec<&str> {
        BASE_COLUMNS
            .iter()
            .copied()
            .chain(self.label_columns.iter().map(String::as_str))
            .collect()
    }

    pub fn label_columns(&self) -> &[String] {
        &self.label_columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn stats(&self) -> ExpandStats {
        self.stats
    }

    /// Cell value by column name.
    pub fn cell(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.header().iter().position(|h| *h == column)?;
        self.rows.get(row)?.get(idx).map(String::as_str)
    }
}

/// Build the expanded table. A row whose label does not parse as a JSON
/// object keeps its base columns and gets empty label columns.
pub fn expand_labels(records: &[LabeledRecord]) -> ExpandedTable {
    let mut label_columns: Vec<String> = Vec::new();
    let mut known: HashSet<String> = HashSet::new();
    let mut flattened: Vec<Option<HashMap<String, String>>> = Vec::with_capacity(records.len());
    let mut stats = ExpandStats {
        rows: records.len(),
        ..Default::default()
    };

    for record in records {
        let Some(Value::Object(object)) = &record.parsed else {
            if !record.label.trim().is_empty() {
                warn!(id = record.id.as_str(), "Label is not a JSON object, left unexpanded");
            }
            stats.unparsed += 1;
            flattened.push(None);
            continue;
        };

        let mut fields = Vec::new();
        flatten_object("", object, &mut fields);
        for (key, _) in &fields {
            if known.insert(key.clone()) {
                label_columns.push(key.clone());
            }
        }
        stats.expanded += 1;
        flattened.push(Some(fields.into_iter().collect()));
    }

    let rows = records
        .iter()
        .zip(flattened)
        .map(|(record, fields)| {
            let mut row = vec![record.id.clone(), record.content.clone(), record.label.clone()];
            row.extend(label_columns.iter().map(|column| {
                fields
                    .as_ref()
                    .and_then(|f| f.get(column).cloned())
                    .unwrap_or_default()
            }));
            row
        })
        .collect();

    info!(
        rows = stats.rows,
        expanded = stats.expanded,
        unparsed = stats.unparsed,
        columns = label_columns.len(),
        "Labels expanded"
    );

    ExpandedTable {
        label_columns,
        rows,
        stats,
    }
}

/// Nested objects flatten to dotted keys. Keys that collide with a base
/// column are prefixed with `label.`.
fn flatten_object(prefix: &str, object: &Map<String, Value>, out: &mut Vec<(String, String)>) {
    for (key, value) in object {
        let name = if prefix.is_empty() {
            if BASE_COLUMNS.contains(&key.as_str()) {
                format!("label.{key}")
            } else {
                key.clone()
            }
        } else {
            format!("{prefix}.{key}")
        };

        match value {
            Value::Object(nested) if !nested.is_empty() => flatten_object(&name, nested, out),
            other => out.push((name, cell_text(other))),
        }
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}
