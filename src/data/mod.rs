//! Tabular input data
//!
//! Rows arrive from the presentation layer as flat key-value records whose
//! values are strings, numbers or null.

mod profile;

pub use profile::{DataProfile, VariableKind, VariableProfile};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Number(f64),
    Text(String),
}

impl Cell {
    /// Numeric view of the cell; numeric strings count as numbers
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(n) if n.is_finite() => Some(*n),
            Cell::Number(_) => None,
            Cell::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            Cell::Null => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        match self {
            Cell::Null => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(n) => n.is_nan(),
        }
    }

    /// Label used when the cell acts as a group level
    pub fn label(&self) -> Option<String> {
        if self.is_missing() {
            return None;
        }
        match self {
            Cell::Number(n) => Some(n.to_string()),
            Cell::Text(s) => Some(s.trim().to_string()),
            Cell::Null => None,
        }
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Number(v)
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Text(v.to_string())
    }
}

pub type Row = BTreeMap<String, Cell>;

/// Row-oriented dataset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dataset {
    pub rows: Vec<Row>,
}

impl Dataset {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// JSON form used for content fingerprints. Plain serialisation writes
    /// non-finite numbers as `null`; here they become tagged objects, which
    /// no other cell can produce.
    pub fn fingerprint_form(&self) -> serde_json::Value {
        use serde_json::{json, Map, Value};

        let rows = self
            .rows
            .iter()
            .map(|row| {
                let cells: Map<String, Value> = row
                    .iter()
                    .map(|(name, cell)| {
                        let value = match cell {
                            Cell::Null => Value::Null,
                            Cell::Number(n) if n.is_finite() => json!(n),
                            Cell::Number(n) => json!({ "non_finite": n.to_string() }),
                            Cell::Text(s) => Value::String(s.clone()),
                        };
                        (name.clone(), value)
                    })
                    .collect();
                Value::Object(cells)
            })
            .collect();
        Value::Array(rows)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every column name seen in any row, sorted
    pub fn columns(&self) -> Vec<String> {
        let names: BTreeSet<&String> = self.rows.iter().flat_map(|r| r.keys()).collect();
        names.into_iter().cloned().collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.rows.iter().any(|r| r.contains_key(name))
    }

    /// Cells of one column; rows lacking the key read as null
    pub fn column<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Cell> + 'a {
        self.rows.iter().map(move |r| r.get(name).unwrap_or(&Cell::Null))
    }

    pub fn numeric_column(&self, name: &str) -> Vec<Option<f64>> {
        self.column(name).map(Cell::as_f64).collect()
    }

    /// Values of `value_var` split by the levels of `group_var`, ordered by level.
    /// Rows missing either value are dropped.
    pub fn grouped_values(&self, group_var: &str, value_var: &str) -> BTreeMap<String, Vec<f64>> {
        let mut groups: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for row in &self.rows {
            let level = row.get(group_var).and_then(Cell::label);
            let value = row.get(value_var).and_then(Cell::as_f64);
            if let (Some(level), Some(value)) = (level, value) {
                groups.entry(level).or_default().push(value);
            }
        }
        groups
    }

    /// Distinct non-missing levels of a column
    pub fn levels(&self, name: &str) -> BTreeSet<String> {
        self.column(name).filter_map(Cell::label).collect()
    }
}

/// Variables chosen by the user in the presentation layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariableSelection {
    pub group_variable: Option<String>,
    pub dependent_vars: Vec<String>,
    pub independent_vars: Vec<String>,
}

/// Parameters of one analysis request; hashed into the cache key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisParams {
    pub group_variable: Option<String>,
    pub dependent_vars: Vec<String>,
    pub independent_vars: Vec<String>,
    /// Method-specific knobs forwarded to the backend untouched
    pub options: BTreeMap<String, serde_json::Value>,
}

impl AnalysisParams {
    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }
}

impl From<&VariableSelection> for AnalysisParams {
    fn from(selection: &VariableSelection) -> Self {
        Self {
            group_variable: selection.group_variable.clone(),
            dependent_vars: selection.dependent_vars.clone(),
            independent_vars: selection.independent_vars.clone(),
            options: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_data {
    use super::*;

    /// Build a dataset with a `group` column and a numeric `score` column
    pub fn grouped(groups: &[(&str, &[f64])]) -> Dataset {
        let mut rows = Vec::new();
        for (name, values) in groups {
            for v in values.iter() {
                let mut row = Row::new();
                row.insert("group".into(), Cell::from(*name));
                row.insert("score".into(), Cell::from(*v));
                rows.push(row);
            }
        }
        Dataset::new(rows)
    }
}
