use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{Cell, Dataset};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    Numeric,
    Categorical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableProfile {
    pub name: String,
    pub kind: VariableKind,
    /// Number of distinct non-missing values
    pub distinct_count: usize,
    pub missing_count: usize,
}

/// Shape summary of a dataset. The presentation layer may send only the
/// counts; `variables` is filled when the profile is computed locally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataProfile {
    pub row_count: usize,
    pub numeric_var_count: usize,
    pub categorical_var_count: usize,
    #[serde(default)]
    pub variables: Vec<VariableProfile>,
}

impl DataProfile {
    pub fn from_dataset(dataset: &Dataset) -> Self {
        let variables: Vec<VariableProfile> = dataset
            .columns()
            .into_iter()
            .map(|name| VariableProfile::of(dataset, name))
            .collect();

        let numeric_var_count = variables.iter().filter(|v| v.kind == VariableKind::Numeric).count();

        Self {
            row_count: dataset.len(),
            numeric_var_count,
            categorical_var_count: variables.len() - numeric_var_count,
            variables,
        }
    }

    pub fn variable(&self, name: &str) -> Option<&VariableProfile> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn numeric_variables(&self) -> impl Iterator<Item = &VariableProfile> {
        self.variables.iter().filter(|v| v.kind == VariableKind::Numeric)
    }

    pub fn categorical_variables(&self) -> impl Iterator<Item = &VariableProfile> {
        self.variables.iter().filter(|v| v.kind == VariableKind::Categorical)
    }
}

impl VariableProfile {
    pub fn of(dataset: &Dataset, name: String) -> Self {
        profile_variable(dataset, name)
    }

    pub fn non_missing(&self, row_count: usize) -> usize {
        row_count.saturating_sub(self.missing_count)
    }
}

fn profile_variable(dataset: &Dataset, name: String) -> VariableProfile {
    let mut missing_count = 0;
    let mut all_numeric = true;
    let mut distinct = BTreeSet::new();

    for cell in dataset.column(&name) {
        match cell.label() {
            None => missing_count += 1,
            Some(label) => {
                if matches!(cell, Cell::Text(_)) && cell.as_f64().is_none() {
                    all_numeric = false;
                }
                distinct.insert(label);
            }
        }
    }

    // A column with no observed values carries no type evidence
    let kind = if all_numeric && !distinct.is_empty() {
        VariableKind::Numeric
    } else {
        VariableKind::Categorical
    };

    VariableProfile {
        name,
        kind,
        distinct_count: distinct.len(),
        missing_count,
    }
}
