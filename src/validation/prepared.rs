use serde::Serialize;

use crate::data::{AnalysisParams, Dataset, VariableKind, VariableProfile};

/// Observation count of one level of the grouping variable
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSample {
    pub name: String,
    pub observations: usize,
}

/// One analysis variable as the validator sees it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreparedColumn {
    pub name: String,
    pub kind: VariableKind,
    pub levels: usize,
    pub non_missing: usize,
}

impl PreparedColumn {
    pub fn is_numeric(&self) -> bool {
        self.kind == VariableKind::Numeric
    }
}

/// Request data reduced to what precondition rules need
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PreparedData {
    pub row_count: usize,
    pub group_variable: Option<PreparedColumn>,
    /// Levels of the grouping variable with their observation counts, by level name
    pub groups: Vec<GroupSample>,
    pub dependent: Vec<PreparedColumn>,
    pub independent: Vec<PreparedColumn>,
    /// Referenced variables that do not exist in the dataset
    pub missing_variables: Vec<String>,
    /// Rows where every dependent and independent variable is present
    pub complete_cases: usize,
}

impl PreparedData {
    pub fn prepare(dataset: &Dataset, params: &AnalysisParams) -> Self {
        let row_count = dataset.len();
        let mut missing_variables = Vec::new();

        let mut column = |name: &String| -> Option<PreparedColumn> {
            if !dataset.has_column(name) {
                missing_variables.push(name.clone());
                return None;
            }
            let profile = VariableProfile::of(dataset, name.clone());
            Some(PreparedColumn {
                non_missing: profile.non_missing(row_count),
                name: profile.name,
                kind: profile.kind,
                levels: profile.distinct_count,
            })
        };

        let group_variable = params.group_variable.as_ref().and_then(&mut column);
        let dependent: Vec<PreparedColumn> = params.dependent_vars.iter().filter_map(&mut column).collect();
        let independent: Vec<PreparedColumn> = params.independent_vars.iter().filter_map(&mut column).collect();

        let groups = match (&group_variable, dependent.first()) {
            (Some(g), Some(dep)) => dataset
                .grouped_values(&g.name, &dep.name)
                .into_iter()
                .map(|(name, values)| GroupSample { name, observations: values.len() })
                .collect(),
            (Some(g), None) => count_levels(dataset, &g.name),
            _ => Vec::new(),
        };

        let used: Vec<&str> = dependent
            .iter()
            .chain(independent.iter())
            .map(|c| c.name.as_str())
            .collect();
        let complete_cases = if used.is_empty() {
            0
        } else {
            dataset
                .rows
                .iter()
                .filter(|row| used.iter().all(|name| row.get(*name).is_some_and(|c| !c.is_missing())))
                .count()
        };

        Self {
            row_count,
            group_variable,
            groups,
            dependent,
            independent,
            missing_variables,
            complete_cases,
        }
    }
}

fn count_levels(dataset: &Dataset, group_var: &str) -> Vec<GroupSample> {
    let mut counts = std::collections::BTreeMap::<String, usize>::new();
    for level in dataset.column(group_var).filter_map(|c| c.label()) {
        *counts.entry(level).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(name, observations)| GroupSample { name, observations })
        .collect()
}
