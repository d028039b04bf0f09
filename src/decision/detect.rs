//! Grouping-variable auto-detection, used only when the user selected none

use regex::Regex;

use crate::data::{DataProfile, VariableProfile};

/// Column names that usually hold group labels
const GROUPING_NAME_PATTERN: &str = r"(?i)(group|grp|condition|treatment|arm|cohort)";

#[derive(Debug, Clone)]
pub struct GroupingDetector {
    name_hint: Option<Regex>,
    max_levels: usize,
}

impl GroupingDetector {
    pub fn new(max_levels: usize) -> Self {
        Self {
            name_hint: Regex::new(GROUPING_NAME_PATTERN).ok(),
            max_levels,
        }
    }

    fn looks_like_grouping(&self, name: &str) -> bool {
        self.name_hint.as_ref().is_some_and(|re| re.is_match(name))
    }

    /// Best categorical candidate with 2..=max levels, skipping `exclude`.
    /// Prefers grouping-like names, then fewer levels, then name order.
    pub fn detect<'a>(&self, profile: &'a DataProfile, exclude: &[String]) -> Option<&'a VariableProfile> {
        profile
            .categorical_variables()
            .filter(|v| (2..=self.max_levels).contains(&v.distinct_count))
            .filter(|v| !exclude.contains(&v.name))
            .min_by(|a, b| {
                let rank = |v: &VariableProfile| (!self.looks_like_grouping(&v.name), v.distinct_count);
                rank(a).cmp(&rank(b)).then_with(|| a.name.cmp(&b.name))
            })
    }
}

impl Default for GroupingDetector {
    fn default() -> Self {
        Self::new(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::VariableKind;

    fn var(name: &str, kind: VariableKind, distinct: usize) -> VariableProfile {
        VariableProfile {
            name: name.to_string(),
            kind,
            distinct_count: distinct,
            missing_count: 0,
        }
    }

    fn profile(vars: Vec<VariableProfile>) -> DataProfile {
        DataProfile {
            row_count: 30,
            numeric_var_count: vars.iter().filter(|v| v.kind == VariableKind::Numeric).count(),
            categorical_var_count: vars.iter().filter(|v| v.kind == VariableKind::Categorical).count(),
            variables: vars,
        }
    }

    #[test]
    fn test_prefers_grouping_like_names() {
        let p = profile(vec![
            var("sex", VariableKind::Categorical, 2),
            var("Treatment_Arm", VariableKind::Categorical, 3),
            var("score", VariableKind::Numeric, 30),
        ]);
        let detector = GroupingDetector::default();
        assert_eq!(detector.detect(&p, &[]).unwrap().name, "Treatment_Arm");
    }

    #[test]
    fn test_falls_back_to_fewest_levels_then_name() {
        let p = profile(vec![
            var("site", VariableKind::Categorical, 4),
            var("region", VariableKind::Categorical, 2),
            var("colour", VariableKind::Categorical, 2),
        ]);
        let detector = GroupingDetector::default();
        assert_eq!(detector.detect(&p, &[]).unwrap().name, "colour");
    }

    #[test]
    fn test_ignores_ids_constants_and_excluded() {
        let p = profile(vec![
            var("participant", VariableKind::Categorical, 30),
            var("lab", VariableKind::Categorical, 1),
            var("group", VariableKind::Categorical, 2),
        ]);
        let detector = GroupingDetector::new(10);
        assert!(detector.detect(&p, &["group".to_string()]).is_none());
    }
}
