//! Precondition Validator
//!
//! Checks a request is well-formed before any cache lookup or backend load.
//! Rules are keyed by method category; every violation is reported at once.

mod prepared;

pub use prepared::{GroupSample, PreparedColumn, PreparedData};

use tracing::debug;

use crate::data::VariableKind;
use crate::error::{ValidationError, ValidationErrors, ValidationRule};
use crate::registry::{Method, MethodCategory};

/// Smallest group a comparison can be run on
pub const MIN_GROUP_SIZE: usize = 2;
/// Shapiro-Wilk needs at least three values
pub const MIN_NORMALITY_SAMPLE: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, method: Method, data: &PreparedData) -> Result<(), ValidationErrors> {
        let mut errors = Vec::new();

        for name in &data.missing_variables {
            errors.push(ValidationError::new(
                ValidationRule::MissingVariable,
                0,
                1,
                format!("variable '{}' does not exist in the dataset", name),
            ));
        }

        match method.category() {
            MethodCategory::Descriptive => check_descriptive(data, &mut errors),
            MethodCategory::AssumptionCheck => check_assumption_sample(data, &mut errors),
            MethodCategory::OneSample => {
                require_numeric_dependents(data, 1, &mut errors);
                require_sample_size(data.complete_cases, MIN_GROUP_SIZE, "observations", &mut errors);
            }
            MethodCategory::TwoGroup => {
                require_numeric_dependents(data, 1, &mut errors);
                check_groups(data, Some(2), &mut errors);
            }
            MethodCategory::KGroup => {
                require_numeric_dependents(data, 1, &mut errors);
                check_groups(data, None, &mut errors);
            }
            MethodCategory::Paired => check_measurements(data, Some(2), &mut errors),
            MethodCategory::RepeatedMeasures => check_measurements(data, None, &mut errors),
            MethodCategory::Contingency => check_contingency(data, &mut errors),
            MethodCategory::Correlation => check_correlation(data, &mut errors),
            MethodCategory::Regression => check_regression(method, data, &mut errors),
            MethodCategory::Multivariate => check_multivariate(data, &mut errors),
        }

        if errors.is_empty() {
            Ok(())
        } else {
            debug!("{} failed {} precondition(s)", method, errors.len());
            Err(ValidationErrors(errors))
        }
    }
}

fn check_descriptive(data: &PreparedData, errors: &mut Vec<ValidationError>) {
    if data.dependent.is_empty() && data.group_variable.is_none() && data.missing_variables.is_empty() {
        errors.push(ValidationError::new(
            ValidationRule::MissingVariable,
            0,
            1,
            "at least one variable must be selected",
        ));
    }
    require_sample_size(data.row_count, 1, "rows", errors);
}

fn check_assumption_sample(data: &PreparedData, errors: &mut Vec<ValidationError>) {
    require_numeric_dependents(data, 1, errors);
    if data.group_variable.is_some() {
        for group in &data.groups {
            if group.observations < MIN_NORMALITY_SAMPLE {
                errors.push(ValidationError::new(
                    ValidationRule::GroupSize,
                    group.observations,
                    MIN_NORMALITY_SAMPLE,
                    format!(
                        "group '{}' has {} observation(s); expected at least {}",
                        group.name, group.observations, MIN_NORMALITY_SAMPLE
                    ),
                ));
            }
        }
    } else if let Some(dep) = data.dependent.first() {
        require_sample_size(dep.non_missing, MIN_NORMALITY_SAMPLE, "observations", errors);
    }
}

/// Exactly `want` numeric dependent variables, or at least `want` when the
/// category takes several
fn require_numeric_dependents(data: &PreparedData, want: usize, errors: &mut Vec<ValidationError>) {
    if data.dependent.len() < want && data.missing_variables.is_empty() {
        errors.push(ValidationError::new(
            ValidationRule::MissingVariable,
            data.dependent.len(),
            want,
            format!("expected {} dependent variable(s), got {}", want, data.dependent.len()),
        ));
    }
    for column in data.dependent.iter().filter(|c| !c.is_numeric()) {
        errors.push(ValidationError::new(
            ValidationRule::VariableType,
            0,
            1,
            format!("dependent variable '{}' must be numeric", column.name),
        ));
    }
}

fn require_sample_size(observed: usize, required: usize, what: &str, errors: &mut Vec<ValidationError>) {
    if observed < required {
        errors.push(ValidationError::new(
            ValidationRule::SampleSize,
            observed,
            required,
            format!("{} {}; expected at least {}", observed, what, required),
        ));
    }
}

/// Group-comparison rules. `exact` pins the number of groups; otherwise two or more.
fn check_groups(data: &PreparedData, exact: Option<usize>, errors: &mut Vec<ValidationError>) {
    let Some(group_var) = &data.group_variable else {
        if data.missing_variables.is_empty() {
            errors.push(ValidationError::new(
                ValidationRule::MissingVariable,
                0,
                1,
                "a grouping variable is required",
            ));
        }
        return;
    };

    let observed = data.groups.len();
    let names = data.groups.iter().map(|g| g.name.as_str()).collect::<Vec<_>>().join(", ");
    match exact {
        Some(expected) if observed != expected => errors.push(ValidationError::new(
            ValidationRule::GroupCount,
            observed,
            expected,
            format!(
                "grouping variable '{}' has {} group(s) ({}); expected exactly {}",
                group_var.name, observed, names, expected
            ),
        )),
        None if observed < 2 => errors.push(ValidationError::new(
            ValidationRule::GroupCount,
            observed,
            2,
            format!(
                "grouping variable '{}' has {} group(s) ({}); expected at least 2",
                group_var.name, observed, names
            ),
        )),
        _ => {}
    }

    for group in data.groups.iter().filter(|g| g.observations < MIN_GROUP_SIZE) {
        errors.push(ValidationError::new(
            ValidationRule::GroupSize,
            group.observations,
            MIN_GROUP_SIZE,
            format!(
                "group '{}' has {} observation(s); expected at least {}",
                group.name, group.observations, MIN_GROUP_SIZE
            ),
        ));
    }
}

/// Paired and repeated designs: every measurement column must carry the same
/// number of non-missing values, otherwise pairs were lost to missing data.
fn check_measurements(data: &PreparedData, exact: Option<usize>, errors: &mut Vec<ValidationError>) {
    let count = data.dependent.len();
    let wanted = exact.unwrap_or(2);
    let count_ok = match exact {
        Some(n) => count == n,
        None => count >= 2,
    };
    if !count_ok && data.missing_variables.is_empty() {
        errors.push(ValidationError::new(
            ValidationRule::MissingVariable,
            count,
            wanted,
            match exact {
                Some(n) => format!("expected exactly {} measurement columns, got {}", n, count),
                None => format!("expected at least 2 measurement columns, got {}", count),
            },
        ));
    }

    for column in data.dependent.iter().filter(|c| !c.is_numeric()) {
        errors.push(ValidationError::new(
            ValidationRule::VariableType,
            0,
            1,
            format!("measurement column '{}' must be numeric", column.name),
        ));
    }

    if let Some(first) = data.dependent.first() {
        for other in data.dependent.iter().skip(1) {
            if other.non_missing != first.non_missing {
                errors.push(ValidationError::new(
                    ValidationRule::PairedLength,
                    other.non_missing,
                    first.non_missing,
                    format!(
                        "measurement columns differ in non-missing length: '{}' has {}, '{}' has {}",
                        first.name, first.non_missing, other.name, other.non_missing
                    ),
                ));
            }
        }
    }

    if count >= 2 {
        require_sample_size(data.complete_cases, MIN_GROUP_SIZE, "complete pairs", errors);
    }
}

fn check_contingency(data: &PreparedData, errors: &mut Vec<ValidationError>) {
    let columns: Vec<_> = data
        .group_variable
        .iter()
        .chain(data.dependent.iter())
        .chain(data.independent.iter())
        .collect();

    if columns.len() < 2 && data.missing_variables.is_empty() {
        errors.push(ValidationError::new(
            ValidationRule::MissingVariable,
            columns.len(),
            2,
            format!("expected 2 categorical variables, got {}", columns.len()),
        ));
    }
    for column in columns.iter().take(2) {
        if column.kind != VariableKind::Categorical {
            errors.push(ValidationError::new(
                ValidationRule::VariableType,
                0,
                1,
                format!("variable '{}' must be categorical", column.name),
            ));
        } else if column.levels < 2 {
            errors.push(ValidationError::new(
                ValidationRule::GroupCount,
                column.levels,
                2,
                format!("variable '{}' has {} level(s); expected at least 2", column.name, column.levels),
            ));
        }
    }
}

fn check_correlation(data: &PreparedData, errors: &mut Vec<ValidationError>) {
    let columns: Vec<_> = data.dependent.iter().chain(data.independent.iter()).collect();
    if columns.len() != 2 && data.missing_variables.is_empty() {
        errors.push(ValidationError::new(
            ValidationRule::MissingVariable,
            columns.len(),
            2,
            format!("expected exactly 2 variables, got {}", columns.len()),
        ));
    }
    for column in columns.iter().filter(|c| !c.is_numeric()) {
        errors.push(ValidationError::new(
            ValidationRule::VariableType,
            0,
            1,
            format!("variable '{}' must be numeric", column.name),
        ));
    }
    require_sample_size(data.complete_cases, 3, "complete pairs", errors);
}

fn check_regression(method: Method, data: &PreparedData, errors: &mut Vec<ValidationError>) {
    let predictors = data.independent.len();

    if data.dependent.len() != 1 && data.missing_variables.is_empty() {
        errors.push(ValidationError::new(
            ValidationRule::MissingVariable,
            data.dependent.len(),
            1,
            format!("expected exactly 1 outcome variable, got {}", data.dependent.len()),
        ));
    }
    if predictors == 0 && data.missing_variables.is_empty() {
        errors.push(ValidationError::new(
            ValidationRule::MissingVariable,
            0,
            1,
            "at least one predictor is required",
        ));
    }
    if method == Method::LinearRegression && predictors > 1 {
        errors.push(ValidationError::new(
            ValidationRule::MissingVariable,
            predictors,
            1,
            format!("simple linear regression takes 1 predictor, got {}", predictors),
        ));
    }

    if let Some(outcome) = data.dependent.first() {
        if method == Method::LogisticRegression {
            if outcome.levels != 2 {
                errors.push(ValidationError::new(
                    ValidationRule::VariableType,
                    outcome.levels,
                    2,
                    format!("outcome '{}' has {} level(s); logistic regression needs a binary outcome", outcome.name, outcome.levels),
                ));
            }
        } else if !outcome.is_numeric() {
            errors.push(ValidationError::new(
                ValidationRule::VariableType,
                0,
                1,
                format!("outcome '{}' must be numeric", outcome.name),
            ));
        }
    }
    for column in data.independent.iter().filter(|c| !c.is_numeric()) {
        errors.push(ValidationError::new(
            ValidationRule::VariableType,
            0,
            1,
            format!("predictor '{}' must be numeric", column.name),
        ));
    }

    let required = predictors + 2;
    if data.complete_cases < required {
        errors.push(ValidationError::new(
            ValidationRule::SampleSize,
            data.complete_cases,
            required,
            format!(
                "{} complete case(s) for {} predictor(s); expected at least {}",
                data.complete_cases, predictors, required
            ),
        ));
    }
}

fn check_multivariate(data: &PreparedData, errors: &mut Vec<ValidationError>) {
    let columns: Vec<_> = data.dependent.iter().chain(data.independent.iter()).collect();
    if columns.len() < 2 && data.missing_variables.is_empty() {
        errors.push(ValidationError::new(
            ValidationRule::MissingVariable,
            columns.len(),
            2,
            format!("expected at least 2 variables, got {}", columns.len()),
        ));
    }
    for column in columns.iter().filter(|c| !c.is_numeric()) {
        errors.push(ValidationError::new(
            ValidationRule::VariableType,
            0,
            1,
            format!("variable '{}' must be numeric", column.name),
        ));
    }
    let required = (columns.len() + 1).max(3);
    require_sample_size(data.complete_cases, required, "complete cases", errors);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{test_data, AnalysisParams, Cell, Dataset, Row};

    fn grouped_params() -> AnalysisParams {
        AnalysisParams {
            group_variable: Some("group".into()),
            dependent_vars: vec!["score".into()],
            ..Default::default()
        }
    }

    fn validate(method: Method, ds: &Dataset, params: &AnalysisParams) -> Result<(), ValidationErrors> {
        Validator::new().validate(method, &PreparedData::prepare(ds, params))
    }

    fn two_group_methods() -> Vec<Method> {
        Method::ALL
            .iter()
            .copied()
            .filter(|m| m.category() == MethodCategory::TwoGroup)
            .collect()
    }

    #[test]
    fn test_two_group_methods_reject_three_groups() {
        let ds = test_data::grouped(&[("A", &[1.0, 2.0]), ("B", &[3.0, 4.0]), ("C", &[5.0, 6.0])]);
        for method in two_group_methods() {
            let errors = validate(method, &ds, &grouped_params()).unwrap_err();
            assert!(errors.has_rule(ValidationRule::GroupCount), "{} accepted 3 groups", method);
            let message = &errors.0[0].message;
            assert!(message.contains('3') && message.contains("exactly 2"), "{}", message);
        }
    }

    #[test]
    fn test_two_group_methods_reject_single_observation_group() {
        let ds = test_data::grouped(&[("A", &[1.0]), ("B", &[2.0, 3.0])]);
        for method in two_group_methods() {
            let errors = validate(method, &ds, &grouped_params()).unwrap_err();
            let err = errors.iter().find(|e| e.rule == ValidationRule::GroupSize).unwrap();
            assert!(err.message.contains("'A'"));
            assert!(err.message.contains('1'));
            assert_eq!(err.observed, 1);
            assert_eq!(err.required, 2);
        }
    }

    #[test]
    fn test_two_group_methods_accept_valid_input() {
        let ds = test_data::grouped(&[("A", &[1.0, 2.0]), ("B", &[3.0, 4.0, 5.0])]);
        for method in two_group_methods() {
            assert!(validate(method, &ds, &grouped_params()).is_ok(), "{} rejected valid data", method);
        }
    }

    #[test]
    fn test_k_group_allows_three_groups_but_checks_sizes() {
        let ds = test_data::grouped(&[("A", &[1.0, 2.0]), ("B", &[3.0, 4.0]), ("C", &[5.0, 6.0])]);
        assert!(validate(Method::OneWayAnova, &ds, &grouped_params()).is_ok());

        let ds = test_data::grouped(&[("A", &[1.0, 2.0]), ("B", &[3.0]), ("C", &[5.0, 6.0])]);
        let errors = validate(Method::KruskalWallis, &ds, &grouped_params()).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors.0[0].message.contains("'B'"));

        let ds = test_data::grouped(&[("A", &[1.0, 2.0])]);
        let errors = validate(Method::OneWayAnova, &ds, &grouped_params()).unwrap_err();
        assert!(errors.has_rule(ValidationRule::GroupCount));
    }

    #[test]
    fn test_missing_group_variable() {
        let ds = test_data::grouped(&[("A", &[1.0, 2.0]), ("B", &[3.0, 4.0])]);
        let params = AnalysisParams { dependent_vars: vec!["score".into()], ..Default::default() };
        let errors = validate(Method::IndependentTTest, &ds, &params).unwrap_err();
        assert!(errors.has_rule(ValidationRule::MissingVariable));
    }

    #[test]
    fn test_categorical_dependent_rejected() {
        let ds = Dataset::from_json(r#"[{"group": "A", "y": "low"}, {"group": "B", "y": "high"}]"#).unwrap();
        let params = AnalysisParams {
            group_variable: Some("group".into()),
            dependent_vars: vec!["y".into()],
            ..Default::default()
        };
        let errors = validate(Method::MannWhitneyU, &ds, &params).unwrap_err();
        assert!(errors.has_rule(ValidationRule::VariableType));
    }

    fn paired(pre: &[Option<f64>], post: &[Option<f64>]) -> Dataset {
        let rows = pre
            .iter()
            .zip(post.iter())
            .map(|(a, b)| {
                let mut row = Row::new();
                row.insert("pre".into(), a.map(Cell::Number).unwrap_or(Cell::Null));
                row.insert("post".into(), b.map(Cell::Number).unwrap_or(Cell::Null));
                row
            })
            .collect();
        Dataset::new(rows)
    }

    #[test]
    fn test_paired_requires_equal_non_missing_length() {
        let params = AnalysisParams { dependent_vars: vec!["pre".into(), "post".into()], ..Default::default() };

        let ds = paired(&[Some(1.0), Some(2.0), Some(3.0)], &[Some(1.5), None, Some(3.5)]);
        let errors = validate(Method::PairedTTest, &ds, &params).unwrap_err();
        let err = errors.iter().find(|e| e.rule == ValidationRule::PairedLength).unwrap();
        assert_eq!((err.observed, err.required), (2, 3));

        let ds = paired(&[Some(1.0), Some(2.0), Some(3.0)], &[Some(1.5), Some(2.5), Some(3.5)]);
        assert!(validate(Method::WilcoxonSignedRank, &ds, &params).is_ok());
    }

    #[test]
    fn test_regression_minimum_sample() {
        let ds = Dataset::from_json(
            r#"[{"y": 1, "x1": 2, "x2": 3}, {"y": 2, "x1": 3, "x2": 1}, {"y": 3, "x1": 1, "x2": 2}]"#,
        )
        .unwrap();
        let params = AnalysisParams {
            dependent_vars: vec!["y".into()],
            independent_vars: vec!["x1".into(), "x2".into()],
            ..Default::default()
        };
        let errors = validate(Method::MultipleRegression, &ds, &params).unwrap_err();
        let err = errors.iter().find(|e| e.rule == ValidationRule::SampleSize).unwrap();
        assert_eq!((err.observed, err.required), (3, 4));

        let params = AnalysisParams {
            dependent_vars: vec!["y".into()],
            independent_vars: vec!["x1".into()],
            ..Default::default()
        };
        assert!(validate(Method::LinearRegression, &ds, &params).is_ok());
    }

    #[test]
    fn test_logistic_needs_binary_outcome() {
        let ds = Dataset::from_json(
            r#"[{"y": "yes", "x": 1}, {"y": "no", "x": 2}, {"y": "maybe", "x": 3}, {"y": "no", "x": 4}]"#,
        )
        .unwrap();
        let params = AnalysisParams {
            dependent_vars: vec!["y".into()],
            independent_vars: vec!["x".into()],
            ..Default::default()
        };
        let errors = validate(Method::LogisticRegression, &ds, &params).unwrap_err();
        assert!(errors.has_rule(ValidationRule::VariableType));
    }

    #[test]
    fn test_contingency_requires_categorical_pair() {
        let ds = Dataset::from_json(
            r#"[{"sex": "f", "smoker": "y"}, {"sex": "m", "smoker": "n"}, {"sex": "f", "smoker": "n"}]"#,
        )
        .unwrap();
        let params = AnalysisParams {
            dependent_vars: vec!["sex".into()],
            independent_vars: vec!["smoker".into()],
            ..Default::default()
        };
        assert!(validate(Method::ChiSquareTest, &ds, &params).is_ok());
    }

    #[test]
    fn test_unknown_variable_is_reported_once() {
        let ds = test_data::grouped(&[("A", &[1.0, 2.0]), ("B", &[3.0, 4.0])]);
        let params = AnalysisParams {
            group_variable: Some("arm".into()),
            dependent_vars: vec!["score".into()],
            ..Default::default()
        };
        let errors = validate(Method::IndependentTTest, &ds, &params).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors.0[0].message.contains("'arm'"));
    }
}
