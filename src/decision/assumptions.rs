use serde::{Deserialize, Serialize};

/// Result of one assumption test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AssumptionOutcome {
    Passed { p_value: f64 },
    Failed { p_value: f64 },
    /// The test itself could not run; says nothing about the data
    Errored { reason: String },
}

impl AssumptionOutcome {
    /// Classify a p-value: the assumption holds unless `p <= alpha`
    pub fn from_p_value(p_value: f64, alpha: f64) -> Self {
        if !p_value.is_finite() || !(0.0..=1.0).contains(&p_value) {
            return AssumptionOutcome::Errored {
                reason: format!("invalid p-value {}", p_value),
            };
        }
        if p_value > alpha {
            AssumptionOutcome::Passed { p_value }
        } else {
            AssumptionOutcome::Failed { p_value }
        }
    }

    pub fn errored(reason: impl Into<String>) -> Self {
        AssumptionOutcome::Errored { reason: reason.into() }
    }

    pub fn p_value(&self) -> Option<f64> {
        match self {
            AssumptionOutcome::Passed { p_value } | AssumptionOutcome::Failed { p_value } => Some(*p_value),
            AssumptionOutcome::Errored { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssumptionCheck {
    /// Group or variable the test was run on
    pub subject: String,
    pub outcome: AssumptionOutcome,
}

/// What the collected tests say about one assumption
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evidence {
    Holds,
    Violated,
    /// At least one test errored and none failed
    Inconclusive,
    Untested,
}

/// Normality per group plus one equal-variance test
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssumptionResults {
    pub normality: Vec<AssumptionCheck>,
    pub equal_variance: Option<AssumptionOutcome>,
}

impl AssumptionResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_normality(mut self, subject: impl Into<String>, outcome: AssumptionOutcome) -> Self {
        self.normality.push(AssumptionCheck {
            subject: subject.into(),
            outcome,
        });
        self
    }

    pub fn with_equal_variance(mut self, outcome: AssumptionOutcome) -> Self {
        self.equal_variance = Some(outcome);
        self
    }

    /// A failed test outranks an errored one: a confirmed violation is
    /// enough to rule the parametric method out.
    pub fn normality(&self) -> Evidence {
        if self.normality.is_empty() {
            return Evidence::Untested;
        }
        let outcomes = self.normality.iter().map(|c| &c.outcome);
        if outcomes.clone().any(|o| matches!(o, AssumptionOutcome::Failed { .. })) {
            Evidence::Violated
        } else if outcomes.clone().any(|o| matches!(o, AssumptionOutcome::Errored { .. })) {
            Evidence::Inconclusive
        } else {
            Evidence::Holds
        }
    }

    pub fn equal_variance(&self) -> Evidence {
        match &self.equal_variance {
            None => Evidence::Untested,
            Some(AssumptionOutcome::Passed { .. }) => Evidence::Holds,
            Some(AssumptionOutcome::Failed { .. }) => Evidence::Violated,
            Some(AssumptionOutcome::Errored { .. }) => Evidence::Inconclusive,
        }
    }

    pub fn failed_normality(&self) -> Vec<&AssumptionCheck> {
        self.normality
            .iter()
            .filter(|c| matches!(c.outcome, AssumptionOutcome::Failed { .. }))
            .collect()
    }

    pub fn errored_normality(&self) -> Vec<&AssumptionCheck> {
        self.normality
            .iter()
            .filter(|c| matches!(c.outcome, AssumptionOutcome::Errored { .. }))
            .collect()
    }

    /// Smallest normality p-value, for rationales
    pub fn min_normality_p(&self) -> Option<f64> {
        self.normality
            .iter()
            .filter_map(|c| c.outcome.p_value())
            .fold(None, |min, p| Some(min.map_or(p, |m: f64| m.min(p))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_p_value_classification() {
        assert!(matches!(AssumptionOutcome::from_p_value(0.3, 0.05), AssumptionOutcome::Passed { .. }));
        assert!(matches!(AssumptionOutcome::from_p_value(0.05, 0.05), AssumptionOutcome::Failed { .. }));
        assert!(matches!(AssumptionOutcome::from_p_value(f64::NAN, 0.05), AssumptionOutcome::Errored { .. }));
        assert!(matches!(AssumptionOutcome::from_p_value(1.7, 0.05), AssumptionOutcome::Errored { .. }));
    }

    #[test]
    fn test_failure_outranks_error() {
        let results = AssumptionResults::new()
            .with_normality("A", AssumptionOutcome::errored("too few values"))
            .with_normality("B", AssumptionOutcome::Failed { p_value: 0.001 });
        assert_eq!(results.normality(), Evidence::Violated);
        assert_eq!(results.errored_normality().len(), 1);
        assert_eq!(results.equal_variance(), Evidence::Untested);
    }

    #[test]
    fn test_error_alone_is_inconclusive() {
        let results = AssumptionResults::new()
            .with_normality("A", AssumptionOutcome::Passed { p_value: 0.4 })
            .with_normality("B", AssumptionOutcome::errored("backend crashed"))
            .with_equal_variance(AssumptionOutcome::Passed { p_value: 0.6 });
        assert_eq!(results.normality(), Evidence::Inconclusive);
        assert_eq!(results.equal_variance(), Evidence::Holds);
        assert_eq!(results.min_normality_p(), Some(0.4));
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(AssumptionOutcome::Failed { p_value: 0.01 }).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["p_value"], 0.01);
    }
}
