//! Decision Engine
//!
//! Ranks candidate methods for an analysis purpose from the data profile,
//! the variable roles and the outcome of assumption tests. An assumption
//! test that could not run is treated as missing evidence: the engine then
//! lowers its confidence, says so in the rationale and lists both method
//! families as alternatives instead of guessing.

mod assumptions;
mod detect;

pub use assumptions::{AssumptionCheck, AssumptionOutcome, AssumptionResults, Evidence};
pub use detect::GroupingDetector;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

use crate::data::{DataProfile, VariableKind, VariableSelection};
use crate::registry::Method;

/// What the user wants to learn from the data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    CompareGroups,
    CompareRepeated,
    Relationship,
    Predict,
    Association,
    Describe,
    ReduceDimensions,
}

impl Purpose {
    pub const ALL: [Purpose; 7] = [
        Purpose::CompareGroups,
        Purpose::CompareRepeated,
        Purpose::Relationship,
        Purpose::Predict,
        Purpose::Association,
        Purpose::Describe,
        Purpose::ReduceDimensions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::CompareGroups => "compare_groups",
            Purpose::CompareRepeated => "compare_repeated",
            Purpose::Relationship => "relationship",
            Purpose::Predict => "predict",
            Purpose::Association => "association",
            Purpose::Describe => "describe",
            Purpose::ReduceDimensions => "reduce_dimensions",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown purpose '{0}'")]
pub struct UnknownPurpose(pub String);

impl FromStr for Purpose {
    type Err = UnknownPurpose;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Purpose::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownPurpose(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableSource {
    UserSelected,
    AutoDetected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedVariable {
    pub name: String,
    pub source: VariableSource,
    /// Distinct levels, when the profile knows the variable
    pub levels: Option<usize>,
}

/// Variable roles the recommendation was based on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectedVariables {
    pub group_variable: Option<DetectedVariable>,
    pub dependent_vars: Vec<String>,
    pub independent_vars: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub method: Method,
    /// In [0, 1]
    pub confidence: f64,
    pub rationale: String,
    pub detected_variables: DetectedVariables,
    pub alternative_methods: Vec<Method>,
    /// Follow-up pairwise comparison for k-group methods
    pub post_hoc: Option<Method>,
}

/// Related methods that differ only in the assumptions they make
struct Family {
    parametric: Method,
    /// Parametric method that drops the equal-variance assumption
    unequal_variance: Option<Method>,
    rank_based: Method,
    /// Second distribution-free option, where the family has one
    extra_rank_based: Option<Method>,
    post_hoc: Option<PostHoc>,
}

struct PostHoc {
    parametric: Method,
    unequal_variance: Method,
    rank_based: Method,
}

const TWO_GROUP: Family = Family {
    parametric: Method::IndependentTTest,
    unequal_variance: Some(Method::WelchTTest),
    rank_based: Method::MannWhitneyU,
    extra_rank_based: None,
    post_hoc: None,
};

const K_GROUP: Family = Family {
    parametric: Method::OneWayAnova,
    unequal_variance: Some(Method::WelchAnova),
    rank_based: Method::KruskalWallis,
    extra_rank_based: None,
    post_hoc: Some(PostHoc {
        parametric: Method::TukeyHsd,
        unequal_variance: Method::GamesHowell,
        rank_based: Method::DunnTest,
    }),
};

const PAIRED: Family = Family {
    parametric: Method::PairedTTest,
    unequal_variance: None,
    rank_based: Method::WilcoxonSignedRank,
    extra_rank_based: None,
    post_hoc: None,
};

const REPEATED: Family = Family {
    parametric: Method::RepeatedMeasuresAnova,
    unequal_variance: None,
    rank_based: Method::FriedmanTest,
    extra_rank_based: None,
    post_hoc: None,
};

const CORRELATION: Family = Family {
    parametric: Method::PearsonCorrelation,
    unequal_variance: None,
    rank_based: Method::SpearmanCorrelation,
    extra_rank_based: Some(Method::KendallTau),
    post_hoc: None,
};

impl Family {
    fn members(&self) -> Vec<Method> {
        let mut members = vec![self.parametric];
        members.extend(self.unequal_variance);
        members.push(self.rank_based);
        members
    }

    /// The rest of the family, rank-based first
    fn others(&self, chosen: Method) -> Vec<Method> {
        let mut others: Vec<Method> = self.members().into_iter().filter(|m| *m != chosen).collect();
        others.sort_by_key(|m| m.is_parametric());
        others
    }

    /// Alternatives when an assumption could not be tested: always at least
    /// one parametric and one distribution-free method. With no other
    /// rank-based member, the chosen rank-based method is listed first.
    fn hedged(&self, chosen: Method) -> Vec<Method> {
        let mut alternatives = self.others(chosen);
        if chosen == self.rank_based {
            alternatives.extend(self.extra_rank_based);
        }
        if !alternatives.iter().any(|m| !m.is_parametric()) {
            alternatives.insert(0, chosen);
        }
        alternatives
    }

    fn post_hoc_for(&self, chosen: Method) -> Option<Method> {
        let ph = self.post_hoc.as_ref()?;
        if chosen == self.parametric {
            Some(ph.parametric)
        } else if Some(chosen) == self.unequal_variance {
            Some(ph.unequal_variance)
        } else {
            Some(ph.rank_based)
        }
    }
}

struct Choice {
    method: Method,
    confidence: f64,
    rationale: String,
    alternatives: Vec<Method>,
    post_hoc: Option<Method>,
}

impl Choice {
    fn new(method: Method, confidence: f64, rationale: impl Into<String>, alternatives: Vec<Method>) -> Self {
        Self {
            method,
            confidence,
            rationale: rationale.into(),
            alternatives,
            post_hoc: None,
        }
    }

    fn insufficient(reason: impl fmt::Display) -> Self {
        Self::new(
            Method::DescriptiveStatistics,
            0.3,
            format!("{}; falling back to descriptive statistics.", reason),
            Vec::new(),
        )
    }

    fn prefixed(mut self, context: impl fmt::Display) -> Self {
        self.rationale = format!("{} {}", context, self.rationale);
        self
    }
}

fn subjects(checks: &[&AssumptionCheck]) -> String {
    checks.iter().map(|c| c.subject.as_str()).collect::<Vec<_>>().join(", ")
}

fn fmt_p(p: Option<f64>) -> String {
    p.map(|p| format!("{:.3}", p)).unwrap_or_else(|| "n/a".to_string())
}

/// Group count implied by per-group normality checks, trusted only when an
/// equal-variance test ran across those groups
fn inferred_group_count(assumptions: &AssumptionResults) -> Option<usize> {
    assumptions.equal_variance.as_ref()?;
    let subjects: BTreeSet<&str> = assumptions.normality.iter().map(|c| c.subject.as_str()).collect();
    Some(subjects.len())
}

/// Pick within a family from the assumption evidence
fn select(family: &Family, assumptions: &AssumptionResults) -> Choice {
    let normality = assumptions.normality();
    let variance = if family.unequal_variance.is_some() {
        assumptions.equal_variance()
    } else {
        Evidence::Holds
    };
    let robust = family.unequal_variance.unwrap_or(family.parametric);

    let mut choice = match (normality, variance) {
        (Evidence::Violated, _) => {
            let mut rationale = format!(
                "Normality is violated for {} (smallest p = {}); {} does not assume normally distributed data.",
                subjects(&assumptions.failed_normality()),
                fmt_p(assumptions.min_normality_p()),
                family.rank_based.display_name()
            );
            let mut confidence = 0.75;
            let errored = assumptions.errored_normality();
            if !errored.is_empty() {
                rationale.push_str(&format!(" Also could not verify normality for {}.", subjects(&errored)));
                confidence -= 0.1;
            }
            Choice::new(family.rank_based, confidence, rationale, vec![robust])
        }
        (Evidence::Inconclusive, _) | (_, Evidence::Inconclusive) => {
            let mut unverified = Vec::new();
            for check in assumptions.errored_normality() {
                if let AssumptionOutcome::Errored { reason } = &check.outcome {
                    unverified.push(format!("normality for {} ({})", check.subject, reason));
                }
            }
            if let Some(AssumptionOutcome::Errored { reason }) = &assumptions.equal_variance {
                if family.unequal_variance.is_some() {
                    unverified.push(format!("equal variances ({})", reason));
                }
            }
            let chosen = if family.unequal_variance.is_some() {
                robust
            } else {
                family.rank_based
            };
            let rationale = format!(
                "Assumption check inconclusive: could not verify {}. Neither normal nor non-normal data is assumed; \
                 {} is the more robust choice, and both parametric and rank-based options are listed as alternatives.",
                unverified.join(" and "),
                chosen.display_name()
            );
            Choice::new(chosen, 0.45, rationale, family.hedged(chosen))
        }
        (Evidence::Untested, _) => Choice::new(
            robust,
            0.6,
            format!(
                "Assumptions were not tested; {} is a reasonable default but should be confirmed.",
                robust.display_name()
            ),
            family.others(robust),
        ),
        (Evidence::Holds, Evidence::Violated) => Choice::new(
            robust,
            0.85,
            format!(
                "Normality holds but equal variances do not (p = {}); {} does not assume equal variances.",
                fmt_p(assumptions.equal_variance.as_ref().and_then(AssumptionOutcome::p_value)),
                robust.display_name()
            ),
            vec![family.rank_based],
        ),
        (Evidence::Holds, Evidence::Untested) => Choice::new(
            robust,
            0.8,
            format!(
                "Normality holds (smallest p = {}); equal variances were not tested, so {} avoids assuming them.",
                fmt_p(assumptions.min_normality_p()),
                robust.display_name()
            ),
            family.others(robust),
        ),
        (Evidence::Holds, Evidence::Holds) => {
            let rationale = if family.unequal_variance.is_some() {
                format!(
                    "Normality (smallest p = {}) and equal variances (p = {}) both hold; {} is the most powerful option.",
                    fmt_p(assumptions.min_normality_p()),
                    fmt_p(assumptions.equal_variance.as_ref().and_then(AssumptionOutcome::p_value)),
                    family.parametric.display_name()
                )
            } else {
                format!(
                    "Normality holds (smallest p = {}); {} is the most powerful option.",
                    fmt_p(assumptions.min_normality_p()),
                    family.parametric.display_name()
                )
            };
            Choice::new(family.parametric, 0.92, rationale, family.others(family.parametric))
        }
    };
    choice.post_hoc = family.post_hoc_for(choice.method);
    choice
}

pub struct DecisionEngine {
    detector: GroupingDetector,
}

impl DecisionEngine {
    pub fn new(max_auto_group_levels: usize) -> Self {
        Self {
            detector: GroupingDetector::new(max_auto_group_levels),
        }
    }

    /// Resolve variable roles. A user-selected grouping variable always wins;
    /// auto-detection only fills the gap.
    pub fn detect_variables(&self, profile: &DataProfile, selection: Option<&VariableSelection>) -> DetectedVariables {
        let selection = selection.cloned().unwrap_or_default();

        let group_variable = match selection.group_variable {
            Some(name) => Some(DetectedVariable {
                levels: profile.variable(&name).map(|v| v.distinct_count),
                name,
                source: VariableSource::UserSelected,
            }),
            None => self
                .detector
                .detect(profile, &selection.dependent_vars)
                .map(|v| DetectedVariable {
                    name: v.name.clone(),
                    source: VariableSource::AutoDetected,
                    levels: Some(v.distinct_count),
                }),
        };

        let dependent_vars = if selection.dependent_vars.is_empty() {
            let group_name = group_variable.as_ref().map(|g| g.name.as_str());
            profile
                .numeric_variables()
                .filter(|v| Some(v.name.as_str()) != group_name)
                .filter(|v| !selection.independent_vars.contains(&v.name))
                .map(|v| v.name.clone())
                .collect()
        } else {
            selection.dependent_vars
        };

        DetectedVariables {
            group_variable,
            dependent_vars,
            independent_vars: selection.independent_vars,
        }
    }

    pub fn recommend(
        &self,
        purpose: Purpose,
        profile: &DataProfile,
        assumptions: &AssumptionResults,
        selection: Option<&VariableSelection>,
    ) -> Recommendation {
        let detected = self.detect_variables(profile, selection);

        let choice = match purpose {
            Purpose::CompareGroups => self.compare_groups(&detected, assumptions),
            Purpose::CompareRepeated => self.compare_repeated(&detected, assumptions),
            Purpose::Relationship => self.relationship(profile, &detected, assumptions),
            Purpose::Predict => self.predict(profile, &detected, assumptions),
            Purpose::Association => self.association(profile),
            Purpose::Describe => self.describe(profile),
            Purpose::ReduceDimensions => self.reduce_dimensions(profile),
        };

        let recommendation = Recommendation {
            method: choice.method,
            confidence: choice.confidence.clamp(0.0, 1.0),
            rationale: choice.rationale,
            detected_variables: detected,
            alternative_methods: choice.alternatives,
            post_hoc: choice.post_hoc,
        };
        info!(
            "Recommended {} for {} (confidence {:.2})",
            recommendation.method, purpose, recommendation.confidence
        );
        recommendation
    }

    fn compare_groups(&self, detected: &DetectedVariables, assumptions: &AssumptionResults) -> Choice {
        let Some(group) = &detected.group_variable else {
            return Choice::insufficient("No grouping variable was selected or detected");
        };
        match group.levels {
            Some(2) => select(&TWO_GROUP, assumptions).prefixed(format!("'{}' has 2 groups.", group.name)),
            Some(k) if k >= 3 => {
                select(&K_GROUP, assumptions).prefixed(format!("'{}' has {} groups.", group.name, k))
            }
            Some(k) => Choice::insufficient(format!(
                "'{}' has {} level(s); at least two groups are needed",
                group.name, k
            )),
            None => match inferred_group_count(assumptions) {
                Some(2) => select(&TWO_GROUP, assumptions)
                    .prefixed(format!("'{}' has 2 groups according to the assumption checks.", group.name)),
                Some(k) if k >= 3 => select(&K_GROUP, assumptions).prefixed(format!(
                    "'{}' has {} groups according to the assumption checks.",
                    group.name, k
                )),
                _ => Choice::new(
                    Method::DescriptiveStatistics,
                    0.3,
                    format!(
                        "'{}' is not in the data profile, so the number of groups is unknown; \
                         describing the data first. Two-group and k-group tests are listed as alternatives.",
                        group.name
                    ),
                    vec![
                        TWO_GROUP.parametric,
                        TWO_GROUP.rank_based,
                        K_GROUP.parametric,
                        K_GROUP.rank_based,
                    ],
                ),
            },
        }
    }

    fn compare_repeated(&self, detected: &DetectedVariables, assumptions: &AssumptionResults) -> Choice {
        match detected.dependent_vars.len() {
            2 => select(&PAIRED, assumptions).prefixed("Two paired measurements."),
            n if n >= 3 => select(&REPEATED, assumptions).prefixed(format!("{} repeated measurements.", n)),
            n => Choice::insufficient(format!("{} measurement column(s); at least two are needed", n)),
        }
    }

    fn relationship(&self, profile: &DataProfile, detected: &DetectedVariables, assumptions: &AssumptionResults) -> Choice {
        let selected = detected.dependent_vars.len() + detected.independent_vars.len();
        let available = if selected > 0 { selected } else { profile.numeric_var_count };
        if available < 2 {
            return Choice::insufficient("A relationship needs at least two numeric variables");
        }
        let mut choice = select(&CORRELATION, assumptions);
        if choice.method == Method::SpearmanCorrelation && !choice.alternatives.contains(&Method::KendallTau) {
            choice.alternatives.push(Method::KendallTau);
        }
        choice
    }

    fn predict(&self, profile: &DataProfile, detected: &DetectedVariables, assumptions: &AssumptionResults) -> Choice {
        let Some(outcome) = detected.dependent_vars.first() else {
            return Choice::insufficient("No outcome variable was selected or detected");
        };
        let predictors: Vec<&String> = if detected.independent_vars.is_empty() {
            detected.dependent_vars.iter().skip(1).collect()
        } else {
            detected.independent_vars.iter().collect()
        };
        if predictors.is_empty() {
            return Choice::insufficient(format!("No predictors available for '{}'", outcome));
        }

        if let Some(v) = profile.variable(outcome).filter(|v| v.kind == VariableKind::Categorical) {
            return if v.distinct_count == 2 {
                Choice::new(
                    Method::LogisticRegression,
                    0.85,
                    format!("'{}' is binary; logistic regression models its log-odds.", outcome),
                    Vec::new(),
                )
            } else {
                Choice::insufficient(format!(
                    "'{}' has {} categories; only binary categorical outcomes are supported",
                    outcome, v.distinct_count
                ))
            };
        }

        let method = if predictors.len() == 1 {
            Method::LinearRegression
        } else {
            Method::MultipleRegression
        };
        let base = format!("'{}' predicted from {} predictor(s).", outcome, predictors.len());
        match assumptions.normality() {
            Evidence::Holds => Choice::new(method, 0.88, format!("{} Normality holds.", base), vec![]),
            Evidence::Untested => Choice::new(
                method,
                0.7,
                format!("{} Residual normality should be checked after fitting.", base),
                vec![],
            ),
            Evidence::Violated => Choice::new(
                method,
                0.6,
                format!(
                    "{} Normality is violated for {}; inference on coefficients may be unreliable.",
                    base,
                    subjects(&assumptions.failed_normality())
                ),
                vec![Method::SpearmanCorrelation],
            ),
            Evidence::Inconclusive => Choice::new(
                method,
                0.45,
                format!(
                    "{} Could not verify normality for {}; a rank-based correlation is listed as a fallback.",
                    base,
                    subjects(&assumptions.errored_normality())
                ),
                vec![Method::SpearmanCorrelation, Method::PearsonCorrelation],
            ),
        }
    }

    fn association(&self, profile: &DataProfile) -> Choice {
        if profile.categorical_var_count < 2 {
            return Choice::insufficient("An association test needs two categorical variables");
        }
        if profile.row_count < 20 {
            Choice::new(
                Method::FisherExactTest,
                0.8,
                format!(
                    "Only {} rows; expected cell counts are likely below 5, so the exact test is safer.",
                    profile.row_count
                ),
                vec![Method::ChiSquareTest],
            )
        } else {
            Choice::new(
                Method::ChiSquareTest,
                0.88,
                "Two categorical variables with enough rows for the chi-square approximation.",
                vec![Method::FisherExactTest],
            )
        }
    }

    fn describe(&self, profile: &DataProfile) -> Choice {
        match (profile.numeric_var_count, profile.categorical_var_count) {
            (0, 0) => Choice::insufficient("The dataset has no variables"),
            (0, _) => Choice::new(
                Method::FrequencyTable,
                0.9,
                "Only categorical variables; frequencies summarise them.",
                vec![],
            ),
            (_, 0) => Choice::new(
                Method::DescriptiveStatistics,
                0.95,
                "Numeric variables are summarised by location and spread.",
                vec![],
            ),
            _ => Choice::new(
                Method::DescriptiveStatistics,
                0.95,
                "Numeric variables are summarised by location and spread; categorical ones by frequencies.",
                vec![Method::FrequencyTable],
            ),
        }
    }

    fn reduce_dimensions(&self, profile: &DataProfile) -> Choice {
        let p = profile.numeric_var_count;
        if p < 3 {
            return Choice::insufficient(format!("{} numeric variable(s); at least three are needed", p));
        }
        let confidence = if profile.row_count >= 5 * p { 0.82 } else { 0.6 };
        Choice::new(
            Method::PrincipalComponents,
            confidence,
            format!("{} numeric variables over {} rows.", p, profile.row_count),
            vec![Method::FactorAnalysis, Method::CronbachAlpha],
        )
    }
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new(10)
    }
}
