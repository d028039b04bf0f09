//! The closed set of statistical methods
//!
//! Every routing fact about a method (group, category, packages, cost) is an
//! exhaustive `match` here, so adding a variant without mapping it fails to compile.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::OrchestratorError;

/// Logical partition of methods, each backed by one isolated execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityGroupId {
    Descriptive,
    Comparison,
    Regression,
    Multivariate,
}

impl CapabilityGroupId {
    pub const ALL: [CapabilityGroupId; 4] = [
        CapabilityGroupId::Descriptive,
        CapabilityGroupId::Comparison,
        CapabilityGroupId::Regression,
        CapabilityGroupId::Multivariate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityGroupId::Descriptive => "descriptive",
            CapabilityGroupId::Comparison => "comparison",
            CapabilityGroupId::Regression => "regression",
            CapabilityGroupId::Multivariate => "multivariate",
        }
    }
}

impl fmt::Display for CapabilityGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Precondition family a method belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodCategory {
    Descriptive,
    /// Normality-type checks run per group
    AssumptionCheck,
    OneSample,
    TwoGroup,
    KGroup,
    Paired,
    RepeatedMeasures,
    Contingency,
    Correlation,
    Regression,
    Multivariate,
}

impl MethodCategory {
    pub fn display_name(&self) -> &'static str {
        match self {
            MethodCategory::Descriptive => "Descriptive statistics",
            MethodCategory::AssumptionCheck => "Assumption checks",
            MethodCategory::OneSample => "One-sample tests",
            MethodCategory::TwoGroup => "Two-group comparison",
            MethodCategory::KGroup => "Multi-group comparison",
            MethodCategory::Paired => "Paired comparison",
            MethodCategory::RepeatedMeasures => "Repeated measures",
            MethodCategory::Contingency => "Contingency tables",
            MethodCategory::Correlation => "Correlation",
            MethodCategory::Regression => "Regression",
            MethodCategory::Multivariate => "Multivariate analysis",
        }
    }
}

/// Every statistical method the orchestrator can route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    // Descriptive group
    DescriptiveStatistics,
    FrequencyTable,
    NormalityTest,
    LeveneTest,
    ChiSquareTest,
    FisherExactTest,
    OneSampleTTest,
    // Comparison group
    IndependentTTest,
    WelchTTest,
    MannWhitneyU,
    PairedTTest,
    WilcoxonSignedRank,
    OneWayAnova,
    WelchAnova,
    KruskalWallis,
    RepeatedMeasuresAnova,
    FriedmanTest,
    TukeyHsd,
    GamesHowell,
    DunnTest,
    // Regression group
    PearsonCorrelation,
    SpearmanCorrelation,
    KendallTau,
    LinearRegression,
    MultipleRegression,
    LogisticRegression,
    // Multivariate group
    PrincipalComponents,
    FactorAnalysis,
    KMeansClustering,
    HierarchicalClustering,
    CronbachAlpha,
}

impl Method {
    pub const ALL: [Method; 31] = [
        Method::DescriptiveStatistics,
        Method::FrequencyTable,
        Method::NormalityTest,
        Method::LeveneTest,
        Method::ChiSquareTest,
        Method::FisherExactTest,
        Method::OneSampleTTest,
        Method::IndependentTTest,
        Method::WelchTTest,
        Method::MannWhitneyU,
        Method::PairedTTest,
        Method::WilcoxonSignedRank,
        Method::OneWayAnova,
        Method::WelchAnova,
        Method::KruskalWallis,
        Method::RepeatedMeasuresAnova,
        Method::FriedmanTest,
        Method::TukeyHsd,
        Method::GamesHowell,
        Method::DunnTest,
        Method::PearsonCorrelation,
        Method::SpearmanCorrelation,
        Method::KendallTau,
        Method::LinearRegression,
        Method::MultipleRegression,
        Method::LogisticRegression,
        Method::PrincipalComponents,
        Method::FactorAnalysis,
        Method::KMeansClustering,
        Method::HierarchicalClustering,
        Method::CronbachAlpha,
    ];

    /// Identifier used on the wire and as the backend method name
    pub fn id(&self) -> &'static str {
        match self {
            Method::DescriptiveStatistics => "descriptive_statistics",
            Method::FrequencyTable => "frequency_table",
            Method::NormalityTest => "normality_test",
            Method::LeveneTest => "levene_test",
            Method::ChiSquareTest => "chi_square_test",
            Method::FisherExactTest => "fisher_exact_test",
            Method::OneSampleTTest => "one_sample_t_test",
            Method::IndependentTTest => "independent_t_test",
            Method::WelchTTest => "welch_t_test",
            Method::MannWhitneyU => "mann_whitney_u",
            Method::PairedTTest => "paired_t_test",
            Method::WilcoxonSignedRank => "wilcoxon_signed_rank",
            Method::OneWayAnova => "one_way_anova",
            Method::WelchAnova => "welch_anova",
            Method::KruskalWallis => "kruskal_wallis",
            Method::RepeatedMeasuresAnova => "repeated_measures_anova",
            Method::FriedmanTest => "friedman_test",
            Method::TukeyHsd => "tukey_hsd",
            Method::GamesHowell => "games_howell",
            Method::DunnTest => "dunn_test",
            Method::PearsonCorrelation => "pearson_correlation",
            Method::SpearmanCorrelation => "spearman_correlation",
            Method::KendallTau => "kendall_tau",
            Method::LinearRegression => "linear_regression",
            Method::MultipleRegression => "multiple_regression",
            Method::LogisticRegression => "logistic_regression",
            Method::PrincipalComponents => "principal_components",
            Method::FactorAnalysis => "factor_analysis",
            Method::KMeansClustering => "kmeans_clustering",
            Method::HierarchicalClustering => "hierarchical_clustering",
            Method::CronbachAlpha => "cronbach_alpha",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Method::DescriptiveStatistics => "Descriptive statistics",
            Method::FrequencyTable => "Frequency table",
            Method::NormalityTest => "Shapiro-Wilk normality test",
            Method::LeveneTest => "Levene's test for equal variances",
            Method::ChiSquareTest => "Chi-square test of independence",
            Method::FisherExactTest => "Fisher's exact test",
            Method::OneSampleTTest => "One-sample t-test",
            Method::IndependentTTest => "Independent samples t-test",
            Method::WelchTTest => "Welch's t-test",
            Method::MannWhitneyU => "Mann-Whitney U test",
            Method::PairedTTest => "Paired samples t-test",
            Method::WilcoxonSignedRank => "Wilcoxon signed-rank test",
            Method::OneWayAnova => "One-way ANOVA",
            Method::WelchAnova => "Welch's ANOVA",
            Method::KruskalWallis => "Kruskal-Wallis H test",
            Method::RepeatedMeasuresAnova => "Repeated measures ANOVA",
            Method::FriedmanTest => "Friedman test",
            Method::TukeyHsd => "Tukey HSD post-hoc test",
            Method::GamesHowell => "Games-Howell post-hoc test",
            Method::DunnTest => "Dunn's post-hoc test",
            Method::PearsonCorrelation => "Pearson correlation",
            Method::SpearmanCorrelation => "Spearman rank correlation",
            Method::KendallTau => "Kendall's tau",
            Method::LinearRegression => "Simple linear regression",
            Method::MultipleRegression => "Multiple linear regression",
            Method::LogisticRegression => "Logistic regression",
            Method::PrincipalComponents => "Principal component analysis",
            Method::FactorAnalysis => "Exploratory factor analysis",
            Method::KMeansClustering => "K-means clustering",
            Method::HierarchicalClustering => "Hierarchical clustering",
            Method::CronbachAlpha => "Cronbach's alpha",
        }
    }

    pub fn category(&self) -> MethodCategory {
        match self {
            Method::DescriptiveStatistics | Method::FrequencyTable => MethodCategory::Descriptive,
            Method::NormalityTest => MethodCategory::AssumptionCheck,
            Method::OneSampleTTest => MethodCategory::OneSample,
            Method::ChiSquareTest | Method::FisherExactTest => MethodCategory::Contingency,
            Method::IndependentTTest | Method::WelchTTest | Method::MannWhitneyU => MethodCategory::TwoGroup,
            Method::LeveneTest
            | Method::OneWayAnova
            | Method::WelchAnova
            | Method::KruskalWallis
            | Method::TukeyHsd
            | Method::GamesHowell
            | Method::DunnTest => MethodCategory::KGroup,
            Method::PairedTTest | Method::WilcoxonSignedRank => MethodCategory::Paired,
            Method::RepeatedMeasuresAnova | Method::FriedmanTest => MethodCategory::RepeatedMeasures,
            Method::PearsonCorrelation | Method::SpearmanCorrelation | Method::KendallTau => {
                MethodCategory::Correlation
            }
            Method::LinearRegression | Method::MultipleRegression | Method::LogisticRegression => {
                MethodCategory::Regression
            }
            Method::PrincipalComponents
            | Method::FactorAnalysis
            | Method::KMeansClustering
            | Method::HierarchicalClustering
            | Method::CronbachAlpha => MethodCategory::Multivariate,
        }
    }

    pub fn group(&self) -> CapabilityGroupId {
        match self {
            Method::DescriptiveStatistics
            | Method::FrequencyTable
            | Method::NormalityTest
            | Method::LeveneTest
            | Method::ChiSquareTest
            | Method::FisherExactTest
            | Method::OneSampleTTest => CapabilityGroupId::Descriptive,
            Method::IndependentTTest
            | Method::WelchTTest
            | Method::MannWhitneyU
            | Method::PairedTTest
            | Method::WilcoxonSignedRank
            | Method::OneWayAnova
            | Method::WelchAnova
            | Method::KruskalWallis
            | Method::RepeatedMeasuresAnova
            | Method::FriedmanTest
            | Method::TukeyHsd
            | Method::GamesHowell
            | Method::DunnTest => CapabilityGroupId::Comparison,
            Method::PearsonCorrelation
            | Method::SpearmanCorrelation
            | Method::KendallTau
            | Method::LinearRegression
            | Method::MultipleRegression
            | Method::LogisticRegression => CapabilityGroupId::Regression,
            Method::PrincipalComponents
            | Method::FactorAnalysis
            | Method::KMeansClustering
            | Method::HierarchicalClustering
            | Method::CronbachAlpha => CapabilityGroupId::Multivariate,
        }
    }

    /// Packages this method needs on top of the shared core libraries
    pub fn extra_packages(&self) -> &'static [&'static str] {
        match self {
            Method::WelchAnova | Method::GamesHowell | Method::CronbachAlpha => &["pingouin"],
            Method::RepeatedMeasuresAnova
            | Method::TukeyHsd
            | Method::LinearRegression
            | Method::MultipleRegression => &["statsmodels"],
            Method::LogisticRegression => &["statsmodels", "scikit-learn"],
            Method::DunnTest => &["scikit-posthocs"],
            Method::PrincipalComponents | Method::KMeansClustering | Method::HierarchicalClustering => {
                &["scikit-learn"]
            }
            Method::FactorAnalysis => &["factor-analyzer"],
            _ => &[],
        }
    }

    /// Rough wall-clock cost once the group is loaded
    pub fn estimated_cost_seconds(&self) -> f64 {
        match self.category() {
            MethodCategory::Descriptive | MethodCategory::AssumptionCheck | MethodCategory::OneSample => 0.2,
            MethodCategory::TwoGroup | MethodCategory::Paired | MethodCategory::Contingency => 0.3,
            MethodCategory::Correlation => 0.3,
            MethodCategory::KGroup | MethodCategory::RepeatedMeasures => 0.8,
            MethodCategory::Regression => 1.0,
            MethodCategory::Multivariate => 2.5,
        }
    }

    /// Whether the method assumes normally distributed data
    pub fn is_parametric(&self) -> bool {
        !matches!(
            self,
            Method::MannWhitneyU
                | Method::WilcoxonSignedRank
                | Method::KruskalWallis
                | Method::FriedmanTest
                | Method::DunnTest
                | Method::SpearmanCorrelation
                | Method::KendallTau
                | Method::ChiSquareTest
                | Method::FisherExactTest
                | Method::FrequencyTable
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Method {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .iter()
            .copied()
            .find(|m| m.id() == s)
            .ok_or_else(|| OrchestratorError::UnknownMethod(s.to_string()))
    }
}
