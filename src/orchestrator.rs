//! Request orchestration
//!
//! `Orchestrator` is the context object built once at start-up: it owns the
//! registry, validator, result cache, runtime manager, decision engine and
//! usage counters, and drives each request through them in order:
//! validate, cache lookup, ensure the group is ready, dispatch, store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cache::{AnalysisResult, FifoResultCache, ResultStore};
use crate::config::OrchestratorConfig;
use crate::data::{AnalysisParams, DataProfile, Dataset, VariableSelection};
use crate::decision::{AssumptionOutcome, AssumptionResults, DecisionEngine, DetectedVariables, Purpose, Recommendation};
use crate::error::Result;
use crate::registry::{Method, MethodCategory, MethodRegistry};
use crate::runtime::{AnalysisBackend, RuntimeManager};
use crate::telemetry::{FailureKind, UsageStats};
use crate::validation::{PreparedData, Validator, MIN_NORMALITY_SAMPLE};

/// One analysis to run; immutable once dispatched
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
    pub id: Uuid,
    pub method: Method,
    pub dataset: Dataset,
    pub params: AnalysisParams,
    pub requested_at: DateTime<Utc>,
}

impl AnalysisRequest {
    pub fn new(method: Method, dataset: Dataset, params: AnalysisParams) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            dataset,
            params,
            requested_at: Utc::now(),
        }
    }

    /// Build a request from a wire method id
    pub fn parse(method_id: &str, dataset: Dataset, params: AnalysisParams) -> Result<Self> {
        Ok(Self::new(method_id.parse()?, dataset, params))
    }
}

/// Everything `recommend_and_run` produced
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub recommendation: Recommendation,
    pub assumptions: AssumptionResults,
    pub result: Arc<AnalysisResult>,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<MethodRegistry>,
    validator: Validator,
    cache: Arc<dyn ResultStore>,
    runtime: RuntimeManager,
    engine: DecisionEngine,
    stats: Arc<UsageStats>,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn AnalysisBackend>, config: OrchestratorConfig) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(MethodRegistry::new());
        let stats = Arc::new(UsageStats::new());
        let cache = Arc::new(
            FifoResultCache::new(config.cache.capacity, config.cache.freshness())
                .with_algorithm(config.cache.fingerprint),
        );
        let runtime = RuntimeManager::new(backend, registry.clone())
            .with_retry_policy(config.retry.to_policy())
            .with_stats(stats.clone());
        let engine = DecisionEngine::new(config.decision.max_auto_group_levels);

        Ok(Self {
            config,
            registry,
            validator: Validator::new(),
            cache,
            runtime,
            engine,
            stats,
        })
    }

    /// Swap the result store, e.g. for a different eviction policy
    pub fn with_cache(mut self, cache: Arc<dyn ResultStore>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<dyn ResultStore> {
        &self.cache
    }

    pub fn runtime(&self) -> &RuntimeManager {
        &self.runtime
    }

    pub fn stats(&self) -> &Arc<UsageStats> {
        &self.stats
    }

    /// Check preconditions only
    pub fn validate(&self, method: Method, dataset: &Dataset, params: &AnalysisParams) -> Result<()> {
        let prepared = PreparedData::prepare(dataset, params);
        self.validator.validate(method, &prepared)?;
        Ok(())
    }

    /// Validate, then serve from cache or dispatch and cache the result.
    /// An invalid request touches neither the cache nor the runtime.
    #[instrument(skip(self, request), fields(request_id = %request.id, method = %request.method))]
    pub async fn run(&self, request: &AnalysisRequest) -> Result<Arc<AnalysisResult>> {
        if let Err(err) = self.validate(request.method, &request.dataset, &request.params) {
            self.stats.record_failure(FailureKind::Validation);
            warn!("Request {} rejected: {}", request.id, err);
            return Err(err);
        }

        if let Some(hit) = self.cache.get(request.method, &request.dataset, &request.params) {
            self.stats.record_cache_hit();
            debug!("Serving {} from cache", request.method);
            return Ok(hit);
        }
        self.stats.record_cache_miss();

        let args = json!({ "dataset": request.dataset, "params": request.params });
        let payload = self.runtime.dispatch(request.method, args).await?;
        let result = self
            .cache
            .put(request.method, &request.dataset, &request.params, payload);
        info!("Request {} completed with {}", request.id, request.method);
        Ok(result)
    }

    pub async fn run_method(
        &self,
        method_id: &str,
        dataset: Dataset,
        params: AnalysisParams,
    ) -> Result<Arc<AnalysisResult>> {
        let request = match AnalysisRequest::parse(method_id, dataset, params) {
            Ok(request) => request,
            Err(err) => {
                self.stats.record_failure(FailureKind::UnknownMethod);
                warn!("Rejected request: {}", err);
                return Err(err);
            }
        };
        self.run(&request).await
    }

    pub fn recommend(
        &self,
        purpose: Purpose,
        profile: &DataProfile,
        assumptions: &AssumptionResults,
        selection: Option<&VariableSelection>,
    ) -> Recommendation {
        self.engine.recommend(purpose, profile, assumptions, selection)
    }

    /// Run normality per sample (per group when `group_var` is given) and
    /// Levene across groups. A test that cannot run, or whose call is
    /// rejected, is recorded as `Errored` rather than failing the whole call.
    pub async fn assess_assumptions(
        &self,
        dataset: &Dataset,
        group_var: Option<&str>,
        value_var: &str,
    ) -> AssumptionResults {
        let samples: Vec<(String, Vec<f64>)> = match group_var {
            Some(group_var) => dataset.grouped_values(group_var, value_var).into_iter().collect(),
            None => vec![(
                value_var.to_string(),
                dataset.numeric_column(value_var).into_iter().flatten().collect(),
            )],
        };

        let mut results = AssumptionResults::new();
        for (subject, values) in &samples {
            let outcome = if values.len() < MIN_NORMALITY_SAMPLE {
                AssumptionOutcome::errored(format!(
                    "{} value(s); at least {} are needed",
                    values.len(),
                    MIN_NORMALITY_SAMPLE
                ))
            } else {
                let args = json!({ "subject": subject, "values": values });
                self.assumption_test(Method::NormalityTest, args).await
            };
            results = results.with_normality(subject.clone(), outcome);
        }

        if group_var.is_some() && samples.len() >= 2 {
            let groups: BTreeMap<&str, &Vec<f64>> = samples.iter().map(|(name, v)| (name.as_str(), v)).collect();
            let outcome = self.assumption_test(Method::LeveneTest, json!({ "groups": groups })).await;
            results = results.with_equal_variance(outcome);
        }
        results
    }

    async fn assumption_test(&self, method: Method, args: Value) -> AssumptionOutcome {
        match self.runtime.dispatch(method, args).await {
            Ok(payload) => match payload.get("p_value").and_then(Value::as_f64) {
                Some(p) => AssumptionOutcome::from_p_value(p, self.config.decision.alpha),
                None => AssumptionOutcome::errored(format!("{} returned no p-value", method)),
            },
            Err(err) => {
                warn!("{} could not run: {}", method, err);
                AssumptionOutcome::errored(err.to_string())
            }
        }
    }

    /// Profile the data, assess assumptions where the purpose needs them,
    /// pick a method and run it
    pub async fn recommend_and_run(
        &self,
        purpose: Purpose,
        dataset: &Dataset,
        selection: Option<&VariableSelection>,
    ) -> Result<AnalysisOutcome> {
        let profile = DataProfile::from_dataset(dataset);
        let detected = self.engine.detect_variables(&profile, selection);

        let assumptions = match purpose {
            Purpose::CompareGroups => match (&detected.group_variable, detected.dependent_vars.first()) {
                (Some(group), Some(value)) => self.assess_assumptions(dataset, Some(&group.name), value).await,
                _ => AssumptionResults::new(),
            },
            Purpose::CompareRepeated | Purpose::Relationship | Purpose::Predict => {
                let mut merged = AssumptionResults::new();
                for var in &detected.dependent_vars {
                    let part = self.assess_assumptions(dataset, None, var).await;
                    merged.normality.extend(part.normality);
                }
                merged
            }
            Purpose::Association | Purpose::Describe | Purpose::ReduceDimensions => AssumptionResults::new(),
        };

        let recommendation = self.engine.recommend(purpose, &profile, &assumptions, selection);
        let params = params_for(recommendation.method, &recommendation.detected_variables, &profile);
        let request = AnalysisRequest::new(recommendation.method, dataset.clone(), params);
        let result = self.run(&request).await?;

        Ok(AnalysisOutcome {
            recommendation,
            assumptions,
            result,
        })
    }

    /// Hard reset: tear the backend down and drop every cached result
    pub async fn shutdown(&self) {
        self.runtime.dispose().await;
        self.cache.clear();
    }
}

/// Map detected variable roles onto the parameters a method's category expects
fn params_for(method: Method, detected: &DetectedVariables, profile: &DataProfile) -> AnalysisParams {
    let group = detected.group_variable.as_ref().map(|g| g.name.clone());
    let deps = &detected.dependent_vars;
    let first = |n: usize| deps.iter().take(n).cloned().collect::<Vec<_>>();

    match method.category() {
        MethodCategory::TwoGroup | MethodCategory::KGroup | MethodCategory::AssumptionCheck => AnalysisParams {
            group_variable: group,
            dependent_vars: first(1),
            ..Default::default()
        },
        MethodCategory::OneSample => AnalysisParams {
            dependent_vars: first(1),
            ..Default::default()
        },
        MethodCategory::Paired => AnalysisParams {
            dependent_vars: first(2),
            ..Default::default()
        },
        MethodCategory::RepeatedMeasures | MethodCategory::Multivariate => AnalysisParams {
            dependent_vars: deps.clone(),
            independent_vars: detected.independent_vars.clone(),
            ..Default::default()
        },
        MethodCategory::Correlation => {
            if detected.independent_vars.is_empty() {
                AnalysisParams {
                    dependent_vars: first(2),
                    ..Default::default()
                }
            } else {
                AnalysisParams {
                    dependent_vars: first(1),
                    independent_vars: detected.independent_vars.iter().take(1).cloned().collect(),
                    ..Default::default()
                }
            }
        }
        MethodCategory::Regression => {
            let predictors: Vec<String> = if detected.independent_vars.is_empty() {
                deps.iter().skip(1).cloned().collect()
            } else {
                detected.independent_vars.clone()
            };
            let take = if method == Method::LinearRegression { 1 } else { predictors.len() };
            AnalysisParams {
                dependent_vars: first(1),
                independent_vars: predictors.into_iter().take(take).collect(),
                ..Default::default()
            }
        }
        MethodCategory::Contingency => {
            let mut categorical: Vec<String> = profile
                .categorical_variables()
                .map(|v| v.name.clone())
                .filter(|name| Some(name) != group.as_ref())
                .collect();
            categorical.truncate(1);
            AnalysisParams {
                group_variable: group,
                dependent_vars: categorical,
                ..Default::default()
            }
        }
        MethodCategory::Descriptive => {
            let dependent_vars = if method == Method::FrequencyTable {
                profile.categorical_variables().map(|v| v.name.clone()).collect()
            } else {
                deps.clone()
            };
            AnalysisParams {
                dependent_vars,
                ..Default::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::test_data::grouped;
    use crate::error::OrchestratorError;
    use crate::runtime::SimulatedBackend;

    fn orchestrator(backend: Arc<SimulatedBackend>) -> Orchestrator {
        Orchestrator::new(backend, OrchestratorConfig::default()).unwrap()
    }

    fn two_group_params() -> AnalysisParams {
        AnalysisParams {
            group_variable: Some("group".into()),
            dependent_vars: vec!["score".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_second_identical_request_hits_cache() {
        let backend = Arc::new(SimulatedBackend::new());
        let orch = orchestrator(backend.clone());
        let data = grouped(&[("A", &[1.0, 2.0, 3.0]), ("B", &[4.0, 5.0, 6.0])]);

        let first = orch.run_method("independent_t_test", data.clone(), two_group_params()).await.unwrap();
        let second = orch.run_method("independent_t_test", data, two_group_params()).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(backend.invocations().len(), 1);
        let snap = orch.stats().snapshot();
        assert_eq!((snap.cache_hits, snap.cache_misses), (1, 1));
        assert_eq!(snap.method_calls(Method::IndependentTTest), 1);
    }

    #[tokio::test]
    async fn test_unknown_method_is_rejected() {
        let orch = orchestrator(Arc::new(SimulatedBackend::new()));
        let err = orch
            .run_method("tea_leaves", Dataset::default(), AnalysisParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownMethod(_)));
        assert_eq!(orch.stats().snapshot().failures_of(FailureKind::UnknownMethod), 1);
    }

    #[tokio::test]
    async fn test_execution_error_is_not_cached() {
        let backend = Arc::new(SimulatedBackend::new().with_failure("independent_t_test", "zero variance"));
        let orch = orchestrator(backend.clone());
        let data = grouped(&[("A", &[1.0, 1.0]), ("B", &[1.0, 1.0])]);

        for _ in 0..2 {
            let err = orch
                .run_method("independent_t_test", data.clone(), two_group_params())
                .await
                .unwrap_err();
            assert!(matches!(err, OrchestratorError::Execution(ref e) if e.message == "zero variance"));
        }
        assert!(orch.cache().is_empty());
        assert_eq!(backend.invocations().len(), 2);
        assert_eq!(orch.stats().snapshot().failures_of(FailureKind::Execution), 2);
    }

    #[tokio::test]
    async fn test_assess_assumptions_marks_small_groups_errored() {
        let orch = orchestrator(Arc::new(SimulatedBackend::new()));
        let data = grouped(&[("A", &[1.0, 2.0, 3.0, 4.0]), ("B", &[5.0, 6.0])]);

        let results = orch.assess_assumptions(&data, Some("group"), "score").await;
        assert_eq!(results.normality.len(), 2);
        assert!(matches!(results.normality[0].outcome, AssumptionOutcome::Passed { .. }));
        assert!(matches!(results.normality[1].outcome, AssumptionOutcome::Errored { .. }));
        assert!(matches!(results.equal_variance, Some(AssumptionOutcome::Passed { .. })));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = OrchestratorConfig::default();
        config.cache.capacity = 0;
        let result = Orchestrator::new(Arc::new(SimulatedBackend::new()), config);
        assert!(matches!(result, Err(OrchestratorError::Config(_))));
    }

    #[test]
    fn test_params_for_regression_uses_remaining_numeric_vars() {
        let detected = DetectedVariables {
            group_variable: None,
            dependent_vars: vec!["y".into(), "x1".into(), "x2".into()],
            independent_vars: vec![],
        };
        let params = params_for(Method::MultipleRegression, &detected, &DataProfile::default());
        assert_eq!(params.dependent_vars, vec!["y"]);
        assert_eq!(params.independent_vars, vec!["x1", "x2"]);

        let params = params_for(Method::LinearRegression, &detected, &DataProfile::default());
        assert_eq!(params.independent_vars, vec!["x1"]);
    }
}
