//! End-to-end scenarios against the simulated backend

use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use analysis_orchestrator::decision::{Purpose, VariableSource};
use analysis_orchestrator::error::{OrchestratorError, ValidationRule};
use analysis_orchestrator::runtime::{GroupState, LoadStage, SimulatedBackend};
use analysis_orchestrator::telemetry::FailureKind;
use analysis_orchestrator::{
    AnalysisParams, CapabilityGroupId, Dataset, Method, Orchestrator, OrchestratorConfig, VariableSelection,
};

fn fast_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.retry.max_attempts = 2;
    config.retry.base_delay_ms = 1;
    config
}

fn orchestrator(backend: Arc<SimulatedBackend>) -> Orchestrator {
    Orchestrator::new(backend, fast_config()).unwrap()
}

fn grouped(groups: &[(&str, &[f64])]) -> Dataset {
    let rows: Vec<Value> = groups
        .iter()
        .flat_map(|(name, values)| values.iter().map(move |v| json!({ "group": name, "score": v })))
        .collect();
    serde_json::from_value(Value::Array(rows)).unwrap()
}

fn fifteen_each() -> Dataset {
    let a: Vec<f64> = (0..15).map(|i| 20.0 + (i % 5) as f64).collect();
    let b: Vec<f64> = (0..15).map(|i| 23.0 + (i % 5) as f64).collect();
    grouped(&[("A", a.as_slice()), ("B", b.as_slice())])
}

fn two_group_params() -> AnalysisParams {
    AnalysisParams {
        group_variable: Some("group".into()),
        dependent_vars: vec!["score".into()],
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ensure_calls_share_one_load() {
    let backend = Arc::new(SimulatedBackend::new().with_load_delay(std::time::Duration::from_millis(25)));
    let orch = orchestrator(backend.clone());
    let ready_events = Arc::new(Mutex::new(0));
    let counter = ready_events.clone();
    let sub = orch.runtime().on_progress(move |e| {
        if matches!(e.stage, LoadStage::Ready(_)) {
            *counter.lock().unwrap() += 1;
        }
    });

    let waiters: Vec<_> = (0..10)
        .map(|_| {
            let runtime = orch.runtime().clone();
            tokio::spawn(async move { runtime.ensure_group_ready(CapabilityGroupId::Regression).await })
        })
        .collect();
    for waiter in waiters {
        waiter.await.unwrap().unwrap();
    }
    sub.unsubscribe();

    assert_eq!(backend.runtime_load_count(), 1);
    assert_eq!(backend.package_load_count(CapabilityGroupId::Regression), 1);
    assert_eq!(*ready_events.lock().unwrap(), 1);
}

#[tokio::test]
async fn clean_two_group_data_gets_parametric_test() {
    let backend = Arc::new(
        SimulatedBackend::new()
            .with_response("normality_test", json!({ "statistic": 0.96, "p_value": 0.3 }))
            .with_response("levene_test", json!({ "statistic": 0.7, "p_value": 0.4 })),
    );
    let orch = orchestrator(backend.clone());

    let outcome = orch
        .recommend_and_run(Purpose::CompareGroups, &fifteen_each(), None)
        .await
        .unwrap();

    let rec = &outcome.recommendation;
    assert_eq!(rec.method, Method::IndependentTTest);
    assert!(rec.method.is_parametric());
    assert!(rec.confidence >= 0.85, "confidence {}", rec.confidence);
    assert_eq!(outcome.result.method, Method::IndependentTTest);
    assert_eq!(outcome.result.payload["status"], "ok");

    let methods: Vec<String> = backend.invocations().into_iter().map(|i| i.method).collect();
    assert_eq!(methods, vec!["normality_test", "normality_test", "levene_test", "independent_t_test"]);
}

#[tokio::test]
async fn errored_normality_test_yields_uncertain_recommendation() {
    let backend = Arc::new(SimulatedBackend::new().with_handler("normality_test", |args| {
        if args["subject"] == "B" {
            Err(analysis_orchestrator::error::BackendError::new("shapiro: data has zero range"))
        } else {
            Ok(json!({ "p_value": 0.3 }))
        }
    }));
    let orch = orchestrator(backend);

    let outcome = orch
        .recommend_and_run(Purpose::CompareGroups, &fifteen_each(), None)
        .await
        .unwrap();

    let rec = &outcome.recommendation;
    assert!(rec.confidence < 0.5, "confidence {}", rec.confidence);
    assert!(rec.rationale.contains("could not verify"), "{}", rec.rationale);
    assert!(!rec.alternative_methods.is_empty());
    assert!(rec.alternative_methods.iter().any(|m| m.is_parametric()));
    assert!(rec.alternative_methods.iter().any(|m| !m.is_parametric()));
}

#[tokio::test]
async fn precondition_violation_never_reaches_cache_or_backend() {
    let backend = Arc::new(SimulatedBackend::new());
    let orch = orchestrator(backend.clone());
    let data = grouped(&[("A", &[1.0]), ("B", &[2.0, 3.0])]);

    let err = orch
        .run_method("independent_t_test", data, two_group_params())
        .await
        .unwrap_err();

    let OrchestratorError::Validation(errors) = &err else {
        panic!("expected validation error, got {err}");
    };
    assert!(errors.has_rule(ValidationRule::GroupSize));
    let message = err.to_string();
    assert!(message.contains('A') && message.contains('1'), "{}", message);

    assert_eq!(backend.runtime_load_count(), 0);
    assert_eq!(orch.runtime().group_state(CapabilityGroupId::Comparison), GroupState::Unloaded);
    assert!(orch.cache().is_empty());
    let snap = orch.stats().snapshot();
    assert_eq!(snap.failures_of(FailureKind::Validation), 1);
    assert_eq!(snap.cache_misses, 0);
}

#[test]
fn two_group_methods_reject_bad_group_shapes() {
    let orch = orchestrator(Arc::new(SimulatedBackend::new()));
    let three = grouped(&[("A", &[1.0, 2.0]), ("B", &[3.0, 4.0]), ("C", &[5.0, 6.0])]);
    let tiny = grouped(&[("A", &[1.0]), ("B", &[2.0, 3.0])]);
    let valid = grouped(&[("A", &[1.0, 2.0]), ("B", &[3.0, 4.0])]);

    for method in [Method::IndependentTTest, Method::WelchTTest, Method::MannWhitneyU] {
        let params = two_group_params();
        assert!(orch.validate(method, &three, &params).is_err(), "{} accepted 3 groups", method);
        assert!(orch.validate(method, &tiny, &params).is_err(), "{} accepted a 1-obs group", method);
        assert!(orch.validate(method, &valid, &params).is_ok(), "{} rejected valid input", method);
    }
}

#[tokio::test]
async fn user_selected_grouping_beats_auto_detection() {
    let rows: Vec<Value> = (0..12)
        .map(|i| {
            json!({
                "group": if i % 2 == 0 { "ctrl" } else { "drug" },
                "site": (["north", "south", "east"][i % 3]),
                "score": 10.0 + i as f64,
            })
        })
        .collect();
    let dataset: Dataset = serde_json::from_value(Value::Array(rows)).unwrap();
    let orch = orchestrator(Arc::new(SimulatedBackend::new()));

    let selection = VariableSelection {
        group_variable: Some("site".into()),
        dependent_vars: vec!["score".into()],
        ..Default::default()
    };
    let outcome = orch
        .recommend_and_run(Purpose::CompareGroups, &dataset, Some(&selection))
        .await
        .unwrap();
    let group = outcome.recommendation.detected_variables.group_variable.unwrap();
    assert_eq!(group.name, "site");
    assert_eq!(group.source, VariableSource::UserSelected);

    let auto = orch
        .recommend_and_run(Purpose::CompareGroups, &dataset, None)
        .await
        .unwrap();
    let group = auto.recommendation.detected_variables.group_variable.unwrap();
    assert_eq!(group.name, "group");
    assert_eq!(group.source, VariableSource::AutoDetected);
}

#[tokio::test]
async fn reordered_fields_hit_the_same_cache_entry() {
    let backend = Arc::new(SimulatedBackend::new());
    let orch = orchestrator(backend.clone());
    let first = Dataset::from_json(r#"[{"group":"A","score":1},{"group":"A","score":2},{"group":"B","score":3},{"group":"B","score":4}]"#).unwrap();
    let second = Dataset::from_json(r#"[{"score":1,"group":"A"},{"score":2,"group":"A"},{"score":3,"group":"B"},{"score":4,"group":"B"}]"#).unwrap();
    let params_a = two_group_params().with_option("alternative", json!("two-sided")).with_option("alpha", json!(0.05));
    let params_b = two_group_params().with_option("alpha", json!(0.05)).with_option("alternative", json!("two-sided"));

    let a = orch.run_method("mann_whitney_u", first, params_a).await.unwrap();
    let b = orch.run_method("mann_whitney_u", second, params_b).await.unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(backend.invocations().len(), 1);
}

#[tokio::test]
async fn eleventh_result_evicts_the_first() {
    let backend = Arc::new(SimulatedBackend::new());
    let orch = orchestrator(backend.clone());
    let data = grouped(&[("A", &[1.0, 2.0]), ("B", &[3.0, 4.0])]);

    for seed in 0..11 {
        let params = two_group_params().with_option("seed", json!(seed));
        orch.run_method("welch_t_test", data.clone(), params).await.unwrap();
    }
    assert_eq!(orch.cache().len(), 10);

    // Second-inserted is still cached, first-inserted is recomputed
    let params = two_group_params().with_option("seed", json!(1));
    orch.run_method("welch_t_test", data.clone(), params).await.unwrap();
    assert_eq!(backend.invocations().len(), 11);
    let params = two_group_params().with_option("seed", json!(0));
    orch.run_method("welch_t_test", data, params).await.unwrap();
    assert_eq!(backend.invocations().len(), 12);
}

#[tokio::test]
async fn exhausted_load_retries_surface_until_group_is_retried() {
    let backend = Arc::new(SimulatedBackend::new());
    backend.fail_runtime_loads(2);
    let orch = orchestrator(backend.clone());
    let data = grouped(&[("A", &[1.0, 2.0]), ("B", &[3.0, 4.0])]);

    let err = orch
        .run_method("independent_t_test", data.clone(), two_group_params())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Load(ref e) if e.attempts == 2));
    assert!(err.is_retryable());
    assert_eq!(orch.runtime().group_state(CapabilityGroupId::Comparison), GroupState::Failed);

    // Fatal until retried: no new load attempts
    assert!(orch
        .run_method("independent_t_test", data.clone(), two_group_params())
        .await
        .is_err());
    assert_eq!(backend.runtime_load_count(), 2);
    // The exhausted load, then the rejection while failed
    assert_eq!(orch.stats().snapshot().failures_of(FailureKind::Load), 2);

    orch.runtime().retry_group(CapabilityGroupId::Comparison).await.unwrap();
    let result = orch.run_method("independent_t_test", data, two_group_params()).await;
    assert!(result.is_ok());
    assert_eq!(backend.runtime_load_count(), 3);
}

#[tokio::test]
async fn shutdown_resets_runtime_and_cache() {
    let backend = Arc::new(SimulatedBackend::new());
    let orch = orchestrator(backend.clone());
    let data = grouped(&[("A", &[1.0, 2.0]), ("B", &[3.0, 4.0])]);
    orch.run_method("independent_t_test", data.clone(), two_group_params()).await.unwrap();

    orch.shutdown().await;
    assert!(orch.cache().is_empty());
    assert_eq!(orch.runtime().group_state(CapabilityGroupId::Comparison), GroupState::Unloaded);
    assert_eq!(backend.shutdown_count(), 1);

    orch.run_method("independent_t_test", data, two_group_params()).await.unwrap();
    assert_eq!(backend.runtime_load_count(), 2);
}
