//! Architecture Verification Suite
//!
//! Shared components must be usable from concurrent tasks, and the cache and
//! backend seams must stay object-safe so implementations can be swapped.

#[cfg(test)]
mod architecture_tests {
    use std::sync::Arc;

    use analysis_orchestrator::cache::{FifoResultCache, ResultStore};
    use analysis_orchestrator::runtime::{AnalysisBackend, ProgressBus, RuntimeManager, SimulatedBackend};
    use analysis_orchestrator::{MethodRegistry, Orchestrator, OrchestratorConfig, UsageStats};

    fn assert_send_sync<T: Send + Sync>() {}

    // 1. Everything held across tasks is thread-safe
    #[test]
    fn test_shared_components_are_thread_safe() {
        assert_send_sync::<Orchestrator>();
        assert_send_sync::<RuntimeManager>();
        assert_send_sync::<FifoResultCache>();
        assert_send_sync::<MethodRegistry>();
        assert_send_sync::<UsageStats>();
        assert_send_sync::<ProgressBus>();
        assert_send_sync::<SimulatedBackend>();
    }

    // 2. Seams are trait objects
    #[test]
    fn test_seams_are_object_safe() {
        let backend: Arc<dyn AnalysisBackend> = Arc::new(SimulatedBackend::new());
        let cache: Arc<dyn ResultStore> = Arc::new(FifoResultCache::default());
        let orchestrator = Orchestrator::new(backend, OrchestratorConfig::default())
            .unwrap()
            .with_cache(cache.clone());
        assert!(Arc::ptr_eq(orchestrator.cache(), &cache));
    }

    // 3. Every method is routed to exactly one group
    #[test]
    fn test_registry_routes_every_method() {
        let registry = MethodRegistry::new();
        for descriptor in registry.all_methods() {
            assert_eq!(registry.group_of(descriptor.id.id()).unwrap(), descriptor.owner_group);
            assert_eq!(descriptor.id.group(), descriptor.owner_group);
        }
    }

    // 4. Orchestrator futures can be spawned
    #[tokio::test]
    async fn test_run_future_is_spawnable() {
        let orchestrator = Arc::new(
            Orchestrator::new(Arc::new(SimulatedBackend::new()), OrchestratorConfig::default()).unwrap(),
        );
        let handle = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move {
                orchestrator
                    .run_method(
                        "descriptive_statistics",
                        analysis_orchestrator::Dataset::from_json(r#"[{"x": 1}, {"x": 2}]"#).unwrap(),
                        analysis_orchestrator::AnalysisParams {
                            dependent_vars: vec!["x".into()],
                            ..Default::default()
                        },
                    )
                    .await
            }
        });
        assert!(handle.await.unwrap().is_ok());
    }
}
