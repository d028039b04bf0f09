use async_trait::async_trait;
use serde_json::Value;

use crate::error::BackendError;
use crate::registry::CapabilityGroupId;

/// What a load step reports back
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    /// Packages came from a local cache rather than a fresh download
    pub from_cache: bool,
}

/// The computation capability behind the orchestrator. How a method computes
/// its result is opaque; the orchestrator only sequences loads and invocations.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Start the shared runtime and load the core numerical libraries
    async fn load_runtime(&self, core_packages: &[&'static str]) -> Result<LoadOutcome, BackendError>;

    /// Load one group's extra packages into its execution context
    async fn load_packages(
        &self,
        group: CapabilityGroupId,
        packages: &[&'static str],
    ) -> Result<LoadOutcome, BackendError>;

    /// Run a method inside the group's context
    async fn invoke(&self, group: CapabilityGroupId, method: &str, args: Value) -> Result<Value, BackendError>;

    /// Tear the runtime down
    async fn shutdown(&self) {}
}
