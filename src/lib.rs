//! Statistical Analysis Orchestrator
//!
//! The orchestration layer between an analysis front end and a lazily
//! loaded computation backend:
//! - Method selection with explicit uncertainty handling
//! - Precondition validation before any work is done
//! - Lazy, collapsed, retried backend loading per capability group
//! - Content-addressed result caching with FIFO eviction
//! - Usage telemetry

pub mod cache;
pub mod config;
pub mod data;
pub mod decision;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod runtime;
pub mod telemetry;
pub mod validation;

// Re-exports for convenience
pub use cache::{AnalysisResult, FifoResultCache, ResultStore};
pub use config::{ConfigLoader, OrchestratorConfig};
pub use data::{AnalysisParams, DataProfile, Dataset, VariableSelection};
pub use decision::{AssumptionResults, DecisionEngine, Purpose, Recommendation};
pub use error::{OrchestratorError, Result};
pub use orchestrator::{AnalysisOutcome, AnalysisRequest, Orchestrator};
pub use registry::{CapabilityGroupId, Method, MethodRegistry};
pub use runtime::{AnalysisBackend, RuntimeManager, SimulatedBackend};
pub use telemetry::UsageStats;
