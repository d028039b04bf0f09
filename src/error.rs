//! Error taxonomy for the orchestration core
//!
//! Validation and execution errors reach the caller unchanged. Load errors are
//! only surfaced once the retry policy gives up. Cache misses and uncertain
//! recommendations are not errors and never appear here.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::CapabilityGroupId;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Which precondition rule a request violated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationRule {
    GroupCount,
    GroupSize,
    PairedLength,
    SampleSize,
    VariableType,
    MissingVariable,
}

impl fmt::Display for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValidationRule::GroupCount => "group count",
            ValidationRule::GroupSize => "group size",
            ValidationRule::PairedLength => "paired length",
            ValidationRule::SampleSize => "sample size",
            ValidationRule::VariableType => "variable type",
            ValidationRule::MissingVariable => "missing variable",
        };
        f.write_str(name)
    }
}

/// A single failed precondition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub rule: ValidationRule,
    pub message: String,
    /// Observed value, e.g. the size of the offending group
    pub observed: usize,
    /// Required value the rule compares against
    pub required: usize,
}

impl ValidationError {
    pub fn new(rule: ValidationRule, observed: usize, required: usize, message: impl Into<String>) -> Self {
        Self {
            rule,
            message: message.into(),
            observed,
            required,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.rule, self.message)
    }
}

/// Every violation found for one request, in rule evaluation order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_rule(&self, rule: ValidationRule) -> bool {
        self.0.iter().any(|e| e.rule == rule)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self.0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
        f.write_str(&joined)
    }
}

/// Which part of the runtime failed to load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadTarget {
    Core,
    Group(CapabilityGroupId),
}

impl fmt::Display for LoadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadTarget::Core => f.write_str("core runtime"),
            LoadTarget::Group(g) => write!(f, "group '{}'", g),
        }
    }
}

/// Runtime or package load failure after the retry budget was exhausted.
/// Fatal for the target until `RuntimeManager::retry_group` or `dispose`.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("failed to load {target} after {attempts} attempt(s): {reason} (retry the group to try again)")]
pub struct LoadError {
    pub target: LoadTarget,
    pub attempts: u32,
    pub reason: String,
}

/// The backend rejected a computation. Carried verbatim, never retried or cached.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{method} failed in backend: {message}")]
pub struct ExecutionError {
    pub method: String,
    pub message: String,
}

/// Rejection reported by an `AnalysisBackend` implementation
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Top-level error for orchestrator operations
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("runtime was disposed while the request was pending")]
    Disposed,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl OrchestratorError {
    /// Short label used by telemetry counters
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::UnknownMethod(_) => "unknown_method",
            OrchestratorError::Validation(_) => "validation",
            OrchestratorError::Load(_) => "load",
            OrchestratorError::Execution(_) => "execution",
            OrchestratorError::Disposed => "disposed",
            OrchestratorError::Config(_) => "config",
        }
    }

    /// Whether the caller can reasonably offer a "retry" action
    pub fn is_retryable(&self) -> bool {
        matches!(self, OrchestratorError::Load(_) | OrchestratorError::Disposed)
    }
}

impl From<ValidationErrors> for OrchestratorError {
    fn from(errors: ValidationErrors) -> Self {
        OrchestratorError::Validation(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_display_joins_messages() {
        let errors = ValidationErrors(vec![
            ValidationError::new(ValidationRule::GroupCount, 3, 2, "3 groups"),
            ValidationError::new(ValidationRule::GroupSize, 1, 2, "group 'A' too small"),
        ]);
        let text = errors.to_string();
        assert!(text.contains("[group count] 3 groups"));
        assert!(text.contains("[group size] group 'A' too small"));
        assert!(errors.has_rule(ValidationRule::GroupSize));
        assert!(!errors.has_rule(ValidationRule::PairedLength));
    }

    #[test]
    fn test_load_error_mentions_retry() {
        let err = LoadError {
            target: LoadTarget::Group(CapabilityGroupId::Regression),
            attempts: 3,
            reason: "network down".into(),
        };
        let text = OrchestratorError::from(err).to_string();
        assert!(text.contains("group 'regression'"));
        assert!(text.contains("3 attempt(s)"));
        assert!(text.contains("retry"));
    }

    #[test]
    fn test_error_kinds() {
        let exec = OrchestratorError::from(ExecutionError { method: "m".into(), message: "boom".into() });
        assert_eq!(exec.kind(), "execution");
        assert!(!exec.is_retryable());
        assert_eq!(exec.to_string(), "m failed in backend: boom");
        assert!(OrchestratorError::Disposed.is_retryable());
    }
}
