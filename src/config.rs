//! Orchestrator configuration
//!
//! Every field has a default, so an empty file (or none at all) is valid.
//! JSON or YAML is chosen by file extension.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

use crate::cache::{FingerprintAlgorithm, DEFAULT_CAPACITY, DEFAULT_FRESHNESS};
use crate::error::{OrchestratorError, Result};
use crate::runtime::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
    pub freshness_ms: u64,
    pub fingerprint: FingerprintAlgorithm,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            freshness_ms: DEFAULT_FRESHNESS.as_millis() as u64,
            fingerprint: FingerprintAlgorithm::default(),
        }
    }
}

impl CacheConfig {
    pub fn freshness(&self) -> Duration {
        Duration::from_millis(self.freshness_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            multiplier: policy.multiplier,
            max_delay_ms: policy.max_delay.as_millis() as u64,
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
            .with_multiplier(self.multiplier)
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Significance level for assumption tests
    pub alpha: f64,
    /// Upper bound on levels for a variable to be auto-detected as grouping
    pub max_auto_group_levels: usize,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            max_auto_group_levels: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub decision: DecisionConfig,
}

impl OrchestratorConfig {
    /// Override fields from `ORCHESTRATOR_*` environment variables
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Option<T> {
            let raw = raw?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("Ignoring {}: '{}' is not a valid value", key, raw);
                    None
                }
            }
        }

        const CAPACITY: &str = "ORCHESTRATOR_CACHE_CAPACITY";
        const FRESHNESS: &str = "ORCHESTRATOR_CACHE_FRESHNESS_MS";
        const ATTEMPTS: &str = "ORCHESTRATOR_RETRY_MAX_ATTEMPTS";
        const BASE_DELAY: &str = "ORCHESTRATOR_RETRY_BASE_DELAY_MS";

        if let Some(v) = parsed(CAPACITY, lookup(CAPACITY)) {
            self.cache.capacity = v;
        }
        if let Some(v) = parsed(FRESHNESS, lookup(FRESHNESS)) {
            self.cache.freshness_ms = v;
        }
        if let Some(v) = parsed(ATTEMPTS, lookup(ATTEMPTS)) {
            self.retry.max_attempts = v;
        }
        if let Some(v) = parsed(BASE_DELAY, lookup(BASE_DELAY)) {
            self.retry.base_delay_ms = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(OrchestratorError::Config(msg.to_string()));
        if self.cache.capacity == 0 {
            return invalid("cache.capacity must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if !(self.retry.multiplier >= 1.0) {
            return invalid("retry.multiplier must be >= 1.0");
        }
        if !(self.decision.alpha > 0.0 && self.decision.alpha < 1.0) {
            return invalid("decision.alpha must be in (0, 1)");
        }
        if self.decision.max_auto_group_levels < 2 {
            return invalid("decision.max_auto_group_levels must be at least 2");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Yaml,
}

impl Format {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Format::Yaml,
            _ => Format::Json,
        }
    }
}

/// Reads the config file, writing defaults on first run
pub struct ConfigLoader {
    path: PathBuf,
}

impl ConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load(&self) -> anyhow::Result<OrchestratorConfig> {
        if !self.path.exists() {
            let default = OrchestratorConfig::default();
            self.save(&default).await?;
            info!("Wrote default configuration to {}", self.path.display());
            return Ok(default);
        }
        let content = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        let config = match Format::of(&self.path) {
            Format::Json => serde_json::from_str(&content)?,
            Format::Yaml => serde_yaml::from_str(&content)?,
        };
        Ok(config)
    }

    pub async fn save(&self, config: &OrchestratorConfig) -> anyhow::Result<()> {
        let content = match Format::of(&self.path) {
            Format::Json => serde_json::to_string_pretty(config)?,
            Format::Yaml => serde_yaml::to_string(config)?,
        };
        fs::write(&self.path, content)
            .await
            .with_context(|| format!("writing {}", self.path.display()))?;
        Ok(())
    }
}
