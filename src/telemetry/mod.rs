//! Usage telemetry and tracing setup
//!
//! `UsageStats` is owned by the orchestrator context and shared by reference;
//! there is no process-global instance.

#[cfg(feature = "otel")]
pub mod otel;

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::registry::{CapabilityGroupId, Method};

/// Default filter when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "analysis_orchestrator=info";

/// Install a fmt subscriber. Only the binary calls this.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    // A second init (e.g. from tests) leaves the first subscriber in place
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();
}

/// Failure classes counted separately
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Includes requests rejected because their group is already `Failed`
    Load,
    Validation,
    Execution,
    UnknownMethod,
    /// The runtime was torn down while the request was pending
    Disposed,
}

#[derive(Debug, Default)]
struct Counters {
    per_method: BTreeMap<Method, u64>,
    per_group: BTreeMap<CapabilityGroupId, u64>,
    failures: BTreeMap<FailureKind, u64>,
}

/// Process-wide monotonic counters, resettable for test isolation
#[derive(Debug, Default)]
pub struct UsageStats {
    counters: Mutex<Counters>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageSnapshot {
    pub per_method: BTreeMap<Method, u64>,
    pub per_group: BTreeMap<CapabilityGroupId, u64>,
    pub failures: BTreeMap<FailureKind, u64>,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl UsageSnapshot {
    pub fn method_calls(&self, method: Method) -> u64 {
        self.per_method.get(&method).copied().unwrap_or(0)
    }

    pub fn group_calls(&self, group: CapabilityGroupId) -> u64 {
        self.per_group.get(&group).copied().unwrap_or(0)
    }

    pub fn failures_of(&self, kind: FailureKind) -> u64 {
        self.failures.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u64 {
        self.per_method.values().sum()
    }
}

impl UsageStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// One dispatch reached the backend
    pub fn record_call(&self, method: Method) {
        let mut c = self.counters();
        *c.per_method.entry(method).or_default() += 1;
        *c.per_group.entry(method.group()).or_default() += 1;
    }

    pub fn record_failure(&self, kind: FailureKind) {
        *self.counters().failures.entry(kind).or_default() += 1;
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        let c = self.counters();
        UsageSnapshot {
            per_method: c.per_method.clone(),
            per_group: c.per_group.clone(),
            failures: c.failures.clone(),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        *self.counters() = Counters::default();
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
    }
}
