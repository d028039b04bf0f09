//! In-process stand-in for the analysis backend
//!
//! Loads take a configurable time and can be made to fail a set number of
//! times. Invocations return canned payloads or run a per-method handler.
//! Every call is counted so load collapsing and ordering can be observed.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::backend::{AnalysisBackend, LoadOutcome};
use crate::error::BackendError;
use crate::registry::CapabilityGroupId;

pub type Handler = Arc<dyn Fn(&Value) -> Result<Value, BackendError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub group: CapabilityGroupId,
    pub method: String,
    pub args: Value,
}

/// What has been fetched at least once; later loads report `from_cache`
#[derive(Default)]
struct Warmth {
    packages: HashSet<&'static str>,
    /// `None` is the core runtime
    targets: HashSet<Option<CapabilityGroupId>>,
}

#[derive(Default)]
struct Concurrency {
    active: HashMap<CapabilityGroupId, usize>,
    peak: HashMap<CapabilityGroupId, usize>,
    active_total: usize,
    peak_total: usize,
}

pub struct SimulatedBackend {
    load_delay: Duration,
    invoke_delay: Duration,
    runtime_loads: AtomicUsize,
    package_loads: Mutex<HashMap<CapabilityGroupId, usize>>,
    runtime_failures: AtomicU32,
    package_failures: Mutex<HashMap<CapabilityGroupId, u32>>,
    handlers: Mutex<HashMap<String, Handler>>,
    warmed: Mutex<Warmth>,
    invocations: Mutex<Vec<Invocation>>,
    concurrency: Mutex<Concurrency>,
    shutdowns: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self {
            load_delay: Duration::from_millis(10),
            invoke_delay: Duration::ZERO,
            runtime_loads: AtomicUsize::new(0),
            package_loads: Mutex::new(HashMap::new()),
            runtime_failures: AtomicU32::new(0),
            package_failures: Mutex::new(HashMap::new()),
            handlers: Mutex::new(HashMap::new()),
            warmed: Mutex::new(Warmth::default()),
            invocations: Mutex::new(Vec::new()),
            concurrency: Mutex::new(Concurrency::default()),
            shutdowns: AtomicUsize::new(0),
        }
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn with_invoke_delay(mut self, delay: Duration) -> Self {
        self.invoke_delay = delay;
        self
    }

    pub fn with_handler<F>(self, method: &str, handler: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, BackendError> + Send + Sync + 'static,
    {
        lock(&self.handlers).insert(method.to_string(), Arc::new(handler));
        self
    }

    pub fn with_response(self, method: &str, payload: Value) -> Self {
        self.with_handler(method, move |_| Ok(payload.clone()))
    }

    pub fn with_failure(self, method: &str, message: &str) -> Self {
        let message = message.to_string();
        self.with_handler(method, move |_| Err(BackendError::new(message.clone())))
    }

    /// Make the next `n` runtime loads fail
    pub fn fail_runtime_loads(&self, n: u32) {
        self.runtime_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` package loads for `group` fail
    pub fn fail_package_loads(&self, group: CapabilityGroupId, n: u32) {
        lock(&self.package_failures).insert(group, n);
    }

    pub fn runtime_load_count(&self) -> usize {
        self.runtime_loads.load(Ordering::SeqCst)
    }

    pub fn package_load_count(&self, group: CapabilityGroupId) -> usize {
        lock(&self.package_loads).get(&group).copied().unwrap_or(0)
    }

    /// Completed invocations in completion order
    pub fn invocations(&self) -> Vec<Invocation> {
        lock(&self.invocations).clone()
    }

    pub fn peak_concurrency(&self, group: CapabilityGroupId) -> usize {
        lock(&self.concurrency).peak.get(&group).copied().unwrap_or(0)
    }

    pub fn peak_total_concurrency(&self) -> usize {
        lock(&self.concurrency).peak_total
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    /// A target's first load is never from cache, even with no packages to fetch
    fn mark_warm(&self, target: Option<CapabilityGroupId>, packages: &[&'static str]) -> bool {
        let mut warmed = lock(&self.warmed);
        let seen = !warmed.targets.insert(target);
        let from_cache = seen && packages.iter().all(|p| warmed.packages.contains(p));
        warmed.packages.extend(packages.iter().copied());
        from_cache
    }

    fn enter(&self, group: CapabilityGroupId) {
        let mut c = lock(&self.concurrency);
        let active = c.active.entry(group).or_default();
        *active += 1;
        let now = *active;
        let peak = c.peak.entry(group).or_default();
        *peak = (*peak).max(now);
        c.active_total += 1;
        c.peak_total = c.peak_total.max(c.active_total);
    }

    fn leave(&self, group: CapabilityGroupId) {
        let mut c = lock(&self.concurrency);
        if let Some(active) = c.active.get_mut(&group) {
            *active = active.saturating_sub(1);
        }
        c.active_total = c.active_total.saturating_sub(1);
    }

    fn default_payload(group: CapabilityGroupId, method: &str, args: &Value) -> Value {
        match method {
            "normality_test" | "levene_test" => json!({ "statistic": 0.97, "p_value": 0.5 }),
            _ => {
                let rows = args
                    .get("dataset")
                    .and_then(Value::as_array)
                    .map(|rows| rows.len())
                    .unwrap_or(0);
                json!({ "method": method, "group": group, "rows": rows, "status": "ok" })
            }
        }
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnalysisBackend for SimulatedBackend {
    async fn load_runtime(&self, core_packages: &[&'static str]) -> Result<LoadOutcome, BackendError> {
        self.runtime_loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.load_delay).await;

        let failed = self
            .runtime_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(BackendError::new("simulated runtime start failure"));
        }
        Ok(LoadOutcome {
            from_cache: self.mark_warm(None, core_packages),
        })
    }

    async fn load_packages(
        &self,
        group: CapabilityGroupId,
        packages: &[&'static str],
    ) -> Result<LoadOutcome, BackendError> {
        *lock(&self.package_loads).entry(group).or_default() += 1;
        tokio::time::sleep(self.load_delay).await;

        let failed = {
            let mut failures = lock(&self.package_failures);
            match failures.get_mut(&group) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    true
                }
                _ => false,
            }
        };
        if failed {
            return Err(BackendError::new(format!("simulated package fetch failure for '{}'", group)));
        }
        Ok(LoadOutcome {
            from_cache: self.mark_warm(Some(group), packages),
        })
    }

    async fn invoke(&self, group: CapabilityGroupId, method: &str, args: Value) -> Result<Value, BackendError> {
        self.enter(group);
        if !self.invoke_delay.is_zero() {
            tokio::time::sleep(self.invoke_delay).await;
        }
        let handler = lock(&self.handlers).get(method).cloned();
        let result = match handler {
            Some(handler) => handler(&args),
            None => Ok(Self::default_payload(group, method, &args)),
        };
        self.leave(group);

        lock(&self.invocations).push(Invocation {
            group,
            method: method.to_string(),
            args,
        });
        result
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}
