//! Backend Runtime Manager
//!
//! Owns the lifecycle of the computation backend. The shared runtime and core
//! libraries load once; each capability group then loads its own extras on
//! first use. Concurrent callers for the same target share one in-flight load
//! future, so there is at most one core load and one load per group at any
//! time. Dispatches join their group's queue as soon as they are issued and
//! run on a single worker per group once it is ready.

mod backend;
mod progress;
mod retry;
mod simulated;
mod worker;

pub use backend::{AnalysisBackend, LoadOutcome};
pub use progress::{LoadStage, ProgressBus, ProgressEvent, ProgressSubscription};
pub use retry::{RetryExhausted, RetryPolicy};
pub use simulated::{Handler, Invocation, SimulatedBackend};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{ExecutionError, LoadError, LoadTarget, OrchestratorError, Result};
use crate::registry::{CapabilityGroupId, Method, MethodRegistry, CORE_PACKAGES};
use crate::telemetry::{FailureKind, UsageStats};
use worker::GroupWorker;

type LoadFuture = Shared<BoxFuture<'static, Result<()>>>;

/// Lifecycle of one capability group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupState {
    #[default]
    Unloaded,
    LoadingCore,
    LoadingExtras,
    Ready,
    Failed,
}

#[derive(Default)]
struct CoreSlot {
    ready: bool,
    in_flight: Option<LoadFuture>,
    last_error: Option<LoadError>,
}

#[derive(Default)]
struct GroupSlot {
    state: GroupState,
    loaded_packages: BTreeSet<&'static str>,
    last_error: Option<LoadError>,
    in_flight: Option<LoadFuture>,
    worker: Option<GroupWorker>,
}

#[derive(Default)]
struct RuntimeState {
    core: Mutex<CoreSlot>,
    // Lock order: `groups` before `core` whenever both are needed
    groups: Mutex<HashMap<CapabilityGroupId, GroupSlot>>,
    /// Bumped by `dispose`; loads started under an older generation drop their results
    generation: AtomicU64,
}

impl RuntimeState {
    fn core(&self) -> MutexGuard<'_, CoreSlot> {
        self.core.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn groups(&self) -> MutexGuard<'_, HashMap<CapabilityGroupId, GroupSlot>> {
        self.groups.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Apply `f` to the group's slot unless the runtime was disposed since
    /// `generation`. Returns whether it ran.
    fn update_group<F>(&self, generation: u64, group: CapabilityGroupId, f: F) -> bool
    where
        F: FnOnce(&mut GroupSlot),
    {
        let mut groups = self.groups();
        if self.generation() != generation {
            return false;
        }
        f(groups.entry(group).or_default());
        true
    }

    fn update_core<F>(&self, generation: u64, f: F)
    where
        F: FnOnce(&mut CoreSlot),
    {
        let mut core = self.core();
        if self.generation() == generation {
            f(&mut core);
        }
    }
}

/// Cheap to clone; clones share the same runtime
#[derive(Clone)]
pub struct RuntimeManager {
    backend: Arc<dyn AnalysisBackend>,
    registry: Arc<MethodRegistry>,
    retry: RetryPolicy,
    progress: Arc<ProgressBus>,
    stats: Arc<UsageStats>,
    state: Arc<RuntimeState>,
}

impl RuntimeManager {
    pub fn new(backend: Arc<dyn AnalysisBackend>, registry: Arc<MethodRegistry>) -> Self {
        Self {
            backend,
            registry,
            retry: RetryPolicy::default(),
            progress: Arc::new(ProgressBus::new()),
            stats: Arc::new(UsageStats::new()),
            state: Arc::new(RuntimeState::default()),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_stats(mut self, stats: Arc<UsageStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<UsageStats> {
        &self.stats
    }

    pub fn group_state(&self, group: CapabilityGroupId) -> GroupState {
        self.state.groups().get(&group).map(|slot| slot.state).unwrap_or_default()
    }

    pub fn loaded_packages(&self, group: CapabilityGroupId) -> BTreeSet<&'static str> {
        self.state
            .groups()
            .get(&group)
            .map(|slot| slot.loaded_packages.clone())
            .unwrap_or_default()
    }

    /// Error that put the group into `Failed`, if any
    pub fn last_error(&self, group: CapabilityGroupId) -> Option<LoadError> {
        self.state.groups().get(&group).and_then(|slot| slot.last_error.clone())
    }

    pub fn is_core_ready(&self) -> bool {
        self.state.core().ready
    }

    pub fn on_progress<F>(&self, callback: F) -> ProgressSubscription
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        self.progress.on_progress(callback)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    /// Resolve once `group` can serve dispatches. Joins a load already in
    /// flight instead of starting another one.
    #[instrument(skip(self))]
    pub async fn ensure_group_ready(&self, group: CapabilityGroupId) -> Result<()> {
        let result = self.wait_ready(group).await;
        if matches!(result, Err(OrchestratorError::Disposed)) {
            self.stats.record_failure(FailureKind::Disposed);
        }
        result
    }

    async fn wait_ready(&self, group: CapabilityGroupId) -> Result<()> {
        let generation = self.state.generation();
        let core_ready = self.is_core_ready();

        let load = {
            let mut groups = self.state.groups();
            let slot = groups.entry(group).or_default();
            match slot.state {
                GroupState::Ready => return Ok(()),
                GroupState::Failed => {
                    let err = slot.last_error.clone().unwrap_or_else(|| LoadError {
                        target: LoadTarget::Group(group),
                        attempts: 0,
                        reason: "group is marked failed".to_string(),
                    });
                    self.stats.record_failure(FailureKind::Load);
                    debug!("'{}' is failed; rejecting until retried", group);
                    return Err(err.into());
                }
                _ => {}
            }
            match &slot.in_flight {
                Some(load) => {
                    debug!("Joining in-flight load for '{}'", group);
                    load.clone()
                }
                None => {
                    slot.state = if core_ready {
                        GroupState::LoadingExtras
                    } else {
                        GroupState::LoadingCore
                    };
                    let this = self.clone();
                    let load = async move { this.load_group(group, generation).await }.boxed().shared();
                    slot.in_flight = Some(load.clone());
                    load
                }
            }
        };

        load.await?;
        if self.state.generation() != generation {
            return Err(OrchestratorError::Disposed);
        }
        Ok(())
    }

    /// Run `method` in its group. The job takes its place in the group's
    /// queue before anything is awaited and runs once the group is ready.
    /// Backend rejections come back verbatim as `ExecutionError`, never retried.
    #[instrument(skip(self, args))]
    pub async fn dispatch(&self, method: Method, args: Value) -> Result<Value> {
        let group = self.registry.descriptor(method).owner_group;
        let gate = {
            let this = self.clone();
            async move { this.wait_ready(group).await }.boxed()
        };

        let reply = {
            let mut groups = self.state.groups();
            let slot = groups.entry(group).or_default();
            let backend = &self.backend;
            slot.worker
                .get_or_insert_with(|| GroupWorker::spawn(group, backend.clone()))
                .submit(method, args, gate)
        };

        let outcome = match reply {
            Some(reply) => reply.await.unwrap_or(Err(OrchestratorError::Disposed)),
            None => Err(OrchestratorError::Disposed),
        };
        match outcome {
            Ok(Ok(payload)) => {
                self.stats.record_call(method);
                Ok(payload)
            }
            Ok(Err(rejection)) => {
                self.stats.record_call(method);
                self.stats.record_failure(FailureKind::Execution);
                warn!("{} rejected by backend: {}", method, rejection);
                Err(ExecutionError {
                    method: method.id().to_string(),
                    message: rejection.0,
                }
                .into())
            }
            Err(err) => {
                if matches!(err, OrchestratorError::Disposed) {
                    self.stats.record_failure(FailureKind::Disposed);
                }
                Err(err)
            }
        }
    }

    /// Clear a failed group (and a failed core load) and try loading again
    pub async fn retry_group(&self, group: CapabilityGroupId) -> Result<()> {
        {
            let mut groups = self.state.groups();
            if let Some(slot) = groups.get_mut(&group) {
                if slot.state == GroupState::Failed {
                    slot.state = GroupState::Unloaded;
                    slot.last_error = None;
                }
            }
            let mut core = self.state.core();
            if core.last_error.take().is_some() {
                debug!("Cleared failed core load");
            }
        }
        info!("Retrying load for '{}'", group);
        self.ensure_group_ready(group).await
    }

    /// Tear the backend down and reset every group to `Unloaded`. Pending
    /// loads and dispatches resolve with `OrchestratorError::Disposed`.
    pub async fn dispose(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
        let workers: Vec<GroupWorker> = {
            let mut groups = self.state.groups();
            let workers = groups.drain().filter_map(|(_, slot)| slot.worker).collect();
            *self.state.core() = CoreSlot::default();
            workers
        };
        for worker in workers {
            worker.shutdown();
        }
        self.backend.shutdown().await;
        info!("Runtime disposed");
    }

    async fn ensure_core(&self) -> Result<()> {
        let generation = self.state.generation();
        let load = {
            let mut core = self.state.core();
            if core.ready {
                return Ok(());
            }
            if let Some(err) = &core.last_error {
                self.stats.record_failure(FailureKind::Load);
                return Err(err.clone().into());
            }
            match &core.in_flight {
                Some(load) => load.clone(),
                None => {
                    let this = self.clone();
                    let load = async move { this.load_core(generation).await }.boxed().shared();
                    core.in_flight = Some(load.clone());
                    load
                }
            }
        };
        load.await
    }

    async fn load_core(&self, generation: u64) -> Result<()> {
        info!("Starting analysis runtime");
        self.progress.publish(ProgressEvent::new(LoadStage::Runtime, false));

        let backend = &self.backend;
        let result = self
            .retry
            .run("core runtime load", move |_| backend.load_runtime(CORE_PACKAGES))
            .await;

        match result {
            Ok(outcome) => {
                self.state.update_core(generation, |core| {
                    core.ready = true;
                    core.in_flight = None;
                });
                info!("Core packages loaded (from_cache: {})", outcome.from_cache);
                self.progress
                    .publish(ProgressEvent::new(LoadStage::CorePackages, outcome.from_cache));
                Ok(())
            }
            Err(exhausted) => {
                let err = LoadError {
                    target: LoadTarget::Core,
                    attempts: exhausted.attempts,
                    reason: exhausted.last_error.to_string(),
                };
                error!("{}", err);
                self.state.update_core(generation, |core| {
                    core.last_error = Some(err.clone());
                    core.in_flight = None;
                });
                self.stats.record_failure(FailureKind::Load);
                self.progress
                    .publish(ProgressEvent::new(LoadStage::Failed(LoadTarget::Core), false));
                Err(err.into())
            }
        }
    }

    async fn load_group(&self, group: CapabilityGroupId, generation: u64) -> Result<()> {
        match self.ensure_core().await {
            Ok(()) => {}
            Err(OrchestratorError::Load(err)) => {
                self.mark_failed(group, generation, err.clone());
                return Err(err.into());
            }
            Err(other) => return Err(other),
        }
        if !self
            .state
            .update_group(generation, group, |slot| slot.state = GroupState::LoadingExtras)
        {
            return Err(OrchestratorError::Disposed);
        }

        let packages = self.registry.group_packages(group);
        debug!("Loading packages for '{}': {:?}", group, packages);
        let backend = &self.backend;
        let wanted = packages.as_slice();
        let label = format!("package load for '{}'", group);
        let result = self
            .retry
            .run(&label, move |_| backend.load_packages(group, wanted))
            .await;

        match result {
            Ok(outcome) => {
                let loaded: BTreeSet<&'static str> =
                    CORE_PACKAGES.iter().chain(packages.iter()).copied().collect();
                let applied = self.state.update_group(generation, group, |slot| {
                    slot.state = GroupState::Ready;
                    slot.loaded_packages = loaded;
                    slot.last_error = None;
                    slot.in_flight = None;
                });
                if !applied {
                    return Err(OrchestratorError::Disposed);
                }
                info!("Group '{}' ready (from_cache: {})", group, outcome.from_cache);
                self.progress
                    .publish(ProgressEvent::new(LoadStage::GroupPackages(group), outcome.from_cache));
                self.progress
                    .publish(ProgressEvent::new(LoadStage::Ready(group), outcome.from_cache));
                Ok(())
            }
            Err(exhausted) => {
                let err = LoadError {
                    target: LoadTarget::Group(group),
                    attempts: exhausted.attempts,
                    reason: exhausted.last_error.to_string(),
                };
                error!("{}", err);
                self.mark_failed(group, generation, err.clone());
                self.stats.record_failure(FailureKind::Load);
                self.progress
                    .publish(ProgressEvent::new(LoadStage::Failed(LoadTarget::Group(group)), false));
                Err(err.into())
            }
        }
    }

    fn mark_failed(&self, group: CapabilityGroupId, generation: u64, err: LoadError) {
        self.state.update_group(generation, group, |slot| {
            slot.state = GroupState::Failed;
            slot.last_error = Some(err);
            slot.in_flight = None;
        });
    }
}
