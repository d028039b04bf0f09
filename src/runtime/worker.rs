//! Single logical worker per capability group
//!
//! Jobs for one group run strictly in submission order; separate groups have
//! separate workers and run concurrently. A job is queued the moment it is
//! submitted and carries a readiness gate the worker awaits before invoking
//! the backend, so jobs submitted while the group is still loading keep
//! their order.

use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use super::backend::AnalysisBackend;
use crate::error::{BackendError, OrchestratorError};
use crate::registry::{CapabilityGroupId, Method};

/// Resolves once the group can serve the job
pub(crate) type ReadyGate = BoxFuture<'static, Result<(), OrchestratorError>>;

/// Outer error: the job never reached the backend. Inner: the backend's answer.
pub(crate) type JobResult = Result<Result<Value, BackendError>, OrchestratorError>;

struct Job {
    method: Method,
    args: Value,
    gate: ReadyGate,
    reply: oneshot::Sender<JobResult>,
}

pub(crate) struct GroupWorker {
    tx: mpsc::UnboundedSender<Job>,
    handle: JoinHandle<()>,
}

impl GroupWorker {
    pub(crate) fn spawn(group: CapabilityGroupId, backend: Arc<dyn AnalysisBackend>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let result = match job.gate.await {
                    Ok(()) => {
                        debug!("Worker '{}' running {}", group, job.method);
                        Ok(backend.invoke(group, job.method.id(), job.args).await)
                    }
                    Err(err) => Err(err),
                };
                // The caller may have gone away; nothing to report to
                let _ = job.reply.send(result);
            }
            debug!("Worker '{}' stopped", group);
        });
        Self { tx, handle }
    }

    /// Queue a job behind everything already submitted; `None` once the
    /// worker has stopped
    pub(crate) fn submit(&self, method: Method, args: Value, gate: ReadyGate) -> Option<oneshot::Receiver<JobResult>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Job { method, args, gate, reply }).ok()?;
        Some(rx)
    }

    /// Stop immediately; queued and running jobs are dropped
    pub(crate) fn shutdown(self) {
        self.handle.abort();
    }
}
