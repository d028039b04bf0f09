//! Load progress notifications
//!
//! Events go to registered callbacks synchronously and to any broadcast
//! receivers obtained through `subscribe`.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::broadcast;

use crate::error::LoadTarget;
use crate::registry::CapabilityGroupId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", content = "group", rename_all = "snake_case")]
pub enum LoadStage {
    /// Shared runtime is starting
    Runtime,
    /// Core numerical libraries are loaded
    CorePackages,
    /// A group's extra packages are loaded
    GroupPackages(CapabilityGroupId),
    /// A group is ready to serve dispatches
    Ready(CapabilityGroupId),
    /// A load gave up after exhausting its retries
    Failed(LoadTarget),
}

impl LoadStage {
    pub fn percent(&self) -> u8 {
        match self {
            LoadStage::Runtime => 0,
            LoadStage::CorePackages => 50,
            LoadStage::GroupPackages(_) => 75,
            LoadStage::Ready(_) => 100,
            LoadStage::Failed(_) => 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    #[serde(flatten)]
    pub stage: LoadStage,
    pub percent: u8,
    pub from_cache: bool,
}

impl ProgressEvent {
    pub fn new(stage: LoadStage, from_cache: bool) -> Self {
        Self {
            stage,
            percent: stage.percent(),
            from_cache,
        }
    }
}

type Callback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

pub struct ProgressBus {
    tx: broadcast::Sender<ProgressEvent>,
    callbacks: Mutex<BTreeMap<u64, Callback>>,
    next_id: AtomicU64,
}

impl ProgressBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            tx,
            callbacks: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, event: ProgressEvent) {
        let callbacks: Vec<Callback> = self
            .callbacks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect();
        // Called outside the lock so a callback may unsubscribe itself
        for cb in callbacks {
            cb(&event);
        }
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Register a callback; it stays registered until the returned handle's
    /// `unsubscribe` is called
    pub fn on_progress<F>(self: &Arc<Self>, callback: F) -> ProgressSubscription
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id, Arc::new(callback));
        ProgressSubscription {
            id,
            bus: Arc::downgrade(self),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.callbacks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

#[must_use = "dropping the subscription keeps the callback registered; call unsubscribe()"]
pub struct ProgressSubscription {
    id: u64,
    bus: Weak<ProgressBus>,
}

impl ProgressSubscription {
    pub fn unsubscribe(self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.callbacks.lock().unwrap_or_else(|p| p.into_inner()).remove(&self.id);
        }
    }
}
