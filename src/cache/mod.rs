//! Result Cache
//!
//! Content-addressed memoisation of (method, dataset, parameters) -> result.
//! Callers talk to the `ResultStore` trait so the eviction policy or backing
//! store can change without touching them.

mod fingerprint;

pub use fingerprint::{canonical_json, FingerprintAlgorithm};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::data::{AnalysisParams, Dataset};
use crate::registry::Method;

/// Default number of cached results
pub const DEFAULT_CAPACITY: usize = 10;
/// Default freshness window
pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(60 * 60);

/// A computed result, immutable once cached
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub method: Method,
    /// Digest of dataset and parameters; with `method` it addresses the entry
    pub dataset_fingerprint: String,
    pub parameters: AnalysisParams,
    pub payload: serde_json::Value,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub method: Method,
    pub dataset_hash: String,
    pub params_hash: String,
}

impl CacheKey {
    pub fn new(
        algorithm: FingerprintAlgorithm,
        method: Method,
        dataset: &Dataset,
        params: &AnalysisParams,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            method,
            dataset_hash: algorithm.fingerprint(&dataset.fingerprint_form())?,
            params_hash: algorithm.fingerprint(params)?,
        })
    }

    pub fn fingerprint(&self) -> String {
        format!("{}:{}", self.dataset_hash, self.params_hash)
    }
}

/// Content-addressed result storage
pub trait ResultStore: Send + Sync {
    /// A fresh entry for the key, or `None` on a miss
    fn get(&self, method: Method, dataset: &Dataset, params: &AnalysisParams) -> Option<Arc<AnalysisResult>>;

    /// Store a payload and return the entry now held for the key. A fresh
    /// entry already present is kept and returned instead.
    fn put(
        &self,
        method: Method,
        dataset: &Dataset,
        params: &AnalysisParams,
        payload: serde_json::Value,
    ) -> Arc<AnalysisResult>;

    fn clear(&self);

    /// Drop entries older than `max_age`, returning how many were removed
    fn evict_older_than(&self, max_age: Duration) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Entry {
    result: Arc<AnalysisResult>,
    inserted_at: Instant,
}

#[derive(Default)]
struct FifoState {
    entries: HashMap<CacheKey, Entry>,
    /// Keys in insertion order, oldest first
    order: VecDeque<CacheKey>,
}

impl FifoState {
    fn remove(&mut self, key: &CacheKey) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }
}

/// Bounded cache evicting the oldest-inserted entry on overflow.
/// Stale entries read as misses and stay until overwritten or evicted.
pub struct FifoResultCache {
    state: Mutex<FifoState>,
    capacity: usize,
    freshness: Duration,
    algorithm: FingerprintAlgorithm,
}

impl FifoResultCache {
    pub fn new(capacity: usize, freshness: Duration) -> Self {
        Self {
            state: Mutex::new(FifoState::default()),
            capacity: capacity.max(1),
            freshness,
            algorithm: FingerprintAlgorithm::default(),
        }
    }

    pub fn with_algorithm(mut self, algorithm: FingerprintAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn key_for(&self, method: Method, dataset: &Dataset, params: &AnalysisParams) -> serde_json::Result<CacheKey> {
        CacheKey::new(self.algorithm, method, dataset, params)
    }

    /// Cached keys, oldest first
    pub fn keys(&self) -> Vec<CacheKey> {
        self.lock().order.iter().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, FifoState> {
        // State is only mutated in whole steps under the lock, so a poisoned
        // guard still holds a consistent map
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for FifoResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_FRESHNESS)
    }
}

impl ResultStore for FifoResultCache {
    fn get(&self, method: Method, dataset: &Dataset, params: &AnalysisParams) -> Option<Arc<AnalysisResult>> {
        let key = match self.key_for(method, dataset, params) {
            Ok(key) => key,
            Err(err) => {
                warn!("Cannot fingerprint request for {}: {}", method, err);
                return None;
            }
        };
        let state = self.lock();
        match state.entries.get(&key) {
            Some(entry) if entry.inserted_at.elapsed() <= self.freshness => {
                debug!("Result cache hit for {}", method);
                Some(entry.result.clone())
            }
            Some(_) => {
                debug!("Result cache entry for {} is stale", method);
                None
            }
            None => None,
        }
    }

    fn put(
        &self,
        method: Method,
        dataset: &Dataset,
        params: &AnalysisParams,
        payload: serde_json::Value,
    ) -> Arc<AnalysisResult> {
        let key = match self.key_for(method, dataset, params) {
            Ok(key) => key,
            Err(err) => {
                // Returned to the caller but never stored under a shared key
                warn!("Cannot fingerprint request for {}, result not cached: {}", method, err);
                return Arc::new(AnalysisResult {
                    method,
                    dataset_fingerprint: String::new(),
                    parameters: params.clone(),
                    payload,
                    computed_at: Utc::now(),
                });
            }
        };
        let result = Arc::new(AnalysisResult {
            method,
            dataset_fingerprint: key.fingerprint(),
            parameters: params.clone(),
            payload,
            computed_at: Utc::now(),
        });

        let mut state = self.lock();
        if let Some(existing) = state.entries.get(&key) {
            if existing.inserted_at.elapsed() <= self.freshness {
                return existing.result.clone();
            }
            state.remove(&key);
        }

        state.order.push_back(key.clone());
        state.entries.insert(
            key,
            Entry {
                result: result.clone(),
                inserted_at: Instant::now(),
            },
        );

        while state.entries.len() > self.capacity {
            match state.order.pop_front() {
                Some(oldest) => {
                    state.entries.remove(&oldest);
                    debug!("Result cache full, evicted oldest entry for {}", oldest.method);
                }
                None => break,
            }
        }

        result
    }

    fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.order.clear();
    }

    fn evict_older_than(&self, max_age: Duration) -> usize {
        let mut state = self.lock();
        let expired: Vec<CacheKey> = state
            .order
            .iter()
            .filter(|k| state.entries.get(*k).is_some_and(|e| e.inserted_at.elapsed() > max_age))
            .cloned()
            .collect();
        for key in &expired {
            state.remove(key);
        }
        if !expired.is_empty() {
            debug!("Evicted {} result(s) older than {:?}", expired.len(), max_age);
        }
        expired.len()
    }

    fn len(&self) -> usize {
        self.lock().entries.len()
    }
}
