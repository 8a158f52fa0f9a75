//! Content-addressed evaluation cache with request coalescing.
//!
//! Lookups go through three layers: resolved results in memory, computations
//! in flight, and an optional durable [`EvaluationStore`]. Concurrent callers
//! asking for the same [`AnalysisRequest`] share a single computation. Only
//! exact keys match: an evaluation at depth 12 never answers a request for
//! depth 18.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{EngineError, StoreError};
use crate::evaluation::{Evaluation, PositionEvaluator};
use crate::position::AnalysisRequest;

/// Durable backing store for evaluations.
///
/// Eviction and size policy belong to the implementation. Calls may block;
/// the cache runs them on tokio's blocking pool.
pub trait EvaluationStore: Send + Sync {
    fn load(&self, request: &AnalysisRequest) -> Result<Option<Evaluation>, StoreError>;
    fn save(&self, request: &AnalysisRequest, evaluation: &Evaluation) -> Result<(), StoreError>;
}

/// Process-local store, mostly useful in tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<AnalysisRequest, Evaluation>>,
}

impl MemoryStore {
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EvaluationStore for MemoryStore {
    fn load(&self, request: &AnalysisRequest) -> Result<Option<Evaluation>, StoreError> {
        Ok(lock(&self.entries).get(request).cloned())
    }

    fn save(&self, request: &AnalysisRequest, evaluation: &Evaluation) -> Result<(), StoreError> {
        lock(&self.entries).insert(request.clone(), evaluation.clone());
        Ok(())
    }
}

/// Counters describing how requests were answered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Answered from memory.
    pub hits: u64,
    /// Answered from the durable store.
    pub store_hits: u64,
    /// Joined a computation already in flight.
    pub coalesced: u64,
    /// Computations started.
    pub computed: u64,
    /// Computations that failed.
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    store_hits: AtomicU64,
    coalesced: AtomicU64,
    computed: AtomicU64,
    failures: AtomicU64,
}

type SharedEvaluation = Shared<BoxFuture<'static, Result<Evaluation, EngineError>>>;

struct CacheInner {
    // Lock order: in_flight before resolved.
    in_flight: Mutex<HashMap<AnalysisRequest, SharedEvaluation>>,
    resolved: Mutex<HashMap<AnalysisRequest, Evaluation>>,
    store: Option<Arc<dyn EvaluationStore>>,
    counters: Counters,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared, cloneable handle to one cache.
#[derive(Clone)]
pub struct EvaluationCache {
    inner: Arc<CacheInner>,
}

impl Default for EvaluationCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EvaluationCache {
    /// Memory-only cache.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Cache that reads through and writes through to `store`.
    pub fn with_store(store: Arc<dyn EvaluationStore>) -> Self {
        Self::build(Some(store))
    }

    fn build(store: Option<Arc<dyn EvaluationStore>>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                in_flight: Mutex::new(HashMap::new()),
                resolved: Mutex::new(HashMap::new()),
                store,
                counters: Counters::default(),
            }),
        }
    }

    /// Return the evaluation for `request`, computing it at most once.
    ///
    /// `compute` is only called when neither memory, an in-flight
    /// computation nor the store can answer. Every caller waiting on a
    /// computation receives its result; failures are handed to all of them
    /// and are not remembered, so a later call computes again.
    pub async fn get_or_compute<F, Fut>(
        &self,
        request: &AnalysisRequest,
        compute: F,
    ) -> Result<Evaluation, EngineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Evaluation, EngineError>> + Send + 'static,
    {
        let pending = {
            let mut in_flight = lock(&self.inner.in_flight);
            if let Some(hit) = lock(&self.inner.resolved).get(request) {
                self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(hit.clone());
            }
            match in_flight.get(request) {
                Some(pending) => {
                    self.inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                    pending.clone()
                }
                None => {
                    let computation = Self::resolve(Arc::clone(&self.inner), request.clone(), compute())
                        .boxed()
                        .shared();
                    in_flight.insert(request.clone(), computation.clone());
                    computation
                }
            }
        };
        pending.await
    }

    async fn resolve<Fut>(
        inner: Arc<CacheInner>,
        request: AnalysisRequest,
        computation: Fut,
    ) -> Result<Evaluation, EngineError>
    where
        Fut: Future<Output = Result<Evaluation, EngineError>> + Send + 'static,
    {
        let stored = match &inner.store {
            Some(store) => load_stored(Arc::clone(store), request.clone()).await,
            None => None,
        };

        let result = match stored {
            Some(evaluation) => {
                inner.counters.store_hits.fetch_add(1, Ordering::Relaxed);
                Ok(evaluation)
            }
            None => {
                inner.counters.computed.fetch_add(1, Ordering::Relaxed);
                let result = computation.await;
                match &result {
                    Ok(evaluation) => {
                        if let Some(store) = &inner.store {
                            save_stored(Arc::clone(store), request.clone(), evaluation.clone()).await;
                        }
                    }
                    Err(e) => {
                        inner.counters.failures.fetch_add(1, Ordering::Relaxed);
                        debug!(fen = %request.position, error = %e, "Evaluation failed, not caching");
                    }
                }
                result
            }
        };

        let mut in_flight = lock(&inner.in_flight);
        if let Ok(evaluation) = &result {
            lock(&inner.resolved).insert(request.clone(), evaluation.clone());
        }
        in_flight.remove(&request);
        result
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            store_hits: c.store_hits.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            computed: c.computed.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
        }
    }

    /// Number of evaluations held in memory.
    pub fn len(&self) -> usize {
        lock(&self.inner.resolved).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn load_stored(store: Arc<dyn EvaluationStore>, request: AnalysisRequest) -> Option<Evaluation> {
    match tokio::task::spawn_blocking(move || store.load(&request)).await {
        Ok(Ok(found)) => found,
        Ok(Err(e)) => {
            warn!(error = %e, "Evaluation store read failed, treating as miss");
            None
        }
        Err(e) => {
            warn!(error = %e, "Evaluation store read did not complete, treating as miss");
            None
        }
    }
}

async fn save_stored(store: Arc<dyn EvaluationStore>, request: AnalysisRequest, evaluation: Evaluation) {
    match tokio::task::spawn_blocking(move || store.save(&request, &evaluation)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Evaluation store write failed"),
        Err(e) => warn!(error = %e, "Evaluation store write did not complete"),
    }
}

/// A [`PositionEvaluator`] that consults a cache before its inner evaluator.
pub struct CachedEvaluator<E> {
    cache: EvaluationCache,
    inner: Arc<E>,
}

impl<E: PositionEvaluator + 'static> CachedEvaluator<E> {
    pub fn new(cache: EvaluationCache, inner: Arc<E>) -> Self {
        Self { cache, inner }
    }

    pub fn cache(&self) -> &EvaluationCache {
        &self.cache
    }

    pub fn inner(&self) -> &Arc<E> {
        &self.inner
    }
}

impl<E: PositionEvaluator + 'static> PositionEvaluator for CachedEvaluator<E> {
    fn evaluate(&self, request: AnalysisRequest) -> BoxFuture<'_, Result<Evaluation, EngineError>> {
        let inner = Arc::clone(&self.inner);
        let forwarded = request.clone();
        Box::pin(async move {
            self.cache
                .get_or_compute(&request, move || async move { inner.evaluate(forwarded).await })
                .await
        })
    }
}
