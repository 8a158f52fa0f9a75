//! Fixed-size pool of engine workers.
//!
//! The pool is the only place workers change hands. Idle workers wait in a
//! queue guarded by a mutex, and a fair semaphore holds one permit per idle
//! worker, so callers are served in arrival order and no worker is ever
//! given to two requests at once. A caller only gives up waiting once no
//! worker has been healthy for the whole acquire timeout.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::{join_all, BoxFuture};
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::channel::EngineLauncher;
use crate::error::EngineError;
use crate::evaluation::{Evaluation, PositionEvaluator};
use crate::position::AnalysisRequest;
use crate::worker::{EngineWorker, WorkerConfig, WorkerStatus};

/// Pool construction settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of engine processes.
    pub size: usize,
    /// How long `submit` waits while every worker is out of rotation.
    /// Waiting behind busy healthy workers is not bounded by it.
    pub acquire_timeout: Duration,
    /// Delay between health probes of a worker taken out of rotation.
    pub probe_interval: Duration,
    pub worker: WorkerConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 1,
            acquire_timeout: Duration::from_secs(30),
            probe_interval: Duration::from_secs(5),
            worker: WorkerConfig::default(),
        }
    }
}

struct PoolInner<L: EngineLauncher> {
    config: PoolConfig,
    idle: Mutex<VecDeque<EngineWorker<L>>>,
    available: Semaphore,
    statuses: Mutex<Vec<WorkerStatus>>,
    /// Number of `Idle` or `Busy` workers, published on every status change.
    healthy: watch::Sender<usize>,
    dispatched: AtomicU64,
    closed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<L: EngineLauncher> PoolInner<L> {
    fn set_status(&self, worker: usize, status: WorkerStatus) {
        let healthy = {
            let mut statuses = lock(&self.statuses);
            if let Some(slot) = statuses.get_mut(worker) {
                *slot = status;
            }
            statuses.iter().filter(|s| s.is_healthy()).count()
        };
        self.healthy.send_replace(healthy);
    }

    /// Put a healthy worker back into rotation.
    fn release(&self, worker: EngineWorker<L>) {
        if self.closed.load(Ordering::Acquire) {
            self.set_status(worker.id(), WorkerStatus::Restarting);
            return;
        }
        self.set_status(worker.id(), WorkerStatus::Idle);
        lock(&self.idle).push_back(worker);
        self.available.add_permits(1);
    }

    /// Probe an unhealthy worker in the background until it answers again.
    fn spawn_recovery(self: &Arc<Self>, mut worker: EngineWorker<L>) {
        self.set_status(worker.id(), WorkerStatus::Restarting);
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(inner.config.probe_interval).await;
                if inner.closed.load(Ordering::Acquire) {
                    return;
                }
                match worker.probe().await {
                    Ok(()) => {
                        info!(worker = worker.id(), "Engine worker back in rotation");
                        inner.release(worker);
                        return;
                    }
                    Err(e) => debug!(worker = worker.id(), error = %e, "Health probe failed"),
                }
            }
        });
    }
}

/// Multiplexes evaluation requests over a fixed set of engine workers.
pub struct WorkerPool<L: EngineLauncher> {
    inner: Arc<PoolInner<L>>,
}

impl<L: EngineLauncher> Clone for WorkerPool<L> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<L: EngineLauncher> WorkerPool<L> {
    /// Start `config.size` engines concurrently.
    ///
    /// Engines that fail to start are retried in the background.
    ///
    /// # Errors
    ///
    /// `EngineError::Startup` if not a single engine could be started.
    pub async fn start(launcher: L, config: PoolConfig) -> Result<Self, EngineError> {
        let size = config.size.max(1);
        let launcher = Arc::new(launcher);
        let worker_config = Arc::new(config.worker.clone());

        let inner = Arc::new(PoolInner {
            config,
            idle: Mutex::new(VecDeque::with_capacity(size)),
            available: Semaphore::new(0),
            statuses: Mutex::new(vec![WorkerStatus::Restarting; size]),
            healthy: watch::channel(0).0,
            dispatched: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        let attempts = (0..size).map(|id| {
            let mut worker = EngineWorker::new(id, Arc::clone(&launcher), Arc::clone(&worker_config));
            async move {
                let result = worker.probe().await;
                (worker, result)
            }
        });

        let mut started = Vec::new();
        let mut failed = Vec::new();
        for (worker, result) in join_all(attempts).await {
            match result {
                Ok(()) => started.push(worker),
                Err(e) => {
                    warn!(worker = worker.id(), error = %e, "Engine failed to start");
                    failed.push((worker, e));
                }
            }
        }

        if started.is_empty() {
            let reason = failed
                .into_iter()
                .next()
                .map(|(_, e)| e.to_string())
                .unwrap_or_else(|| "no workers configured".to_string());
            return Err(EngineError::Startup(reason));
        }

        info!(workers = started.len(), size, "Engine pool ready");
        for worker in started {
            inner.release(worker);
        }
        for (worker, _) in failed {
            inner.spawn_recovery(worker);
        }
        Ok(Self { inner })
    }

    /// Evaluate on the next free worker.
    ///
    /// Waits in arrival order for a worker. The search itself runs in its
    /// own task, so the worker returns to the pool even if the caller stops
    /// waiting.
    ///
    /// # Errors
    ///
    /// - `EngineError::PoolExhausted` if every worker stays out of rotation
    ///   for the acquire timeout
    /// - `EngineError::PoolClosed` after [`shutdown`](Self::shutdown)
    /// - `EngineError::EvaluationFailed` from the worker; that worker then
    ///   leaves rotation until a health probe succeeds
    pub async fn submit(&self, request: AnalysisRequest) -> Result<Evaluation, EngineError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(EngineError::PoolClosed);
        }

        let wait = self.inner.config.acquire_timeout;
        self.acquire(wait).await?;

        let next = lock(&self.inner.idle).pop_front();
        let Some(mut worker) = next else {
            return Err(EngineError::PoolExhausted(wait));
        };
        let id = worker.id();
        self.inner.set_status(id, WorkerStatus::Busy);
        self.inner.dispatched.fetch_add(1, Ordering::Relaxed);
        debug!(worker = id, fen = %request.position, limit = %request.limit, "Dispatching search");

        let inner = Arc::clone(&self.inner);
        let search = tokio::spawn(async move {
            let result = worker.evaluate(&request).await;
            if worker.status() == WorkerStatus::Restarting {
                inner.spawn_recovery(worker);
            } else {
                inner.release(worker);
            }
            result
        });

        search.await.map_err(|e| EngineError::EvaluationFailed {
            worker: id,
            reason: format!("search task aborted: {}", e),
        })?
    }

    /// Take one idle-worker permit, keeping our place in the queue.
    ///
    /// The deadline only runs while no worker is healthy and is dropped as
    /// soon as one comes back.
    async fn acquire(&self, wait: Duration) -> Result<(), EngineError> {
        let mut health = self.inner.healthy.subscribe();
        let permit = self.inner.available.acquire();
        tokio::pin!(permit);
        let mut deadline: Option<Instant> = None;

        loop {
            if *health.borrow_and_update() > 0 {
                deadline = None;
            } else {
                deadline.get_or_insert_with(|| Instant::now() + wait);
            }
            let at = deadline;
            let expiry = async move {
                match at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                acquired = &mut permit => {
                    return match acquired {
                        Ok(permit) => {
                            permit.forget();
                            Ok(())
                        }
                        Err(_) => Err(EngineError::PoolClosed),
                    };
                }
                changed = health.changed() => {
                    if changed.is_err() {
                        return Err(EngineError::PoolClosed);
                    }
                }
                () = expiry => {
                    warn!(?wait, "No engine worker has been healthy for the acquire timeout");
                    return Err(EngineError::PoolExhausted(wait));
                }
            }
        }
    }

    /// Snapshot of every worker's state, indexed by worker id.
    pub fn statuses(&self) -> Vec<WorkerStatus> {
        lock(&self.inner.statuses).clone()
    }

    pub fn healthy_workers(&self) -> usize {
        lock(&self.inner.statuses).iter().filter(|s| s.is_healthy()).count()
    }

    pub fn size(&self) -> usize {
        lock(&self.inner.statuses).len()
    }

    /// Searches handed to workers since the pool started.
    pub fn dispatch_count(&self) -> u64 {
        self.inner.dispatched.load(Ordering::Relaxed)
    }

    /// Stop accepting work and quit idle engines.
    ///
    /// Searches already running finish; their workers are dropped instead of
    /// being returned.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.available.close();

        let idle: Vec<_> = lock(&self.inner.idle).drain(..).collect();
        for mut worker in idle {
            self.inner.set_status(worker.id(), WorkerStatus::Restarting);
            worker.shutdown().await;
        }
        info!("Engine pool shut down");
    }
}

impl<L: EngineLauncher> PositionEvaluator for WorkerPool<L> {
    fn evaluate(&self, request: AnalysisRequest) -> BoxFuture<'_, Result<Evaluation, EngineError>> {
        Box::pin(self.submit(request))
    }
}
