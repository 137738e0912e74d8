//! Bounded background job queue for best-effort write-backs
//!
//! Get-or-compute lookups must never wait on a cache write. They hand the
//! write to a [`BackgroundQueue`], which runs it on a small pool of tokio
//! worker tasks, retrying failed jobs with jittered exponential backoff.
//!
//! The queue is bounded. When it is full the oldest job not submitted with
//! `force` is evicted to make room; forced jobs are never evicted, so a
//! queue holding only forced jobs grows past its capacity.

#![allow(missing_docs)]

use crate::{
    config::BackgroundConfig,
    error::{CacheError, CacheResult},
};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use rand::{RngExt, rng};
use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::{sync::Notify, task::JoinHandle, time::sleep};
use tracing::{debug, info, warn};

type JobFn = Box<dyn Fn() -> BoxFuture<'static, CacheResult<()>> + Send + Sync>;
type AbandonFn = Box<dyn FnOnce() + Send>;

struct Job {
    name: String,
    force: bool,
    run: JobFn,
    /// Runs if the job is dropped without completing: evicted, out of
    /// attempts, or still queued when the queue goes away.
    on_abandon: Option<AbandonFn>,
}

impl Job {
    /// Drop without running `on_abandon`
    fn disarm(mut self) {
        self.on_abandon = None;
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        if let Some(on_abandon) = self.on_abandon.take() {
            on_abandon();
        }
    }
}

/// Counters for a [`BackgroundQueue`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundStats {
    pub submitted: u64,
    pub completed: u64,
    /// Jobs that exhausted their attempts
    pub failed: u64,
    /// Jobs dropped unrun to make room
    pub evicted: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    evicted: AtomicU64,
}

struct Shared {
    config: BackgroundConfig,
    queue: Mutex<VecDeque<Job>>,
    /// Jobs currently executing; only changed while `queue` is locked
    running: AtomicUsize,
    closed: AtomicBool,
    work: Notify,
    idle: Notify,
    counters: Counters,
}

impl Shared {
    fn is_idle(&self) -> bool {
        let queue = self.queue.lock();
        queue.is_empty() && self.running.load(Ordering::SeqCst) == 0
    }

    fn next_job(&self) -> Option<Job> {
        let mut queue = self.queue.lock();
        let job = queue.pop_front();
        if job.is_some() {
            self.running.fetch_add(1, Ordering::SeqCst);
        }
        job
    }

    fn finish_job(&self) {
        let idle = {
            let queue = self.queue.lock();
            let running = self.running.fetch_sub(1, Ordering::SeqCst) - 1;
            queue.is_empty() && running == 0
        };
        if idle {
            self.idle.notify_waiters();
        }
    }
}

/// Delay before retry number `attempt` (1-based): base doubled per attempt,
/// plus up to 30% jitter, never above the configured maximum.
fn retry_delay(config: &BackgroundConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let backoff = config
        .base_backoff
        .saturating_mul(1_u32 << exponent)
        .min(config.max_backoff);

    let jitter = rng().random_range(0.0..0.3);
    backoff.mul_f64(1.0 + jitter).min(config.max_backoff)
}

/// Pool of worker tasks draining a bounded job queue
pub struct BackgroundQueue {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for BackgroundQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundQueue")
            .field("config", &self.shared.config)
            .field("queued", &self.len())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl BackgroundQueue {
    /// Spawn the worker tasks. Must be called from within a tokio runtime.
    pub fn start(config: BackgroundConfig) -> CacheResult<Self> {
        config
            .validate()
            .map_err(CacheError::InvalidConfiguration)?;

        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(config.capacity)),
            running: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            work: Notify::new(),
            idle: Notify::new(),
            counters: Counters::default(),
            config,
        });

        let workers = (0..shared.config.workers)
            .map(|id| tokio::spawn(worker_loop(id, Arc::clone(&shared))))
            .collect();

        info!(
            workers = shared.config.workers,
            capacity = shared.config.capacity,
            "background queue started"
        );

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
        })
    }

    /// Enqueue a job. The closure is called once per attempt.
    pub fn submit<F, Fut>(&self, name: impl Into<String>, force: bool, job: F) -> CacheResult<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CacheResult<()>> + Send + 'static,
    {
        self.enqueue(Job {
            name: name.into(),
            force,
            run: Box::new(move || job().boxed()),
            on_abandon: None,
        })
    }

    /// As [`Self::submit`], calling `on_abandon` once if the job never
    /// completes: it is evicted, exhausts its attempts, or is dropped with
    /// the queue. Not called when submission itself is rejected.
    pub fn submit_with_abandon<F, Fut, A>(
        &self,
        name: impl Into<String>,
        force: bool,
        job: F,
        on_abandon: A,
    ) -> CacheResult<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CacheResult<()>> + Send + 'static,
        A: FnOnce() + Send + 'static,
    {
        self.enqueue(Job {
            name: name.into(),
            force,
            run: Box::new(move || job().boxed()),
            on_abandon: Some(Box::new(on_abandon)),
        })
    }

    fn enqueue(&self, job: Job) -> CacheResult<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            job.disarm();
            return Err(CacheError::QueueClosed);
        }

        // evicted jobs are dropped after the queue lock is released, so
        // their abandon hooks never run under it
        let evicted = {
            let mut queue = self.shared.queue.lock();
            let evicted = if queue.len() >= self.shared.config.capacity {
                queue
                    .iter()
                    .position(|queued| !queued.force)
                    .and_then(|position| queue.remove(position))
            } else {
                None
            };
            queue.push_back(job);
            evicted
        };
        if let Some(evicted) = evicted {
            self.shared.counters.evicted.fetch_add(1, Ordering::Relaxed);
            warn!(job = %evicted.name, "background queue full, evicted oldest job");
        }

        self.shared
            .counters
            .submitted
            .fetch_add(1, Ordering::Relaxed);
        self.shared.work.notify_one();
        Ok(())
    }

    /// Jobs waiting to run
    pub fn len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> BackgroundStats {
        let counters = &self.shared.counters;
        BackgroundStats {
            submitted: counters.submitted.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            evicted: counters.evicted.load(Ordering::Relaxed),
        }
    }

    /// Resolve once nothing is queued or running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shared.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting jobs, drain what is queued, then stop the workers
    pub async fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.work.notify_waiters();

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "background worker ended abnormally");
            }
        }
        info!(stats = ?self.stats(), "background queue stopped");
    }
}

impl Drop for BackgroundQueue {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        for worker in self.workers.get_mut().drain(..) {
            worker.abort();
        }
    }
}

async fn worker_loop(id: usize, shared: Arc<Shared>) {
    loop {
        let notified = shared.work.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some(job) = shared.next_job() {
            run_job(&shared, job).await;
            shared.finish_job();
            continue;
        }

        if shared.closed.load(Ordering::SeqCst) {
            debug!(worker = id, "background worker exiting");
            return;
        }
        notified.await;
    }
}

async fn run_job(shared: &Shared, job: Job) {
    let max_attempts = shared.config.max_attempts;
    let mut attempt = 1;

    loop {
        match (job.run)().await {
            Ok(()) => {
                shared.counters.completed.fetch_add(1, Ordering::Relaxed);
                debug!(job = %job.name, attempt, "background job completed");
                job.disarm();
                return;
            }
            Err(e) if attempt < max_attempts => {
                let delay = retry_delay(&shared.config, attempt);
                warn!(job = %job.name, attempt, error = %e, ?delay, "background job failed, retrying");
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(job = %job.name, attempts = attempt, error = %e, "background job abandoned");
                return;
            }
        }
    }
}
