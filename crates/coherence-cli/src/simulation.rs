//! In-process fleet simulation
//!
//! Several simulated service instances share one remote store. Each instance
//! has its own local tier, cache client and background write-back queue. All
//! of them increment the same counter record through the interlocked writer,
//! starting every update from a stale copy, then read the counter through the
//! cache and invalidate the cached GET for their session.
//!
//! With the lock held across read, mutate and write, the final count equals
//! the number of successful updates.

use crate::{config::SimConfig, error::SimError};
use coherence_cache::{
    BackgroundQueue, BackgroundStats, CacheClient, CacheConfig, CacheStore, Clock, MemoryStore,
    MemoryStoreConfig, SystemClock, TwoTierStats, TwoTierStore,
};
use coherence_invalidation::{InvalidationConfig, InvalidationService, StaticSessionResolver};
use coherence_lock::{
    ChannelSink, InterlockedWriter, LockError, LockService, MemoryRecordStore, RecordKey,
    RecordStore, VersionedRecord,
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Instant};
use tracing::{debug, info, warn};

const TALLY_HASH: &str = "tallies";
const TALLY_NAME: &str = "global";
const TALLY_URL: &str = "/tallies/global";
const RESOURCE_CLASS: &str = "sim";

/// Counter record updated by every simulated instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub name: String,
    pub count: u64,
    pub modified_at: i64,
}

impl Tally {
    /// Copy that never saw a write, so the stored version always wins
    pub fn stale(name: &str) -> Self {
        Self {
            name: name.to_string(),
            count: 0,
            modified_at: 0,
        }
    }

    pub fn key_for(name: &str) -> RecordKey {
        RecordKey::with_range(TALLY_HASH, name)
    }
}

impl VersionedRecord for Tally {
    fn record_key(&self) -> RecordKey {
        Self::key_for(&self.name)
    }

    fn modified_at(&self) -> i64 {
        self.modified_at
    }

    fn touch(&mut self, now_epoch_seconds: i64) {
        self.modified_at = now_epoch_seconds;
    }
}

/// Outcome of a simulation run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimReport {
    pub workers: usize,
    pub expected_count: u64,
    pub final_count: u64,
    /// Updates that gave up waiting for the lock
    pub timed_out: u64,
    /// Successful updates missing from the final count
    pub lost_updates: u64,
    pub notifications: u64,
    pub markers_written: u64,
    /// Cached reads found invalidated and evicted
    pub stale_reads: u64,
    pub two_tier: TwoTierStats,
    pub background: BackgroundStats,
    pub elapsed_ms: u64,
}

#[derive(Debug, Default)]
struct WorkerReport {
    timed_out: u64,
    markers_written: u64,
    stale_reads: u64,
    two_tier: TwoTierStats,
    background: BackgroundStats,
}

struct Shared {
    remote: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    records: Arc<MemoryRecordStore<Tally>>,
    writer: InterlockedWriter<Tally, MemoryRecordStore<Tally>>,
    invalidation: InvalidationService,
}

/// Run the simulation described by `config`.
///
/// # Errors
///
/// Returns an error when the configuration is invalid, a cache component
/// cannot be built, or an update fails for a reason other than lock timeout.
pub async fn run(config: &SimConfig) -> Result<SimReport, SimError> {
    config.validate()?;
    let started = Instant::now();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let remote: Arc<dyn CacheStore> = Arc::new(MemoryStore::new_with_cleanup(
        MemoryStoreConfig::from_env(),
        Arc::clone(&clock),
    )?);
    let records = Arc::new(MemoryRecordStore::<Tally>::new());
    let (sink, mut notifications) = ChannelSink::new();

    let locks = Arc::new(LockService::new(Arc::clone(&remote), Arc::clone(&clock)));
    let writer = InterlockedWriter::new(locks, Arc::clone(&records), config.interlock())
        .with_notification_sink(Arc::new(sink));
    let invalidation = InvalidationService::new(
        Arc::clone(&remote),
        Arc::clone(&clock),
        Arc::new(StaticSessionResolver::new()),
        InvalidationConfig::from_env(),
    )?;

    let shared = Arc::new(Shared {
        remote,
        clock,
        records: Arc::clone(&records),
        writer,
        invalidation,
    });

    info!(
        workers = config.workers,
        updates_per_worker = config.updates_per_worker,
        "starting simulation"
    );

    let handles: Vec<_> = (0..config.workers)
        .map(|worker| {
            let shared = Arc::clone(&shared);
            let config = config.clone();
            tokio::spawn(async move { run_worker(worker, &shared, &config).await })
        })
        .collect();

    let mut report = SimReport {
        workers: config.workers,
        expected_count: (config.workers * config.updates_per_worker) as u64,
        ..SimReport::default()
    };

    for (worker, joined) in futures::future::join_all(handles).await.into_iter().enumerate() {
        let worker_report = joined.map_err(|e| SimError::Worker {
            worker,
            reason: e.to_string(),
        })??;
        report.timed_out += worker_report.timed_out;
        report.markers_written += worker_report.markers_written;
        report.stale_reads += worker_report.stale_reads;
        add_two_tier(&mut report.two_tier, worker_report.two_tier);
        add_background(&mut report.background, worker_report.background);
    }

    while notifications.try_recv().is_ok() {
        report.notifications += 1;
    }

    report.final_count = records
        .get_item(&Tally::key_for(TALLY_NAME))
        .await?
        .map_or(0, |tally| tally.count);
    report.lost_updates = report
        .expected_count
        .saturating_sub(report.timed_out)
        .saturating_sub(report.final_count);
    report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    if report.lost_updates > 0 {
        warn!(lost = report.lost_updates, "updates were lost");
    }
    info!(
        final_count = report.final_count,
        timed_out = report.timed_out,
        elapsed_ms = report.elapsed_ms,
        "simulation finished"
    );
    Ok(report)
}

async fn run_worker(
    worker: usize,
    shared: &Shared,
    config: &SimConfig,
) -> Result<WorkerReport, SimError> {
    let local: Arc<dyn CacheStore> = Arc::new(MemoryStore::new(
        MemoryStoreConfig::default().with_eviction(true),
        Arc::clone(&shared.clock),
    )?);
    let tiers = Arc::new(TwoTierStore::new(
        local,
        Arc::clone(&shared.remote),
        Arc::clone(&shared.clock),
        config.two_tier(),
    )?);
    let queue = Arc::new(BackgroundQueue::start(config.background())?);
    let client = CacheClient::new(tiers.clone(), Arc::clone(&shared.clock))
        .with_background(Arc::clone(&queue));

    let session = format!("session-{}", worker % config.sessions);
    let cache_key = format!("{RESOURCE_CLASS}:tally:{TALLY_NAME}");
    let read_policy = CacheConfig::for_seconds(5);
    let mut report = WorkerReport::default();

    for update in 0..config.updates_per_worker {
        let served_at = shared
            .invalidation
            .mark_get_response_served(RESOURCE_CLASS, &session, TALLY_URL)
            .await;

        match shared
            .writer
            .put_item_tracked_interlocked_and_defer(
                Tally::stale(TALLY_NAME),
                |tally| tally.count += 1,
                None,
            )
            .await
        {
            Ok(stored) => debug!(worker, update, count = stored.count, "incremented tally"),
            Err(LockError::Timeout { waited, .. }) => {
                warn!(worker, update, waited_ms = waited.as_millis(), "gave up on tally lock");
                report.timed_out += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        }

        report.markers_written += shared
            .invalidation
            .invalidate(RESOURCE_CLASS, &session, &[TALLY_URL])
            .await as u64;

        if !shared
            .invalidation
            .is_cached_get_still_valid(RESOURCE_CLASS, &session, TALLY_URL, served_at)
            .await
        {
            report.stale_reads += 1;
            if let Err(e) = client.remove(&cache_key).await {
                warn!(worker, key = %cache_key, error = %e, "failed to evict stale read");
            }
        }

        let records = Arc::clone(&shared.records);
        let observed: u64 = client
            .try_get_async(
                &cache_key,
                || async move {
                    records
                        .get_item(&Tally::key_for(TALLY_NAME))
                        .await
                        .map(|tally| tally.map_or(0, |tally| tally.count))
                },
                &read_policy,
            )
            .await?;
        debug!(worker, update, observed, "read tally through cache");
    }

    queue.wait_idle().await;
    queue.shutdown().await;

    report.two_tier = tiers.stats();
    report.background = queue.stats();
    Ok(report)
}

fn add_two_tier(total: &mut TwoTierStats, other: TwoTierStats) {
    total.local_hits += other.local_hits;
    total.remote_hits += other.remote_hits;
    total.misses += other.misses;
    total.local_write_failures += other.local_write_failures;
}

fn add_background(total: &mut BackgroundStats, other: BackgroundStats) {
    total.submitted += other.submitted;
    total.completed += other.completed;
    total.failed += other.failed;
    total.evicted += other.evicted;
}
