//! End-to-end behaviour of interlocked writes over a shared lock store

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use async_trait::async_trait;
use bytes::Bytes;
use coherence_cache::{
    CacheError, CacheResult, CacheStore, Expiry, ManualClock, MemoryStore, MemoryStoreConfig,
    StoredValue,
};
use coherence_lock::{
    ChangeNotification, ChannelSink, InterlockConfig, InterlockedWriter, LockError, LockService,
    MemoryRecordStore, NotificationSink, NotifyError, RecordKey, RecordStore, StoreError,
    StoreResult, VersionedRecord,
};
use pretty_assertions::assert_eq;
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

const NOW: i64 = 10_000;

#[derive(Debug, Clone, PartialEq)]
struct Counter {
    name: String,
    count: u64,
    label: String,
    modified_at: i64,
}

impl Counter {
    fn new(name: &str, count: u64, modified_at: i64) -> Self {
        Self {
            name: name.to_string(),
            count,
            label: String::new(),
            modified_at,
        }
    }
}

impl VersionedRecord for Counter {
    fn record_key(&self) -> RecordKey {
        RecordKey::with_range("counters", self.name.clone())
    }

    fn modified_at(&self) -> i64 {
        self.modified_at
    }

    fn touch(&mut self, now_epoch_seconds: i64) {
        self.modified_at = now_epoch_seconds;
    }
}

/// Record store that measures how many writers are between read and write
#[derive(Debug, Default)]
struct ExclusiveCheckStore {
    inner: MemoryRecordStore<Counter>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

#[async_trait]
impl RecordStore<Counter> for ExclusiveCheckStore {
    async fn get_item(&self, key: &RecordKey) -> StoreResult<Option<Counter>> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.inner.get_item(key).await
    }

    async fn put_item(&self, item: &Counter) -> StoreResult<Counter> {
        let stored = self.inner.put_item(item).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        stored
    }
}

#[derive(Debug, Default)]
struct BrokenRecordStore;

#[async_trait]
impl RecordStore<Counter> for BrokenRecordStore {
    async fn get_item(&self, _key: &RecordKey) -> StoreResult<Option<Counter>> {
        Ok(None)
    }

    async fn put_item(&self, item: &Counter) -> StoreResult<Counter> {
        Err(StoreError::Backend(format!("{} rejected", item.record_key())))
    }
}

/// Cache store that is permanently unreachable
#[derive(Debug, Default)]
struct OfflineStore;

#[async_trait]
impl CacheStore for OfflineStore {
    async fn get_with_expiry(&self, _key: &str) -> CacheResult<Option<StoredValue>> {
        Err(CacheError::Backend("offline".to_string()))
    }

    async fn set(&self, _key: &str, _value: Bytes, _expiry: Expiry) -> CacheResult<bool> {
        Err(CacheError::Backend("offline".to_string()))
    }

    async fn add(&self, _key: &str, _value: Bytes, _expiry: Expiry) -> CacheResult<bool> {
        Err(CacheError::Backend("offline".to_string()))
    }

    async fn replace(&self, _key: &str, _value: Bytes, _expiry: Expiry) -> CacheResult<bool> {
        Err(CacheError::Backend("offline".to_string()))
    }

    async fn remove(&self, _key: &str) -> CacheResult<bool> {
        Err(CacheError::Backend("offline".to_string()))
    }

    async fn apply_delta(&self, _key: &str, _delta: i64, _expiry: Expiry) -> CacheResult<i64> {
        Err(CacheError::Backend("offline".to_string()))
    }

    async fn clear(&self) -> CacheResult<()> {
        Err(CacheError::Backend("offline".to_string()))
    }

    async fn len(&self) -> CacheResult<usize> {
        Err(CacheError::Backend("offline".to_string()))
    }
}

#[derive(Debug, Default)]
struct RejectingSink;

#[async_trait]
impl NotificationSink for RejectingSink {
    async fn publish(&self, _notification: ChangeNotification) -> Result<(), NotifyError> {
        Err(NotifyError::Backend("broker unavailable".to_string()))
    }
}

fn lock_service() -> Arc<LockService> {
    let clock = Arc::new(ManualClock::at_epoch_seconds(NOW));
    let store = Arc::new(MemoryStore::new(MemoryStoreConfig::default(), clock.clone()).unwrap());
    Arc::new(LockService::new(store, clock))
}

fn fast_config() -> InterlockConfig {
    InterlockConfig::new().with_backoff(Duration::from_millis(1), Duration::from_millis(3))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_never_overlap_and_lose_nothing() {
    let locks = lock_service();
    let store = Arc::new(ExclusiveCheckStore::default());
    store.inner.insert(Counter::new("hits", 0, 1));
    let writer = Arc::new(InterlockedWriter::new(locks.clone(), store.clone(), fast_config()));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let writer = Arc::clone(&writer);
        tasks.push(tokio::spawn(async move {
            for _ in 0..5 {
                // a stale caller copy: the stored copy is always newer
                writer
                    .put_item_tracked_interlocked(Counter::new("hits", 0, 0), |c| c.count += 1, None)
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let stored = store
        .inner
        .get_item(&RecordKey::with_range("counters", "hits"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.count, 40);
    assert_eq!(stored.modified_at, NOW);
    assert_eq!(store.max_active.load(Ordering::SeqCst), 1);
    assert!(locks.current("counters|hits", "Counter").await.unwrap().is_none());
}

#[tokio::test]
async fn newer_stored_copy_is_mutated() {
    let locks = lock_service();
    let store = Arc::new(MemoryRecordStore::<Counter>::new());
    let mut fresh = Counter::new("c", 7, 150);
    fresh.label = "fresh".to_string();
    store.insert(fresh);
    let writer = InterlockedWriter::new(locks, store.clone(), fast_config());

    let mut stale = Counter::new("c", 1, 100);
    stale.label = "stale".to_string();
    let seen = writer
        .put_item_tracked_interlocked_with(
            stale,
            |mut c| {
                c.count += 1;
                c
            },
            None,
        )
        .await
        .unwrap();

    assert_eq!(seen.label, "fresh");
    assert_eq!(seen.count, 8);
    assert_eq!(seen.modified_at, NOW);
}

#[tokio::test]
async fn caller_copy_wins_when_newer_or_tied() {
    let locks = lock_service();
    let store = Arc::new(MemoryRecordStore::<Counter>::new());
    let writer = InterlockedWriter::new(locks, store.clone(), fast_config());

    let mut stored = Counter::new("c", 0, 100);
    stored.label = "stored".to_string();
    store.insert(stored);

    let mut newer = Counter::new("c", 0, 150);
    newer.label = "caller".to_string();
    let result = writer
        .put_item_tracked_interlocked(newer, |_| {}, None)
        .await
        .unwrap();
    assert_eq!(result.label, "caller");

    // the stored copy is now stamped NOW; a caller copy with the same stamp wins the tie
    let mut tied = Counter::new("c", 0, NOW);
    tied.label = "tied".to_string();
    let result = writer
        .put_item_tracked_interlocked(tied, |_| {}, None)
        .await
        .unwrap();
    assert_eq!(result.label, "tied");
}

#[tokio::test]
async fn held_lock_times_out_near_the_deadline() {
    let locks = lock_service();
    let _held = locks
        .try_acquire("counters|c", "Counter", 3_600)
        .await
        .unwrap()
        .expect("uncontended");
    let writer = InterlockedWriter::new(locks, Arc::new(MemoryRecordStore::<Counter>::new()), InterlockConfig::default());

    let started = Instant::now();
    let err = writer
        .put_item_tracked_interlocked(Counter::new("c", 0, 0), |c| c.count += 1, Some(Duration::from_secs(1)))
        .await
        .expect_err("lock is held");
    let elapsed = started.elapsed();

    match err {
        LockError::Timeout { key, category, waited } => {
            assert_eq!(key, "lock:Counter|counters|c");
            assert_eq!(category, "Counter");
            assert!(waited >= Duration::from_secs(1));
        }
        other => panic!("expected timeout, got {other}"),
    }
    assert!(elapsed >= Duration::from_secs(1), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "returned late: {elapsed:?}");
}

#[tokio::test]
async fn unreachable_lock_store_is_contention_until_deadline() {
    let clock = Arc::new(ManualClock::at_epoch_seconds(NOW));
    let locks = Arc::new(LockService::new(Arc::new(OfflineStore), clock));
    let writer = InterlockedWriter::new(locks, Arc::new(MemoryRecordStore::<Counter>::new()), fast_config());

    let err = writer
        .put_item_tracked_interlocked(Counter::new("c", 0, 0), |_| {}, Some(Duration::from_millis(200)))
        .await
        .expect_err("store offline");
    assert!(matches!(err, LockError::Timeout { .. }));
}

#[tokio::test]
async fn record_store_failure_propagates_and_releases() {
    let locks = lock_service();
    let writer = InterlockedWriter::new(locks.clone(), Arc::new(BrokenRecordStore), fast_config());

    let err = writer
        .put_item_tracked_interlocked(Counter::new("c", 0, 0), |_| {}, None)
        .await
        .expect_err("write rejected");
    assert!(matches!(err, LockError::Store(StoreError::Backend(_))));
    assert!(locks.current("counters|c", "Counter").await.unwrap().is_none());
}

#[tokio::test]
async fn deferred_write_publishes_change() {
    let (sink, mut notifications) = ChannelSink::new();
    let writer = InterlockedWriter::new(lock_service(), Arc::new(MemoryRecordStore::<Counter>::new()), fast_config())
        .with_notification_sink(Arc::new(sink));

    let stored = writer
        .put_item_tracked_interlocked_and_defer(Counter::new("c", 0, 0), |c| c.count = 3, None)
        .await
        .unwrap();

    assert_eq!(stored.count, 3);
    assert_eq!(
        notifications.recv().await,
        Some(ChangeNotification {
            category: "Counter".to_string(),
            key: "counters|c".to_string(),
            modified_at: NOW,
        })
    );
}

#[tokio::test]
async fn notification_failure_is_not_an_error() {
    let store = Arc::new(MemoryRecordStore::<Counter>::new());
    let writer = InterlockedWriter::new(lock_service(), store.clone(), fast_config())
        .with_notification_sink(Arc::new(RejectingSink));

    let stored = writer
        .put_item_tracked_interlocked_and_defer(Counter::new("c", 0, 0), |c| c.count = 9, None)
        .await
        .unwrap();
    assert_eq!(stored.count, 9);
    assert_eq!(store.writes(), 1);
}
