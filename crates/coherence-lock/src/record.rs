//! Versioned records and the store that persists them

use crate::error::StoreResult;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

/// Primary key of a record: a hash key and an optional range key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub hash: String,
    pub range: Option<String>,
}

impl RecordKey {
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            range: None,
        }
    }

    pub fn with_range(hash: impl Into<String>, range: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            range: Some(range.into()),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.range {
            Some(range) => write!(f, "{}|{range}", self.hash),
            None => f.write_str(&self.hash),
        }
    }
}

/// A record whose freshness is tracked by a modification timestamp
pub trait VersionedRecord: Clone + Send + Sync + 'static {
    fn record_key(&self) -> RecordKey;

    /// Version marker, epoch seconds
    fn modified_at(&self) -> i64;

    /// Refresh tracked timestamps before the record is persisted
    fn touch(&mut self, now_epoch_seconds: i64);

    /// Lock namespace for records of this type
    fn lock_category() -> String {
        short_type_name::<Self>()
    }
}

/// `a::b::Order<x::Y>` becomes `Order`
fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
        .to_string()
}

/// Persistence for versioned records
#[async_trait]
pub trait RecordStore<R: VersionedRecord>: Send + Sync {
    async fn get_item(&self, key: &RecordKey) -> StoreResult<Option<R>>;

    /// Persist `item` and return what was stored
    async fn put_item(&self, item: &R) -> StoreResult<R>;

    /// Missing keys are skipped.
    async fn get_items(&self, keys: &[RecordKey]) -> StoreResult<Vec<R>> {
        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(item) = self.get_item(key).await? {
                items.push(item);
            }
        }
        Ok(items)
    }

    async fn put_items(&self, items: &[R]) -> StoreResult<Vec<R>> {
        let mut stored = Vec::with_capacity(items.len());
        for item in items {
            stored.push(self.put_item(item).await?);
        }
        Ok(stored)
    }
}

/// In-memory [`RecordStore`]
#[derive(Debug)]
pub struct MemoryRecordStore<R> {
    records: DashMap<RecordKey, R>,
    writes: AtomicU64,
}

impl<R> Default for MemoryRecordStore<R> {
    fn default() -> Self {
        Self {
            records: DashMap::new(),
            writes: AtomicU64::new(0),
        }
    }
}

impl<R: VersionedRecord> MemoryRecordStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly, bypassing write accounting
    pub fn insert(&self, item: R) {
        self.records.insert(item.record_key(), item);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of `put_item` calls served
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<R: VersionedRecord> RecordStore<R> for MemoryRecordStore<R> {
    async fn get_item(&self, key: &RecordKey) -> StoreResult<Option<R>> {
        Ok(self.records.get(key).map(|item| item.value().clone()))
    }

    async fn put_item(&self, item: &R) -> StoreResult<R> {
        self.records.insert(item.record_key(), item.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(item.clone())
    }
}
