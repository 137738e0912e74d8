//! Cross-node invalidation scenarios over a shared store

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use async_trait::async_trait;
use bytes::Bytes;
use coherence_cache::{
    CacheError, CacheResult, CacheStore, Expiry, ManualClock, MemoryStore, MemoryStoreConfig,
    StoredValue,
};
use coherence_invalidation::{
    InvalidationConfig, InvalidationService, ResolveError, SessionResolver, StaticSessionResolver,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

struct Nodes {
    a: InvalidationService,
    b: InvalidationService,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
}

fn nodes(resolver: Arc<dyn SessionResolver>) -> Nodes {
    let clock = Arc::new(ManualClock::at_epoch_seconds(100));
    let store = Arc::new(MemoryStore::new(MemoryStoreConfig::default(), clock.clone()).unwrap());
    let node = || {
        InvalidationService::new(
            store.clone(),
            clock.clone(),
            resolver.clone(),
            InvalidationConfig::default(),
        )
        .unwrap()
    };
    Nodes {
        a: node(),
        b: node(),
        store,
        clock,
    }
}

#[derive(Debug, Default)]
struct FailingResolver;

#[async_trait]
impl SessionResolver for FailingResolver {
    async fn sessions_for_workspace(&self, _id: &str) -> Result<Option<Vec<String>>, ResolveError> {
        Err(ResolveError::Backend("directory offline".to_string()))
    }

    async fn sessions_for_publisher_account(
        &self,
        _id: &str,
    ) -> Result<Option<Vec<String>>, ResolveError> {
        Err(ResolveError::Backend("directory offline".to_string()))
    }
}

/// Store whose reads always fail
#[derive(Debug, Default)]
struct UnreadableStore;

#[async_trait]
impl CacheStore for UnreadableStore {
    async fn get_with_expiry(&self, _key: &str) -> CacheResult<Option<StoredValue>> {
        Err(CacheError::Backend("timeout".to_string()))
    }

    async fn set(&self, _key: &str, _value: Bytes, _expiry: Expiry) -> CacheResult<bool> {
        Err(CacheError::Backend("timeout".to_string()))
    }

    async fn add(&self, _key: &str, _value: Bytes, _expiry: Expiry) -> CacheResult<bool> {
        Err(CacheError::Backend("timeout".to_string()))
    }

    async fn replace(&self, _key: &str, _value: Bytes, _expiry: Expiry) -> CacheResult<bool> {
        Err(CacheError::Backend("timeout".to_string()))
    }

    async fn remove(&self, _key: &str) -> CacheResult<bool> {
        Err(CacheError::Backend("timeout".to_string()))
    }

    async fn apply_delta(&self, _key: &str, _delta: i64, _expiry: Expiry) -> CacheResult<i64> {
        Err(CacheError::Backend("timeout".to_string()))
    }

    async fn clear(&self) -> CacheResult<()> {
        Err(CacheError::Backend("timeout".to_string()))
    }

    async fn len(&self) -> CacheResult<usize> {
        Err(CacheError::Backend("timeout".to_string()))
    }
}

#[tokio::test]
async fn invalidation_on_one_node_is_seen_by_another() {
    let n = nodes(Arc::new(StaticSessionResolver::new()));

    // served at 100 on node A
    let served = n.a.mark_get_response_served("api", "s1", "/deals/17").await;
    assert_eq!(served, 100);
    assert_eq!(n.b.served_at("api", "s1", "/deals").await.unwrap(), Some(100));

    // node B invalidates at 100, stamping 101
    assert_eq!(n.b.invalidate("api", "s1", &["https://x.io/deals/17"]).await, 1);
    assert_eq!(n.a.invalidated_at("api", "s1", "/deals").await.unwrap(), Some(101));
    assert!(!n.a.is_cached_get_still_valid("api", "s1", "/deals/17", served).await);

    // re-served at 102 is valid again
    n.clock.set_epoch_seconds(102);
    let reserved = n.a.mark_get_response_served("api", "s1", "/deals/17").await;
    assert_eq!(reserved, 102);
    assert!(n.a.is_cached_get_still_valid("api", "s1", "/deals/17", reserved).await);
}

#[tokio::test]
async fn other_sessions_and_resources_are_untouched() {
    let n = nodes(Arc::new(StaticSessionResolver::new()));
    let served = n.a.mark_get_response_served("api", "s1", "/deals").await;
    n.a.invalidate("api", "s2", &["/deals"]).await;
    n.a.invalidate("api", "s1", &["/contacts"]).await;
    n.a.invalidate("web", "s1", &["/deals"]).await;

    assert!(n.b.is_cached_get_still_valid("api", "s1", "/deals", served).await);
}

#[tokio::test]
async fn duplicate_segments_write_one_marker() {
    let n = nodes(Arc::new(StaticSessionResolver::new()));
    let written = n
        .a
        .invalidate("api", "s1", &["/deals/1", "/Deals/2?x=1", "/contacts"])
        .await;
    assert_eq!(written, 2);
    assert_eq!(n.store.len().await.unwrap(), 2);
}

#[tokio::test]
async fn empty_url_list_is_a_no_op() {
    let n = nodes(Arc::new(FailingResolver));
    let none: [&str; 0] = [];
    assert_eq!(n.a.invalidate("api", "s1", &none).await, 0);
    assert_eq!(n.a.invalidate_for_workspace("api", "ws", &none).await, 0);
    assert_eq!(n.a.invalidate_for_publisher_account("api", "acct", &none).await, 0);
    assert!(n.store.is_empty().await.unwrap());
}

#[tokio::test]
async fn workspace_fan_out_invalidates_each_member() {
    let resolver = StaticSessionResolver::new()
        .with_workspace("ws-1", ["alice", "bob"])
        .with_publisher_account("acct-1", ["ws-1", "ws-2"]);
    let n = nodes(Arc::new(resolver));

    let alice = n.a.mark_get_response_served("api", "alice", "/deals").await;
    let carol = n.a.mark_get_response_served("api", "carol", "/deals").await;

    assert_eq!(n.b.invalidate_for_workspace("api", "ws-1", &["/deals"]).await, 2);
    assert!(!n.a.is_cached_get_still_valid("api", "alice", "/deals", alice).await);
    assert!(n.a.is_cached_get_still_valid("api", "carol", "/deals", carol).await);

    let ws2 = n.a.mark_get_response_served("api", "ws-2", "/reports").await;
    assert_eq!(
        n.b.invalidate_for_publisher_account("api", "acct-1", &["/reports"]).await,
        2
    );
    assert!(!n.a.is_cached_get_still_valid("api", "ws-2", "/reports", ws2).await);

    // unknown scopes are skipped silently
    assert_eq!(n.b.invalidate_for_workspace("api", "ws-404", &["/deals"]).await, 0);
}

#[tokio::test]
async fn resolver_errors_are_skipped() {
    let n = nodes(Arc::new(FailingResolver));
    assert_eq!(n.a.invalidate_for_workspace("api", "ws-1", &["/deals"]).await, 0);
    assert_eq!(
        n.a.invalidate_for_publisher_account("api", "acct-1", &["/deals"]).await,
        0
    );
}

#[tokio::test]
async fn unreadable_marker_means_invalid_and_writes_are_swallowed() {
    let clock = Arc::new(ManualClock::at_epoch_seconds(500));
    let service = InvalidationService::new(
        Arc::new(UnreadableStore),
        clock,
        Arc::new(StaticSessionResolver::new()),
        InvalidationConfig::default(),
    )
    .unwrap();

    assert_eq!(service.mark_get_response_served("api", "s1", "/deals").await, 500);
    assert_eq!(service.invalidate("api", "s1", &["/deals"]).await, 0);
    assert!(!service.is_cached_get_still_valid("api", "s1", "/deals", 500).await);
}
