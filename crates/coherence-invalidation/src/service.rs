//! Served-at / invalidated-at markers for cached GET responses
//!
//! When a node serves a cacheable GET response it records *served-at* under
//! `{resource_class}:served:{segment}|{session}`. When a node writes data that
//! makes such responses stale it records *invalidated-at* under
//! `{resource_class}:invalidated:{segment}|{session}`, stamped one second in
//! the future so it beats every response served up to now. A cached response
//! is trusted only while its served-at is strictly later than the
//! invalidated-at, so no broadcast channel is needed between nodes.
//!
//! Markers are advisory. Write failures are logged and swallowed; a marker
//! that cannot be read is treated as invalidating.

use crate::{
    config::InvalidationConfig,
    resolver::{ResolveError, SessionResolver},
};
use bytes::Bytes;
use coherence_cache::{CacheError, CacheResult, CacheStore, Clock, Expiry};
use std::sync::Arc;
use tracing::{debug, warn};

/// Lower-cased first non-empty path segment of `url`
///
/// Scheme, host, query and fragment are ignored. A URL with no path segment
/// maps to the empty string.
pub fn resource_segment(url: &str) -> String {
    let url = url.split(['#', '?']).next().unwrap_or_default();
    let path = match url.find("://") {
        Some(scheme_end) => {
            let after_scheme = &url[scheme_end + 3..];
            after_scheme.find('/').map_or("", |slash| &after_scheme[slash..])
        }
        None => url,
    };

    path.split('/')
        .find(|segment| !segment.is_empty())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

pub fn served_key(resource_class: &str, segment: &str, session: &str) -> String {
    format!("{resource_class}:served:{segment}|{session}")
}

pub fn invalidated_key(resource_class: &str, segment: &str, session: &str) -> String {
    format!("{resource_class}:invalidated:{segment}|{session}")
}

/// Writes and checks invalidation markers in the shared store
pub struct InvalidationService {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    resolver: Arc<dyn SessionResolver>,
    config: InvalidationConfig,
}

impl std::fmt::Debug for InvalidationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl InvalidationService {
    /// `store` must be the shared store; markers in a local tier are useless.
    pub fn new(
        store: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        resolver: Arc<dyn SessionResolver>,
        config: InvalidationConfig,
    ) -> CacheResult<Self> {
        config
            .validate()
            .map_err(CacheError::InvalidConfiguration)?;
        Ok(Self {
            store,
            clock,
            resolver,
            config,
        })
    }

    /// True when a response served at `served_at` is newer than the last
    /// invalidation. A missing or zero invalidation means never invalidated.
    pub fn is_still_valid(served_at: i64, invalidated_at: Option<i64>) -> bool {
        match invalidated_at {
            None | Some(0) => true,
            Some(invalidated_at) => served_at > invalidated_at,
        }
    }

    async fn write_marker(&self, key: &str, stamp: i64) -> bool {
        let value = Bytes::from(stamp.to_string());
        match self
            .store
            .set(key, value, Expiry::Ttl(self.config.marker_ttl))
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                warn!(key, error = %e, "failed to write invalidation marker");
                false
            }
        }
    }

    /// Record that a response for `url` was served to `session` now.
    /// Returns the served-at timestamp to keep alongside the cached response.
    pub async fn mark_get_response_served(
        &self,
        resource_class: &str,
        session: &str,
        url: &str,
    ) -> i64 {
        let now = self.clock.epoch_seconds();
        let key = served_key(resource_class, &resource_segment(url), session);
        self.write_marker(&key, now).await;
        now
    }

    /// Last served-at marker for `url` and `session`, if any
    pub async fn served_at(
        &self,
        resource_class: &str,
        session: &str,
        url: &str,
    ) -> CacheResult<Option<i64>> {
        self.read_marker(&served_key(resource_class, &resource_segment(url), session))
            .await
    }

    /// Invalidated-at marker for `url` and `session`, if any
    pub async fn invalidated_at(
        &self,
        resource_class: &str,
        session: &str,
        url: &str,
    ) -> CacheResult<Option<i64>> {
        self.read_marker(&invalidated_key(resource_class, &resource_segment(url), session))
            .await
    }

    async fn read_marker(&self, key: &str) -> CacheResult<Option<i64>> {
        match self.store.get(key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| CacheError::deserialization(key, &e)),
            None => Ok(None),
        }
    }

    /// Invalidate every distinct resource touched by `urls` for `session`.
    /// Returns the number of markers written; an empty list is a no-op.
    pub async fn invalidate<S: AsRef<str>>(
        &self,
        resource_class: &str,
        session: &str,
        urls: &[S],
    ) -> usize {
        if urls.is_empty() {
            return 0;
        }

        let stamp = self.clock.epoch_seconds() + 1;
        let mut segments: Vec<String> = Vec::with_capacity(urls.len());
        for url in urls {
            let segment = resource_segment(url.as_ref());
            if !segments.contains(&segment) {
                segments.push(segment);
            }
        }

        let mut written = 0;
        for segment in &segments {
            let key = invalidated_key(resource_class, segment, session);
            if self.write_marker(&key, stamp).await {
                written += 1;
            }
        }
        debug!(resource_class, session, written, stamp, "invalidated cached responses");
        written
    }

    /// Check a cached response before trusting it. An unreadable marker
    /// makes the response invalid.
    pub async fn is_cached_get_still_valid(
        &self,
        resource_class: &str,
        session: &str,
        url: &str,
        cached_served_at: i64,
    ) -> bool {
        match self.invalidated_at(resource_class, session, url).await {
            Ok(invalidated_at) => Self::is_still_valid(cached_served_at, invalidated_at),
            Err(e) => {
                warn!(resource_class, session, url, error = %e, "could not read invalidation marker");
                false
            }
        }
    }

    /// Invalidate `urls` for every session of a workspace
    pub async fn invalidate_for_workspace<S: AsRef<str> + Sync>(
        &self,
        resource_class: &str,
        workspace_id: &str,
        urls: &[S],
    ) -> usize {
        if urls.is_empty() {
            return 0;
        }
        let sessions = self.resolver.sessions_for_workspace(workspace_id).await;
        self.invalidate_sessions(resource_class, "workspace", workspace_id, sessions, urls)
            .await
    }

    /// Invalidate `urls` for every session linked to a publisher account
    pub async fn invalidate_for_publisher_account<S: AsRef<str> + Sync>(
        &self,
        resource_class: &str,
        account_id: &str,
        urls: &[S],
    ) -> usize {
        if urls.is_empty() {
            return 0;
        }
        let sessions = self
            .resolver
            .sessions_for_publisher_account(account_id)
            .await;
        self.invalidate_sessions(resource_class, "publisher account", account_id, sessions, urls)
            .await
    }

    async fn invalidate_sessions<S: AsRef<str> + Sync>(
        &self,
        resource_class: &str,
        scope: &str,
        scope_id: &str,
        sessions: Result<Option<Vec<String>>, ResolveError>,
        urls: &[S],
    ) -> usize {
        let sessions = match sessions {
            Ok(Some(sessions)) => sessions,
            Ok(None) => {
                debug!(scope, scope_id, "nothing to invalidate, scope not found");
                return 0;
            }
            Err(e) => {
                warn!(scope, scope_id, error = %e, "could not resolve sessions to invalidate");
                return 0;
            }
        };

        let mut written = 0;
        for session in &sessions {
            written += self.invalidate(resource_class, session, urls).await;
        }
        written
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::resolver::StaticSessionResolver;
    use coherence_cache::{ManualClock, MemoryStore, MemoryStoreConfig};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_resource_segment() {
        let cases = [
            ("https://api.example.com/Deals/17?expand=all", "deals"),
            ("/workspaces/9/members", "workspaces"),
            ("workspaces", "workspaces"),
            ("//Reports//2024", "reports"),
            ("https://api.example.com", ""),
            ("https://api.example.com/?q=1", ""),
            ("/#fragment", ""),
            ("/Users#top", "users"),
            ("", ""),
        ];
        for (url, expected) in cases {
            assert_eq!(resource_segment(url), expected, "url: {url}");
        }
    }

    #[test]
    fn test_marker_keys() {
        assert_eq!(served_key("api", "deals", "s1"), "api:served:deals|s1");
        assert_eq!(invalidated_key("api", "deals", "s1"), "api:invalidated:deals|s1");
    }

    #[test]
    fn test_is_still_valid() {
        assert!(InvalidationService::is_still_valid(100, None));
        assert!(InvalidationService::is_still_valid(100, Some(0)));
        assert!(!InvalidationService::is_still_valid(100, Some(101)));
        assert!(!InvalidationService::is_still_valid(101, Some(101)));
        assert!(InvalidationService::is_still_valid(102, Some(101)));
    }

    #[tokio::test]
    async fn test_markers_carry_ttl() {
        let clock = Arc::new(ManualClock::at_epoch_seconds(100));
        let store = Arc::new(MemoryStore::new(MemoryStoreConfig::default(), clock.clone()).unwrap());
        let service = InvalidationService::new(
            store.clone(),
            clock.clone(),
            Arc::new(StaticSessionResolver::new()),
            InvalidationConfig::default(),
        )
        .unwrap();

        service.invalidate("api", "s1", &["/deals"]).await;
        assert_eq!(
            store.ttl("api:invalidated:deals|s1").await.unwrap(),
            Some(Some(std::time::Duration::from_secs(36_000)))
        );
        assert_eq!(store.get("api:invalidated:deals|s1").await.unwrap(), Some(Bytes::from("101")));
    }

    proptest! {
        #[test]
        fn validity_is_strict_ordering(served in 1_i64..1_000_000, invalidated in 1_i64..1_000_000) {
            prop_assert_eq!(
                InvalidationService::is_still_valid(served, Some(invalidated)),
                served > invalidated
            );
        }

        #[test]
        fn segment_ignores_host_query_and_case(
            segment in "[A-Za-z0-9_-]{1,12}",
            rest in "(/[a-z0-9]{1,6}){0,3}",
            query in "[a-z0-9=&]{0,10}",
        ) {
            let url = format!("https://Host.Example.com/{segment}{rest}?{query}");
            prop_assert_eq!(resource_segment(&url), segment.to_ascii_lowercase());
        }
    }
}
