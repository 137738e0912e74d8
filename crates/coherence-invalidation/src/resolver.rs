//! Fan-out from workspaces and publisher accounts to session keys

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

/// A resolver backend failed
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Session resolver backend error: {0}")]
    Backend(String),
}

/// Resolves the session keys affected by a workspace or account change
///
/// `Ok(None)` means the workspace or account no longer exists.
#[async_trait]
pub trait SessionResolver: Send + Sync {
    /// Every session key belonging to the workspace
    async fn sessions_for_workspace(
        &self,
        workspace_id: &str,
    ) -> Result<Option<Vec<String>>, ResolveError>;

    /// Every session key linked to the publisher account
    async fn sessions_for_publisher_account(
        &self,
        account_id: &str,
    ) -> Result<Option<Vec<String>>, ResolveError>;
}

/// In-memory resolver populated up front
#[derive(Debug, Default)]
pub struct StaticSessionResolver {
    workspaces: DashMap<String, Vec<String>>,
    accounts: DashMap<String, Vec<String>>,
}

impl StaticSessionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the sessions of a workspace, replacing earlier ones
    pub fn with_workspace<I, S>(self, workspace_id: &str, sessions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.workspaces.insert(
            workspace_id.to_string(),
            sessions.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Register the workspaces an account is linked to. Each linked
    /// workspace id is itself a session key for account-scoped caches.
    pub fn with_publisher_account<I, S>(self, account_id: &str, workspace_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.accounts.insert(
            account_id.to_string(),
            workspace_ids.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn remove_workspace(&self, workspace_id: &str) {
        self.workspaces.remove(workspace_id);
    }
}

fn deduplicated(keys: &[String]) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(keys.len());
    for key in keys {
        if !unique.contains(key) {
            unique.push(key.clone());
        }
    }
    unique
}

#[async_trait]
impl SessionResolver for StaticSessionResolver {
    async fn sessions_for_workspace(
        &self,
        workspace_id: &str,
    ) -> Result<Option<Vec<String>>, ResolveError> {
        Ok(self
            .workspaces
            .get(workspace_id)
            .map(|sessions| deduplicated(&sessions)))
    }

    async fn sessions_for_publisher_account(
        &self,
        account_id: &str,
    ) -> Result<Option<Vec<String>>, ResolveError> {
        Ok(self
            .accounts
            .get(account_id)
            .map(|workspaces| deduplicated(&workspaces)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_static_resolution() {
        let resolver = StaticSessionResolver::new()
            .with_workspace("ws-1", ["alice", "bob", "alice"])
            .with_publisher_account("acct-9", ["ws-1", "ws-2"]);

        assert_eq!(
            resolver.sessions_for_workspace("ws-1").await.unwrap(),
            Some(vec!["alice".to_string(), "bob".to_string()])
        );
        assert_eq!(resolver.sessions_for_workspace("ws-404").await.unwrap(), None);
        assert_eq!(
            resolver.sessions_for_publisher_account("acct-9").await.unwrap(),
            Some(vec!["ws-1".to_string(), "ws-2".to_string()])
        );

        resolver.remove_workspace("ws-1");
        assert_eq!(resolver.sessions_for_workspace("ws-1").await.unwrap(), None);
    }
}
