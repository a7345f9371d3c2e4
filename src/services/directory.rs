//! User directory
//!
//! The directory is the source of truth for who a user is and which
//! authorities they currently hold. Storage is external to the gateway; it
//! is reached through the [`UserDirectory`] trait. An in-memory
//! implementation seeded from a JSON file covers development and tests.

use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;

use crate::middleware::auth::Principal;

/// User directory errors
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("User directory unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to load users from {path}: {message}")]
    Load { path: String, message: String },
}

/// A user as stored in the directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    /// bcrypt hash of the user's password
    pub password_hash: String,
    pub authorities: Vec<String>,
}

impl UserRecord {
    pub fn new<I, A>(username: impl Into<String>, password_hash: impl Into<String>, authorities: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            username: username.into(),
            password_hash: password_hash.into(),
            authorities: authorities.into_iter().map(Into::into).collect(),
        }
    }

    /// Principal for this user with its current authorities
    pub fn principal(&self) -> Principal {
        Principal::new(self.username.clone(), self.authorities.iter().cloned())
    }
}

/// Lookup of users by username
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, DirectoryError>;
}

// ============================================================================
// In-memory directory
// ============================================================================

/// Directory held in process memory
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = UserRecord>) -> Self {
        let users = records
            .into_iter()
            .map(|record| (record.username.clone(), record))
            .collect();
        Self {
            users: RwLock::new(users),
        }
    }

    /// Load a JSON array of [`UserRecord`]s
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        let path = path.as_ref();
        let load_error = |message: String| DirectoryError::Load {
            path: path.display().to_string(),
            message,
        };

        let raw = std::fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
        let records: Vec<UserRecord> =
            serde_json::from_str(&raw).map_err(|e| load_error(e.to_string()))?;

        tracing::info!(path = %path.display(), users = records.len(), "Loaded user directory");
        Ok(Self::from_records(records))
    }

    /// Insert or replace a user
    pub fn upsert(&self, record: UserRecord) {
        self.users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.username.clone(), record);
    }

    pub fn remove(&self, username: &str) -> Option<UserRecord> {
        self.users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(username)
    }

    pub fn len(&self) -> usize {
        self.users.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, DirectoryError> {
        Ok(self
            .users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(username)
            .cloned())
    }
}

// ============================================================================
// Authority resolver
// ============================================================================

/// Re-derives a subject's current authorities for each request
///
/// With a TTL configured, successful lookups are reused for at most that
/// long; a role change or removal is therefore visible within one TTL.
/// Misses are never cached.
#[derive(Clone)]
pub struct AuthorityResolver {
    directory: Arc<dyn UserDirectory>,
    cache: Option<Cache<String, Principal>>,
}

impl AuthorityResolver {
    pub fn new(directory: Arc<dyn UserDirectory>, cache_ttl: Option<Duration>) -> Self {
        let cache = cache_ttl
            .filter(|ttl| !ttl.is_zero())
            .map(|ttl| Cache::builder().max_capacity(10_000).time_to_live(ttl).build());

        Self { directory, cache }
    }

    /// Current principal for `subject`, or `None` if the user is unknown
    pub async fn resolve(&self, subject: &str) -> Result<Option<Principal>, DirectoryError> {
        if let Some(cache) = &self.cache {
            if let Some(principal) = cache.get(subject).await {
                return Ok(Some(principal));
            }
        }

        let principal = self
            .directory
            .find_by_username(subject)
            .await?
            .map(|record| record.principal());

        if let (Some(cache), Some(principal)) = (&self.cache, &principal) {
            cache.insert(subject.to_string(), principal.clone()).await;
        }

        Ok(principal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn directory() -> Arc<InMemoryUserDirectory> {
        Arc::new(InMemoryUserDirectory::from_records([
            UserRecord::new("alice", "hash-a", ["ADMIN"]),
            UserRecord::new("bob", "hash-b", ["USER", "USER"]),
        ]))
    }

    #[tokio::test]
    async fn test_find_by_username() {
        let dir = directory();
        let alice = dir.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(alice.authorities, vec!["ADMIN"]);
        assert!(dir.find_by_username("mallory").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolver_without_cache_sees_changes_immediately() {
        let dir = directory();
        let resolver = AuthorityResolver::new(dir.clone(), None);

        let bob = resolver.resolve("bob").await.unwrap().unwrap();
        assert_eq!(bob.authorities, vec!["USER"]);

        dir.upsert(UserRecord::new("bob", "hash-b", ["ADMIN"]));
        let bob = resolver.resolve("bob").await.unwrap().unwrap();
        assert_eq!(bob.authorities, vec!["ADMIN"]);

        dir.remove("bob");
        assert!(resolver.resolve("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolver_cache_holds_within_ttl() {
        let dir = directory();
        let resolver = AuthorityResolver::new(dir.clone(), Some(Duration::from_secs(300)));

        resolver.resolve("alice").await.unwrap();
        dir.upsert(UserRecord::new("alice", "hash-a", ["USER"]));

        let alice = resolver.resolve("alice").await.unwrap().unwrap();
        assert_eq!(alice.authorities, vec!["ADMIN"]);
    }

    #[tokio::test]
    async fn test_resolver_does_not_cache_misses() {
        let dir = directory();
        let resolver = AuthorityResolver::new(dir.clone(), Some(Duration::from_secs(300)));

        assert!(resolver.resolve("carol").await.unwrap().is_none());
        dir.upsert(UserRecord::new("carol", "hash-c", ["USER"]));
        assert!(resolver.resolve("carol").await.unwrap().is_some());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"username":"alice","password_hash":"x","authorities":["ADMIN"]}}]"#
        )
        .unwrap();

        let dir = InMemoryUserDirectory::load_from_file(file.path()).unwrap();
        assert_eq!(dir.len(), 1);
        assert!(!dir.is_empty());
        assert!(InMemoryUserDirectory::new().is_empty());
    }

    #[test]
    fn test_load_from_bad_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = InMemoryUserDirectory::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, DirectoryError::Load { .. }));
    }
}
