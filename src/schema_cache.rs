//! Schema caching
//!
//! Memoizes extracted snapshots under a time-based freshness policy so
//! request latency is decoupled from extraction cost. The backing store is
//! a collaborator that may be completely unavailable; every store failure
//! degrades to a cache miss rather than an error, so the system keeps
//! working (slower) without it. A fresh extraction also triggers detached
//! best-effort persistence to the durable project store; that write is an
//! intentional eventual-consistency gap and its failures are only logged.

use crate::error::{LensError, Result};
use crate::schema::SchemaSnapshot;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Pass-through memoization store (e.g. Redis in production). Values are
/// opaque serialized snapshots.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl_secs: u64) -> Result<()>;
}

/// Durable project storage, owned elsewhere. The cache only pushes to it.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn find_project_schema(&self, project_id: &str) -> Result<Option<SchemaSnapshot>>;
    async fn persist_schema(&self, project_id: &str, snapshot: &SchemaSnapshot) -> Result<()>;
}

/// In-process cache store backed by a concurrent map. The default backing
/// for single-node deployments and tests.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entries.get(key) {
            Some(entry) if entry.1 > Instant::now() => Ok(Some(entry.0.clone())),
            Some(_) => {
                self.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl_secs: u64) -> Result<()> {
        let expires = Instant::now() + Duration::from_secs(ttl_secs);
        self.entries.insert(key.to_string(), (value, expires));
        Ok(())
    }
}

/// True when there is no snapshot, or the one we have is older than `ttl`.
/// Pure; shared by the cache and by callers deciding whether to re-extract.
pub fn needs_refresh(snapshot: Option<&SchemaSnapshot>, ttl: Duration) -> bool {
    match snapshot {
        None => true,
        Some(s) => {
            let age = Utc::now().signed_duration_since(s.last_synced);
            match chrono::Duration::from_std(ttl) {
                Ok(ttl) => age > ttl,
                Err(_) => false,
            }
        }
    }
}

pub struct SchemaCache {
    store: Arc<dyn CacheStore>,
    project_store: Option<Arc<dyn ProjectStore>>,
    ttl: Duration,
}

impl SchemaCache {
    pub fn new(
        store: Arc<dyn CacheStore>,
        project_store: Option<Arc<dyn ProjectStore>>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            project_store,
            ttl,
        }
    }

    /// Cached snapshot for `project_key`, if present and fresh. Store
    /// failures are logged and reported as a miss.
    pub async fn get(&self, project_key: &str) -> Option<SchemaSnapshot> {
        let raw = match self.store.get(project_key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key = %project_key, error = %e, "cache store unavailable, treating as miss");
                return None;
            }
        };
        match serde_json::from_str::<SchemaSnapshot>(&raw) {
            Ok(snapshot) if !needs_refresh(Some(&snapshot), self.ttl) => Some(snapshot),
            Ok(_) => {
                debug!(key = %project_key, "cached snapshot is stale");
                None
            }
            Err(e) => {
                warn!(key = %project_key, error = %e, "cached snapshot failed to decode");
                None
            }
        }
    }

    /// Write a snapshot through the cache and kick off detached persistence
    /// to the project store. Neither failure mode reaches the caller; the
    /// in-memory copy stays authoritative for the session.
    pub async fn put(&self, project_key: &str, snapshot: &SchemaSnapshot) {
        match serde_json::to_string(snapshot) {
            Ok(raw) => {
                if let Err(e) = self.store.set(project_key, raw, self.ttl.as_secs()).await {
                    warn!(key = %project_key, error = %e, "cache write failed");
                }
            }
            Err(e) => warn!(key = %project_key, error = %e, "snapshot serialization failed"),
        }

        if let Some(projects) = &self.project_store {
            let projects = Arc::clone(projects);
            let project_key = project_key.to_string();
            let snapshot = snapshot.clone();
            tokio::spawn(async move {
                if let Err(e) = projects.persist_schema(&project_key, &snapshot).await {
                    warn!(key = %project_key, error = %e, "best-effort schema persistence failed");
                }
            });
        }
    }

    /// Return the cached snapshot or run `extract` and cache its result.
    /// Extraction failures propagate; cache failures never do.
    pub async fn get_or_extract<F, Fut>(
        &self,
        project_key: &str,
        extract: F,
    ) -> Result<SchemaSnapshot>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SchemaSnapshot>>,
    {
        if let Some(snapshot) = self.get(project_key).await {
            debug!(key = %project_key, "schema cache hit");
            return Ok(snapshot);
        }

        // A durable copy fresher than the TTL saves an extraction; a store
        // failure here is just another miss.
        if let Some(projects) = &self.project_store {
            match projects.find_project_schema(project_key).await {
                Ok(Some(snapshot)) if !needs_refresh(Some(&snapshot), self.ttl) => {
                    debug!(key = %project_key, "durable snapshot still fresh, re-caching");
                    self.put(project_key, &snapshot).await;
                    return Ok(snapshot);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(key = %project_key, error = %e, "project store lookup failed");
                }
            }
        }

        info!(key = %project_key, "schema cache miss, extracting");
        let snapshot = extract().await?;
        self.put(project_key, &snapshot).await;
        Ok(snapshot)
    }
}

/// Helper for collaborators that want a typed "store is down" error.
pub fn store_unavailable(detail: &str) -> LensError {
    LensError::Cache(format!("store unavailable: {}", detail))
}
