//! Connection pool management
//!
//! Owns pooled clients for arbitrary external MongoDB clusters, keyed by a
//! stable hash of the connection string. Handles are reference counted;
//! release never closes synchronously, a background sweep evicts entries
//! that sit at zero references past the idle timeout. Built as an
//! injectable component, not a global: the composition root constructs one
//! pool and passes it to every collaborator.

use crate::config::LensConfig;
use crate::error::{LensError, Result};
use bson::{doc, Document};
use dashmap::DashMap;
use futures::stream::TryStreamExt;
use mongodb::options::ClientOptions;
use mongodb::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Stable pool key for a connection string.
pub fn pool_key(connection_string: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(connection_string.as_bytes());
    format!("{:x}", hasher.finalize())
}

struct PoolEntry {
    client: Client,
    refs: AtomicUsize,
    /// Wall-clock of the moment the refcount last hit zero.
    last_released: Mutex<Instant>,
}

/// A live, shared handle to one pooled cluster connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    key: String,
    entry: Arc<PoolEntry>,
}

/// Result of probing a connection string, returned by
/// [`ConnectionPool::validate_connection`]. Never an `Err`: every failure
/// mode lands in `is_valid: false` plus `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionValidation {
    pub is_valid: bool,
    pub database_name: Option<String>,
    pub is_read_only: Option<bool>,
    pub error: Option<String>,
}

pub struct ConnectionPool {
    config: LensConfig,
    entries: DashMap<String, Arc<PoolEntry>>,
    /// Per-key creation locks so concurrent acquires for the same string
    /// cannot race to open duplicate clients. Unrelated keys never contend.
    creation_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl ConnectionPool {
    pub fn new(config: LensConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            creation_locks: DashMap::new(),
        }
    }

    /// Acquire a handle for `connection_string`, opening a client only if no
    /// pooled entry exists for its key. Increments the reference count.
    pub async fn acquire(&self, connection_string: &str) -> Result<ConnectionHandle> {
        let key = pool_key(connection_string);

        if let Some(entry) = self.entries.get(&key) {
            entry.refs.fetch_add(1, Ordering::SeqCst);
            debug!(key = %key, "reusing pooled connection");
            return Ok(ConnectionHandle {
                key,
                entry: entry.clone(),
            });
        }

        // Single-flight per key: serialize creation, then re-check, so two
        // concurrent first-acquires end up sharing one client.
        let lock = self
            .creation_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if let Some(entry) = self.entries.get(&key) {
            entry.refs.fetch_add(1, Ordering::SeqCst);
            let shared: Arc<PoolEntry> = entry.clone();
            drop(entry);
            self.creation_locks.remove(&key);
            return Ok(ConnectionHandle { key, entry: shared });
        }

        let client = self.connect(connection_string).await?;
        let entry = Arc::new(PoolEntry {
            client,
            refs: AtomicUsize::new(1),
            last_released: Mutex::new(Instant::now()),
        });
        self.entries.insert(key.clone(), entry.clone());
        // Creation is settled; the lock map must not grow one entry per
        // distinct connection string for the process lifetime. Late waiters
        // still holding the Arc re-check the pool and take the fast path.
        self.creation_locks.remove(&key);
        info!(key = %key, "opened new pooled connection");

        Ok(ConnectionHandle { key, entry })
    }

    /// Decrement the reference count for `connection_string`. The underlying
    /// client stays pooled; only the idle sweep closes it. A release with no
    /// matching acquire is a caller bug; it is logged and ignored so the
    /// count can never wrap and pin the entry in the pool forever.
    pub fn release(&self, connection_string: &str) {
        let key = pool_key(connection_string);
        let Some(entry) = self.entries.get(&key) else {
            warn!(key = %key, "release for unknown pool key");
            return;
        };

        let mut current = entry.refs.load(Ordering::SeqCst);
        loop {
            if current == 0 {
                warn!(key = %key, "unbalanced release ignored");
                return;
            }
            match entry.refs.compare_exchange(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    if current == 1 {
                        if let Ok(mut at) = entry.last_released.lock() {
                            *at = Instant::now();
                        }
                        debug!(key = %key, "connection idle at zero references");
                    }
                    return;
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// One pass of the idle sweep: drop every entry with zero references
    /// whose idle duration exceeds the configured timeout.
    pub fn sweep_once(&self) {
        let idle_timeout = self.config.idle_timeout();
        self.entries.retain(|key, entry| {
            if entry.refs.load(Ordering::SeqCst) > 0 {
                return true;
            }
            let idle = entry
                .last_released
                .lock()
                .map(|at| at.elapsed())
                .unwrap_or_default();
            if idle > idle_timeout {
                info!(key = %key, idle_secs = idle.as_secs(), "evicting idle connection");
                false
            } else {
                true
            }
        });
    }

    /// Spawn the periodic idle-sweep task. Runs until the pool is dropped by
    /// every holder or the task is aborted.
    pub fn start_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let pool = Arc::clone(self);
        let interval = pool.config.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                pool.sweep_once();
            }
        })
    }

    /// Force-close every pooled connection regardless of reference count.
    /// Used at process shutdown.
    pub fn close_all(&self) {
        let count = self.entries.len();
        self.entries.clear();
        self.creation_locks.clear();
        if count > 0 {
            info!(closed = count, "closed all pooled connections");
        }
    }

    pub fn pooled_count(&self) -> usize {
        self.entries.len()
    }

    /// Current reference count for a connection string, if pooled.
    pub fn reference_count(&self, connection_string: &str) -> Option<usize> {
        self.entries
            .get(&pool_key(connection_string))
            .map(|e| e.refs.load(Ordering::SeqCst))
    }

    async fn connect(&self, connection_string: &str) -> Result<Client> {
        let mut options = ClientOptions::parse(connection_string).await?;
        options.server_selection_timeout = Some(self.config.connect_timeout());
        options.connect_timeout = Some(self.config.connect_timeout());
        let client = Client::with_options(options)?;
        Ok(client)
    }

    /// Probe a connection string: connect, extract the target database name,
    /// ping, and detect read-only status by attempting a throwaway
    /// create-then-drop. All failures become `is_valid: false`.
    pub async fn validate_connection(&self, connection_string: &str) -> ConnectionValidation {
        let options = match ClientOptions::parse(connection_string).await {
            Ok(mut o) => {
                o.server_selection_timeout = Some(self.config.connect_timeout());
                o.connect_timeout = Some(self.config.connect_timeout());
                o
            }
            Err(e) => {
                return ConnectionValidation {
                    is_valid: false,
                    database_name: None,
                    is_read_only: None,
                    error: Some(format!("Invalid connection string: {}", e)),
                }
            }
        };

        let database_name = options
            .default_database
            .clone()
            .or_else(|| database_name_from_uri(connection_string));

        let client = match Client::with_options(options) {
            Ok(c) => c,
            Err(e) => {
                return ConnectionValidation {
                    is_valid: false,
                    database_name,
                    is_read_only: None,
                    error: Some(e.to_string()),
                }
            }
        };

        let db = client.database(database_name.as_deref().unwrap_or("admin"));
        if let Err(e) = db.run_command(doc! { "ping": 1 }).await {
            return ConnectionValidation {
                is_valid: false,
                database_name,
                is_read_only: None,
                error: Some(e.to_string()),
            };
        }

        // Write probe: a failed create-then-drop means the credentials are
        // read-only, which is fine for this engine.
        let probe = "_mongolens_write_probe";
        let is_read_only = match db.create_collection(probe).await {
            Ok(()) => {
                if let Err(e) = db.collection::<Document>(probe).drop().await {
                    warn!(error = %e, "failed to drop write-probe collection");
                }
                false
            }
            Err(_) => true,
        };

        ConnectionValidation {
            is_valid: true,
            database_name,
            is_read_only: Some(is_read_only),
            error: None,
        }
    }
}

/// Pull the database path segment out of a mongodb:// URI, if present.
pub fn database_name_from_uri(uri: &str) -> Option<String> {
    let after_scheme = uri.split("://").nth(1)?;
    let after_host = after_scheme.split('/').nth(1)?;
    let name = after_host.split('?').next()?.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

impl ConnectionHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn client(&self) -> &Client {
        &self.entry.client
    }

    /// Non-system collection names in `db`.
    pub async fn list_collections(&self, db: &str) -> Result<Vec<String>> {
        let names = self.client().database(db).list_collection_names().await?;
        Ok(names
            .into_iter()
            .filter(|n| !n.starts_with("system."))
            .collect())
    }

    /// Unordered random sample of up to `size` documents. May repeat
    /// documents across calls; that is inherent to `$sample`.
    pub async fn sample_collection(
        &self,
        db: &str,
        collection: &str,
        size: u32,
    ) -> Result<Vec<Document>> {
        let coll = self.client().database(db).collection::<Document>(collection);
        let cursor = coll
            .aggregate(vec![doc! { "$sample": { "size": size as i64 } }])
            .await?;
        Ok(cursor.try_collect().await?)
    }

    /// Exact (not estimated) document count.
    pub async fn exact_count(&self, db: &str, collection: &str) -> Result<u64> {
        self.count_with_filter(db, collection, doc! {}).await
    }

    /// Exact count of documents matching `filter`.
    pub async fn count_with_filter(
        &self,
        db: &str,
        collection: &str,
        filter: Document,
    ) -> Result<u64> {
        let coll = self.client().database(db).collection::<Document>(collection);
        Ok(coll.count_documents(filter).await?)
    }

    /// Raw index metadata for a collection.
    pub async fn list_indexes(&self, db: &str, collection: &str) -> Result<Vec<Document>> {
        let coll = self.client().database(db).collection::<Document>(collection);
        let cursor = coll.list_indexes().await?;
        let models: Vec<_> = cursor.try_collect().await?;
        models
            .into_iter()
            .map(|m| bson::to_document(&m).map_err(|e| LensError::Bson(e.to_string())))
            .collect()
    }

    /// Grouped value counts for one field, sorted descending, capped.
    pub async fn field_value_histogram(
        &self,
        db: &str,
        collection: &str,
        field: &str,
        limit: i64,
    ) -> Result<Vec<Document>> {
        let coll = self.client().database(db).collection::<Document>(collection);
        let pipeline = vec![
            doc! { "$group": { "_id": format!("${}", field), "count": { "$sum": 1 } } },
            doc! { "$sort": { "count": -1 } },
            doc! { "$limit": limit },
        ];
        let cursor = coll.aggregate(pipeline).await?;
        Ok(cursor.try_collect().await?)
    }

    pub async fn execute_find(
        &self,
        db: &str,
        collection: &str,
        filter: Document,
        projection: Option<Document>,
        limit: Option<i64>,
    ) -> Result<Vec<Document>> {
        let coll = self.client().database(db).collection::<Document>(collection);
        let mut find = coll.find(filter);
        if let Some(projection) = projection {
            find = find.projection(projection);
        }
        if let Some(limit) = limit {
            find = find.limit(limit);
        }
        let cursor = find.await?;
        Ok(cursor.try_collect().await?)
    }

    pub async fn execute_aggregate(
        &self,
        db: &str,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> Result<Vec<Document>> {
        let coll = self.client().database(db).collection::<Document>(collection);
        let cursor = coll.aggregate(pipeline).await?;
        Ok(cursor.try_collect().await?)
    }

    /// Database names visible in the cluster.
    pub async fn list_databases(&self) -> Result<Vec<String>> {
        Ok(self.client().list_database_names().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_URI: &str = "mongodb://127.0.0.1:27017/testdb";

    fn test_config() -> LensConfig {
        LensConfig {
            idle_timeout_secs: 0,
            ..LensConfig::default()
        }
    }

    #[test]
    fn pool_key_is_stable_and_distinct() {
        assert_eq!(pool_key("mongodb://a"), pool_key("mongodb://a"));
        assert_ne!(pool_key("mongodb://a"), pool_key("mongodb://b"));
    }

    #[test]
    fn database_name_parsed_from_uri() {
        assert_eq!(
            database_name_from_uri("mongodb://localhost:27017/shop?retryWrites=true"),
            Some("shop".to_string())
        );
        assert_eq!(database_name_from_uri("mongodb://localhost:27017"), None);
        assert_eq!(database_name_from_uri("mongodb://localhost:27017/"), None);
    }

    // Client construction in the driver is lazy, so pool bookkeeping is
    // testable without a live server.
    #[tokio::test]
    async fn acquire_twice_shares_one_entry() {
        let pool = ConnectionPool::new(test_config());
        let a = pool.acquire(TEST_URI).await.unwrap();
        let b = pool.acquire(TEST_URI).await.unwrap();
        assert!(Arc::ptr_eq(&a.entry, &b.entry));
        assert_eq!(pool.reference_count(TEST_URI), Some(2));
        assert_eq!(pool.pooled_count(), 1);
    }

    #[tokio::test]
    async fn release_to_zero_makes_entry_evictable() {
        let pool = ConnectionPool::new(test_config());
        let _h1 = pool.acquire(TEST_URI).await.unwrap();
        let _h2 = pool.acquire(TEST_URI).await.unwrap();
        pool.release(TEST_URI);
        assert_eq!(pool.reference_count(TEST_URI), Some(1));
        pool.sweep_once();
        assert_eq!(pool.pooled_count(), 1, "entry with references survives sweep");

        pool.release(TEST_URI);
        assert_eq!(pool.reference_count(TEST_URI), Some(0));
        // idle_timeout is zero in the test config; any idle duration exceeds it
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        pool.sweep_once();
        assert_eq!(pool.pooled_count(), 0);
    }

    #[tokio::test]
    async fn close_all_ignores_reference_counts() {
        let pool = ConnectionPool::new(test_config());
        let _h = pool.acquire(TEST_URI).await.unwrap();
        pool.acquire("mongodb://127.0.0.1:27018/other").await.unwrap();
        assert_eq!(pool.pooled_count(), 2);
        pool.close_all();
        assert_eq!(pool.pooled_count(), 0);
    }

    #[tokio::test]
    async fn unbalanced_release_does_not_wrap_the_count() {
        let pool = ConnectionPool::new(test_config());
        let _h = pool.acquire(TEST_URI).await.unwrap();
        pool.release(TEST_URI);
        pool.release(TEST_URI); // caller bug: one acquire, two releases
        assert_eq!(pool.reference_count(TEST_URI), Some(0));

        // the entry must still be sweepable, not pinned by a wrapped count
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        pool.sweep_once();
        assert_eq!(pool.pooled_count(), 0);
    }

    #[tokio::test]
    async fn creation_locks_are_dropped_after_creation() {
        let pool = ConnectionPool::new(test_config());
        let _a = pool.acquire(TEST_URI).await.unwrap();
        let _b = pool.acquire("mongodb://127.0.0.1:27018/other").await.unwrap();
        assert_eq!(pool.creation_locks.len(), 0);
        // the fast path never touches the lock map either
        let _c = pool.acquire(TEST_URI).await.unwrap();
        assert_eq!(pool.creation_locks.len(), 0);
    }

    #[tokio::test]
    async fn concurrent_acquires_do_not_duplicate_entries() {
        let pool = Arc::new(ConnectionPool::new(test_config()));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            tasks.push(tokio::spawn(async move {
                pool.acquire(TEST_URI).await.unwrap();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(pool.pooled_count(), 1);
        assert_eq!(pool.reference_count(TEST_URI), Some(8));
    }
}
