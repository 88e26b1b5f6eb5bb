//! Deduplication Ledger
//!
//! Remembers which transactions already produced a notification. A run first
//! claims the id (an atomic check-and-set), then either commits it with
//! [`DedupLedger::mark_notified`] after the webhook succeeded or gives it back
//! with [`DedupLedger::release`].
//!
//! Backends: in-memory, a JSON file rewritten on every commit, and redis.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Default location of the persisted cache document
pub const DEFAULT_CACHE_PATH: &str = "cache.json";

/// Default redis key holding the set of notified ids
pub const DEFAULT_REDIS_KEY: &str = "verto_relay:notified";

/// How long an in-flight claim survives in redis if the process dies mid-run
pub const CLAIM_TTL_SECS: u64 = 120;

/// Errors that can occur while reading or writing the ledger
#[derive(Error, Debug)]
pub enum DedupError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache document is malformed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Result of trying to claim an id for notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The caller now owns the id until it marks or releases it
    Acquired,
    /// A notification was already sent for this id
    AlreadyNotified,
    /// Another request is currently notifying this id
    InFlight,
}

/// Store of transaction ids that already triggered a notification
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DedupLedger: Send + Sync {
    async fn has_notified(&self, id: &str) -> Result<bool, DedupError>;

    /// Atomically check the id and reserve it for the caller
    async fn claim(&self, id: &str) -> Result<Claim, DedupError>;

    /// Record the id as notified; idempotent
    async fn mark_notified(&self, id: &str) -> Result<(), DedupError>;

    /// Drop a claim without recording the id
    async fn release(&self, id: &str) -> Result<(), DedupError>;
}

#[derive(Debug, Default)]
struct LedgerState {
    notified: HashSet<String>,
    in_flight: HashSet<String>,
}

impl LedgerState {
    fn claim(&mut self, id: &str) -> Claim {
        if self.notified.contains(id) {
            Claim::AlreadyNotified
        } else if !self.in_flight.insert(id.to_string()) {
            Claim::InFlight
        } else {
            Claim::Acquired
        }
    }

    /// Returns true when the id was not recorded before
    fn mark(&mut self, id: &str) -> bool {
        self.in_flight.remove(id);
        self.notified.insert(id.to_string())
    }
}

/// Ledger that lives for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded ids
    pub fn len(&self) -> usize {
        self.lock().notified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        // A poisoned lock only means a panic mid-update; the sets are still usable
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DedupLedger for MemoryLedger {
    async fn has_notified(&self, id: &str) -> Result<bool, DedupError> {
        Ok(self.lock().notified.contains(id))
    }

    async fn claim(&self, id: &str) -> Result<Claim, DedupError> {
        Ok(self.lock().claim(id))
    }

    async fn mark_notified(&self, id: &str) -> Result<(), DedupError> {
        self.lock().mark(id);
        Ok(())
    }

    async fn release(&self, id: &str) -> Result<(), DedupError> {
        self.lock().in_flight.remove(id);
        Ok(())
    }
}

/// On-disk cache document
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheDocument {
    pub transactions: Vec<String>,
}

/// Ledger persisted as a JSON document, rewritten in full on every new id
///
/// The document is written while the state lock is held, so concurrent commits
/// cannot overwrite each other.
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    state: tokio::sync::Mutex<LedgerState>,
}

impl FileLedger {
    /// Open the ledger, loading previously notified ids when the file exists
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DedupError> {
        let path = PathBuf::from(expand_path(&path.as_ref().to_string_lossy()));
        let notified = match tokio::fs::read_to_string(&path).await {
            Ok(contents) if contents.trim().is_empty() => HashSet::new(),
            Ok(contents) => {
                let doc: CacheDocument = serde_json::from_str(&contents)?;
                doc.transactions.into_iter().collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(e.into()),
        };
        info!("Loaded {} notified transactions from {}", notified.len(), path.display());

        Ok(Self {
            path,
            state: tokio::sync::Mutex::new(LedgerState {
                notified,
                in_flight: HashSet::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, notified: &HashSet<String>) -> Result<(), DedupError> {
        // sorted for stable diffs
        let doc = CacheDocument {
            transactions: notified.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect(),
        };
        let json = serde_json::to_string_pretty(&doc)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Persisted {} ids to {}", doc.transactions.len(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl DedupLedger for FileLedger {
    async fn has_notified(&self, id: &str) -> Result<bool, DedupError> {
        Ok(self.state.lock().await.notified.contains(id))
    }

    async fn claim(&self, id: &str) -> Result<Claim, DedupError> {
        Ok(self.state.lock().await.claim(id))
    }

    async fn mark_notified(&self, id: &str) -> Result<(), DedupError> {
        let mut state = self.state.lock().await;
        if state.mark(id) {
            if let Err(e) = self.persist(&state.notified).await {
                // not on disk, so not notified; keep it claimed for this process
                state.notified.remove(id);
                state.in_flight.insert(id.to_string());
                return Err(e);
            }
        }
        Ok(())
    }

    async fn release(&self, id: &str) -> Result<(), DedupError> {
        self.state.lock().await.in_flight.remove(id);
        Ok(())
    }
}

/// Membership test and claim key creation in one server-side step.
/// KEYS[1] notified set, KEYS[2] claim key, ARGV[1] id, ARGV[2] ttl.
/// Returns 0 when acquired, 1 when already notified, 2 when in flight.
const CLAIM_SCRIPT: &str = r#"
if redis.call('SISMEMBER', KEYS[1], ARGV[1]) == 1 then
    return 1
end
if redis.call('SET', KEYS[2], 1, 'NX', 'EX', ARGV[2]) then
    return 0
end
return 2
"#;

fn claim_outcome(code: i64) -> Claim {
    match code {
        0 => Claim::Acquired,
        1 => Claim::AlreadyNotified,
        _ => Claim::InFlight,
    }
}

/// Ledger shared through redis, usable by several relay instances
#[derive(Clone)]
pub struct RedisLedger {
    connection: MultiplexedConnection,
    key: String,
}

impl RedisLedger {
    /// Create a ledger on an established connection
    pub fn new(connection: MultiplexedConnection, key: impl Into<String>) -> Self {
        Self {
            connection,
            key: key.into(),
        }
    }

    /// Connect to redis and use the default key
    pub async fn connect(url: &str) -> Result<Self, DedupError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        info!("Connected to redis dedup ledger");
        Ok(Self::new(connection, DEFAULT_REDIS_KEY))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn claim_key(&self, id: &str) -> String {
        format!("{}:claim:{}", self.key, id)
    }
}

#[async_trait]
impl DedupLedger for RedisLedger {
    async fn has_notified(&self, id: &str) -> Result<bool, DedupError> {
        let mut conn = self.connection.clone();
        Ok(conn.sismember(&self.key, id).await?)
    }

    async fn claim(&self, id: &str) -> Result<Claim, DedupError> {
        let mut conn = self.connection.clone();
        let outcome: i64 = redis::Script::new(CLAIM_SCRIPT)
            .key(&self.key)
            .key(self.claim_key(id))
            .arg(id)
            .arg(CLAIM_TTL_SECS)
            .invoke_async(&mut conn)
            .await?;
        Ok(claim_outcome(outcome))
    }

    async fn mark_notified(&self, id: &str) -> Result<(), DedupError> {
        let mut conn = self.connection.clone();
        let _: i64 = conn.sadd(&self.key, id).await?;
        let _: i64 = conn.del(self.claim_key(id)).await?;
        Ok(())
    }

    async fn release(&self, id: &str) -> Result<(), DedupError> {
        let mut conn = self.connection.clone();
        let _: i64 = conn.del(self.claim_key(id)).await?;
        Ok(())
    }
}

/// Expand ~ to home directory in path
pub fn expand_path(path: &str) -> String {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}
