//! Session Client Cache
//!
//! Bounded map from `(AppId, Strategy)` to a shared [`SessionClient`].
//!
//! - Entries expire a fixed time after creation and after a shorter idle
//!   period since the last access, whichever comes first.
//! - At capacity, the least recently accessed entry is evicted.
//! - Concurrent first accesses for the same key share one construction.
//!
//! Eviction only drops the cache's reference. A request already holding the
//! client finishes normally.

use super::memory::ChatMemory;
use super::{SessionClient, MULTI_FILE_PROMPT, SINGLE_DOCUMENT_PROMPT};
use crate::artifacts::ArtifactWriter;
use crate::config::SessionConfig;
use crate::db::ConversationStore;
use crate::llm::{LLMProvider, Message};
use crate::tools::ToolRegistry;
use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::{AppId, Strategy};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Builds the client for a key on a cache miss
#[async_trait]
pub trait SessionClientFactory: Send + Sync {
    async fn create(&self, app_id: AppId, strategy: Strategy)
        -> Result<SessionClient, EngineError>;
}

/// Why an entry left the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionCause {
    WriteExpired,
    AccessExpired,
    Capacity,
    Explicit,
    Shutdown,
}

impl fmt::Display for EvictionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cause = match self {
            EvictionCause::WriteExpired => "expired_after_write",
            EvictionCause::AccessExpired => "expired_after_access",
            EvictionCause::Capacity => "capacity",
            EvictionCause::Explicit => "explicit",
            EvictionCause::Shutdown => "shutdown",
        };
        f.write_str(cause)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    app_id: AppId,
    strategy: Strategy,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.app_id, self.strategy)
    }
}

/// Expiry and capacity limits
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    pub max_entries: usize,
    pub ttl_after_write: Duration,
    pub ttl_after_access: Duration,
}

impl From<&SessionConfig> for CachePolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            max_entries: config.max_entries,
            ttl_after_write: config.ttl_after_write(),
            ttl_after_access: config.ttl_after_access(),
        }
    }
}

struct Slot {
    client: OnceCell<Arc<SessionClient>>,
    created_at: Instant,
    last_access: Mutex<Instant>,
}

impl Slot {
    fn new(now: Instant) -> Self {
        Self {
            client: OnceCell::new(),
            created_at: now,
            last_access: Mutex::new(now),
        }
    }

    fn last_access(&self) -> Instant {
        *self.last_access.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn touch(&self, now: Instant) {
        *self.last_access.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    fn expiry(&self, now: Instant, policy: &CachePolicy) -> Option<EvictionCause> {
        if now.duration_since(self.created_at) >= policy.ttl_after_write {
            Some(EvictionCause::WriteExpired)
        } else if now.duration_since(self.last_access()) >= policy.ttl_after_access {
            Some(EvictionCause::AccessExpired)
        } else {
            None
        }
    }
}

pub struct SessionClientCache {
    entries: Mutex<HashMap<CacheKey, Arc<Slot>>>,
    factory: Arc<dyn SessionClientFactory>,
    policy: CachePolicy,
    constructions: AtomicU64,
}

impl SessionClientCache {
    pub fn new(factory: Arc<dyn SessionClientFactory>, policy: CachePolicy) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            factory,
            policy,
            constructions: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Return the client for `(app_id, strategy)`, building it on a miss.
    ///
    /// Callers racing on the same missing key wait for a single construction
    /// and receive the same client. A failed construction is not cached.
    pub async fn get(
        &self,
        app_id: AppId,
        strategy: Strategy,
    ) -> Result<Arc<SessionClient>, EngineError> {
        let key = CacheKey { app_id, strategy };
        let slot = self.slot_for(key);

        let result = slot
            .client
            .get_or_try_init(|| async {
                self.constructions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Building session client");
                self.factory.create(app_id, strategy).await.map(Arc::new)
            })
            .await;

        match result {
            Ok(client) => Ok(Arc::clone(client)),
            Err(e) => {
                let mut entries = self.entries();
                if entries.get(&key).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
                    entries.remove(&key);
                }
                Err(e)
            }
        }
    }

    /// Find a live slot or insert an empty one, under the map lock.
    fn slot_for(&self, key: CacheKey) -> Arc<Slot> {
        let now = Instant::now();
        let mut entries = self.entries();

        let existing = entries
            .get(&key)
            .map(|slot| (slot.expiry(now, &self.policy), Arc::clone(slot)));

        match existing {
            Some((None, slot)) => {
                slot.touch(now);
                return slot;
            }
            Some((Some(cause), _)) => {
                entries.remove(&key);
                log_eviction(key, cause);
            }
            None => {}
        }

        while entries.len() >= self.policy.max_entries.max(1) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, slot)| slot.last_access())
                .map(|(k, _)| *k);
            match oldest {
                Some(victim) => {
                    entries.remove(&victim);
                    log_eviction(victim, EvictionCause::Capacity);
                }
                None => break,
            }
        }

        let slot = Arc::new(Slot::new(now));
        entries.insert(key, Arc::clone(&slot));
        slot
    }

    /// Drop the entry for one key. Returns whether it was present.
    pub fn evict(&self, app_id: AppId, strategy: Strategy) -> bool {
        let key = CacheKey { app_id, strategy };
        let removed = self.entries().remove(&key).is_some();
        if removed {
            log_eviction(key, EvictionCause::Explicit);
        }
        removed
    }

    /// Drop every entry of an application, whatever its strategy.
    pub fn evict_app(&self, app_id: AppId) -> usize {
        Strategy::ALL
            .iter()
            .filter(|strategy| self.evict(app_id, **strategy))
            .count()
    }

    /// Remove expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();
        let before = entries.len();

        entries.retain(|key, slot| match slot.expiry(now, &self.policy) {
            Some(cause) => {
                log_eviction(*key, cause);
                false
            }
            None => true,
        });

        before - entries.len()
    }

    /// Sweep periodically until the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let removed = cache.sweep();
                if removed > 0 {
                    debug!(removed, remaining = cache.len(), "Session cache swept");
                }
            }
        })
    }

    /// Empty the cache on shutdown. Returns how many entries were dropped.
    pub fn drain(&self) -> usize {
        let mut entries = self.entries();
        for key in entries.keys() {
            log_eviction(*key, EvictionCause::Shutdown);
        }
        let count = entries.len();
        entries.clear();
        if count > 0 {
            info!(count, "Session cache drained");
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn contains(&self, app_id: AppId, strategy: Strategy) -> bool {
        self.entries().contains_key(&CacheKey { app_id, strategy })
    }

    /// Number of client constructions started since creation
    pub fn constructions(&self) -> u64 {
        self.constructions.load(Ordering::Relaxed)
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, Arc<Slot>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn log_eviction(key: CacheKey, cause: EvictionCause) {
    debug!(key = %key, cause = %cause, "Session client evicted");
}

/// Builds clients from the configured providers, hydrating memory from the
/// conversation store.
pub struct DefaultSessionFactory {
    store: Arc<dyn ConversationStore>,
    chat: Arc<dyn LLMProvider>,
    reasoning: Arc<dyn LLMProvider>,
    artifacts: ArtifactWriter,
    memory_window: usize,
    max_tool_calls: usize,
}

impl DefaultSessionFactory {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        chat: Arc<dyn LLMProvider>,
        reasoning: Arc<dyn LLMProvider>,
        artifacts: ArtifactWriter,
        config: &SessionConfig,
    ) -> Self {
        Self {
            store,
            chat,
            reasoning,
            artifacts,
            memory_window: config.memory_window,
            max_tool_calls: config.max_tool_calls,
        }
    }
}

#[async_trait]
impl SessionClientFactory for DefaultSessionFactory {
    async fn create(
        &self,
        app_id: AppId,
        strategy: Strategy,
    ) -> Result<SessionClient, EngineError> {
        let turns = self
            .store
            .load_recent(app_id, self.memory_window)
            .await
            .map_err(|e| EngineError::database(format!("{:#}", e)))?;

        debug!(
            app_id = %app_id,
            strategy = %strategy,
            turns = turns.len(),
            "Hydrating session memory"
        );

        let client = match strategy {
            Strategy::SingleDocument => SessionClient::structured(
                app_id,
                strategy,
                Arc::clone(&self.chat),
                ChatMemory::hydrated(
                    Some(Message::system(SINGLE_DOCUMENT_PROMPT)),
                    self.memory_window,
                    &turns,
                ),
            ),
            Strategy::MultiFile => SessionClient::structured(
                app_id,
                strategy,
                Arc::clone(&self.chat),
                ChatMemory::hydrated(
                    Some(Message::system(MULTI_FILE_PROMPT)),
                    self.memory_window,
                    &turns,
                ),
            ),
            Strategy::ToolBuiltProject => {
                let workspace = self
                    .artifacts
                    .ensure_app_dir(app_id, strategy)
                    .await
                    .map_err(|e| EngineError::Io(std::io::Error::other(format!("{:#}", e))))?;
                let tools = ToolRegistry::new(workspace)
                    .map_err(|e| EngineError::ToolError(format!("{:#}", e)))?;
                let memory = ChatMemory::hydrated(
                    Some(Message::system(tools.system_prompt())),
                    self.memory_window,
                    &turns,
                );
                SessionClient::tool_augmented(
                    app_id,
                    Arc::clone(&self.reasoning),
                    Arc::new(tools),
                    memory,
                    self.max_tool_calls,
                )
            }
        };

        Ok(client)
    }
}
