//! The reader cache and its eviction loop.

use super::{ContractReader, ReaderKey, ReaderResult, ReaderSpec, RelayerGetter};
use crate::cancellation::CancellationToken;
use crate::config::ReaderManagerConfig;
use crate::errors::ReaderError;
use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

struct CacheEntry {
    reader: Arc<dyn ContractReader>,
    last_used: Instant,
}

type Cache = RwLock<HashMap<String, CacheEntry>>;

/// Caches contract readers by [`ReaderKey`] and evicts idle ones.
///
/// Safe to share across concurrent runs. Readers are built outside the lock;
/// if two callers race to build the same key, only the first result is
/// cached and the other reader is closed.
pub struct ReaderManager {
    relayers: Arc<dyn RelayerGetter>,
    config: ReaderManagerConfig,
    cache: Arc<Cache>,
    eviction: Mutex<Option<(Arc<CancellationToken>, JoinHandle<()>)>>,
}

impl std::fmt::Debug for ReaderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderManager")
            .field("config", &self.config)
            .field("cached", &self.len())
            .field("running", &self.eviction.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl ReaderManager {
    /// Creates a manager; call [`ReaderManager::start`] to enable eviction.
    #[must_use]
    pub fn new(relayers: Arc<dyn RelayerGetter>, config: ReaderManagerConfig) -> Self {
        Self {
            relayers,
            config,
            cache: Arc::new(RwLock::new(HashMap::new())),
            eviction: Mutex::new(None),
        }
    }

    /// Spawns the eviction loop. Returns false if it is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut eviction = self.eviction.lock();
        if eviction.is_some() {
            return false;
        }

        let stop = Arc::new(CancellationToken::new());
        let handle = tokio::spawn(eviction_loop(
            Arc::clone(&self.cache),
            self.config.check_interval().max(Duration::from_millis(1)),
            self.config.eviction_timeout(),
            Arc::clone(&stop),
        ));
        *eviction = Some((stop, handle));
        tracing::debug!(
            check_interval_ms = self.config.check_interval_ms,
            eviction_timeout_ms = self.config.eviction_timeout_ms,
            "reader eviction started"
        );
        true
    }

    /// Stops the eviction loop. Cached readers stay open; their owners close
    /// them.
    pub async fn close(&self) {
        let running = self.eviction.lock().take();
        if let Some((stop, handle)) = running {
            stop.cancel("reader manager closed");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "reader eviction loop panicked");
            }
        }
    }

    /// Returns the cached reader for `spec.key`, refreshing its last use, or
    /// builds and caches a new one.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::RelayerNotFound`] if no relayer serves the key's
    /// network and chain, or any error from building the reader.
    pub async fn get_or_create(&self, spec: &ReaderSpec) -> ReaderResult<Arc<dyn ContractReader>> {
        if let Some(reader) = self.touch(spec.key.as_str()) {
            return Ok(reader);
        }

        let reader = self.build(spec).await?;
        let published = {
            let mut cache = self.cache.write();
            match cache.entry(spec.key.as_str().to_string()) {
                Entry::Occupied(mut entry) => {
                    entry.get_mut().last_used = Instant::now();
                    Some(Arc::clone(&entry.get().reader))
                }
                Entry::Vacant(entry) => {
                    entry.insert(CacheEntry {
                        reader: Arc::clone(&reader),
                        last_used: Instant::now(),
                    });
                    None
                }
            }
        };

        match published {
            Some(existing) => {
                tracing::debug!(key = %spec.key, "reader built concurrently, discarding duplicate");
                close_reader(spec.key.as_str(), reader.as_ref()).await;
                Ok(existing)
            }
            None => Ok(reader),
        }
    }

    /// Builds and caches a reader that must not already exist.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::AlreadyExists`] if the key is cached, or any
    /// error from building the reader.
    pub async fn create(&self, spec: &ReaderSpec) -> ReaderResult<Arc<dyn ContractReader>> {
        let key = spec.key.as_str();
        if self.cache.read().contains_key(key) {
            return Err(ReaderError::AlreadyExists(key.to_string()));
        }

        let reader = self.build(spec).await?;
        let inserted = {
            let mut cache = self.cache.write();
            match cache.entry(key.to_string()) {
                Entry::Occupied(_) => false,
                Entry::Vacant(entry) => {
                    entry.insert(CacheEntry {
                        reader: Arc::clone(&reader),
                        last_used: Instant::now(),
                    });
                    true
                }
            }
        };

        if inserted {
            Ok(reader)
        } else {
            close_reader(key, reader.as_ref()).await;
            Err(ReaderError::AlreadyExists(key.to_string()))
        }
    }

    /// Returns a cached reader without building one.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::NotFound`] if the key is not cached.
    pub fn get(&self, key: &ReaderKey) -> ReaderResult<Arc<dyn ContractReader>> {
        self.cache
            .read()
            .get(key.as_str())
            .map(|entry| Arc::clone(&entry.reader))
            .ok_or_else(|| ReaderError::NotFound(key.as_str().to_string()))
    }

    /// Number of cached readers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }

    fn touch(&self, key: &str) -> Option<Arc<dyn ContractReader>> {
        let mut cache = self.cache.write();
        let entry = cache.get_mut(key)?;
        entry.last_used = Instant::now();
        Some(Arc::clone(&entry.reader))
    }

    async fn build(&self, spec: &ReaderSpec) -> ReaderResult<Arc<dyn ContractReader>> {
        let relayer = self.relayers.get(&spec.key.relay_id())?;
        let reader = relayer.new_contract_reader(&spec.config).await?;
        let ready = match reader.bind(&[spec.binding()]).await {
            Ok(()) => reader.start().await,
            Err(e) => Err(e),
        };
        if let Err(e) = ready {
            close_reader(spec.key.as_str(), reader.as_ref()).await;
            return Err(e);
        }
        tracing::debug!(key = %spec.key, contract = %spec.contract_name, "built contract reader");
        Ok(reader)
    }
}

impl Drop for ReaderManager {
    fn drop(&mut self) {
        if let Some((stop, _)) = self.eviction.get_mut().take() {
            stop.cancel("reader manager dropped");
        }
    }
}

async fn eviction_loop(
    cache: Arc<Cache>,
    interval: Duration,
    timeout: Duration,
    stop: Arc<CancellationToken>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            _ = ticker.tick() => evict_idle(&cache, timeout).await,
        }
    }
    tracing::debug!("reader eviction stopped");
}

async fn evict_idle(cache: &Cache, timeout: Duration) {
    let expired: Vec<String> = cache
        .read()
        .iter()
        .filter(|(_, entry)| entry.last_used.elapsed() > timeout)
        .map(|(key, _)| key.clone())
        .collect();

    for key in expired {
        let removed = cache.write().remove(&key);
        match removed {
            Some(entry) => {
                tracing::info!(key = %key, "evicting idle contract reader");
                close_reader(&key, entry.reader.as_ref()).await;
            }
            None => tracing::warn!(key = %key, "idle reader was already removed"),
        }
    }
}

async fn close_reader(key: &str, reader: &dyn ContractReader) {
    if let Err(e) = reader.close().await {
        tracing::warn!(key = %key, error = %e, "failed to close contract reader");
    }
}
