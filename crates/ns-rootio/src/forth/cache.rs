//! Cache of compiled models.
//!
//! Keys are chosen by the caller and must capture everything a model depends
//! on. Each key has its own slot: concurrent builders of one key wait for a
//! single build, while builds of different keys run in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::forth::program::CompiledModel;

/// Configuration for the model cache.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Maximum number of distinct types kept. Default: 1024.
    pub max_entries: usize,
    /// Whether caching is enabled. When `false`, every lookup misses and
    /// nothing is stored.
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: 1024, enabled: true }
    }
}

impl CacheConfig {
    /// Create a disabled (no-op) cache config.
    pub fn disabled() -> Self {
        Self { max_entries: 0, enabled: false }
    }
}

/// Build slot of one key; `None` until a model has been built.
type Slot = Arc<Mutex<Option<Arc<CompiledModel>>>>;

struct Inner {
    slots: HashMap<String, Slot>,
    entries: usize,
    hits: u64,
    misses: u64,
}

/// Thread-safe map from model key to compiled model.
pub struct ModelCache {
    inner: Mutex<Inner>,
    config: CacheConfig,
}

impl ModelCache {
    /// Create an empty cache.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(Inner { slots: HashMap::new(), entries: 0, hits: 0, misses: 0 }),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, hit: bool) {
        let mut inner = self.lock();
        if hit {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
    }

    /// Look up the model compiled for `key`.
    pub fn get(&self, key: &str) -> Option<Arc<CompiledModel>> {
        if !self.config.enabled {
            return None;
        }
        let slot = self.lock().slots.get(key).cloned();
        let found = slot.and_then(|slot| {
            let built = slot.lock().unwrap_or_else(PoisonError::into_inner);
            built.clone()
        });
        self.record(found.is_some());
        found
    }

    /// Return the cached model or build one with `f`.
    ///
    /// `f` runs under the lock of `key`'s slot only. `Ok(None)` from `f` (no
    /// model could be built yet) is passed through and nothing is stored.
    pub fn get_or_try_build<F, E>(
        &self,
        key: &str,
        f: F,
    ) -> std::result::Result<Option<Arc<CompiledModel>>, E>
    where
        F: FnOnce() -> std::result::Result<Option<CompiledModel>, E>,
    {
        if !self.config.enabled {
            return Ok(f()?.map(Arc::new));
        }

        let slot = {
            let mut inner = self.lock();
            match inner.slots.get(key) {
                Some(slot) => Some(Arc::clone(slot)),
                None if inner.slots.len() < self.config.max_entries => {
                    let slot = Slot::default();
                    inner.slots.insert(key.to_string(), Arc::clone(&slot));
                    Some(slot)
                }
                None => None,
            }
        };
        let Some(slot) = slot else {
            log::debug!("model cache full; not caching {key}");
            self.record(false);
            return Ok(f()?.map(Arc::new));
        };

        let mut built = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(found) = built.as_ref() {
            let found = Arc::clone(found);
            drop(built);
            self.record(true);
            return Ok(Some(found));
        }
        self.record(false);

        let Some(model) = f()? else {
            return Ok(None);
        };
        let model = Arc::new(model);
        *built = Some(Arc::clone(&model));
        drop(built);
        let mut inner = self.lock();
        // A concurrent `clear` may have dropped the slot.
        if inner.slots.get(key).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
            inner.entries += 1;
        }
        Ok(Some(model))
    }

    /// Cache statistics snapshot.
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats { entries: inner.entries, hits: inner.hits, misses: inner.misses }
    }

    /// Clear all cached models.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.slots.clear();
        inner.entries = 0;
    }
}

impl Default for ModelCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

/// Snapshot of cache statistics.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    /// Number of cached models.
    pub entries: usize,
    /// Total cache hits since creation.
    pub hits: u64,
    /// Total cache misses since creation.
    pub misses: u64,
}

impl CacheStats {
    /// Hit rate as a fraction [0.0, 1.0].
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forth::form::Form;
    use crate::forth::node::{Node, NodeKind};
    use crate::model::Primitive;

    fn compiled() -> CompiledModel {
        let leaf = Node::new(NodeKind::Field("node1".into())).with_form(Form::numpy(Primitive::Int8));
        CompiledModel::new(Node::new(NodeKind::Top).with_child(leaf)).unwrap()
    }

    #[test]
    fn builds_once_per_signature() {
        let cache = ModelCache::default();
        assert!(cache.get("int").is_none());

        let built: Result<_, ()> = cache.get_or_try_build("int", || Ok(Some(compiled())));
        let first = built.unwrap().unwrap();

        let again: Result<_, ()> = cache.get_or_try_build("int", || panic!("should not be called"));
        assert!(Arc::ptr_eq(&first, &again.unwrap().unwrap()));

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }

    #[test]
    fn failed_build_is_not_cached() {
        let cache = ModelCache::default();
        let none: Result<_, ()> = cache.get_or_try_build("T", || Ok(None));
        assert!(none.unwrap().is_none());
        let err: Result<_, &str> = cache.get_or_try_build("T", || Err("boom"));
        assert_eq!(err.unwrap_err(), "boom");
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn different_keys_build_concurrently() {
        use std::sync::mpsc;
        use std::time::Duration;

        let owned = ModelCache::default();
        let cache = &owned;
        let (tx, rx) = mpsc::channel();
        std::thread::scope(|s| {
            let slow = s.spawn(move || {
                cache.get_or_try_build::<_, &str>("slow", || {
                    // Waits on a build of another key that must not be blocked.
                    rx.recv_timeout(Duration::from_secs(10)).map_err(|_| "other key was blocked")?;
                    Ok(Some(compiled()))
                })
            });
            let fast: Result<_, &str> = cache.get_or_try_build("fast", || Ok(Some(compiled())));
            assert!(fast.unwrap().is_some());
            tx.send(()).unwrap();
            assert!(slow.join().unwrap().unwrap().is_some());
        });
        assert_eq!(cache.stats().entries, 2);
    }

    #[test]
    fn same_key_builds_once_across_threads() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let cache = ModelCache::default();
        let builds = AtomicUsize::new(0);
        let models: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        let built: Result<_, ()> = cache.get_or_try_build("shared", || {
                            builds.fetch_add(1, Ordering::SeqCst);
                            Ok(Some(compiled()))
                        });
                        built.unwrap().unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(models.iter().all(|m| Arc::ptr_eq(m, &models[0])));
        let stats = cache.stats();
        assert_eq!((stats.entries, stats.hits, stats.misses), (1, 7, 1));
    }

    #[test]
    fn disabled_cache_is_noop() {
        let cache = ModelCache::new(CacheConfig::disabled());
        let built: Result<_, ()> = cache.get_or_try_build("int", || Ok(Some(compiled())));
        assert!(built.unwrap().is_some());
        assert!(cache.get("int").is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn capacity_bounds_entries() {
        let cache = ModelCache::new(CacheConfig { max_entries: 1, enabled: true });
        let _: Result<_, ()> = cache.get_or_try_build("a", || Ok(Some(compiled())));
        let b: Result<_, ()> = cache.get_or_try_build("b", || Ok(Some(compiled())));
        assert!(b.unwrap().is_some());
        assert_eq!(cache.stats().entries, 1);
        cache.clear();
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().hit_rate(), 0.0);
    }
}
