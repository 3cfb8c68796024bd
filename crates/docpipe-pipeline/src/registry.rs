//! Live set of pluggable units keyed by identity
//!
//! The map sits behind `RwLock<Arc<HashMap>>`. Readers clone the `Arc` and
//! release the lock immediately; writers build a new map and swap the
//! pointer, so a reader never sees a half-replaced set.

use async_trait::async_trait;
use docpipe_core::Identified;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{PipelineError, Result};

/// Source of the authoritative unit set for [`Registry::refresh`]
#[async_trait]
pub trait RegistryLoader<U: ?Sized>: Send + Sync {
    async fn load(&self) -> docpipe_core::Result<Vec<Arc<U>>>;
}

/// Anything that can be reloaded on a timer
#[async_trait]
pub trait Refresh: Send + Sync + 'static {
    /// Reload, returning the number of entries now live
    async fn refresh(&self) -> Result<usize>;
}

type UnitMap<U> = HashMap<Uuid, Arc<U>>;

pub struct Registry<U: ?Sized + Identified + 'static> {
    name: &'static str,
    units: RwLock<Arc<UnitMap<U>>>,
    loader: Arc<dyn RegistryLoader<U>>,
}

impl<U: ?Sized + Identified + 'static> Registry<U> {
    pub fn new(name: &'static str, loader: Arc<dyn RegistryLoader<U>>) -> Self {
        Self {
            name,
            units: RwLock::new(Arc::new(HashMap::new())),
            loader,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn register(&self, unit: Arc<U>) -> Result<()> {
        let id = unit.id();
        let mut units = self.units.write();
        if units.contains_key(&id) {
            return Err(PipelineError::AlreadyRegistered(id));
        }

        let mut next = UnitMap::clone(&units);
        next.insert(id, unit);
        *units = Arc::new(next);
        Ok(())
    }

    pub fn unregister(&self, id: Uuid) -> Option<Arc<U>> {
        let mut units = self.units.write();
        if !units.contains_key(&id) {
            return None;
        }

        let mut next = UnitMap::clone(&units);
        let removed = next.remove(&id);
        *units = Arc::new(next);
        removed
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<U>> {
        self.units.read().get(&id).cloned()
    }

    /// Every unit from a single generation of the map
    pub fn get_all(&self) -> Vec<Arc<U>> {
        let snapshot = self.snapshot();
        snapshot.values().cloned().collect()
    }

    pub fn snapshot(&self) -> Arc<UnitMap<U>> {
        Arc::clone(&self.units.read())
    }

    pub fn len(&self) -> usize {
        self.units.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.read().is_empty()
    }

    /// Replace the whole set with what the loader returns.
    ///
    /// On loader failure the previous contents stay live.
    pub async fn refresh(&self) -> Result<usize> {
        let loaded = self.loader.load().await?;

        let mut next = UnitMap::with_capacity(loaded.len());
        for unit in loaded {
            let id = unit.id();
            if next.insert(id, unit).is_some() {
                warn!(registry = self.name, unit_id = %id, "Duplicate unit id in refresh, keeping last");
            }
        }

        let count = next.len();
        *self.units.write() = Arc::new(next);

        debug!(registry = self.name, units = count, "Registry refreshed");
        Ok(count)
    }
}

#[async_trait]
impl<U: ?Sized + Identified + 'static> Refresh for Registry<U> {
    async fn refresh(&self) -> Result<usize> {
        Registry::refresh(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docpipe_core::CoreError;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct Unit {
        id: Uuid,
        generation: u32,
    }

    impl Identified for Unit {
        fn id(&self) -> Uuid {
            self.id
        }
    }

    /// Each load returns `size` fresh units tagged with a new generation
    struct GenerationLoader {
        size: usize,
        generation: AtomicU32,
        fail: AtomicBool,
    }

    impl GenerationLoader {
        fn new(size: usize) -> Self {
            Self {
                size,
                generation: AtomicU32::new(0),
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl RegistryLoader<Unit> for GenerationLoader {
        async fn load(&self) -> docpipe_core::Result<Vec<Arc<Unit>>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(CoreError::storage("unreachable"));
            }
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            Ok((0..self.size)
                .map(|_| {
                    Arc::new(Unit {
                        id: Uuid::new_v4(),
                        generation,
                    })
                })
                .collect())
        }
    }

    fn new_registry(size: usize) -> (Registry<Unit>, Arc<GenerationLoader>) {
        let loader = Arc::new(GenerationLoader::new(size));
        let registry = Registry::new("test", loader.clone() as Arc<dyn RegistryLoader<Unit>>);
        (registry, loader)
    }

    fn unit() -> Arc<Unit> {
        Arc::new(Unit {
            id: Uuid::new_v4(),
            generation: 0,
        })
    }

    #[test]
    fn test_register_and_lookup() {
        let (registry, _) = new_registry(0);
        let a = unit();

        registry.register(a.clone()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get(a.id).is_some());

        let err = registry.register(a.clone()).unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyRegistered(id) if id == a.id));

        assert!(registry.unregister(a.id).is_some());
        assert!(registry.unregister(a.id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_writes() {
        let (registry, _) = new_registry(0);
        registry.register(unit()).unwrap();

        let before = registry.snapshot();
        registry.register(unit()).unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_replaces_everything() {
        let (registry, _) = new_registry(3);
        let manual = unit();
        registry.register(manual.clone()).unwrap();

        let count = registry.refresh().await.unwrap();

        assert_eq!(count, 3);
        assert!(registry.get(manual.id).is_none());
        assert!(registry.get_all().iter().all(|u| u.generation == 1));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_contents() {
        let (registry, loader) = new_registry(2);
        registry.refresh().await.unwrap();
        let before: Vec<Uuid> = registry.get_all().iter().map(|u| u.id).collect();

        loader.fail.store(true, Ordering::SeqCst);
        assert!(registry.refresh().await.is_err());

        let mut after: Vec<Uuid> = registry.get_all().iter().map(|u| u.id).collect();
        let mut before = before;
        before.sort();
        after.sort();
        assert_eq!(before, after);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_never_see_mixed_generations() {
        let registry = Arc::new(new_registry(16).0);
        registry.refresh().await.unwrap();

        let writer = {
            let registry = registry.clone();
            tokio::spawn(async move {
                for _ in 0..200 {
                    registry.refresh().await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut readers = Vec::new();
        for _ in 0..4 {
            let registry = registry.clone();
            readers.push(tokio::spawn(async move {
                for _ in 0..500 {
                    let units = registry.get_all();
                    assert_eq!(units.len(), 16);
                    let generation = units[0].generation;
                    assert!(units.iter().all(|u| u.generation == generation));
                    tokio::task::yield_now().await;
                }
            }));
        }

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
    }
}
