//! Container registry and lifecycle state machine
//!
//! The registry owns the set of hosted containers. Mutations on one id are
//! serialized through that id's own lock while mutations on different ids,
//! including their blocking loader calls, run in parallel. Every successful
//! mutation writes one durable snapshot before it reports success; a failed
//! snapshot write aborts the mutation without touching in-memory state, so
//! durable and in-memory contents never diverge permanently.

use super::record::{ContainerRecord, ContainerStatus, FailureInfo};
use crate::artifact::coordinate::ReleaseCoordinate;
use crate::artifact::loader::{ArtifactLoader, RuntimeHandle};
use crate::error::{CrucibleError, Result};
use crate::state::{PersistedContainer, StateStore};
use chrono::Utc;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Registry-internal entry owning the live handle for one container
struct ContainerEntry {
    record: ContainerRecord,
    handle: Option<RuntimeHandle>,
}

/// Registry contents behind one short-held lock
#[derive(Default)]
struct RegistryInner {
    /// Entries indexed by container id
    entries: HashMap<String, ContainerEntry>,
    /// Container ids in insertion order
    order: Vec<String>,
}

impl RegistryInner {
    /// Persistable tuples with `id`'s tuple replaced by `candidate`
    ///
    /// A `None` candidate drops the id from the result; an id not yet known
    /// is appended at the end, matching insertion order.
    fn persisted_with(&self, id: &str, candidate: Option<&ContainerRecord>) -> Vec<PersistedContainer> {
        let mut rows = Vec::with_capacity(self.order.len() + 1);
        let mut known = false;
        for existing in &self.order {
            if existing == id {
                known = true;
                if let Some(record) = candidate {
                    rows.push(PersistedContainer::from_record(record));
                }
            } else if let Some(entry) = self.entries.get(existing) {
                rows.push(PersistedContainer::from_record(&entry.record));
            }
        }
        if !known {
            if let Some(record) = candidate {
                rows.push(PersistedContainer::from_record(record));
            }
        }
        rows
    }
}

/// What `commit` should do with the entry's handle
enum HandleOp {
    /// Install a freshly resolved handle, displacing any previous one
    Install(RuntimeHandle),
    /// Leave the held handle untouched
    Keep,
    /// Take the held handle out
    Take,
}

/// Container registry
///
/// Orchestrates the artifact loader and the state store around the container
/// lifecycle: create, hot-swap to a new version, dispose, and read. The
/// registry is an explicit instance; compose it once at startup and hand it
/// (or a narrow borrow of it) to whoever needs it.
pub struct ContainerRegistry {
    /// Shared container entries
    inner: RwLock<RegistryInner>,
    /// Per-id exclusion guards, created lazily, retained for the process
    guards: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Serializes snapshot assembly and store writes across ids
    store_gate: Mutex<()>,
    /// Resolves coordinates into live runtimes
    loader: Arc<dyn ArtifactLoader>,
    /// Durable snapshot store
    store: Arc<dyn StateStore>,
}

impl ContainerRegistry {
    /// Create an empty registry
    pub fn new(loader: Arc<dyn ArtifactLoader>, store: Arc<dyn StateStore>) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            guards: Mutex::new(HashMap::new()),
            store_gate: Mutex::new(()),
            loader,
            store,
        }
    }

    /// Open a registry from the store's persisted snapshot
    ///
    /// Restored Active and Failed containers come back without runtimes;
    /// call [`recover`](Self::recover) to re-resolve them.
    pub fn open(loader: Arc<dyn ArtifactLoader>, store: Arc<dyn StateStore>) -> Result<Self> {
        let rows = store.load()?;

        let mut inner = RegistryInner::default();
        let now = Utc::now();
        for row in rows {
            let record = ContainerRecord {
                id: row.id.clone(),
                coordinate: row.coordinate(),
                status: row.status,
                last_error: None,
                created_at: now,
                updated_at: now,
            };
            inner.order.push(row.id.clone());
            inner.entries.insert(
                row.id,
                ContainerEntry {
                    record,
                    handle: None,
                },
            );
        }

        info!("Loaded {} container(s) from the state store", inner.order.len());
        Ok(Self {
            inner: RwLock::new(inner),
            guards: Mutex::new(HashMap::new()),
            store_gate: Mutex::new(()),
            loader,
            store,
        })
    }

    /// Create a container bound to an artifact coordinate
    ///
    /// Fails with `ContainerExists` if the id is already Active or Failed; a
    /// Disposed id may be reused. A resolution failure leaves a Failed
    /// record behind so the attempt is visible to `get` and `list`.
    pub fn create(&self, id: &str, coordinate: ReleaseCoordinate) -> Result<()> {
        validate_id(id)?;
        let guard = self.guard(id)?;
        let _serial = guard
            .lock()
            .map_err(|_| CrucibleError::Lock("Failed to acquire container lock".to_string()))?;

        {
            let inner = self
                .inner
                .read()
                .map_err(|_| CrucibleError::Lock("Failed to acquire read lock".to_string()))?;
            if let Some(entry) = inner.entries.get(id) {
                if entry.record.status != ContainerStatus::Disposed {
                    return Err(CrucibleError::ContainerExists(id.to_string()));
                }
            }
        }

        debug!("Resolving {} for container {}", coordinate, id);
        let now = Utc::now();
        match self.loader.resolve(&coordinate) {
            Ok(handle) => {
                let record = ContainerRecord {
                    id: id.to_string(),
                    coordinate: coordinate.clone(),
                    status: ContainerStatus::Active,
                    last_error: None,
                    created_at: now,
                    updated_at: now,
                };
                if let Some(stray) = self.commit(id, record, HandleOp::Install(handle))? {
                    self.loader.dispose(stray);
                }
                info!("Created container {} on {}", id, coordinate);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to resolve {} for container {}: {}", coordinate, id, e);
                let record = ContainerRecord {
                    id: id.to_string(),
                    coordinate: coordinate.clone(),
                    status: ContainerStatus::Failed,
                    last_error: Some(FailureInfo {
                        message: e.to_string(),
                        requested: coordinate.clone(),
                        occurred_at: now,
                    }),
                    created_at: now,
                    updated_at: now,
                };
                self.commit(id, record, HandleOp::Keep)?;
                Err(CrucibleError::ResolutionFailed {
                    id: id.to_string(),
                    coordinate,
                    source: e,
                })
            }
        }
    }

    /// Hot-swap a container to a new artifact version
    ///
    /// The new coordinate is resolved before the held runtime is touched, so
    /// a failed upgrade never leaves the container without its previous
    /// working version. The displaced runtime is released exactly once, only
    /// after the new state is durable.
    pub fn update(&self, id: &str, coordinate: ReleaseCoordinate) -> Result<()> {
        validate_id(id)?;
        let guard = self.guard(id)?;
        let _serial = guard
            .lock()
            .map_err(|_| CrucibleError::Lock("Failed to acquire container lock".to_string()))?;

        let (mut record, has_handle) = {
            let inner = self
                .inner
                .read()
                .map_err(|_| CrucibleError::Lock("Failed to acquire read lock".to_string()))?;
            match inner.entries.get(id) {
                Some(entry) if entry.record.status != ContainerStatus::Disposed => {
                    (entry.record.clone(), entry.handle.is_some())
                }
                _ => return Err(CrucibleError::ContainerNotFound(id.to_string())),
            }
        };

        debug!("Resolving {} for container {}", coordinate, id);
        match self.loader.resolve(&coordinate) {
            Ok(handle) => {
                record.coordinate = coordinate.clone();
                record.status = ContainerStatus::Active;
                record.last_error = None;
                record.updated_at = Utc::now();
                if let Some(previous) = self.commit(id, record, HandleOp::Install(handle))? {
                    self.loader.dispose(previous);
                }
                info!("Container {} now serving {}", id, coordinate);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to resolve {} for container {}: {}", coordinate, id, e);
                record.status = if has_handle {
                    ContainerStatus::Active
                } else {
                    ContainerStatus::Failed
                };
                record.last_error = Some(FailureInfo {
                    message: e.to_string(),
                    requested: coordinate.clone(),
                    occurred_at: Utc::now(),
                });
                record.updated_at = Utc::now();
                self.commit(id, record, HandleOp::Keep)?;
                Err(CrucibleError::ResolutionFailed {
                    id: id.to_string(),
                    coordinate,
                    source: e,
                })
            }
        }
    }

    /// Dispose a container, releasing its runtime
    ///
    /// Disposing an already-Disposed id succeeds without side effects; an
    /// unknown id is `ContainerNotFound`. The tombstone stays visible until
    /// [`purge`](Self::purge).
    pub fn dispose(&self, id: &str) -> Result<()> {
        validate_id(id)?;
        let guard = self.guard(id)?;
        let _serial = guard
            .lock()
            .map_err(|_| CrucibleError::Lock("Failed to acquire container lock".to_string()))?;

        let mut record = {
            let inner = self
                .inner
                .read()
                .map_err(|_| CrucibleError::Lock("Failed to acquire read lock".to_string()))?;
            match inner.entries.get(id) {
                None => return Err(CrucibleError::ContainerNotFound(id.to_string())),
                Some(entry) if entry.record.status == ContainerStatus::Disposed => {
                    debug!("Container {} already disposed", id);
                    return Ok(());
                }
                Some(entry) => entry.record.clone(),
            }
        };

        record.status = ContainerStatus::Disposed;
        record.updated_at = Utc::now();
        if let Some(handle) = self.commit(id, record, HandleOp::Take)? {
            self.loader.dispose(handle);
        }
        info!("Disposed container {}", id);
        Ok(())
    }

    /// Snapshot of one container
    pub fn get(&self, id: &str) -> Result<ContainerRecord> {
        let inner = self
            .inner
            .read()
            .map_err(|_| CrucibleError::Lock("Failed to acquire read lock".to_string()))?;
        inner
            .entries
            .get(id)
            .map(|entry| entry.record.clone())
            .ok_or_else(|| CrucibleError::ContainerNotFound(id.to_string()))
    }

    /// Snapshots of all containers, in insertion order
    pub fn list(&self) -> Result<Vec<ContainerRecord>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| CrucibleError::Lock("Failed to acquire read lock".to_string()))?;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id))
            .map(|entry| entry.record.clone())
            .collect())
    }

    /// Remove Disposed tombstones, returning the purged ids
    pub fn purge(&self) -> Result<Vec<String>> {
        let _gate = self
            .store_gate
            .lock()
            .map_err(|_| CrucibleError::Lock("Failed to acquire store lock".to_string()))?;

        let (snapshot, purged) = {
            let inner = self
                .inner
                .read()
                .map_err(|_| CrucibleError::Lock("Failed to acquire read lock".to_string()))?;
            let mut snapshot = Vec::new();
            let mut purged = Vec::new();
            for id in &inner.order {
                if let Some(entry) = inner.entries.get(id) {
                    if entry.record.status == ContainerStatus::Disposed {
                        purged.push(id.clone());
                    } else {
                        snapshot.push(PersistedContainer::from_record(&entry.record));
                    }
                }
            }
            (snapshot, purged)
        };

        if purged.is_empty() {
            return Ok(purged);
        }

        self.store.snapshot(&snapshot)?;

        let mut inner = self
            .inner
            .write()
            .map_err(|_| CrucibleError::Lock("Failed to acquire write lock".to_string()))?;
        for id in &purged {
            inner.entries.remove(id);
        }
        inner.order.retain(|id| !purged.contains(id));

        info!("Purged {} disposed container(s)", purged.len());
        Ok(purged)
    }

    /// Re-resolve runtimes for containers restored by [`open`](Self::open)
    ///
    /// Active containers whose artifact no longer resolves are demoted to
    /// Failed with the failure recorded.
    pub fn recover(&self) -> Result<()> {
        let ids: Vec<String> = {
            let inner = self
                .inner
                .read()
                .map_err(|_| CrucibleError::Lock("Failed to acquire read lock".to_string()))?;
            inner.order.clone()
        };

        for id in ids {
            let guard = self.guard(&id)?;
            let _serial = guard
                .lock()
                .map_err(|_| CrucibleError::Lock("Failed to acquire container lock".to_string()))?;

            let pending = {
                let inner = self
                    .inner
                    .read()
                    .map_err(|_| CrucibleError::Lock("Failed to acquire read lock".to_string()))?;
                match inner.entries.get(&id) {
                    Some(entry)
                        if entry.record.status == ContainerStatus::Active
                            && entry.handle.is_none() =>
                    {
                        Some(entry.record.clone())
                    }
                    _ => None,
                }
            };

            let mut record = match pending {
                Some(record) => record,
                None => continue,
            };

            match self.loader.resolve(&record.coordinate) {
                Ok(handle) => {
                    let mut handle = Some(handle);
                    {
                        let mut inner = self.inner.write().map_err(|_| {
                            CrucibleError::Lock("Failed to acquire write lock".to_string())
                        })?;
                        if let Some(entry) = inner.entries.get_mut(&id) {
                            if entry.record.status == ContainerStatus::Active
                                && entry.handle.is_none()
                            {
                                entry.handle = handle.take();
                            }
                        }
                    }
                    if let Some(orphan) = handle {
                        self.loader.dispose(orphan);
                    }
                    info!("Recovered container {} on {}", id, record.coordinate);
                }
                Err(e) => {
                    warn!("Failed to recover container {}: {}", id, e);
                    let requested = record.coordinate.clone();
                    record.status = ContainerStatus::Failed;
                    record.last_error = Some(FailureInfo {
                        message: e.to_string(),
                        requested,
                        occurred_at: Utc::now(),
                    });
                    record.updated_at = Utc::now();
                    self.commit(&id, record, HandleOp::Keep)?;
                }
            }
        }

        Ok(())
    }

    /// Release every live runtime without disturbing the persisted snapshot
    ///
    /// Containers keep their durable status, so a later `open` + `recover`
    /// brings them back. Call this when shutting the hosting process down.
    pub fn shutdown(&self) -> Result<()> {
        let handles: Vec<RuntimeHandle> = {
            let mut inner = self
                .inner
                .write()
                .map_err(|_| CrucibleError::Lock("Failed to acquire write lock".to_string()))?;
            inner
                .entries
                .values_mut()
                .filter_map(|entry| entry.handle.take())
                .collect()
        };

        let released = handles.len();
        for handle in handles {
            self.loader.dispose(handle);
        }
        if released > 0 {
            info!("Released {} runtime(s) on shutdown", released);
        }
        Ok(())
    }

    /// Exclusion guard for one id, created on first use
    fn guard(&self, id: &str) -> Result<Arc<Mutex<()>>> {
        let mut guards = self
            .guards
            .lock()
            .map_err(|_| CrucibleError::Lock("Failed to acquire guard map lock".to_string()))?;
        Ok(guards
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    /// Persist the candidate record, then make it visible in memory
    ///
    /// The snapshot is written before the in-memory commit, so readers never
    /// observe state that fails to become durable. When the write fails, a
    /// freshly resolved handle is released here and the previously held one
    /// stays in place; the displaced handle (if any) is returned to the
    /// caller for release.
    fn commit(
        &self,
        id: &str,
        record: ContainerRecord,
        op: HandleOp,
    ) -> Result<Option<RuntimeHandle>> {
        let _gate = self
            .store_gate
            .lock()
            .map_err(|_| CrucibleError::Lock("Failed to acquire store lock".to_string()))?;

        let snapshot = {
            let inner = self
                .inner
                .read()
                .map_err(|_| CrucibleError::Lock("Failed to acquire read lock".to_string()))?;
            inner.persisted_with(id, Some(&record))
        };

        if let Err(e) = self.store.snapshot(&snapshot) {
            if let HandleOp::Install(handle) = op {
                self.loader.dispose(handle);
            }
            return Err(CrucibleError::Persistence(e));
        }

        let mut guard = self
            .inner
            .write()
            .map_err(|_| CrucibleError::Lock("Failed to acquire write lock".to_string()))?;
        let inner = &mut *guard;
        let entry = match inner.entries.entry(id.to_string()) {
            Entry::Occupied(occupied) => occupied.into_mut(),
            Entry::Vacant(vacant) => {
                inner.order.push(id.to_string());
                vacant.insert(ContainerEntry {
                    record: record.clone(),
                    handle: None,
                })
            }
        };
        entry.record = record;
        let displaced = match op {
            HandleOp::Install(handle) => entry.handle.replace(handle),
            HandleOp::Keep => None,
            HandleOp::Take => entry.handle.take(),
        };
        Ok(displaced)
    }
}

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(CrucibleError::InvalidRequest(
            "container id must not be empty".to_string(),
        ));
    }
    if id.chars().any(char::is_whitespace) {
        return Err(CrucibleError::InvalidRequest(format!(
            "container id '{}' must not contain whitespace",
            id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::loader::{EngineKind, EngineRuntime, ResolveError};
    use crate::state::{FileStateStore, MemoryStateStore, StoreError};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    struct StubRuntime;

    impl EngineRuntime for StubRuntime {
        fn kind(&self) -> EngineKind {
            EngineKind::Rules
        }

        fn definition_count(&self) -> usize {
            0
        }
    }

    /// Loader that accounts for every handle it creates and releases
    #[derive(Default)]
    struct CountingLoader {
        resolved: AtomicUsize,
        disposed: AtomicUsize,
        live: AtomicUsize,
        max_live: AtomicUsize,
        fail_versions: Mutex<Vec<String>>,
    }

    impl CountingLoader {
        fn fail_version(&self, version: &str) {
            self.fail_versions.lock().unwrap().push(version.to_string());
        }

        fn resolved(&self) -> usize {
            self.resolved.load(Ordering::SeqCst)
        }

        fn disposed(&self) -> usize {
            self.disposed.load(Ordering::SeqCst)
        }

        fn live(&self) -> usize {
            self.live.load(Ordering::SeqCst)
        }

        fn max_live(&self) -> usize {
            self.max_live.load(Ordering::SeqCst)
        }
    }

    impl ArtifactLoader for CountingLoader {
        fn resolve(
            &self,
            coordinate: &ReleaseCoordinate,
        ) -> std::result::Result<RuntimeHandle, ResolveError> {
            if self
                .fail_versions
                .lock()
                .unwrap()
                .contains(&coordinate.version)
            {
                return Err(ResolveError::ArtifactNotFound(coordinate.clone()));
            }
            self.resolved.fetch_add(1, Ordering::SeqCst);
            let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_live.fetch_max(live, Ordering::SeqCst);
            Ok(RuntimeHandle::new(coordinate.clone(), Box::new(StubRuntime)))
        }

        fn dispose(&self, handle: RuntimeHandle) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
            self.live.fetch_sub(1, Ordering::SeqCst);
            drop(handle);
        }
    }

    /// Loader that stalls inside resolve and tracks overlap
    #[derive(Default)]
    struct SlowLoader {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        entered: AtomicUsize,
    }

    impl ArtifactLoader for SlowLoader {
        fn resolve(
            &self,
            coordinate: &ReleaseCoordinate,
        ) -> std::result::Result<RuntimeHandle, ResolveError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            self.entered.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(100));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(RuntimeHandle::new(coordinate.clone(), Box::new(StubRuntime)))
        }

        fn dispose(&self, handle: RuntimeHandle) {
            drop(handle);
        }
    }

    /// Store that fails the next snapshot write on demand
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStateStore,
        fail_next: AtomicBool,
    }

    impl FlakyStore {
        fn fail_next(&self) {
            self.fail_next.store(true, Ordering::SeqCst);
        }
    }

    impl StateStore for FlakyStore {
        fn snapshot(
            &self,
            records: &[PersistedContainer],
        ) -> std::result::Result<(), StoreError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Io(std::io::Error::other("disk full")));
            }
            self.inner.snapshot(records)
        }

        fn load(&self) -> std::result::Result<Vec<PersistedContainer>, StoreError> {
            self.inner.load()
        }
    }

    fn coordinate(version: &str) -> ReleaseCoordinate {
        ReleaseCoordinate::new("com.example.billing", "pricing", version).unwrap()
    }

    fn counting_registry() -> (ContainerRegistry, Arc<CountingLoader>) {
        let loader = Arc::new(CountingLoader::default());
        let store = Arc::new(MemoryStateStore::default());
        (ContainerRegistry::new(loader.clone(), store), loader)
    }

    #[test]
    fn test_create_and_get() {
        let (registry, loader) = counting_registry();

        registry.create("c1", coordinate("1.0")).unwrap();

        let record = registry.get("c1").unwrap();
        assert_eq!(record.status, ContainerStatus::Active);
        assert_eq!(record.coordinate, coordinate("1.0"));
        assert!(record.last_error.is_none());
        assert_eq!(loader.live(), 1);
    }

    #[test]
    fn test_duplicate_create_conflicts() {
        let (registry, _loader) = counting_registry();

        registry.create("c1", coordinate("1.0")).unwrap();
        let err = registry.create("c1", coordinate("1.1")).unwrap_err();
        assert!(matches!(err, CrucibleError::ContainerExists(_)));

        // A Failed container occupies its id too.
        let (registry, loader) = counting_registry();
        loader.fail_version("1.0");
        assert!(registry.create("c2", coordinate("1.0")).is_err());
        assert!(matches!(
            registry.create("c2", coordinate("1.1")).unwrap_err(),
            CrucibleError::ContainerExists(_)
        ));
    }

    #[test]
    fn test_invalid_ids_rejected() {
        let (registry, loader) = counting_registry();

        assert!(matches!(
            registry.create("", coordinate("1.0")).unwrap_err(),
            CrucibleError::InvalidRequest(_)
        ));
        assert!(matches!(
            registry.create("c 1", coordinate("1.0")).unwrap_err(),
            CrucibleError::InvalidRequest(_)
        ));
        assert_eq!(loader.resolved(), 0);
    }

    #[test]
    fn test_failed_create_leaves_failed_record() {
        let (registry, loader) = counting_registry();
        loader.fail_version("1.0");

        let err = registry.create("c1", coordinate("1.0")).unwrap_err();
        assert!(matches!(err, CrucibleError::ResolutionFailed { .. }));

        let record = registry.get("c1").unwrap();
        assert_eq!(record.status, ContainerStatus::Failed);
        assert_eq!(record.coordinate, coordinate("1.0"));
        let failure = record.last_error.unwrap();
        assert_eq!(failure.requested, coordinate("1.0"));
        assert_eq!(loader.live(), 0);
    }

    #[test]
    fn test_failed_update_keeps_previous_version() {
        let (registry, loader) = counting_registry();
        loader.fail_version("2.0");

        registry.create("c1", coordinate("1.0")).unwrap();
        let err = registry.update("c1", coordinate("2.0")).unwrap_err();
        assert!(matches!(err, CrucibleError::ResolutionFailed { .. }));

        let record = registry.get("c1").unwrap();
        assert_eq!(record.status, ContainerStatus::Active);
        assert_eq!(record.coordinate, coordinate("1.0"));
        assert_eq!(record.last_error.unwrap().requested, coordinate("2.0"));
        assert_eq!(loader.live(), 1);
        assert_eq!(loader.disposed(), 0);
    }

    #[test]
    fn test_failed_update_on_failed_container_stays_failed() {
        let (registry, loader) = counting_registry();
        loader.fail_version("1.0");
        loader.fail_version("2.0");

        assert!(registry.create("c1", coordinate("1.0")).is_err());
        assert!(registry.update("c1", coordinate("2.0")).is_err());

        let record = registry.get("c1").unwrap();
        assert_eq!(record.status, ContainerStatus::Failed);
        assert_eq!(record.coordinate, coordinate("1.0"));
        assert_eq!(record.last_error.unwrap().requested, coordinate("2.0"));
    }

    #[test]
    fn test_update_disposes_previous_handle_once() {
        let (registry, loader) = counting_registry();

        registry.create("c1", coordinate("1.0")).unwrap();
        registry.update("c1", coordinate("2.0")).unwrap();

        assert_eq!(registry.get("c1").unwrap().coordinate, coordinate("2.0"));
        assert_eq!(loader.resolved(), 2);
        assert_eq!(loader.disposed(), 1);
        assert_eq!(loader.live(), 1);
    }

    #[test]
    fn test_successful_update_clears_last_error() {
        let (registry, loader) = counting_registry();
        loader.fail_version("2.0");

        registry.create("c1", coordinate("1.0")).unwrap();
        assert!(registry.update("c1", coordinate("2.0")).is_err());
        registry.update("c1", coordinate("3.0")).unwrap();

        let record = registry.get("c1").unwrap();
        assert_eq!(record.status, ContainerStatus::Active);
        assert_eq!(record.coordinate, coordinate("3.0"));
        assert!(record.last_error.is_none());
    }

    #[test]
    fn test_update_unknown_id_not_found() {
        let (registry, _loader) = counting_registry();

        assert!(matches!(
            registry.update("ghost", coordinate("1.0")).unwrap_err(),
            CrucibleError::ContainerNotFound(_)
        ));
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let (registry, loader) = counting_registry();

        registry.create("c1", coordinate("1.0")).unwrap();
        registry.dispose("c1").unwrap();

        let record = registry.get("c1").unwrap();
        assert_eq!(record.status, ContainerStatus::Disposed);
        assert_eq!(loader.disposed(), 1);

        // Second dispose: success, no further loader activity.
        registry.dispose("c1").unwrap();
        assert_eq!(loader.disposed(), 1);
        assert_eq!(loader.live(), 0);
    }

    #[test]
    fn test_dispose_unknown_id_not_found() {
        let (registry, _loader) = counting_registry();

        assert!(matches!(
            registry.dispose("ghost").unwrap_err(),
            CrucibleError::ContainerNotFound(_)
        ));
    }

    #[test]
    fn test_disposed_id_can_be_reused() {
        let (registry, loader) = counting_registry();

        registry.create("c1", coordinate("1.0")).unwrap();
        registry.dispose("c1").unwrap();
        registry.create("c1", coordinate("2.0")).unwrap();

        let record = registry.get("c1").unwrap();
        assert_eq!(record.status, ContainerStatus::Active);
        assert_eq!(record.coordinate, coordinate("2.0"));
        assert_eq!(loader.live(), 1);

        // Updating a tombstone is still NotFound.
        registry.dispose("c1").unwrap();
        assert!(matches!(
            registry.update("c1", coordinate("3.0")).unwrap_err(),
            CrucibleError::ContainerNotFound(_)
        ));
    }

    #[test]
    fn test_list_preserves_insertion_order() {
        let (registry, _loader) = counting_registry();

        registry.create("beta", coordinate("1.0")).unwrap();
        registry.create("alpha", coordinate("1.0")).unwrap();
        registry.create("gamma", coordinate("1.0")).unwrap();
        registry.dispose("alpha").unwrap();

        let ids: Vec<String> = registry.list().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["beta", "alpha", "gamma"]);
    }

    #[test]
    fn test_purge_drops_tombstones() {
        let (registry, _loader) = counting_registry();

        registry.create("c1", coordinate("1.0")).unwrap();
        registry.create("c2", coordinate("1.0")).unwrap();
        registry.dispose("c1").unwrap();

        assert_eq!(registry.purge().unwrap(), vec!["c1".to_string()]);
        assert!(matches!(
            registry.get("c1").unwrap_err(),
            CrucibleError::ContainerNotFound(_)
        ));
        assert_eq!(registry.list().unwrap().len(), 1);
        assert!(registry.purge().unwrap().is_empty());
    }

    #[test]
    fn test_every_mutation_writes_a_snapshot() {
        let loader = Arc::new(CountingLoader::default());
        let store = Arc::new(MemoryStateStore::default());
        let registry = ContainerRegistry::new(loader.clone(), store.clone());

        registry.create("c1", coordinate("1.0")).unwrap();
        let rows = store.load().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].version, "1.0");
        assert_eq!(rows[0].status, ContainerStatus::Active);

        registry.update("c1", coordinate("2.0")).unwrap();
        assert_eq!(store.load().unwrap()[0].version, "2.0");

        loader.fail_version("3.0");
        assert!(registry.update("c1", coordinate("3.0")).is_err());
        // The durable coordinate is the version still being served.
        assert_eq!(store.load().unwrap()[0].version, "2.0");

        registry.dispose("c1").unwrap();
        assert_eq!(store.load().unwrap()[0].status, ContainerStatus::Disposed);

        registry.purge().unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_persist_failure_rolls_back_create() {
        let loader = Arc::new(CountingLoader::default());
        let store = Arc::new(FlakyStore::default());
        let registry = ContainerRegistry::new(loader.clone(), store.clone());

        store.fail_next();
        assert!(matches!(
            registry.create("c1", coordinate("1.0")).unwrap_err(),
            CrucibleError::Persistence(_)
        ));

        assert!(matches!(
            registry.get("c1").unwrap_err(),
            CrucibleError::ContainerNotFound(_)
        ));
        // The resolved handle was released during rollback.
        assert_eq!(loader.resolved(), 1);
        assert_eq!(loader.disposed(), 1);
        assert_eq!(loader.live(), 0);

        // The id is free for a later attempt.
        registry.create("c1", coordinate("1.0")).unwrap();
    }

    #[test]
    fn test_persist_failure_rolls_back_update() {
        let loader = Arc::new(CountingLoader::default());
        let store = Arc::new(FlakyStore::default());
        let registry = ContainerRegistry::new(loader.clone(), store.clone());

        registry.create("c1", coordinate("1.0")).unwrap();

        store.fail_next();
        assert!(matches!(
            registry.update("c1", coordinate("2.0")).unwrap_err(),
            CrucibleError::Persistence(_)
        ));

        // The old runtime keeps serving; the new one was released.
        let record = registry.get("c1").unwrap();
        assert_eq!(record.status, ContainerStatus::Active);
        assert_eq!(record.coordinate, coordinate("1.0"));
        assert_eq!(loader.resolved(), 2);
        assert_eq!(loader.disposed(), 1);
        assert_eq!(loader.live(), 1);
        assert_eq!(store.load().unwrap()[0].version, "1.0");

        registry.update("c1", coordinate("2.0")).unwrap();
        assert_eq!(registry.get("c1").unwrap().coordinate, coordinate("2.0"));
    }

    #[test]
    fn test_persist_failure_rolls_back_dispose() {
        let loader = Arc::new(CountingLoader::default());
        let store = Arc::new(FlakyStore::default());
        let registry = ContainerRegistry::new(loader.clone(), store.clone());

        registry.create("c1", coordinate("1.0")).unwrap();

        store.fail_next();
        assert!(matches!(
            registry.dispose("c1").unwrap_err(),
            CrucibleError::Persistence(_)
        ));

        assert_eq!(registry.get("c1").unwrap().status, ContainerStatus::Active);
        assert_eq!(loader.live(), 1);
        assert_eq!(loader.disposed(), 0);

        registry.dispose("c1").unwrap();
        assert_eq!(loader.live(), 0);
    }

    #[test]
    fn test_soak_cycles_do_not_accumulate_handles() {
        let (registry, loader) = counting_registry();

        registry.create("calculator", coordinate("0.20.00")).unwrap();
        for i in 1..2_000usize {
            let version = format!("0.20.{:02}", i % 24);
            registry.update("calculator", coordinate(&version)).unwrap();
            let record = registry.get("calculator").unwrap();
            assert_eq!(record.coordinate.version, version);
        }

        // Exactly one live runtime; at most the swap-transient pair existed.
        assert_eq!(loader.live(), 1);
        assert!(loader.max_live() <= 2);
        assert_eq!(loader.resolved(), loader.disposed() + 1);

        registry.dispose("calculator").unwrap();
        assert_eq!(loader.live(), 0);
        assert_eq!(loader.resolved(), loader.disposed());
    }

    #[test]
    fn test_mutations_on_distinct_ids_overlap() {
        let loader = Arc::new(SlowLoader::default());
        let store = Arc::new(MemoryStateStore::default());
        let registry = Arc::new(ContainerRegistry::new(loader.clone(), store));

        let mut workers = Vec::new();
        for id in ["a", "b", "c"] {
            let registry = registry.clone();
            workers.push(thread::spawn(move || {
                registry.create(id, coordinate("1.0")).unwrap();
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }

        // The stalls inside resolve overlapped instead of queueing.
        assert!(loader.max_in_flight.load(Ordering::SeqCst) >= 2);
        assert_eq!(registry.list().unwrap().len(), 3);
    }

    #[test]
    fn test_mutations_on_same_id_serialize() {
        let loader = Arc::new(SlowLoader::default());
        let store = Arc::new(MemoryStateStore::default());
        let registry = Arc::new(ContainerRegistry::new(loader.clone(), store));

        registry.create("c1", coordinate("1.0")).unwrap();

        let mut workers = Vec::new();
        for version in ["2.0", "3.0"] {
            let registry = registry.clone();
            workers.push(thread::spawn(move || {
                registry.update("c1", coordinate(version)).unwrap();
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }

        // create + two updates ran, never two at once for the same id.
        assert_eq!(loader.entered.load(Ordering::SeqCst), 3);
        assert_eq!(loader.max_in_flight.load(Ordering::SeqCst), 1);

        let record = registry.get("c1").unwrap();
        assert!(record.coordinate.version == "2.0" || record.coordinate.version == "3.0");
    }

    #[test]
    fn test_readers_not_blocked_by_slow_mutation() {
        let loader = Arc::new(SlowLoader::default());
        let store = Arc::new(MemoryStateStore::default());
        let registry = Arc::new(ContainerRegistry::new(loader.clone(), store));

        registry.create("steady", coordinate("1.0")).unwrap();

        let worker = {
            let registry = registry.clone();
            thread::spawn(move || {
                registry.create("slow", coordinate("1.0")).unwrap();
            })
        };

        // Wait until the worker is inside resolve, then read.
        while loader.entered.load(Ordering::SeqCst) < 2 {
            thread::yield_now();
        }
        let record = registry.get("steady").unwrap();
        assert_eq!(record.status, ContainerStatus::Active);
        assert!(!registry.list().unwrap().is_empty());

        worker.join().unwrap();
    }

    #[test]
    fn test_restart_restores_persisted_containers() {
        let temp = tempdir().unwrap();
        let store = Arc::new(FileStateStore::new(temp.path().join("containers.json")).unwrap());

        {
            let loader = Arc::new(CountingLoader::default());
            let registry = ContainerRegistry::new(loader, store.clone());
            registry.create("c1", coordinate("1.0")).unwrap();
            registry.update("c1", coordinate("2.0")).unwrap();
            registry.create("c2", coordinate("1.0")).unwrap();
            registry.dispose("c2").unwrap();
        }

        let loader = Arc::new(CountingLoader::default());
        let registry = ContainerRegistry::open(loader.clone(), store).unwrap();

        let record = registry.get("c1").unwrap();
        assert_eq!(record.status, ContainerStatus::Active);
        assert_eq!(record.coordinate, coordinate("2.0"));
        assert_eq!(registry.get("c2").unwrap().status, ContainerStatus::Disposed);

        // Runtimes are only reattached by recovery.
        assert_eq!(loader.resolved(), 0);
        registry.recover().unwrap();
        assert_eq!(loader.resolved(), 1);
        assert_eq!(loader.live(), 1);
    }

    #[test]
    fn test_recover_demotes_unresolvable_containers() {
        let store = Arc::new(MemoryStateStore::default());

        {
            let loader = Arc::new(CountingLoader::default());
            let registry = ContainerRegistry::new(loader, store.clone());
            registry.create("good", coordinate("1.0")).unwrap();
            registry.create("gone", coordinate("2.0")).unwrap();
        }

        let loader = Arc::new(CountingLoader::default());
        loader.fail_version("2.0");
        let registry = ContainerRegistry::open(loader.clone(), store.clone()).unwrap();
        registry.recover().unwrap();

        assert_eq!(registry.get("good").unwrap().status, ContainerStatus::Active);
        let gone = registry.get("gone").unwrap();
        assert_eq!(gone.status, ContainerStatus::Failed);
        assert!(gone.last_error.is_some());
        assert_eq!(loader.live(), 1);

        // The demotion is durable.
        let rows = store.load().unwrap();
        let row = rows.iter().find(|r| r.id == "gone").unwrap();
        assert_eq!(row.status, ContainerStatus::Failed);
    }

    #[test]
    fn test_shutdown_releases_runtimes_without_disposing() {
        let store = Arc::new(MemoryStateStore::default());
        let loader = Arc::new(CountingLoader::default());
        let registry = ContainerRegistry::new(loader.clone(), store.clone());

        registry.create("c1", coordinate("1.0")).unwrap();
        registry.create("c2", coordinate("1.0")).unwrap();

        registry.shutdown().unwrap();
        assert_eq!(loader.live(), 0);
        assert_eq!(loader.disposed(), 2);

        // Durable status is untouched, so a reopen sees Active containers.
        for row in store.load().unwrap() {
            assert_eq!(row.status, ContainerStatus::Active);
        }
    }
}
