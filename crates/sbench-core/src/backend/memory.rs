//! In-memory backend: a process-global object map per target name.
//!
//! Zero-latency storage for integration tests and `sbench memory run` sanity
//! jobs. Because the map registry is process-global, a manager, foremen and
//! workers sharing one process all see the same objects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::Duration;

use super::{BackendError, Connection};

fn registry() -> &'static Mutex<HashMap<String, Arc<MemStore>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<MemStore>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Backing store for one target. Exposed so tests can inspect what a run did.
#[derive(Default)]
pub struct MemStore {
    objects: RwLock<HashMap<u64, Vec<u8>>>,
    invalidations: AtomicU64,
}

impl MemStore {
    pub fn object_count(&self) -> usize {
        self.objects.read().unwrap().len()
    }

    pub fn object_ids(&self) -> Vec<u64> {
        self.objects.read().unwrap().keys().copied().collect()
    }

    pub fn invalidation_count(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }
}

/// Look up the store behind a target name, if a manager created it.
pub fn store_for(target: &str) -> Option<Arc<MemStore>> {
    registry().lock().unwrap().get(target).cloned()
}

pub struct MemoryConnection {
    target: String,
    store: Option<Arc<MemStore>>,
    created: bool,
    /// Artificial per-put delay, from protocol config `put_delay_ms`.
    put_delay: Duration,
}

impl MemoryConnection {
    pub fn new(target: &str, protocol_config: &HashMap<String, String>) -> Self {
        let put_delay = protocol_config
            .get("put_delay_ms")
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::ZERO);
        Self {
            target: target.to_string(),
            store: None,
            created: false,
            put_delay,
        }
    }

    fn store(&self) -> Result<&Arc<MemStore>, BackendError> {
        self.store
            .as_ref()
            .ok_or_else(|| BackendError::Failed("connection not established".into()))
    }
}

impl Connection for MemoryConnection {
    fn target(&self) -> &str {
        &self.target
    }

    fn manager_connect(&mut self) -> Result<(), BackendError> {
        let mut reg = registry().lock().unwrap();
        if let Some(store) = reg.get(&self.target) {
            self.store = Some(Arc::clone(store));
        } else {
            let store = Arc::new(MemStore::default());
            reg.insert(self.target.clone(), Arc::clone(&store));
            self.store = Some(store);
            self.created = true;
        }
        Ok(())
    }

    fn manager_close(&mut self, cleanup: bool) -> Result<(), BackendError> {
        // Only remove what we created; pre-existing stores are left alone.
        if cleanup && self.created {
            registry().lock().unwrap().remove(&self.target);
        }
        self.store = None;
        Ok(())
    }

    fn worker_connect(&mut self) -> Result<(), BackendError> {
        match registry().lock().unwrap().get(&self.target) {
            Some(store) => {
                self.store = Some(Arc::clone(store));
                Ok(())
            }
            None => Err(BackendError::Failed(format!(
                "memory target {} was never created by a manager",
                self.target
            ))),
        }
    }

    fn worker_close(&mut self) -> Result<(), BackendError> {
        self.store = None;
        Ok(())
    }

    fn requires_key(&self) -> bool {
        false
    }

    fn can_delete(&self) -> bool {
        true
    }

    fn put_object(&mut self, _key: &str, id: u64, buf: &[u8]) -> Result<(), BackendError> {
        if !self.put_delay.is_zero() {
            std::thread::sleep(self.put_delay);
        }
        let store = self.store()?;
        store.objects.write().unwrap().insert(id, buf.to_vec());
        Ok(())
    }

    fn get_object(&mut self, _key: &str, id: u64, buf: &mut [u8]) -> Result<(), BackendError> {
        let store = self.store()?;
        let objects = store.objects.read().unwrap();
        let data = objects
            .get(&id)
            .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        if data.len() != buf.len() {
            return Err(BackendError::SizeMismatch {
                key: id.to_string(),
                expected: buf.len() as u64,
                found: data.len() as u64,
            });
        }
        buf.copy_from_slice(data);
        Ok(())
    }

    fn delete_object(&mut self, _key: &str, id: u64) -> Result<(), BackendError> {
        let store = self.store()?;
        store
            .objects
            .write()
            .unwrap()
            .remove(&id)
            .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        Ok(())
    }

    fn invalidate_cache(&mut self) -> Result<(), BackendError> {
        self.store()?.invalidations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
