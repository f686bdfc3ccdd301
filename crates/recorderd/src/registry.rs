//! Exported-buffer registry.
//!
//! Every audio frame handed to a client is recorded here until the client
//! returns its key or the session is torn down. The registry owns the
//! allocation and the mapping; removing a record unmaps and unrefs both.

use std::sync::{Arc, Mutex, MutexGuard};

use recproto::{BufferHandle, BufferManager, BufferMapping, ExportKey};
use thiserror::Error;
use tracing::{debug, warn};

/// One buffer currently exported to the client.
#[derive(Debug)]
pub struct ExportedBuffer {
    pub buffer: BufferHandle,
    pub mapping: Option<BufferMapping>,
    pub key: ExportKey,
    pub size: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("export key {0} already registered")]
    DuplicateKey(ExportKey),
    #[error("export key 0 is not a buffer")]
    NullKey,
}

/// Per-session set of exported buffers, behind one mutex.
pub struct BufferRegistry {
    manager: Arc<dyn BufferManager>,
    records: Mutex<Vec<ExportedBuffer>>,
}

impl BufferRegistry {
    pub fn new(manager: Arc<dyn BufferManager>) -> Self {
        Self {
            manager,
            records: Mutex::new(Vec::new()),
        }
    }

    fn records(&self) -> MutexGuard<'_, Vec<ExportedBuffer>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record an exported buffer. On error the record is handed back so the
    /// caller can release it.
    pub fn add(&self, record: ExportedBuffer) -> Result<(), (RegistryError, ExportedBuffer)> {
        if record.key == 0 {
            return Err((RegistryError::NullKey, record));
        }
        let mut records = self.records();
        if records.iter().any(|r| r.key == record.key) {
            return Err((RegistryError::DuplicateKey(record.key), record));
        }
        records.push(record);
        Ok(())
    }

    /// Drop the record for `key`. Returns false if no such record exists.
    pub fn remove_by_key(&self, key: ExportKey) -> bool {
        let record = {
            let mut records = self.records();
            match records.iter().position(|r| r.key == key) {
                Some(idx) => records.swap_remove(idx),
                None => {
                    debug!("return of unknown buffer key {}", key);
                    return false;
                }
            }
        };
        self.release(record);
        true
    }

    /// Drop every record. Returns how many were released.
    pub fn remove_all(&self) -> usize {
        let drained: Vec<ExportedBuffer> = self.records().drain(..).collect();
        let count = drained.len();
        for record in drained {
            self.release(record);
        }
        if count > 0 {
            warn!("released {} buffers never returned by the client", count);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: ExportKey) -> bool {
        self.records().iter().any(|r| r.key == key)
    }

    /// Unmap and unref one record's allocation.
    pub fn release(&self, record: ExportedBuffer) {
        if let Some(mapping) = record.mapping {
            self.manager.unmap(mapping);
        }
        self.manager.unref(record.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recproto::{Access, ShmBufferManager};

    fn setup() -> (tempfile::TempDir, Arc<ShmBufferManager>, BufferRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(ShmBufferManager::new(dir.path()));
        manager.acquire().unwrap();
        let registry = BufferRegistry::new(manager.clone());
        (dir, manager, registry)
    }

    fn exported(manager: &ShmBufferManager) -> ExportedBuffer {
        let buffer = manager.alloc(32).unwrap();
        let mapping = manager.map(&buffer, Access::ReadWrite).unwrap();
        let key = manager.export(&buffer).unwrap();
        ExportedBuffer {
            buffer,
            mapping: Some(mapping),
            key,
            size: 32,
        }
    }

    #[test]
    fn add_and_remove_by_key() {
        let (_dir, manager, registry) = setup();
        let record = exported(&manager);
        let key = record.key;

        registry.add(record).unwrap();
        assert!(registry.contains(key));
        assert_eq!(manager.live_buffers(), 1);

        assert!(registry.remove_by_key(key));
        assert!(registry.is_empty());
        assert_eq!(manager.live_buffers(), 0);
    }

    #[test]
    fn unknown_key_is_not_fatal() {
        let (_dir, manager, registry) = setup();
        registry.add(exported(&manager)).unwrap();
        assert!(!registry.remove_by_key(0xdead_beef));
        assert_eq!(registry.len(), 1);
        registry.remove_all();
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let (_dir, manager, registry) = setup();
        let first = exported(&manager);
        let key = first.key;
        registry.add(first).unwrap();

        let imposter = ExportedBuffer {
            buffer: manager.import(key).unwrap(),
            mapping: None,
            key,
            size: 32,
        };
        let (err, returned) = registry.add(imposter).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateKey(key));
        registry.release(returned);
        assert_eq!(registry.len(), 1);
        registry.remove_all();
    }

    #[test]
    fn remove_all_releases_everything() {
        let (_dir, manager, registry) = setup();
        for _ in 0..3 {
            registry.add(exported(&manager)).unwrap();
        }
        assert_eq!(registry.remove_all(), 3);
        assert_eq!(registry.remove_all(), 0);
        assert_eq!(manager.live_buffers(), 0);
    }
}
