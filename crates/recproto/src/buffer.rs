//! Shared-buffer export/import channel.
//!
//! The daemon allocates a buffer, maps it, copies a frame in, and exports it
//! under an integer key. The key travels in an Event; the client imports the
//! same memory by key, maps it read-only, copies out, and hands the key back
//! with RETURN_BUFFER so the daemon can drop its reference.
//!
//! [`ShmBufferManager`] backs each buffer with a file in a directory both
//! processes can see (tmpfs by default). The key is the file name, so an
//! export costs nothing and an import is an open + mmap.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use memmap2::{Mmap, MmapMut, MmapOptions};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Cross-process name of an exported buffer. Zero never names a buffer; a
/// manager returning it from `export` has failed.
pub type ExportKey = u32;

/// How a buffer is mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    ReadWrite,
}

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("buffer manager not acquired")]
    NotAcquired,

    #[error("invalid buffer size: {0}")]
    InvalidSize(usize),

    #[error("no buffer with key {0}")]
    UnknownKey(ExportKey),

    #[error("buffer {0} is mapped read-only")]
    ReadOnly(ExportKey),

    #[error("export failed for buffer {0}")]
    ExportFailed(ExportKey),

    #[error("buffer I/O on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// One reference to an allocation, owned or imported.
#[derive(Debug, PartialEq, Eq)]
pub struct BufferHandle {
    key: ExportKey,
    size: usize,
    imported: bool,
}

impl BufferHandle {
    pub fn key(&self) -> ExportKey {
        self.key
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_imported(&self) -> bool {
        self.imported
    }
}

enum MappingKind {
    Read(Mmap),
    ReadWrite(MmapMut),
}

/// A live mapping of a buffer into this process.
pub struct BufferMapping {
    key: ExportKey,
    map: MappingKind,
}

impl BufferMapping {
    pub fn key(&self) -> ExportKey {
        self.key
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.map {
            MappingKind::Read(m) => &m[..],
            MappingKind::ReadWrite(m) => &m[..],
        }
    }

    pub fn as_mut_slice(&mut self) -> Result<&mut [u8], BufferError> {
        match &mut self.map {
            MappingKind::Read(_) => Err(BufferError::ReadOnly(self.key)),
            MappingKind::ReadWrite(m) => Ok(&mut m[..]),
        }
    }
}

impl std::fmt::Debug for BufferMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferMapping")
            .field("key", &self.key)
            .field("len", &self.len())
            .finish()
    }
}

/// Process-wide shared-buffer facility.
///
/// Sessions `acquire` it at CREATE and `release` it at teardown. Every
/// `alloc`/`import` must be balanced by an `unref`, every `map` by an `unmap`.
pub trait BufferManager: Send + Sync {
    fn acquire(&self) -> Result<(), BufferError>;
    fn release(&self);

    fn alloc(&self, size: usize) -> Result<BufferHandle, BufferError>;
    fn map(&self, buffer: &BufferHandle, access: Access) -> Result<BufferMapping, BufferError>;
    fn export(&self, buffer: &BufferHandle) -> Result<ExportKey, BufferError>;
    fn import(&self, key: ExportKey) -> Result<BufferHandle, BufferError>;
    fn unmap(&self, mapping: BufferMapping);
    fn unref(&self, buffer: BufferHandle);

    /// Allocations and imports not yet unref'd.
    fn live_buffers(&self) -> usize;
}

#[derive(Default)]
struct ShmState {
    refs: usize,
    next_key: ExportKey,
    /// key -> number of live handles in this process
    live: HashMap<ExportKey, usize>,
}

/// File-backed [`BufferManager`] over a shared directory.
pub struct ShmBufferManager {
    dir: PathBuf,
    state: Mutex<ShmState>,
}

impl ShmBufferManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let seed = (uuid::Uuid::new_v4().as_u128() as u32).max(1);
        Self {
            dir: dir.into(),
            state: Mutex::new(ShmState {
                next_key: seed,
                ..Default::default()
            }),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: ExportKey) -> PathBuf {
        self.dir.join(format!("{key:08x}.buf"))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ShmState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn io_err(path: &Path) -> impl FnOnce(io::Error) -> BufferError + '_ {
        move |source| BufferError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Create a new backing file under a fresh non-zero key.
    fn create_backing(&self, state: &mut ShmState) -> Result<(ExportKey, File), BufferError> {
        loop {
            let key = state.next_key;
            state.next_key = state.next_key.wrapping_add(1).max(1);

            let path = self.path_for(key);
            match OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(file) => return Ok((key, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    trace!("key {key:08x} taken on disk, skipping");
                }
                Err(e) => return Err(Self::io_err(&path)(e)),
            }
        }
    }
}

impl BufferManager for ShmBufferManager {
    fn acquire(&self) -> Result<(), BufferError> {
        std::fs::create_dir_all(&self.dir).map_err(Self::io_err(&self.dir))?;
        self.lock().refs += 1;
        Ok(())
    }

    fn release(&self) {
        let mut state = self.lock();
        state.refs = state.refs.saturating_sub(1);
    }

    fn alloc(&self, size: usize) -> Result<BufferHandle, BufferError> {
        if size == 0 {
            return Err(BufferError::InvalidSize(size));
        }

        let mut state = self.lock();
        if state.refs == 0 {
            return Err(BufferError::NotAcquired);
        }

        let (key, file) = self.create_backing(&mut state)?;
        let path = self.path_for(key);
        if let Err(e) = file.set_len(size as u64) {
            let _ = std::fs::remove_file(&path);
            return Err(Self::io_err(&path)(e));
        }

        *state.live.entry(key).or_default() += 1;
        debug!("allocated buffer {key:08x} ({size} bytes)");
        Ok(BufferHandle {
            key,
            size,
            imported: false,
        })
    }

    fn map(&self, buffer: &BufferHandle, access: Access) -> Result<BufferMapping, BufferError> {
        let path = self.path_for(buffer.key);
        let file = OpenOptions::new()
            .read(true)
            .write(access == Access::ReadWrite)
            .open(&path)
            .map_err(Self::io_err(&path))?;

        // SAFETY: the backing file is private to the two peers, sized once at
        // alloc and never truncated while a handle is live.
        let map = unsafe {
            match access {
                Access::Read => MappingKind::Read(
                    MmapOptions::new()
                        .len(buffer.size)
                        .map(&file)
                        .map_err(Self::io_err(&path))?,
                ),
                Access::ReadWrite => MappingKind::ReadWrite(
                    MmapOptions::new()
                        .len(buffer.size)
                        .map_mut(&file)
                        .map_err(Self::io_err(&path))?,
                ),
            }
        };

        Ok(BufferMapping {
            key: buffer.key,
            map,
        })
    }

    fn export(&self, buffer: &BufferHandle) -> Result<ExportKey, BufferError> {
        if buffer.key == 0 || !self.lock().live.contains_key(&buffer.key) {
            return Err(BufferError::ExportFailed(buffer.key));
        }
        Ok(buffer.key)
    }

    fn import(&self, key: ExportKey) -> Result<BufferHandle, BufferError> {
        if key == 0 {
            return Err(BufferError::UnknownKey(key));
        }
        let path = self.path_for(key);
        let meta = std::fs::metadata(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => BufferError::UnknownKey(key),
            _ => Self::io_err(&path)(e),
        })?;

        *self.lock().live.entry(key).or_default() += 1;
        Ok(BufferHandle {
            key,
            size: meta.len() as usize,
            imported: true,
        })
    }

    fn unmap(&self, mapping: BufferMapping) {
        if let MappingKind::ReadWrite(m) = &mapping.map {
            if let Err(e) = m.flush() {
                warn!("flush of buffer {:08x} failed: {}", mapping.key, e);
            }
        }
        drop(mapping);
    }

    fn unref(&self, buffer: BufferHandle) {
        let mut state = self.lock();
        if let Some(count) = state.live.get_mut(&buffer.key) {
            *count -= 1;
            if *count == 0 {
                state.live.remove(&buffer.key);
            }
        }

        // The allocating side owns the backing file.
        if !buffer.imported {
            let path = self.path_for(buffer.key);
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("failed to remove {}: {}", path.display(), e);
            }
        }
    }

    fn live_buffers(&self) -> usize {
        self.lock().live.values().sum()
    }
}
