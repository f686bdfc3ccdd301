//! Per-connection recorder session.
//!
//! A session exists from a successful CREATE until DESTROY or shutdown. It
//! owns the engine, a reference on the buffer manager, and the registry of
//! buffers exported to the client.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use recproto::{BufferManager, RecorderError, RecorderType};
use tracing::{info, warn};

use crate::bridge::{EventSink, StreamBridge};
use crate::engine::{EngineFactory, RecorderEngine};
use crate::registry::BufferRegistry;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(0x5e55_0000);

/// CREATE sub-mode with its mode-specific argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Audio { pid: u32 },
    Video { camera: u64 },
}

impl CreateMode {
    pub fn kind(self) -> RecorderType {
        match self {
            CreateMode::Audio { .. } => RecorderType::Audio,
            CreateMode::Video { .. } => RecorderType::Video,
        }
    }
}

pub struct Session {
    handle: u64,
    kind: RecorderType,
    engine: Box<dyn RecorderEngine>,
    buffers: Arc<dyn BufferManager>,
    registry: Arc<BufferRegistry>,
    torn_down: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("handle", &format_args!("{:#x}", self.handle))
            .field("kind", &self.kind)
            .field("exported", &self.registry.len())
            .finish()
    }
}

/// Destroy an engine that never became part of a session.
fn discard(engine: Box<dyn RecorderEngine>) {
    if let Err(e) = engine.destroy() {
        warn!("failed to destroy half-built engine: {}", e);
    }
}

impl Session {
    /// Build the engine, then take a buffer-manager reference. Either both
    /// succeed or nothing is left behind.
    pub fn create(
        factory: &dyn EngineFactory,
        buffers: Arc<dyn BufferManager>,
        mode: CreateMode,
    ) -> Result<Arc<Self>, RecorderError> {
        let engine = match mode {
            CreateMode::Video { camera: 0 } => {
                return Err(RecorderError::invalid_parameter("null camera handle"));
            }
            CreateMode::Video { camera } => factory.create_video(camera)?,
            CreateMode::Audio { .. } => factory.create_audio()?,
        };

        if let CreateMode::Audio { pid } = mode {
            let bound = i32::try_from(pid)
                .map_err(|_| RecorderError::invalid_parameter(format!("pid out of range: {pid}")))
                .and_then(|pid| engine.set_client_pid(pid).map_err(RecorderError::from));
            if let Err(e) = bound {
                discard(engine);
                return Err(e);
            }
        }

        if let Err(e) = buffers.acquire() {
            warn!("buffer manager unavailable: {}", e);
            discard(engine);
            return Err(RecorderError::invalid_operation("buffer manager unavailable"));
        }

        let handle = NEXT_HANDLE.fetch_add(0x10, Ordering::Relaxed);
        info!("session {:#x} created ({:?})", handle, mode);

        Ok(Arc::new(Self {
            handle,
            kind: mode.kind(),
            engine,
            registry: Arc::new(BufferRegistry::new(Arc::clone(&buffers))),
            buffers,
            torn_down: AtomicBool::new(false),
        }))
    }

    /// Opaque handle the client presents with later calls.
    pub fn handle(&self) -> u64 {
        self.handle
    }

    pub fn kind(&self) -> RecorderType {
        self.kind
    }

    pub fn engine(&self) -> &dyn RecorderEngine {
        self.engine.as_ref()
    }

    pub fn registry(&self) -> &Arc<BufferRegistry> {
        &self.registry
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Audio delivery path bound to this session's buffers and `sink`.
    pub fn stream_bridge(&self, sink: EventSink) -> StreamBridge {
        StreamBridge::new(Arc::clone(&self.buffers), Arc::clone(&self.registry), sink)
    }

    /// DESTROY: the engine must go first. If it refuses, the session stays
    /// intact and usable.
    pub fn destroy(&self) -> Result<(), RecorderError> {
        if self.is_torn_down() {
            return Err(RecorderError::invalid_operation("session already destroyed"));
        }
        self.engine.destroy()?;
        self.release_resources();
        info!("session {:#x} destroyed", self.handle);
        Ok(())
    }

    /// Empty the registry and drop the buffer-manager reference. Runs at
    /// most once; later calls return false.
    pub fn release_resources(&self) -> bool {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.registry.remove_all();
        self.buffers.release();
        true
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.release_resources() {
            warn!("session {:#x} dropped without teardown", self.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, SoftEngineFactory};
    use recproto::{RecorderState, ResultCode, ShmBufferManager};

    struct FailingFactory;

    impl EngineFactory for FailingFactory {
        fn create_audio(&self) -> Result<Box<dyn RecorderEngine>, EngineError> {
            Err(EngineError::OutOfMemory)
        }

        fn create_video(&self, _camera: u64) -> Result<Box<dyn RecorderEngine>, EngineError> {
            Err(EngineError::Other(-5))
        }
    }

    fn buffers() -> (tempfile::TempDir, Arc<ShmBufferManager>) {
        let dir = tempfile::tempdir().unwrap();
        let mgr = Arc::new(ShmBufferManager::new(dir.path()));
        (dir, mgr)
    }

    #[test]
    fn create_then_destroy() {
        let (_dir, mgr) = buffers();
        let session =
            Session::create(&SoftEngineFactory::new(), mgr.clone(), CreateMode::Audio { pid: 77 })
                .unwrap();
        assert_eq!(session.kind(), RecorderType::Audio);
        assert_eq!(session.engine().state().unwrap(), RecorderState::Created);

        session.destroy().unwrap();
        assert!(session.is_torn_down());
        assert_eq!(
            session.destroy().unwrap_err().code(),
            ResultCode::InvalidOperation
        );
        // Reference dropped: further allocation is refused.
        assert!(mgr.alloc(8).is_err());
    }

    #[test]
    fn rejected_pid_leaves_nothing_behind() {
        let (_dir, mgr) = buffers();
        let err = Session::create(&SoftEngineFactory::new(), mgr.clone(), CreateMode::Audio { pid: 0 })
            .unwrap_err();
        assert_eq!(err.code(), ResultCode::InvalidParameter);
        // The engine was built and discarded before any reference was taken.
        assert!(mgr.alloc(1).is_err());
    }

    #[test]
    fn handles_are_distinct() {
        let (_dir, mgr) = buffers();
        let factory = SoftEngineFactory::new();
        let a = Session::create(&factory, mgr.clone(), CreateMode::Audio { pid: 1 }).unwrap();
        let b = Session::create(&factory, mgr.clone(), CreateMode::Video { camera: 9 }).unwrap();
        assert_ne!(a.handle(), b.handle());
        a.destroy().unwrap();
        b.destroy().unwrap();
    }

    #[test]
    fn null_camera_is_rejected_before_engine() {
        let (_dir, mgr) = buffers();
        let err = Session::create(&FailingFactory, mgr, CreateMode::Video { camera: 0 }).unwrap_err();
        assert_eq!(err.code(), ResultCode::InvalidParameter);
    }

    #[test]
    fn engine_failure_propagates() {
        let (_dir, mgr) = buffers();
        let err = Session::create(&FailingFactory, mgr.clone(), CreateMode::Video { camera: 3 })
            .unwrap_err();
        assert_eq!(err.code(), ResultCode::Engine(-5));
        assert!(mgr.alloc(8).is_err());
    }

    #[test]
    fn destroy_refused_by_engine_keeps_session() {
        let (_dir, mgr) = buffers();
        let session =
            Session::create(&SoftEngineFactory::new(), mgr.clone(), CreateMode::Audio { pid: 5 })
                .unwrap();
        session.engine().prepare().unwrap();

        assert_eq!(
            session.destroy().unwrap_err().code(),
            ResultCode::InvalidOperation
        );
        assert!(!session.is_torn_down());
        let scratch = mgr.alloc(8).unwrap();
        mgr.unref(scratch);

        session.engine().unprepare().unwrap();
        session.destroy().unwrap();
    }
}
