//! recorderd: recorder daemon
//!
//! Clients drive a recorder engine living in this process over a ZMQ ROUTER
//! socket. Each client connection owns at most one [`Session`]; calls are
//! routed through a dense [`DispatchTable`] and engine callbacks come back as
//! Events. Audio frames travel through shared buffers exported by key.
//!
//! - [`engine`]: the engine boundary and the bundled [`SoftRecorder`]
//! - [`registry`]: buffers exported to the client and not yet returned
//! - [`session`]: create/destroy with all-or-nothing setup
//! - [`bridge`]: callback to Event translation, immediate and worker queues
//! - [`dispatch`]: one handler per API
//! - [`shutdown`]: walks an abandoned engine down to destroyed
//! - [`server`]: the socket loop

pub mod bridge;
pub mod dispatch;
pub mod engine;
pub mod privilege;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;

pub use bridge::{event_queues, EventQueues, EventSink, QueueSenders, StreamBridge};
pub use dispatch::{ApiHandler, CallContext, DispatchTable, Services, SessionSlot};
pub use engine::{EngineError, EngineFactory, RecorderEngine, SoftEngineFactory, SoftRecorder};
pub use privilege::{PeerCredentials, PrivilegeChecker, StaticPrivileges};
pub use registry::{BufferRegistry, ExportedBuffer};
pub use server::{Server, ServerConfig};
pub use session::{CreateMode, Session};
pub use shutdown::{shutdown_session, ShutdownReport};
