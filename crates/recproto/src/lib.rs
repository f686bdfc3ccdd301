//! recproto - wire protocol for the recorder daemon
//!
//! Clients issue recorder control calls over ZMQ to a daemon that owns the
//! recorder engine. This crate holds what both sides agree on:
//!
//! - [`ApiId`] / [`EventId`]: dense identifiers with an [`ExecutionClass`]
//! - [`Value`] and the positional [`Args`] reader
//! - [`Call`] / [`Return`] / [`Event`] over the RECD01 [`RecFrame`] format
//! - [`ResultCode`] / [`RecorderError`]
//! - the shared-buffer channel ([`BufferManager`], [`ShmBufferManager`])
//! - with the `peer` feature, socket helpers and [`RecorderClient`]

pub mod api;
pub mod buffer;
pub mod error;
pub mod frame;
pub mod message;
pub mod types;
pub mod value;

#[cfg(feature = "peer")]
pub mod client;
#[cfg(feature = "peer")]
pub mod socket;

pub use api::{ApiId, EventId, ExecutionClass, API_COUNT};
pub use buffer::{
    Access, BufferError, BufferHandle, BufferManager, BufferMapping, ExportKey, ShmBufferManager,
};
pub use error::{RecorderError, ResultCode};
pub use frame::{FrameError, Kind, RecFrame, FRAME_COUNT, PROTOCOL_VERSION};
pub use message::{Call, CallBody, Event, EventBody, Return, ReturnBody};
pub use types::{
    AudioCodec, AudioDevice, FileFormat, InterruptPolicy, LimitType, RecorderState, RecorderType,
    Rotation, SampleFormat, VideoCodec, WireEnum,
};
pub use value::{Args, Value, MAX_STRING_LEN};

#[cfg(feature = "peer")]
pub use client::{ClientError, RecorderClient};
