//! Recorder engine boundary.
//!
//! The daemon never records anything itself. It drives a [`RecorderEngine`]
//! per session and relays what the engine reports. [`soft::SoftRecorder`] is
//! the bundled stand-in: it honours the state machine and produces silent
//! PCM, nothing more.

pub mod soft;

use std::sync::Arc;

use recproto::{
    AudioCodec, AudioDevice, FileFormat, InterruptPolicy, LimitType, RecorderError, RecorderState,
    Rotation, SampleFormat, VideoCodec,
};
use thiserror::Error;

pub use soft::{SoftEngineFactory, SoftRecorder};

/// Failure reported by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("invalid parameter")]
    InvalidParameter,
    #[error("operation not allowed in current state")]
    InvalidState,
    #[error("invalid operation")]
    InvalidOperation,
    #[error("out of memory")]
    OutOfMemory,
    #[error("permission denied")]
    PermissionDenied,
    #[error("engine error {0}")]
    Other(i32),
}

impl From<EngineError> for RecorderError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidParameter => RecorderError::invalid_parameter("rejected by engine"),
            EngineError::InvalidState => RecorderError::invalid_operation("engine state"),
            EngineError::InvalidOperation => RecorderError::invalid_operation("rejected by engine"),
            EngineError::OutOfMemory => RecorderError::OutOfMemory,
            EngineError::PermissionDenied => RecorderError::PermissionDenied("engine".into()),
            EngineError::Other(code) => RecorderError::Engine(code),
        }
    }
}

/// One chunk of captured audio, borrowed for the duration of the callback.
#[derive(Debug)]
pub struct AudioFrame<'a> {
    pub data: &'a [u8],
    pub format: SampleFormat,
    pub channels: u32,
    /// Milliseconds since recording started.
    pub timestamp: u32,
}

pub type StateChangedFn = dyn Fn(RecorderState, RecorderState, bool) + Send + Sync;
pub type InterruptedFn = dyn Fn(InterruptPolicy, RecorderState, RecorderState) + Send + Sync;
pub type ErrorFn = dyn Fn(i32, RecorderState) + Send + Sync;
/// (elapsed milliseconds, file size in kilobytes)
pub type RecordingStatusFn = dyn Fn(u64, u64) + Send + Sync;
pub type LimitReachedFn = dyn Fn(LimitType) + Send + Sync;
pub type AudioStreamFn = dyn Fn(&AudioFrame<'_>) + Send + Sync;

/// A callback the engine invokes from any thread.
#[derive(Clone)]
pub enum EngineCallback {
    StateChanged(Arc<StateChangedFn>),
    Interrupted(Arc<InterruptedFn>),
    Error(Arc<ErrorFn>),
    RecordingStatus(Arc<RecordingStatusFn>),
    RecordingLimitReached(Arc<LimitReachedFn>),
    AudioStream(Arc<AudioStreamFn>),
}

impl EngineCallback {
    pub fn kind(&self) -> CallbackKind {
        match self {
            EngineCallback::StateChanged(_) => CallbackKind::StateChanged,
            EngineCallback::Interrupted(_) => CallbackKind::Interrupted,
            EngineCallback::Error(_) => CallbackKind::Error,
            EngineCallback::RecordingStatus(_) => CallbackKind::RecordingStatus,
            EngineCallback::RecordingLimitReached(_) => CallbackKind::RecordingLimitReached,
            EngineCallback::AudioStream(_) => CallbackKind::AudioStream,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    StateChanged,
    Interrupted,
    Error,
    RecordingStatus,
    RecordingLimitReached,
    AudioStream,
}

/// Enumeration visitor; return `false` to stop early.
pub type Visit<'a, T> = &'a mut dyn FnMut(T) -> bool;

/// The per-session recorder engine.
///
/// Methods take `&self`; implementations synchronise internally so that
/// callbacks may fire from engine threads while calls are in flight.
pub trait RecorderEngine: Send + Sync {
    /// Bind the engine to the client process that owns it (audio sessions).
    fn set_client_pid(&self, pid: i32) -> Result<(), EngineError>;
    fn destroy(&self) -> Result<(), EngineError>;

    fn state(&self) -> Result<RecorderState, EngineError>;
    fn prepare(&self) -> Result<(), EngineError>;
    fn unprepare(&self) -> Result<(), EngineError>;
    fn start(&self) -> Result<(), EngineError>;
    fn pause(&self) -> Result<(), EngineError>;
    fn commit(&self) -> Result<(), EngineError>;
    fn cancel(&self) -> Result<(), EngineError>;

    fn set_video_resolution(&self, width: i32, height: i32) -> Result<(), EngineError>;
    fn video_resolution(&self) -> Result<(i32, i32), EngineError>;
    fn foreach_supported_video_resolution(&self, visit: Visit<'_, (i32, i32)>) -> Result<(), EngineError>;

    fn audio_level(&self) -> Result<f64, EngineError>;

    fn set_filename(&self, path: &str) -> Result<(), EngineError>;
    fn filename(&self) -> Result<String, EngineError>;
    fn set_file_format(&self, format: FileFormat) -> Result<(), EngineError>;
    fn file_format(&self) -> Result<FileFormat, EngineError>;
    fn foreach_supported_file_format(&self, visit: Visit<'_, FileFormat>) -> Result<(), EngineError>;

    fn set_callback(&self, callback: EngineCallback) -> Result<(), EngineError>;
    fn unset_callback(&self, kind: CallbackKind) -> Result<(), EngineError>;

    fn set_size_limit(&self, kbyte: i32) -> Result<(), EngineError>;
    fn size_limit(&self) -> Result<i32, EngineError>;
    fn set_time_limit(&self, second: i32) -> Result<(), EngineError>;
    fn time_limit(&self) -> Result<i32, EngineError>;

    fn set_audio_device(&self, device: AudioDevice) -> Result<(), EngineError>;
    fn audio_device(&self) -> Result<AudioDevice, EngineError>;
    fn set_audio_encoder(&self, codec: AudioCodec) -> Result<(), EngineError>;
    fn audio_encoder(&self) -> Result<AudioCodec, EngineError>;
    fn foreach_supported_audio_encoder(&self, visit: Visit<'_, AudioCodec>) -> Result<(), EngineError>;
    fn set_video_encoder(&self, codec: VideoCodec) -> Result<(), EngineError>;
    fn video_encoder(&self) -> Result<VideoCodec, EngineError>;
    fn foreach_supported_video_encoder(&self, visit: Visit<'_, VideoCodec>) -> Result<(), EngineError>;

    fn set_audio_samplerate(&self, hz: i32) -> Result<(), EngineError>;
    fn audio_samplerate(&self) -> Result<i32, EngineError>;
    fn set_audio_encoder_bitrate(&self, bps: i32) -> Result<(), EngineError>;
    fn audio_encoder_bitrate(&self) -> Result<i32, EngineError>;
    fn set_video_encoder_bitrate(&self, bps: i32) -> Result<(), EngineError>;
    fn video_encoder_bitrate(&self) -> Result<i32, EngineError>;

    fn set_mute(&self, enable: bool) -> Result<(), EngineError>;
    fn is_muted(&self) -> Result<bool, EngineError>;
    fn set_recording_motion_rate(&self, rate: f64) -> Result<(), EngineError>;
    fn recording_motion_rate(&self) -> Result<f64, EngineError>;
    fn set_audio_channel(&self, channels: i32) -> Result<(), EngineError>;
    fn audio_channel(&self) -> Result<i32, EngineError>;
    fn set_orientation_tag(&self, rotation: Rotation) -> Result<(), EngineError>;
    fn orientation_tag(&self) -> Result<Rotation, EngineError>;
    fn set_root_directory(&self, path: &str) -> Result<(), EngineError>;
    fn set_sound_stream_info(&self, stream_type: &str, index: i32) -> Result<(), EngineError>;
}

/// Builds engines for CREATE.
pub trait EngineFactory: Send + Sync {
    fn create_audio(&self) -> Result<Box<dyn RecorderEngine>, EngineError>;
    /// `camera` is the client's camera handle; zero is never valid.
    fn create_video(&self, camera: u64) -> Result<Box<dyn RecorderEngine>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use recproto::ResultCode;

    #[test]
    fn engine_errors_translate() {
        assert_eq!(
            RecorderError::from(EngineError::InvalidState).code(),
            ResultCode::InvalidOperation
        );
        assert_eq!(
            RecorderError::from(EngineError::InvalidParameter).code(),
            ResultCode::InvalidParameter
        );
        assert_eq!(
            RecorderError::from(EngineError::Other(-7)).code(),
            ResultCode::Engine(-7)
        );
        assert_eq!(
            RecorderError::from(EngineError::PermissionDenied).code(),
            ResultCode::PermissionDenied
        );
    }
}
