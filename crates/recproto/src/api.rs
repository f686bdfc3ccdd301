//! API and event identifiers.
//!
//! Both are dense `u16` enumerations. The API id is the dispatch table index
//! and the wire discriminator of Call/Return frames; the event id plays the
//! same role for Event frames. Each id carries a fixed [`ExecutionClass`].

use serde::{Deserialize, Serialize};

use crate::frame::FrameError;

/// Which queue an operation or event is delivered on.
///
/// Immediate work runs inline on the dispatch loop. Worker work may block
/// (enumerations, audio-stream delivery) and runs off the loop, on a queue of
/// its own so it never stalls immediate replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionClass {
    Immediate,
    Worker,
}

macro_rules! dense_ids {
    (
        $(#[$meta:meta])*
        pub enum $ty:ident {
            $($variant:ident = $value:literal => $name:literal, $class:ident;)*
        }
    ) => {
        $(#[$meta])*
        #[repr(u16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $ty {
            $($variant = $value,)*
        }

        impl $ty {
            /// Every id, in wire order. `ALL[i] as u16 == i`.
            pub const ALL: &'static [$ty] = &[$($ty::$variant,)*];

            /// Number of ids; one past the largest wire value.
            pub const COUNT: usize = Self::ALL.len();

            pub fn to_u16(self) -> u16 {
                self as u16
            }

            /// Snake-case name used in logs.
            pub fn name(self) -> &'static str {
                match self {
                    $($ty::$variant => $name,)*
                }
            }

            pub fn class(self) -> ExecutionClass {
                match self {
                    $($ty::$variant => ExecutionClass::$class,)*
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

dense_ids! {
    /// Recorder control operations.
    pub enum ApiId {
        Create = 0 => "create", Immediate;
        Destroy = 1 => "destroy", Immediate;
        GetState = 2 => "get_state", Immediate;
        Prepare = 3 => "prepare", Immediate;
        Unprepare = 4 => "unprepare", Immediate;
        Start = 5 => "start", Immediate;
        Pause = 6 => "pause", Immediate;
        Commit = 7 => "commit", Immediate;
        Cancel = 8 => "cancel", Immediate;
        SetVideoResolution = 9 => "set_video_resolution", Immediate;
        GetVideoResolution = 10 => "get_video_resolution", Immediate;
        ForeachSupportedVideoResolution = 11 => "foreach_supported_video_resolution", Worker;
        GetAudioLevel = 12 => "get_audio_level", Immediate;
        SetFilename = 13 => "set_filename", Immediate;
        GetFilename = 14 => "get_filename", Immediate;
        SetFileFormat = 15 => "set_file_format", Immediate;
        GetFileFormat = 16 => "get_file_format", Immediate;
        SetStateChangedCb = 17 => "set_state_changed_cb", Immediate;
        UnsetStateChangedCb = 18 => "unset_state_changed_cb", Immediate;
        SetInterruptedCb = 19 => "set_interrupted_cb", Immediate;
        UnsetInterruptedCb = 20 => "unset_interrupted_cb", Immediate;
        SetAudioStreamCb = 21 => "set_audio_stream_cb", Immediate;
        UnsetAudioStreamCb = 22 => "unset_audio_stream_cb", Immediate;
        SetErrorCb = 23 => "set_error_cb", Immediate;
        UnsetErrorCb = 24 => "unset_error_cb", Immediate;
        SetRecordingStatusCb = 25 => "set_recording_status_cb", Immediate;
        UnsetRecordingStatusCb = 26 => "unset_recording_status_cb", Immediate;
        SetRecordingLimitReachedCb = 27 => "set_recording_limit_reached_cb", Immediate;
        UnsetRecordingLimitReachedCb = 28 => "unset_recording_limit_reached_cb", Immediate;
        ForeachSupportedFileFormat = 29 => "foreach_supported_file_format", Worker;
        AttrSetSizeLimit = 30 => "attr_set_size_limit", Immediate;
        AttrSetTimeLimit = 31 => "attr_set_time_limit", Immediate;
        AttrSetAudioDevice = 32 => "attr_set_audio_device", Immediate;
        SetAudioEncoder = 33 => "set_audio_encoder", Immediate;
        GetAudioEncoder = 34 => "get_audio_encoder", Immediate;
        SetVideoEncoder = 35 => "set_video_encoder", Immediate;
        GetVideoEncoder = 36 => "get_video_encoder", Immediate;
        AttrSetAudioSamplerate = 37 => "attr_set_audio_samplerate", Immediate;
        AttrSetAudioEncoderBitrate = 38 => "attr_set_audio_encoder_bitrate", Immediate;
        AttrSetVideoEncoderBitrate = 39 => "attr_set_video_encoder_bitrate", Immediate;
        AttrGetSizeLimit = 40 => "attr_get_size_limit", Immediate;
        AttrGetTimeLimit = 41 => "attr_get_time_limit", Immediate;
        AttrGetAudioDevice = 42 => "attr_get_audio_device", Immediate;
        AttrGetAudioSamplerate = 43 => "attr_get_audio_samplerate", Immediate;
        AttrGetAudioEncoderBitrate = 44 => "attr_get_audio_encoder_bitrate", Immediate;
        AttrGetVideoEncoderBitrate = 45 => "attr_get_video_encoder_bitrate", Immediate;
        ForeachSupportedAudioEncoder = 46 => "foreach_supported_audio_encoder", Worker;
        ForeachSupportedVideoEncoder = 47 => "foreach_supported_video_encoder", Worker;
        AttrSetMute = 48 => "attr_set_mute", Immediate;
        AttrIsMuted = 49 => "attr_is_muted", Immediate;
        AttrSetRecordingMotionRate = 50 => "attr_set_recording_motion_rate", Immediate;
        AttrGetRecordingMotionRate = 51 => "attr_get_recording_motion_rate", Immediate;
        AttrSetAudioChannel = 52 => "attr_set_audio_channel", Immediate;
        AttrGetAudioChannel = 53 => "attr_get_audio_channel", Immediate;
        AttrSetOrientationTag = 54 => "attr_set_orientation_tag", Immediate;
        AttrGetOrientationTag = 55 => "attr_get_orientation_tag", Immediate;
        AttrSetRootDirectory = 56 => "attr_set_root_directory", Immediate;
        ReturnBuffer = 57 => "return_buffer", Immediate;
        SetSoundStreamInfo = 58 => "set_sound_stream_info", Immediate;
    }
}

dense_ids! {
    /// Asynchronous notifications pushed from daemon to client.
    pub enum EventId {
        StateChange = 0 => "state_change", Immediate;
        RecordingLimited = 1 => "recording_limited", Immediate;
        RecordingStatus = 2 => "recording_status", Immediate;
        Interrupted = 3 => "interrupted", Immediate;
        AudioStream = 4 => "audio_stream", Worker;
        Error = 5 => "error", Immediate;
        ForeachSupportedAudioEncoder = 6 => "foreach_supported_audio_encoder", Worker;
        ForeachSupportedFileFormat = 7 => "foreach_supported_file_format", Worker;
        ForeachSupportedVideoEncoder = 8 => "foreach_supported_video_encoder", Worker;
        ForeachSupportedVideoResolution = 9 => "foreach_supported_video_resolution", Worker;
    }
}

/// Number of dispatchable APIs.
pub const API_COUNT: usize = ApiId::COUNT;

impl ApiId {
    /// Look up an API by wire value. Out-of-range ids are a protocol error,
    /// never a fault.
    pub fn from_u16(value: u16) -> Result<Self, FrameError> {
        Self::ALL
            .get(value as usize)
            .copied()
            .ok_or(FrameError::UnknownApi(value))
    }

    /// True for the APIs that register an engine callback.
    pub fn is_callback_registration(self) -> bool {
        matches!(
            self,
            ApiId::SetStateChangedCb
                | ApiId::SetInterruptedCb
                | ApiId::SetAudioStreamCb
                | ApiId::SetErrorCb
                | ApiId::SetRecordingStatusCb
                | ApiId::SetRecordingLimitReachedCb
        )
    }
}

impl EventId {
    pub fn from_u16(value: u16) -> Result<Self, FrameError> {
        Self::ALL
            .get(value as usize)
            .copied()
            .ok_or(FrameError::UnknownEvent(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_ids_are_dense() {
        assert_eq!(API_COUNT, 59);
        for (i, api) in ApiId::ALL.iter().enumerate() {
            assert_eq!(api.to_u16() as usize, i, "{api} out of place");
            assert_eq!(ApiId::from_u16(i as u16).unwrap(), *api);
        }
    }

    #[test]
    fn event_ids_are_dense() {
        assert_eq!(EventId::COUNT, 10);
        for (i, event) in EventId::ALL.iter().enumerate() {
            assert_eq!(event.to_u16() as usize, i);
        }
    }

    #[test]
    fn out_of_range_ids_are_errors() {
        assert!(matches!(
            ApiId::from_u16(59),
            Err(FrameError::UnknownApi(59))
        ));
        assert!(matches!(
            ApiId::from_u16(u16::MAX),
            Err(FrameError::UnknownApi(_))
        ));
        assert!(matches!(
            EventId::from_u16(10),
            Err(FrameError::UnknownEvent(10))
        ));
    }

    #[test]
    fn worker_class_assignment() {
        let worker_apis: Vec<ApiId> = ApiId::ALL
            .iter()
            .copied()
            .filter(|a| a.class() == ExecutionClass::Worker)
            .collect();
        assert_eq!(
            worker_apis,
            vec![
                ApiId::ForeachSupportedVideoResolution,
                ApiId::ForeachSupportedFileFormat,
                ApiId::ForeachSupportedAudioEncoder,
                ApiId::ForeachSupportedVideoEncoder,
            ]
        );

        assert_eq!(EventId::AudioStream.class(), ExecutionClass::Worker);
        assert_eq!(EventId::StateChange.class(), ExecutionClass::Immediate);
        assert_eq!(EventId::Error.class(), ExecutionClass::Immediate);
        assert_eq!(
            EventId::ForeachSupportedFileFormat.class(),
            ExecutionClass::Worker
        );
    }

    #[test]
    fn names_for_logging() {
        assert_eq!(ApiId::AttrSetRootDirectory.name(), "attr_set_root_directory");
        assert_eq!(EventId::AudioStream.to_string(), "audio_stream");
    }
}
