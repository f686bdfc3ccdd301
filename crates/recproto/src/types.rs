//! Recorder attribute enumerations and their integer wire values.

use crate::error::RecorderError;

/// An enumeration carried on the wire as a plain integer.
pub trait WireEnum: Sized + Copy {
    const NAME: &'static str;

    fn from_i32(value: i32) -> Option<Self>;
    fn to_i32(self) -> i32;

    /// Decode, rejecting values outside the enumeration.
    fn decode(value: i64) -> Result<Self, RecorderError> {
        i32::try_from(value)
            .ok()
            .and_then(Self::from_i32)
            .ok_or_else(|| {
                RecorderError::invalid_parameter(format!("{} out of range: {}", Self::NAME, value))
            })
    }
}

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $ty:ident as $name:literal {
            $($variant:ident = $value:literal,)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $ty {
            $($variant,)*
        }

        impl $ty {
            pub const ALL: &'static [$ty] = &[$($ty::$variant,)*];
        }

        impl WireEnum for $ty {
            const NAME: &'static str = $name;

            fn from_i32(value: i32) -> Option<Self> {
                match value {
                    $($value => Some($ty::$variant),)*
                    _ => None,
                }
            }

            fn to_i32(self) -> i32 {
                match self {
                    $($ty::$variant => $value,)*
                }
            }
        }
    };
}

wire_enum! {
    /// Engine state as reported by GET_STATE and state-change events.
    pub enum RecorderState as "recorder state" {
        None = 0,
        Created = 1,
        Ready = 2,
        Recording = 3,
        Paused = 4,
    }
}

wire_enum! {
    /// CREATE sub-mode.
    pub enum RecorderType as "recorder type" {
        Audio = 0,
        Video = 1,
    }
}

wire_enum! {
    pub enum FileFormat as "file format" {
        ThreeGp = 0,
        Mp4 = 1,
        Amr = 2,
        Adts = 3,
        Wav = 4,
        Ogg = 5,
        M2ts = 6,
    }
}

wire_enum! {
    pub enum AudioCodec as "audio codec" {
        Disabled = -1,
        Amr = 0,
        Aac = 1,
        Vorbis = 2,
        Pcm = 3,
        Mp3 = 4,
    }
}

wire_enum! {
    pub enum VideoCodec as "video codec" {
        H263 = 0,
        H264 = 1,
        Mpeg4 = 2,
        Theora = 3,
    }
}

wire_enum! {
    pub enum AudioDevice as "audio device" {
        Mic = 0,
        Modem = 1,
    }
}

wire_enum! {
    /// Orientation tag written into the container.
    pub enum Rotation as "rotation" {
        None = 0,
        Deg90 = 1,
        Deg180 = 2,
        Deg270 = 3,
    }
}

wire_enum! {
    /// Which limit stopped a recording.
    pub enum LimitType as "limit type" {
        Time = 0,
        Size = 1,
        FreeSpace = 2,
    }
}

wire_enum! {
    /// Why the engine interrupted a recording.
    pub enum InterruptPolicy as "interrupt policy" {
        None = 0,
        Sound = 1,
        Security = 2,
        ResourceConflict = 3,
    }
}

wire_enum! {
    /// PCM sample layout of audio-stream frames.
    pub enum SampleFormat as "sample format" {
        U8 = 0,
        S16Le = 1,
    }
}

impl RecorderState {
    /// True while the engine holds an open output file.
    pub fn is_recording(self) -> bool {
        matches!(self, RecorderState::Recording | RecorderState::Paused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_known_values() {
        assert_eq!(RecorderState::decode(3).unwrap(), RecorderState::Recording);
        assert_eq!(AudioCodec::decode(-1).unwrap(), AudioCodec::Disabled);
        assert_eq!(FileFormat::decode(6).unwrap(), FileFormat::M2ts);
    }

    #[test]
    fn decode_rejects_unknown_values() {
        assert!(matches!(
            FileFormat::decode(7),
            Err(RecorderError::InvalidParameter(_))
        ));
        assert!(RecorderType::decode(i64::from(i32::MAX) + 1).is_err());
        assert!(Rotation::decode(-1).is_err());
    }

    #[test]
    fn wire_values_are_stable() {
        for codec in AudioCodec::ALL {
            assert_eq!(AudioCodec::from_i32(codec.to_i32()), Some(*codec));
        }
        assert_eq!(VideoCodec::Theora.to_i32(), 3);
        assert_eq!(LimitType::FreeSpace.to_i32(), 2);
    }
}
