//! RECD01 Frame Protocol
//!
//! ## Wire Format
//!
//! A RECD01 message is a 5-frame ZMQ multipart message:
//!
//! ```text
//! Frame 0: Protocol version    "RECD01" (6 bytes)
//! Frame 1: Kind                2 bytes (big-endian u16)
//! Frame 2: Id                  2 bytes (big-endian u16, ApiId or EventId)
//! Frame 3: Request ID          16 bytes (UUID, nil for events)
//! Frame 4: Body                MessagePack (may be empty)
//! ```
//!
//! ## ROUTER Socket Handling
//!
//! ROUTER sockets prepend identity frame(s). We scan for "RECD01" to find
//! frame 0 and hand the identity back for reply routing.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

/// Protocol version - bump on breaking changes
pub const PROTOCOL_VERSION: &[u8] = b"RECD01";

/// Number of frames in a RECD01 message (excluding identity prefix)
pub const FRAME_COUNT: usize = 5;

/// Message kinds (2 bytes, big-endian)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Client invokes an API (client -> daemon)
    Call = 0x0001,
    /// Exactly one per Call (daemon -> client)
    Return = 0x0002,
    /// Engine notification (daemon -> client)
    Event = 0x0003,
    /// Liveness ping, echoed by the daemon
    Heartbeat = 0x0004,
    /// Client is going away; its session is torn down
    Disconnect = 0x0005,
}

impl Kind {
    pub fn from_u16(value: u16) -> Result<Self, FrameError> {
        match value {
            0x0001 => Ok(Kind::Call),
            0x0002 => Ok(Kind::Return),
            0x0003 => Ok(Kind::Event),
            0x0004 => Ok(Kind::Heartbeat),
            0x0005 => Ok(Kind::Disconnect),
            other => Err(FrameError::InvalidKind(other)),
        }
    }

    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// A parsed RECD01 multipart ZMQ message
#[derive(Debug, Clone, PartialEq)]
pub struct RecFrame {
    pub kind: Kind,
    /// Raw id; validated against ApiId/EventId by the message layer so an
    /// unknown id can still be answered.
    pub id: u16,
    pub request_id: Uuid,
    pub body: Bytes,
}

/// Errors during frame parsing
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Invalid protocol version: expected RECD01")]
    InvalidProtocol,
    #[error("Missing frame: {0}")]
    MissingFrame(&'static str),
    #[error("Invalid kind: {0:#06x}")]
    InvalidKind(u16),
    #[error("Unknown API id: {0}")]
    UnknownApi(u16),
    #[error("Unknown event id: {0}")]
    UnknownEvent(u16),
    #[error("Invalid UUID in request ID")]
    InvalidUuid,
    #[error("Frame too short: expected {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },
    #[error("Unexpected kind: expected {expected:?}, got {actual:?}")]
    UnexpectedKind { expected: Kind, actual: Kind },
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),
}

fn read_u16(frame: &Bytes) -> Result<u16, FrameError> {
    if frame.len() < 2 {
        return Err(FrameError::FrameTooShort {
            expected: 2,
            actual: frame.len(),
        });
    }
    Ok(u16::from_be_bytes([frame[0], frame[1]]))
}

fn u16_frame(value: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(2);
    buf.put_u16(value);
    buf.freeze()
}

impl RecFrame {
    pub fn new(kind: Kind, id: u16, request_id: Uuid, body: Bytes) -> Self {
        Self {
            kind,
            id,
            request_id,
            body,
        }
    }

    /// Build a frame whose body is `payload` as named-field MessagePack.
    pub fn with_payload<T: Serialize>(
        kind: Kind,
        id: u16,
        request_id: Uuid,
        payload: &T,
    ) -> Result<Self, FrameError> {
        let body = rmp_serde::to_vec_named(payload)?;
        Ok(Self::new(kind, id, request_id, Bytes::from(body)))
    }

    /// Parse a list of frame bytes, ignoring any identity prefix.
    pub fn from_frames(frames: &[Bytes]) -> Result<Self, FrameError> {
        let (_, frame) = Self::from_frames_with_identity(frames)?;
        Ok(frame)
    }

    /// Parse frames, returning identity frames separately (for ROUTER replies).
    pub fn from_frames_with_identity(frames: &[Bytes]) -> Result<(Vec<Bytes>, Self), FrameError> {
        let proto_idx = frames
            .iter()
            .position(|f| f.as_ref() == PROTOCOL_VERSION)
            .ok_or(FrameError::InvalidProtocol)?;

        let identity: Vec<Bytes> = frames[..proto_idx].to_vec();

        let rec_frames = &frames[proto_idx..];
        if rec_frames.len() < FRAME_COUNT {
            return Err(FrameError::MissingFrame("insufficient frames after RECD01"));
        }

        let kind = Kind::from_u16(read_u16(&rec_frames[1])?)?;
        let id = read_u16(&rec_frames[2])?;

        let reqid_frame = &rec_frames[3];
        if reqid_frame.len() < 16 {
            return Err(FrameError::FrameTooShort {
                expected: 16,
                actual: reqid_frame.len(),
            });
        }
        let request_id =
            Uuid::from_slice(&reqid_frame[..16]).map_err(|_| FrameError::InvalidUuid)?;

        let body = rec_frames[4].clone();

        Ok((
            identity,
            RecFrame {
                kind,
                id,
                request_id,
                body,
            },
        ))
    }

    /// Serialize to a list of frame bytes (5 frames)
    pub fn to_frames(&self) -> Vec<Bytes> {
        vec![
            Bytes::from_static(PROTOCOL_VERSION),
            u16_frame(self.kind.to_u16()),
            u16_frame(self.id),
            Bytes::copy_from_slice(self.request_id.as_bytes()),
            self.body.clone(),
        ]
    }

    /// Serialize with identity prefix (for ROUTER socket replies)
    pub fn to_frames_with_identity(&self, identity: &[Bytes]) -> Vec<Bytes> {
        let mut frames = identity.to_vec();
        frames.extend(self.to_frames());
        frames
    }

    pub fn heartbeat(request_id: Uuid) -> Self {
        Self::new(Kind::Heartbeat, 0, request_id, Bytes::new())
    }

    pub fn disconnect() -> Self {
        Self::new(Kind::Disconnect, 0, Uuid::new_v4(), Bytes::new())
    }

    /// Decode the MessagePack body.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, FrameError> {
        Ok(rmp_serde::from_slice(&self.body)?)
    }

    /// Error unless this frame is of kind `expected`.
    pub fn expect_kind(&self, expected: Kind) -> Result<(), FrameError> {
        if self.kind != expected {
            return Err(FrameError::UnexpectedKind {
                expected,
                actual: self.kind,
            });
        }
        Ok(())
    }

    /// Any frame except Disconnect keeps a peer alive.
    pub fn indicates_liveness(&self) -> bool {
        self.kind != Kind::Disconnect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_values() {
        assert_eq!(Kind::Call.to_u16(), 0x0001);
        assert_eq!(Kind::Disconnect.to_u16(), 0x0005);
        assert_eq!(Kind::from_u16(0x0003).unwrap(), Kind::Event);
        assert!(matches!(
            Kind::from_u16(0x00FF),
            Err(FrameError::InvalidKind(0x00FF))
        ));
    }

    #[test]
    fn heartbeat_layout() {
        let request_id = Uuid::new_v4();
        let frames = RecFrame::heartbeat(request_id).to_frames();

        assert_eq!(frames.len(), FRAME_COUNT);
        assert_eq!(frames[0].as_ref(), PROTOCOL_VERSION);
        assert_eq!(frames[1].as_ref(), &[0x00, 0x04]);
        assert_eq!(frames[3].as_ref(), request_id.as_bytes());

        let parsed = RecFrame::from_frames(&frames).unwrap();
        assert_eq!(parsed.kind, Kind::Heartbeat);
        assert_eq!(parsed.request_id, request_id);
        assert!(parsed.body.is_empty());
    }

    #[test]
    fn id_is_kept_raw() {
        let frame = RecFrame::new(Kind::Call, 4242, Uuid::new_v4(), Bytes::new());
        let parsed = RecFrame::from_frames(&frame.to_frames()).unwrap();
        assert_eq!(parsed.id, 4242);
    }

    #[test]
    fn identity_prefix_handling() {
        let frame = RecFrame::disconnect();
        let identity = vec![Bytes::from_static(b"client-7")];

        let with_id = frame.to_frames_with_identity(&identity);
        assert_eq!(with_id.len(), FRAME_COUNT + 1);

        let (recovered, parsed) = RecFrame::from_frames_with_identity(&with_id).unwrap();
        assert_eq!(recovered, identity);
        assert_eq!(parsed.kind, Kind::Disconnect);
        assert!(!parsed.indicates_liveness());
    }

    #[test]
    fn missing_marker_is_invalid_protocol() {
        let frames = vec![Bytes::from_static(b"HOOT01"), Bytes::new()];
        assert!(matches!(
            RecFrame::from_frames(&frames),
            Err(FrameError::InvalidProtocol)
        ));
    }

    #[test]
    fn truncated_message() {
        let mut frames = RecFrame::heartbeat(Uuid::nil()).to_frames();
        frames.pop();
        assert!(matches!(
            RecFrame::from_frames(&frames),
            Err(FrameError::MissingFrame(_))
        ));
    }

    #[test]
    fn short_request_id() {
        let mut frames = RecFrame::heartbeat(Uuid::nil()).to_frames();
        frames[3] = Bytes::from_static(b"short");
        assert!(matches!(
            RecFrame::from_frames(&frames),
            Err(FrameError::FrameTooShort { expected: 16, .. })
        ));
    }

    #[test]
    fn expect_kind_mismatch() {
        let frame = RecFrame::heartbeat(Uuid::nil());
        assert!(matches!(
            frame.expect_kind(Kind::Return),
            Err(FrameError::UnexpectedKind {
                expected: Kind::Return,
                actual: Kind::Heartbeat
            })
        ));
    }
}
