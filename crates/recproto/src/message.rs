//! Call / Return / Event messages and their frame bodies.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{ApiId, EventId, ExecutionClass};
use crate::error::ResultCode;
use crate::frame::{FrameError, Kind, RecFrame};
use crate::value::Value;

/// Body of a Call frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallBody {
    /// Session handle the client believes it holds.
    #[serde(default)]
    pub handle: Option<u64>,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Body of a Return frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnBody {
    pub ret: ResultCode,
    #[serde(default)]
    pub outputs: Vec<Value>,
}

/// Body of an Event frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBody {
    pub event: EventId,
    pub class: ExecutionClass,
    #[serde(default)]
    pub payload: Vec<Value>,
}

/// A client request.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub api: ApiId,
    pub request_id: Uuid,
    pub handle: Option<u64>,
    pub args: Vec<Value>,
}

impl Call {
    pub fn new(api: ApiId, args: Vec<Value>) -> Self {
        Self {
            api,
            request_id: Uuid::new_v4(),
            handle: None,
            args,
        }
    }

    pub fn with_handle(mut self, handle: Option<u64>) -> Self {
        self.handle = handle;
        self
    }

    pub fn to_frame(&self) -> Result<RecFrame, FrameError> {
        RecFrame::with_payload(
            Kind::Call,
            self.api.to_u16(),
            self.request_id,
            &CallBody {
                handle: self.handle,
                args: self.args.clone(),
            },
        )
    }

    /// Decode a Call. An unknown API id yields [`FrameError::UnknownApi`]
    /// before the body is looked at.
    pub fn from_frame(frame: &RecFrame) -> Result<Self, FrameError> {
        frame.expect_kind(Kind::Call)?;
        let api = ApiId::from_u16(frame.id)?;
        let body: CallBody = if frame.body.is_empty() {
            CallBody {
                handle: None,
                args: Vec::new(),
            }
        } else {
            frame.payload()?
        };
        Ok(Self {
            api,
            request_id: frame.request_id,
            handle: body.handle,
            args: body.args,
        })
    }
}

/// The single reply to a Call.
#[derive(Debug, Clone, PartialEq)]
pub struct Return {
    /// Raw API id echoed from the Call, kept raw so unknown ids can be answered.
    pub api: u16,
    pub request_id: Uuid,
    pub ret: ResultCode,
    pub outputs: Vec<Value>,
}

impl Return {
    pub fn new(api: ApiId, request_id: Uuid, ret: ResultCode, outputs: Vec<Value>) -> Self {
        Self {
            api: api.to_u16(),
            request_id,
            ret,
            outputs,
        }
    }

    pub fn error(api: ApiId, request_id: Uuid, ret: ResultCode) -> Self {
        Self::new(api, request_id, ret, Vec::new())
    }

    /// Answer a frame that could not be decoded as a Call.
    pub fn protocol_error(raw_api: u16, request_id: Uuid) -> Self {
        Self {
            api: raw_api,
            request_id,
            ret: ResultCode::Protocol,
            outputs: Vec::new(),
        }
    }

    pub fn api_id(&self) -> Option<ApiId> {
        ApiId::from_u16(self.api).ok()
    }

    pub fn to_frame(&self) -> Result<RecFrame, FrameError> {
        RecFrame::with_payload(
            Kind::Return,
            self.api,
            self.request_id,
            &ReturnBody {
                ret: self.ret,
                outputs: self.outputs.clone(),
            },
        )
    }

    pub fn from_frame(frame: &RecFrame) -> Result<Self, FrameError> {
        frame.expect_kind(Kind::Return)?;
        let body: ReturnBody = frame.payload()?;
        Ok(Self {
            api: frame.id,
            request_id: frame.request_id,
            ret: body.ret,
            outputs: body.outputs,
        })
    }
}

/// An engine notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: EventId,
    pub payload: Vec<Value>,
}

impl Event {
    pub fn new(id: EventId, payload: Vec<Value>) -> Self {
        Self { id, payload }
    }

    pub fn class(&self) -> ExecutionClass {
        self.id.class()
    }

    pub fn to_frame(&self) -> Result<RecFrame, FrameError> {
        RecFrame::with_payload(
            Kind::Event,
            self.id.to_u16(),
            Uuid::nil(),
            &EventBody {
                event: self.id,
                class: self.class(),
                payload: self.payload.clone(),
            },
        )
    }

    pub fn from_frame(frame: &RecFrame) -> Result<Self, FrameError> {
        frame.expect_kind(Kind::Event)?;
        let id = EventId::from_u16(frame.id)?;
        let body: EventBody = frame.payload()?;
        Ok(Self {
            id,
            payload: body.payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    #[test]
    fn call_over_frames() {
        let call = Call::new(
            ApiId::SetVideoResolution,
            vec![Value::Int(1280), Value::Int(720)],
        )
        .with_handle(Some(7));

        let frames = call.to_frame().unwrap().to_frames();
        let parsed = Call::from_frame(&RecFrame::from_frames(&frames).unwrap()).unwrap();
        assert_eq!(parsed, call);
    }

    #[test]
    fn call_with_empty_body() {
        let frame = RecFrame::new(Kind::Call, ApiId::Prepare.to_u16(), Uuid::new_v4(), Bytes::new());
        let call = Call::from_frame(&frame).unwrap();
        assert_eq!(call.api, ApiId::Prepare);
        assert!(call.args.is_empty());
        assert_eq!(call.handle, None);
    }

    #[test]
    fn unknown_api_is_reported_with_raw_id() {
        let frame = RecFrame::new(Kind::Call, 500, Uuid::new_v4(), Bytes::new());
        let err = Call::from_frame(&frame).unwrap_err();
        assert!(matches!(err, FrameError::UnknownApi(500)));

        let ret = Return::protocol_error(500, frame.request_id);
        assert_eq!(ret.api_id(), None);
        let parsed = Return::from_frame(&ret.to_frame().unwrap()).unwrap();
        assert_eq!(parsed.ret, ResultCode::Protocol);
        assert_eq!(parsed.api, 500);
    }

    #[test]
    fn return_body_uses_ret_field_name() {
        let ret = Return::new(
            ApiId::GetFilename,
            Uuid::new_v4(),
            ResultCode::Ok,
            vec![Value::from("/tmp/a.m4a")],
        );
        let frame = ret.to_frame().unwrap();
        let as_map: std::collections::BTreeMap<String, serde::de::IgnoredAny> =
            rmp_serde::from_slice(&frame.body).unwrap();
        assert!(as_map.contains_key("ret"));
        assert!(as_map.contains_key("outputs"));
    }

    #[test]
    fn event_carries_class() {
        let event = Event::new(
            EventId::AudioStream,
            vec![
                Value::Int(4096),
                Value::Int(1),
                Value::Int(2),
                Value::Int(1000),
                Value::Int(3),
            ],
        );
        let frame = event.to_frame().unwrap();
        assert_eq!(frame.request_id, Uuid::nil());

        let body: EventBody = frame.payload().unwrap();
        assert_eq!(body.class, ExecutionClass::Worker);
        assert_eq!(body.event, EventId::AudioStream);

        assert_eq!(Event::from_frame(&frame).unwrap(), event);
    }

    #[test]
    fn wrong_kind_rejected() {
        let frame = RecFrame::heartbeat(Uuid::nil());
        assert!(matches!(
            Return::from_frame(&frame),
            Err(FrameError::UnexpectedKind { .. })
        ));
    }
}
