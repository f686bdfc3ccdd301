//! API dispatch table.
//!
//! One [`ApiHandler`] per [`ApiId`], indexed by wire value and built once from
//! `ApiId::ALL`. Every decoded Call produces exactly one [`Return`].

use std::sync::Arc;

use recproto::{
    ApiId, Args, AudioCodec, AudioDevice, BufferManager, Call, Event, FileFormat, RecFrame,
    RecorderError, RecorderType, Return, ResultCode, Rotation, Value, VideoCodec, WireEnum,
};
use tracing::debug;

use crate::bridge::{self, EventSink};
use crate::engine::{EngineError, EngineFactory};
use crate::privilege::{PeerCredentials, PrivilegeChecker};
use crate::session::{CreateMode, Session};

/// Process-wide collaborators shared by every connection.
pub struct Services {
    pub factory: Arc<dyn EngineFactory>,
    pub buffers: Arc<dyn BufferManager>,
    pub privileges: Arc<dyn PrivilegeChecker>,
    /// Privilege name CREATE requires.
    pub privilege: String,
}

/// Everything a handler may touch for one call. Owned so worker-class calls
/// can move it onto the blocking pool.
#[derive(Clone)]
pub struct CallContext {
    pub services: Arc<Services>,
    pub session: Option<Arc<Session>>,
    pub peer: PeerCredentials,
    pub sink: EventSink,
}

/// What happens to the connection's session slot after a call.
#[derive(Debug)]
pub enum SessionSlot {
    Keep,
    Publish(Arc<Session>),
    Clear,
}

#[derive(Debug)]
pub struct Reply {
    pub outputs: Vec<Value>,
    pub slot: SessionSlot,
}

impl Reply {
    fn outputs(outputs: Vec<Value>) -> Self {
        Self {
            outputs,
            slot: SessionSlot::Keep,
        }
    }
}

pub trait ApiHandler: Send + Sync {
    fn handle(&self, ctx: &CallContext, args: &mut Args<'_>) -> Result<Reply, RecorderError>;
}

fn require_session(ctx: &CallContext) -> Result<&Arc<Session>, RecorderError> {
    ctx.session
        .as_ref()
        .ok_or_else(|| RecorderError::invalid_operation("no session"))
}

fn enum_out<T: WireEnum>(v: T) -> Value {
    Value::Int(v.to_i32().into())
}

fn done(result: Result<(), EngineError>) -> Result<Vec<Value>, RecorderError> {
    result?;
    Ok(Vec::new())
}

struct CreateHandler;

impl ApiHandler for CreateHandler {
    fn handle(&self, ctx: &CallContext, args: &mut Args<'_>) -> Result<Reply, RecorderError> {
        let services = &ctx.services;
        if !services.privileges.check(&ctx.peer, &services.privilege) {
            return Err(RecorderError::PermissionDenied(services.privilege.clone()));
        }
        if ctx.session.is_some() {
            return Err(RecorderError::invalid_operation("session already exists"));
        }

        let mode = match args.enumeration::<RecorderType>("type")? {
            RecorderType::Video => CreateMode::Video {
                camera: args.pointer("camera")?,
            },
            RecorderType::Audio => {
                let pid = args.int("pid")?;
                let pid = u32::try_from(pid).map_err(|_| {
                    RecorderError::invalid_parameter(format!("pid out of range: {pid}"))
                })?;
                CreateMode::Audio { pid }
            }
        };

        let session = Session::create(
            services.factory.as_ref(),
            Arc::clone(&services.buffers),
            mode,
        )?;
        Ok(Reply {
            outputs: vec![Value::Pointer(session.handle())],
            slot: SessionSlot::Publish(session),
        })
    }
}

struct DestroyHandler;

impl ApiHandler for DestroyHandler {
    fn handle(&self, ctx: &CallContext, _args: &mut Args<'_>) -> Result<Reply, RecorderError> {
        require_session(ctx)?.destroy()?;
        Ok(Reply {
            outputs: Vec::new(),
            slot: SessionSlot::Clear,
        })
    }
}

struct ReturnBufferHandler;

impl ApiHandler for ReturnBufferHandler {
    fn handle(&self, ctx: &CallContext, args: &mut Args<'_>) -> Result<Reply, RecorderError> {
        let session = require_session(ctx)?;
        let raw = args.int("key")?;
        let key = u32::try_from(raw)
            .map_err(|_| RecorderError::invalid_parameter(format!("buffer key out of range: {raw}")))?;
        if !session.registry().remove_by_key(key) {
            return Err(RecorderError::invalid_parameter(format!("unknown buffer key {key}")));
        }
        Ok(Reply::outputs(Vec::new()))
    }
}

/// Every API that is a straight call on an existing session's engine.
struct SessionOp {
    api: ApiId,
}

impl ApiHandler for SessionOp {
    fn handle(&self, ctx: &CallContext, args: &mut Args<'_>) -> Result<Reply, RecorderError> {
        let session = require_session(ctx)?;
        session_op(self.api, ctx, session, args).map(Reply::outputs)
    }
}

fn session_op(
    api: ApiId,
    ctx: &CallContext,
    session: &Session,
    args: &mut Args<'_>,
) -> Result<Vec<Value>, RecorderError> {
    let engine = session.engine();
    match api {
        ApiId::GetState => Ok(vec![enum_out(engine.state()?)]),
        ApiId::Prepare => done(engine.prepare()),
        ApiId::Unprepare => done(engine.unprepare()),
        ApiId::Start => done(engine.start()),
        ApiId::Pause => done(engine.pause()),
        ApiId::Commit => done(engine.commit()),
        ApiId::Cancel => done(engine.cancel()),

        ApiId::SetVideoResolution => {
            let width = args.int32("width")?;
            let height = args.int32("height")?;
            done(engine.set_video_resolution(width, height))
        }
        ApiId::GetVideoResolution => {
            let (width, height) = engine.video_resolution()?;
            Ok(vec![width.into(), height.into()])
        }
        ApiId::GetAudioLevel => Ok(vec![Value::Double(engine.audio_level()?)]),
        ApiId::SetFilename => done(engine.set_filename(args.string("path")?)),
        ApiId::GetFilename => Ok(vec![Value::Str(engine.filename()?)]),
        ApiId::SetFileFormat => done(engine.set_file_format(args.enumeration::<FileFormat>("format")?)),
        ApiId::GetFileFormat => Ok(vec![enum_out(engine.file_format()?)]),

        ApiId::SetStateChangedCb
        | ApiId::SetInterruptedCb
        | ApiId::SetAudioStreamCb
        | ApiId::SetErrorCb
        | ApiId::SetRecordingStatusCb
        | ApiId::SetRecordingLimitReachedCb => {
            let stream = session.stream_bridge(ctx.sink.clone());
            let callback = bridge::callback_for(api, &ctx.sink, &stream)
                .ok_or_else(|| RecorderError::Protocol(format!("{api} has no callback")))?;
            done(engine.set_callback(callback))
        }
        ApiId::UnsetStateChangedCb
        | ApiId::UnsetInterruptedCb
        | ApiId::UnsetAudioStreamCb
        | ApiId::UnsetErrorCb
        | ApiId::UnsetRecordingStatusCb
        | ApiId::UnsetRecordingLimitReachedCb => {
            let kind = bridge::unset_kind_for(api)
                .ok_or_else(|| RecorderError::Protocol(format!("{api} has no callback")))?;
            done(engine.unset_callback(kind))
        }

        ApiId::ForeachSupportedVideoResolution
        | ApiId::ForeachSupportedFileFormat
        | ApiId::ForeachSupportedAudioEncoder
        | ApiId::ForeachSupportedVideoEncoder => foreach(api, ctx, session),

        ApiId::AttrSetSizeLimit => done(engine.set_size_limit(args.int32("kbyte")?)),
        ApiId::AttrGetSizeLimit => Ok(vec![engine.size_limit()?.into()]),
        ApiId::AttrSetTimeLimit => done(engine.set_time_limit(args.int32("second")?)),
        ApiId::AttrGetTimeLimit => Ok(vec![engine.time_limit()?.into()]),
        ApiId::AttrSetAudioDevice => {
            done(engine.set_audio_device(args.enumeration::<AudioDevice>("device")?))
        }
        ApiId::AttrGetAudioDevice => Ok(vec![enum_out(engine.audio_device()?)]),
        ApiId::SetAudioEncoder => {
            done(engine.set_audio_encoder(args.enumeration::<AudioCodec>("codec")?))
        }
        ApiId::GetAudioEncoder => Ok(vec![enum_out(engine.audio_encoder()?)]),
        ApiId::SetVideoEncoder => {
            done(engine.set_video_encoder(args.enumeration::<VideoCodec>("codec")?))
        }
        ApiId::GetVideoEncoder => Ok(vec![enum_out(engine.video_encoder()?)]),
        ApiId::AttrSetAudioSamplerate => done(engine.set_audio_samplerate(args.int32("samplerate")?)),
        ApiId::AttrGetAudioSamplerate => Ok(vec![engine.audio_samplerate()?.into()]),
        ApiId::AttrSetAudioEncoderBitrate => {
            done(engine.set_audio_encoder_bitrate(args.int32("bitrate")?))
        }
        ApiId::AttrGetAudioEncoderBitrate => Ok(vec![engine.audio_encoder_bitrate()?.into()]),
        ApiId::AttrSetVideoEncoderBitrate => {
            done(engine.set_video_encoder_bitrate(args.int32("bitrate")?))
        }
        ApiId::AttrGetVideoEncoderBitrate => Ok(vec![engine.video_encoder_bitrate()?.into()]),
        ApiId::AttrSetMute => done(engine.set_mute(args.flag("enable")?)),
        ApiId::AttrIsMuted => Ok(vec![engine.is_muted()?.into()]),
        ApiId::AttrSetRecordingMotionRate => {
            done(engine.set_recording_motion_rate(args.double("rate")?))
        }
        ApiId::AttrGetRecordingMotionRate => Ok(vec![Value::Double(engine.recording_motion_rate()?)]),
        ApiId::AttrSetAudioChannel => done(engine.set_audio_channel(args.int32("channel_count")?)),
        ApiId::AttrGetAudioChannel => Ok(vec![engine.audio_channel()?.into()]),
        ApiId::AttrSetOrientationTag => {
            done(engine.set_orientation_tag(args.enumeration::<Rotation>("orientation")?))
        }
        ApiId::AttrGetOrientationTag => Ok(vec![enum_out(engine.orientation_tag()?)]),
        ApiId::AttrSetRootDirectory => done(engine.set_root_directory(args.string("root_directory")?)),
        ApiId::SetSoundStreamInfo => {
            let stream_type = args.string("stream_type")?;
            let index = args.int32("stream_index")?;
            done(engine.set_sound_stream_info(stream_type, index))
        }

        ApiId::Create | ApiId::Destroy | ApiId::ReturnBuffer => Err(RecorderError::Protocol(
            format!("{api} is not a session operation"),
        )),
    }
}

/// Emit one worker-class event per supported item. The Return follows on
/// the same queue once this finishes.
fn foreach(api: ApiId, ctx: &CallContext, session: &Session) -> Result<Vec<Value>, RecorderError> {
    let engine = session.engine();
    let event = bridge::foreach_event_for(api)
        .ok_or_else(|| RecorderError::Protocol(format!("{api} is not an enumeration")))?;
    let sink = &ctx.sink;
    let emit = |payload: Vec<Value>| sink.send(Event::new(event, payload));

    match api {
        ApiId::ForeachSupportedVideoResolution => engine
            .foreach_supported_video_resolution(&mut |(w, h)| emit(vec![w.into(), h.into()]))?,
        ApiId::ForeachSupportedFileFormat => {
            engine.foreach_supported_file_format(&mut |f| emit(vec![enum_out(f)]))?
        }
        ApiId::ForeachSupportedAudioEncoder => {
            engine.foreach_supported_audio_encoder(&mut |c| emit(vec![enum_out(c)]))?
        }
        ApiId::ForeachSupportedVideoEncoder => {
            engine.foreach_supported_video_encoder(&mut |c| emit(vec![enum_out(c)]))?
        }
        _ => {}
    }
    Ok(Vec::new())
}

fn handler_for(api: ApiId) -> Box<dyn ApiHandler> {
    match api {
        ApiId::Create => Box::new(CreateHandler),
        ApiId::Destroy => Box::new(DestroyHandler),
        ApiId::ReturnBuffer => Box::new(ReturnBufferHandler),
        _ => Box::new(SessionOp { api }),
    }
}

/// Outcome of dispatching one call.
#[derive(Debug)]
pub struct Dispatched {
    pub ret: Return,
    pub slot: SessionSlot,
}

pub struct DispatchTable {
    handlers: Vec<Box<dyn ApiHandler>>,
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchTable {
    pub fn new() -> Self {
        Self {
            handlers: ApiId::ALL.iter().copied().map(handler_for).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Decode a Call frame. Frames that do not decode get their Protocol
    /// Return here, carrying the raw id.
    pub fn decode(frame: &RecFrame) -> Result<Call, Return> {
        Call::from_frame(frame).map_err(|e| {
            debug!("undecodable call (api {}): {}", frame.id, e);
            Return::protocol_error(frame.id, frame.request_id)
        })
    }

    pub fn dispatch(&self, ctx: &CallContext, call: &Call) -> Dispatched {
        debug!(
            "dispatch {} handle={:?} from {}",
            call.api,
            call.handle,
            ctx.peer.label()
        );

        let result = self.run(ctx, call);
        match result {
            Ok(reply) => Dispatched {
                ret: Return::new(call.api, call.request_id, ResultCode::Ok, reply.outputs),
                slot: reply.slot,
            },
            Err(e) => {
                debug!("{} failed: {}", call.api, e);
                Dispatched {
                    ret: Return::error(call.api, call.request_id, e.code()),
                    slot: SessionSlot::Keep,
                }
            }
        }
    }

    fn run(&self, ctx: &CallContext, call: &Call) -> Result<Reply, RecorderError> {
        if let (Some(claimed), Some(session)) = (call.handle, ctx.session.as_ref()) {
            if claimed != session.handle() {
                return Err(RecorderError::invalid_operation(format!(
                    "handle {claimed:#x} does not belong to this connection"
                )));
            }
        }

        let handler = self
            .handlers
            .get(call.api.to_u16() as usize)
            .ok_or_else(|| RecorderError::Protocol(format!("no handler for {}", call.api)))?;
        let mut args = Args::new(&call.args);
        handler.handle(ctx, &mut args)
    }
}
