//! Recorder client over a ZMQ DEALER socket.
//!
//! Architecture: reactor pattern, as in the other peers.
//! - Socket owned by a dedicated reactor task
//! - Calls flow in through an mpsc channel
//! - Returns routed back via oneshot channels keyed by request_id
//! - Events forwarded on their own channel, in arrival order
//! - A keepalive task sends heartbeats so the daemon never reaps a quiet
//!   client as idle
//!
//! Usage:
//! ```ignore
//! let (client, mut events) = RecorderClient::connect(&config, "app").await?;
//! client.create_audio(std::process::id()).await?;
//! client.prepare().await?;
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::api::ApiId;
use crate::buffer::{Access, BufferError, BufferManager, ExportKey, ShmBufferManager};
use crate::error::ResultCode;
use crate::frame::{FrameError, Kind, RecFrame};
use crate::message::{Call, Event, Return};
use crate::socket::{
    create_dealer_and_connect, frames_to_multipart, multipart_to_frames, Multipart, TmqError,
    ZmqContext,
};
use crate::types::{RecorderState, RecorderType, WireEnum};
use crate::value::Value;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{api} failed: {code}")]
    Failed { api: ApiId, code: ResultCode },

    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("malformed reply to {api}: {reason}")]
    BadReply { api: ApiId, reason: String },

    #[error("socket error: {0}")]
    Socket(#[from] TmqError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error("client reactor has shut down")]
    Closed,
}

/// Command sent to the reactor task
enum ReactorCommand {
    Send {
        frames: Vec<Bytes>,
        request_id: Uuid,
        deadline: Instant,
        reply_tx: oneshot::Sender<RecFrame>,
    },
    /// Fire-and-forget keepalive; the echo is not awaited.
    Heartbeat,
    /// Tell the daemon we are leaving, then stop.
    Disconnect,
}

struct PendingCall {
    reply_tx: oneshot::Sender<RecFrame>,
    deadline: Instant,
}

async fn reactor_task<S>(
    mut socket: S,
    mut cmd_rx: mpsc::Receiver<ReactorCommand>,
    event_tx: mpsc::UnboundedSender<Event>,
    name: String,
) where
    S: futures::Stream<Item = Result<Multipart, TmqError>>
        + futures::Sink<Multipart, Error = TmqError>
        + Unpin,
{
    let mut pending: HashMap<Uuid, PendingCall> = HashMap::new();
    let mut cleanup_interval = tokio::time::interval(Duration::from_millis(250));
    cleanup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    debug!("{}: Reactor task started", name);

    loop {
        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ReactorCommand::Send { frames, request_id, deadline, reply_tx }) => {
                        if let Err(e) = socket.send(frames_to_multipart(&frames)).await {
                            // Dropping reply_tx wakes the caller with Closed.
                            warn!("{}: Send failed for {}: {}", name, request_id, e);
                            continue;
                        }
                        pending.insert(request_id, PendingCall { reply_tx, deadline });
                        trace!("{}: {} registered, {} pending", name, request_id, pending.len());
                    }
                    Some(ReactorCommand::Heartbeat) => {
                        let ping = frames_to_multipart(&RecFrame::heartbeat(Uuid::new_v4()).to_frames());
                        if let Err(e) = socket.send(ping).await {
                            debug!("{}: Keepalive not delivered: {}", name, e);
                        }
                    }
                    Some(ReactorCommand::Disconnect) | None => {
                        let bye = frames_to_multipart(&RecFrame::disconnect().to_frames());
                        if let Err(e) = socket.send(bye).await {
                            debug!("{}: Disconnect not delivered: {}", name, e);
                        }
                        info!("{}: Reactor shutting down, dropping {} pending calls", name, pending.len());
                        break;
                    }
                }
            }

            result = socket.next() => {
                match result {
                    Some(Ok(multipart)) => {
                        let frames = multipart_to_frames(multipart);
                        match RecFrame::from_frames(&frames) {
                            Ok(frame) if frame.kind == Kind::Event => {
                                match Event::from_frame(&frame) {
                                    Ok(event) => {
                                        let _ = event_tx.send(event);
                                    }
                                    Err(e) => warn!("{}: Bad event frame: {}", name, e),
                                }
                            }
                            Ok(frame)
                                if frame.kind == Kind::Heartbeat
                                    && !pending.contains_key(&frame.request_id) =>
                            {
                                trace!("{}: Keepalive echoed", name);
                            }
                            Ok(frame) => {
                                if let Some(call) = pending.remove(&frame.request_id) {
                                    let _ = call.reply_tx.send(frame);
                                } else {
                                    debug!("{}: Discarding orphan reply {}", name, frame.request_id);
                                }
                            }
                            Err(e) => warn!("{}: Failed to parse frame: {}", name, e),
                        }
                    }
                    Some(Err(e)) => {
                        warn!("{}: Receive error: {}", name, e);
                    }
                    None => {
                        warn!("{}: Socket stream ended unexpectedly", name);
                        break;
                    }
                }
            }

            _ = cleanup_interval.tick() => {
                let now = Instant::now();
                pending.retain(|_, call| now <= call.deadline && !call.reply_tx.is_closed());
            }
        }
    }

    debug!("{}: Reactor task exiting", name);
}

/// Keep the connection from looking idle to the daemon.
///
/// Holds only a weak sender, so it ends once the client and its reactor are
/// gone even if nobody aborts it.
fn spawn_keepalive(
    cmd_tx: mpsc::WeakSender<ReactorCommand>,
    interval: Duration,
    name: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        debug!("{}: Keepalive started (interval: {:?})", name, interval);

        loop {
            ticker.tick().await;
            let Some(tx) = cmd_tx.upgrade() else {
                break;
            };
            if tx.send(ReactorCommand::Heartbeat).await.is_err() {
                break;
            }
        }

        debug!("{}: Keepalive stopped", name);
    })
}

/// Client half of the recorder channel.
///
/// Calls on one client are independent; the daemon still serves them in
/// order for this connection. The session handle returned by CREATE is
/// remembered and sent with every later call.
pub struct RecorderClient {
    name: String,
    timeout: Duration,
    cmd_tx: mpsc::Sender<ReactorCommand>,
    handle: Mutex<Option<u64>>,
    keepalive: Option<JoinHandle<()>>,
    buffers: ShmBufferManager,
    /// ZMQ context must outlive the socket
    #[allow(dead_code)]
    context: ZmqContext,
}

impl RecorderClient {
    /// Connect to the daemon named by `config` and spawn the reactor.
    ///
    /// Returns the client and the stream of events the daemon pushes.
    pub async fn connect(
        config: &recconf::RecConfig,
        name: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Event>), ClientError> {
        let endpoint = config.endpoint();
        let context = ZmqContext::new();
        let identity = format!("{}-{}", name, Uuid::new_v4().simple());
        let socket = create_dealer_and_connect(&context, &endpoint, identity.as_bytes())?;

        info!("{}: Connecting to {} as {}", name, endpoint, identity);

        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let reactor_name = name.to_string();
        tokio::spawn(async move {
            reactor_task(socket, cmd_rx, event_tx, reactor_name).await;
        });

        let keepalive = config
            .client
            .heartbeat_interval()
            .map(|interval| spawn_keepalive(cmd_tx.downgrade(), interval, name.to_string()));

        Ok((
            Self {
                name: name.to_string(),
                timeout: config.client.timeout(),
                cmd_tx,
                handle: Mutex::new(None),
                keepalive,
                buffers: ShmBufferManager::new(&config.paths.buffer_dir),
                context,
            },
            event_rx,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Session handle from the last successful CREATE.
    pub fn handle(&self) -> Option<u64> {
        *self.handle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_handle(&self, handle: Option<u64>) {
        *self.handle.lock().unwrap_or_else(|e| e.into_inner()) = handle;
    }

    async fn round_trip(&self, op: &'static str, frame: RecFrame) -> Result<RecFrame, ClientError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request_id = frame.request_id;

        self.cmd_tx
            .send(ReactorCommand::Send {
                frames: frame.to_frames(),
                request_id,
                deadline: Instant::now() + self.timeout,
                reply_tx,
            })
            .await
            .map_err(|_| ClientError::Closed)?;

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => {
                debug!("{}: {} {} timed out", self.name, op, request_id);
                Err(ClientError::Timeout {
                    op,
                    after: self.timeout,
                })
            }
        }
    }

    /// Issue one call and wait for its Return.
    ///
    /// A non-Ok result code surfaces as [`ClientError::Failed`].
    pub async fn call(&self, api: ApiId, args: Vec<Value>) -> Result<Vec<Value>, ClientError> {
        let call = Call::new(api, args).with_handle(self.handle());
        debug!("{}: call {} ({})", self.name, api, call.request_id);

        let reply = self.round_trip(api.name(), call.to_frame()?).await?;
        let ret = Return::from_frame(&reply)?;
        if !ret.ret.is_ok() {
            return Err(ClientError::Failed { api, code: ret.ret });
        }

        match api {
            ApiId::Create => {
                let handle = ret
                    .outputs
                    .first()
                    .and_then(Value::as_pointer)
                    .ok_or_else(|| ClientError::BadReply {
                        api,
                        reason: "missing handle".into(),
                    })?;
                self.set_handle(Some(handle));
            }
            ApiId::Destroy => self.set_handle(None),
            _ => {}
        }

        Ok(ret.outputs)
    }

    /// Application-level ping; resolves when the daemon echoes it.
    pub async fn heartbeat(&self) -> Result<(), ClientError> {
        let reply = self
            .round_trip("heartbeat", RecFrame::heartbeat(Uuid::new_v4()))
            .await?;
        reply.expect_kind(Kind::Heartbeat)?;
        Ok(())
    }

    /// Send Disconnect and stop the reactor. The daemon tears the session down.
    pub async fn close(&self) {
        if let Some(keepalive) = &self.keepalive {
            keepalive.abort();
        }
        let _ = self.cmd_tx.send(ReactorCommand::Disconnect).await;
    }

    fn output<T>(
        api: ApiId,
        outputs: &[Value],
        idx: usize,
        get: impl Fn(&Value) -> Option<T>,
    ) -> Result<T, ClientError> {
        outputs
            .get(idx)
            .and_then(get)
            .ok_or_else(|| ClientError::BadReply {
                api,
                reason: format!("missing output {idx}"),
            })
    }

    async fn call_int(&self, api: ApiId) -> Result<i64, ClientError> {
        let outputs = self.call(api, Vec::new()).await?;
        Self::output(api, &outputs, 0, Value::as_int)
    }

    async fn call_enum<T: WireEnum>(&self, api: ApiId) -> Result<T, ClientError> {
        let raw = self.call_int(api).await?;
        T::decode(raw).map_err(|e| ClientError::BadReply {
            api,
            reason: e.to_string(),
        })
    }

    pub async fn create_audio(&self, pid: u32) -> Result<u64, ClientError> {
        self.call(
            ApiId::Create,
            vec![RecorderType::Audio.to_i32().into(), pid.into()],
        )
        .await?;
        self.handle().ok_or(ClientError::Closed)
    }

    pub async fn create_video(&self, camera: u64) -> Result<u64, ClientError> {
        self.call(
            ApiId::Create,
            vec![RecorderType::Video.to_i32().into(), Value::Pointer(camera)],
        )
        .await?;
        self.handle().ok_or(ClientError::Closed)
    }

    pub async fn destroy(&self) -> Result<(), ClientError> {
        self.call(ApiId::Destroy, Vec::new()).await.map(drop)
    }

    pub async fn get_state(&self) -> Result<RecorderState, ClientError> {
        self.call_enum(ApiId::GetState).await
    }

    pub async fn prepare(&self) -> Result<(), ClientError> {
        self.call(ApiId::Prepare, Vec::new()).await.map(drop)
    }

    pub async fn unprepare(&self) -> Result<(), ClientError> {
        self.call(ApiId::Unprepare, Vec::new()).await.map(drop)
    }

    pub async fn start(&self) -> Result<(), ClientError> {
        self.call(ApiId::Start, Vec::new()).await.map(drop)
    }

    pub async fn pause(&self) -> Result<(), ClientError> {
        self.call(ApiId::Pause, Vec::new()).await.map(drop)
    }

    pub async fn commit(&self) -> Result<(), ClientError> {
        self.call(ApiId::Commit, Vec::new()).await.map(drop)
    }

    pub async fn cancel(&self) -> Result<(), ClientError> {
        self.call(ApiId::Cancel, Vec::new()).await.map(drop)
    }

    pub async fn set_filename(&self, path: &str) -> Result<(), ClientError> {
        self.call(ApiId::SetFilename, vec![path.into()]).await.map(drop)
    }

    pub async fn get_filename(&self) -> Result<String, ClientError> {
        let api = ApiId::GetFilename;
        let outputs = self.call(api, Vec::new()).await?;
        Self::output(api, &outputs, 0, |v| v.as_str().map(str::to_string))
    }

    pub async fn get_audio_level(&self) -> Result<f64, ClientError> {
        let api = ApiId::GetAudioLevel;
        let outputs = self.call(api, Vec::new()).await?;
        Self::output(api, &outputs, 0, Value::as_double)
    }

    /// Import an audio-stream buffer by key, copy it out, and hand the key
    /// back to the daemon with RETURN_BUFFER.
    pub async fn take_audio_frame(&self, key: ExportKey) -> Result<Vec<u8>, ClientError> {
        let buffer = self.buffers.import(key)?;
        let copied = match self.buffers.map(&buffer, Access::Read) {
            Ok(mapping) => {
                let data = mapping.as_slice().to_vec();
                self.buffers.unmap(mapping);
                Ok(data)
            }
            Err(e) => Err(e),
        };
        self.buffers.unref(buffer);
        let data = copied?;

        self.call(ApiId::ReturnBuffer, vec![Value::Int(key.into())])
            .await?;
        Ok(data)
    }
}

impl Drop for RecorderClient {
    fn drop(&mut self) {
        if let Some(keepalive) = self.keepalive.take() {
            keepalive.abort();
        }
        let _ = self.cmd_tx.try_send(ReactorCommand::Disconnect);
    }
}
