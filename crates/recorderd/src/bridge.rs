//! Engine callback to Event bridge.
//!
//! Engine callbacks fire on engine threads. Each one builds exactly one
//! [`Event`] and hands it to the connection's [`EventSink`], which routes it
//! to the immediate or worker queue by the event's execution class. The
//! server drains both queues onto the socket.
//!
//! Callbacks capture only the sink and, for audio, a [`StreamBridge`]; never
//! the session itself.

use std::sync::Arc;

use bytes::Bytes;
use recproto::{
    Access, ApiId, BufferManager, Event, EventId, ExecutionClass, RecFrame, Return, Value,
    WireEnum,
};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::engine::{AudioFrame, CallbackKind, EngineCallback};
use crate::registry::{BufferRegistry, ExportedBuffer};

/// Identity-prefixed frames ready for the ROUTER socket.
pub type Outbound = Vec<Bytes>;

/// Receiving ends of the two delivery queues.
pub struct EventQueues {
    pub immediate: mpsc::UnboundedReceiver<Outbound>,
    pub worker: mpsc::UnboundedReceiver<Outbound>,
}

/// Sending ends of the two delivery queues, shared by every connection.
#[derive(Clone)]
pub struct QueueSenders {
    immediate: mpsc::UnboundedSender<Outbound>,
    worker: mpsc::UnboundedSender<Outbound>,
}

pub fn event_queues() -> (QueueSenders, EventQueues) {
    let (immediate_tx, immediate_rx) = mpsc::unbounded_channel();
    let (worker_tx, worker_rx) = mpsc::unbounded_channel();
    (
        QueueSenders {
            immediate: immediate_tx,
            worker: worker_tx,
        },
        EventQueues {
            immediate: immediate_rx,
            worker: worker_rx,
        },
    )
}

impl QueueSenders {
    /// A sink addressed to one peer.
    pub fn sink(&self, identity: Vec<Bytes>) -> EventSink {
        EventSink {
            identity: Arc::new(identity),
            queues: self.clone(),
        }
    }
}

/// Delivers frames to one peer on the queue matching their class.
#[derive(Clone)]
pub struct EventSink {
    identity: Arc<Vec<Bytes>>,
    queues: QueueSenders,
}

impl EventSink {
    pub fn identity(&self) -> &[Bytes] {
        &self.identity
    }

    fn enqueue(&self, class: ExecutionClass, frame: &RecFrame) -> bool {
        let frames = frame.to_frames_with_identity(&self.identity);
        let queue = match class {
            ExecutionClass::Immediate => &self.queues.immediate,
            ExecutionClass::Worker => &self.queues.worker,
        };
        queue.send(frames).is_ok()
    }

    /// Queue an event. False if it could not be encoded or the server is gone.
    pub fn send(&self, event: Event) -> bool {
        match event.to_frame() {
            Ok(frame) => self.enqueue(event.class(), &frame),
            Err(e) => {
                error!("failed to encode {} event: {}", event.id, e);
                false
            }
        }
    }

    /// Queue a Return behind whatever this class has already queued.
    pub fn send_return(&self, class: ExecutionClass, ret: &Return) -> bool {
        match ret.to_frame() {
            Ok(frame) => self.enqueue(class, &frame),
            Err(e) => {
                error!("failed to encode return for api {}: {}", ret.api, e);
                false
            }
        }
    }

    /// Queue an arbitrary frame on the immediate queue.
    pub fn send_frame(&self, frame: &RecFrame) -> bool {
        self.enqueue(ExecutionClass::Immediate, frame)
    }
}

fn int<T: WireEnum>(v: T) -> Value {
    Value::Int(v.to_i32().into())
}

/// Audio-stream delivery path: copy each frame into an exported buffer and
/// announce its key.
#[derive(Clone)]
pub struct StreamBridge {
    buffers: Arc<dyn BufferManager>,
    registry: Arc<BufferRegistry>,
    sink: EventSink,
}

impl StreamBridge {
    pub fn new(buffers: Arc<dyn BufferManager>, registry: Arc<BufferRegistry>, sink: EventSink) -> Self {
        Self {
            buffers,
            registry,
            sink,
        }
    }

    /// Export one frame. Any failure drops the frame; the registry is left
    /// as it was and nothing is sent.
    pub fn deliver(&self, frame: &AudioFrame<'_>) -> bool {
        let size = frame.data.len();
        if size == 0 {
            debug!("dropping empty audio frame");
            return false;
        }

        let buffer = match self.buffers.alloc(size) {
            Ok(b) => b,
            Err(e) => {
                debug!("dropping audio frame, alloc failed: {}", e);
                return false;
            }
        };

        let mut mapping = match self.buffers.map(&buffer, Access::ReadWrite) {
            Ok(m) => m,
            Err(e) => {
                debug!("dropping audio frame, map failed: {}", e);
                self.buffers.unref(buffer);
                return false;
            }
        };

        let copied = match mapping.as_mut_slice() {
            Ok(dst) if dst.len() >= size => {
                dst[..size].copy_from_slice(frame.data);
                true
            }
            _ => false,
        };
        let key = match self.buffers.export(&buffer) {
            Ok(key) if copied && key != 0 => key,
            Ok(_) | Err(_) => {
                debug!("dropping audio frame, export failed");
                self.buffers.unmap(mapping);
                self.buffers.unref(buffer);
                return false;
            }
        };

        let record = ExportedBuffer {
            buffer,
            mapping: Some(mapping),
            key,
            size,
        };
        if let Err((e, record)) = self.registry.add(record) {
            debug!("dropping audio frame: {}", e);
            self.registry.release(record);
            return false;
        }

        let event = Event::new(
            EventId::AudioStream,
            vec![
                Value::Int(size as i64),
                int(frame.format),
                Value::Int(frame.channels.into()),
                Value::Int(frame.timestamp.into()),
                Value::Int(key.into()),
            ],
        );
        if !self.sink.send(event) {
            self.registry.remove_by_key(key);
            return false;
        }
        true
    }
}

/// Build the engine callback that a SET_*_CB api registers.
pub fn callback_for(api: ApiId, sink: &EventSink, stream: &StreamBridge) -> Option<EngineCallback> {
    let sink = sink.clone();
    let callback = match api {
        ApiId::SetStateChangedCb => EngineCallback::StateChanged(Arc::new(move |prev, cur, by_policy| {
            sink.send(Event::new(
                EventId::StateChange,
                vec![int(prev), int(cur), Value::from(by_policy)],
            ));
        })),
        ApiId::SetInterruptedCb => EngineCallback::Interrupted(Arc::new(move |policy, prev, cur| {
            sink.send(Event::new(
                EventId::Interrupted,
                vec![int(policy), int(prev), int(cur)],
            ));
        })),
        ApiId::SetErrorCb => EngineCallback::Error(Arc::new(move |code, state| {
            sink.send(Event::new(
                EventId::Error,
                vec![Value::from(code), int(state)],
            ));
        })),
        ApiId::SetRecordingStatusCb => {
            EngineCallback::RecordingStatus(Arc::new(move |elapsed_ms, size_kb| {
                sink.send(Event::new(
                    EventId::RecordingStatus,
                    vec![Value::Double(elapsed_ms as f64), Value::Double(size_kb as f64)],
                ));
            }))
        }
        ApiId::SetRecordingLimitReachedCb => {
            EngineCallback::RecordingLimitReached(Arc::new(move |limit| {
                sink.send(Event::new(EventId::RecordingLimited, vec![int(limit)]));
            }))
        }
        ApiId::SetAudioStreamCb => {
            let stream = stream.clone();
            EngineCallback::AudioStream(Arc::new(move |frame| {
                stream.deliver(frame);
            }))
        }
        _ => return None,
    };
    Some(callback)
}

/// Which engine callback an UNSET_*_CB api clears.
pub fn unset_kind_for(api: ApiId) -> Option<CallbackKind> {
    Some(match api {
        ApiId::UnsetStateChangedCb => CallbackKind::StateChanged,
        ApiId::UnsetInterruptedCb => CallbackKind::Interrupted,
        ApiId::UnsetErrorCb => CallbackKind::Error,
        ApiId::UnsetRecordingStatusCb => CallbackKind::RecordingStatus,
        ApiId::UnsetRecordingLimitReachedCb => CallbackKind::RecordingLimitReached,
        ApiId::UnsetAudioStreamCb => CallbackKind::AudioStream,
        _ => return None,
    })
}

/// The event each FOREACH api emits per enumerated item.
pub fn foreach_event_for(api: ApiId) -> Option<EventId> {
    Some(match api {
        ApiId::ForeachSupportedVideoResolution => EventId::ForeachSupportedVideoResolution,
        ApiId::ForeachSupportedFileFormat => EventId::ForeachSupportedFileFormat,
        ApiId::ForeachSupportedAudioEncoder => EventId::ForeachSupportedAudioEncoder,
        ApiId::ForeachSupportedVideoEncoder => EventId::ForeachSupportedVideoEncoder,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use recproto::{Kind, RecorderState, SampleFormat, ShmBufferManager};

    fn decode(frames: Outbound) -> (Vec<Bytes>, Event) {
        let (identity, frame) = RecFrame::from_frames_with_identity(&frames).unwrap();
        assert_eq!(frame.kind, Kind::Event);
        (identity, Event::from_frame(&frame).unwrap())
    }

    fn stream_fixture() -> (
        tempfile::TempDir,
        Arc<ShmBufferManager>,
        Arc<BufferRegistry>,
        StreamBridge,
        EventQueues,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let buffers = Arc::new(ShmBufferManager::new(dir.path()));
        buffers.acquire().unwrap();
        let registry = Arc::new(BufferRegistry::new(buffers.clone()));
        let (senders, queues) = event_queues();
        let sink = senders.sink(vec![Bytes::from_static(b"peer")]);
        let bridge = StreamBridge::new(buffers.clone(), registry.clone(), sink);
        (dir, buffers, registry, bridge, queues)
    }

    #[test]
    fn events_route_by_class() {
        let (senders, mut queues) = event_queues();
        let sink = senders.sink(vec![Bytes::from_static(b"peer")]);

        assert!(sink.send(Event::new(EventId::Error, vec![Value::Int(-1), Value::Int(3)])));
        assert!(sink.send(Event::new(
            EventId::ForeachSupportedFileFormat,
            vec![Value::Int(2)]
        )));

        let (identity, event) = decode(queues.immediate.try_recv().unwrap());
        assert_eq!(identity, vec![Bytes::from_static(b"peer")]);
        assert_eq!(event.id, EventId::Error);
        let (_, event) = decode(queues.worker.try_recv().unwrap());
        assert_eq!(event.id, EventId::ForeachSupportedFileFormat);
        assert!(queues.immediate.try_recv().is_err());
    }

    #[test]
    fn state_change_callback_builds_one_event() {
        let (_dir, _buffers, _registry, bridge, mut queues) = stream_fixture();
        let callback = callback_for(ApiId::SetStateChangedCb, &bridge.sink, &bridge).unwrap();
        let EngineCallback::StateChanged(f) = callback else {
            panic!("wrong callback kind");
        };
        f(RecorderState::Ready, RecorderState::Recording, false);

        let (_, event) = decode(queues.immediate.try_recv().unwrap());
        assert_eq!(event.id, EventId::StateChange);
        assert_eq!(
            event.payload,
            vec![Value::Int(2), Value::Int(3), Value::Int(0)]
        );
        assert!(queues.immediate.try_recv().is_err());
    }

    #[test]
    fn audio_frame_is_exported_and_announced() {
        let (dir, buffers, registry, bridge, mut queues) = stream_fixture();
        let pcm = [1u8, 2, 3, 4, 5, 6];
        assert!(bridge.deliver(&AudioFrame {
            data: &pcm,
            format: SampleFormat::S16Le,
            channels: 1,
            timestamp: 40,
        }));

        let (_, event) = decode(queues.worker.try_recv().unwrap());
        assert_eq!(event.id, EventId::AudioStream);
        assert_eq!(event.payload[0], Value::Int(6));
        assert_eq!(event.payload[3], Value::Int(40));
        let key = event.payload[4].as_int().unwrap() as u32;
        assert!(registry.contains(key));

        // Client side sees the same bytes.
        let client = ShmBufferManager::new(dir.path());
        let imported = client.import(key).unwrap();
        let view = client.map(&imported, Access::Read).unwrap();
        assert_eq!(view.as_slice(), &pcm);
        client.unmap(view);
        client.unref(imported);

        assert!(registry.remove_by_key(key));
        assert_eq!(buffers.live_buffers(), 0);
    }

    #[test]
    fn failed_alloc_drops_frame_silently() {
        let (_dir, buffers, registry, bridge, mut queues) = stream_fixture();
        buffers.release();

        assert!(!bridge.deliver(&AudioFrame {
            data: &[0u8; 64],
            format: SampleFormat::S16Le,
            channels: 2,
            timestamp: 0,
        }));
        assert!(registry.is_empty());
        assert!(queues.worker.try_recv().is_err());
        assert!(queues.immediate.try_recv().is_err());
    }

    #[test]
    fn closed_queue_rolls_back_registration() {
        let (_dir, buffers, registry, bridge, queues) = stream_fixture();
        drop(queues);
        assert!(!bridge.deliver(&AudioFrame {
            data: &[7u8; 16],
            format: SampleFormat::S16Le,
            channels: 1,
            timestamp: 0,
        }));
        assert!(registry.is_empty());
        assert_eq!(buffers.live_buffers(), 0);
    }

    #[test]
    fn api_mappings() {
        assert_eq!(
            unset_kind_for(ApiId::UnsetAudioStreamCb),
            Some(CallbackKind::AudioStream)
        );
        assert_eq!(unset_kind_for(ApiId::Start), None);
        assert_eq!(
            foreach_event_for(ApiId::ForeachSupportedVideoEncoder),
            Some(EventId::ForeachSupportedVideoEncoder)
        );
        for api in ApiId::ALL {
            assert_eq!(api.is_callback_registration(), has_callback(*api), "{api}");
        }
    }

    fn has_callback(api: ApiId) -> bool {
        let (senders, _queues) = event_queues();
        let sink = senders.sink(Vec::new());
        let dir = tempfile::tempdir().unwrap();
        let buffers: Arc<dyn BufferManager> = Arc::new(ShmBufferManager::new(dir.path()));
        let registry = Arc::new(BufferRegistry::new(buffers.clone()));
        let bridge = StreamBridge::new(buffers, registry, sink.clone());
        callback_for(api, &sink, &bridge).is_some()
    }
}
