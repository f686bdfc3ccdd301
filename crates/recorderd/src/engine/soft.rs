//! Software recorder engine.
//!
//! State machine: Created -> Ready -> Recording <-> Paused, with commit and
//! cancel returning to Ready and unprepare to Created. Destroy is only legal
//! from Created. Attributes may be changed in Created and Ready.
//!
//! When built with a frame interval, a generator thread runs while the engine
//! is Recording and feeds silent PCM to the audio-stream callback, along with
//! recording-status reports and limit notifications.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use recproto::{
    AudioCodec, AudioDevice, FileFormat, InterruptPolicy, LimitType, RecorderState, RecorderType,
    Rotation, SampleFormat, VideoCodec,
};
use tracing::{debug, warn};

use super::{
    AudioFrame, AudioStreamFn, CallbackKind, EngineCallback, EngineError, EngineFactory, ErrorFn,
    InterruptedFn, LimitReachedFn, RecorderEngine, RecordingStatusFn, StateChangedFn, Visit,
};

const VIDEO_RESOLUTIONS: &[(i32, i32)] = &[(320, 240), (640, 480), (1280, 720), (1920, 1080)];
const AUDIO_FILE_FORMATS: &[FileFormat] = &[
    FileFormat::Amr,
    FileFormat::Adts,
    FileFormat::Wav,
    FileFormat::Ogg,
    FileFormat::Mp4,
    FileFormat::ThreeGp,
];
const VIDEO_FILE_FORMATS: &[FileFormat] = &[FileFormat::Mp4, FileFormat::ThreeGp, FileFormat::M2ts];
const AUDIO_CODECS: &[AudioCodec] = &[
    AudioCodec::Amr,
    AudioCodec::Aac,
    AudioCodec::Vorbis,
    AudioCodec::Pcm,
];
const VIDEO_CODECS: &[VideoCodec] = &[VideoCodec::H263, VideoCodec::H264, VideoCodec::Mpeg4];

/// Builds [`SoftRecorder`]s.
#[derive(Debug, Clone, Default)]
pub struct SoftEngineFactory {
    frame_interval: Option<Duration>,
}

impl SoftEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate silent audio frames every `interval` while recording.
    pub fn with_audio_generator(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }
}

impl EngineFactory for SoftEngineFactory {
    fn create_audio(&self) -> Result<Box<dyn RecorderEngine>, EngineError> {
        Ok(Box::new(SoftRecorder::new(
            RecorderType::Audio,
            self.frame_interval,
        )))
    }

    fn create_video(&self, camera: u64) -> Result<Box<dyn RecorderEngine>, EngineError> {
        if camera == 0 {
            return Err(EngineError::InvalidParameter);
        }
        Ok(Box::new(SoftRecorder::new(
            RecorderType::Video,
            self.frame_interval,
        )))
    }
}

#[derive(Debug, Clone)]
struct Attributes {
    client_pid: Option<i32>,
    filename: String,
    root_directory: String,
    file_format: FileFormat,
    resolution: (i32, i32),
    size_limit_kb: i32,
    time_limit_s: i32,
    audio_device: AudioDevice,
    audio_codec: AudioCodec,
    video_codec: VideoCodec,
    samplerate: i32,
    audio_bitrate: i32,
    video_bitrate: i32,
    muted: bool,
    motion_rate: f64,
    channels: i32,
    orientation: Rotation,
    sound_stream: Option<(String, i32)>,
}

impl Attributes {
    fn new(kind: RecorderType) -> Self {
        Self {
            client_pid: None,
            filename: String::new(),
            root_directory: String::new(),
            file_format: match kind {
                RecorderType::Audio => FileFormat::Amr,
                RecorderType::Video => FileFormat::Mp4,
            },
            resolution: (640, 480),
            size_limit_kb: 0,
            time_limit_s: 0,
            audio_device: AudioDevice::Mic,
            audio_codec: AudioCodec::Aac,
            video_codec: VideoCodec::H264,
            samplerate: 16_000,
            audio_bitrate: 128_000,
            video_bitrate: 2_000_000,
            muted: false,
            motion_rate: 1.0,
            channels: 1,
            orientation: Rotation::None,
            sound_stream: None,
        }
    }
}

struct Inner {
    state: RecorderState,
    attrs: Attributes,
    elapsed_ms: u64,
    bytes_written: u64,
}

#[derive(Default)]
struct Callbacks {
    state_changed: Option<Arc<StateChangedFn>>,
    interrupted: Option<Arc<InterruptedFn>>,
    error: Option<Arc<ErrorFn>>,
    recording_status: Option<Arc<RecordingStatusFn>>,
    limit_reached: Option<Arc<LimitReachedFn>>,
    audio_stream: Option<Arc<AudioStreamFn>>,
}

/// State shared with the generator thread.
struct Shared {
    inner: Mutex<Inner>,
    callbacks: Mutex<Callbacks>,
}

impl Shared {
    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn callbacks(&self) -> MutexGuard<'_, Callbacks> {
        self.callbacks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn state_changed(&self, previous: RecorderState, current: RecorderState, by_policy: bool) {
        let cb = self.callbacks().state_changed.clone();
        if let Some(cb) = cb {
            cb(previous, current, by_policy);
        }
    }

    fn audio_frame(&self, frame: &AudioFrame<'_>) {
        let cb = self.callbacks().audio_stream.clone();
        if let Some(cb) = cb {
            cb(frame);
        }
    }

    fn recording_status(&self, elapsed_ms: u64, size_kb: u64) {
        let cb = self.callbacks().recording_status.clone();
        if let Some(cb) = cb {
            cb(elapsed_ms, size_kb);
        }
    }

    fn limit_reached(&self, limit: LimitType) {
        let cb = self.callbacks().limit_reached.clone();
        if let Some(cb) = cb {
            cb(limit);
        }
    }
}

struct Generator {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

fn run_generator(shared: Arc<Shared>, stop: Arc<AtomicBool>, interval: Duration) {
    let interval_ms = interval.as_millis().max(1) as u64;
    let mut since_status = 0u64;

    while !stop.load(Ordering::Acquire) {
        std::thread::sleep(interval);
        if stop.load(Ordering::Acquire) {
            break;
        }

        let (frame, channels, timestamp, elapsed, size_kb, limit) = {
            let mut inner = shared.inner();
            if inner.state != RecorderState::Recording {
                break;
            }
            let attrs = &inner.attrs;
            let bytes = (attrs.samplerate as u64 * attrs.channels as u64 * 2 * interval_ms) / 1000;
            let channels = attrs.channels as u32;
            let time_limit_ms = attrs.time_limit_s as u64 * 1000;
            let size_limit_kb = attrs.size_limit_kb as u64;

            let timestamp = inner.elapsed_ms;
            inner.elapsed_ms += interval_ms;
            inner.bytes_written += bytes;

            let size_kb = inner.bytes_written / 1024;
            let limit = if time_limit_ms > 0 && inner.elapsed_ms >= time_limit_ms {
                Some(LimitType::Time)
            } else if size_limit_kb > 0 && size_kb >= size_limit_kb {
                Some(LimitType::Size)
            } else {
                None
            };
            (
                vec![0u8; bytes as usize],
                channels,
                timestamp,
                inner.elapsed_ms,
                size_kb,
                limit,
            )
        };

        if !frame.is_empty() {
            shared.audio_frame(&AudioFrame {
                data: &frame,
                format: SampleFormat::S16Le,
                channels,
                timestamp: timestamp as u32,
            });
        }

        since_status += interval_ms;
        if since_status >= 1000 {
            since_status = 0;
            shared.recording_status(elapsed, size_kb);
        }

        if let Some(limit) = limit {
            debug!("soft recorder hit {:?} limit", limit);
            shared.limit_reached(limit);
            break;
        }
    }
}

/// Software stand-in for a platform recorder.
pub struct SoftRecorder {
    kind: RecorderType,
    shared: Arc<Shared>,
    frame_interval: Option<Duration>,
    generator: Mutex<Option<Generator>>,
}

impl SoftRecorder {
    pub fn new(kind: RecorderType, frame_interval: Option<Duration>) -> Self {
        Self {
            kind,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: RecorderState::Created,
                    attrs: Attributes::new(kind),
                    elapsed_ms: 0,
                    bytes_written: 0,
                }),
                callbacks: Mutex::new(Callbacks::default()),
            }),
            frame_interval,
            generator: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> RecorderType {
        self.kind
    }

    /// Feed one captured frame to the audio-stream callback.
    pub fn emit_audio_frame(&self, data: &[u8], timestamp: u32) {
        let channels = self.shared.inner().attrs.channels as u32;
        self.shared.audio_frame(&AudioFrame {
            data,
            format: SampleFormat::S16Le,
            channels,
            timestamp,
        });
    }

    /// Report an asynchronous engine failure.
    pub fn raise_error(&self, code: i32) {
        let state = self.shared.inner().state;
        let cb = self.shared.callbacks().error.clone();
        if let Some(cb) = cb {
            cb(code, state);
        }
    }

    /// Stop an active recording on behalf of a system policy.
    pub fn interrupt(&self, policy: InterruptPolicy) -> Result<(), EngineError> {
        let previous = self.transition(
            &[RecorderState::Recording, RecorderState::Paused],
            RecorderState::Ready,
            true,
        )?;
        let cb = self.shared.callbacks().interrupted.clone();
        if let Some(cb) = cb {
            cb(policy, previous, RecorderState::Ready);
        }
        Ok(())
    }

    pub fn report_status(&self, elapsed_ms: u64, size_kb: u64) {
        self.shared.recording_status(elapsed_ms, size_kb);
    }

    pub fn reach_limit(&self, limit: LimitType) {
        self.shared.limit_reached(limit);
    }

    /// Move to `to` if the current state is one of `from`, then notify.
    /// Returns the previous state.
    fn transition(
        &self,
        from: &[RecorderState],
        to: RecorderState,
        by_policy: bool,
    ) -> Result<RecorderState, EngineError> {
        let previous = {
            let mut inner = self.shared.inner();
            if !from.contains(&inner.state) {
                return Err(EngineError::InvalidState);
            }
            let previous = inner.state;
            inner.state = to;
            if previous == RecorderState::Ready && to == RecorderState::Recording {
                inner.elapsed_ms = 0;
                inner.bytes_written = 0;
            }
            previous
        };

        if to != RecorderState::Recording {
            self.stop_generator();
        }
        self.shared.state_changed(previous, to, by_policy);
        Ok(previous)
    }

    fn start_generator(&self) {
        let Some(interval) = self.frame_interval else {
            return;
        };
        let mut slot = self.generator.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let shared = Arc::clone(&self.shared);
        let thread_stop = Arc::clone(&stop);
        match std::thread::Builder::new()
            .name("soft-recorder".into())
            .spawn(move || run_generator(shared, thread_stop, interval))
        {
            Ok(thread) => *slot = Some(Generator { stop, thread }),
            Err(e) => warn!("failed to start audio generator: {}", e),
        }
    }

    fn stop_generator(&self) {
        let generator = self
            .generator
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(generator) = generator {
            generator.stop.store(true, Ordering::Release);
            if generator.thread.join().is_err() {
                warn!("audio generator thread panicked");
            }
        }
    }

    /// Change attributes; only in Created or Ready.
    fn configure<T>(&self, f: impl FnOnce(&mut Attributes) -> T) -> Result<T, EngineError> {
        let mut inner = self.shared.inner();
        match inner.state {
            RecorderState::Created | RecorderState::Ready => Ok(f(&mut inner.attrs)),
            _ => Err(EngineError::InvalidState),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&Attributes) -> T) -> Result<T, EngineError> {
        let inner = self.shared.inner();
        if inner.state == RecorderState::None {
            return Err(EngineError::InvalidState);
        }
        Ok(f(&inner.attrs))
    }

    fn video_only(&self) -> Result<(), EngineError> {
        match self.kind {
            RecorderType::Video => Ok(()),
            RecorderType::Audio => Err(EngineError::InvalidOperation),
        }
    }

    fn file_formats(&self) -> &'static [FileFormat] {
        match self.kind {
            RecorderType::Audio => AUDIO_FILE_FORMATS,
            RecorderType::Video => VIDEO_FILE_FORMATS,
        }
    }

    fn update_callbacks(&self, f: impl FnOnce(&mut Callbacks)) -> Result<(), EngineError> {
        match self.shared.inner().state {
            RecorderState::Created | RecorderState::Ready => {}
            _ => return Err(EngineError::InvalidState),
        }
        f(&mut self.shared.callbacks());
        Ok(())
    }
}

fn visit_all<T: Copy>(items: &[T], visit: Visit<'_, T>) -> Result<(), EngineError> {
    for item in items {
        if !visit(*item) {
            break;
        }
    }
    Ok(())
}

fn positive(v: i32) -> Result<i32, EngineError> {
    if v > 0 {
        Ok(v)
    } else {
        Err(EngineError::InvalidParameter)
    }
}

fn non_negative(v: i32) -> Result<i32, EngineError> {
    if v >= 0 {
        Ok(v)
    } else {
        Err(EngineError::InvalidParameter)
    }
}

impl RecorderEngine for SoftRecorder {
    fn set_client_pid(&self, pid: i32) -> Result<(), EngineError> {
        let pid = positive(pid)?;
        self.configure(|a| a.client_pid = Some(pid))
    }

    fn destroy(&self) -> Result<(), EngineError> {
        {
            let mut inner = self.shared.inner();
            if inner.state != RecorderState::Created {
                return Err(EngineError::InvalidState);
            }
            inner.state = RecorderState::None;
        }
        *self.shared.callbacks() = Callbacks::default();
        Ok(())
    }

    fn state(&self) -> Result<RecorderState, EngineError> {
        Ok(self.shared.inner().state)
    }

    fn prepare(&self) -> Result<(), EngineError> {
        self.transition(&[RecorderState::Created], RecorderState::Ready, false)
            .map(drop)
    }

    fn unprepare(&self) -> Result<(), EngineError> {
        self.transition(&[RecorderState::Ready], RecorderState::Created, false)
            .map(drop)
    }

    fn start(&self) -> Result<(), EngineError> {
        self.transition(
            &[RecorderState::Ready, RecorderState::Paused],
            RecorderState::Recording,
            false,
        )?;
        self.start_generator();
        Ok(())
    }

    fn pause(&self) -> Result<(), EngineError> {
        self.transition(&[RecorderState::Recording], RecorderState::Paused, false)
            .map(drop)
    }

    fn commit(&self) -> Result<(), EngineError> {
        self.transition(
            &[RecorderState::Recording, RecorderState::Paused],
            RecorderState::Ready,
            false,
        )
        .map(drop)
    }

    fn cancel(&self) -> Result<(), EngineError> {
        self.transition(
            &[RecorderState::Recording, RecorderState::Paused],
            RecorderState::Ready,
            false,
        )
        .map(drop)
    }

    fn set_video_resolution(&self, width: i32, height: i32) -> Result<(), EngineError> {
        self.video_only()?;
        if !VIDEO_RESOLUTIONS.contains(&(width, height)) {
            return Err(EngineError::InvalidParameter);
        }
        self.configure(|a| a.resolution = (width, height))
    }

    fn video_resolution(&self) -> Result<(i32, i32), EngineError> {
        self.video_only()?;
        self.read(|a| a.resolution)
    }

    fn foreach_supported_video_resolution(&self, visit: Visit<'_, (i32, i32)>) -> Result<(), EngineError> {
        self.video_only()?;
        visit_all(VIDEO_RESOLUTIONS, visit)
    }

    fn audio_level(&self) -> Result<f64, EngineError> {
        let inner = self.shared.inner();
        if !inner.state.is_recording() {
            return Err(EngineError::InvalidState);
        }
        // Silence, in dBFS.
        Ok(if inner.attrs.muted { -300.0 } else { -96.0 })
    }

    fn set_filename(&self, path: &str) -> Result<(), EngineError> {
        if path.is_empty() {
            return Err(EngineError::InvalidParameter);
        }
        self.configure(|a| a.filename = path.to_string())
    }

    fn filename(&self) -> Result<String, EngineError> {
        self.read(|a| a.filename.clone())
    }

    fn set_file_format(&self, format: FileFormat) -> Result<(), EngineError> {
        if !self.file_formats().contains(&format) {
            return Err(EngineError::InvalidParameter);
        }
        self.configure(|a| a.file_format = format)
    }

    fn file_format(&self) -> Result<FileFormat, EngineError> {
        self.read(|a| a.file_format)
    }

    fn foreach_supported_file_format(&self, visit: Visit<'_, FileFormat>) -> Result<(), EngineError> {
        visit_all(self.file_formats(), visit)
    }

    fn set_callback(&self, callback: EngineCallback) -> Result<(), EngineError> {
        self.update_callbacks(|cbs| match callback {
            EngineCallback::StateChanged(f) => cbs.state_changed = Some(f),
            EngineCallback::Interrupted(f) => cbs.interrupted = Some(f),
            EngineCallback::Error(f) => cbs.error = Some(f),
            EngineCallback::RecordingStatus(f) => cbs.recording_status = Some(f),
            EngineCallback::RecordingLimitReached(f) => cbs.limit_reached = Some(f),
            EngineCallback::AudioStream(f) => cbs.audio_stream = Some(f),
        })
    }

    fn unset_callback(&self, kind: CallbackKind) -> Result<(), EngineError> {
        self.update_callbacks(|cbs| match kind {
            CallbackKind::StateChanged => cbs.state_changed = None,
            CallbackKind::Interrupted => cbs.interrupted = None,
            CallbackKind::Error => cbs.error = None,
            CallbackKind::RecordingStatus => cbs.recording_status = None,
            CallbackKind::RecordingLimitReached => cbs.limit_reached = None,
            CallbackKind::AudioStream => cbs.audio_stream = None,
        })
    }

    fn set_size_limit(&self, kbyte: i32) -> Result<(), EngineError> {
        let kbyte = non_negative(kbyte)?;
        self.configure(|a| a.size_limit_kb = kbyte)
    }

    fn size_limit(&self) -> Result<i32, EngineError> {
        self.read(|a| a.size_limit_kb)
    }

    fn set_time_limit(&self, second: i32) -> Result<(), EngineError> {
        let second = non_negative(second)?;
        self.configure(|a| a.time_limit_s = second)
    }

    fn time_limit(&self) -> Result<i32, EngineError> {
        self.read(|a| a.time_limit_s)
    }

    fn set_audio_device(&self, device: AudioDevice) -> Result<(), EngineError> {
        self.configure(|a| a.audio_device = device)
    }

    fn audio_device(&self) -> Result<AudioDevice, EngineError> {
        self.read(|a| a.audio_device)
    }

    fn set_audio_encoder(&self, codec: AudioCodec) -> Result<(), EngineError> {
        let allowed = AUDIO_CODECS.contains(&codec)
            || (codec == AudioCodec::Disabled && self.kind == RecorderType::Video);
        if !allowed {
            return Err(EngineError::InvalidParameter);
        }
        self.configure(|a| a.audio_codec = codec)
    }

    fn audio_encoder(&self) -> Result<AudioCodec, EngineError> {
        self.read(|a| a.audio_codec)
    }

    fn foreach_supported_audio_encoder(&self, visit: Visit<'_, AudioCodec>) -> Result<(), EngineError> {
        visit_all(AUDIO_CODECS, visit)
    }

    fn set_video_encoder(&self, codec: VideoCodec) -> Result<(), EngineError> {
        self.video_only()?;
        if !VIDEO_CODECS.contains(&codec) {
            return Err(EngineError::InvalidParameter);
        }
        self.configure(|a| a.video_codec = codec)
    }

    fn video_encoder(&self) -> Result<VideoCodec, EngineError> {
        self.video_only()?;
        self.read(|a| a.video_codec)
    }

    fn foreach_supported_video_encoder(&self, visit: Visit<'_, VideoCodec>) -> Result<(), EngineError> {
        self.video_only()?;
        visit_all(VIDEO_CODECS, visit)
    }

    fn set_audio_samplerate(&self, hz: i32) -> Result<(), EngineError> {
        let hz = positive(hz)?;
        self.configure(|a| a.samplerate = hz)
    }

    fn audio_samplerate(&self) -> Result<i32, EngineError> {
        self.read(|a| a.samplerate)
    }

    fn set_audio_encoder_bitrate(&self, bps: i32) -> Result<(), EngineError> {
        let bps = positive(bps)?;
        self.configure(|a| a.audio_bitrate = bps)
    }

    fn audio_encoder_bitrate(&self) -> Result<i32, EngineError> {
        self.read(|a| a.audio_bitrate)
    }

    fn set_video_encoder_bitrate(&self, bps: i32) -> Result<(), EngineError> {
        self.video_only()?;
        let bps = positive(bps)?;
        self.configure(|a| a.video_bitrate = bps)
    }

    fn video_encoder_bitrate(&self) -> Result<i32, EngineError> {
        self.video_only()?;
        self.read(|a| a.video_bitrate)
    }

    fn set_mute(&self, enable: bool) -> Result<(), EngineError> {
        let mut inner = self.shared.inner();
        if inner.state == RecorderState::None {
            return Err(EngineError::InvalidState);
        }
        inner.attrs.muted = enable;
        Ok(())
    }

    fn is_muted(&self) -> Result<bool, EngineError> {
        self.read(|a| a.muted)
    }

    fn set_recording_motion_rate(&self, rate: f64) -> Result<(), EngineError> {
        self.video_only()?;
        if !(rate.is_finite() && rate > 0.0) {
            return Err(EngineError::InvalidParameter);
        }
        self.configure(|a| a.motion_rate = rate)
    }

    fn recording_motion_rate(&self) -> Result<f64, EngineError> {
        self.video_only()?;
        self.read(|a| a.motion_rate)
    }

    fn set_audio_channel(&self, channels: i32) -> Result<(), EngineError> {
        if !(1..=2).contains(&channels) {
            return Err(EngineError::InvalidParameter);
        }
        self.configure(|a| a.channels = channels)
    }

    fn audio_channel(&self) -> Result<i32, EngineError> {
        self.read(|a| a.channels)
    }

    fn set_orientation_tag(&self, rotation: Rotation) -> Result<(), EngineError> {
        self.configure(|a| a.orientation = rotation)
    }

    fn orientation_tag(&self) -> Result<Rotation, EngineError> {
        self.read(|a| a.orientation)
    }

    fn set_root_directory(&self, path: &str) -> Result<(), EngineError> {
        if path.is_empty() {
            return Err(EngineError::InvalidParameter);
        }
        self.configure(|a| a.root_directory = path.to_string())
    }

    fn set_sound_stream_info(&self, stream_type: &str, index: i32) -> Result<(), EngineError> {
        if stream_type.is_empty() || index < 0 {
            return Err(EngineError::InvalidParameter);
        }
        self.configure(|a| a.sound_stream = Some((stream_type.to_string(), index)))
    }
}

impl Drop for SoftRecorder {
    fn drop(&mut self) {
        self.stop_generator();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn audio() -> SoftRecorder {
        SoftRecorder::new(RecorderType::Audio, None)
    }

    #[test]
    fn full_lifecycle() {
        let rec = audio();
        assert_eq!(rec.state().unwrap(), RecorderState::Created);
        rec.prepare().unwrap();
        rec.start().unwrap();
        rec.pause().unwrap();
        rec.start().unwrap();
        rec.commit().unwrap();
        assert_eq!(rec.state().unwrap(), RecorderState::Ready);
        rec.unprepare().unwrap();
        rec.destroy().unwrap();
        assert_eq!(rec.state().unwrap(), RecorderState::None);
    }

    #[test]
    fn illegal_transitions() {
        let rec = audio();
        assert_eq!(rec.start(), Err(EngineError::InvalidState));
        assert_eq!(rec.commit(), Err(EngineError::InvalidState));
        rec.prepare().unwrap();
        assert_eq!(rec.destroy(), Err(EngineError::InvalidState));
        assert_eq!(rec.pause(), Err(EngineError::InvalidState));
    }

    #[test]
    fn state_changes_are_reported() {
        let rec = audio();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        rec.set_callback(EngineCallback::StateChanged(Arc::new(move |p, c, by_policy| {
            sink.lock().unwrap().push((p, c, by_policy));
        })))
        .unwrap();

        rec.prepare().unwrap();
        rec.start().unwrap();
        rec.interrupt(InterruptPolicy::Sound).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (RecorderState::Created, RecorderState::Ready, false),
                (RecorderState::Ready, RecorderState::Recording, false),
                (RecorderState::Recording, RecorderState::Ready, true),
            ]
        );
    }

    #[test]
    fn attributes_locked_while_recording() {
        let rec = audio();
        rec.set_time_limit(5).unwrap();
        rec.prepare().unwrap();
        rec.start().unwrap();
        assert_eq!(rec.set_time_limit(10), Err(EngineError::InvalidState));
        assert_eq!(rec.time_limit().unwrap(), 5);
        rec.set_mute(true).unwrap();
        assert!(rec.is_muted().unwrap());
    }

    #[test]
    fn video_only_operations() {
        let rec = audio();
        assert_eq!(
            rec.set_video_resolution(640, 480),
            Err(EngineError::InvalidOperation)
        );

        let video = SoftRecorder::new(RecorderType::Video, None);
        assert_eq!(
            video.set_video_resolution(641, 480),
            Err(EngineError::InvalidParameter)
        );
        video.set_video_resolution(1280, 720).unwrap();
        assert_eq!(video.video_resolution().unwrap(), (1280, 720));
    }

    #[test]
    fn foreach_stops_early() {
        let rec = audio();
        let mut seen = Vec::new();
        rec.foreach_supported_audio_encoder(&mut |codec| {
            seen.push(codec);
            seen.len() < 2
        })
        .unwrap();
        assert_eq!(seen, vec![AudioCodec::Amr, AudioCodec::Aac]);
    }

    #[test]
    fn parameter_validation() {
        let rec = audio();
        assert_eq!(rec.set_size_limit(-1), Err(EngineError::InvalidParameter));
        assert_eq!(rec.set_audio_channel(3), Err(EngineError::InvalidParameter));
        assert_eq!(rec.set_filename(""), Err(EngineError::InvalidParameter));
        assert_eq!(
            rec.set_audio_encoder(AudioCodec::Disabled),
            Err(EngineError::InvalidParameter)
        );
        assert_eq!(
            rec.set_file_format(FileFormat::M2ts),
            Err(EngineError::InvalidParameter)
        );
    }

    #[test]
    fn generator_feeds_audio_callback() {
        let rec = SoftRecorder::new(RecorderType::Audio, Some(Duration::from_millis(5)));
        let frames = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&frames);
        rec.set_callback(EngineCallback::AudioStream(Arc::new(move |frame| {
            assert_eq!(frame.format, SampleFormat::S16Le);
            assert!(frame.data.iter().all(|b| *b == 0));
            counter.fetch_add(1, Ordering::SeqCst);
        })))
        .unwrap();

        rec.prepare().unwrap();
        rec.start().unwrap();
        std::thread::sleep(Duration::from_millis(100));
        rec.commit().unwrap();

        let produced = frames.load(Ordering::SeqCst);
        assert!(produced > 0);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(frames.load(Ordering::SeqCst), produced);
    }

    #[test]
    fn generator_honours_time_limit() {
        let rec = SoftRecorder::new(RecorderType::Audio, Some(Duration::from_millis(100)));
        rec.set_time_limit(1).unwrap();
        let hit = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&hit);
        rec.set_callback(EngineCallback::RecordingLimitReached(Arc::new(move |limit| {
            *slot.lock().unwrap() = Some(limit);
        })))
        .unwrap();

        rec.prepare().unwrap();
        rec.start().unwrap();
        std::thread::sleep(Duration::from_millis(1500));
        assert_eq!(*hit.lock().unwrap(), Some(LimitType::Time));
        rec.cancel().unwrap();
    }

    #[test]
    fn factory_rejects_null_camera() {
        let factory = SoftEngineFactory::new();
        assert!(matches!(
            factory.create_video(0),
            Err(EngineError::InvalidParameter)
        ));
        assert!(factory.create_video(0x1000).is_ok());
        assert!(factory.create_audio().is_ok());
    }
}
