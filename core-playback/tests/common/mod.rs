//! Synthetic collaborators shared by the pipeline tests.
//!
//! The source interleaves a 25 fps video stream (time base 1/1000, key frame
//! every 10 frames) with 100 ms audio frames (time base 1/8000). Decoders
//! emit one frame per sample; sinks record what they were given.

#![allow(dead_code)]

use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    AudioSink, BridgeError, Clock, CodecParameters, CompressedSample, DecoderFactory, MediaDecoder,
    MediaRegistry, MediaSource, MediaType, OpenOptions, RawFrame, Rational, SeekRequest,
    SourceOpener, StreamInfo, SystemClock, VideoSink,
};
use core_playback::{MessageKind, MessageQueue, PlayerMessage};
use core_runtime::RuntimeEnvironment;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const VIDEO_INDEX: usize = 0;
pub const AUDIO_INDEX: usize = 1;
pub const SAMPLE_RATE: u32 = 8000;
pub const AUDIO_FRAME_SAMPLES: i64 = 800;
pub const VIDEO_PACKET_BYTES: usize = 1000;
pub const AUDIO_PACKET_BYTES: usize = 200;
const GOP: i64 = 10;

/// Shape of a synthetic clip.
#[derive(Debug, Clone)]
pub struct Clip {
    pub video: bool,
    pub audio: bool,
    pub width: u32,
    pub height: u32,
    pub fps: i64,
    /// `None` never ends.
    pub duration_ms: Option<i64>,
    /// Every read fails with `TimedOut` once this many samples were read
    /// through the shared counters.
    pub fail_after_reads: Option<usize>,
    /// Every read whose shared count is a multiple of this fails once with
    /// `TimedOut`; the next read succeeds.
    pub stall_every: Option<usize>,
    /// Delay before `open` returns.
    pub open_delay: Duration,
}

impl Clip {
    pub fn av(duration_ms: i64) -> Self {
        Self {
            video: true,
            audio: true,
            width: 320,
            height: 240,
            fps: 25,
            duration_ms: Some(duration_ms),
            fail_after_reads: None,
            stall_every: None,
            open_delay: Duration::ZERO,
        }
    }

    pub fn endless() -> Self {
        Self {
            duration_ms: None,
            ..Self::av(0)
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn failing_after(mut self, reads: usize) -> Self {
        self.fail_after_reads = Some(reads);
        self
    }

    pub fn audio_only(mut self) -> Self {
        self.video = false;
        self
    }

    pub fn stalling_every(mut self, reads: usize) -> Self {
        self.stall_every = Some(reads);
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }
}

/// Counters shared by every source an opener creates.
#[derive(Debug, Default)]
pub struct SourceCounters {
    pub opens: AtomicUsize,
    pub reads: AtomicUsize,
    pub closes: AtomicUsize,
    pub seeks: Mutex<Vec<i64>>,
    pub opened_urls: Mutex<Vec<String>>,
}

impl SourceCounters {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn seeks(&self) -> Vec<i64> {
        self.seeks.lock().clone()
    }
}

pub struct SyntheticSource {
    clip: Clip,
    counters: Arc<SourceCounters>,
    streams: Vec<StreamInfo>,
    next_video: i64,
    next_audio: i64,
    discontinuity: bool,
}

impl SyntheticSource {
    pub fn new(clip: Clip, counters: Arc<SourceCounters>) -> Self {
        let mut streams = Vec::new();
        if clip.video {
            streams.push(
                StreamInfo::new(
                    VIDEO_INDEX,
                    Rational::new(1, 1000),
                    CodecParameters::video("h264", clip.width, clip.height),
                )
                .with_frame_rate(Rational::new(clip.fps as i32, 1)),
            );
        }
        if clip.audio {
            streams.push(StreamInfo::new(
                AUDIO_INDEX,
                Rational::new(1, SAMPLE_RATE as i32),
                CodecParameters::audio("aac", SAMPLE_RATE, 2),
            ));
        }
        Self {
            clip,
            counters,
            streams,
            next_video: 0,
            next_audio: 0,
            discontinuity: false,
        }
    }

    fn video_ms(&self, index: i64) -> i64 {
        index * 1000 / self.clip.fps
    }

    fn audio_ms(&self, index: i64) -> i64 {
        index * AUDIO_FRAME_SAMPLES * 1000 / i64::from(SAMPLE_RATE)
    }

    fn past_end(&self, ms: i64) -> bool {
        self.clip.duration_ms.is_some_and(|end| ms >= end)
    }
}

impl MediaSource for SyntheticSource {
    fn find_stream_info(&mut self) -> BridgeResult<()> {
        Ok(())
    }

    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_next(&mut self) -> BridgeResult<CompressedSample> {
        let total = self.counters.reads.fetch_add(1, Ordering::SeqCst);
        if self.clip.fail_after_reads.is_some_and(|limit| total >= limit) {
            return Err(BridgeError::TimedOut("synthetic stall".to_string()));
        }
        if self.clip.stall_every.is_some_and(|every| (total + 1) % every == 0) {
            return Err(BridgeError::TimedOut("synthetic hiccup".to_string()));
        }

        let video_ms = self.video_ms(self.next_video);
        let audio_ms = self.audio_ms(self.next_audio);
        let video_left = self.clip.video && !self.past_end(video_ms);
        let audio_left = self.clip.audio && !self.past_end(audio_ms);

        let discontinuity = std::mem::take(&mut self.discontinuity);
        let sample = if video_left && (!audio_left || video_ms <= audio_ms) {
            let index = self.next_video;
            self.next_video += 1;
            CompressedSample::new(VIDEO_INDEX, vec![0u8; VIDEO_PACKET_BYTES])
                .with_timestamps(Some(video_ms), Some(video_ms))
                .with_duration(1000 / self.clip.fps)
                .with_key_frame(index % GOP == 0)
                .with_pos(index * VIDEO_PACKET_BYTES as i64)
        } else if audio_left {
            let pts = self.next_audio * AUDIO_FRAME_SAMPLES;
            self.next_audio += 1;
            CompressedSample::new(AUDIO_INDEX, vec![0u8; AUDIO_PACKET_BYTES])
                .with_timestamps(Some(pts), Some(pts))
                .with_duration(AUDIO_FRAME_SAMPLES)
                .with_key_frame(true)
        } else {
            return Err(BridgeError::EndOfStream);
        };
        Ok(sample.with_discontinuity(discontinuity))
    }

    fn seek(&mut self, request: SeekRequest) -> BridgeResult<()> {
        if request.by_bytes {
            return Err(BridgeError::Unsupported("byte seek".to_string()));
        }
        self.counters.seeks.lock().push(request.target);

        let target_ms = request.target / 1000;
        let frame = target_ms * self.clip.fps / 1000;
        self.next_video = frame - frame % GOP;
        let key_ms = self.video_ms(self.next_video);
        self.next_audio = key_ms * i64::from(SAMPLE_RATE) / 1000 / AUDIO_FRAME_SAMPLES;
        Ok(())
    }

    fn duration_us(&self) -> Option<i64> {
        self.clip.duration_ms.map(|ms| ms * 1000)
    }

    fn format_name(&self) -> &str {
        "synthetic"
    }

    fn close(&mut self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Opens synthetic sources; URLs starting with `fail://` are refused.
pub struct SyntheticOpener {
    pub counters: Arc<SourceCounters>,
    default_clip: Clip,
    clips: Mutex<HashMap<String, Clip>>,
}

impl SyntheticOpener {
    pub fn new(default_clip: Clip) -> Self {
        Self {
            counters: Arc::new(SourceCounters::default()),
            default_clip,
            clips: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_clip(self, url: &str, clip: Clip) -> Self {
        self.clips.lock().insert(url.to_string(), clip);
        self
    }
}

impl SourceOpener for SyntheticOpener {
    fn open(&self, url: &str, options: &OpenOptions) -> BridgeResult<Box<dyn MediaSource>> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        self.counters.opened_urls.lock().push(url.to_string());
        if url.starts_with("fail://") {
            return Err(BridgeError::Io("connection refused".to_string()));
        }

        let clip = self
            .clips
            .lock()
            .get(url)
            .cloned()
            .unwrap_or_else(|| self.default_clip.clone());

        let deadline = Instant::now() + clip.open_delay;
        while Instant::now() < deadline {
            if options.is_interrupted() {
                return Err(BridgeError::Interrupted);
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        Ok(Box::new(SyntheticSource::new(clip, self.counters.clone())))
    }
}

struct PassthroughDecoder {
    params: CodecParameters,
}

impl MediaDecoder for PassthroughDecoder {
    fn decode(&mut self, sample: Option<&CompressedSample>) -> BridgeResult<Vec<RawFrame>> {
        let Some(sample) = sample else {
            return Ok(Vec::new());
        };
        let frame = match self.params.media_type {
            MediaType::Video => RawFrame::video(self.params.width, self.params.height, vec![0u8; 16])
                .with_pts(sample.pts)
                .with_pkt_dts(sample.dts)
                .with_pos(sample.pos),
            _ => RawFrame::audio(self.params.sample_rate, AUDIO_FRAME_SAMPLES as u32, vec![0u8; 16])
                .with_pts(sample.pts)
                .with_pkt_dts(sample.dts),
        };
        Ok(vec![frame])
    }

    fn flush(&mut self) {}
}

/// Decodes `h264` and `aac` into one frame per sample.
#[derive(Default)]
pub struct PassthroughFactory {
    pub video_opens: AtomicUsize,
    pub audio_opens: AtomicUsize,
}

impl PassthroughFactory {
    pub fn video_opens(&self) -> usize {
        self.video_opens.load(Ordering::SeqCst)
    }

    pub fn audio_opens(&self) -> usize {
        self.audio_opens.load(Ordering::SeqCst)
    }
}

impl DecoderFactory for PassthroughFactory {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn supports(&self, params: &CodecParameters) -> bool {
        matches!(params.codec.as_str(), "h264" | "aac")
    }

    fn open(&self, params: &CodecParameters) -> BridgeResult<Box<dyn MediaDecoder>> {
        match params.media_type {
            MediaType::Video => self.video_opens.fetch_add(1, Ordering::SeqCst),
            _ => self.audio_opens.fetch_add(1, Ordering::SeqCst),
        };
        Ok(Box::new(PassthroughDecoder {
            params: params.clone(),
        }))
    }
}

/// Records the pts of every presented picture.
#[derive(Default)]
pub struct RecordingVideoSink {
    presented: Mutex<Vec<Option<i64>>>,
}

impl RecordingVideoSink {
    pub fn presented(&self) -> Vec<Option<i64>> {
        self.presented.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.presented.lock().len()
    }
}

impl VideoSink for RecordingVideoSink {
    fn present(&self, frame: &RawFrame) -> BridgeResult<()> {
        self.presented.lock().push(frame.pts);
        Ok(())
    }
}

/// Plays PCM in real time: queued audio drains with the wall clock.
pub struct RealtimeAudioSink {
    clock: SystemClock,
    play_until: Mutex<f64>,
    /// Seconds of audio accepted since the last flush.
    accepted: Mutex<f64>,
    paused: AtomicBool,
    frames: AtomicUsize,
}

impl Default for RealtimeAudioSink {
    fn default() -> Self {
        Self {
            clock: SystemClock::new(),
            play_until: Mutex::new(0.0),
            accepted: Mutex::new(0.0),
            paused: AtomicBool::new(false),
            frames: AtomicUsize::new(0),
        }
    }
}

impl RealtimeAudioSink {
    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    /// Seconds actually heard since the last flush.
    pub fn played(&self) -> f64 {
        *self.accepted.lock() - self.queued_duration()
    }
}

impl AudioSink for RealtimeAudioSink {
    fn present(&self, frame: &RawFrame) -> BridgeResult<()> {
        let now = self.clock.monotonic_seconds();
        let length = f64::from(frame.nb_samples) / f64::from(frame.sample_rate.max(1));
        let mut until = self.play_until.lock();
        *until = until.max(now) + length;
        *self.accepted.lock() += length;
        self.frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn queued_duration(&self) -> f64 {
        (*self.play_until.lock() - self.clock.monotonic_seconds()).max(0.0)
    }

    fn flush(&self) {
        *self.play_until.lock() = 0.0;
        *self.accepted.lock() = 0.0;
    }

    fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }
}

/// Everything a test needs to inspect after driving a player.
pub struct Harness {
    pub env: RuntimeEnvironment,
    pub opener: Arc<SyntheticOpener>,
    pub decoders: Arc<PassthroughFactory>,
    pub video: Arc<RecordingVideoSink>,
    pub audio: Arc<RealtimeAudioSink>,
}

impl Harness {
    pub fn new(opener: SyntheticOpener) -> Self {
        let opener = Arc::new(opener);
        let decoders = Arc::new(PassthroughFactory::default());
        let video = Arc::new(RecordingVideoSink::default());
        let audio = Arc::new(RealtimeAudioSink::default());

        let registry = MediaRegistry::new()
            .with_default_opener(opener.clone())
            .with_decoder(decoders.clone());
        let env = RuntimeEnvironment::builder()
            .registry(registry)
            .video_sink(video.clone())
            .audio_sink(audio.clone())
            .build()
            .expect("environment");

        Self {
            env,
            opener,
            decoders,
            video,
            audio,
        }
    }

    pub fn counters(&self) -> &SourceCounters {
        &self.opener.counters
    }
}

/// Drains `queue` until a message of `kind` arrives; returns it together
/// with everything received before it.
pub fn wait_for(
    queue: &MessageQueue,
    kind: MessageKind,
    timeout: Duration,
) -> (Option<PlayerMessage>, Vec<PlayerMessage>) {
    let deadline = Instant::now() + timeout;
    let mut seen = Vec::new();
    loop {
        let now = Instant::now();
        if now >= deadline {
            return (None, seen);
        }
        match queue.get_timeout(deadline - now) {
            Some(message) if message.kind() == kind => return (Some(message), seen),
            Some(message) => seen.push(message),
            None => return (None, seen),
        }
    }
}

/// Collects every message that arrives within `window`.
pub fn collect_for(queue: &MessageQueue, window: Duration) -> Vec<PlayerMessage> {
    let deadline = Instant::now() + window;
    let mut seen = Vec::new();
    loop {
        let now = Instant::now();
        if now >= deadline {
            return seen;
        }
        match queue.get_timeout(deadline - now) {
            Some(message) => seen.push(message),
            None => return seen,
        }
    }
}
