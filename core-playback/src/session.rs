//! # Playback Session
//!
//! State shared by the threads bound to one prepared source: the reader, up
//! to two decode workers and the refresh loop.
//!
//! ## Locking
//!
//! Coarse playback flags live in [`PlayState`] behind a single lock. Queues,
//! rings and clocks carry their own locks. When more than one lock is taken
//! the order is `play` → `streams` → `change`; nothing blocks on a queue or
//! ring while holding `play`.

use crate::clock::{master_sync_type, ClockSet, PlaybackClock, SyncType};
use crate::config::{PlayMode, PlayerConfig, PlayerState};
use crate::decoder::{skips_non_reference, Decoder};
use crate::error::{PlaybackError, Result};
use crate::frame_ring::FrameRing;
use crate::messages::{MessageKind, MessageQueue, MessageSeverity, PlayerMessage};
use crate::packet_queue::PacketQueue;
use crate::source::{OpenedSource, SharedSource};
use crate::stats::{CacheStats, PlayerStats};
use crate::worker;
use bridge_traits::{InterruptPredicate, MediaType, Rational, StreamInfo};
use core_runtime::RuntimeEnvironment;
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

// ============================================================================
// State
// ============================================================================

/// Pending or running seek.
#[derive(Debug, Clone, Default)]
pub struct SeekState {
    /// Requested and not yet handled by the reader.
    pub req: bool,
    /// Target in microseconds, or bytes when `by_bytes` is set.
    pub pos: i64,
    pub rel: i64,
    pub by_bytes: bool,
    /// Landed in the source; frames before the target are still dropped.
    pub seeking: bool,
    /// Video packets are dropped until the next key frame.
    pub find_next_key: bool,
}

/// Coarse flags guarded by the play-state lock.
#[derive(Debug, Clone)]
pub struct PlayState {
    pub paused: bool,
    pub pause_req: bool,
    pub step: bool,
    /// Resume once the pending seek or source change lands.
    pub auto_resume: bool,
    pub buffering_on: bool,
    pub buffering_start: Option<f64>,
    /// Standby: the reader idles and blocking reads are interrupted.
    pub pause_buffering: bool,
    pub muted: bool,
    pub seek: SeekState,
    pub eof: bool,
    pub completed: bool,
    pub force_completed: bool,
    pub loops_left: u32,
    pub last_error: Option<PlaybackError>,
    pub frame_timer: f64,
    pub network_disconnect: bool,
    pub network_disconnect_time: Option<f64>,
    pub retry_count: u32,
    pub prepared: bool,
    pub first_video_frame_rendered: bool,
    pub first_audio_frame_rendered: bool,
    pub queue_attachments: bool,
    /// Video queue serial and start time of the last seek, until its first
    /// frame is shown.
    pub latest_seek_load: Option<(i32, f64)>,
    pub playback_rate: f32,
}

impl PlayState {
    fn new(config: &PlayerConfig) -> Self {
        Self {
            paused: false,
            pause_req: false,
            step: false,
            auto_resume: false,
            buffering_on: false,
            buffering_start: None,
            pause_buffering: false,
            muted: false,
            seek: SeekState::default(),
            eof: false,
            completed: false,
            force_completed: false,
            loops_left: config.loop_count,
            last_error: None,
            frame_timer: 0.0,
            network_disconnect: false,
            network_disconnect_time: None,
            retry_count: 0,
            prepared: false,
            first_video_frame_rendered: false,
            first_audio_frame_rendered: false,
            queue_attachments: false,
            latest_seek_load: None,
            playback_rate: 1.0,
        }
    }
}

/// Current source and the streams with an open decode component.
#[derive(Debug, Default)]
pub struct StreamState {
    pub current: Option<OpenedSource>,
    pub video: Option<StreamInfo>,
    pub audio: Option<StreamInfo>,
    pub infinite_buffer: bool,
}

/// Source switch requested from another thread, applied by the reader.
#[derive(Debug, Clone)]
pub enum SourceChange {
    Url { url: String, mode: PlayMode },
    Prepared(OpenedSource),
    /// Automatic reopen of the current live URL after a failed read.
    Reconnect { url: String, mode: PlayMode },
}

#[derive(Default)]
struct SessionThreads {
    reader: Option<JoinHandle<()>>,
    refresh: Option<JoinHandle<()>>,
    video: Option<JoinHandle<()>>,
    audio: Option<JoinHandle<()>>,
}

/// Wakes the reader out of its short waits.
struct ReadSignal {
    lock: Mutex<()>,
    cond: Condvar,
}

// ============================================================================
// Session
// ============================================================================

/// One playback session.
pub struct Session {
    pub id: Uuid,
    pub config: PlayerConfig,
    pub env: RuntimeEnvironment,
    messages: Arc<MessageQueue>,
    player_state: Arc<Mutex<PlayerState>>,

    pub videoq: Arc<PacketQueue>,
    pub audioq: Arc<PacketQueue>,
    pub pictq: FrameRing,
    pub sampq: FrameRing,
    pub clocks: ClockSet,
    pub video_finished: Arc<AtomicI32>,
    pub audio_finished: Arc<AtomicI32>,

    pub play: Mutex<PlayState>,
    pub streams: RwLock<StreamState>,
    change: Mutex<Option<SourceChange>>,
    stats: Mutex<PlayerStats>,

    abort: AtomicBool,
    has_video: AtomicBool,
    has_audio: AtomicBool,
    live: AtomicBool,
    realtime: AtomicBool,
    read_signal: ReadSignal,
    /// Serializes decode component open/close between the reader and the
    /// control API.
    components: Mutex<()>,
    threads: Mutex<SessionThreads>,
}

impl Session {
    pub fn new(
        env: RuntimeEnvironment,
        config: PlayerConfig,
        messages: Arc<MessageQueue>,
        player_state: Arc<Mutex<PlayerState>>,
    ) -> Arc<Self> {
        let videoq = Arc::new(PacketQueue::new("video"));
        let audioq = Arc::new(PacketQueue::new("audio"));
        let pictq = FrameRing::new(videoq.clone(), config.video_queue_capacity(), true);
        let sampq = FrameRing::new(audioq.clone(), config.sample_queue_size, true);
        let clocks = ClockSet::new(audioq.serial_handle(), videoq.serial_handle(), env.clock.clone());
        let play = PlayState::new(&config);

        Arc::new(Self {
            id: Uuid::new_v4(),
            live: AtomicBool::new(config.play_mode.is_live()),
            config,
            env,
            messages,
            player_state,
            videoq,
            audioq,
            pictq,
            sampq,
            clocks,
            video_finished: Arc::new(AtomicI32::new(0)),
            audio_finished: Arc::new(AtomicI32::new(0)),
            play: Mutex::new(play),
            streams: RwLock::new(StreamState::default()),
            change: Mutex::new(None),
            stats: Mutex::new(PlayerStats::default()),
            abort: AtomicBool::new(false),
            has_video: AtomicBool::new(false),
            has_audio: AtomicBool::new(false),
            realtime: AtomicBool::new(false),
            read_signal: ReadSignal {
                lock: Mutex::new(()),
                cond: Condvar::new(),
            },
            components: Mutex::new(()),
            threads: Mutex::new(SessionThreads::default()),
        })
    }

    /// Monotonic time in seconds.
    pub fn now(&self) -> f64 {
        self.env.clock.monotonic_seconds()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }

    /// Sets the abort flag and wakes every blocked thread.
    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::Release);
        self.videoq.abort();
        self.audioq.abort();
        self.pictq.signal();
        self.sampq.signal();
        self.wake_reader();
    }

    pub fn has_video(&self) -> bool {
        self.has_video.load(Ordering::Acquire)
    }

    pub fn has_audio(&self) -> bool {
        self.has_audio.load(Ordering::Acquire)
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub fn is_realtime(&self) -> bool {
        self.realtime.load(Ordering::Acquire)
    }

    pub fn sync_type(&self) -> SyncType {
        master_sync_type(self.has_video(), self.has_audio())
    }

    pub fn master_clock(&self) -> &PlaybackClock {
        self.clocks.master(self.sync_type())
    }

    // ========================================================================
    // Messages
    // ========================================================================

    /// Queues `message` for the host and tracks the resulting player state.
    pub fn notify(&self, message: PlayerMessage) {
        {
            let mut state = self.player_state.lock();
            match &message {
                PlayerMessage::Prepared if *state == PlayerState::Preparing => {
                    *state = if self.config.start_on_prepared {
                        PlayerState::Started
                    } else {
                        PlayerState::Prepared
                    };
                }
                PlayerMessage::Completed => *state = PlayerState::Completed,
                PlayerMessage::Error { .. }
                | PlayerMessage::UnsupportedFormat
                | PlayerMessage::NetDisconnect => *state = PlayerState::Error,
                _ => {}
            }
        }

        match message.severity() {
            MessageSeverity::Error => error!(session = %self.id, ?message, "{}", message.description()),
            MessageSeverity::Warning => warn!(session = %self.id, ?message, "{}", message.description()),
            MessageSeverity::Info => info!(session = %self.id, ?message, "{}", message.description()),
            MessageSeverity::Debug => trace!(session = %self.id, ?message, "{}", message.description()),
        }
        self.messages.put(message);
    }

    /// Replaces any queued progress report with a fresh one.
    pub fn notify_progress(&self) {
        self.messages.remove(MessageKind::Progress);
        self.notify(PlayerMessage::Progress {
            position_ms: self.current_position_ms(),
            duration_ms: self.duration_ms(),
        });
    }

    /// Reports a condition that ends the session.
    pub fn fail(&self, err: PlaybackError) {
        error!(session = %self.id, error = %err, "session failed");
        self.play.lock().last_error = Some(err.clone());
        self.notify(PlayerMessage::Error { code: err.code() });
        self.request_abort();
    }

    // ========================================================================
    // Reader Signalling
    // ========================================================================

    pub fn wake_reader(&self) {
        let _guard = self.read_signal.lock.lock();
        self.read_signal.cond.notify_all();
    }

    /// Waits up to `timeout` for [`wake_reader`](Self::wake_reader).
    pub fn wait_reader(&self, timeout: Duration) {
        let mut guard = self.read_signal.lock.lock();
        if self.is_aborted() {
            return;
        }
        self.read_signal.cond.wait_for(&mut guard, timeout);
    }

    /// Queues a source switch for the reader, replacing any pending one.
    pub fn request_change_source(&self, change: SourceChange) {
        *self.change.lock() = Some(change);
        self.wake_reader();
    }

    pub fn take_source_change(&self) -> Option<SourceChange> {
        self.change.lock().take()
    }

    pub fn has_pending_change(&self) -> bool {
        self.change.lock().is_some()
    }

    /// Demuxer of a queued prepared switch, if any.
    pub fn pending_change_source(&self) -> Option<SharedSource> {
        match &*self.change.lock() {
            Some(SourceChange::Prepared(opened)) => Some(opened.source.clone()),
            _ => None,
        }
    }

    /// Records the source the reader now plays.
    pub fn install_source(&self, opened: OpenedSource) {
        self.live.store(opened.mode.is_live(), Ordering::Release);
        self.realtime.store(opened.realtime, Ordering::Release);
        let mut streams = self.streams.write();
        streams.infinite_buffer = self.config.infinite_buffer_for(opened.realtime);
        streams.current = Some(opened);
        drop(streams);

        if let Some(bit_rate) = self.streams.read().current.as_ref().map(|c| c.bit_rate) {
            self.stats.lock().bit_rate = bit_rate;
        }
    }

    pub fn current_source(&self) -> Option<SharedSource> {
        self.streams.read().current.as_ref().map(|c| c.source.clone())
    }

    // ========================================================================
    // Interrupts and Network State
    // ========================================================================

    /// Predicate polled by blocking source calls.
    pub fn interrupt_predicate(self: &Arc<Self>) -> InterruptPredicate {
        let session = Arc::downgrade(self);
        Arc::new(move || session.upgrade().map_or(true, |s| s.should_interrupt()))
    }

    /// True while aborting, in standby, or inside the disconnect window.
    pub fn should_interrupt(&self) -> bool {
        if self.is_aborted() {
            return true;
        }
        let now = self.now();
        let window = self.config.reconnect_interval_ms as f64 / 1000.0;
        let play = self.play.lock();
        play.pause_buffering
            || (play.network_disconnect
                && play
                    .network_disconnect_time
                    .map_or(false, |since| now - since < window))
    }

    /// Marks the network as disconnected. Each retry counted against
    /// `reconnect_count` reports `WarnReconnect`; returns `true` and reports
    /// `NetDisconnect` once the budget is exhausted.
    pub fn set_network_disconnect(&self) -> bool {
        let now = self.now();
        let window = self.config.reconnect_interval_ms as f64 / 1000.0;
        let exhausted = {
            let mut play = self.play.lock();
            play.network_disconnect = true;
            let elapsed = play
                .network_disconnect_time
                .map_or(true, |since| now - since >= window);
            if !elapsed {
                return false;
            }
            play.network_disconnect_time = Some(now);
            let exhausted = play.retry_count > self.config.reconnect_count;
            play.retry_count += 1;
            exhausted
        };

        warn!(session = %self.id, exhausted, "network disconnect");
        if exhausted {
            self.notify(PlayerMessage::NetDisconnect);
        } else {
            self.notify(PlayerMessage::WarnReconnect);
        }
        exhausted
    }

    /// Forgets recovered read failures after a successful read.
    pub fn reset_read_failures(&self) {
        let mut play = self.play.lock();
        play.last_error = None;
        play.retry_count = 0;
        play.network_disconnect = false;
        play.network_disconnect_time = None;
    }

    // ========================================================================
    // Pause and Buffering
    // ========================================================================

    pub fn toggle_buffering(&self, on: bool) {
        let mut play = self.play.lock();
        self.toggle_buffering_locked(&mut play, on);
    }

    pub fn toggle_buffering_locked(&self, play: &mut PlayState, on: bool) {
        if !self.config.packet_buffering {
            return;
        }
        let now = self.now();

        if on && !play.buffering_on {
            debug!(session = %self.id, "buffering start");
            play.buffering_start = Some(now);
            play.buffering_on = true;
            self.update_pause_locked(play);
            self.notify(PlayerMessage::BufferingStart);
        } else if !on && play.buffering_on {
            if self.is_live() {
                let limit = self.config.live_rebuffer_reconnect_ms as f64 / 1000.0;
                if play.buffering_start.map_or(false, |start| now - start > limit) {
                    let target = self
                        .streams
                        .read()
                        .current
                        .as_ref()
                        .map(|c| (c.url.clone(), c.mode));
                    if let Some((url, mode)) = target {
                        warn!(session = %self.id, "live stream stuck buffering, reopening");
                        self.request_change_source(SourceChange::Url { url, mode });
                        return;
                    }
                }
            }

            debug!(session = %self.id, "buffering end");
            play.buffering_on = false;
            play.buffering_start = None;
            self.update_pause_locked(play);
            self.notify(PlayerMessage::BufferingEnd);
        }
    }

    /// Pauses while a pause is requested or buffering, unless stepping.
    pub fn update_pause_locked(&self, play: &mut PlayState) {
        let pause = !play.step && (play.pause_req || play.buffering_on);
        self.stream_toggle_pause_locked(play, pause);
    }

    pub fn stream_toggle_pause_locked(&self, play: &mut PlayState, pause_on: bool) {
        if play.paused && !pause_on {
            play.frame_timer += self.now() - self.clocks.video.last_updated();
            self.clocks.video.reanchor();
        }
        if play.pause_buffering && !pause_on {
            play.pause_buffering = false;
        }
        self.clocks.external.reanchor();

        play.paused = pause_on;
        self.clocks.set_paused(pause_on);
        self.env.audio_sink.set_paused(pause_on);
    }

    /// User pause or resume.
    pub fn toggle_pause(&self, pause_on: bool) {
        let mut play = self.play.lock();
        self.toggle_pause_locked(&mut play, pause_on);
    }

    pub fn toggle_pause_locked(&self, play: &mut PlayState, pause_on: bool) {
        play.pause_req = pause_on;
        play.auto_resume = !pause_on;
        self.update_pause_locked(play);
        play.step = false;
    }

    /// Pause that also idles the reader and interrupts blocking reads.
    pub fn toggle_standby(&self, on: bool) {
        let mut play = self.play.lock();
        self.toggle_pause_locked(&mut play, on);
        play.pause_buffering = on;
        drop(play);
        self.wake_reader();
    }

    /// Shows exactly one more frame, then pauses again.
    pub fn step_frame_locked(&self, play: &mut PlayState) {
        if play.paused {
            self.stream_toggle_pause_locked(play, false);
        }
        play.step = true;
    }

    pub fn step_frame(&self) {
        let mut play = self.play.lock();
        self.step_frame_locked(&mut play);
    }

    pub fn set_muted(&self, muted: bool) {
        self.play.lock().muted = muted;
        self.env.audio_sink.set_muted(muted);
    }

    pub fn set_playback_rate(&self, rate: f32) {
        self.play.lock().playback_rate = rate;
        let speed = f64::from(rate);
        self.clocks.audio.set_speed(speed);
        self.clocks.video.set_speed(speed);
        self.clocks.external.set_speed(speed);
        self.env.audio_sink.set_playback_rate(rate);
    }

    // ========================================================================
    // Seeking and Position
    // ========================================================================

    /// Queues a seek unless one is already pending.
    pub fn request_seek(&self, pos: i64, rel: i64, by_bytes: bool) -> bool {
        let mut play = self.play.lock();
        if play.seek.req {
            return false;
        }
        play.seek.pos = pos;
        play.seek.rel = rel;
        play.seek.by_bytes = by_bytes;
        play.seek.req = true;
        drop(play);
        self.wake_reader();
        true
    }

    /// Container start time in microseconds.
    pub fn start_time_us(&self) -> i64 {
        self.streams
            .read()
            .current
            .as_ref()
            .and_then(|c| c.start_time_us)
            .unwrap_or(0)
    }

    pub fn duration_ms(&self) -> i64 {
        self.streams
            .read()
            .current
            .as_ref()
            .and_then(|c| c.duration_us)
            .map_or(0, |us| us / 1000)
    }

    /// Master clock position relative to the media start, never negative.
    pub fn current_position_ms(&self) -> i64 {
        let clock = self.master_clock().get();
        let pos_ms = if clock.is_nan() {
            let play = self.play.lock();
            if play.seek.by_bytes {
                0
            } else {
                play.seek.pos / 1000
            }
        } else {
            (clock * 1000.0) as i64
        };
        (pos_ms - self.start_time_us() / 1000).max(0)
    }

    /// Position up to which compressed data is buffered.
    pub fn playable_duration_ms(&self) -> i64 {
        self.update_stats();
        let stats = self.stats.lock();
        let cached = if self.has_audio() {
            stats.audio_cache.duration_ms
        } else {
            stats.video_cache.duration_ms
        };
        drop(stats);
        self.current_position_ms() + cached
    }

    // ========================================================================
    // Decode Components
    // ========================================================================

    /// Opens a decoder for `stream` and starts its worker thread.
    pub fn open_component(self: &Arc<Self>, stream: &StreamInfo) -> Result<()> {
        let _components = self.components.lock();
        if self.is_aborted() {
            return Err(PlaybackError::InvalidState("session aborted".to_string()));
        }

        let media_type = stream.media_type();
        let forced = match media_type {
            MediaType::Video => &self.config.video_codec_name,
            MediaType::Audio => &self.config.audio_codec_name,
            MediaType::Other => return Err(PlaybackError::InvalidStreamIndex(stream.index)),
        };

        let registry = &self.env.registry;
        let factory = match forced {
            Some(name) => registry.find_decoder_by_name(name),
            None => registry.find_decoder(&stream.params),
        }
        .ok_or_else(|| PlaybackError::UnsupportedCodec(stream.params.codec.clone()))?;

        let mut codec = factory.open(&stream.params).map_err(|e| match e {
            bridge_traits::BridgeError::OutOfMemory => PlaybackError::OutOfMemory,
            other => PlaybackError::UnsupportedCodec(format!("{}: {}", stream.params.codec, other)),
        })?;

        info!(
            session = %self.id,
            index = stream.index,
            codec = %stream.params.codec,
            decoder = factory.name(),
            "opening component"
        );

        match media_type {
            MediaType::Audio => {
                self.audioq.start();
                let decoder = Decoder::new(
                    codec,
                    self.audioq.clone(),
                    stream,
                    self.config.decoder_reorder_pts,
                    self.audio_finished.clone(),
                )
                .with_start_pts(stream.start_time, stream.time_base);

                self.streams.write().audio = Some(stream.clone());
                self.has_audio.store(true, Ordering::Release);

                let session = self.clone();
                let spawned = thread::Builder::new()
                    .name("ff_audio_dec".to_string())
                    .spawn(move || worker::run_audio(session, decoder));
                match spawned {
                    Ok(handle) => self.threads.lock().audio = Some(handle),
                    Err(err) => {
                        self.audioq.abort();
                        self.streams.write().audio = None;
                        self.has_audio.store(false, Ordering::Release);
                        return Err(err.into());
                    }
                }
            }
            MediaType::Video => {
                if skips_non_reference(stream, self.config.max_fps, self.config.high_fps_cutoff) {
                    info!(session = %self.id, "high frame rate, skipping non-reference frames");
                    codec.set_skip_non_reference(true);
                }

                self.videoq.start();
                let decoder = Decoder::new(
                    codec,
                    self.videoq.clone(),
                    stream,
                    self.config.decoder_reorder_pts,
                    self.video_finished.clone(),
                );

                self.streams.write().video = Some(stream.clone());
                self.has_video.store(true, Ordering::Release);
                self.play.lock().queue_attachments = true;

                let session = self.clone();
                let spawned = thread::Builder::new()
                    .name("ff_video_dec".to_string())
                    .spawn(move || worker::run_video(session, decoder));
                match spawned {
                    Ok(handle) => self.threads.lock().video = Some(handle),
                    Err(err) => {
                        self.videoq.abort();
                        self.streams.write().video = None;
                        self.has_video.store(false, Ordering::Release);
                        return Err(err.into());
                    }
                }
            }
            MediaType::Other => {}
        }
        Ok(())
    }

    /// Stops the worker of `media_type` and releases its buffers.
    pub fn close_component(&self, media_type: MediaType) {
        let _components = self.components.lock();
        let (queue, ring) = match media_type {
            MediaType::Video => (&self.videoq, &self.pictq),
            MediaType::Audio => (&self.audioq, &self.sampq),
            MediaType::Other => return,
        };

        queue.abort();
        ring.signal();
        let handle = match media_type {
            MediaType::Video => self.threads.lock().video.take(),
            _ => self.threads.lock().audio.take(),
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(session = %self.id, ?media_type, "decode worker panicked");
            }
        }
        queue.flush();
        ring.drain();

        match media_type {
            MediaType::Video => {
                self.streams.write().video = None;
                self.has_video.store(false, Ordering::Release);
            }
            _ => {
                self.env.audio_sink.flush();
                self.streams.write().audio = None;
                self.has_audio.store(false, Ordering::Release);
            }
        }
        info!(session = %self.id, ?media_type, "component closed");
    }

    /// Points an open component at a stream of a new source with the same
    /// codec shape.
    pub fn retarget_component(&self, stream: &StreamInfo) {
        let mut streams = self.streams.write();
        match stream.media_type() {
            MediaType::Video => streams.video = Some(stream.clone()),
            MediaType::Audio => streams.audio = Some(stream.clone()),
            MediaType::Other => {}
        }
    }

    /// Opens or closes the component for `index` of the current source.
    pub fn select_stream(self: &Arc<Self>, index: usize, selected: bool) -> Result<()> {
        let stream = self
            .streams
            .read()
            .current
            .as_ref()
            .and_then(|c| c.stream(index).cloned())
            .ok_or(PlaybackError::InvalidStreamIndex(index))?;
        let media_type = stream.media_type();
        if media_type == MediaType::Other {
            return Err(PlaybackError::InvalidStreamIndex(index));
        }

        let open_index = self.selected_stream(media_type);
        if selected {
            if open_index == Some(index) {
                return Ok(());
            }
            if open_index.is_some() {
                self.close_component(media_type);
            }
            self.open_component(&stream)?;
            if media_type == MediaType::Video {
                self.notify_video_size();
            }
            self.request_seek_to_current();
        } else if open_index == Some(index) {
            self.close_component(media_type);
        }
        Ok(())
    }

    /// Refills a freshly opened component from the current position.
    fn request_seek_to_current(&self) {
        let pos_us = self.current_position_ms() * 1000 + self.start_time_us();
        self.request_seek(pos_us, 0, false);
    }

    pub fn selected_stream(&self, media_type: MediaType) -> Option<usize> {
        let streams = self.streams.read();
        match media_type {
            MediaType::Video => streams.video.as_ref().map(|s| s.index),
            MediaType::Audio => streams.audio.as_ref().map(|s| s.index),
            MediaType::Other => None,
        }
    }

    /// Time base of the open video or audio stream.
    pub fn stream_time_base(&self, media_type: MediaType) -> Option<Rational> {
        let streams = self.streams.read();
        match media_type {
            MediaType::Video => streams.video.as_ref().map(|s| s.time_base),
            MediaType::Audio => streams.audio.as_ref().map(|s| s.time_base),
            MediaType::Other => None,
        }
    }

    /// Emits size and aspect ratio of the open video stream.
    pub fn notify_video_size(&self) {
        let params = self.streams.read().video.as_ref().map(|s| s.params.clone());
        if let Some(params) = params {
            self.notify(PlayerMessage::VideoSizeChanged {
                width: params.width,
                height: params.height,
            });
            let sar = params.sample_aspect_ratio;
            self.notify(PlayerMessage::SarChanged {
                num: sar.num,
                den: sar.den,
            });
        }
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub fn update_stats(&self) {
        let cache = |queue: &PacketQueue, time_base: Option<Rational>| CacheStats {
            bytes: queue.size() as i64,
            packets: queue.nb_packets() as i64,
            duration_ms: time_base
                .map_or(0, |tb| (queue.duration() as f64 * tb.to_f64() * 1000.0) as i64),
        };
        let video = cache(&self.videoq, self.stream_time_base(MediaType::Video));
        let audio = cache(&self.audioq, self.stream_time_base(MediaType::Audio));

        let mut stats = self.stats.lock();
        stats.video_cache = video;
        stats.audio_cache = audio;
    }

    pub fn with_stats<R>(&self, f: impl FnOnce(&mut PlayerStats) -> R) -> R {
        f(&mut self.stats.lock())
    }

    pub fn stats(&self) -> PlayerStats {
        self.stats.lock().clone()
    }

    // ========================================================================
    // Threads
    // ========================================================================

    pub fn set_reader_thread(&self, handle: JoinHandle<()>) {
        self.threads.lock().reader = Some(handle);
    }

    pub fn set_refresh_thread(&self, handle: JoinHandle<()>) {
        self.threads.lock().refresh = Some(handle);
    }

    fn join(&self, name: &str, handle: Option<JoinHandle<()>>) {
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(session = %self.id, thread = name, "thread panicked");
            }
        }
    }

    fn join_decoders(&self) {
        let (video, audio) = {
            let mut threads = self.threads.lock();
            (threads.video.take(), threads.audio.take())
        };
        self.join("ff_video_dec", video);
        self.join("ff_audio_dec", audio);
    }

    /// Aborts every queue and joins all threads: decode workers, reader,
    /// then the refresh loop. Buffers and the source are released last.
    pub fn shutdown(&self) {
        info!(session = %self.id, "closing session");
        self.request_abort();
        self.join_decoders();

        let reader = self.threads.lock().reader.take();
        self.join("ff_read", reader);

        // The reader may have opened a component after the first abort
        self.request_abort();
        self.join_decoders();

        let refresh = self.threads.lock().refresh.take();
        self.join("ff_vout", refresh);

        self.videoq.flush();
        self.audioq.flush();
        self.pictq.drain();
        self.sampq.drain();

        let current = self.streams.write().current.take();
        if let Some(opened) = current {
            if let Some(source) = Arc::into_inner(opened.source) {
                source.into_inner().close();
            }
        }
        debug!(session = %self.id, "session closed");
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("aborted", &self.is_aborted())
            .field("has_video", &self.has_video())
            .field("has_audio", &self.has_audio())
            .finish_non_exhaustive()
    }
}
