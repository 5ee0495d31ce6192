//! # Reader Thread
//!
//! Demuxes the current source into the packet queues and owns every
//! transition that must flush both queues together: opening, seeking,
//! source switches and completion.
//!
//! ## Loop
//!
//! Each iteration checks, in order: abort, a pending source switch, a
//! pending seek, cover pictures to queue, backpressure, completion and end
//! of file. Only then is one sample read and routed.

use crate::config::PlayMode;
use crate::error::{PlaybackError, Result};
use crate::messages::PlayerMessage;
use crate::session::{Session, SourceChange};
use crate::source::{needs_codec_reconfigure, open_source, OpenedSource, SharedSource};
use bridge_traits::{BridgeError, CompressedSample, MediaType, SeekRequest, StreamInfo};
use core_runtime::logging::redact_url;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Both queues must exceed this many packets to end the first buffering.
const BUFFERING_FIRST_FILL_PACKETS: usize = 20;
/// Packets per queue that end buffering on later checks.
const MIN_MIN_FRAMES: usize = 2;
/// Interval between later buffering checks, in seconds.
const BUFFERING_CHECK_INTERVAL: f64 = 0.5;

const IDLE_WAIT: Duration = Duration::from_millis(10);
const EOF_WAIT: Duration = Duration::from_millis(100);

/// Result of the completion check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    /// Still playing or already reported.
    Playing,
    /// Looped back to the start.
    Restarted,
    /// End reached with `autoexit` set.
    Exit,
}

/// How the read loop ended.
#[derive(Debug)]
enum ReadExit {
    /// Abort requested or the end was already reported.
    Clean,
    Failed(PlaybackError),
}

struct Reader {
    session: Arc<Session>,
    source: Option<SharedSource>,
    /// Consecutive failed reads of a live stream.
    live_failures: u32,
    filled_once: bool,
    last_buffering_check: f64,
}

/// Reader thread body.
#[instrument(skip_all, fields(session = %session.id, url = %redact_url(&url)))]
pub fn run(session: Arc<Session>, url: String, mode: PlayMode) {
    info!("read thread started");
    let mut reader = Reader {
        session,
        source: None,
        live_failures: 0,
        filled_once: false,
        last_buffering_check: 0.0,
    };

    let exit = match reader.open_initial(url, mode) {
        Ok(()) => reader.read_loop(),
        Err(err) => ReadExit::Failed(err),
    };
    reader.finish(exit);
}

impl Reader {
    // ========================================================================
    // Opening
    // ========================================================================

    fn open_initial(&mut self, url: String, mode: PlayMode) -> Result<()> {
        self.apply_change(SourceChange::Url { url, mode })?;
        if self.source.is_none() {
            return Ok(());
        }

        let start_ms = self
            .session
            .config
            .start_time_ms
            .unwrap_or(self.session.config.seek_at_start_ms);
        if start_ms > 0 {
            let target = start_ms * 1000 + self.session.start_time_us();
            debug!(start_ms, "seeking to start position");
            self.session.request_seek(target, 0, false);
        }
        Ok(())
    }

    /// Switches to a new source, reusing decode components whose codec shape
    /// is unchanged.
    fn apply_change(&mut self, change: SourceChange) -> Result<()> {
        let session = self.session.clone();
        self.flush_all();
        // Only the automatic reopen keeps counting live failures
        if !matches!(change, SourceChange::Reconnect { .. }) {
            self.live_failures = 0;
        }

        let opened = match change {
            SourceChange::Prepared(opened) => opened,
            SourceChange::Url { url, mode } | SourceChange::Reconnect { url, mode } => {
                let interrupt = session.interrupt_predicate();
                match open_source(&session.env.registry, &url, mode, &session.config, interrupt) {
                    Ok(opened) => opened,
                    Err(_) if session.is_aborted() => return Ok(()),
                    Err(err @ PlaybackError::UnsupportedFormat(_)) => {
                        session.notify(PlayerMessage::UnsupportedFormat);
                        session.request_abort();
                        return Err(err);
                    }
                    Err(err) => {
                        if session.is_live() && self.live_failures > 0 {
                            self.escalate_disconnect();
                            return Ok(());
                        }
                        warn!(error = %err, "cannot open source, waiting for a new one");
                        session.notify(PlayerMessage::ConnectFailed { code: err.code() });
                        self.release_source();
                        return Ok(());
                    }
                }
            }
        };

        self.install(opened)
    }

    fn install(&mut self, opened: OpenedSource) -> Result<()> {
        let session = self.session.clone();
        let new_video = opened.video().cloned();
        let new_audio = opened.audio().cloned();
        let new_source = opened.source.clone();

        self.release_source_unless(&opened);
        session.install_source(opened);
        self.source = Some(new_source);

        self.reconfigure(MediaType::Audio, new_audio.as_ref())?;
        self.reconfigure(MediaType::Video, new_video.as_ref())?;

        if !session.has_video() && !session.has_audio() {
            warn!("no decodable stream");
            session.notify(PlayerMessage::UnsupportedFormat);
            session.request_abort();
            return Err(PlaybackError::UnsupportedFormat("no decodable stream".to_string()));
        }

        session.videoq.set_buffer_indicator(!session.has_audio());
        session.audioq.set_buffer_indicator(session.has_audio());
        session.clocks.external.set(f64::NAN, 0);
        if session.has_video() {
            session.notify_video_size();
        }

        self.filled_once = false;
        let (first_open, resume) = {
            let mut play = session.play.lock();
            play.eof = false;
            play.completed = false;
            play.last_error = None;
            play.seek = Default::default();
            play.retry_count = 0;
            play.network_disconnect = false;
            play.network_disconnect_time = None;
            play.queue_attachments = session.has_video();
            let first_open = !play.prepared;
            play.prepared = true;
            (first_open, play.auto_resume)
        };

        if first_open {
            if !session.config.start_on_prepared && !resume {
                if session.config.view_first_video_frame && session.has_video() {
                    session.set_muted(true);
                } else {
                    session.toggle_pause(true);
                }
            }
            session.notify(PlayerMessage::Prepared);
            if resume {
                session.toggle_pause(false);
                session.notify(PlayerMessage::StartRequested);
            }
        } else {
            let mut play = session.play.lock();
            if play.auto_resume {
                play.pause_req = false;
                play.auto_resume = false;
                session.update_pause_locked(&mut play);
            }
            session.toggle_buffering_locked(&mut play, true);
            drop(play);
            session.notify(PlayerMessage::SourceChanged);
        }
        Ok(())
    }

    /// Keeps, replaces, opens or closes the component of `media_type` for the
    /// new source's stream.
    fn reconfigure(&self, media_type: MediaType, stream: Option<&StreamInfo>) -> Result<()> {
        let session = &self.session;
        let current = {
            let streams = session.streams.read();
            match media_type {
                MediaType::Video => streams.video.clone(),
                _ => streams.audio.clone(),
            }
        };

        match (current, stream) {
            (Some(old), Some(new)) if !needs_codec_reconfigure(Some(&old.params), &new.params) => {
                debug!(?media_type, index = new.index, "keeping decoder across source change");
                session.retarget_component(new);
                Ok(())
            }
            (Some(_), Some(new)) => {
                session.close_component(media_type);
                self.open_component(new)
            }
            (Some(_), None) => {
                session.close_component(media_type);
                Ok(())
            }
            (None, Some(new)) => self.open_component(new),
            (None, None) => Ok(()),
        }
    }

    /// Opens a component; an unusable codec only loses that stream.
    fn open_component(&self, stream: &StreamInfo) -> Result<()> {
        match self.session.open_component(stream) {
            Ok(()) => Ok(()),
            Err(err @ (PlaybackError::UnsupportedCodec(_) | PlaybackError::InvalidStreamIndex(_))) => {
                warn!(index = stream.index, error = %err, "stream skipped");
                Ok(())
            }
            Err(_) if self.session.is_aborted() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Drops the reader's handle and closes the source if nothing else
    /// holds it.
    fn release_source(&mut self) {
        let current = self.session.streams.write().current.take();
        self.source = None;
        if let Some(opened) = current {
            close_if_last(opened.source);
        }
    }

    fn release_source_unless(&mut self, next: &OpenedSource) {
        let current = self.session.streams.write().current.take();
        self.source = None;
        if let Some(opened) = current {
            if !next.same_source(&opened.source) {
                close_if_last(opened.source);
            }
        }
    }

    /// Flushes both queues, bumping their serials so in-flight frames are
    /// dropped and decoders reset.
    fn flush_all(&self) {
        let session = &self.session;
        if session.has_audio() {
            session.audioq.flush();
            // A closed queue refuses markers
            let _ = session.audioq.put_flush();
        }
        if session.has_video() {
            session.videoq.flush();
            let _ = session.videoq.put_flush();
        }
    }

    // ========================================================================
    // Read Loop
    // ========================================================================

    fn read_loop(&mut self) -> ReadExit {
        let session = self.session.clone();
        loop {
            if session.is_aborted() {
                return ReadExit::Clean;
            }

            if let Some(change) = session.take_source_change() {
                info!("switching source");
                if let Err(err) = self.apply_change(change) {
                    return ReadExit::Failed(err);
                }
                continue;
            }

            let Some(source) = self.source.clone() else {
                session.wait_reader(IDLE_WAIT);
                continue;
            };

            if session.play.lock().seek.req {
                self.seek(&source);
            }

            self.queue_attachments();

            if self.backpressure() {
                session.wait_reader(IDLE_WAIT);
                continue;
            }

            match self.check_completion() {
                Completion::Playing => {}
                Completion::Restarted => continue,
                Completion::Exit => return ReadExit::Clean,
            }

            if session.play.lock().eof {
                session.wait_reader(IDLE_WAIT);
                continue;
            }

            let read = source.lock().read_next();
            match read {
                Ok(sample) => {
                    self.live_failures = 0;
                    session.reset_read_failures();
                    self.route(sample);
                    session.update_stats();
                    self.check_buffering();
                }
                Err(err) => {
                    if let Some(exit) = self.handle_read_error(err) {
                        return exit;
                    }
                }
            }
        }
    }

    fn handle_read_error(&mut self, err: BridgeError) -> Option<ReadExit> {
        let session = self.session.clone();
        if session.is_aborted() {
            return Some(ReadExit::Clean);
        }

        if matches!(err, BridgeError::Interrupted) {
            session.wait_reader(IDLE_WAIT);
            return None;
        }

        if session.is_live() {
            self.live_failures += 1;
            if self.live_failures >= 2 {
                self.escalate_disconnect();
                return Some(ReadExit::Clean);
            }
            warn!(error = %err, "live read failed, reconnecting");
            let target = session
                .streams
                .read()
                .current
                .as_ref()
                .map(|c| (c.url.clone(), c.mode));
            if let Some((url, mode)) = target {
                session.request_change_source(SourceChange::Reconnect { url, mode });
            }
            session.notify(PlayerMessage::WarnReconnect);
            return None;
        }

        match err {
            BridgeError::EndOfStream => {
                debug!("end of stream");
                self.mark_eof(None);
            }
            BridgeError::TimedOut(_) | BridgeError::InvalidData(_) => {
                warn!(error = %err, "read stalled");
                session.play.lock().last_error = Some(err.into());
                if session.set_network_disconnect() {
                    session.request_abort();
                    return Some(ReadExit::Clean);
                }
                session.wait_reader(IDLE_WAIT);
            }
            other => {
                warn!(error = %other, "demux failed");
                self.mark_eof(Some(other.into()));
            }
        }
        None
    }

    /// Second live failure in a row: reports and stops reading.
    fn escalate_disconnect(&mut self) {
        let session = &self.session;
        warn!("live stream lost");
        {
            let mut play = session.play.lock();
            play.network_disconnect = true;
            play.last_error = Some(PlaybackError::NetworkDisconnected);
        }
        session.notify(PlayerMessage::NetDisconnect);
        session.request_abort();
    }

    /// Ends every open queue so the decoders can drain.
    fn mark_eof(&self, error: Option<PlaybackError>) {
        let session = &self.session;
        if let Some(index) = session.selected_stream(MediaType::Video) {
            let _ = session.videoq.put_end(index);
        }
        if let Some(index) = session.selected_stream(MediaType::Audio) {
            let _ = session.audioq.put_end(index);
        }
        {
            let mut play = session.play.lock();
            play.eof = true;
            if error.is_some() {
                play.last_error = error;
            }
        }
        session.toggle_buffering(false);
        session.wait_reader(EOF_WAIT);
    }

    fn route(&self, sample: CompressedSample) {
        let session = &self.session;
        let index = sample.stream_index;

        let stream = {
            let streams = session.streams.read();
            let found = [streams.video.as_ref(), streams.audio.as_ref()]
                .into_iter()
                .flatten()
                .find(|s| s.index == index)
                .cloned();
            found
        };
        let Some(stream) = stream else {
            return;
        };
        if !self.in_play_range(&stream, &sample) {
            return;
        }

        let queue = match stream.media_type() {
            MediaType::Audio => &session.audioq,
            MediaType::Video if stream.attached_picture.is_none() => {
                let mut play = session.play.lock();
                if play.seek.find_next_key {
                    if !sample.key_frame {
                        return;
                    }
                    play.seek.find_next_key = false;
                }
                &session.videoq
            }
            _ => return,
        };

        if sample.discontinuity {
            debug!(index, "discontinuity");
            let _ = queue.put_flush();
        }
        let _ = queue.put_sample(sample);
    }

    fn in_play_range(&self, stream: &StreamInfo, sample: &CompressedSample) -> bool {
        let config = &self.session.config;
        let (Some(duration_ms), Some(ts)) = (config.play_duration_ms, sample.pts_or_dts()) else {
            return true;
        };
        let offset = (ts - stream.start_time.unwrap_or(0)) as f64 * stream.time_base.to_f64();
        let start = config.start_time_ms.unwrap_or(0) as f64 / 1000.0;
        offset - start <= duration_ms as f64 / 1000.0
    }

    // ========================================================================
    // Seek
    // ========================================================================

    fn seek(&mut self, source: &SharedSource) {
        let session = self.session.clone();
        let (target, rel, by_bytes) = {
            let play = session.play.lock();
            (play.seek.pos, play.seek.rel, play.seek.by_bytes)
        };
        let request = SeekRequest {
            min: if rel > 0 { target - rel + 2 } else { i64::MIN },
            target,
            max: if rel < 0 { target - rel - 2 } else { i64::MAX },
            by_bytes,
        };

        info!(target, by_bytes, "seeking");
        let started = session.now();
        let result = source.lock().seek(request);

        if let Err(err) = result {
            warn!(error = %err, "seek failed");
            let code = PlaybackError::from(err).code();
            session.play.lock().seek.req = false;
            session.notify(PlayerMessage::SeekComplete {
                position_ms: session.current_position_ms(),
                code,
            });
            return;
        }

        self.flush_all();
        if by_bytes {
            session.clocks.external.set(f64::NAN, 0);
        } else {
            session.clocks.external.set(target as f64 / 1_000_000.0, 0);
        }
        self.filled_once = false;

        let has_video = session.has_video();
        let mut play = session.play.lock();
        play.seek.req = false;
        play.seek.seeking = has_video;
        play.seek.find_next_key = has_video;
        play.eof = false;
        play.completed = false;
        play.last_error = None;
        play.latest_seek_load = Some((session.videoq.serial(), started));
        play.queue_attachments = has_video;

        if play.auto_resume {
            play.pause_req = false;
            play.auto_resume = false;
            session.update_pause_locked(&mut play);
        }
        session.toggle_buffering_locked(&mut play, true);
        if play.pause_req {
            session.step_frame_locked(&mut play);
        }
        drop(play);

        if !has_video {
            let position_ms = if by_bytes {
                0
            } else {
                (target - session.start_time_us()) / 1000
            };
            session.notify(PlayerMessage::SeekComplete { position_ms, code: 0 });
        }
    }

    fn queue_attachments(&self) {
        let session = &self.session;
        {
            let mut play = session.play.lock();
            if !play.queue_attachments {
                return;
            }
            play.queue_attachments = false;
        }

        let picture = session
            .streams
            .read()
            .video
            .as_ref()
            .and_then(|s| s.attached_picture.clone());
        if let Some(picture) = picture {
            let index = picture.stream_index;
            debug!(index, "queueing cover picture");
            let _ = session.videoq.put_sample(picture);
            let _ = session.videoq.put_end(index);
        }
    }

    // ========================================================================
    // Flow Control
    // ========================================================================

    /// True when the reader must not read ahead.
    fn backpressure(&self) -> bool {
        let session = &self.session;
        let (standby, eof) = {
            let play = session.play.lock();
            (play.pause_buffering, play.eof)
        };
        if standby {
            return true;
        }
        if session.streams.read().infinite_buffer {
            return false;
        }

        let config = &session.config;
        let bytes = session.videoq.size() + session.audioq.size();
        let full = bytes > config.max_buffer_bytes
            || (self.has_enough(MediaType::Audio) && self.has_enough(MediaType::Video));
        if full && !eof {
            session.toggle_buffering(false);
        }
        full
    }

    fn has_enough(&self, media_type: MediaType) -> bool {
        let session = &self.session;
        let streams = session.streams.read();
        let (queue, stream) = match media_type {
            MediaType::Video => (&session.videoq, streams.video.as_ref()),
            _ => (&session.audioq, streams.audio.as_ref()),
        };
        let Some(stream) = stream else {
            return true;
        };
        if queue.is_aborted() || stream.attached_picture.is_some() {
            return true;
        }
        let queued_secs = queue.duration() as f64 * stream.time_base.to_f64();
        queue.nb_packets() > session.config.min_frames && (queue.duration() == 0 || queued_secs > 1.0)
    }

    /// Ends buffering once enough packets are queued.
    fn check_buffering(&mut self) {
        let session = &self.session;
        if !session.config.packet_buffering || !session.play.lock().buffering_on {
            return;
        }

        let packets = |media_type: MediaType| {
            let queue = match media_type {
                MediaType::Video => &session.videoq,
                _ => &session.audioq,
            };
            session
                .selected_stream(media_type)
                .map_or(usize::MAX, |_| queue.nb_packets())
        };
        let fewest = packets(MediaType::Video).min(packets(MediaType::Audio));

        if !self.filled_once {
            if fewest > BUFFERING_FIRST_FILL_PACKETS {
                self.filled_once = true;
                session.toggle_buffering(false);
            }
            return;
        }

        let now = session.now();
        if now - self.last_buffering_check < BUFFERING_CHECK_INTERVAL {
            return;
        }
        self.last_buffering_check = now;

        let percent = (fewest.min(BUFFERING_FIRST_FILL_PACKETS) * 100 / BUFFERING_FIRST_FILL_PACKETS) as i32;
        let buffered_ms = session.playable_duration_ms() - session.current_position_ms();
        session.notify(PlayerMessage::BufferingUpdate { buffered_ms, percent });
        if fewest > MIN_MIN_FRAMES {
            session.toggle_buffering(false);
        }
    }

    /// Loops, exits or reports completion once every open stream drained.
    fn check_completion(&mut self) -> Completion {
        let session = &self.session;
        {
            let play = session.play.lock();
            if play.paused || play.completed {
                return Completion::Playing;
            }
        }

        let drained = |has: bool, finished: i32, serial: i32, remaining: usize| {
            !has || (finished == serial && remaining == 0)
        };
        let audio_done = drained(
            session.has_audio(),
            session.audio_finished.load(std::sync::atomic::Ordering::Acquire),
            session.audioq.serial(),
            session.sampq.nb_remaining(),
        );
        let video_done = drained(
            session.has_video(),
            session.video_finished.load(std::sync::atomic::Ordering::Acquire),
            session.videoq.serial(),
            session.pictq.nb_remaining(),
        );
        if !(audio_done && video_done) {
            return Completion::Playing;
        }

        // loop_count 0 repeats forever
        let restart = {
            let mut play = session.play.lock();
            match play.loops_left {
                0 => true,
                1 => false,
                _ => {
                    play.loops_left -= 1;
                    true
                }
            }
        };
        if restart {
            info!("looping back to start");
            let target = session.config.start_time_ms.unwrap_or(0) * 1000 + session.start_time_us();
            session.request_seek(target, 0, false);
            return Completion::Restarted;
        }

        if session.config.autoexit {
            info!("playback finished, leaving read loop");
            session.notify(PlayerMessage::Completed);
            return Completion::Exit;
        }

        let error = {
            let mut play = session.play.lock();
            play.completed = true;
            session.toggle_pause_locked(&mut play, true);
            play.last_error.clone()
        };
        session.update_stats();
        match error {
            Some(err) => {
                warn!(error = %err, "playback ended with error");
                session.notify(PlayerMessage::Error { code: err.code() });
            }
            None => {
                info!("playback completed");
                session.notify(PlayerMessage::Completed);
            }
        }
        Completion::Playing
    }

    fn finish(self, exit: ReadExit) {
        let session = &self.session;
        let prepared = session.play.lock().prepared;
        match exit {
            ReadExit::Failed(err) if !session.is_aborted() || !prepared => {
                warn!(error = %err, "read thread failed");
                session.notify(PlayerMessage::Error { code: err.code() });
            }
            ReadExit::Failed(err) => debug!(error = %err, "read thread ended after abort"),
            ReadExit::Clean => {}
        }
        session.notify(PlayerMessage::ExitReadThread);
        info!("read thread exited");
    }
}

fn close_if_last(source: SharedSource) {
    if let Some(source) = Arc::into_inner(source) {
        source.into_inner().close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PlayerConfig, PlayerState};
    use crate::messages::MessageQueue;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{
        AudioSink, CodecParameters, DecoderFactory, ManualClock, MediaDecoder, MediaRegistry,
        MediaSource, OpenOptions, RawFrame, Rational, SourceOpener, VideoSink,
    };
    use core_runtime::RuntimeEnvironment;
    use mockall::mock;
    use parking_lot::Mutex;

    const RATE: u32 = 8000;
    const FRAME_SAMPLES: i64 = 800;

    mock! {
        Opener {}
        impl SourceOpener for Opener {
            fn open(&self, url: &str, options: &OpenOptions) -> BridgeResult<Box<dyn MediaSource>>;
        }
    }

    mock! {
        Factory {}
        impl DecoderFactory for Factory {
            fn name(&self) -> &str;
            fn supports(&self, params: &CodecParameters) -> bool;
            fn open(&self, params: &CodecParameters) -> BridgeResult<Box<dyn MediaDecoder>>;
        }
    }

    /// Endless audio-only source of 100 ms frames.
    struct ToneSource {
        streams: Vec<StreamInfo>,
        next: i64,
    }

    impl MediaSource for ToneSource {
        fn find_stream_info(&mut self) -> BridgeResult<()> {
            Ok(())
        }

        fn streams(&self) -> &[StreamInfo] {
            &self.streams
        }

        fn read_next(&mut self) -> BridgeResult<CompressedSample> {
            let pts = self.next * FRAME_SAMPLES;
            self.next += 1;
            Ok(CompressedSample::new(0, vec![0u8; 64])
                .with_timestamps(Some(pts), Some(pts))
                .with_duration(FRAME_SAMPLES)
                .with_key_frame(true))
        }

        fn seek(&mut self, request: SeekRequest) -> BridgeResult<()> {
            self.next = request.target * i64::from(RATE) / 1_000_000 / FRAME_SAMPLES;
            Ok(())
        }

        fn duration_us(&self) -> Option<i64> {
            Some(60_000_000)
        }

        fn format_name(&self) -> &str {
            "tone"
        }
    }

    struct PcmDecoder;

    impl MediaDecoder for PcmDecoder {
        fn decode(&mut self, sample: Option<&CompressedSample>) -> BridgeResult<Vec<RawFrame>> {
            Ok(sample
                .map(|s| vec![RawFrame::audio(RATE, FRAME_SAMPLES as u32, s.payload.clone()).with_pts(s.pts)])
                .unwrap_or_default())
        }

        fn flush(&mut self) {}
    }

    struct NullSink;

    impl VideoSink for NullSink {
        fn present(&self, _frame: &RawFrame) -> BridgeResult<()> {
            Ok(())
        }
    }

    impl AudioSink for NullSink {
        fn present(&self, _frame: &RawFrame) -> BridgeResult<()> {
            Ok(())
        }

        fn queued_duration(&self) -> f64 {
            0.0
        }
    }

    fn session() -> (Arc<Session>, Arc<MessageQueue>) {
        let mut opener = MockOpener::new();
        opener.expect_open().returning(|_, _| {
            let params = CodecParameters::audio("pcm_s16le", RATE, 1);
            Ok(Box::new(ToneSource {
                streams: vec![StreamInfo::new(0, Rational::new(1, RATE as i32), params)],
                next: 0,
            }) as Box<dyn MediaSource>)
        });
        let mut factory = MockFactory::new();
        factory.expect_name().return_const("pcm".to_string());
        factory
            .expect_supports()
            .returning(|params| params.codec == "pcm_s16le");
        factory
            .expect_open()
            .returning(|_| Ok(Box::new(PcmDecoder) as Box<dyn MediaDecoder>));

        let registry = MediaRegistry::new()
            .with_default_opener(Arc::new(opener))
            .with_decoder(Arc::new(factory));
        let sink = Arc::new(NullSink);
        let env = RuntimeEnvironment::builder()
            .registry(registry)
            .video_sink(sink.clone())
            .audio_sink(sink)
            .clock(Arc::new(ManualClock::new(100.0)))
            .build()
            .unwrap();

        let messages = Arc::new(MessageQueue::new());
        let session = Session::new(
            env,
            PlayerConfig::default(),
            messages.clone(),
            Arc::new(Mutex::new(PlayerState::Preparing)),
        );
        (session, messages)
    }

    fn reader(session: &Arc<Session>) -> Reader {
        Reader {
            session: session.clone(),
            source: None,
            live_failures: 0,
            filled_once: false,
            last_buffering_check: 0.0,
        }
    }

    #[test]
    fn test_seek_flushes_queues_and_sets_external_clock() {
        let (session, messages) = session();
        let mut reader = reader(&session);
        reader
            .apply_change(SourceChange::Url {
                url: "tone://a".to_string(),
                mode: PlayMode::VodMp4,
            })
            .unwrap();
        let source = reader.source.clone().expect("source installed");
        assert!(session.has_audio());

        for _ in 0..40 {
            let sample = source.lock().read_next().unwrap();
            reader.route(sample);
        }
        // The decode worker only drains what fits into the sample ring
        assert!(session.audioq.nb_packets() > 20);
        let serial = session.audioq.serial();

        assert!(session.request_seek(5_000_000, 0, false));
        reader.seek(&source);

        // Only the flush marker is left
        assert!(session.audioq.serial() > serial);
        assert!(session.audioq.nb_packets() <= 1);
        assert_eq!(session.audioq.duration(), 0);
        assert!((session.clocks.external.get() - 5.0).abs() < 1e-6);
        assert!(!session.play.lock().seek.req);

        let mut landed = None;
        while let Some(message) = messages.try_get() {
            if let PlayerMessage::SeekComplete { position_ms, code } = message {
                landed = Some((position_ms, code));
            }
        }
        assert_eq!(landed, Some((5000, 0)));

        // Reading resumes from the target
        let next = source.lock().read_next().unwrap();
        assert_eq!(next.pts, Some(5 * i64::from(RATE)));

        session.shutdown();
    }

    #[test]
    fn test_user_switch_resets_live_failure_count() {
        let (session, _messages) = session();
        let mut reader = reader(&session);
        reader.live_failures = 1;

        reader
            .apply_change(SourceChange::Reconnect {
                url: "tone://a".to_string(),
                mode: PlayMode::VodMp4,
            })
            .unwrap();
        assert_eq!(reader.live_failures, 1);

        reader
            .apply_change(SourceChange::Url {
                url: "tone://b".to_string(),
                mode: PlayMode::VodMp4,
            })
            .unwrap();
        assert_eq!(reader.live_failures, 0);

        session.shutdown();
    }
}
