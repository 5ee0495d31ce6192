//! # Decoder Driver
//!
//! Drives one [`MediaDecoder`] from a [`PacketQueue`]: pulls samples, reacts
//! to flush and end markers, and resolves the presentation timestamp of every
//! frame it hands out.
//!
//! ## Serial handling
//!
//! The driver remembers the serial of the last packet it consumed. Frames the
//! codec produced for an older serial are discarded as soon as the queue
//! serial moves on. When an end marker has been drained, the serial is
//! published through the shared `finished` counter so the reader can detect
//! completion.

use crate::clock::AV_NOSYNC_THRESHOLD;
use crate::config::ReorderPts;
use crate::error::PlaybackError;
use crate::packet_queue::{Packet, PacketQueue};
use bridge_traits::{BridgeError, MediaDecoder, MediaType, RawFrame, Rational, StreamInfo};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Why [`Decoder::decode_frame`] stopped producing frames.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeStop {
    /// The packet queue was aborted.
    Aborted,
    /// The codec cannot continue with this stream.
    Fatal(PlaybackError),
}

/// Queue-fed decoder state machine.
pub struct Decoder {
    codec: Box<dyn MediaDecoder>,
    queue: Arc<PacketQueue>,
    media_type: MediaType,
    time_base: Rational,
    reorder: ReorderPts,
    pkt_serial: i32,
    finished: Arc<AtomicI32>,
    pending: VecDeque<RawFrame>,
    drained: bool,
    next_pts: Option<i64>,
    next_pts_tb: Rational,
    start_pts: Option<i64>,
    start_pts_tb: Rational,
}

impl Decoder {
    pub fn new(
        codec: Box<dyn MediaDecoder>,
        queue: Arc<PacketQueue>,
        stream: &StreamInfo,
        reorder: ReorderPts,
        finished: Arc<AtomicI32>,
    ) -> Self {
        finished.store(0, Ordering::Release);
        Self {
            codec,
            queue,
            media_type: stream.media_type(),
            time_base: stream.time_base,
            reorder,
            pkt_serial: -1,
            finished,
            pending: VecDeque::new(),
            drained: false,
            next_pts: None,
            next_pts_tb: Rational::zero(),
            start_pts: None,
            start_pts_tb: Rational::zero(),
        }
    }

    /// Timestamp the audio extrapolation restarts from after a flush.
    pub fn with_start_pts(mut self, start_pts: Option<i64>, time_base: Rational) -> Self {
        self.start_pts = start_pts;
        self.start_pts_tb = time_base;
        self.next_pts = start_pts;
        self.next_pts_tb = time_base;
        self
    }

    /// Serial of the packet the last frame was decoded from.
    pub fn pkt_serial(&self) -> i32 {
        self.pkt_serial
    }

    /// Serial whose end marker has been fully drained, `0` if none.
    pub fn finished(&self) -> i32 {
        self.finished.load(Ordering::Acquire)
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    /// Follows a source switch that kept this decoder.
    pub fn set_time_base(&mut self, time_base: Rational) {
        self.time_base = time_base;
    }

    /// Time base of the `pts` carried by frames returned from
    /// [`decode_frame`](Self::decode_frame).
    pub fn frame_time_base(&self, frame: &RawFrame) -> Rational {
        match self.media_type {
            MediaType::Audio if frame.sample_rate > 0 => Rational::new(1, frame.sample_rate as i32),
            _ => self.time_base,
        }
    }

    pub fn set_skip_non_reference(&mut self, skip: bool) {
        self.codec.set_skip_non_reference(skip);
    }

    /// Returns the next frame of the current serial.
    ///
    /// `Ok(None)` means the stream was drained after an end marker; the next
    /// call blocks until new packets (normally a flush after a seek) arrive.
    /// `on_starve` fires when the buffer-indicator queue runs dry and
    /// `on_empty` whenever the queue is found empty, so the reader can be
    /// woken.
    pub fn decode_frame(
        &mut self,
        packet_buffering: bool,
        mut on_starve: impl FnMut(),
        mut on_empty: impl FnMut(),
    ) -> Result<Option<RawFrame>, DecodeStop> {
        loop {
            if self.queue.is_aborted() {
                return Err(DecodeStop::Aborted);
            }

            if self.queue.serial() == self.pkt_serial {
                if let Some(mut frame) = self.pending.pop_front() {
                    self.stamp(&mut frame);
                    return Ok(Some(frame));
                }
                if self.drained {
                    self.drained = false;
                    self.finished.store(self.pkt_serial, Ordering::Release);
                    return Ok(None);
                }
            } else {
                self.pending.clear();
                self.drained = false;
            }

            let packet = loop {
                if self.queue.nb_packets() == 0 {
                    on_empty();
                }
                let item = self
                    .queue
                    .get_or_buffering(packet_buffering, self.finished(), &mut on_starve)
                    .map_err(|_| DecodeStop::Aborted)?;
                self.pkt_serial = item.serial;

                match item.packet {
                    Packet::Flush => self.reset(),
                    packet if item.serial == self.queue.serial() => break packet,
                    _ => {}
                }
            };

            let sample = match &packet {
                Packet::Sample(sample) => Some(sample),
                _ => None,
            };

            match self.codec.decode(sample) {
                Ok(frames) => self.pending.extend(frames),
                Err(err @ (BridgeError::Unsupported(_) | BridgeError::OutOfMemory)) => {
                    warn!(queue = self.queue.name(), error = %err, "decoder cannot continue");
                    return Err(DecodeStop::Fatal(err.into()));
                }
                Err(err) => {
                    debug!(queue = self.queue.name(), error = %err, "sample dropped after decode error");
                }
            }

            if sample.is_none() {
                self.drained = true;
            }
        }
    }

    fn reset(&mut self) {
        self.codec.flush();
        self.pending.clear();
        self.drained = false;
        self.finished.store(0, Ordering::Release);
        self.next_pts = self.start_pts;
        self.next_pts_tb = self.start_pts_tb;
    }

    fn stamp(&mut self, frame: &mut RawFrame) {
        match self.media_type {
            MediaType::Audio => self.stamp_audio(frame),
            _ => {
                frame.pts = match self.reorder {
                    ReorderPts::Auto => frame.best_effort_timestamp.or(frame.pts),
                    ReorderPts::On => frame.pts,
                    ReorderPts::Off => frame.pkt_dts,
                };
            }
        }
    }

    fn stamp_audio(&mut self, frame: &mut RawFrame) {
        let tb = self.frame_time_base(frame);
        let pts = frame
            .pts
            .or(frame.best_effort_timestamp)
            .map(|pts| self.time_base.rescale(pts, tb))
            .or_else(|| self.next_pts.map(|next| self.next_pts_tb.rescale(next, tb)));

        if let Some(pts) = pts {
            self.next_pts = Some(pts + i64::from(frame.nb_samples));
            self.next_pts_tb = tb;
        }
        frame.pts = pts;
    }

    pub fn close(mut self) {
        self.codec.close();
    }
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("queue", &self.queue.name())
            .field("pkt_serial", &self.pkt_serial)
            .field("finished", &self.finished())
            .field("pending", &self.pending.len())
            .finish()
    }
}

// ============================================================================
// Frame Rate Policies
// ============================================================================

/// Drops video frames that are already behind the master clock before they
/// reach the ring, allowing at most `framedrop` drops in a row.
#[derive(Debug, Clone, Default)]
pub struct EarlyFrameDrop {
    framedrop: i32,
    continuous: i32,
}

impl EarlyFrameDrop {
    pub fn new(framedrop: i32) -> Self {
        Self {
            framedrop,
            continuous: 0,
        }
    }

    /// `diff` is frame pts minus master clock. Returns `true` to drop.
    pub fn should_drop(&mut self, diff: f64, serial_current: bool, packets_queued: bool) -> bool {
        if self.framedrop <= 0 {
            return false;
        }

        let late = !diff.is_nan()
            && diff.abs() < AV_NOSYNC_THRESHOLD
            && diff < 0.0
            && serial_current
            && packets_queued;
        if !late {
            self.continuous = 0;
            return false;
        }

        self.continuous += 1;
        if self.continuous > self.framedrop {
            self.continuous = 0;
            return false;
        }
        true
    }
}

/// Whether the stream's frame rate is high enough to skip non-reference
/// frames. Rates at or above `cutoff` are considered bogus.
pub fn skips_non_reference(stream: &StreamInfo, max_fps: i32, cutoff: f64) -> bool {
    if max_fps < 0 {
        return false;
    }
    let limit = f64::from(max_fps);
    [stream.avg_frame_rate, stream.real_frame_rate]
        .iter()
        .map(|rate| rate.to_f64())
        .any(|fps| fps > limit && fps < cutoff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::{CodecParameters, CompressedSample};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CodecLog {
        flushes: usize,
        decoded: Vec<Option<i64>>,
        skip: bool,
    }

    /// One frame per sample; the payload byte selects failures.
    struct ScriptedCodec {
        log: Arc<Mutex<CodecLog>>,
        audio: bool,
    }

    impl MediaDecoder for ScriptedCodec {
        fn decode(
            &mut self,
            sample: Option<&CompressedSample>,
        ) -> bridge_traits::error::Result<Vec<RawFrame>> {
            self.log.lock().decoded.push(sample.and_then(|s| s.pts));
            let Some(sample) = sample else {
                return Ok(Vec::new());
            };
            match sample.payload.first() {
                Some(1) => Err(BridgeError::InvalidData("corrupt".into())),
                Some(2) => Err(BridgeError::Unsupported("profile".into())),
                _ if self.audio => Ok(vec![RawFrame::audio(1000, 100, vec![0u8; 4]).with_pts(sample.pts)]),
                _ => Ok(vec![RawFrame::video(16, 16, vec![0u8; 4])
                    .with_pts(sample.pts)
                    .with_pkt_dts(sample.dts)]),
            }
        }

        fn flush(&mut self) {
            self.log.lock().flushes += 1;
        }

        fn set_skip_non_reference(&mut self, skip: bool) {
            self.log.lock().skip = skip;
        }
    }

    fn video_stream() -> StreamInfo {
        StreamInfo::new(0, Rational::new(1, 1000), CodecParameters::video("h264", 16, 16))
    }

    fn audio_stream() -> StreamInfo {
        StreamInfo::new(1, Rational::new(1, 1000), CodecParameters::audio("aac", 1000, 2))
    }

    fn setup(stream: &StreamInfo, reorder: ReorderPts) -> (Decoder, Arc<PacketQueue>, Arc<Mutex<CodecLog>>) {
        let queue = Arc::new(PacketQueue::new("test"));
        queue.start();
        let log = Arc::new(Mutex::new(CodecLog::default()));
        let codec = ScriptedCodec {
            log: log.clone(),
            audio: stream.media_type() == MediaType::Audio,
        };
        let decoder = Decoder::new(
            Box::new(codec),
            queue.clone(),
            stream,
            reorder,
            Arc::new(AtomicI32::new(0)),
        );
        (decoder, queue, log)
    }

    fn sample(pts: i64, tag: u8) -> CompressedSample {
        CompressedSample::new(0, vec![tag]).with_timestamps(Some(pts), Some(pts - 1))
    }

    fn next(decoder: &mut Decoder) -> Option<RawFrame> {
        decoder.decode_frame(false, || {}, || {}).unwrap()
    }

    #[test]
    fn test_decodes_in_order_after_start_flush() {
        let (mut decoder, queue, log) = setup(&video_stream(), ReorderPts::Auto);
        queue.put_sample(sample(40, 0)).unwrap();
        queue.put_sample(sample(80, 0)).unwrap();

        assert_eq!(next(&mut decoder).unwrap().pts, Some(40));
        assert_eq!(next(&mut decoder).unwrap().pts, Some(80));
        assert_eq!(log.lock().flushes, 1);
        assert_eq!(decoder.pkt_serial(), queue.serial());
    }

    #[test]
    fn test_stale_samples_skipped_after_flush() {
        let (mut decoder, queue, log) = setup(&video_stream(), ReorderPts::Auto);
        queue.put_sample(sample(40, 0)).unwrap();
        queue.put_flush().unwrap();
        queue.put_sample(sample(5000, 0)).unwrap();

        // The first sample's serial is already outdated when it is popped
        assert_eq!(next(&mut decoder).unwrap().pts, Some(5000));
        assert_eq!(log.lock().flushes, 2);
        assert_eq!(log.lock().decoded, vec![Some(5000)]);
    }

    #[test]
    fn test_end_marker_publishes_finished_serial() {
        let (mut decoder, queue, _log) = setup(&video_stream(), ReorderPts::Auto);
        queue.put_sample(sample(40, 0)).unwrap();
        queue.put_end(0).unwrap();

        assert!(next(&mut decoder).is_some());
        assert_eq!(decoder.finished(), 0);
        assert!(next(&mut decoder).is_none());
        assert_eq!(decoder.finished(), queue.serial());

        // A flush re-arms the decoder
        queue.put_flush().unwrap();
        queue.put_sample(sample(0, 0)).unwrap();
        assert!(next(&mut decoder).is_some());
        assert_eq!(decoder.finished(), 0);
    }

    #[test]
    fn test_decode_error_drops_sample_only() {
        let (mut decoder, queue, _log) = setup(&video_stream(), ReorderPts::Auto);
        queue.put_sample(sample(40, 1)).unwrap();
        queue.put_sample(sample(80, 0)).unwrap();

        assert_eq!(next(&mut decoder).unwrap().pts, Some(80));
    }

    #[test]
    fn test_unsupported_is_fatal() {
        let (mut decoder, queue, _log) = setup(&video_stream(), ReorderPts::Auto);
        queue.put_sample(sample(40, 2)).unwrap();

        let result = decoder.decode_frame(false, || {}, || {});
        assert!(matches!(result, Err(DecodeStop::Fatal(e)) if e.is_format_error()));
    }

    #[test]
    fn test_abort_stops_decoding() {
        let (mut decoder, queue, _log) = setup(&video_stream(), ReorderPts::Auto);
        queue.abort();
        assert_eq!(decoder.decode_frame(false, || {}, || {}), Err(DecodeStop::Aborted));
    }

    #[test]
    fn test_reorder_policy_selects_timestamp() {
        let (mut decoder, queue, _log) = setup(&video_stream(), ReorderPts::Off);
        queue.put_sample(sample(40, 0)).unwrap();
        assert_eq!(next(&mut decoder).unwrap().pts, Some(39));

        let (mut decoder, queue, _log) = setup(&video_stream(), ReorderPts::On);
        queue.put_sample(sample(40, 0)).unwrap();
        assert_eq!(next(&mut decoder).unwrap().pts, Some(40));
    }

    #[test]
    fn test_audio_pts_rescaled_and_extrapolated() {
        let stream = audio_stream();
        let (mut decoder, queue, _log) = setup(&stream, ReorderPts::Auto);
        queue.put_sample(sample(500, 0)).unwrap();
        queue
            .put_sample(CompressedSample::new(1, vec![0u8]))
            .unwrap();

        // 500 ms at 1/1000 is sample 500 at 1000 Hz
        let first = next(&mut decoder).unwrap();
        assert_eq!(first.pts, Some(500));
        assert_eq!(decoder.frame_time_base(&first), Rational::new(1, 1000));

        // No timestamp: continue from previous pts + nb_samples
        let second = next(&mut decoder).unwrap();
        assert_eq!(second.pts, Some(600));
    }

    #[test]
    fn test_starvation_reported_on_indicator_queue() {
        let (mut decoder, queue, _log) = setup(&video_stream(), ReorderPts::Auto);
        queue.set_buffer_indicator(true);
        queue.put_sample(sample(40, 0)).unwrap();
        assert!(decoder.decode_frame(true, || {}, || {}).unwrap().is_some());

        let producer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                queue.put_sample(sample(80, 0)).unwrap();
            })
        };

        let mut starved = 0;
        let mut empty = 0;
        let frame = decoder
            .decode_frame(true, || starved += 1, || empty += 1)
            .unwrap();
        producer.join().unwrap();

        assert_eq!(frame.unwrap().pts, Some(80));
        assert_eq!(starved, 1);
        assert!(empty >= 1);
    }

    #[test]
    fn test_skip_non_reference_forwarded() {
        let (mut decoder, _queue, log) = setup(&video_stream(), ReorderPts::Auto);
        decoder.set_skip_non_reference(true);
        assert!(log.lock().skip);
    }

    #[test]
    fn test_early_drop_bounded_by_framedrop() {
        let mut policy = EarlyFrameDrop::new(2);
        assert!(policy.should_drop(-0.5, true, true));
        assert!(policy.should_drop(-0.5, true, true));
        assert!(!policy.should_drop(-0.5, true, true));
        assert!(policy.should_drop(-0.5, true, true));

        // Not late, stale serial, or nothing queued: keep
        assert!(!policy.should_drop(0.1, true, true));
        assert!(!policy.should_drop(-0.5, false, true));
        assert!(!policy.should_drop(-0.5, true, false));
        assert!(!policy.should_drop(-20.0, true, true));
        assert!(!policy.should_drop(f64::NAN, true, true));

        assert!(!EarlyFrameDrop::new(0).should_drop(-0.5, true, true));
    }

    #[test]
    fn test_high_fps_detection() {
        let stream = video_stream().with_frame_rate(Rational::new(60, 1));
        assert!(skips_non_reference(&stream, 31, 130.0));
        assert!(!skips_non_reference(&stream, -1, 130.0));
        assert!(!skips_non_reference(&stream, 60, 130.0));

        let bogus = video_stream().with_frame_rate(Rational::new(1000, 1));
        assert!(!skips_non_reference(&bogus, 31, 130.0));
    }
}
