//! Presentation contracts.
//!
//! Sinks are shared between the player threads, so every method takes
//! `&self`; implementations synchronise internally.

use crate::{error::Result, media::RawFrame, platform::PlatformSendSync};

/// Receives decoded pictures at their presentation time.
pub trait VideoSink: PlatformSendSync {
    fn present(&self, frame: &RawFrame) -> Result<()>;

    /// Redraws the audio visualization when no video stream is shown.
    fn redraw_visualization(&self) {}
}

/// Audio output device.
///
/// The player pushes PCM blocks ahead of time and derives the audio clock
/// from [`AudioSink::queued_duration`] and [`AudioSink::latency`].
pub trait AudioSink: PlatformSendSync {
    fn present(&self, frame: &RawFrame) -> Result<()>;

    /// Seconds of audio accepted but not yet played.
    fn queued_duration(&self) -> f64;

    /// Output latency in seconds, including `queued_duration`.
    fn latency(&self) -> f64 {
        self.queued_duration()
    }

    /// Discards queued audio.
    fn flush(&self) {}

    fn set_paused(&self, _paused: bool) {}

    fn set_playback_rate(&self, _rate: f32) {}

    fn set_muted(&self, _muted: bool) {}

    fn set_volume(&self, _left: f32, _right: f32) {}
}
