//! # Player Configuration
//!
//! Configuration types for the playback pipeline.

use crate::error::{PlaybackError, Result};
use serde::{Deserialize, Serialize};

/// Smallest video ring the refresh loop can work with.
pub const VIDEO_PICTURE_QUEUE_SIZE_MIN: usize = 3;
/// Upper bound of any decoded frame ring.
pub const FRAME_QUEUE_SIZE_MAX: usize = 16;

/// Delivery mode of the source, used for format hints and live handling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayMode {
    #[default]
    Local,
    VodFlv,
    VodHls,
    VodMp4,
    FlvLive,
    Rtmp,
}

impl PlayMode {
    /// Live modes reconnect on read errors instead of reporting them.
    pub fn is_live(self) -> bool {
        matches!(self, PlayMode::FlvLive | PlayMode::Rtmp)
    }

    /// Container hint handed to the source opener.
    pub fn format_hint(self) -> Option<&'static str> {
        match self {
            PlayMode::Local => None,
            PlayMode::VodFlv | PlayMode::FlvLive | PlayMode::Rtmp => Some("flv"),
            PlayMode::VodHls => Some("hls"),
            PlayMode::VodMp4 => Some("mp4"),
        }
    }
}

/// Whether the reader ignores the backpressure limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfiniteBuffer {
    /// Enabled for realtime sources only.
    Auto,
    On,
    Off,
}

/// Which timestamp a decoded video frame is presented at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReorderPts {
    /// Best-effort timestamp computed by the decoder.
    Auto,
    /// Frame pts.
    On,
    /// Packet dts.
    Off,
}

/// Player configuration.
///
/// Controls buffering limits, synchronisation policy, reconnect behaviour and
/// start-up options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Combined compressed bytes (audio + video) the reader buffers before
    /// pausing.
    ///
    /// Default: 15 MiB.
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,

    /// Packets per queue considered "enough" for smooth playback.
    ///
    /// Default: 50000 (limits by bytes only).
    #[serde(default = "default_min_frames")]
    pub min_frames: usize,

    /// Default: `Auto`.
    #[serde(default = "default_infinite_buffer")]
    pub infinite_buffer: InfiniteBuffer,

    /// `0` disables frame dropping. A positive value enables late drops in
    /// the refresh loop and allows that many consecutive early drops in the
    /// video decoder.
    ///
    /// Default: 1.
    #[serde(default = "default_framedrop")]
    pub framedrop: i32,

    /// Pause playback while queues refill and report buffering messages.
    ///
    /// Default: true.
    #[serde(default = "default_true")]
    pub packet_buffering: bool,

    /// Decoded video frames kept ahead of display (clamped to 3..=16).
    #[serde(default = "default_video_picture_queue_size")]
    pub video_picture_queue_size: usize,

    /// Decoded audio frames kept ahead of output.
    #[serde(default = "default_sample_queue_size")]
    pub sample_queue_size: usize,

    /// Number of times to play the media; `0` loops forever.
    #[serde(default = "default_loop_count")]
    pub loop_count: u32,

    /// Stop the reader once playback completes.
    #[serde(default)]
    pub autoexit: bool,

    /// Start playing as soon as the source is prepared.
    #[serde(default = "default_true")]
    pub start_on_prepared: bool,

    /// When not starting on prepared, mute and render the first video frame
    /// before pausing.
    #[serde(default)]
    pub view_first_video_frame: bool,

    /// Hold audio output until the first video frame has been shown.
    #[serde(default = "default_true")]
    pub sync_av_start: bool,

    /// Upper bound for the `sync_av_start` hold.
    #[serde(default = "default_first_frame_wait_ms")]
    pub first_frame_wait_ms: u64,

    #[serde(default)]
    pub video_disable: bool,

    #[serde(default)]
    pub audio_disable: bool,

    /// Force a decoder by name for video streams.
    #[serde(default)]
    pub video_codec_name: Option<String>,

    /// Force a decoder by name for audio streams.
    #[serde(default)]
    pub audio_codec_name: Option<String>,

    #[serde(default = "default_decoder_reorder_pts")]
    pub decoder_reorder_pts: ReorderPts,

    /// Frame rate above which non-reference frames are skipped; `-1`
    /// disables skipping.
    #[serde(default = "default_max_fps")]
    pub max_fps: i32,

    /// Frame rates at or above this are treated as bogus and never trigger
    /// skipping.
    #[serde(default = "default_high_fps_cutoff")]
    pub high_fps_cutoff: f64,

    /// Source open retries, and read timeouts tolerated before reporting a
    /// disconnect.
    #[serde(default = "default_reconnect_count")]
    pub reconnect_count: u32,

    /// Wait between open retries; also the disconnect window during which
    /// blocking reads are interrupted.
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// A live stream still buffering after this long is re-opened.
    #[serde(default = "default_live_rebuffer_reconnect_ms")]
    pub live_rebuffer_reconnect_ms: u64,

    #[serde(default = "default_probe_size_kb")]
    pub probe_size_kb: u64,

    /// `0` lets the source decide.
    #[serde(default)]
    pub analyze_duration_ms: u64,

    /// Seek issued right after the source is prepared.
    #[serde(default)]
    pub seek_at_start_ms: i64,

    /// Play range start.
    #[serde(default)]
    pub start_time_ms: Option<i64>,

    /// Play range length.
    #[serde(default)]
    pub play_duration_ms: Option<i64>,

    /// Frame durations above this (seconds) are treated as timestamp jumps.
    #[serde(default = "default_max_frame_duration")]
    pub max_frame_duration: f64,

    /// Refresh loop cadence in seconds.
    #[serde(default = "default_refresh_rate")]
    pub refresh_rate: f64,

    /// Audio-only visualization redraw interval in seconds.
    #[serde(default = "default_visualization_interval")]
    pub visualization_interval: f64,

    /// Size of the prepared source slot table.
    #[serde(default = "default_max_prepared_sources")]
    pub max_prepared_sources: usize,

    /// Seconds of audio kept queued in the audio sink.
    #[serde(default = "default_audio_buffer_target")]
    pub audio_buffer_target: f64,

    #[serde(default = "default_play_mode")]
    pub play_mode: PlayMode,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            max_buffer_bytes: default_max_buffer_bytes(),
            min_frames: default_min_frames(),
            infinite_buffer: default_infinite_buffer(),
            framedrop: default_framedrop(),
            packet_buffering: true,
            video_picture_queue_size: default_video_picture_queue_size(),
            sample_queue_size: default_sample_queue_size(),
            loop_count: default_loop_count(),
            autoexit: false,
            start_on_prepared: true,
            view_first_video_frame: false,
            sync_av_start: true,
            first_frame_wait_ms: default_first_frame_wait_ms(),
            video_disable: false,
            audio_disable: false,
            video_codec_name: None,
            audio_codec_name: None,
            decoder_reorder_pts: default_decoder_reorder_pts(),
            max_fps: default_max_fps(),
            high_fps_cutoff: default_high_fps_cutoff(),
            reconnect_count: default_reconnect_count(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            live_rebuffer_reconnect_ms: default_live_rebuffer_reconnect_ms(),
            probe_size_kb: default_probe_size_kb(),
            analyze_duration_ms: 0,
            seek_at_start_ms: 0,
            start_time_ms: None,
            play_duration_ms: None,
            max_frame_duration: default_max_frame_duration(),
            refresh_rate: default_refresh_rate(),
            visualization_interval: default_visualization_interval(),
            max_prepared_sources: default_max_prepared_sources(),
            audio_buffer_target: default_audio_buffer_target(),
            play_mode: default_play_mode(),
        }
    }
}

impl PlayerConfig {
    /// Configuration for live FLV/RTMP streams.
    ///
    /// - Unlimited buffering (the source dictates the pace)
    /// - Frame dropping enabled for catch-up
    pub fn live() -> Self {
        Self {
            play_mode: PlayMode::FlvLive,
            infinite_buffer: InfiniteBuffer::On,
            framedrop: 5,
            ..Default::default()
        }
    }

    /// Configuration that trades smoothness for start-up latency.
    ///
    /// - Small compressed buffer (2 MiB, 25 packets per queue)
    /// - Minimal video ring
    /// - Shorter audio hold and queue
    pub fn low_latency() -> Self {
        Self {
            max_buffer_bytes: 2 * 1024 * 1024,
            min_frames: 25,
            video_picture_queue_size: VIDEO_PICTURE_QUEUE_SIZE_MIN,
            first_frame_wait_ms: 500,
            audio_buffer_target: 0.1,
            ..Default::default()
        }
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: PlayerConfig = serde_json::from_str(json)
            .map_err(|e| PlaybackError::InvalidArgument(format!("invalid player config: {}", e)))?;
        config
            .validate()
            .map_err(PlaybackError::InvalidArgument)?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_buffer_bytes == 0 {
            return Err("max_buffer_bytes must be > 0".to_string());
        }

        if self.min_frames == 0 {
            return Err("min_frames must be > 0".to_string());
        }

        if self.sample_queue_size == 0 || self.sample_queue_size > FRAME_QUEUE_SIZE_MAX {
            return Err(format!(
                "sample_queue_size must be between 1 and {}",
                FRAME_QUEUE_SIZE_MAX
            ));
        }

        if !(self.refresh_rate > 0.0) {
            return Err("refresh_rate must be > 0".to_string());
        }

        if !(self.max_frame_duration > 0.0) {
            return Err("max_frame_duration must be > 0".to_string());
        }

        if !(self.audio_buffer_target > 0.0) {
            return Err("audio_buffer_target must be > 0".to_string());
        }

        if self.max_prepared_sources == 0 {
            return Err("max_prepared_sources must be > 0".to_string());
        }

        if let Some(duration) = self.play_duration_ms {
            if duration <= 0 {
                return Err("play_duration_ms must be > 0".to_string());
            }
        }

        if self.max_fps >= 0 && f64::from(self.max_fps) >= self.high_fps_cutoff {
            return Err("max_fps must be below high_fps_cutoff".to_string());
        }

        Ok(())
    }

    /// Video ring capacity after clamping.
    pub fn video_queue_capacity(&self) -> usize {
        self.video_picture_queue_size
            .clamp(VIDEO_PICTURE_QUEUE_SIZE_MIN, FRAME_QUEUE_SIZE_MAX)
    }

    /// Resolves `infinite_buffer` for a source.
    pub fn infinite_buffer_for(&self, realtime: bool) -> bool {
        match self.infinite_buffer {
            InfiniteBuffer::Auto => realtime,
            InfiniteBuffer::On => true,
            InfiniteBuffer::Off => false,
        }
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_true() -> bool {
    true
}

fn default_max_buffer_bytes() -> usize {
    15 * 1024 * 1024
}

fn default_min_frames() -> usize {
    50_000
}

fn default_infinite_buffer() -> InfiniteBuffer {
    InfiniteBuffer::Auto
}

fn default_framedrop() -> i32 {
    1
}

fn default_video_picture_queue_size() -> usize {
    VIDEO_PICTURE_QUEUE_SIZE_MIN
}

fn default_sample_queue_size() -> usize {
    9
}

fn default_loop_count() -> u32 {
    1
}

fn default_first_frame_wait_ms() -> u64 {
    2000
}

fn default_decoder_reorder_pts() -> ReorderPts {
    ReorderPts::Auto
}

fn default_max_fps() -> i32 {
    31
}

fn default_high_fps_cutoff() -> f64 {
    130.0
}

fn default_reconnect_count() -> u32 {
    3
}

fn default_reconnect_interval_ms() -> u64 {
    3000
}

fn default_live_rebuffer_reconnect_ms() -> u64 {
    1000
}

fn default_probe_size_kb() -> u64 {
    1024
}

fn default_max_frame_duration() -> f64 {
    10.0
}

fn default_refresh_rate() -> f64 {
    0.01
}

fn default_visualization_interval() -> f64 {
    0.02
}

fn default_max_prepared_sources() -> usize {
    5
}

fn default_audio_buffer_target() -> f64 {
    0.2
}

fn default_play_mode() -> PlayMode {
    PlayMode::Local
}

// ============================================================================
// Player State
// ============================================================================

/// Lifecycle state of a [`Player`](crate::Player).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerState {
    /// No source set.
    Idle,
    /// Source opening in the background.
    Preparing,
    /// Source opened, waiting for `start()`.
    Prepared,
    Started,
    Paused,
    /// End of media reached.
    Completed,
    Stopped,
    /// A fatal error was reported.
    Error,
}

impl PlayerState {
    /// Returns `true` if a session is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Preparing | Self::Prepared | Self::Started | Self::Paused | Self::Completed
        )
    }

    /// Returns `true` if the player must be reset before reuse.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PlayerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_buffer_bytes, 15 * 1024 * 1024);
        assert_eq!(config.min_frames, 50_000);
        assert_eq!(config.loop_count, 1);
        assert_eq!(config.play_mode, PlayMode::Local);
        assert_eq!(config.max_fps, 31);
    }

    #[test]
    fn test_presets() {
        let live = PlayerConfig::live();
        assert!(live.validate().is_ok());
        assert!(live.play_mode.is_live());
        assert!(live.infinite_buffer_for(false));

        let low = PlayerConfig::low_latency();
        assert!(low.validate().is_ok());
        assert!(low.max_buffer_bytes < PlayerConfig::default().max_buffer_bytes);
    }

    #[test]
    fn test_config_validation() {
        let mut config = PlayerConfig::default();

        config.max_buffer_bytes = 0;
        assert!(config.validate().is_err());
        config.max_buffer_bytes = 1024;

        config.sample_queue_size = 17;
        assert!(config.validate().is_err());
        config.sample_queue_size = 9;

        config.refresh_rate = 0.0;
        assert!(config.validate().is_err());
        config.refresh_rate = 0.01;

        config.max_fps = 200;
        assert!(config.validate().is_err());
        config.max_fps = -1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_video_queue_capacity_is_clamped() {
        let mut config = PlayerConfig::default();
        config.video_picture_queue_size = 1;
        assert_eq!(config.video_queue_capacity(), 3);
        config.video_picture_queue_size = 64;
        assert_eq!(config.video_queue_capacity(), 16);
        config.video_picture_queue_size = 8;
        assert_eq!(config.video_queue_capacity(), 8);
    }

    #[test]
    fn test_infinite_buffer_auto_follows_realtime() {
        let config = PlayerConfig::default();
        assert!(config.infinite_buffer_for(true));
        assert!(!config.infinite_buffer_for(false));
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = PlayerConfig::from_json(
            r#"{"loop_count": 0, "play_mode": "flv_live", "decoder_reorder_pts": "off"}"#,
        )
        .unwrap();

        assert_eq!(config.loop_count, 0);
        assert_eq!(config.play_mode, PlayMode::FlvLive);
        assert_eq!(config.decoder_reorder_pts, ReorderPts::Off);
        assert_eq!(config.reconnect_count, 3);
        assert!(config.packet_buffering);
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        let err = PlayerConfig::from_json(r#"{"max_buffer_bytes": 0}"#).unwrap_err();
        assert_eq!(err.code(), -4);

        assert!(PlayerConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_player_state() {
        assert!(PlayerState::Started.is_active());
        assert!(PlayerState::Completed.is_active());
        assert!(!PlayerState::Idle.is_active());

        assert!(PlayerState::Stopped.is_terminal());
        assert!(!PlayerState::Paused.is_terminal());
    }
}
