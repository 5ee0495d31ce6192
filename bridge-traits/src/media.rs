//! Media data types exchanged between the playback core and collaborators.
//!
//! Sources produce [`CompressedSample`]s, decoders turn them into
//! [`RawFrame`]s, and sinks present those frames. Timestamps are expressed in
//! units of the owning stream's [`Rational`] time base unless noted otherwise.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Microseconds per second; the unit of container-level durations.
pub const TIME_BASE_US: i64 = 1_000_000;

/// Media category of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    Audio,
    Video,
    /// Subtitles, data tracks and anything the player ignores.
    Other,
}

/// Exact fraction used for time bases, frame rates and aspect ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// The `0/1` rational, used for "unknown".
    pub const fn zero() -> Self {
        Self { num: 0, den: 1 }
    }

    /// Converts to floating point. A zero denominator yields `0.0`.
    pub fn to_f64(self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    pub fn is_valid(self) -> bool {
        self.num != 0 && self.den != 0
    }

    /// Swaps numerator and denominator.
    pub fn invert(self) -> Self {
        Self {
            num: self.den,
            den: self.num,
        }
    }

    /// Rescales `value` from this time base into `target`.
    pub fn rescale(self, value: i64, target: Rational) -> i64 {
        if !self.is_valid() || !target.is_valid() {
            return value;
        }
        let num = value as i128 * self.num as i128 * target.den as i128;
        let den = self.den as i128 * target.num as i128;
        (num / den) as i64
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::zero()
    }
}

/// Codec configuration of a stream, as reported by the demuxer.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecParameters {
    pub media_type: MediaType,
    /// Codec identifier, e.g. `h264`, `aac`.
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub channels: u16,
    /// Codec private data (SPS/PPS, AudioSpecificConfig, ...).
    pub extradata: Bytes,
    pub sample_aspect_ratio: Rational,
}

impl CodecParameters {
    pub fn video(codec: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            media_type: MediaType::Video,
            codec: codec.into(),
            width,
            height,
            sample_rate: 0,
            channels: 0,
            extradata: Bytes::new(),
            sample_aspect_ratio: Rational::zero(),
        }
    }

    pub fn audio(codec: impl Into<String>, sample_rate: u32, channels: u16) -> Self {
        Self {
            media_type: MediaType::Audio,
            codec: codec.into(),
            width: 0,
            height: 0,
            sample_rate,
            channels,
            extradata: Bytes::new(),
            sample_aspect_ratio: Rational::zero(),
        }
    }

    pub fn with_extradata(mut self, extradata: impl Into<Bytes>) -> Self {
        self.extradata = extradata.into();
        self
    }

    pub fn with_sample_aspect_ratio(mut self, sar: Rational) -> Self {
        self.sample_aspect_ratio = sar;
        self
    }
}

/// One elementary stream inside a container.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub index: usize,
    pub time_base: Rational,
    /// First timestamp of the stream in `time_base` units.
    pub start_time: Option<i64>,
    pub avg_frame_rate: Rational,
    /// Lowest frame rate that can represent all timestamps exactly.
    pub real_frame_rate: Rational,
    pub params: CodecParameters,
    /// Cover art carried as a single still image.
    pub attached_picture: Option<CompressedSample>,
}

impl StreamInfo {
    pub fn new(index: usize, time_base: Rational, params: CodecParameters) -> Self {
        Self {
            index,
            time_base,
            start_time: None,
            avg_frame_rate: Rational::zero(),
            real_frame_rate: Rational::zero(),
            params,
            attached_picture: None,
        }
    }

    pub fn with_frame_rate(mut self, rate: Rational) -> Self {
        self.avg_frame_rate = rate;
        self.real_frame_rate = rate;
        self
    }

    pub fn with_start_time(mut self, start_time: i64) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn with_attached_picture(mut self, picture: CompressedSample) -> Self {
        self.attached_picture = Some(picture);
        self
    }

    pub fn media_type(&self) -> MediaType {
        self.params.media_type
    }

    /// Best available frame rate guess: average rate, else the real rate.
    pub fn guess_frame_rate(&self) -> Rational {
        if self.avg_frame_rate.is_valid() {
            self.avg_frame_rate
        } else {
            self.real_frame_rate
        }
    }
}

/// Compressed sample (packet) demuxed from a source.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedSample {
    pub payload: Bytes,
    pub stream_index: usize,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: i64,
    pub key_frame: bool,
    /// Set by live sources when the timeline jumps; the player flushes its
    /// queues when it sees one.
    pub discontinuity: bool,
    /// Byte position in the source, when known.
    pub pos: Option<i64>,
}

impl CompressedSample {
    pub fn new(stream_index: usize, payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            stream_index,
            pts: None,
            dts: None,
            duration: 0,
            key_frame: false,
            discontinuity: false,
            pos: None,
        }
    }

    pub fn with_timestamps(mut self, pts: Option<i64>, dts: Option<i64>) -> Self {
        self.pts = pts;
        self.dts = dts;
        self
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_key_frame(mut self, key_frame: bool) -> Self {
        self.key_frame = key_frame;
        self
    }

    pub fn with_discontinuity(mut self, discontinuity: bool) -> Self {
        self.discontinuity = discontinuity;
        self
    }

    pub fn with_pos(mut self, pos: i64) -> Self {
        self.pos = Some(pos);
        self
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Presentation timestamp, falling back to the decode timestamp.
    pub fn pts_or_dts(&self) -> Option<i64> {
        self.pts.or(self.dts)
    }
}

/// Decoded picture or block of PCM samples.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub payload: Bytes,
    pub pts: Option<i64>,
    pub pkt_dts: Option<i64>,
    pub best_effort_timestamp: Option<i64>,
    pub pos: Option<i64>,
    pub width: u32,
    pub height: u32,
    pub sample_aspect_ratio: Rational,
    pub sample_rate: u32,
    pub nb_samples: u32,
}

impl RawFrame {
    pub fn video(width: u32, height: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            pts: None,
            pkt_dts: None,
            best_effort_timestamp: None,
            pos: None,
            width,
            height,
            sample_aspect_ratio: Rational::zero(),
            sample_rate: 0,
            nb_samples: 0,
        }
    }

    pub fn audio(sample_rate: u32, nb_samples: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            pts: None,
            pkt_dts: None,
            best_effort_timestamp: None,
            pos: None,
            width: 0,
            height: 0,
            sample_aspect_ratio: Rational::zero(),
            sample_rate,
            nb_samples,
        }
    }

    /// Sets `pts`, `pkt_dts` and `best_effort_timestamp` together.
    pub fn with_pts(mut self, pts: Option<i64>) -> Self {
        self.pts = pts;
        self.pkt_dts = pts;
        self.best_effort_timestamp = pts;
        self
    }

    pub fn with_pkt_dts(mut self, dts: Option<i64>) -> Self {
        self.pkt_dts = dts;
        self
    }

    pub fn with_pos(mut self, pos: Option<i64>) -> Self {
        self.pos = pos;
        self
    }

    pub fn with_sample_aspect_ratio(mut self, sar: Rational) -> Self {
        self.sample_aspect_ratio = sar;
        self
    }
}
