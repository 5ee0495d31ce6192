//! # Player Usage Example
//!
//! Plays a synthetic three second tone through the full pipeline: reader,
//! audio decode worker and refresh loop, with the host side reduced to a
//! PCM passthrough decoder and a sink that drains in real time.
//!
//! Run with: `cargo run --example playback_demo --package core-playback`

use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    AudioSink, BridgeError, Clock, CodecParameters, CompressedSample, DecoderFactory, MediaDecoder,
    MediaRegistry, MediaSource, OpenOptions, RawFrame, Rational, SeekRequest, SourceOpener,
    StreamInfo, SystemClock, VideoSink,
};
use core_playback::{Player, PlayerConfig, PlayerMessage};
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use core_runtime::RuntimeEnvironment;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

const SAMPLE_RATE: u32 = 44_100;
const CHANNELS: u16 = 2;
const FRAME_SAMPLES: usize = 1024;

// ============================================================================
// Tone Source (demuxer)
// ============================================================================

struct ToneSource {
    streams: Vec<StreamInfo>,
    total_samples: usize,
    position: usize,
    frequency: f64,
}

impl ToneSource {
    fn new(duration_secs: f64, frequency: f64) -> Self {
        let params = CodecParameters::audio("pcm_s16le", SAMPLE_RATE, CHANNELS);
        Self {
            streams: vec![StreamInfo::new(0, Rational::new(1, SAMPLE_RATE as i32), params)],
            total_samples: (f64::from(SAMPLE_RATE) * duration_secs) as usize,
            position: 0,
            frequency,
        }
    }
}

impl MediaSource for ToneSource {
    fn find_stream_info(&mut self) -> BridgeResult<()> {
        Ok(())
    }

    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_next(&mut self) -> BridgeResult<CompressedSample> {
        if self.position >= self.total_samples {
            return Err(BridgeError::EndOfStream);
        }

        let count = FRAME_SAMPLES.min(self.total_samples - self.position);
        let mut pcm = Vec::with_capacity(count * CHANNELS as usize * 2);
        for i in 0..count {
            let t = (self.position + i) as f64 / f64::from(SAMPLE_RATE);
            let value = ((2.0 * std::f64::consts::PI * self.frequency * t).sin() * 0.3 * 32767.0) as i16;
            for _ in 0..CHANNELS {
                pcm.extend_from_slice(&value.to_le_bytes());
            }
        }

        let pts = self.position as i64;
        self.position += count;
        Ok(CompressedSample::new(0, pcm)
            .with_timestamps(Some(pts), Some(pts))
            .with_duration(count as i64)
            .with_key_frame(true))
    }

    fn seek(&mut self, request: SeekRequest) -> BridgeResult<()> {
        let sample = request.target.max(0) * i64::from(SAMPLE_RATE) / 1_000_000;
        self.position = (sample as usize).min(self.total_samples);
        Ok(())
    }

    fn duration_us(&self) -> Option<i64> {
        Some(self.total_samples as i64 * 1_000_000 / i64::from(SAMPLE_RATE))
    }

    fn format_name(&self) -> &str {
        "tone"
    }
}

struct ToneOpener;

impl SourceOpener for ToneOpener {
    fn open(&self, _url: &str, _options: &OpenOptions) -> BridgeResult<Box<dyn MediaSource>> {
        Ok(Box::new(ToneSource::new(3.0, 440.0)))
    }
}

// ============================================================================
// PCM Decoder
// ============================================================================

struct PcmDecoder;

impl MediaDecoder for PcmDecoder {
    fn decode(&mut self, sample: Option<&CompressedSample>) -> BridgeResult<Vec<RawFrame>> {
        let Some(sample) = sample else {
            return Ok(Vec::new());
        };
        let samples = sample.size() / (CHANNELS as usize * 2);
        Ok(vec![RawFrame::audio(SAMPLE_RATE, samples as u32, sample.payload.clone()).with_pts(sample.pts)])
    }

    fn flush(&mut self) {}
}

struct PcmDecoderFactory;

impl DecoderFactory for PcmDecoderFactory {
    fn name(&self) -> &str {
        "pcm"
    }

    fn supports(&self, params: &CodecParameters) -> bool {
        params.codec == "pcm_s16le"
    }

    fn open(&self, _params: &CodecParameters) -> BridgeResult<Box<dyn MediaDecoder>> {
        Ok(Box::new(PcmDecoder))
    }
}

// ============================================================================
// Output
// ============================================================================

struct NullVideo;

impl VideoSink for NullVideo {
    fn present(&self, _frame: &RawFrame) -> BridgeResult<()> {
        Ok(())
    }
}

/// Pretends to play PCM: queued audio drains with the wall clock.
struct RealtimeAudio {
    clock: SystemClock,
    play_until: Mutex<f64>,
}

impl AudioSink for RealtimeAudio {
    fn present(&self, frame: &RawFrame) -> BridgeResult<()> {
        let now = self.clock.monotonic_seconds();
        let mut until = self.play_until.lock();
        *until = until.max(now) + f64::from(frame.nb_samples) / f64::from(frame.sample_rate);
        Ok(())
    }

    fn queued_duration(&self) -> f64 {
        (*self.play_until.lock() - self.clock.monotonic_seconds()).max(0.0)
    }

    fn flush(&self) {
        *self.play_until.lock() = 0.0;
    }
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(LoggingConfig::default().with_format(LogFormat::Compact))?;

    println!("=== Player Demo ===\n");

    let registry = MediaRegistry::new()
        .with_default_opener(Arc::new(ToneOpener))
        .with_decoder(Arc::new(PcmDecoderFactory));
    let env = RuntimeEnvironment::builder()
        .registry(registry)
        .video_sink(Arc::new(NullVideo))
        .audio_sink(Arc::new(RealtimeAudio {
            clock: SystemClock::new(),
            play_until: Mutex::new(0.0),
        }))
        .build()?;

    let player = Player::new(env, PlayerConfig::default())?;
    player.prepare("tone://a440")?;

    let messages = player.messages();
    while let Some(message) = messages.get_timeout(Duration::from_secs(10)) {
        match message {
            PlayerMessage::Prepared => {
                println!("Prepared, duration {} ms", player.duration_ms());
            }
            PlayerMessage::Progress { position_ms, duration_ms } => {
                println!("  {:>5} / {} ms", position_ms, duration_ms);
            }
            PlayerMessage::Completed => {
                println!("\nPlayback completed");
                break;
            }
            PlayerMessage::Error { code } => {
                println!("\nPlayback failed with code {}", code);
                break;
            }
            other => println!("[{:?}] {}", other.severity(), other.description()),
        }
    }

    let stats = player.stats();
    println!("\nAudio cache at exit: {} packets", stats.audio_cache.packets);
    player.wait_stop();

    println!("\n=== Demo Complete ===");
    Ok(())
}
