//! # Source Opening and Stream Selection
//!
//! Opens a URL through the registry's [`SourceOpener`], probes its streams
//! and picks the audio and video stream to play. Also decides whether a
//! source switch can keep the running decoders.

use crate::config::{PlayMode, PlayerConfig};
use crate::error::{PlaybackError, Result};
use bridge_traits::{
    BridgeError, CodecParameters, InterruptPredicate, MediaRegistry, MediaSource, MediaType,
    OpenOptions, StreamInfo,
};
use core_runtime::logging::redact_url;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Demuxer shared between the reader thread and the prepared source table.
pub type SharedSource = Arc<Mutex<Box<dyn MediaSource>>>;

/// Granularity of interruptible waits.
const RETRY_POLL: Duration = Duration::from_millis(20);

/// A probed source with its selected streams.
#[derive(Clone)]
pub struct OpenedSource {
    pub url: String,
    pub mode: PlayMode,
    pub source: SharedSource,
    pub streams: Vec<StreamInfo>,
    pub video_stream: Option<usize>,
    pub audio_stream: Option<usize>,
    pub duration_us: Option<i64>,
    pub start_time_us: Option<i64>,
    pub bit_rate: i64,
    pub realtime: bool,
    pub format_name: String,
}

impl OpenedSource {
    pub fn stream(&self, index: usize) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.index == index)
    }

    pub fn video(&self) -> Option<&StreamInfo> {
        self.video_stream.and_then(|index| self.stream(index))
    }

    pub fn audio(&self) -> Option<&StreamInfo> {
        self.audio_stream.and_then(|index| self.stream(index))
    }

    /// Whether `other` wraps the same demuxer instance.
    pub fn same_source(&self, other: &SharedSource) -> bool {
        Arc::ptr_eq(&self.source, other)
    }
}

impl std::fmt::Debug for OpenedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedSource")
            .field("url", &redact_url(&self.url))
            .field("mode", &self.mode)
            .field("format", &self.format_name)
            .field("video_stream", &self.video_stream)
            .field("audio_stream", &self.audio_stream)
            .field("realtime", &self.realtime)
            .finish()
    }
}

/// Options handed to the opener for `mode`.
pub fn open_options(config: &PlayerConfig, mode: PlayMode, interrupt: InterruptPredicate) -> OpenOptions {
    let mut options = OpenOptions::new(interrupt);
    options.probe_size = config.probe_size_kb * 1024;
    options.analyze_duration_us = (config.analyze_duration_ms * 1000) as i64;
    if let Some(hint) = mode.format_hint() {
        options = options.with_format_hint(hint);
    }
    if mode.is_live() {
        options = options.with_option("live", "1");
    }
    options
}

/// Opens and probes `url`, retrying failed opens.
///
/// Up to `reconnect_count` retries are made, `reconnect_interval_ms` apart.
/// A forbidden response is returned immediately. The waits end early once
/// `interrupt` reports `true`.
#[instrument(skip(registry, config, interrupt), fields(url = %redact_url(url)))]
pub fn open_source(
    registry: &MediaRegistry,
    url: &str,
    mode: PlayMode,
    config: &PlayerConfig,
    interrupt: InterruptPredicate,
) -> Result<OpenedSource> {
    let opener = registry
        .opener_for(url)
        .map_err(|e| PlaybackError::ConnectFailed(e.to_string()))?;
    let options = open_options(config, mode, interrupt.clone());
    let interval = Duration::from_millis(config.reconnect_interval_ms);

    let mut attempt = 0;
    let mut source = loop {
        match opener.open(url, &options) {
            Ok(source) => break source,
            Err(BridgeError::Forbidden(msg)) => {
                warn!(%msg, "source refused access");
                return Err(PlaybackError::Forbidden(msg));
            }
            Err(err) => {
                if attempt >= config.reconnect_count || interrupt() {
                    warn!(attempt, error = %err, "giving up on source");
                    return Err(PlaybackError::ConnectFailed(err.to_string()));
                }
                attempt += 1;
                warn!(attempt, error = %err, "source open failed, retrying");
                if !wait_interruptible(interval, &interrupt) {
                    return Err(PlaybackError::ConnectFailed("interrupted".to_string()));
                }
            }
        }
    };

    if let Err(err) = source.find_stream_info() {
        source.close();
        return Err(match err {
            BridgeError::Unsupported(msg) => PlaybackError::UnsupportedFormat(msg),
            other => PlaybackError::ConnectFailed(other.to_string()),
        });
    }

    let streams = source.streams().to_vec();
    let (video_stream, audio_stream) = select_best_streams(&streams, registry, config);
    let format_name = source.format_name().to_string();
    let realtime = source.is_realtime() || is_realtime(&format_name, url);

    info!(
        format = %format_name,
        streams = streams.len(),
        ?video_stream,
        ?audio_stream,
        realtime,
        "source opened"
    );

    Ok(OpenedSource {
        url: url.to_string(),
        mode,
        duration_us: source.duration_us(),
        start_time_us: source.start_time_us(),
        bit_rate: source.bit_rate(),
        source: Arc::new(Mutex::new(source)),
        streams,
        video_stream,
        audio_stream,
        realtime,
        format_name,
    })
}

/// Sleeps for `duration` in short steps. Returns `false` if interrupted.
fn wait_interruptible(duration: Duration, interrupt: &InterruptPredicate) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if interrupt() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(RETRY_POLL.min(deadline - now));
    }
}

fn is_realtime(format_name: &str, url: &str) -> bool {
    matches!(format_name, "rtp" | "rtsp" | "sdp") || url.starts_with("rtp:") || url.starts_with("udp:")
}

/// Picks the video and audio stream indices.
///
/// Among playable video streams the most common codec wins and its first
/// stream is chosen. The first playable audio stream is used. Streams whose
/// codec has no decoder are skipped.
pub fn select_best_streams(
    streams: &[StreamInfo],
    registry: &MediaRegistry,
    config: &PlayerConfig,
) -> (Option<usize>, Option<usize>) {
    let playable = |stream: &StreamInfo, forced: &Option<String>| match forced {
        Some(name) => registry.find_decoder_by_name(name).is_some(),
        None => registry.is_supported(&stream.params),
    };

    let video = if config.video_disable {
        None
    } else {
        let candidates: Vec<&StreamInfo> = streams
            .iter()
            .filter(|s| s.media_type() == MediaType::Video && playable(s, &config.video_codec_name))
            .collect();

        let mut best: Option<(usize, usize)> = None;
        for stream in &candidates {
            let count = candidates
                .iter()
                .filter(|other| other.params.codec == stream.params.codec)
                .count();
            if best.map_or(true, |(_, best_count)| count > best_count) {
                best = Some((stream.index, count));
            }
        }
        best.map(|(index, _)| index)
    };

    let audio = if config.audio_disable {
        None
    } else {
        streams
            .iter()
            .find(|s| s.media_type() == MediaType::Audio && playable(s, &config.audio_codec_name))
            .map(|s| s.index)
    };

    for stream in streams {
        if stream.media_type() != MediaType::Other && !playable(stream, &None) {
            debug!(index = stream.index, codec = %stream.params.codec, "no decoder for stream");
        }
    }

    (video, audio)
}

/// Whether switching from `old` to `new` needs a fresh decoder.
pub fn needs_codec_reconfigure(old: Option<&CodecParameters>, new: &CodecParameters) -> bool {
    let Some(old) = old else {
        return true;
    };
    if old.media_type != new.media_type || old.codec != new.codec || old.extradata != new.extradata {
        return true;
    }
    match new.media_type {
        MediaType::Video => old.width != new.width || old.height != new.height,
        MediaType::Audio => old.sample_rate != new.sample_rate || old.channels != new.channels,
        MediaType::Other => true,
    }
}
