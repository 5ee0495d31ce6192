//! Media source (demuxer) contract.
//!
//! A [`SourceOpener`] turns a URL into a [`MediaSource`]; the reader thread
//! owns the source exclusively afterwards and pulls compressed samples from
//! it. Blocking calls must poll the [`InterruptPredicate`] supplied in
//! [`OpenOptions`] and return [`BridgeError::Interrupted`] once it reports
//! `true`.
//!
//! [`BridgeError::Interrupted`]: crate::error::BridgeError::Interrupted

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::{
    error::Result,
    media::{CompressedSample, StreamInfo},
    platform::{PlatformSend, PlatformSendSync},
};

/// Callback polled by blocking source operations; `true` means "give up".
pub type InterruptPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Options handed to [`SourceOpener::open`].
#[derive(Clone)]
pub struct OpenOptions {
    /// Maximum bytes to probe while detecting the format.
    pub probe_size: u64,
    /// Maximum time, in microseconds, spent analysing stream parameters.
    /// `0` lets the source decide.
    pub analyze_duration_us: i64,
    /// Container format hint such as `flv` or `hls`.
    pub format_hint: Option<String>,
    /// Free-form options forwarded to the source implementation.
    pub format_options: HashMap<String, String>,
    pub interrupt: InterruptPredicate,
}

impl OpenOptions {
    pub fn new(interrupt: InterruptPredicate) -> Self {
        Self {
            probe_size: 1024 * 1024,
            analyze_duration_us: 0,
            format_hint: None,
            format_options: HashMap::new(),
            interrupt,
        }
    }

    pub fn with_format_hint(mut self, hint: impl Into<String>) -> Self {
        self.format_hint = Some(hint.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.format_options.insert(key.into(), value.into());
        self
    }

    pub fn is_interrupted(&self) -> bool {
        (self.interrupt)()
    }
}

impl fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenOptions")
            .field("probe_size", &self.probe_size)
            .field("analyze_duration_us", &self.analyze_duration_us)
            .field("format_hint", &self.format_hint)
            .field("format_options", &self.format_options)
            .finish_non_exhaustive()
    }
}

/// Seek target with tolerance window.
///
/// Timestamps are in microseconds, or in bytes when `by_bytes` is set. The
/// source must land somewhere in `min..=max`, as close to `target` as it can.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekRequest {
    pub min: i64,
    pub target: i64,
    pub max: i64,
    pub by_bytes: bool,
}

impl SeekRequest {
    /// Seek to `target` with no tolerance restriction.
    pub fn absolute(target: i64) -> Self {
        Self {
            min: i64::MIN,
            target,
            max: i64::MAX,
            by_bytes: false,
        }
    }
}

/// Demuxer over a single opened URL.
pub trait MediaSource: PlatformSend {
    /// Reads enough of the input to populate stream parameters.
    fn find_stream_info(&mut self) -> Result<()>;

    /// Elementary streams, indexed by [`StreamInfo::index`].
    fn streams(&self) -> &[StreamInfo];

    /// Next compressed sample. Returns [`BridgeError::EndOfStream`] at the
    /// end of input.
    ///
    /// [`BridgeError::EndOfStream`]: crate::error::BridgeError::EndOfStream
    fn read_next(&mut self) -> Result<CompressedSample>;

    fn seek(&mut self, request: SeekRequest) -> Result<()>;

    /// Container duration in microseconds.
    fn duration_us(&self) -> Option<i64>;

    /// Container start time in microseconds.
    fn start_time_us(&self) -> Option<i64> {
        None
    }

    /// Overall bit rate in bits per second, `0` when unknown.
    fn bit_rate(&self) -> i64 {
        0
    }

    /// `true` for live inputs (RTMP, RTSP, live FLV, UDP).
    fn is_realtime(&self) -> bool {
        false
    }

    /// Short name of the detected container format.
    fn format_name(&self) -> &str;

    /// Discards any buffered input after a discontinuity.
    fn flush(&mut self) {}

    fn close(&mut self) {}
}

/// Factory that opens [`MediaSource`]s for URLs it recognises.
pub trait SourceOpener: PlatformSendSync {
    fn open(&self, url: &str, options: &OpenOptions) -> Result<Box<dyn MediaSource>>;
}
