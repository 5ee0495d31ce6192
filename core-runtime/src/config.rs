//! # Runtime Environment
//!
//! Collects the host-provided collaborators a player needs before it can be
//! constructed.
//!
//! ## Overview
//!
//! The environment uses a builder that enforces fail-fast validation: every
//! required bridge must be supplied, otherwise `build()` returns
//! [`Error::CapabilityMissing`] with an actionable message.
//!
//! ## Required Dependencies
//!
//! - `MediaRegistry` with at least one source opener and one decoder factory
//! - `VideoSink` - Picture presentation
//! - `AudioSink` - PCM output
//!
//! ## Optional Dependencies (with defaults)
//!
//! - `Clock` - Monotonic time source (default: [`SystemClock`])
//! - `LoggerSink` - Host log forwarding (default: none)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::RuntimeEnvironment;
//! use std::sync::Arc;
//!
//! let env = RuntimeEnvironment::builder()
//!     .registry(registry)
//!     .video_sink(Arc::new(MySurface::new()))
//!     .audio_sink(Arc::new(MyAudioTrack::new()))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{AudioSink, Clock, LoggerSink, MediaRegistry, SystemClock, VideoSink};
use std::fmt;
use std::sync::Arc;

/// Host collaborators shared by every player created from this environment.
#[derive(Clone)]
pub struct RuntimeEnvironment {
    pub registry: MediaRegistry,
    pub video_sink: Arc<dyn VideoSink>,
    pub audio_sink: Arc<dyn AudioSink>,
    pub clock: Arc<dyn Clock>,
    pub logger_sink: Option<Arc<dyn LoggerSink>>,
}

impl fmt::Debug for RuntimeEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeEnvironment")
            .field("registry", &self.registry)
            .field("logger_sink", &self.logger_sink.is_some())
            .finish_non_exhaustive()
    }
}

impl RuntimeEnvironment {
    pub fn builder() -> RuntimeEnvironmentBuilder {
        RuntimeEnvironmentBuilder::default()
    }
}

/// Builder for [`RuntimeEnvironment`].
#[derive(Default)]
pub struct RuntimeEnvironmentBuilder {
    registry: Option<MediaRegistry>,
    video_sink: Option<Arc<dyn VideoSink>>,
    audio_sink: Option<Arc<dyn AudioSink>>,
    clock: Option<Arc<dyn Clock>>,
    logger_sink: Option<Arc<dyn LoggerSink>>,
}

impl RuntimeEnvironmentBuilder {
    pub fn registry(mut self, registry: MediaRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn video_sink(mut self, sink: Arc<dyn VideoSink>) -> Self {
        self.video_sink = Some(sink);
        self
    }

    pub fn audio_sink(mut self, sink: Arc<dyn AudioSink>) -> Self {
        self.audio_sink = Some(sink);
        self
    }

    /// Overrides the monotonic time source; tests inject a `ManualClock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn logger_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.logger_sink = Some(sink);
        self
    }

    /// Builds the environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapabilityMissing`] when the registry or a sink is
    /// missing.
    pub fn build(self) -> Result<RuntimeEnvironment> {
        let registry = self.registry.ok_or_else(|| Error::CapabilityMissing {
            capability: "MediaRegistry".to_string(),
            message: "A MediaRegistry with source openers and decoder factories is required. \
                      Register the platform demuxer and codecs before creating a player."
                .to_string(),
        })?;

        let video_sink = self.video_sink.ok_or_else(|| Error::CapabilityMissing {
            capability: "VideoSink".to_string(),
            message: "VideoSink implementation is required for picture presentation. \
                      Audio-only hosts can inject a sink that discards frames."
                .to_string(),
        })?;

        let audio_sink = self.audio_sink.ok_or_else(|| Error::CapabilityMissing {
            capability: "AudioSink".to_string(),
            message: "AudioSink implementation is required for PCM output. \
                      Mobile: wrap AudioTrack/AudioQueue. Desktop: wrap the system mixer."
                .to_string(),
        })?;

        Ok(RuntimeEnvironment {
            registry,
            video_sink,
            audio_sink,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
            logger_sink: self.logger_sink,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{ManualClock, RawFrame};

    struct NullVideo;

    impl VideoSink for NullVideo {
        fn present(&self, _frame: &RawFrame) -> BridgeResult<()> {
            Ok(())
        }
    }

    struct NullAudio;

    impl AudioSink for NullAudio {
        fn present(&self, _frame: &RawFrame) -> BridgeResult<()> {
            Ok(())
        }

        fn queued_duration(&self) -> f64 {
            0.0
        }
    }

    #[test]
    fn test_build_with_all_capabilities() {
        let clock = ManualClock::new(3.0);
        let env = RuntimeEnvironment::builder()
            .registry(MediaRegistry::new())
            .video_sink(Arc::new(NullVideo))
            .audio_sink(Arc::new(NullAudio))
            .clock(Arc::new(clock))
            .build()
            .unwrap();

        assert_eq!(env.clock.monotonic_seconds(), 3.0);
        assert!(env.logger_sink.is_none());
    }

    #[test]
    fn test_missing_registry_fails_fast() {
        let err = RuntimeEnvironment::builder()
            .video_sink(Arc::new(NullVideo))
            .audio_sink(Arc::new(NullAudio))
            .build()
            .unwrap_err();

        match err {
            Error::CapabilityMissing { capability, .. } => assert_eq!(capability, "MediaRegistry"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_audio_sink_fails_fast() {
        let err = RuntimeEnvironment::builder()
            .registry(MediaRegistry::new())
            .video_sink(Arc::new(NullVideo))
            .build()
            .unwrap_err();

        assert!(err.to_string().contains("AudioSink"));
    }
}
