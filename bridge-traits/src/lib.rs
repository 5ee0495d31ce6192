//! # Host Bridge Traits
//!
//! Collaborator contracts that a host platform implements for the playback
//! core.
//!
//! ## Overview
//!
//! The player never touches containers, codecs or output devices directly.
//! It drives them through the traits defined here, so each platform can plug
//! in its own demuxers (FFmpeg, MediaExtractor, AVFoundation), decoders
//! (software or hardware) and renderers.
//!
//! ## Traits
//!
//! ### Input
//! - [`SourceOpener`](source::SourceOpener) - Opens a URL into a demuxer
//! - [`MediaSource`](source::MediaSource) - Streams, compressed samples, seeking
//!
//! ### Decoding
//! - [`DecoderFactory`](decoder::DecoderFactory) - Capability check and codec instantiation
//! - [`MediaDecoder`](decoder::MediaDecoder) - Sample in, frames out
//!
//! ### Output
//! - [`VideoSink`](sink::VideoSink) - Picture presentation
//! - [`AudioSink`](sink::AudioSink) - PCM output with queued-duration reporting
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Monotonic time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//! - [`MediaRegistry`](registry::MediaRegistry) - Scheme and codec lookup
//!
//! ## Error Handling
//!
//! All contracts report failures with [`BridgeError`](error::BridgeError).
//! Implementations should map platform errors onto the closest variant:
//! the player treats `EndOfStream`, `TimedOut`, `Interrupted` and
//! `Forbidden` differently from generic failures.
//!
//! ## Thread Safety
//!
//! Sources and decoders are owned by one worker thread at a time and only
//! need `Send`. Openers, factories and sinks are shared and need
//! `Send + Sync`.
//!
//! ## Examples
//!
//! ### Implementing AudioSink
//!
//! ```ignore
//! use bridge_traits::{error::Result, media::RawFrame, sink::AudioSink};
//!
//! struct NullAudio;
//!
//! impl AudioSink for NullAudio {
//!     fn present(&self, _frame: &RawFrame) -> Result<()> {
//!         Ok(())
//!     }
//!
//!     fn queued_duration(&self) -> f64 {
//!         0.0
//!     }
//! }
//! ```

pub mod decoder;
pub mod error;
pub mod media;
pub mod platform;
pub mod registry;
pub mod sink;
pub mod source;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use decoder::{DecoderFactory, MediaDecoder};
pub use media::{CodecParameters, CompressedSample, MediaType, RawFrame, Rational, StreamInfo};
pub use registry::MediaRegistry;
pub use sink::{AudioSink, VideoSink};
pub use source::{InterruptPredicate, MediaSource, OpenOptions, SeekRequest, SourceOpener};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
