//! Codec contract.
//!
//! Decoders are owned by a single decode worker thread. The worker feeds
//! samples one at a time and collects every frame the codec can emit for
//! that input.

use crate::{
    error::Result,
    media::{CodecParameters, CompressedSample, RawFrame},
    platform::{PlatformSend, PlatformSendSync},
};

/// Stateful decoder for one elementary stream.
pub trait MediaDecoder: PlatformSend {
    /// Decodes one sample, or drains buffered frames when `sample` is `None`.
    ///
    /// Draining returns an empty vector once the codec holds no more frames.
    fn decode(&mut self, sample: Option<&CompressedSample>) -> Result<Vec<RawFrame>>;

    /// Drops all internal state; called when the timeline is reset.
    fn flush(&mut self);

    /// Skip decoding of non-reference frames (used for high frame-rate
    /// content on constrained devices).
    fn set_skip_non_reference(&mut self, _skip: bool) {}

    fn close(&mut self) {}
}

/// Creates decoders for the codecs it supports.
pub trait DecoderFactory: PlatformSendSync {
    /// Name used for explicit codec selection, e.g. `h264_mediacodec`.
    fn name(&self) -> &str;

    fn supports(&self, params: &CodecParameters) -> bool;

    fn open(&self, params: &CodecParameters) -> Result<Box<dyn MediaDecoder>>;
}
