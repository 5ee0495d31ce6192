//! Lookup table for source openers and decoder factories.
//!
//! The host registers its implementations once and hands the registry to the
//! player. Openers are chosen by URL scheme (`rtmp`, `http`, `file`, ...)
//! with an optional fallback; decoders are chosen by explicit name or by the
//! first factory that supports the stream's parameters.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::{
    decoder::DecoderFactory,
    error::{BridgeError, Result},
    media::CodecParameters,
    source::SourceOpener,
};

#[derive(Default, Clone)]
pub struct MediaRegistry {
    openers: HashMap<String, Arc<dyn SourceOpener>>,
    default_opener: Option<Arc<dyn SourceOpener>>,
    decoders: Vec<Arc<dyn DecoderFactory>>,
}

impl MediaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an opener for a URL scheme (case-insensitive).
    pub fn with_opener(mut self, scheme: &str, opener: Arc<dyn SourceOpener>) -> Self {
        self.openers.insert(scheme.to_ascii_lowercase(), opener);
        self
    }

    /// Opener used when no scheme matches (plain paths included).
    pub fn with_default_opener(mut self, opener: Arc<dyn SourceOpener>) -> Self {
        self.default_opener = Some(opener);
        self
    }

    /// Registers a decoder factory. Earlier registrations win.
    pub fn with_decoder(mut self, factory: Arc<dyn DecoderFactory>) -> Self {
        self.decoders.push(factory);
        self
    }

    pub fn opener_for(&self, url: &str) -> Result<Arc<dyn SourceOpener>> {
        let scheme = url
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase());

        scheme
            .and_then(|scheme| self.openers.get(&scheme).cloned())
            .or_else(|| self.default_opener.clone())
            .ok_or_else(|| BridgeError::Unsupported(format!("no source opener for {}", url)))
    }

    /// First factory that supports `params`.
    pub fn find_decoder(&self, params: &CodecParameters) -> Option<Arc<dyn DecoderFactory>> {
        self.decoders.iter().find(|d| d.supports(params)).cloned()
    }

    pub fn find_decoder_by_name(&self, name: &str) -> Option<Arc<dyn DecoderFactory>> {
        self.decoders.iter().find(|d| d.name() == name).cloned()
    }

    /// Whether any registered factory can decode `params`.
    pub fn is_supported(&self, params: &CodecParameters) -> bool {
        self.find_decoder(params).is_some()
    }
}

impl fmt::Debug for MediaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schemes: Vec<_> = self.openers.keys().collect();
        schemes.sort();
        let decoders: Vec<_> = self.decoders.iter().map(|d| d.name().to_string()).collect();
        f.debug_struct("MediaRegistry")
            .field("schemes", &schemes)
            .field("default_opener", &self.default_opener.is_some())
            .field("decoders", &decoders)
            .finish()
    }
}
