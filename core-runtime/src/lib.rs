//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the media player core:
//! - Logging and tracing infrastructure
//! - Runtime environment (host collaborators) with fail-fast validation
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the playback crate depends on.
//! It establishes the logging conventions and the way host bridges are
//! gathered before a player is constructed.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{RuntimeEnvironment, RuntimeEnvironmentBuilder};
pub use error::{Error, Result};
