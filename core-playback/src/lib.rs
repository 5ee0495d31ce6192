//! # Playback Pipeline Module
//!
//! Reads compressed samples from a source, decodes them on dedicated
//! workers and presents them in sync against a master clock.
//!
//! ## Overview
//!
//! This module handles:
//! - Packet queues with serial-based flush detection ([`packet_queue`])
//! - Decoded frame rings with keep-last display policy ([`frame_ring`])
//! - Audio, video and external clocks ([`clock`])
//! - Decode workers, the reader thread and the refresh loop
//! - Seeking, buffering, reconnects and source switches
//! - Background-prepared sources ([`prepared`])
//! - The [`Player`] control API and its [`MessageQueue`]
//!
//! ## Threads
//!
//! Each session runs one reader (`ff_read`), up to two decode workers
//! (`ff_video_dec`, `ff_audio_dec`) and one refresh loop (`ff_vout`). The
//! player adds one prepare thread (`ff_prepare`). Background failures are
//! never returned across threads; they arrive as [`PlayerMessage`]s.

pub mod clock;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod frame_ring;
pub mod messages;
pub mod packet_queue;
pub mod prepared;
pub mod refresh;
pub mod source;
pub mod stats;

mod reader;
mod session;
mod worker;

pub use clock::{master_sync_type, ClockSet, PlaybackClock, SyncType};
pub use config::{InfiniteBuffer, PlayMode, PlayerConfig, PlayerState, ReorderPts};
pub use engine::{Player, Property, PropertyValue};
pub use error::{PlaybackError, Result};
pub use frame_ring::{DecodedFrame, FrameRing};
pub use messages::{MessageKind, MessageQueue, MessageSeverity, PlayerMessage};
pub use packet_queue::{Packet, PacketQueue, QueueAborted, QueuedPacket};
pub use prepared::{PreparedSwitch, SlotState};
pub use stats::{CacheStats, PlayerStats};
