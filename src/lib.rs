//! Workspace facade crate.
//!
//! Re-exports the individual workspace crates so host applications can depend
//! on `media-player-workspace` alone and reach the player engine, the logging
//! bootstrap and the collaborator contracts from one place.

pub use bridge_traits as bridge;
pub use core_playback as playback;
pub use core_runtime as runtime;

pub use core_playback::{MessageQueue, Player, PlayerConfig, PlayerMessage, PlaybackError};
