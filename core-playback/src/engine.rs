//! # Player Engine
//!
//! The control surface of the playback core.
//!
//! ## Overview
//!
//! A [`Player`] owns at most one [`Session`] at a time plus the table of
//! prepared sources. Control calls validate their arguments, record the
//! request in session state and return immediately; the reader, decode and
//! refresh threads act on it and report back through the
//! [`MessageQueue`] returned by [`Player::messages`].
//!
//! ## Usage
//!
//! ```ignore
//! use core_playback::{Player, PlayerConfig, PlayerMessage};
//!
//! let player = Player::new(env, PlayerConfig::default())?;
//! player.prepare("https://cdn.example.com/show.flv")?;
//!
//! let messages = player.messages();
//! while let Some(message) = messages.get() {
//!     match message {
//!         PlayerMessage::Prepared => player.start()?,
//!         PlayerMessage::Completed => break,
//!         _ => {}
//!     }
//! }
//! player.wait_stop();
//! ```

use crate::config::{PlayMode, PlayerConfig, PlayerState};
use crate::error::{PlaybackError, Result};
use crate::messages::MessageQueue;
use crate::prepared::{PreparedSlots, PreparedSwitch, SlotState};
use crate::session::{Session, SourceChange};
use crate::stats::PlayerStats;
use crate::{reader, refresh};
use bridge_traits::MediaType;
use core_runtime::logging::redact_url;
use core_runtime::RuntimeEnvironment;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Queryable player properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Property {
    SelectedVideoStream,
    SelectedAudioStream,
    VideoCachedBytes,
    AudioCachedBytes,
    VideoCachedPackets,
    AudioCachedPackets,
    VideoCachedDurationMs,
    AudioCachedDurationMs,
    BitRate,
    PlaybackRate,
    AvDelay,
    AvDiff,
    VideoDecodeFps,
    VideoOutputFps,
    DropFrameEarly,
    DropFrameLate,
    LatestSeekLoadDurationMs,
}

/// Value of a [`Property`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Int(i64),
    Float(f64),
}

impl PropertyValue {
    pub fn as_i64(self) -> i64 {
        match self {
            PropertyValue::Int(v) => v,
            PropertyValue::Float(v) => v as i64,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            PropertyValue::Int(v) => v as f64,
            PropertyValue::Float(v) => v,
        }
    }
}

/// Streaming media player.
pub struct Player {
    id: Uuid,
    env: RuntimeEnvironment,
    config: PlayerConfig,
    messages: Arc<MessageQueue>,
    state: Arc<Mutex<PlayerState>>,
    session: Mutex<Option<Arc<Session>>>,
    prepared: Arc<PreparedSlots>,
    prepare_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Player {
    /// Creates a player and starts its prepare thread.
    pub fn new(env: RuntimeEnvironment, config: PlayerConfig) -> Result<Self> {
        config.validate().map_err(PlaybackError::InvalidArgument)?;

        let prepared = Arc::new(PreparedSlots::new(env.registry.clone(), config.clone()));
        let prepare_thread = prepared.start()?;
        let id = Uuid::new_v4();
        info!(player = %id, mode = ?config.play_mode, "player created");

        Ok(Self {
            id,
            env,
            config,
            messages: Arc::new(MessageQueue::new()),
            state: Arc::new(Mutex::new(PlayerState::Idle)),
            session: Mutex::new(None),
            prepared,
            prepare_thread: Mutex::new(Some(prepare_thread)),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Queue the host drains for asynchronous notifications.
    pub fn messages(&self) -> Arc<MessageQueue> {
        self.messages.clone()
    }

    pub fn state(&self) -> PlayerState {
        *self.state.lock()
    }

    fn session(&self) -> Result<Arc<Session>> {
        self.session.lock().clone().ok_or(PlaybackError::NoSession)
    }

    fn set_state(&self, state: PlayerState) {
        *self.state.lock() = state;
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Opens `url` with the configured play mode.
    pub fn prepare(&self, url: &str) -> Result<()> {
        self.prepare_with_mode(url, self.config.play_mode)
    }

    /// Starts a session on `url`; `Prepared` is emitted once the streams are
    /// open.
    #[instrument(skip(self, url), fields(player = %self.id, url = %redact_url(url)))]
    pub fn prepare_with_mode(&self, url: &str, mode: PlayMode) -> Result<()> {
        if url.is_empty() {
            return Err(PlaybackError::InvalidArgument("empty url".to_string()));
        }

        let mut current = self.session.lock();
        if current.is_some() {
            return Err(PlaybackError::InvalidState("already prepared".to_string()));
        }

        let mut config = self.config.clone();
        config.play_mode = mode;
        self.messages.start();
        let session = Session::new(self.env.clone(), config, self.messages.clone(), self.state.clone());
        // Set before the reader can report Prepared
        self.set_state(PlayerState::Preparing);

        let refresh_session = session.clone();
        let refresh = thread::Builder::new()
            .name("ff_vout".to_string())
            .spawn(move || refresh::run(refresh_session));
        let refresh = match refresh {
            Ok(handle) => handle,
            Err(err) => {
                self.set_state(PlayerState::Idle);
                return Err(err.into());
            }
        };
        session.set_refresh_thread(refresh);

        let reader_session = session.clone();
        let url_owned = url.to_string();
        let spawned = thread::Builder::new()
            .name("ff_read".to_string())
            .spawn(move || reader::run(reader_session, url_owned, mode));
        match spawned {
            Ok(handle) => session.set_reader_thread(handle),
            Err(err) => {
                session.shutdown();
                self.set_state(PlayerState::Idle);
                return Err(err.into());
            }
        }

        info!(session = %session.id, "preparing");
        *current = Some(session);
        Ok(())
    }

    /// Starts or resumes playback. Before `Prepared` the request is kept
    /// until the streams are open; after completion playback restarts from
    /// the beginning.
    pub fn start(&self) -> Result<()> {
        let session = self.session()?;
        let mut play = session.play.lock();
        if !play.prepared {
            debug!("start requested while preparing");
            play.auto_resume = true;
            return Ok(());
        }
        if play.completed {
            drop(play);
            return self.start_from(0);
        }

        session.toggle_pause_locked(&mut play, false);
        drop(play);
        self.set_state(PlayerState::Started);
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        let session = self.session()?;
        session.toggle_pause(true);
        self.set_state(PlayerState::Paused);
        Ok(())
    }

    /// Pauses and also stops reading; blocking source calls are
    /// interrupted.
    pub fn standby(&self) -> Result<()> {
        let session = self.session()?;
        session.toggle_standby(true);
        self.set_state(PlayerState::Paused);
        Ok(())
    }

    /// Requests abort of every session thread without waiting.
    pub fn stop(&self) {
        if let Some(session) = self.session.lock().as_ref() {
            info!(session = %session.id, "stop requested");
            session.request_abort();
        }
        self.messages.abort();
        self.set_state(PlayerState::Stopped);
    }

    /// Stops and joins every session thread.
    pub fn wait_stop(&self) {
        self.stop();
        let session = self.session.lock().take();
        if let Some(session) = session {
            session.shutdown();
        }
    }

    /// Stops and returns to `Idle`, ready for another `prepare`.
    pub fn reset(&self) {
        self.wait_stop();
        self.messages.flush();
        self.set_state(PlayerState::Idle);
    }

    // ========================================================================
    // Seeking
    // ========================================================================

    /// Seeks to `position_ms` from the media start.
    pub fn seek_to(&self, position_ms: i64) -> Result<()> {
        if position_ms < 0 {
            return Err(PlaybackError::InvalidArgument(format!("negative position {position_ms}")));
        }
        let session = self.session()?;
        let current_ms = session.current_position_ms();
        let target_us = position_ms * 1000 + session.start_time_us();
        if !session.request_seek(target_us, (position_ms - current_ms) * 1000, false) {
            debug!(position_ms, "seek already pending, ignored");
        }
        Ok(())
    }

    /// Seeks to a byte offset in the source.
    pub fn seek_by_offset(&self, offset: i64) -> Result<()> {
        if offset < 0 {
            return Err(PlaybackError::InvalidArgument(format!("negative offset {offset}")));
        }
        let session = self.session()?;
        if !session.request_seek(offset, 0, true) {
            debug!(offset, "seek already pending, ignored");
        }
        Ok(())
    }

    /// Seeks to `position_ms` and resumes once the seek lands.
    pub fn start_from(&self, position_ms: i64) -> Result<()> {
        self.session()?.play.lock().auto_resume = true;
        self.seek_to(position_ms)?;
        self.set_state(PlayerState::Started);
        Ok(())
    }

    /// Seeks to a byte offset and resumes once the seek lands.
    pub fn start_from_offset(&self, offset: i64) -> Result<()> {
        self.session()?.play.lock().auto_resume = true;
        self.seek_by_offset(offset)?;
        self.set_state(PlayerState::Started);
        Ok(())
    }

    // ========================================================================
    // Playback Settings
    // ========================================================================

    /// Plays `count` times in total; `0` loops forever.
    pub fn set_loop(&self, count: u32) -> Result<()> {
        self.session()?.play.lock().loops_left = count;
        Ok(())
    }

    pub fn set_playback_rate(&self, rate: f32) -> Result<()> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(PlaybackError::InvalidArgument(format!("playback rate {rate}")));
        }
        self.session()?.set_playback_rate(rate);
        Ok(())
    }

    pub fn set_mute_audio(&self, muted: bool) -> Result<()> {
        self.session()?.set_muted(muted);
        Ok(())
    }

    /// Opens or closes the decoder for stream `index`.
    pub fn select_stream(&self, index: usize, selected: bool) -> Result<()> {
        self.session()?.select_stream(index, selected)
    }

    // ========================================================================
    // Sources
    // ========================================================================

    /// Switches the running session to `url`.
    pub fn change_source(&self, url: &str, mode: PlayMode) -> Result<()> {
        if url.is_empty() {
            return Err(PlaybackError::InvalidArgument("empty url".to_string()));
        }
        let session = self.session()?;
        info!(session = %session.id, url = %redact_url(url), "change source requested");
        session.request_change_source(SourceChange::Url {
            url: url.to_string(),
            mode,
        });
        Ok(())
    }

    /// Opens `url` in the background; returns its slot index.
    pub fn prepare_source(&self, url: &str, mode: PlayMode) -> Result<usize> {
        self.prepared.prepare_source(url, mode)
    }

    pub fn change_source_prepared(&self, index: usize) -> Result<PreparedSwitch> {
        let session = self.session()?;
        self.prepared.change_source(index, &session)
    }

    pub fn prepared_source_state(&self, index: usize) -> Option<SlotState> {
        self.prepared.state(index)
    }

    pub fn delete_prepared_source(&self, index: usize) -> Result<()> {
        let session = self.session.lock().clone();
        self.prepared.delete_source(index, session.as_ref())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get_property(&self, property: Property) -> Result<PropertyValue> {
        let session = self.session()?;
        let stats = session.stats();
        let selected = |media_type: MediaType| {
            PropertyValue::Int(session.selected_stream(media_type).map_or(-1, |i| i as i64))
        };

        let value = match property {
            Property::SelectedVideoStream => selected(MediaType::Video),
            Property::SelectedAudioStream => selected(MediaType::Audio),
            Property::VideoCachedBytes => PropertyValue::Int(stats.video_cache.bytes),
            Property::AudioCachedBytes => PropertyValue::Int(stats.audio_cache.bytes),
            Property::VideoCachedPackets => PropertyValue::Int(stats.video_cache.packets),
            Property::AudioCachedPackets => PropertyValue::Int(stats.audio_cache.packets),
            Property::VideoCachedDurationMs => PropertyValue::Int(stats.video_cache.duration_ms),
            Property::AudioCachedDurationMs => PropertyValue::Int(stats.audio_cache.duration_ms),
            Property::BitRate => PropertyValue::Int(stats.bit_rate),
            Property::PlaybackRate => PropertyValue::Float(f64::from(session.play.lock().playback_rate)),
            Property::AvDelay => PropertyValue::Float(stats.avdelay),
            Property::AvDiff => PropertyValue::Float(stats.avdiff),
            Property::VideoDecodeFps => PropertyValue::Float(stats.vdps),
            Property::VideoOutputFps => PropertyValue::Float(stats.vfps),
            Property::DropFrameEarly => PropertyValue::Int(stats.drop_frame_early as i64),
            Property::DropFrameLate => PropertyValue::Int(stats.drop_frame_late as i64),
            Property::LatestSeekLoadDurationMs => PropertyValue::Int(stats.latest_seek_load_duration_ms),
        };
        Ok(value)
    }

    pub fn current_position_ms(&self) -> i64 {
        self.session().map_or(0, |s| s.current_position_ms())
    }

    pub fn duration_ms(&self) -> i64 {
        self.session().map_or(0, |s| s.duration_ms())
    }

    pub fn playable_duration_ms(&self) -> i64 {
        self.session().map_or(0, |s| s.playable_duration_ms())
    }

    pub fn is_paused(&self) -> bool {
        self.session().map_or(false, |s| s.play.lock().paused)
    }

    pub fn stats(&self) -> PlayerStats {
        self.session().map(|s| s.stats()).unwrap_or_default()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.wait_stop();
        self.prepared.shutdown();
        if let Some(handle) = self.prepare_thread.lock().take() {
            if handle.join().is_err() {
                warn!(player = %self.id, "prepare thread panicked");
            }
        }
        debug!(player = %self.id, "player released");
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("prepared", &self.prepared)
            .finish_non_exhaustive()
    }
}
