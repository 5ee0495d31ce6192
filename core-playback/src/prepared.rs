//! # Prepared Sources
//!
//! A fixed table of sources opened in the background so a later switch to
//! them skips connection and probing.
//!
//! Each slot moves `Empty → Pending → Opening → Ready` on the prepare thread.
//! Switching to a slot that is still opening marks it "play after prepared";
//! the prepare thread then hands it to the session as soon as it is ready.

use crate::config::{PlayMode, PlayerConfig};
use crate::error::{PlaybackError, Result};
use crate::messages::PlayerMessage;
use crate::session::{Session, SourceChange};
use crate::source::{open_source, OpenedSource, SharedSource};
use bridge_traits::{InterruptPredicate, MediaRegistry};
use core_runtime::logging::redact_url;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Lifecycle of one slot.
#[derive(Debug, Clone, Default)]
pub enum SlotState {
    #[default]
    Empty,
    /// Waiting for the prepare thread.
    Pending,
    Opening,
    Ready(OpenedSource),
    /// The last open attempt failed; switching falls back to the URL.
    Failed,
}

/// How [`PreparedSlots::change_source`] handled the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreparedSwitch {
    /// The opened source was handed to the reader.
    Ready,
    /// Still opening; the switch happens once it is ready.
    PlayAfterPrepared,
    /// Never opened; the reader opens the URL itself.
    FallbackToUrl,
}

#[derive(Debug, Default)]
struct Slot {
    url: String,
    mode: PlayMode,
    state: SlotState,
    play_after_prepared: bool,
    /// Bumped on every prepare and delete so a stale open result is
    /// recognised.
    generation: u64,
}

#[derive(Debug, Default)]
struct SlotTable {
    slots: Vec<Slot>,
    /// Session that receives "play after prepared" switches.
    target: Option<Weak<Session>>,
}

/// Background-opened source table.
pub struct PreparedSlots {
    registry: MediaRegistry,
    config: PlayerConfig,
    table: Mutex<SlotTable>,
    cond: Condvar,
    abort: Arc<AtomicBool>,
}

impl PreparedSlots {
    pub fn new(registry: MediaRegistry, config: PlayerConfig) -> Self {
        let slots = (0..config.max_prepared_sources).map(|_| Slot::default()).collect();
        Self {
            registry,
            config,
            table: Mutex::new(SlotTable { slots, target: None }),
            cond: Condvar::new(),
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawns the prepare thread.
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let slots = self.clone();
        let handle = thread::Builder::new()
            .name("ff_prepare".to_string())
            .spawn(move || slots.run())?;
        Ok(handle)
    }

    /// Stops the prepare thread and closes every ready source nobody else
    /// holds.
    pub fn shutdown(&self) {
        self.abort.store(true, Ordering::Release);
        let mut table = self.table.lock();
        self.cond.notify_all();
        for slot in table.slots.iter_mut() {
            if let SlotState::Ready(opened) = std::mem::take(&mut slot.state) {
                close_if_last(opened.source);
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.table.lock().slots.len()
    }

    /// Current state of slot `index`.
    pub fn state(&self, index: usize) -> Option<SlotState> {
        self.table.lock().slots.get(index).map(|slot| slot.state.clone())
    }

    /// Queues `url` for background opening and returns its slot index.
    pub fn prepare_source(&self, url: &str, mode: PlayMode) -> Result<usize> {
        if url.is_empty() {
            return Err(PlaybackError::InvalidArgument("empty url".to_string()));
        }

        let mut table = self.table.lock();
        let index = table
            .slots
            .iter()
            .position(|slot| matches!(slot.state, SlotState::Empty))
            .ok_or(PlaybackError::PreparedSlotsFull)?;

        let slot = &mut table.slots[index];
        slot.url = url.to_string();
        slot.mode = mode;
        slot.state = SlotState::Pending;
        slot.play_after_prepared = false;
        slot.generation += 1;
        self.cond.notify_all();

        info!(index, url = %redact_url(url), "source queued for prepare");
        Ok(index)
    }

    /// Switches `session` to the source in slot `index`.
    pub fn change_source(&self, index: usize, session: &Arc<Session>) -> Result<PreparedSwitch> {
        let mut table = self.table.lock();
        let slot = table
            .slots
            .get(index)
            .ok_or(PlaybackError::PreparedSlotUnavailable(index))?;

        let (switch, change) = match &slot.state {
            SlotState::Ready(opened) => (PreparedSwitch::Ready, Some(SourceChange::Prepared(opened.clone()))),
            SlotState::Opening => (PreparedSwitch::PlayAfterPrepared, None),
            SlotState::Pending | SlotState::Failed => (
                PreparedSwitch::FallbackToUrl,
                Some(SourceChange::Url {
                    url: slot.url.clone(),
                    mode: slot.mode,
                }),
            ),
            SlotState::Empty => return Err(PlaybackError::PreparedSlotUnavailable(index)),
        };

        for slot in table.slots.iter_mut() {
            slot.play_after_prepared = false;
        }
        if switch == PreparedSwitch::PlayAfterPrepared {
            table.slots[index].play_after_prepared = true;
            table.target = Some(Arc::downgrade(session));
        }
        drop(table);

        debug!(index, ?switch, "switching to prepared source");
        if let Some(change) = change {
            session.request_change_source(change);
        }
        Ok(switch)
    }

    /// Empties slot `index`. Refused while its source is playing or about to
    /// be played, unless the session is in standby.
    pub fn delete_source(&self, index: usize, session: Option<&Arc<Session>>) -> Result<()> {
        let mut table = self.table.lock();
        let slot = table
            .slots
            .get_mut(index)
            .ok_or(PlaybackError::PreparedSlotUnavailable(index))?;

        match &slot.state {
            SlotState::Empty => return Err(PlaybackError::PreparedSlotUnavailable(index)),
            SlotState::Ready(opened) => {
                if let Some(session) = session {
                    let in_use = session
                        .current_source()
                        .map_or(false, |current| opened.same_source(&current))
                        || session
                            .pending_change_source()
                            .map_or(false, |pending| opened.same_source(&pending));
                    if in_use && !session.play.lock().pause_buffering {
                        warn!(index, "prepared source is in use");
                        return Err(PlaybackError::PreparedSlotUnavailable(index));
                    }
                }
            }
            SlotState::Pending | SlotState::Opening | SlotState::Failed => {}
        }

        if let SlotState::Ready(opened) = std::mem::take(&mut slot.state) {
            close_if_last(opened.source);
        }
        slot.url.clear();
        slot.play_after_prepared = false;
        slot.generation += 1;
        debug!(index, "prepared source deleted");
        Ok(())
    }

    // ========================================================================
    // Prepare Thread
    // ========================================================================

    fn run(&self) {
        debug!("prepare thread started");
        let abort = self.abort.clone();
        let interrupt: InterruptPredicate = Arc::new(move || abort.load(Ordering::Acquire));

        loop {
            let job = {
                let mut table = self.table.lock();
                loop {
                    if self.abort.load(Ordering::Acquire) {
                        debug!("prepare thread exited");
                        return;
                    }
                    let pending = table
                        .slots
                        .iter()
                        .position(|slot| matches!(slot.state, SlotState::Pending));
                    if let Some(index) = pending {
                        let slot = &mut table.slots[index];
                        slot.state = SlotState::Opening;
                        break (index, slot.url.clone(), slot.mode, slot.generation);
                    }
                    self.cond.wait(&mut table);
                }
            };

            let (index, url, mode, generation) = job;
            let result = open_source(&self.registry, &url, mode, &self.config, interrupt.clone());
            self.complete(index, generation, result);
        }
    }

    fn complete(&self, index: usize, generation: u64, result: Result<OpenedSource>) {
        let mut table = self.table.lock();
        let target = table.target.as_ref().and_then(Weak::upgrade);
        let slot = &mut table.slots[index];

        if slot.generation != generation {
            if let Ok(opened) = result {
                debug!(index, "prepared slot deleted while opening");
                close_if_last(opened.source);
            }
            return;
        }

        let play_after = std::mem::take(&mut slot.play_after_prepared);
        match result {
            Ok(opened) => {
                info!(index, "prepared source ready");
                slot.state = SlotState::Ready(opened.clone());
                drop(table);
                if play_after {
                    if let Some(session) = target {
                        session.request_change_source(SourceChange::Prepared(opened));
                    }
                }
            }
            Err(err) => {
                warn!(index, error = %err, "prepare failed");
                slot.state = SlotState::Failed;
                drop(table);
                if play_after {
                    if let Some(session) = target {
                        session.notify(PlayerMessage::ConnectFailed { code: err.code() });
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for PreparedSlots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedSlots")
            .field("capacity", &self.capacity())
            .field("aborted", &self.abort.load(Ordering::Acquire))
            .finish()
    }
}

fn close_if_last(source: SharedSource) {
    if let Some(source) = Arc::into_inner(source) {
        source.into_inner().close();
    }
}
