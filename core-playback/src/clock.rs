//! # Playback Clock
//!
//! Logical clocks used for audio/video synchronisation.
//!
//! A clock is anchored with [`PlaybackClock::set`] and extrapolated linearly
//! from that point at its configured speed. Each clock remembers the serial it
//! was anchored under; when the owning packet queue has moved on to a newer
//! serial the clock reads as NaN until it is anchored again.

use bridge_traits::Clock;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Minimum A/V correction threshold (seconds).
pub const AV_SYNC_THRESHOLD_MIN: f64 = 0.04;
/// Maximum A/V correction threshold (seconds).
pub const AV_SYNC_THRESHOLD_MAX: f64 = 0.1;
/// Frames longer than this are not duplicated to catch up.
pub const AV_SYNC_FRAMEDUP_THRESHOLD: f64 = 0.1;
/// No correction is attempted beyond this difference (seconds).
pub const AV_NOSYNC_THRESHOLD: f64 = 10.0;
/// Longest single wait the refresh loop performs for one frame.
pub const AV_SYNC_ONCE_WAIT_MAX_DELAY: f64 = 1.0;

pub const EXTERNAL_CLOCK_MIN_FRAMES: usize = 2;
pub const EXTERNAL_CLOCK_MAX_FRAMES: usize = 10;
pub const EXTERNAL_CLOCK_SPEED_MIN: f64 = 0.900;
pub const EXTERNAL_CLOCK_SPEED_MAX: f64 = 1.010;
pub const EXTERNAL_CLOCK_SPEED_STEP: f64 = 0.001;

/// Which clock the others follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncType {
    VideoMaster,
    AudioMaster,
    ExternalClock,
}

/// Picks the master clock from the selected streams.
///
/// Video wins when selected, then audio, then the external clock.
pub fn master_sync_type(has_video: bool, has_audio: bool) -> SyncType {
    if has_video {
        SyncType::VideoMaster
    } else if has_audio {
        SyncType::AudioMaster
    } else {
        SyncType::ExternalClock
    }
}

#[derive(Debug, Clone, Copy)]
struct ClockState {
    pts: f64,
    pts_drift: f64,
    last_updated: f64,
    speed: f64,
    serial: i32,
    paused: bool,
}

/// Drift-compensated logical clock.
pub struct PlaybackClock {
    state: Mutex<ClockState>,
    /// Serial of the owning packet queue; `None` for a free-running clock
    /// that never goes stale.
    queue_serial: Option<Arc<AtomicI32>>,
    time: Arc<dyn Clock>,
}

impl PlaybackClock {
    pub fn new(queue_serial: Option<Arc<AtomicI32>>, time: Arc<dyn Clock>) -> Self {
        let now = time.monotonic_seconds();
        Self {
            state: Mutex::new(ClockState {
                pts: f64::NAN,
                pts_drift: f64::NAN,
                last_updated: now,
                speed: 1.0,
                serial: -1,
                paused: false,
            }),
            queue_serial,
            time,
        }
    }

    pub fn now(&self) -> f64 {
        self.time.monotonic_seconds()
    }

    fn is_stale(&self, state: &ClockState) -> bool {
        match &self.queue_serial {
            Some(serial) => serial.load(Ordering::Acquire) != state.serial,
            None => false,
        }
    }

    fn read(&self, state: &ClockState, now: f64) -> f64 {
        if self.is_stale(state) {
            return f64::NAN;
        }
        if state.paused {
            state.pts
        } else {
            state.pts_drift + now - (now - state.last_updated) * (1.0 - state.speed)
        }
    }

    /// Current value in seconds; NaN when stale or never set.
    pub fn get(&self) -> f64 {
        self.get_at(self.now())
    }

    pub fn get_at(&self, now: f64) -> f64 {
        let state = self.state.lock();
        self.read(&state, now)
    }

    /// Anchors the clock at `pts` under `serial`.
    pub fn set(&self, pts: f64, serial: i32) {
        self.set_at(pts, serial, self.now());
    }

    pub fn set_at(&self, pts: f64, serial: i32, time: f64) {
        let mut state = self.state.lock();
        state.pts = pts;
        state.last_updated = time;
        state.pts_drift = pts - time;
        state.serial = serial;
    }

    /// Changes the speed, re-anchoring first so the value does not jump.
    pub fn set_speed(&self, speed: f64) {
        let now = self.now();
        let mut state = self.state.lock();
        let current = self.read(&state, now);
        state.pts = current;
        state.last_updated = now;
        state.pts_drift = current - now;
        state.speed = speed;
    }

    /// Re-anchors at the current value, keeping the serial.
    pub fn reanchor(&self) {
        let now = self.now();
        let mut state = self.state.lock();
        let current = self.read(&state, now);
        state.pts = current;
        state.last_updated = now;
        state.pts_drift = current - now;
    }

    pub fn speed(&self) -> f64 {
        self.state.lock().speed
    }

    pub fn serial(&self) -> i32 {
        self.state.lock().serial
    }

    pub fn last_updated(&self) -> f64 {
        self.state.lock().last_updated
    }

    pub fn set_paused(&self, paused: bool) {
        self.state.lock().paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Follows `other` when it differs by more than [`AV_NOSYNC_THRESHOLD`]
    /// or this clock is unknown.
    pub fn sync_to(&self, other: &PlaybackClock) {
        let now = self.now();
        let other_value = other.get_at(now);
        if other_value.is_nan() {
            return;
        }
        let other_serial = other.serial();

        let mut state = self.state.lock();
        let value = self.read(&state, now);
        if value.is_nan() || (value - other_value).abs() > AV_NOSYNC_THRESHOLD {
            state.pts = other_value;
            state.last_updated = now;
            state.pts_drift = other_value - now;
            state.serial = other_serial;
        }
    }
}

impl std::fmt::Debug for PlaybackClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = *self.state.lock();
        f.debug_struct("PlaybackClock")
            .field("pts", &state.pts)
            .field("speed", &state.speed)
            .field("serial", &state.serial)
            .field("paused", &state.paused)
            .finish()
    }
}

/// The audio, video and external clocks of a session.
#[derive(Debug)]
pub struct ClockSet {
    pub audio: PlaybackClock,
    pub video: PlaybackClock,
    pub external: PlaybackClock,
}

impl ClockSet {
    pub fn new(
        audio_serial: Arc<AtomicI32>,
        video_serial: Arc<AtomicI32>,
        time: Arc<dyn Clock>,
    ) -> Self {
        Self {
            audio: PlaybackClock::new(Some(audio_serial), time.clone()),
            video: PlaybackClock::new(Some(video_serial), time.clone()),
            external: PlaybackClock::new(None, time),
        }
    }

    pub fn master(&self, sync: SyncType) -> &PlaybackClock {
        match sync {
            SyncType::VideoMaster => &self.video,
            SyncType::AudioMaster => &self.audio,
            SyncType::ExternalClock => &self.external,
        }
    }

    pub fn set_paused(&self, paused: bool) {
        self.audio.set_paused(paused);
        self.video.set_paused(paused);
        self.external.set_paused(paused);
    }

    /// Nudges the external clock speed toward keeping realtime queues
    /// between their low and high water marks.
    pub fn adjust_external_speed(&self, video_packets: Option<usize>, audio_packets: Option<usize>) {
        let starving = |packets: Option<usize>| {
            packets.map_or(false, |n| n <= EXTERNAL_CLOCK_MIN_FRAMES)
        };
        let plenty = |packets: Option<usize>| {
            packets.map_or(true, |n| n > EXTERNAL_CLOCK_MAX_FRAMES)
        };

        let speed = self.external.speed();
        if starving(video_packets) || starving(audio_packets) {
            self.external
                .set_speed(EXTERNAL_CLOCK_SPEED_MIN.max(speed - EXTERNAL_CLOCK_SPEED_STEP));
        } else if plenty(video_packets) && plenty(audio_packets) {
            self.external
                .set_speed(EXTERNAL_CLOCK_SPEED_MAX.min(speed + EXTERNAL_CLOCK_SPEED_STEP));
        } else if speed != 1.0 {
            let toward_one = EXTERNAL_CLOCK_SPEED_STEP * (1.0 - speed) / (1.0 - speed).abs();
            self.external.set_speed(speed + toward_one);
        }
    }
}
