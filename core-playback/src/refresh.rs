//! # Refresh Loop
//!
//! Presents decoded pictures at their due time against the master clock and
//! feeds the audio sink ahead of playback.
//!
//! Each tick picks the oldest unshown picture, derives its display delay from
//! the previous picture's duration corrected by the A/V difference, and either
//! shows it, keeps showing the previous one, or drops it when late.

use crate::clock::{
    SyncType, AV_SYNC_FRAMEDUP_THRESHOLD, AV_SYNC_THRESHOLD_MAX, AV_SYNC_THRESHOLD_MIN,
};
use crate::frame_ring::DecodedFrame;
use crate::messages::PlayerMessage;
use crate::session::Session;
use crate::stats::SpeedSampler;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Corrects the nominal `delay` of the current picture by the difference
/// between the video clock and the master clock.
///
/// Returns the corrected delay and the measured difference (NaN when video
/// is the master or a clock is unknown).
pub fn compute_target_delay(
    delay: f64,
    sync: SyncType,
    video_clock: f64,
    master_clock: f64,
    max_frame_duration: f64,
) -> (f64, f64) {
    if sync == SyncType::VideoMaster {
        return (delay, f64::NAN);
    }

    let diff = video_clock - master_clock;
    let sync_threshold = AV_SYNC_THRESHOLD_MIN.max(AV_SYNC_THRESHOLD_MAX.min(delay));
    if diff.is_nan() || diff.abs() >= max_frame_duration {
        return (delay, diff);
    }

    let corrected = if diff <= -sync_threshold {
        (delay + diff).max(0.0)
    } else if diff >= sync_threshold && delay > AV_SYNC_FRAMEDUP_THRESHOLD {
        delay + diff
    } else if diff >= sync_threshold {
        2.0 * delay
    } else {
        delay
    };
    (corrected, diff)
}

/// Display duration of `current` given the picture after it.
pub fn frame_duration(current: &DecodedFrame, next: &DecodedFrame, max_frame_duration: f64) -> f64 {
    if current.serial != next.serial {
        return 0.0;
    }
    let duration = next.pts - current.pts;
    if duration.is_nan() || duration <= 0.0 || duration > max_frame_duration {
        current.duration
    } else {
        duration
    }
}

/// Presentation thread state.
struct RefreshLoop {
    session: Arc<Session>,
    force_refresh: bool,
    last_visualization: f64,
    vfps: SpeedSampler,
    audio_hold_since: Option<f64>,
}

/// Refresh thread body, runs until the session aborts.
#[instrument(skip_all, fields(session = %session.id))]
pub fn run(session: Arc<Session>) {
    debug!("refresh loop started");
    let mut refresh = RefreshLoop {
        session,
        force_refresh: false,
        last_visualization: 0.0,
        vfps: SpeedSampler::default(),
        audio_hold_since: None,
    };

    let mut remaining = 0.0;
    while !refresh.session.is_aborted() {
        if remaining > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(remaining));
        }
        remaining = refresh.session.config.refresh_rate;

        let paused = refresh.session.play.lock().paused;
        if !paused || refresh.force_refresh {
            refresh.video_refresh(&mut remaining);
        }
        refresh.pump_audio();
    }
    debug!("refresh loop exited");
}

impl RefreshLoop {
    fn video_refresh(&mut self, remaining: &mut f64) {
        let session = self.session.clone();
        let (paused, realtime) = (session.play.lock().paused, session.is_realtime());

        if !paused && realtime && session.sync_type() == SyncType::ExternalClock {
            session.clocks.adjust_external_speed(
                session.has_video().then(|| session.videoq.nb_packets()),
                session.has_audio().then(|| session.audioq.nb_packets()),
            );
        }

        if !session.has_video() {
            let interval = session.config.visualization_interval;
            let now = session.now();
            if self.force_refresh || self.last_visualization + interval < now {
                session.env.video_sink.redraw_visualization();
                self.last_visualization = now;
            }
            *remaining = remaining.min(self.last_visualization + interval - now);
            self.force_refresh = false;
            return;
        }

        let max_frame_duration = session.config.max_frame_duration;
        loop {
            if session.pictq.nb_remaining() == 0 {
                break;
            }
            let last = session.pictq.peek_last();
            let Some(current) = session.pictq.peek() else {
                break;
            };

            if current.serial != session.videoq.serial() {
                session.pictq.next();
                continue;
            }

            let now = session.now();
            if last.serial != current.serial {
                session.play.lock().frame_timer = now;
            }
            if session.play.lock().paused {
                break;
            }

            let last_duration = frame_duration(&last, &current, max_frame_duration);
            let (delay, diff) = compute_target_delay(
                last_duration,
                session.sync_type(),
                session.clocks.video.get(),
                session.master_clock().get(),
                max_frame_duration,
            );
            session.with_stats(|stats| {
                stats.avdelay = delay;
                stats.avdiff = diff;
            });

            let frame_timer = {
                let mut play = session.play.lock();
                if now < play.frame_timer + delay {
                    *remaining = remaining.min(play.frame_timer + delay - now);
                    break;
                }
                play.frame_timer += delay;
                if delay > 0.0 && now - play.frame_timer > AV_SYNC_THRESHOLD_MAX {
                    play.frame_timer = now;
                }
                play.frame_timer
            };

            if !current.pts.is_nan() {
                session.clocks.video.set(current.pts, current.serial);
                session.clocks.external.sync_to(&session.clocks.video);
            }

            if session.pictq.nb_remaining() > 1 {
                if let Some(next) = session.pictq.peek_next() {
                    let duration = frame_duration(&current, &next, max_frame_duration);
                    let step = session.play.lock().step;
                    if !step && self.drops_late() && now > frame_timer + duration {
                        session.with_stats(|stats| stats.drop_frame_late += 1);
                        session.pictq.next();
                        continue;
                    }
                }
            }

            session.pictq.next();
            self.force_refresh = true;

            let mut play = session.play.lock();
            if play.step && !play.paused {
                session.stream_toggle_pause_locked(&mut play, true);
            }
            break;
        }

        if self.force_refresh && session.pictq.rindex_shown() {
            self.display();
        }
        self.force_refresh = false;
    }

    fn drops_late(&self) -> bool {
        let framedrop = self.session.config.framedrop;
        framedrop > 0 || (framedrop != 0 && self.session.sync_type() != SyncType::VideoMaster)
    }

    fn display(&mut self) {
        let session = self.session.clone();
        let shown = session.pictq.peek_last();
        let Some(frame) = shown.frame.as_ref() else {
            return;
        };

        if let Err(err) = session.env.video_sink.present(frame) {
            warn!(error = %err, "video sink rejected frame");
        }
        let vfps = self.vfps.add(session.now());
        session.with_stats(|stats| stats.vfps = vfps);

        let mut play = session.play.lock();
        if let Some((serial, started)) = play.latest_seek_load {
            if serial == shown.serial {
                let elapsed_ms = ((session.now() - started) * 1000.0) as i64;
                play.latest_seek_load = None;
                session.with_stats(|stats| stats.latest_seek_load_duration_ms = elapsed_ms);
            }
        }

        let first = !play.first_video_frame_rendered;
        play.first_video_frame_rendered = true;
        let view_first = first && session.config.view_first_video_frame && !session.config.start_on_prepared;
        if view_first {
            session.toggle_pause_locked(&mut play, true);
        }
        drop(play);

        if first {
            session.notify(PlayerMessage::VideoRenderingStart);
            if view_first {
                session.set_muted(false);
            }
        }

        let audio_done = !session.has_audio()
            || session.audio_finished.load(Ordering::Acquire) == session.audioq.serial();
        if audio_done {
            session.notify_progress();
        }
    }

    /// Presents audio frames while the sink holds less than the configured
    /// target.
    fn pump_audio(&mut self) {
        let session = self.session.clone();
        if !session.has_audio() {
            return;
        }

        {
            let play = session.play.lock();
            if play.paused {
                return;
            }
            if session.config.sync_av_start && session.has_video() && !play.first_video_frame_rendered {
                let now = session.now();
                let since = *self.audio_hold_since.get_or_insert(now);
                if now - since < session.config.first_frame_wait_ms as f64 / 1000.0 {
                    return;
                }
            }
        }

        let sink = &session.env.audio_sink;
        let mut presented = false;
        while sink.queued_duration() < session.config.audio_buffer_target {
            let Some(decoded) = session.sampq.peek() else {
                break;
            };
            if decoded.serial != session.audioq.serial() {
                session.sampq.next();
                continue;
            }

            if let Some(frame) = decoded.frame.as_ref() {
                if let Err(err) = sink.present(frame) {
                    warn!(error = %err, "audio sink rejected frame");
                }
            }
            session.sampq.next();
            presented = true;

            if !decoded.pts.is_nan() {
                let now = session.now();
                // Latency covers everything queued, this frame included
                let playing = decoded.pts + decoded.duration - sink.latency();
                session.clocks.audio.set_at(playing, decoded.serial, now);
                session.clocks.external.sync_to(&session.clocks.audio);
            }

            let first = {
                let mut play = session.play.lock();
                let first = !play.first_audio_frame_rendered;
                play.first_audio_frame_rendered = true;
                first
            };
            if first {
                session.notify(PlayerMessage::AudioRenderingStart);
            }
        }

        if presented && !session.has_video() {
            session.notify_progress();
        }
    }
}
