//! Decode worker loops.
//!
//! One thread per open component pulls frames out of its [`Decoder`] and
//! publishes them to the session's picture or sample ring.

use crate::decoder::{DecodeStop, Decoder, EarlyFrameDrop};
use crate::frame_ring::DecodedFrame;
use crate::messages::PlayerMessage;
use crate::session::Session;
use crate::stats::SpeedSampler;
use bridge_traits::{MediaType, RawFrame, Rational};
use std::sync::Arc;
use tracing::{debug, info};

/// Video decode loop, exits when the video queue aborts.
pub fn run_video(session: Arc<Session>, mut decoder: Decoder) {
    debug!(session = %session.id, "video decoder started");
    let mut early_drop = EarlyFrameDrop::new(session.config.framedrop);
    let mut vdps = SpeedSampler::default();
    let mut last_size: Option<(u32, u32)> = None;
    let mut first_frame = true;

    loop {
        if let Some(time_base) = session.stream_time_base(MediaType::Video) {
            decoder.set_time_base(time_base);
        }

        let frame = match next_frame(&session, &mut decoder) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(DecodeStop::Aborted) => break,
            Err(DecodeStop::Fatal(err)) => {
                session.fail(err);
                break;
            }
        };

        let rate = vdps.add(session.now());
        session.with_stats(|stats| stats.vdps = rate);

        let time_base = decoder.time_base();
        let pts = frame
            .pts
            .map_or(f64::NAN, |pts| pts as f64 * time_base.to_f64());

        let diff = pts - session.master_clock().get();
        let serial_current = decoder.pkt_serial() == session.clocks.video.serial();
        if early_drop.should_drop(diff, serial_current, session.videoq.nb_packets() > 0) {
            session.with_stats(|stats| stats.drop_frame_early += 1);
            continue;
        }

        let duration = frame_rate_duration(&session);
        let size = (frame.width, frame.height);
        let serial = decoder.pkt_serial();
        if !queue_picture(&session, frame, pts, duration, serial) {
            break;
        }

        if last_size != Some(size) {
            if last_size.is_some() {
                session.notify(PlayerMessage::VideoSizeChanged {
                    width: size.0,
                    height: size.1,
                });
            }
            last_size = Some(size);
        }
        if first_frame {
            first_frame = false;
            session.notify(PlayerMessage::VideoDecodedFirstFrame);
        }
    }

    decoder.close();
    debug!(session = %session.id, "video decoder exited");
}

/// Audio decode loop, exits when the audio queue aborts.
pub fn run_audio(session: Arc<Session>, mut decoder: Decoder) {
    debug!(session = %session.id, "audio decoder started");

    loop {
        if let Some(time_base) = session.stream_time_base(MediaType::Audio) {
            decoder.set_time_base(time_base);
        }

        let frame = match next_frame(&session, &mut decoder) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(DecodeStop::Aborted) => break,
            Err(DecodeStop::Fatal(err)) => {
                session.fail(err);
                break;
            }
        };

        let time_base = decoder.frame_time_base(&frame);
        let pts = frame
            .pts
            .map_or(f64::NAN, |pts| pts as f64 * time_base.to_f64());
        let duration = if frame.sample_rate > 0 {
            f64::from(frame.nb_samples) / f64::from(frame.sample_rate)
        } else {
            0.0
        };

        let decoded = DecodedFrame::new(frame, pts, duration, decoder.pkt_serial());
        if !session.sampq.push_frame(decoded) {
            break;
        }
    }

    decoder.close();
    debug!(session = %session.id, "audio decoder exited");
}

fn next_frame(session: &Session, decoder: &mut Decoder) -> Result<Option<RawFrame>, DecodeStop> {
    decoder.decode_frame(
        session.config.packet_buffering,
        || session.toggle_buffering(true),
        || session.wake_reader(),
    )
}

/// Nominal frame duration from the stream frame rate, `0` if unknown.
fn frame_rate_duration(session: &Session) -> f64 {
    let rate = session
        .streams
        .read()
        .video
        .as_ref()
        .map_or(Rational::zero(), |stream| stream.guess_frame_rate());
    if rate.is_valid() && rate.num > 0 {
        rate.invert().to_f64()
    } else {
        0.0
    }
}

/// Publishes a picture, or discards it while an accurate seek still lands
/// before its target. Returns `false` once the video queue aborts.
fn queue_picture(session: &Session, frame: RawFrame, pts: f64, duration: f64, serial: i32) -> bool {
    {
        let mut play = session.play.lock();
        if play.seek.seeking && serial == session.videoq.serial() {
            let target_us = play.seek.pos;
            if !play.seek.by_bytes && !pts.is_nan() && pts * 1_000_000.0 < target_us as f64 {
                return true;
            }
            play.seek.seeking = false;
            let position_ms = if play.seek.by_bytes {
                0
            } else {
                (target_us - session.start_time_us()) / 1000
            };
            drop(play);
            info!(session = %session.id, position_ms, "seek landed");
            session.notify(PlayerMessage::SeekComplete { position_ms, code: 0 });
        }
    }

    let mut slot = match session.pictq.peek_writable() {
        Some(slot) => slot,
        None => return false,
    };
    slot.write(DecodedFrame::new(frame, pts, duration, serial));
    slot.push();
    true
}
