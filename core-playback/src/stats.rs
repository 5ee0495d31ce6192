//! Playback statistics.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Cached compressed data for one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub bytes: i64,
    pub packets: i64,
    /// Duration of the queued packets in milliseconds.
    pub duration_ms: i64,
}

/// Snapshot of pipeline statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub video_cache: CacheStats,
    pub audio_cache: CacheStats,
    /// Frames dropped by the video decoder before reaching the ring.
    pub drop_frame_early: u64,
    /// Frames dropped by the refresh loop because they were already late.
    pub drop_frame_late: u64,
    /// Last target delay computed by the refresh loop (seconds).
    pub avdelay: f64,
    /// Last video minus master clock difference (seconds).
    pub avdiff: f64,
    /// Video decode rate (frames per second).
    pub vdps: f64,
    /// Video output rate (frames per second).
    pub vfps: f64,
    pub bit_rate: i64,
    /// Milliseconds between the last seek request and its first rendered frame.
    pub latest_seek_load_duration_ms: i64,
}

impl PlayerStats {
    /// Share of dropped frames relative to all frames that reached a decision.
    pub fn drop_frame_rate(&self, presented: u64) -> f64 {
        let dropped = self.drop_frame_early + self.drop_frame_late;
        let total = dropped + presented;
        if total == 0 {
            return 0.0;
        }
        dropped as f64 / total as f64
    }
}

/// Rolling frames-per-second estimate over the last few ticks.
#[derive(Debug, Clone)]
pub struct SpeedSampler {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl Default for SpeedSampler {
    fn default() -> Self {
        Self::new(10)
    }
}

impl SpeedSampler {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(2),
        }
    }

    /// Records a tick at `now` (seconds) and returns the current rate.
    pub fn add(&mut self, now: f64) -> f64 {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(now);
        self.rate()
    }

    pub fn rate(&self) -> f64 {
        match (self.samples.front(), self.samples.back()) {
            (Some(first), Some(last)) if self.samples.len() >= 2 && last > first => {
                (self.samples.len() - 1) as f64 / (last - first)
            }
            _ => 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_sampler_rate() {
        let mut sampler = SpeedSampler::new(5);
        assert_eq!(sampler.add(0.0), 0.0);

        for i in 1..=10 {
            sampler.add(i as f64 * 0.04);
        }

        assert!((sampler.rate() - 25.0).abs() < 1e-6);

        sampler.reset();
        assert_eq!(sampler.rate(), 0.0);
    }

    #[test]
    fn test_drop_frame_rate() {
        let stats = PlayerStats {
            drop_frame_early: 1,
            drop_frame_late: 1,
            ..Default::default()
        };

        assert!((stats.drop_frame_rate(8) - 0.2).abs() < 1e-9);
        assert_eq!(PlayerStats::default().drop_frame_rate(0), 0.0);
    }
}
