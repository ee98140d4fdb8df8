//! Energy-based frame scorer using RMS level against an adaptive noise floor.
//!
//! ## Algorithm
//!
//! 1. Compute the RMS of the frame and convert it to dBFS.
//! 2. Track a noise floor: it drops immediately to any quieter frame and
//!    creeps upward slowly while frames stay louder.
//! 3. Score = `(level_db - floor_db) / range_db`, clamped to `[0, 1]`.
//!
//! The floor makes the threshold dynamic: a recording with constant hiss
//! pulls the floor up to the hiss, so speech is measured against it rather
//! than against digital silence.

use super::FrameScorer;
use crate::buffering::frame::AudioFrame;

/// Level reported for an all-zero frame.
const SILENT_DB: f32 = -100.0;

/// A simple adaptive energy scorer.
#[derive(Debug, Clone)]
pub struct EnergyScorer {
    /// Floor the tracker starts from (dBFS). Default: `-60`.
    initial_floor_db: f32,
    /// The floor never goes below this. Default: `-70`.
    min_floor_db: f32,
    /// The floor never rises above this. Default: `-40`.
    max_floor_db: f32,
    /// dB above the floor that maps to a score of `1.0`. Default: `40`.
    range_db: f32,
    /// Upward drift of the floor per frame while frames are louder. Default: `0.02`.
    rise_db_per_frame: f32,
    floor_db: f32,
}

impl EnergyScorer {
    pub fn new(initial_floor_db: f32, range_db: f32) -> Self {
        Self {
            initial_floor_db,
            min_floor_db: -70.0,
            max_floor_db: -40.0,
            range_db: range_db.max(1.0),
            rise_db_per_frame: 0.02,
            floor_db: initial_floor_db,
        }
    }

    /// Root-mean-square of 16-bit samples, normalised to `[0, 1]`.
    pub fn rms(samples: &[i16]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = samples
            .iter()
            .map(|&s| {
                let v = f64::from(s) / 32_768.0;
                v * v
            })
            .sum();
        (sum_sq / samples.len() as f64).sqrt() as f32
    }

    /// RMS level in dBFS, floored at `-100`.
    pub fn level_db(samples: &[i16]) -> f32 {
        let rms = Self::rms(samples);
        if rms <= 1e-5 {
            SILENT_DB
        } else {
            20.0 * rms.log10()
        }
    }

    /// Current noise floor estimate (dBFS).
    pub fn floor_db(&self) -> f32 {
        self.floor_db
    }
}

impl Default for EnergyScorer {
    fn default() -> Self {
        Self::new(-60.0, 40.0)
    }
}

impl FrameScorer for EnergyScorer {
    fn score(&mut self, frame: &AudioFrame) -> f32 {
        if frame.is_empty() {
            return 0.0;
        }
        let level = Self::level_db(&frame.samples);

        if level < self.floor_db {
            self.floor_db = level.max(self.min_floor_db);
        } else {
            self.floor_db = (self.floor_db + self.rise_db_per_frame).min(self.max_floor_db);
        }

        ((level - self.floor_db) / self.range_db).clamp(0.0, 1.0)
    }

    fn reset(&mut self) {
        self.floor_db = self.initial_floor_db;
    }

    fn name(&self) -> &'static str {
        "energy"
    }
}
