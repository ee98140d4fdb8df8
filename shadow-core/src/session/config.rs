//! Per-session practice settings, snapshotted when a session is created.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShadowError};

pub const MIN_PLAYBACK_SPEED: f32 = 0.5;
pub const MAX_PLAYBACK_SPEED: f32 = 2.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PracticeMode {
    #[default]
    Standard,
    /// Play growing suffixes of each segment before the full segment.
    Buildup,
}

/// Immutable practice settings. A running session holds its own copy, so
/// later changes to global settings never reach it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PracticeConfig {
    /// 0.5 – 2.0.
    pub playback_speed: f32,
    pub playback_repeats: u32,
    pub user_repeats: u32,
    /// Listen-only: skip the user's turn entirely.
    pub bus_mode: bool,
    pub practice_mode: PracticeMode,
    /// Growth step of buildup suffix clips.
    pub buildup_chunk_ms: u64,
    /// Keep the microphone capture of each user turn.
    pub recording_enabled: bool,
    /// Run the assessor after each user turn.
    pub assessment_enabled: bool,
    /// Trailing silence that ends a user turn.
    pub user_silence_ms: u32,
    /// Hard turn timeout = playback length × factor + grace.
    pub user_turn_timeout_factor: f32,
    pub user_turn_grace_ms: u64,
    /// 0.0 – 1.0.
    pub cue_volume: f32,
}

impl Default for PracticeConfig {
    fn default() -> Self {
        Self {
            playback_speed: 1.0,
            playback_repeats: 2,
            user_repeats: 1,
            bus_mode: false,
            practice_mode: PracticeMode::Standard,
            buildup_chunk_ms: 1_000,
            recording_enabled: false,
            assessment_enabled: false,
            user_silence_ms: 1_000,
            user_turn_timeout_factor: 2.0,
            user_turn_grace_ms: 1_000,
            cue_volume: 0.8,
        }
    }
}

impl PracticeConfig {
    /// # Errors
    /// `ShadowError::InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(ShadowError::InvalidConfig(msg));

        if !(MIN_PLAYBACK_SPEED..=MAX_PLAYBACK_SPEED).contains(&self.playback_speed) {
            return fail(format!(
                "playbackSpeed {} outside [{MIN_PLAYBACK_SPEED}, {MAX_PLAYBACK_SPEED}]",
                self.playback_speed
            ));
        }
        if self.playback_repeats == 0 {
            return fail("playbackRepeats must be at least 1".into());
        }
        if self.user_repeats == 0 {
            return fail("userRepeats must be at least 1".into());
        }
        if self.practice_mode == PracticeMode::Buildup && self.buildup_chunk_ms == 0 {
            return fail("buildupChunkMs must be greater than zero in buildup mode".into());
        }
        if self.user_silence_ms == 0 {
            return fail("userSilenceMs must be greater than zero".into());
        }
        if !(self.user_turn_timeout_factor.is_finite() && self.user_turn_timeout_factor > 0.0) {
            return fail(format!(
                "userTurnTimeoutFactor {} must be positive",
                self.user_turn_timeout_factor
            ));
        }
        if !(0.0..=1.0).contains(&self.cue_volume) {
            return fail(format!("cueVolume {} outside [0, 1]", self.cue_volume));
        }
        Ok(())
    }

    /// Wall-clock length of a clip at the configured speed.
    pub fn playback_duration_ms(&self, clip_ms: u64) -> u64 {
        (clip_ms as f64 / f64::from(self.playback_speed)).round() as u64
    }

    /// Hard limit for one user turn on a segment of `segment_ms`.
    pub fn user_turn_timeout_ms(&self, segment_ms: u64) -> u64 {
        let spoken = self.playback_duration_ms(segment_ms) as f64;
        (spoken * f64::from(self.user_turn_timeout_factor)).round() as u64 + self.user_turn_grace_ms
    }

    /// Whether a user turn captures audio.
    pub fn records(&self) -> bool {
        self.recording_enabled && !self.bus_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        PracticeConfig::default().validate().unwrap();
    }

    #[test]
    fn speed_out_of_range_is_rejected() {
        let cfg = PracticeConfig {
            playback_speed: 2.5,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ShadowError::InvalidConfig(_))));
    }

    #[test]
    fn zero_repeats_are_rejected() {
        let cfg = PracticeConfig {
            user_repeats: 0,
            ..Default::default()
        };
        assert!(cfg.validate().unwrap_err().to_string().contains("userRepeats"));
    }

    #[test]
    fn timeout_scales_with_speed() {
        let cfg = PracticeConfig {
            playback_speed: 0.5,
            user_turn_timeout_factor: 2.0,
            user_turn_grace_ms: 1_000,
            ..Default::default()
        };
        // 1500 ms at half speed → 3000 ms of speech, doubled, plus grace
        assert_eq!(cfg.user_turn_timeout_ms(1_500), 7_000);
    }

    #[test]
    fn deserializes_partial_json_with_defaults() {
        let cfg: PracticeConfig =
            serde_json::from_str(r#"{"busMode":true,"practiceMode":"buildup"}"#).unwrap();
        assert!(cfg.bus_mode);
        assert_eq!(cfg.practice_mode, PracticeMode::Buildup);
        assert_eq!(cfg.playback_repeats, 2);
    }
}
