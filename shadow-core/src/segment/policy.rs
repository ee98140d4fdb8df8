//! Immutable segmentation policy.
//!
//! A policy is built once per import or re-segmentation request and never
//! mutated; re-segmenting with different settings means building a new
//! policy and producing a new segment set.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShadowError};
use crate::vad::VadTiming;

/// How long spans are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentationMode {
    /// Long spans are split near low-energy points into `max`-sized pieces.
    Word,
    /// VAD spans are trusted; `max` only limits merging.
    Sentence,
}

/// Named parameter sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Sentences,
    Short,
    Long,
    Words,
}

impl Preset {
    pub const ALL: [Preset; 4] = [Preset::Sentences, Preset::Short, Preset::Long, Preset::Words];

    pub fn as_str(self) -> &'static str {
        match self {
            Preset::Sentences => "sentences",
            Preset::Short => "short",
            Preset::Long => "long",
            Preset::Words => "words",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preset {
    type Err = ShadowError;

    fn from_str(s: &str) -> Result<Self> {
        Preset::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ShadowError::InvalidPolicy(format!("unknown preset '{s}'")))
    }
}

/// Validated, immutable segmentation parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentationPolicy {
    mode: SegmentationMode,
    min_duration_ms: u64,
    max_duration_ms: u64,
    silence_threshold_ms: u32,
    padding_ms: u64,
    vad_sensitivity: f32,
    speech_confirm_ms: u32,
    frame_ms: u32,
    sample_rate: u32,
}

impl SegmentationPolicy {
    pub fn builder(mode: SegmentationMode) -> PolicyBuilder {
        PolicyBuilder::new(mode)
    }

    /// Policy from the core parameters, with default frame and confirm windows.
    pub fn new(
        mode: SegmentationMode,
        min_duration_ms: u64,
        max_duration_ms: u64,
        silence_threshold_ms: u32,
        padding_ms: u64,
        vad_sensitivity: f32,
    ) -> Result<Self> {
        PolicyBuilder::new(mode)
            .min_duration_ms(min_duration_ms)
            .max_duration_ms(max_duration_ms)
            .silence_threshold_ms(silence_threshold_ms)
            .padding_ms(padding_ms)
            .vad_sensitivity(vad_sensitivity)
            .build()
    }

    /// Parameters of a named preset (min / max / silence / padding ms):
    /// sentences 500/8000/700/200, short 500/3000/500/200,
    /// long 1000/12000/1000/300, words 300/2000/400/150.
    pub fn preset(preset: Preset) -> Self {
        let (mode, min, max, silence, padding) = match preset {
            Preset::Sentences => (SegmentationMode::Sentence, 500, 8_000, 700, 200),
            Preset::Short => (SegmentationMode::Sentence, 500, 3_000, 500, 200),
            Preset::Long => (SegmentationMode::Sentence, 1_000, 12_000, 1_000, 300),
            Preset::Words => (SegmentationMode::Word, 300, 2_000, 400, 150),
        };
        Self {
            mode,
            min_duration_ms: min,
            max_duration_ms: max,
            silence_threshold_ms: silence,
            padding_ms: padding,
            ..PolicyBuilder::new(mode).draft
        }
    }

    pub fn mode(&self) -> SegmentationMode {
        self.mode
    }

    pub fn min_duration_ms(&self) -> u64 {
        self.min_duration_ms
    }

    pub fn max_duration_ms(&self) -> u64 {
        self.max_duration_ms
    }

    pub fn silence_threshold_ms(&self) -> u32 {
        self.silence_threshold_ms
    }

    pub fn padding_ms(&self) -> u64 {
        self.padding_ms
    }

    pub fn vad_sensitivity(&self) -> f32 {
        self.vad_sensitivity
    }

    pub fn speech_confirm_ms(&self) -> u32 {
        self.speech_confirm_ms
    }

    pub fn frame_ms(&self) -> u32 {
        self.frame_ms
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Hysteresis windows for the VAD state machine.
    pub fn vad_timing(&self) -> VadTiming {
        VadTiming {
            sample_rate: self.sample_rate,
            speech_confirm_ms: self.speech_confirm_ms,
            silence_threshold_ms: self.silence_threshold_ms,
        }
    }

    fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(ShadowError::InvalidPolicy(msg));

        if self.max_duration_ms == 0 {
            return fail("maxDurationMs must be greater than zero".into());
        }
        if self.min_duration_ms > self.max_duration_ms {
            return fail(format!(
                "minDurationMs ({}) exceeds maxDurationMs ({})",
                self.min_duration_ms, self.max_duration_ms
            ));
        }
        // Word splitting cuts near equal shares; a share stays above max/2
        // only when that still covers min.
        if self.mode == SegmentationMode::Word
            && self.min_duration_ms.saturating_mul(2) > self.max_duration_ms
        {
            return fail(format!(
                "in word mode maxDurationMs ({}) must be at least twice minDurationMs ({})",
                self.max_duration_ms, self.min_duration_ms
            ));
        }
        if self.silence_threshold_ms == 0 {
            return fail("silenceThresholdMs must be greater than zero".into());
        }
        if !(0.0..=1.0).contains(&self.vad_sensitivity) {
            return fail(format!(
                "vadSensitivity {} outside [0, 1]",
                self.vad_sensitivity
            ));
        }
        if !(10..=100).contains(&self.frame_ms) {
            return fail(format!("frameMs {} outside [10, 100]", self.frame_ms));
        }
        if self.sample_rate == 0 {
            return fail("sampleRate must be greater than zero".into());
        }
        Ok(())
    }
}

impl Default for SegmentationPolicy {
    fn default() -> Self {
        Self::preset(Preset::Sentences)
    }
}

/// Builder for custom policies. `build` validates and never clamps.
#[derive(Debug, Clone)]
pub struct PolicyBuilder {
    draft: SegmentationPolicy,
}

impl PolicyBuilder {
    fn new(mode: SegmentationMode) -> Self {
        Self {
            draft: SegmentationPolicy {
                mode,
                min_duration_ms: 500,
                max_duration_ms: 8_000,
                silence_threshold_ms: 700,
                padding_ms: 200,
                vad_sensitivity: 0.5,
                speech_confirm_ms: 90,
                frame_ms: 30,
                sample_rate: crate::audio::TARGET_SAMPLE_RATE,
            },
        }
    }

    /// Start from a preset and adjust individual values.
    pub fn from_preset(preset: Preset) -> Self {
        Self {
            draft: SegmentationPolicy::preset(preset),
        }
    }

    pub fn mode(mut self, mode: SegmentationMode) -> Self {
        self.draft.mode = mode;
        self
    }

    pub fn min_duration_ms(mut self, ms: u64) -> Self {
        self.draft.min_duration_ms = ms;
        self
    }

    pub fn max_duration_ms(mut self, ms: u64) -> Self {
        self.draft.max_duration_ms = ms;
        self
    }

    pub fn silence_threshold_ms(mut self, ms: u32) -> Self {
        self.draft.silence_threshold_ms = ms;
        self
    }

    pub fn padding_ms(mut self, ms: u64) -> Self {
        self.draft.padding_ms = ms;
        self
    }

    pub fn vad_sensitivity(mut self, sensitivity: f32) -> Self {
        self.draft.vad_sensitivity = sensitivity;
        self
    }

    pub fn speech_confirm_ms(mut self, ms: u32) -> Self {
        self.draft.speech_confirm_ms = ms;
        self
    }

    pub fn frame_ms(mut self, ms: u32) -> Self {
        self.draft.frame_ms = ms;
        self
    }

    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.draft.sample_rate = rate;
        self
    }

    /// # Errors
    /// `ShadowError::InvalidPolicy` when, for example, min exceeds max.
    pub fn build(self) -> Result<SegmentationPolicy> {
        self.draft.validate()?;
        Ok(self.draft)
    }
}
