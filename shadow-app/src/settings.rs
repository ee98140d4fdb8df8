//! Persistent settings (JSON file in the user data directory).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use shadow_core::{
    session::config::{MAX_PLAYBACK_SPEED, MIN_PLAYBACK_SPEED},
    PracticeConfig, Preset, SegmentationPolicy,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// Base segmentation preset; the overrides below replace single fields.
    pub preset: String,
    pub min_duration_ms: Option<u64>,
    pub max_duration_ms: Option<u64>,
    pub silence_threshold_ms: Option<u32>,
    pub padding_ms: Option<u64>,
    pub vad_sensitivity: Option<f32>,
    pub practice: PracticeConfig,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            preset: Preset::Sentences.to_string(),
            min_duration_ms: None,
            max_duration_ms: None,
            silence_threshold_ms: None,
            padding_ms: None,
            vad_sensitivity: None,
            practice: PracticeConfig::default(),
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.preset = normalize_preset(&self.preset).to_string();
        self.min_duration_ms = self.min_duration_ms.map(|v| v.clamp(100, 30_000));
        self.max_duration_ms = self.max_duration_ms.map(|v| v.clamp(500, 60_000));
        self.silence_threshold_ms = self.silence_threshold_ms.map(|v| v.clamp(100, 5_000));
        self.padding_ms = self.padding_ms.map(|v| v.min(2_000));
        self.vad_sensitivity = self.vad_sensitivity.map(|v| v.clamp(0.0, 1.0));

        let p = &mut self.practice;
        p.playback_speed = p.playback_speed.clamp(MIN_PLAYBACK_SPEED, MAX_PLAYBACK_SPEED);
        p.playback_repeats = p.playback_repeats.clamp(1, 10);
        p.user_repeats = p.user_repeats.clamp(1, 10);
        p.buildup_chunk_ms = p.buildup_chunk_ms.clamp(250, 10_000);
        p.user_silence_ms = p.user_silence_ms.clamp(200, 5_000);
        if !(p.user_turn_timeout_factor.is_finite() && p.user_turn_timeout_factor > 0.0) {
            p.user_turn_timeout_factor = PracticeConfig::default().user_turn_timeout_factor;
        }
        p.user_turn_timeout_factor = p.user_turn_timeout_factor.clamp(1.0, 5.0);
        p.user_turn_grace_ms = p.user_turn_grace_ms.min(10_000);
        p.cue_volume = p.cue_volume.clamp(0.0, 1.0);
    }

    pub fn preset(&self) -> Preset {
        normalize_preset(&self.preset)
    }

    /// Segmentation policy: the preset with any overrides applied.
    pub fn policy(&self, preset: Option<Preset>) -> shadow_core::Result<SegmentationPolicy> {
        let mut builder = shadow_core::segment::PolicyBuilder::from_preset(
            preset.unwrap_or_else(|| self.preset()),
        );
        if let Some(v) = self.min_duration_ms {
            builder = builder.min_duration_ms(v);
        }
        if let Some(v) = self.max_duration_ms {
            builder = builder.max_duration_ms(v);
        }
        if let Some(v) = self.silence_threshold_ms {
            builder = builder.silence_threshold_ms(v);
        }
        if let Some(v) = self.padding_ms {
            builder = builder.padding_ms(v);
        }
        if let Some(v) = self.vad_sensitivity {
            builder = builder.vad_sensitivity(v);
        }
        builder.build()
    }
}

pub fn normalize_preset(raw: &str) -> Preset {
    match raw.trim().to_ascii_lowercase().as_str() {
        "sentence" | "sentences" | "default" => Preset::Sentences,
        "short" | "short_sentences" => Preset::Short,
        "long" | "long_sentences" | "paragraph" => Preset::Long,
        "word" | "words" => Preset::Words,
        _ => Preset::Sentences,
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ShadowMaster")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".config")
            })
            .join("shadow-master")
            .join("settings.json")
    }
}

/// Missing or unreadable files fall back to defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
