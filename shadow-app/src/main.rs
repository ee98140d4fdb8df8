//! Shadow Master command-line host.
//!
//! ```text
//! shadow segment talk.wav --preset words --subtitles talk.en.srt --json
//! shadow render talk.wav -o practice.wav --playback-repeats 3 --buildup
//! shadow settings --write
//! ```

mod render;
mod settings;
mod wav;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use shadow_core::{
    events::SegmentationReport,
    pipeline::segment_in_background,
    segment::{align_caption_tracks, parse_srt, CaptionTrack, PlaylistId, SourceAudioId},
    session::PracticeMode,
    store::{counts::DEFAULT_DEBOUNCE, InMemorySegmentStore, PracticeCountWriter, SegmentStore},
    AudioSource, EnergyScorer, PracticeSession, Preset, ShadowError,
};
use tracing::{info, warn};

use settings::{default_settings_path, load_settings, save_settings, AppSettings};

/// Exit status when an import contains no usable speech.
const EXIT_NO_SPEECH: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "shadow", about = "Split audio into shadowing segments and practise them", version)]
struct Cli {
    /// Settings file (defaults to the per-user location)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
enum ScorerKind {
    #[default]
    Energy,
    /// Silero VAD model (requires the `onnx` feature)
    Silero,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Detect speech segments in a WAV file
    Segment {
        input: PathBuf,

        /// Segmentation preset (sentences, short, long, words)
        #[arg(long)]
        preset: Option<Preset>,

        /// Subtitle files to align: the first fills transcriptions, the
        /// second translations
        #[arg(long = "subtitles")]
        subtitles: Vec<PathBuf>,

        #[arg(long, value_enum, default_value_t)]
        scorer: ScorerKind,

        /// Silero model path for `--scorer silero`
        #[arg(long)]
        model: Option<PathBuf>,

        /// Print the full report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Render an unattended practice track for a WAV file
    Render {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(long)]
        preset: Option<Preset>,

        #[arg(long)]
        playback_repeats: Option<u32>,

        #[arg(long)]
        user_repeats: Option<u32>,

        #[arg(long)]
        speed: Option<f32>,

        /// Listen only: no gaps for the learner
        #[arg(long, default_value_t = false)]
        bus: bool,

        /// Play growing tail fragments before each full segment
        #[arg(long, default_value_t = false)]
        buildup: bool,
    },

    /// Print the effective settings
    Settings {
        /// Write them back to the settings file
        #[arg(long, default_value_t = false)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("shadow=info,shadow_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings_path = cli.settings.clone().unwrap_or_else(default_settings_path);
    let settings = load_settings(&settings_path);

    let result = match cli.command {
        Cmd::Segment {
            input,
            preset,
            subtitles,
            scorer,
            model,
            json,
        } => segment(&settings, &input, preset, &subtitles, scorer, model, json).await,
        Cmd::Render {
            input,
            output,
            preset,
            playback_repeats,
            user_repeats,
            speed,
            bus,
            buildup,
        } => {
            let mut settings = settings;
            let p = &mut settings.practice;
            if let Some(v) = playback_repeats {
                p.playback_repeats = v;
            }
            if let Some(v) = user_repeats {
                p.user_repeats = v;
            }
            if let Some(v) = speed {
                p.playback_speed = v;
            }
            p.bus_mode |= bus;
            if buildup {
                p.practice_mode = PracticeMode::Buildup;
            }
            settings.normalize();
            render_track(&settings, &input, &output, preset).await
        }
        Cmd::Settings { write } => show_settings(&settings, &settings_path, write),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(ShadowError::NoSpeechDetected { .. }) = e.downcast_ref::<ShadowError>() {
                eprintln!("{e}");
                return ExitCode::from(EXIT_NO_SPEECH);
            }
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn segment(
    settings: &AppSettings,
    input: &Path,
    preset: Option<Preset>,
    subtitles: &[PathBuf],
    scorer: ScorerKind,
    model: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let policy = settings.policy(preset)?;
    let audio = wav::read_mono_16k(input)?;
    let duration_ms = audio.duration_ms();

    let outcome = match scorer {
        ScorerKind::Energy => {
            segment_in_background(audio, policy, EnergyScorer::default()).await?
        }
        ScorerKind::Silero => silero_job(audio, policy, model).await?,
    };
    let segmentation = outcome.segmentation.clone().into_result()?;

    let store = InMemorySegmentStore::new();
    let playlist = playlist_for(input);
    let mut segments = store.create_segments(
        &SourceAudioId::from(input.to_string_lossy().as_ref()),
        &playlist,
        &segmentation.segments,
    )?;

    let tracks = subtitles
        .iter()
        .map(|path| {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            Ok(CaptionTrack {
                language: path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                captions: parse_srt(&raw),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    if !tracks.is_empty() {
        align_caption_tracks(&mut segments, &tracks);
    }

    if json {
        let report = SegmentationReport::new(duration_ms, outcome);
        let value = serde_json::json!({ "report": report, "segments": segments });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    for w in &segmentation.warnings {
        warn!(?w, "segmentation warning");
    }
    println!(
        "{} segments from {:.1} s of audio ({} scorer)",
        segments.len(),
        duration_ms as f64 / 1_000.0,
        outcome.scorer
    );
    for s in &segments {
        println!(
            "{:>4}  {:>9.2} - {:>9.2}  {}",
            s.order_index + 1,
            s.start_ms as f64 / 1_000.0,
            s.end_ms as f64 / 1_000.0,
            s.transcription.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

#[cfg(feature = "onnx")]
async fn silero_job(
    audio: shadow_core::PcmBuffer,
    policy: shadow_core::SegmentationPolicy,
    model: Option<PathBuf>,
) -> Result<shadow_core::pipeline::JobOutcome> {
    let path = model.context("--model is required with --scorer silero")?;
    let scorer = shadow_core::SileroScorer::new(&path)?;
    Ok(segment_in_background(audio, policy, scorer).await?)
}

#[cfg(not(feature = "onnx"))]
async fn silero_job(
    _audio: shadow_core::PcmBuffer,
    _policy: shadow_core::SegmentationPolicy,
    _model: Option<PathBuf>,
) -> Result<shadow_core::pipeline::JobOutcome> {
    anyhow::bail!("the silero scorer requires building with the 'onnx' feature")
}

async fn render_track(
    settings: &AppSettings,
    input: &Path,
    output: &Path,
    preset: Option<Preset>,
) -> Result<()> {
    let policy = settings.policy(preset)?;
    let audio = wav::read_mono_16k(input)?;
    let outcome = segment_in_background(audio.clone(), policy, EnergyScorer::default()).await?;
    let segmentation = outcome.segmentation.into_result()?;

    let store = Arc::new(InMemorySegmentStore::new());
    let playlist = playlist_for(input);
    let segments = store.create_segments(
        &SourceAudioId::from(input.to_string_lossy().as_ref()),
        &playlist,
        &segmentation.segments,
    )?;

    let mut session = PracticeSession::from_segments(&segments, settings.practice.clone())?;
    let track = render::render(&mut session, &audio)?;
    wav::write_mono_16k(output, &track.samples)?;

    let writer = PracticeCountWriter::spawn(store.clone(), DEFAULT_DEBOUNCE)?;
    for (&id, &times) in &track.practice_counts {
        for _ in 0..times {
            writer.record(id);
        }
    }
    writer.flush()?;
    let practised: u32 = store
        .segments(&playlist)?
        .iter()
        .map(|s| s.practice_count)
        .sum();

    info!(
        output = %output.display(),
        duration_ms = track.duration_ms(),
        clips = track.clips_played,
        "practice track written"
    );
    println!(
        "{}: {} segments, {} clips, {} user turns, {:.1} s",
        output.display(),
        segments.len(),
        track.clips_played,
        practised,
        track.duration_ms() as f64 / 1_000.0
    );
    Ok(())
}

fn show_settings(settings: &AppSettings, path: &Path, write: bool) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(settings)?);
    if write {
        save_settings(path, settings).with_context(|| format!("writing {}", path.display()))?;
        println!("Wrote settings: {}", path.display());
    }
    Ok(())
}

fn playlist_for(input: &Path) -> PlaylistId {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "playlist".into());
    PlaylistId::from(stem.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn render_flags_parse() {
        let cli = Cli::try_parse_from([
            "shadow", "render", "in.wav", "-o", "out.wav", "--preset", "words", "--bus",
        ])
        .unwrap();
        match cli.command {
            Cmd::Render {
                preset, bus, output, ..
            } => {
                assert_eq!(preset, Some(Preset::Words));
                assert!(bus);
                assert_eq!(output, PathBuf::from("out.wav"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
