//! Segmentation throughput on synthetic speech-like audio.
//!
//! Usage: cargo run -p shadow-core --release --bin benchmark -- \
//!   [--minutes <n>] [--iterations <n>] [--output <file.json>]

use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;
use shadow_core::{segment_pcm, Preset, SegmentationPolicy};

const RATE: u32 = 16_000;

#[derive(Debug)]
struct Args {
    minutes: u64,
    iterations: usize,
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct PresetResult {
    preset: String,
    runs: usize,
    segments: usize,
    dropped: usize,
    p50_ms: f64,
    p95_ms: f64,
    avg_ms: f64,
    /// Seconds of audio segmented per wall-clock second.
    realtime_factor: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    audio_seconds: u64,
    iterations: usize,
    presets: Vec<PresetResult>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("benchmark failed: {e}");
        std::process::exit(1);
    }
}

fn parse_args() -> Result<Args, String> {
    let mut minutes = 5;
    let mut iterations = 5;
    let mut output = None;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--minutes" => {
                let v = it.next().ok_or("missing value for --minutes")?;
                minutes = v
                    .parse::<u64>()
                    .map_err(|_| "invalid value for --minutes".to_string())?
                    .clamp(1, 120);
            }
            "--iterations" => {
                let v = it.next().ok_or("missing value for --iterations")?;
                iterations = v
                    .parse::<usize>()
                    .map_err(|_| "invalid value for --iterations".to_string())?
                    .clamp(1, 50);
            }
            "--output" => {
                let v = it.next().ok_or("missing value for --output")?;
                output = Some(PathBuf::from(v));
            }
            "--help" | "-h" => {
                println!(
                    "Usage: cargo run -p shadow-core --release --bin benchmark -- \\
  [--minutes <n>] [--iterations <n>] [--output <file.json>]"
                );
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(Args {
        minutes,
        iterations,
        output,
    })
}

/// Alternating tone bursts and pauses of varying length, with a little hiss
/// so the noise floor has something to track.
fn synthetic_track(seconds: u64) -> Vec<i16> {
    let total = (seconds * u64::from(RATE)) as usize;
    let mut pcm = Vec::with_capacity(total);
    // Small LCG keeps runs reproducible without pulling in an RNG crate.
    let mut state: u32 = 0x2545_f491;
    let mut next = move || {
        state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        state >> 8
    };

    let mut speaking = false;
    while pcm.len() < total {
        let ms = if speaking {
            400 + u64::from(next() % 5_600)
        } else {
            150 + u64::from(next() % 1_350)
        };
        let n = (ms * u64::from(RATE) / 1_000) as usize;
        let freq = 0.05 + (next() % 100) as f32 / 1_000.0;
        for i in 0..n {
            let hiss = (next() % 200) as i16 - 100;
            let voice = if speaking {
                ((i as f32 * freq).sin() * 9_000.0) as i16
            } else {
                0
            };
            pcm.push(voice.saturating_add(hiss));
        }
        speaking = !speaking;
    }
    pcm.truncate(total);
    pcm
}

fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn run() -> Result<(), String> {
    let args = parse_args()?;
    let seconds = args.minutes * 60;
    let pcm = synthetic_track(seconds);
    println!(
        "Segmenting {seconds} s of synthetic audio, {} iteration(s) per preset",
        args.iterations
    );

    let mut presets = Vec::new();
    for preset in Preset::ALL {
        let policy = SegmentationPolicy::preset(preset);
        let mut latencies = Vec::with_capacity(args.iterations);
        let mut last = None;
        for _ in 0..args.iterations {
            let started = Instant::now();
            let seg = segment_pcm(&pcm, RATE, &policy).map_err(|e| e.to_string())?;
            latencies.push(started.elapsed().as_secs_f64() * 1_000.0);
            last = Some(seg);
        }
        let seg = last.ok_or("no iterations ran")?;
        let avg_ms = latencies.iter().sum::<f64>() / latencies.len() as f64;
        let result = PresetResult {
            preset: preset.to_string(),
            runs: latencies.len(),
            segments: seg.len(),
            dropped: seg.stats.dropped,
            p50_ms: percentile(&latencies, 0.50),
            p95_ms: percentile(&latencies, 0.95),
            avg_ms,
            realtime_factor: if avg_ms > 0.0 {
                seconds as f64 * 1_000.0 / avg_ms
            } else {
                0.0
            },
        };
        println!(
            "  {:<10} segments={:<5} p50={:>8.2} ms  p95={:>8.2} ms  x{:.0} realtime",
            result.preset, result.segments, result.p50_ms, result.p95_ms, result.realtime_factor
        );
        presets.push(result);
    }

    let summary = Summary {
        audio_seconds: seconds,
        iterations: args.iterations,
        presets,
    };
    let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    if let Some(out) = args.output {
        std::fs::write(&out, json).map_err(|e| e.to_string())?;
        println!("Wrote benchmark report: {}", out.display());
    } else {
        println!("{json}");
    }
    Ok(())
}
