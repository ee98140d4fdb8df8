//! Silero VAD as a frame scorer.
//!
//! Wraps the Silero VAD ONNX model (<https://github.com/snakers4/silero-vad>).
//! The model consumes fixed 512-sample windows at 16 kHz while analysis frames
//! are usually 480 samples, so samples are carried over between frames and a
//! frame's score is the probability of the most recent completed window.
//!
//! Both state layouts are handled:
//!
//! | Version | State inputs          | State outputs   |
//! |---------|-----------------------|-----------------|
//! | v3/v4   | `h`, `c` `[2,1,64]`   | `hn`, `cn`      |
//! | v5      | `state` `[2,1,128]`   | `stateN`        |

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, Array3};
use ort::session::builder::SessionBuilder;
use ort::session::{Session, SessionInputValue};
use ort::value::Value;
use tracing::{error, info, warn};

use super::FrameScorer;
use crate::audio::TARGET_SAMPLE_RATE;
use crate::buffering::frame::AudioFrame;
use crate::error::{Result, ShadowError};

/// Window size expected by Silero VAD (32 ms at 16 kHz).
const WINDOW: usize = 512;
/// v3/v4: 2 layers × 1 batch × 64 units, for each of h and c.
const LSTM_SIZE: usize = 128;
/// v5: 2 × 1 × 128.
const GRU_SIZE: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
enum StateIo {
    Lstm {
        h_in: String,
        c_in: String,
        h_out: String,
        c_out: String,
    },
    Gru {
        state_in: String,
        state_out: Option<String>,
    },
    Stateless,
}

fn onnx_err(e: impl std::fmt::Display) -> ShadowError {
    ShadowError::OnnxSession(e.to_string())
}

/// Neural frame scorer backed by a Silero VAD model.
pub struct SileroScorer {
    session: Session,
    io: StateIo,
    input_name: String,
    sr_name: Option<String>,
    output_name: String,
    h: Vec<f32>,
    c: Vec<f32>,
    state: Vec<f32>,
    pending: Vec<f32>,
    last_prob: f32,
}

impl SileroScorer {
    /// Load the model at `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ShadowError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }

        let session = SessionBuilder::new()
            .map_err(onnx_err)?
            .commit_from_file(path)
            .map_err(onnx_err)?;

        let inputs: Vec<String> = session
            .inputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        let outputs: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        let input_name = find_name(&inputs, &["input", "audio", "x"])
            .or_else(|| inputs.first().cloned())
            .ok_or_else(|| onnx_err("Silero model has no inputs"))?;
        let output_name = find_name(&outputs, &["output", "speech_prob", "prob"])
            .or_else(|| outputs.first().cloned())
            .ok_or_else(|| onnx_err("Silero model has no outputs"))?;
        let sr_name = find_name(&inputs, &["sr", "sample_rate"]);

        let lstm = (
            find_name(&inputs, &["h", "state_h"]),
            find_name(&inputs, &["c", "state_c"]),
            find_name(&outputs, &["hn", "state_hn", "h_out"]),
            find_name(&outputs, &["cn", "state_cn", "c_out"]),
        );
        let io = match lstm {
            (Some(h_in), Some(c_in), Some(h_out), Some(c_out)) => StateIo::Lstm {
                h_in,
                c_in,
                h_out,
                c_out,
            },
            _ => match find_name(&inputs, &["state", "h_0", "hidden"]) {
                Some(state_in) => StateIo::Gru {
                    state_in,
                    state_out: find_name(&outputs, &["stateN", "state_out", "hn_out"]),
                },
                None => StateIo::Stateless,
            },
        };

        info!(?path, ?io, "silero scorer loaded");

        Ok(Self {
            session,
            io,
            input_name,
            sr_name,
            output_name,
            h: vec![0.0; LSTM_SIZE],
            c: vec![0.0; LSTM_SIZE],
            state: vec![0.0; GRU_SIZE],
            pending: Vec::with_capacity(WINDOW * 2),
            last_prob: 0.0,
        })
    }

    /// Default location: `$SHADOW_MODELS_DIR/silero_vad.onnx`, else
    /// `$XDG_DATA_HOME/shadow-master/models/silero_vad.onnx`.
    pub fn default_model_path() -> PathBuf {
        let dir = std::env::var_os("SHADOW_MODELS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| {
                        std::env::var_os("HOME")
                            .map(PathBuf::from)
                            .unwrap_or_else(|| PathBuf::from("."))
                            .join(".local")
                            .join("share")
                    })
                    .join("shadow-master")
                    .join("models")
            });
        dir.join("silero_vad.onnx")
    }

    fn run_window(&mut self, window: &[f32]) -> Result<f32> {
        let input = Array2::<f32>::from_shape_vec((1, WINDOW), window.to_vec()).map_err(onnx_err)?;
        let mut values: Vec<(String, SessionInputValue<'_>)> = vec![(
            self.input_name.clone(),
            Value::from_array(input).map_err(onnx_err)?.into(),
        )];

        if let Some(sr_name) = &self.sr_name {
            let sr = Array1::<i64>::from_elem(1, i64::from(TARGET_SAMPLE_RATE));
            values.push((sr_name.clone(), Value::from_array(sr).map_err(onnx_err)?.into()));
        }

        match &self.io {
            StateIo::Lstm { h_in, c_in, .. } => {
                let h = Array3::<f32>::from_shape_vec((2, 1, 64), self.h.clone()).map_err(onnx_err)?;
                let c = Array3::<f32>::from_shape_vec((2, 1, 64), self.c.clone()).map_err(onnx_err)?;
                values.push((h_in.clone(), Value::from_array(h).map_err(onnx_err)?.into()));
                values.push((c_in.clone(), Value::from_array(c).map_err(onnx_err)?.into()));
            }
            StateIo::Gru { state_in, .. } => {
                let s = Array3::<f32>::from_shape_vec((2, 1, 128), self.state.clone())
                    .map_err(onnx_err)?;
                values.push((state_in.clone(), Value::from_array(s).map_err(onnx_err)?.into()));
            }
            StateIo::Stateless => {}
        }

        let outputs = self.session.run(values).map_err(onnx_err)?;

        let prob = {
            let out = outputs
                .get(self.output_name.as_str())
                .unwrap_or(&outputs[0]);
            let (_, data) = out.try_extract_tensor::<f32>().map_err(onnx_err)?;
            data.first().copied().unwrap_or(0.0)
        };

        let mut downgrade = false;
        match &self.io {
            StateIo::Lstm { h_out, c_out, .. } => {
                match (outputs.get(h_out.as_str()), outputs.get(c_out.as_str())) {
                    (Some(hn), Some(cn)) => {
                        self.h = hn.try_extract_tensor::<f32>().map_err(onnx_err)?.1.to_vec();
                        self.c = cn.try_extract_tensor::<f32>().map_err(onnx_err)?.1.to_vec();
                    }
                    _ => downgrade = true,
                }
            }
            StateIo::Gru {
                state_out: Some(name),
                ..
            } => match outputs.get(name.as_str()) {
                Some(sn) => {
                    self.state = sn.try_extract_tensor::<f32>().map_err(onnx_err)?.1.to_vec();
                }
                None => downgrade = true,
            },
            _ => {}
        }
        drop(outputs);

        if downgrade {
            warn!("silero state outputs missing; continuing stateless");
            self.io = StateIo::Stateless;
        }

        Ok(prob)
    }
}

fn find_name(candidates: &[String], preferred: &[&str]) -> Option<String> {
    preferred.iter().find_map(|needle| {
        candidates
            .iter()
            .find(|name| name.eq_ignore_ascii_case(needle))
            .cloned()
    })
}

impl FrameScorer for SileroScorer {
    fn score(&mut self, frame: &AudioFrame) -> f32 {
        self.pending
            .extend(frame.samples.iter().map(|&s| f32::from(s) / 32_768.0));

        while self.pending.len() >= WINDOW {
            let window: Vec<f32> = self.pending.drain(..WINDOW).collect();
            match self.run_window(&window) {
                Ok(prob) => self.last_prob = prob,
                Err(e) => error!("silero inference error: {e}"),
            }
        }

        self.last_prob
    }

    fn reset(&mut self) {
        self.h.iter_mut().for_each(|v| *v = 0.0);
        self.c.iter_mut().for_each(|v| *v = 0.0);
        self.state.iter_mut().for_each(|v| *v = 0.0);
        self.pending.clear();
        self.last_prob = 0.0;
    }

    fn name(&self) -> &'static str {
        "silero"
    }
}
