//! # shadow-core
//!
//! Speech segmentation and shadowing-practice engine.
//!
//! ## Architecture
//!
//! ```text
//! 16 kHz PCM → FrameAnalyzer(FrameScorer) → VadMachine → Segmenter → SegmentStore
//!                                                                        │
//!                                                            PracticeSession (pure)
//!                                                                        │
//!                         session driver task ◄── EventSink ◄── playback / listener / UI
//!                                │
//!                    Commands → Playback, Recorder, CuePlayer, Assessor
//! ```
//!
//! Segmentation is a pure function of (PCM, policy). The practice state
//! machine never performs I/O; the driver turns its commands into calls on
//! the collaborator traits and feeds completions back as events.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod analysis;
pub mod audio;
pub mod buffering;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod segment;
pub mod session;
pub mod store;
pub mod vad;

// Convenience re-exports for downstream crates
pub use analysis::{EnergyScorer, FrameAnalyzer, FrameScore, FrameScorer};
pub use audio::{AudioSource, PcmBuffer, TARGET_SAMPLE_RATE};
pub use error::{Result, ShadowError};
pub use events::{SegmentationReport, SessionStatusEvent};
pub use pipeline::{segment_in_background, segment_pcm, segment_source, PipelineDiagnostics};
pub use segment::{
    Preset, Segment, SegmentDraft, SegmentId, Segmentation, SegmentationMode, SegmentationPolicy,
    Segmenter,
};
pub use session::{
    Command, PracticeConfig, PracticeMode, PracticeSession, SessionEvent, SessionRegistry,
    SessionState,
};
pub use store::{InMemorySegmentStore, PracticeCountWriter, SegmentStore};
pub use vad::{BoundaryKind, SegmentBoundary, VadMachine};

#[cfg(feature = "onnx")]
pub use analysis::SileroScorer;
