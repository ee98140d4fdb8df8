use thiserror::Error;

/// All errors produced by shadow-core.
#[derive(Debug, Error)]
pub enum ShadowError {
    /// Segmentation finished without a single usable speech span.
    ///
    /// Kept apart from generic import failures: callers surface this as
    /// "no speech detected" rather than "import failed".
    #[error("no speech detected in source audio ({raw_spans} raw speech spans, {dropped} dropped as too short)")]
    NoSpeechDetected { raw_spans: usize, dropped: usize },

    #[error("invalid segmentation policy: {0}")]
    InvalidPolicy(String),

    #[error("invalid practice config: {0}")]
    InvalidConfig(String),

    #[error("source sample rate {actual} Hz does not match the expected {expected} Hz")]
    SampleRateMismatch { expected: u32, actual: u32 },

    #[error("playback failed: {0}")]
    PlaybackFailed(String),

    #[error("recording failed: {0}")]
    RecordingFailed(String),

    #[error("a practice session is already active for playlist {playlist_id}")]
    SessionAlreadyActive { playlist_id: String },

    #[error("event {event} is not valid in state {state}")]
    IllegalTransition { state: String, event: String },

    #[error("segment {0} not found")]
    SegmentNotFound(u64),

    #[error("playlist has no segments to practice")]
    EmptyPlaylist,

    #[error("practice session has shut down")]
    SessionClosed,

    #[error("resampler error: {0}")]
    Resample(String),

    #[error("ONNX session error: {0}")]
    OnnxSession(String),

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ShadowError>;
