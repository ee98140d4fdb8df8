//! Buildup (backward chaining): growing suffix clips of one segment.

use serde::{Deserialize, Serialize};

/// A time range of the source audio to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clip {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl Clip {
    pub fn new(start_ms: u64, end_ms: u64) -> Self {
        Self { start_ms, end_ms }
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

/// Suffixes of `k × chunk_ms` for k = 1, 2, … that are strictly shorter
/// than the segment. The full segment itself is not part of the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildupPlan {
    clips: Vec<Clip>,
}

impl BuildupPlan {
    pub fn new(segment: Clip, chunk_ms: u64) -> Self {
        let duration = segment.duration_ms();
        let clips = if chunk_ms == 0 {
            Vec::new()
        } else {
            (1..)
                .map(|k| k * chunk_ms)
                .take_while(|&len| len < duration)
                .map(|len| Clip::new(segment.end_ms - len, segment.end_ms))
                .collect()
        };
        Self { clips }
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn step(&self, step: usize) -> Option<Clip> {
        self.clips.get(step).copied()
    }

    pub fn clips(&self) -> &[Clip] {
        &self.clips
    }
}
