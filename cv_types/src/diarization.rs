//! Shape of the diarization tool's JSON output: speaker-labeled time
//! segments. The tool's internals are its own business; the pipeline only
//! validates this structure before persisting the document.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiarizedTranscript {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    pub segments: Vec<DiarizedSegment>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiarizedSegment {
    /// Seconds from audio start.
    pub start: f64,

    pub end: f64,

    /// Opaque label, e.g. `SPEAKER_00`.
    pub speaker: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl DiarizedTranscript {
    /// Distinct speaker labels in first-appearance order.
    pub fn speakers(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for segment in &self.segments {
            if !seen.contains(&segment.speaker.as_str()) {
                seen.push(segment.speaker.as_str());
            }
        }
        seen
    }
}
