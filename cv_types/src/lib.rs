use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod agenda;
pub mod diarization;

pub use agenda::{AgendaData, AgendaItem, Bookmark, CalendarMeeting, CalendarResponse, MeetingMetadata};
pub use diarization::{DiarizedSegment, DiarizedTranscript};

/// Position of a meeting in the pipeline. `Diarized` and `Failed` are
/// terminal; every other phase has exactly one successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Discovered,
    Downloaded,
    Extracted,
    Uploaded,
    Diarized,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Discovered => "DISCOVERED",
            Phase::Downloaded => "DOWNLOADED",
            Phase::Extracted => "EXTRACTED",
            Phase::Uploaded => "UPLOADED",
            Phase::Diarized => "DIARIZED",
            Phase::Failed => "FAILED",
        }
    }

    /// Case-insensitive parse, for operator tooling and stored strings.
    pub fn parse(s: &str) -> Option<Phase> {
        match s.to_ascii_uppercase().as_str() {
            "DISCOVERED" => Some(Phase::Discovered),
            "DOWNLOADED" => Some(Phase::Downloaded),
            "EXTRACTED" => Some(Phase::Extracted),
            "UPLOADED" => Some(Phase::Uploaded),
            "DIARIZED" => Some(Phase::Diarized),
            "FAILED" => Some(Phase::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Diarized | Phase::Failed)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file produced or consumed by the pipeline. Given a kind and a meeting id
/// the storage layer derives a single canonical path with no further state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    RawVideo,
    RawAgenda,
    DerivedAudio,
    DerivedChapters,
    DerivedMetadata,
    DerivedDiarized,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 6] = [
        ArtifactKind::RawVideo,
        ArtifactKind::RawAgenda,
        ArtifactKind::DerivedAudio,
        ArtifactKind::DerivedChapters,
        ArtifactKind::DerivedMetadata,
        ArtifactKind::DerivedDiarized,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::RawVideo => "raw_video",
            ArtifactKind::RawAgenda => "raw_agenda",
            ArtifactKind::DerivedAudio => "derived_audio",
            ArtifactKind::DerivedChapters => "derived_chapters",
            ArtifactKind::DerivedMetadata => "derived_metadata",
            ArtifactKind::DerivedDiarized => "derived_diarized",
        }
    }

    pub fn parse(s: &str) -> Option<ArtifactKind> {
        match s {
            "raw_video" => Some(ArtifactKind::RawVideo),
            "raw_agenda" => Some(ArtifactKind::RawAgenda),
            "derived_audio" => Some(ArtifactKind::DerivedAudio),
            "derived_chapters" => Some(ArtifactKind::DerivedChapters),
            "derived_metadata" => Some(ArtifactKind::DerivedMetadata),
            "derived_diarized" => Some(ArtifactKind::DerivedDiarized),
            _ => None,
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The central record. Created by discovery, mutated only by the workflow
/// orchestrator, never deleted by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meeting {
    pub id: String,

    pub title: String,

    /// Scheduled date as the calendar reports it, e.g. `"2025-06-05 19:00"`.
    pub date: String,

    /// Source page the video will be downloaded from.
    pub source_url: String,

    pub phase: Phase,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_video_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapters_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub diarized_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at_phase: Option<Phase>,

    /// Raw agenda bookmarks and items, mirrored onto the record for operator
    /// visibility once the extract phase has run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agenda: Option<serde_json::Value>,

    /// Generated chapter description text, mirrored like `agenda`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapters: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Meeting {
    pub fn new(id: impl Into<String>, title: impl Into<String>, date: impl Into<String>, source_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Meeting {
            id: id.into(),
            title: title.into(),
            date: date.into(),
            source_url: source_url.into(),
            phase: Phase::Discovered,
            raw_video_path: None,
            chapters_path: None,
            metadata_path: None,
            audio_path: None,
            diarized_path: None,
            published_url: None,
            error_message: None,
            failed_at_phase: None,
            agenda: None,
            chapters: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Date portion of the stored date string: first whitespace-separated
    /// token, slashes normalized to dashes. `"2025/06/05 19:00"` → `"2025-06-05"`.
    pub fn date_only(&self) -> String {
        self.date
            .split_whitespace()
            .next()
            .unwrap_or("")
            .replace('/', "-")
    }
}

/// Subset of meeting fields a phase worker may change alongside a phase
/// transition. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeetingPatch {
    pub raw_video_path: Option<String>,
    pub chapters_path: Option<String>,
    pub metadata_path: Option<String>,
    pub audio_path: Option<String>,
    pub diarized_path: Option<String>,
    pub published_url: Option<String>,
    pub error_message: Option<String>,
    pub failed_at_phase: Option<Phase>,
    pub agenda: Option<serde_json::Value>,
    pub chapters: Option<String>,
}

impl MeetingPatch {
    /// Fold the patch into a meeting record, without touching the phase or
    /// timestamps (the store owns those).
    pub fn apply_to(&self, meeting: &mut Meeting) {
        if let Some(v) = &self.raw_video_path {
            meeting.raw_video_path = Some(v.clone());
        }
        if let Some(v) = &self.chapters_path {
            meeting.chapters_path = Some(v.clone());
        }
        if let Some(v) = &self.metadata_path {
            meeting.metadata_path = Some(v.clone());
        }
        if let Some(v) = &self.audio_path {
            meeting.audio_path = Some(v.clone());
        }
        if let Some(v) = &self.diarized_path {
            meeting.diarized_path = Some(v.clone());
        }
        if let Some(v) = &self.published_url {
            meeting.published_url = Some(v.clone());
        }
        if let Some(v) = &self.error_message {
            meeting.error_message = Some(v.clone());
        }
        if let Some(v) = self.failed_at_phase {
            meeting.failed_at_phase = Some(v);
        }
        if let Some(v) = &self.agenda {
            meeting.agenda = Some(v.clone());
        }
        if let Some(v) = &self.chapters {
            meeting.chapters = Some(v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_round_trips_through_strings() {
        for phase in [
            Phase::Discovered,
            Phase::Downloaded,
            Phase::Extracted,
            Phase::Uploaded,
            Phase::Diarized,
            Phase::Failed,
        ] {
            assert_eq!(Phase::parse(phase.as_str()), Some(phase));
        }
        assert_eq!(Phase::parse("downloaded"), Some(Phase::Downloaded));
        assert_eq!(Phase::parse("bogus"), None);
    }

    #[test]
    fn terminal_phases() {
        assert!(Phase::Diarized.is_terminal());
        assert!(Phase::Failed.is_terminal());
        assert!(!Phase::Discovered.is_terminal());
        assert!(!Phase::Uploaded.is_terminal());
    }

    #[test]
    fn artifact_kind_strings_are_stable() {
        for kind in ArtifactKind::ALL {
            assert_eq!(ArtifactKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ArtifactKind::parse("../etc"), None);
    }

    #[test]
    fn date_only_takes_first_token_and_normalizes_slashes() {
        let mut m = Meeting::new("m1", "City Commission - Regular", "2025-06-05 19:00", "https://example.test/m1");
        assert_eq!(m.date_only(), "2025-06-05");
        m.date = "2025/06/05 19:00".to_string();
        assert_eq!(m.date_only(), "2025-06-05");
        m.date = String::new();
        assert_eq!(m.date_only(), "");
    }

    #[test]
    fn patch_only_touches_set_fields() {
        let mut m = Meeting::new("m1", "t", "2025-06-05 19:00", "u");
        m.raw_video_path = Some("raw/videos/m1.mp4".to_string());

        let patch = MeetingPatch {
            published_url: Some("https://host.test/v/abc".to_string()),
            ..Default::default()
        };
        patch.apply_to(&mut m);

        assert_eq!(m.raw_video_path.as_deref(), Some("raw/videos/m1.mp4"));
        assert_eq!(m.published_url.as_deref(), Some("https://host.test/v/abc"));
        assert_eq!(m.error_message, None);
    }

    #[test]
    fn meeting_serializes_without_empty_options() {
        let m = Meeting::new("m1", "t", "2025-06-05 19:00", "u");
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["phase"], "DISCOVERED");
        assert!(json.get("raw_video_path").is_none());
        assert!(json.get("failed_at_phase").is_none());
    }
}
