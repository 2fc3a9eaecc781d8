//! Canonical artifact layout. Paths are a pure function of the artifact kind
//! and the meeting id, so any two processes agree on where a file lives
//! without coordination.

use cv_types::ArtifactKind;

/// Restrict a meeting id to `[A-Za-z0-9_]` for use in filenames. Total: any
/// other byte becomes `_`, and an empty input yields `"_"`.
pub fn sanitize_meeting_id(id: &str) -> String {
    if id.is_empty() {
        return "_".to_string();
    }
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Storage path relative to the storage root.
pub fn relative_path(kind: ArtifactKind, meeting_id: &str) -> String {
    let id = sanitize_meeting_id(meeting_id);
    match kind {
        ArtifactKind::RawVideo => format!("raw/videos/{id}.mp4"),
        ArtifactKind::RawAgenda => format!("raw/agendas/{id}_agenda.html"),
        ArtifactKind::DerivedAudio => format!("derived/audio/{id}.m4a"),
        ArtifactKind::DerivedChapters => format!("derived/chapters/{id}_chapters.txt"),
        ArtifactKind::DerivedMetadata => format!("derived/metadata/{id}_metadata.json"),
        ArtifactKind::DerivedDiarized => format!("derived/diarized/{id}_diarized.json"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_is_total_and_stays_in_class() {
        let cases = ["m1", "2025-06-05 special!", "a/b/../c", "", "ünïcode", "already_fine_123"];
        for case in cases {
            let out = sanitize_meeting_id(case);
            assert!(!out.is_empty(), "empty output for {case:?}");
            assert!(
                out.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
                "bad char in output for {case:?}: {out}"
            );
        }
        assert_eq!(sanitize_meeting_id("a/b"), "a_b");
        assert_eq!(sanitize_meeting_id(""), "_");
    }

    #[test]
    fn layout_matches_the_persisted_tree() {
        assert_eq!(relative_path(ArtifactKind::RawVideo, "m1"), "raw/videos/m1.mp4");
        assert_eq!(relative_path(ArtifactKind::RawAgenda, "m1"), "raw/agendas/m1_agenda.html");
        assert_eq!(relative_path(ArtifactKind::DerivedAudio, "m1"), "derived/audio/m1.m4a");
        assert_eq!(relative_path(ArtifactKind::DerivedChapters, "m1"), "derived/chapters/m1_chapters.txt");
        assert_eq!(relative_path(ArtifactKind::DerivedMetadata, "m1"), "derived/metadata/m1_metadata.json");
        assert_eq!(relative_path(ArtifactKind::DerivedDiarized, "m1"), "derived/diarized/m1_diarized.json");
    }

    #[test]
    fn layout_is_deterministic_for_hostile_ids() {
        let first = relative_path(ArtifactKind::RawVideo, "../../etc/passwd");
        let second = relative_path(ArtifactKind::RawVideo, "../../etc/passwd");
        assert_eq!(first, second);
        assert!(!first.contains(".."));
    }
}
