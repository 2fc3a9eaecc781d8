use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::{spawn_error, stderr_tail, MediaError};

const TOOL: &str = "ffmpeg";

/// Extracts the audio track of a video into an AAC file at `audio_path`.
///
/// # Errors
/// If ffmpeg is missing, fails to start, or exits non-zero.
pub async fn extract_to_file(video_path: &Path, audio_path: &Path) -> Result<(), MediaError> {
    tracing::info!(video = %video_path.display(), "extracting audio");

    let output = Command::new(TOOL)
        .args(build_args(video_path, audio_path))
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| spawn_error(TOOL, e))?;

    if !output.status.success() {
        return Err(MediaError::ProcessFailed {
            tool: TOOL.to_string(),
            status: output.status,
            stderr: stderr_tail(&output.stderr),
        });
    }

    if !audio_path.exists() {
        return Err(MediaError::OutputMissing {
            tool: TOOL.to_string(),
            path: audio_path.to_path_buf(),
        });
    }

    Ok(())
}

fn build_args(video_path: &Path, audio_path: &Path) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        video_path.to_string_lossy().into_owned(),
        "-vn".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "128k".to_string(),
        audio_path.to_string_lossy().into_owned(),
    ]
}
