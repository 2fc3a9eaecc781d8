use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::{spawn_error, stderr_tail, MediaError};

/// Runs the configured downloader (yt-dlp compatible interface) against a
/// meeting's source page, writing the merged video to `output_path`.
///
/// # Errors
/// If the downloader is missing, exits non-zero, or leaves no file behind.
pub async fn download(bin: &str, source_url: &str, output_path: &Path) -> Result<(), MediaError> {
    tracing::info!(url = %source_url, output = %output_path.display(), "downloading video");

    let output = Command::new(bin)
        .arg("--no-progress")
        .arg("--merge-output-format")
        .arg("mp4")
        .arg("-o")
        .arg(output_path)
        .arg(source_url)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| spawn_error(bin, e))?;

    if !output.status.success() {
        return Err(MediaError::ProcessFailed {
            tool: bin.to_string(),
            status: output.status,
            stderr: stderr_tail(&output.stderr),
        });
    }

    if !output_path.exists() {
        return Err(MediaError::OutputMissing {
            tool: bin.to_string(),
            path: output_path.to_path_buf(),
        });
    }

    Ok(())
}
