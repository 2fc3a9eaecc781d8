use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use crate::{spawn_error, MediaError};

/// Diarization of a multi-hour meeting is slow but not unbounded; kill the
/// tool rather than hold the queue's only slot forever.
const DIARIZE_TIMEOUT_SECS: u64 = 4 * 60 * 60;

/// Name of the JSON document the tool writes into its output directory.
pub const OUTPUT_FILE: &str = "diarization.json";

/// Runs the diarization tool over `audio_path`, directing output into
/// `scratch_dir`. Returns the path of the JSON result.
///
/// # Errors
/// If the tool is missing, exits non-zero, times out, or writes no output.
pub async fn run(bin: &str, audio_path: &Path, scratch_dir: &Path) -> Result<PathBuf, MediaError> {
    tracing::info!(audio = %audio_path.display(), scratch = %scratch_dir.display(), "running diarization");

    let mut child = Command::new(bin)
        .arg(audio_path)
        .arg("--output-dir")
        .arg(scratch_dir)
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| spawn_error(bin, e))?;

    let status = match timeout(Duration::from_secs(DIARIZE_TIMEOUT_SECS), child.wait()).await {
        Ok(status) => status?,
        Err(_) => {
            tracing::error!("diarization timed out, killing process");
            let _ = child.kill().await;
            return Err(MediaError::Timeout {
                tool: bin.to_string(),
                seconds: DIARIZE_TIMEOUT_SECS,
            });
        }
    };

    if !status.success() {
        return Err(MediaError::ProcessFailed {
            tool: bin.to_string(),
            status,
            stderr: String::new(),
        });
    }

    let result = scratch_dir.join(OUTPUT_FILE);
    if !result.exists() {
        return Err(MediaError::OutputMissing { tool: bin.to_string(), path: result });
    }
    Ok(result)
}
