//! Invocations of the external tools the pipeline shells out to: the video
//! downloader, ffmpeg for audio extraction, and the diarization tool. Each
//! wrapper owns argument construction and exit-status handling; the tools'
//! own timeouts and internals stay theirs.

pub mod audio_extraction;
pub mod diarization;
pub mod video_download;

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("{0} executable not found")]
    ToolNotFound(String),

    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{tool} exited with {status}: {stderr}")]
    ProcessFailed {
        tool: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("{tool} produced no output at {path}")]
    OutputMissing { tool: String, path: std::path::PathBuf },

    #[error("{tool} timed out after {seconds} seconds")]
    Timeout { tool: String, seconds: u64 },
}

pub(crate) fn spawn_error(tool: &str, e: std::io::Error) -> MediaError {
    if e.kind() == std::io::ErrorKind::NotFound {
        MediaError::ToolNotFound(tool.to_string())
    } else {
        MediaError::Spawn { tool: tool.to_string(), source: e }
    }
}

/// Keep only the tail of a stderr capture so failure messages stay loggable.
pub(crate) fn stderr_tail(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    match trimmed.char_indices().rev().nth(499) {
        Some((idx, _)) => trimmed[idx..].to_string(),
        None => trimmed.to_string(),
    }
}
