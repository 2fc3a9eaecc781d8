//! Per-job scratch directory for the diarization container. The directory is
//! made world-writable because the tool runs as a different container user
//! than this worker; it is unique per job and removed on every exit path.

use std::path::{Path, PathBuf};

use chrono::Utc;
use cv_storage::sanitize_meeting_id;

pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn create(run_root: &Path, meeting_id: &str) -> std::io::Result<Self> {
        let name = format!(
            "diarize_{}_{}",
            sanitize_meeting_id(meeting_id),
            Utc::now().timestamp_millis()
        );
        let path = run_root.join(name);
        std::fs::create_dir_all(&path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // Explicit mode, not umask-derived: the container user must write here.
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o777))?;
        }

        Ok(ScratchDir { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove scratch dir");
        }
    }
}
