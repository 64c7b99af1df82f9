//! Per-job temp file ownership.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

/// The two transient files of one voice job: the downloaded payload and the
/// transcoded PCM WAV.
///
/// Names embed the user id and a random job id so concurrent jobs, from the
/// same user or not, never collide. Both files are removed when the job is
/// dropped, whichever stage it stopped at.
#[derive(Debug)]
pub struct AudioJob {
    id: Uuid,
    raw_path: PathBuf,
    pcm_path: PathBuf,
}

impl AudioJob {
    pub fn new(work_dir: &Path, user_id: &str, raw_extension: &str) -> Self {
        let id = Uuid::new_v4();
        let stem = format!("{}_voice_{}", file_safe(user_id), id.simple());
        Self {
            id,
            raw_path: work_dir.join(format!("{stem}.{raw_extension}")),
            pcm_path: work_dir.join(format!("{stem}.wav")),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn raw_path(&self) -> &Path {
        &self.raw_path
    }

    pub fn pcm_path(&self) -> &Path {
        &self.pcm_path
    }
}

impl Drop for AudioJob {
    fn drop(&mut self) {
        for path in [&self.raw_path, &self.pcm_path] {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(job = %self.id, path = %path.display(), "Removed temp audio file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(job = %self.id, path = %path.display(), error = %e, "Failed to remove temp audio file")
                }
            }
        }
    }
}

fn file_safe(user_id: &str) -> String {
    let cleaned: String = user_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "anon".into()
    } else {
        cleaned
    }
}
