//! Rendering a session as a plain-text transcript file for delivery.

use std::future::Future;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use uuid::Uuid;

use palaver_core::config::Config;
use palaver_core::error::{PalaverError, Result};
use palaver_core::session::{Role, Session};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    /// Nothing beyond the seed prompt; no file was produced.
    Empty,
    Delivered { filename: String },
}

pub struct TranscriptExporter {
    dir: PathBuf,
}

impl TranscriptExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.transcript_dir())
    }

    /// `"<Role>: <content>\n\n"` per non-system message, in order.
    pub fn render(session: &Session) -> String {
        session
            .messages()
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| format!("{}: {}\n\n", m.role.label(), m.content))
            .collect()
    }

    /// Name the file is delivered under.
    pub fn delivered_filename(user_id: &str) -> String {
        format!("conversation_{user_id}.txt")
    }

    /// Write the transcript, hand it to `deliver`, then remove it.
    ///
    /// `deliver` receives the on-disk path and the filename to present. The
    /// file is removed whether or not delivery succeeds.
    pub async fn export<F, Fut>(&self, session: &Session, deliver: F) -> Result<ExportOutcome>
    where
        F: FnOnce(PathBuf, String) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        if session.is_seed_only() {
            debug!(user = session.user_id(), "Nothing to export");
            return Ok(ExportOutcome::Empty);
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let file = TempTranscript::new(&self.dir, session.user_id());
        tokio::fs::write(file.path(), Self::render(session)).await?;

        let filename = Self::delivered_filename(session.user_id());
        let delivered = deliver(file.path().to_path_buf(), filename.clone()).await;
        drop(file);

        match delivered {
            Ok(()) => {
                info!(
                    user = session.user_id(),
                    messages = session.len() - 1,
                    %filename,
                    "Transcript exported"
                );
                Ok(ExportOutcome::Delivered { filename })
            }
            Err(e) => Err(PalaverError::Transport(format!(
                "transcript delivery failed: {e:#}"
            ))),
        }
    }
}

/// Transcript file removed on drop.
struct TempTranscript {
    path: PathBuf,
}

impl TempTranscript {
    fn new(dir: &Path, user_id: &str) -> Self {
        let safe: String = user_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        Self {
            path: dir.join(format!("conversation_{safe}_{}.txt", Uuid::new_v4().simple())),
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempTranscript {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove transcript file");
            }
        }
    }
}
