//! Voice job orchestration: download, transcode, validate, recognize.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use palaver_core::config::Config;
use palaver_core::types::MediaAttachment;

use crate::download::{Downloader, HttpDownloader};
use crate::job::AudioJob;
use crate::recognizer::{self, RecognitionError, SpeechModel};
use crate::transcode::{CommandTranscoder, Transcoder};
use crate::wav::{self, FormatViolation};

pub const DEFAULT_CHUNK_FRAMES: usize = 4000;
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(60);

/// Stage at which a voice job stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    Transcode,
    FormatValidation,
    Recognition,
    NotRecognized,
    Timeout,
}

impl FailureKind {
    /// Failures worth retrying by resending the same message.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Transport | Self::Timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    RecognizedText(String),
    Failure {
        kind: FailureKind,
        user_message: String,
    },
}

impl IngestOutcome {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::RecognizedText(text) => Some(text),
            Self::Failure { .. } => None,
        }
    }

    fn failure(kind: FailureKind, user_message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            user_message: user_message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum StageError {
    #[error("download failed: {0:#}")]
    Download(anyhow::Error),
    #[error("transcode failed: {0:#}")]
    Transcode(anyhow::Error),
    #[error(transparent)]
    Format(#[from] FormatViolation),
    #[error(transparent)]
    Recognition(#[from] RecognitionError),
    #[error("no speech recognized")]
    NotRecognized,
}

impl StageError {
    fn into_outcome(self) -> IngestOutcome {
        match self {
            Self::Download(_) => IngestOutcome::failure(
                FailureKind::Transport,
                "Sorry, I couldn't download your voice message. Please try sending it again.",
            ),
            Self::Transcode(_) => IngestOutcome::failure(
                FailureKind::Transcode,
                "Sorry, I couldn't convert your voice message. The audio may be damaged.",
            ),
            Self::Format(violation) => IngestOutcome::failure(
                FailureKind::FormatValidation,
                format!("Sorry, your voice message has an unsupported audio format ({violation})."),
            ),
            Self::Recognition(_) => IngestOutcome::failure(
                FailureKind::Recognition,
                "Sorry, something went wrong while recognizing your voice message.",
            ),
            Self::NotRecognized => IngestOutcome::failure(
                FailureKind::NotRecognized,
                "Sorry, I couldn't make out any speech in your voice message. Could you repeat it or type it?",
            ),
        }
    }
}

/// Turns voice attachments into text.
///
/// Each `ingest` call is an independent job with its own temp files; any
/// number may run concurrently. A job either yields recognized text or a
/// typed failure carrying a message fit for the user, never both.
pub struct AudioIngestPipeline {
    downloader: Arc<dyn Downloader>,
    transcoder: Arc<dyn Transcoder>,
    model: Arc<dyn SpeechModel>,
    work_dir: PathBuf,
    chunk_frames: usize,
    timeout: Duration,
}

impl AudioIngestPipeline {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        transcoder: Arc<dyn Transcoder>,
        model: Arc<dyn SpeechModel>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            downloader,
            transcoder,
            model,
            work_dir: work_dir.into(),
            chunk_frames: DEFAULT_CHUNK_FRAMES,
            timeout: DEFAULT_JOB_TIMEOUT,
        }
    }

    /// HTTP downloader and command transcoder configured from `voice`.
    pub fn from_config(config: &Config, model: Arc<dyn SpeechModel>) -> Self {
        let voice = config.voice();
        let timeout = Duration::from_secs(voice.timeout_secs.max(1));
        Self::new(
            Arc::new(HttpDownloader::new(timeout)),
            Arc::new(CommandTranscoder::from_config(&voice)),
            model,
            config.voice_work_dir(),
        )
        .with_chunk_frames(voice.chunk_frames)
        .with_timeout(timeout)
    }

    pub fn with_chunk_frames(mut self, frames: usize) -> Self {
        self.chunk_frames = frames.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Run one voice job to completion. Temp files are gone when this returns.
    pub async fn ingest(&self, user_id: &str, attachment: &MediaAttachment) -> IngestOutcome {
        let started = Instant::now();
        if let Err(e) = tokio::fs::create_dir_all(&self.work_dir).await {
            warn!(user = user_id, dir = %self.work_dir.display(), error = %e, "Voice work dir unavailable");
            return StageError::Download(e.into()).into_outcome();
        }

        let job = AudioJob::new(&self.work_dir, user_id, attachment.extension());
        let cancel = CancellationToken::new();

        let outcome = match tokio::time::timeout(
            self.timeout,
            self.run_stages(&job, attachment, cancel.clone()),
        )
        .await
        {
            Ok(Ok(text)) => IngestOutcome::RecognizedText(text),
            Ok(Err(e)) => {
                warn!(user = user_id, job = %job.id(), error = %e, "Voice job failed");
                e.into_outcome()
            }
            Err(_) => {
                cancel.cancel();
                warn!(
                    user = user_id,
                    job = %job.id(),
                    timeout_secs = self.timeout.as_secs_f64(),
                    "Voice job timed out"
                );
                IngestOutcome::failure(
                    FailureKind::Timeout,
                    "Sorry, processing your voice message took too long. Please try again.",
                )
            }
        };

        let job_id = job.id();
        drop(job);

        info!(
            user = user_id,
            job = %job_id,
            ok = outcome.text().is_some(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Voice job finished"
        );
        outcome
    }

    async fn run_stages(
        &self,
        job: &AudioJob,
        attachment: &MediaAttachment,
        cancel: CancellationToken,
    ) -> Result<String, StageError> {
        let bytes = self
            .downloader
            .download(attachment, job.raw_path())
            .await
            .map_err(StageError::Download)?;

        self.transcoder
            .transcode(job.raw_path(), job.pcm_path())
            .await
            .map_err(StageError::Transcode)?;

        let model = self.model.clone();
        let pcm_path = job.pcm_path().to_path_buf();
        let chunk_frames = self.chunk_frames;
        let text = tokio::task::spawn_blocking(move || -> Result<Option<String>, StageError> {
            let stream = wav::open_pcm(&pcm_path)?;
            Ok(recognizer::recognize(
                model.as_ref(),
                stream,
                chunk_frames,
                &cancel,
            )?)
        })
        .await
        .map_err(|e| RecognitionError::Setup(format!("recognition task failed: {e}")))??;

        let text = text.ok_or(StageError::NotRecognized)?;
        info!(job = %job.id(), payload_bytes = bytes, chars = text.len(), "Voice recognized");
        Ok(text)
    }
}
