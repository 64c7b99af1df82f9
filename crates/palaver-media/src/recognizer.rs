//! Speech recognizer seam and the chunked recognition loop.

use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use palaver_core::config::VoiceConfig;

use crate::wav::PcmStream;

/// A loaded speech model. Creates one recognizer per job.
pub trait SpeechModel: Send + Sync {
    fn name(&self) -> &str;

    fn new_recognizer(&self, sample_rate: u32) -> anyhow::Result<Box<dyn Recognizer>>;
}

/// Incremental recognizer fed with 16-bit mono PCM.
///
/// `finalize` returns the engine's structured result as JSON carrying a
/// `text` field. Recognizers run on blocking threads.
pub trait Recognizer: Send {
    /// Feed one chunk. Returns true when the engine detected an utterance boundary.
    fn feed(&mut self, pcm: &[i16]) -> anyhow::Result<bool>;

    fn finalize(&mut self) -> anyhow::Result<String>;
}

#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    #[error("recognizer setup failed: {0}")]
    Setup(String),
    #[error("reading PCM failed: {0}")]
    Read(String),
    #[error("recognizer rejected audio: {0}")]
    Feed(String),
    #[error("recognizer failed to finalize: {0}")]
    Finalize(String),
    #[error("unparseable recognizer result: {0}")]
    Parse(String),
    #[error("recognition cancelled")]
    Cancelled,
}

/// Feed `stream` to a fresh recognizer in chunks of `chunk_frames` and return
/// the final text. `Ok(None)` means the engine heard no speech.
///
/// Blocking; call from `spawn_blocking`. Checks `cancel` between chunks.
pub fn recognize(
    model: &dyn SpeechModel,
    stream: PcmStream,
    chunk_frames: usize,
    cancel: &CancellationToken,
) -> Result<Option<String>, RecognitionError> {
    let sample_rate = stream.sample_rate();
    let mut recognizer = model
        .new_recognizer(sample_rate)
        .map_err(|e| RecognitionError::Setup(format!("{e:#}")))?;

    let mut chunks = 0usize;
    let mut boundaries = 0usize;
    for chunk in stream.chunks(chunk_frames) {
        if cancel.is_cancelled() {
            return Err(RecognitionError::Cancelled);
        }
        let chunk = chunk.map_err(|e| RecognitionError::Read(e.to_string()))?;
        if recognizer
            .feed(&chunk)
            .map_err(|e| RecognitionError::Feed(format!("{e:#}")))?
        {
            boundaries += 1;
        }
        chunks += 1;
    }

    let raw = recognizer
        .finalize()
        .map_err(|e| RecognitionError::Finalize(format!("{e:#}")))?;
    debug!(model = model.name(), sample_rate, chunks, boundaries, "Recognition finished");
    parse_final_result(&raw)
}

/// Extract the `text` field from a recognizer's final JSON result.
pub fn parse_final_result(raw: &str) -> Result<Option<String>, RecognitionError> {
    #[derive(Deserialize)]
    struct FinalResult {
        #[serde(default)]
        text: Option<String>,
    }

    let result: FinalResult =
        serde_json::from_str(raw).map_err(|e| RecognitionError::Parse(e.to_string()))?;
    Ok(result
        .text
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty()))
}

/// Build the speech model named by `voice.engine`.
///
/// `whisper_api` must be built inside a tokio runtime; its recognizers post
/// audio through the runtime's handle.
pub fn speech_model_from_config(voice: &VoiceConfig) -> anyhow::Result<Arc<dyn SpeechModel>> {
    match voice.engine.as_str() {
        "whisper_api" => {
            let stt = voice
                .stt
                .clone()
                .ok_or_else(|| anyhow::anyhow!("voice.engine is whisper_api but voice.stt is not set"))?;
            let handle = tokio::runtime::Handle::try_current()?;
            Ok(Arc::new(crate::stt::WhisperApiModel::new(
                stt,
                handle,
                std::time::Duration::from_secs(voice.timeout_secs),
            )?))
        }
        "vosk" => vosk_model(voice),
        other => anyhow::bail!("unknown speech engine '{other}' (expected vosk or whisper_api)"),
    }
}

#[cfg(feature = "vosk")]
fn vosk_model(voice: &VoiceConfig) -> anyhow::Result<Arc<dyn SpeechModel>> {
    let path = voice
        .model_path
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("voice.model_path is required for the vosk engine"))?;
    Ok(Arc::new(crate::vosk::VoskModel::load(path)?))
}

#[cfg(not(feature = "vosk"))]
fn vosk_model(_voice: &VoiceConfig) -> anyhow::Result<Arc<dyn SpeechModel>> {
    anyhow::bail!("the vosk engine needs palaver to be built with the `vosk` feature")
}
