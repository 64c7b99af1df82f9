//! Offline speech engine backed by a Vosk model directory.

use anyhow::Result;
use tracing::info;
use vosk::{DecodingState, Model};

use crate::recognizer::{Recognizer, SpeechModel};

pub struct VoskModel {
    model: Model,
}

impl VoskModel {
    /// Load the model once; it is shared by every job.
    pub fn load(path: &str) -> Result<Self> {
        let model = Model::new(path)
            .ok_or_else(|| anyhow::anyhow!("failed to load Vosk model from {path}"))?;
        info!(path, "Vosk model loaded");
        Ok(Self { model })
    }
}

impl SpeechModel for VoskModel {
    fn name(&self) -> &str {
        "vosk"
    }

    fn new_recognizer(&self, sample_rate: u32) -> Result<Box<dyn Recognizer>> {
        let recognizer = vosk::Recognizer::new(&self.model, sample_rate as f32)
            .ok_or_else(|| anyhow::anyhow!("failed to create Vosk recognizer at {sample_rate} Hz"))?;
        Ok(Box::new(VoskRecognizer { inner: recognizer }))
    }
}

struct VoskRecognizer {
    inner: vosk::Recognizer,
}

impl Recognizer for VoskRecognizer {
    fn feed(&mut self, pcm: &[i16]) -> Result<bool> {
        let state = self
            .inner
            .accept_waveform(pcm)
            .map_err(|e| anyhow::anyhow!("{e:?}"))?;
        Ok(matches!(state, DecodingState::Finalized))
    }

    fn finalize(&mut self) -> Result<String> {
        let text = self
            .inner
            .final_result()
            .single()
            .map(|r| r.text.to_string())
            .unwrap_or_default();
        Ok(serde_json::json!({ "text": text }).to_string())
    }
}
