//! Remote speech-to-text through an OpenAI-compatible transcription endpoint.
//!
//! The recognizer buffers the PCM it is fed and uploads it as a WAV when
//! finalized, returning the transcript in the same `{"text": ...}` shape an
//! offline engine produces.

use std::io::Cursor;
use std::time::Duration;

use anyhow::Result;
use tokio::runtime::Handle;
use tracing::debug;

use palaver_core::config::SttConfig;

use crate::recognizer::{Recognizer, SpeechModel};

/// Wrap raw 16-bit PCM in a WAV container.
pub fn pcm_to_wav(pcm: &[i16], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + pcm.len() * 2));
    let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
    for &sample in pcm {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(cursor.into_inner())
}

/// Transcription endpoint for the configured provider.
pub fn provider_url(config: &SttConfig) -> String {
    if let Some(base) = config.base_url.as_deref() {
        return format!("{}/v1/audio/transcriptions", base.trim_end_matches('/'));
    }
    match config.provider.as_str() {
        "openai" => "https://api.openai.com/v1/audio/transcriptions".into(),
        _ => "https://api.groq.com/openai/v1/audio/transcriptions".into(),
    }
}

/// Upload mono 16-bit PCM and return the transcript text.
pub async fn transcribe_pcm(
    client: &reqwest::Client,
    config: &SttConfig,
    api_key: &str,
    pcm: &[i16],
    sample_rate: u32,
) -> Result<String> {
    let wav_data = pcm_to_wav(pcm, sample_rate, 1)?;
    let url = provider_url(config);
    let model = config.model.as_deref().unwrap_or("whisper-large-v3-turbo");

    debug!(%url, model, wav_bytes = wav_data.len(), "Sending audio for transcription");

    let part = reqwest::multipart::Part::bytes(wav_data)
        .file_name("audio.wav")
        .mime_str("audio/wav")?;

    let mut form = reqwest::multipart::Form::new()
        .text("model", model.to_string())
        .text("response_format", "text")
        .part("file", part);
    if let Some(language) = &config.language {
        form = form.text("language", language.clone());
    }

    let resp = client
        .post(&url)
        .header("Authorization", format!("Bearer {api_key}"))
        .multipart(form)
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("Transcription API error {status}: {body}");
    }

    Ok(resp.text().await?.trim().to_string())
}

/// `whisper_api` speech engine.
pub struct WhisperApiModel {
    config: SttConfig,
    api_key: String,
    client: reqwest::Client,
    handle: Handle,
}

impl WhisperApiModel {
    /// Each upload is abandoned after `timeout`.
    pub fn new(config: SttConfig, handle: Handle, timeout: Duration) -> Result<Self> {
        let api_key = config
            .resolve_api_key()
            .ok_or_else(|| anyhow::anyhow!("No transcription API key configured"))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            config,
            api_key,
            client,
            handle,
        })
    }
}

impl SpeechModel for WhisperApiModel {
    fn name(&self) -> &str {
        "whisper_api"
    }

    fn new_recognizer(&self, sample_rate: u32) -> Result<Box<dyn Recognizer>> {
        Ok(Box::new(WhisperApiRecognizer {
            config: self.config.clone(),
            api_key: self.api_key.clone(),
            client: self.client.clone(),
            handle: self.handle.clone(),
            sample_rate,
            pcm: Vec::new(),
        }))
    }
}

struct WhisperApiRecognizer {
    config: SttConfig,
    api_key: String,
    client: reqwest::Client,
    handle: Handle,
    sample_rate: u32,
    pcm: Vec<i16>,
}

impl Recognizer for WhisperApiRecognizer {
    fn feed(&mut self, pcm: &[i16]) -> Result<bool> {
        self.pcm.extend_from_slice(pcm);
        Ok(false)
    }

    fn finalize(&mut self) -> Result<String> {
        let pcm = std::mem::take(&mut self.pcm);
        let text = self.handle.block_on(transcribe_pcm(
            &self.client,
            &self.config,
            &self.api_key,
            &pcm,
            self.sample_rate,
        ))?;
        Ok(serde_json::json!({ "text": text }).to_string())
    }
}
