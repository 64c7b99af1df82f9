//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Seed prompt used when neither `session.seed_prompt` nor a seed file is configured.
pub const DEFAULT_SEED_PROMPT: &str = "You are a friendly and helpful assistant. \
Answer concisely and in the language the user writes in.";

/// Reply returned when every completion attempt came back contaminated.
pub const DEFAULT_DEGRADED_MESSAGE: &str =
    "Sorry, the assistant is temporarily unavailable. Please try again in a moment.";

/// Sample rates a recognizer can be bound to.
pub const SUPPORTED_SAMPLE_RATES: [u32; 5] = [8000, 16000, 32000, 44100, 48000];

/// Top-level Palaver configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion: Option<CompletionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<RulesConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<TranscriptConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch: Option<DispatchConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub console: Option<ConsoleConfig>,
}

/// Completion backend and its resilience policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Base URL of an OpenAI-compatible API (default: `https://api.openai.com`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Per-request timeout in seconds (default: 120).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,

    /// Substrings that mark a response as served by the wrong upstream model.
    #[serde(default = "default_contamination_markers")]
    pub contamination_markers: Vec<String>,

    /// Total attempts per completion before giving up (default: 10).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub backoff: BackoffConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded_message: Option<String>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            api_key_env: None,
            model: None,
            temperature: None,
            max_tokens: None,
            request_timeout_secs: None,
            contamination_markers: default_contamination_markers(),
            max_attempts: default_max_attempts(),
            backoff: BackoffConfig::default(),
            degraded_message: None,
        }
    }
}

impl CompletionConfig {
    /// Resolve the API key: check `api_key` field first, then `api_key_env` environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

fn default_contamination_markers() -> Vec<String> {
    vec!["BLACKBOX.AI".into()]
}

fn default_max_attempts() -> u32 {
    10
}

/// Delay between contaminated attempts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffConfig {
    /// Retry immediately.
    #[default]
    None,
    Fixed {
        delay_ms: u64,
    },
    Exponential {
        initial_ms: u64,
        max_ms: u64,
        #[serde(default)]
        jitter: bool,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Inline seed prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed_prompt: Option<String>,

    /// File holding the seed prompt; used when `seed_prompt` is unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed_prompt_file: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Path to the YAML rule asset. No path means an empty rule set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory for transient audio files (default: `~/.palaver/voice`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,

    /// Transcoder executable (default: `ffmpeg`).
    #[serde(default = "default_transcoder_program")]
    pub transcoder_program: String,

    /// Transcoder arguments; `{input}` and `{output}` are substituted.
    #[serde(default = "default_transcoder_args")]
    pub transcoder_args: Vec<String>,

    /// Frames per recognizer feed (default: 4000).
    #[serde(default = "default_chunk_frames")]
    pub chunk_frames: usize,

    /// Upper bound for one voice job, all stages included (default: 60).
    #[serde(default = "default_voice_timeout")]
    pub timeout_secs: u64,

    /// Speech engine: "vosk" (offline, needs the `vosk` feature) or "whisper_api".
    #[serde(default = "default_speech_engine")]
    pub engine: String,

    /// Vosk model directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt: Option<SttConfig>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            work_dir: None,
            transcoder_program: default_transcoder_program(),
            transcoder_args: default_transcoder_args(),
            chunk_frames: default_chunk_frames(),
            timeout_secs: default_voice_timeout(),
            engine: default_speech_engine(),
            model_path: None,
            stt: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_transcoder_program() -> String {
    "ffmpeg".into()
}

fn default_transcoder_args() -> Vec<String> {
    [
        "-y", "-loglevel", "error", "-i", "{input}", "-ar", "16000", "-ac", "1", "-acodec",
        "pcm_s16le", "-f", "wav", "{output}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_chunk_frames() -> usize {
    4000
}

fn default_voice_timeout() -> u64 {
    60
}

fn default_speech_engine() -> String {
    "vosk".into()
}

/// Remote speech-to-text endpoint for the `whisper_api` engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    /// Provider: "groq" or "openai" (default: "groq").
    #[serde(default = "default_stt_provider")]
    pub provider: String,

    /// Overrides the provider's base URL (OpenAI-compatible `/v1/audio/transcriptions`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Model name (e.g. "whisper-large-v3-turbo").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

fn default_stt_provider() -> String {
    "groq".into()
}

impl SttConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptConfig {
    /// Directory for transient export files (default: system temp dir).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum inbound events handled concurrently (default: 64).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "palaver_media=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
            output: default_log_output(),
        }
    }
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Local console transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// User id the console speaks as (default: "local").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Where delivered documents are copied (default: current directory).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_dir: Option<String>,
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    static ENV_VAR: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
        regex::Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern")
    });
    ENV_VAR.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::PalaverError::Io)?;

        // Substitute ${ENV_VAR} references before parsing
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::PalaverError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Resolve the default config file path.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn completion(&self) -> CompletionConfig {
        self.completion.clone().unwrap_or_default()
    }

    pub fn voice(&self) -> VoiceConfig {
        self.voice.clone().unwrap_or_default()
    }

    /// Completion model name.
    pub fn model(&self) -> String {
        self.completion
            .as_ref()
            .and_then(|c| c.model.clone())
            .unwrap_or_else(|| "gpt-4o-mini".to_string())
    }

    pub fn degraded_message(&self) -> String {
        self.completion
            .as_ref()
            .and_then(|c| c.degraded_message.clone())
            .unwrap_or_else(|| DEFAULT_DEGRADED_MESSAGE.to_string())
    }

    /// The seed prompt: inline value, then seed file contents, then the default.
    pub fn seed_prompt(&self) -> crate::error::Result<String> {
        let session = self.session.as_ref();
        if let Some(prompt) = session.and_then(|s| s.seed_prompt.as_ref()) {
            return Ok(prompt.clone());
        }
        if let Some(file) = session.and_then(|s| s.seed_prompt_file.as_ref()) {
            let path = expand_path(file);
            let text = std::fs::read_to_string(&path).map_err(|e| {
                crate::error::PalaverError::Config(format!(
                    "cannot read seed prompt file {}: {e}",
                    path.display()
                ))
            })?;
            return Ok(text.trim_end().to_string());
        }
        Ok(DEFAULT_SEED_PROMPT.to_string())
    }

    pub fn rules_path(&self) -> Option<PathBuf> {
        self.rules
            .as_ref()
            .and_then(|r| r.path.as_deref())
            .map(expand_path)
    }

    pub fn voice_work_dir(&self) -> PathBuf {
        self.voice
            .as_ref()
            .and_then(|v| v.work_dir.as_deref())
            .map(expand_path)
            .unwrap_or_else(|| data_dir().join("voice"))
    }

    pub fn transcript_dir(&self) -> PathBuf {
        self.transcript
            .as_ref()
            .and_then(|t| t.dir.as_deref())
            .map(expand_path)
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn max_concurrent_dispatch(&self) -> usize {
        self.dispatch
            .as_ref()
            .and_then(|d| d.max_concurrent)
            .unwrap_or(64)
    }

    pub fn console_user_id(&self) -> String {
        self.console
            .as_ref()
            .and_then(|c| c.user_id.clone())
            .unwrap_or_else(|| "local".to_string())
    }

    pub fn console_export_dir(&self) -> PathBuf {
        self.console
            .as_ref()
            .and_then(|c| c.export_dir.as_deref())
            .map(expand_path)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let completion = self.completion();
        if completion.resolve_api_key().is_none() {
            warnings.push("Completion backend has no API key configured".to_string());
        }
        if completion.max_attempts == 0 {
            errors.push("completion.max_attempts must be at least 1".to_string());
        }
        if completion.contamination_markers.iter().any(|m| m.is_empty()) {
            errors.push("completion.contamination_markers must not contain empty strings".to_string());
        }
        let degraded = self.degraded_message().to_lowercase();
        if let Some(marker) = completion
            .contamination_markers
            .iter()
            .find(|m| !m.is_empty() && degraded.contains(&m.to_lowercase()))
        {
            errors.push(format!(
                "completion.degraded_message contains contamination marker {marker:?}"
            ));
        }

        if let Some(path) = self.rules_path() {
            if !path.exists() {
                errors.push(format!("Rule file not found: {}", path.display()));
            }
        }

        if let Some(file) = self
            .session
            .as_ref()
            .and_then(|s| s.seed_prompt_file.as_deref())
        {
            if !expand_path(file).exists() {
                errors.push(format!("Seed prompt file not found: {file}"));
            }
        }

        let voice = self.voice();
        if voice.enabled {
            if voice.timeout_secs == 0 {
                errors.push("voice.timeout_secs cannot be 0".to_string());
            }
            if voice.chunk_frames == 0 {
                errors.push("voice.chunk_frames cannot be 0".to_string());
            }
            let has_input = voice.transcoder_args.iter().any(|a| a.contains("{input}"));
            let has_output = voice.transcoder_args.iter().any(|a| a.contains("{output}"));
            if !has_input || !has_output {
                errors.push(
                    "voice.transcoder_args must contain {input} and {output} placeholders"
                        .to_string(),
                );
            }
            match voice.engine.as_str() {
                "vosk" => {
                    if voice.model_path.is_none() {
                        warnings.push(
                            "voice.engine is \"vosk\" but voice.model_path is not set".to_string(),
                        );
                    }
                }
                "whisper_api" => {
                    if voice.stt.as_ref().and_then(|s| s.resolve_api_key()).is_none() {
                        warnings.push("voice.stt has no API key configured".to_string());
                    }
                }
                other => errors.push(format!("Unknown voice.engine \"{other}\"")),
            }
        }

        (warnings, errors)
    }

    /// Save config to a file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Base directory for Palaver data: `~/.palaver/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".palaver")
}
