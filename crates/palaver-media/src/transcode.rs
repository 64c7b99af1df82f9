//! Conversion of arbitrary voice payloads to PCM WAV via an external program.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use palaver_core::config::VoiceConfig;

/// Converts the file at `input` to a 16-bit mono PCM WAV at `output`.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Runs an external transcoder (ffmpeg by default).
///
/// `{input}` and `{output}` in the argument template are replaced by the job's
/// paths. The child is killed if the surrounding future is dropped, so a job
/// timeout never leaves a stray process behind.
#[derive(Debug, Clone)]
pub struct CommandTranscoder {
    program: String,
    args: Vec<String>,
}

impl CommandTranscoder {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &VoiceConfig) -> Self {
        Self::new(config.transcoder_program.clone(), config.transcoder_args.clone())
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn render_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace("{input}", &input).replace("{output}", &output))
            .collect()
    }
}

#[async_trait]
impl Transcoder for CommandTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<()> {
        let args = self.render_args(input, output);
        debug!(program = %self.program, ?args, "Running transcoder");

        let result = tokio::process::Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to start {}", self.program))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            anyhow::bail!(
                "{} exited with {}: {}",
                self.program,
                result.status,
                tail(stderr.trim(), 500)
            );
        }

        if !output.exists() {
            anyhow::bail!("{} produced no output file", self.program);
        }
        Ok(())
    }
}

fn tail(s: &str, max_chars: usize) -> &str {
    let count = s.chars().count();
    if count <= max_chars {
        return s;
    }
    let skip = count - max_chars;
    match s.char_indices().nth(skip) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}
