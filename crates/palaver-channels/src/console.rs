//! Console transport: one local user on stdin/stdout.
//!
//! Input lines:
//! - `/new`, `/export` (and the other command aliases)
//! - `/voice <path|url>` sends a local audio file or a remote one as a voice message
//! - anything else is a text message

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use palaver_core::types::{Command, InboundEvent, MediaAttachment};

use crate::{InboundReceiver, Transport, TransportHandle};

type Input = Pin<Box<dyn AsyncBufRead + Send>>;
type Output = Pin<Box<dyn AsyncWrite + Send>>;

pub struct ConsoleTransport {
    user_id: String,
    export_dir: PathBuf,
    input: Mutex<Option<Input>>,
    output: Arc<Mutex<Output>>,
}

impl ConsoleTransport {
    /// Console on the process's stdin and stdout.
    pub fn new(user_id: impl Into<String>, export_dir: impl Into<PathBuf>) -> Self {
        Self::with_io(
            user_id,
            export_dir,
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        )
    }

    pub fn with_io(
        user_id: impl Into<String>,
        export_dir: impl Into<PathBuf>,
        input: impl AsyncBufRead + Send + 'static,
        output: impl AsyncWrite + Send + 'static,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            export_dir: export_dir.into(),
            input: Mutex::new(Some(Box::pin(input))),
            output: Arc::new(Mutex::new(Box::pin(output))),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn write(&self, text: &str) -> anyhow::Result<()> {
        write_line(&self.output, text).await
    }
}

async fn write_line(output: &Mutex<Output>, text: &str) -> anyhow::Result<()> {
    let mut out = output.lock().await;
    out.write_all(text.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await?;
    Ok(())
}

/// Turn one input line into an event. `Ok(None)` means nothing to send.
pub async fn read_event(user_id: &str, line: &str) -> anyhow::Result<Option<InboundEvent>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    if head == "/voice" {
        let target = rest.trim();
        if target.is_empty() {
            anyhow::bail!("usage: /voice <path|url>");
        }
        return Ok(Some(InboundEvent::voice(user_id, voice_attachment(target).await?)));
    }

    if line.starts_with('/') {
        return match Command::parse(line) {
            Some(command) => Ok(Some(InboundEvent::command(user_id, command))),
            None => anyhow::bail!("unknown command {line} (try /new, /export, /voice <path|url>)"),
        };
    }

    Ok(Some(InboundEvent::text(user_id, line)))
}

async fn voice_attachment(target: &str) -> anyhow::Result<MediaAttachment> {
    let filename = target
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty())
        .map(String::from);
    let mime = audio_mime(filename.as_deref().unwrap_or_default());

    let mut attachment = if target.starts_with("http://") || target.starts_with("https://") {
        MediaAttachment::from_url(target, mime)
    } else {
        let path = PathBuf::from(shellexpand::tilde(target).as_ref());
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
        MediaAttachment::from_bytes(data, mime)
    };
    attachment.filename = filename;
    Ok(attachment)
}

fn audio_mime(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "ogg" | "oga" | "opus" => "audio/ogg",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        "webm" => "audio/webm",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    fn id(&self) -> &str {
        "console"
    }

    async fn start(&self) -> anyhow::Result<(InboundReceiver, TransportHandle)> {
        let input = self
            .input
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow::anyhow!("console transport already started"))?;

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<InboundEvent>();
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();
        let user_id = self.user_id.clone();
        let output = self.output.clone();

        tokio::spawn(async move {
            info!(user = %user_id, "Console transport started");
            let mut lines = input.lines();
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        info!("Console transport stopped");
                        break;
                    }
                    line = lines.next_line() => {
                        let line = match line {
                            Ok(Some(line)) => line,
                            Ok(None) => {
                                debug!("Console input closed");
                                break;
                            }
                            Err(e) => {
                                warn!(%e, "Console read error");
                                break;
                            }
                        };
                        match read_event(&user_id, &line).await {
                            Ok(Some(event)) => {
                                if inbound_tx.send(event).is_err() {
                                    break;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => {
                                if let Err(e) = write_line(&output, &format!("! {e}")).await {
                                    warn!(%e, "Console write error");
                                }
                            }
                        }
                    }
                }
            }
        });

        Ok((inbound_rx, TransportHandle::new(shutdown_tx)))
    }

    async fn send_text(&self, user_id: &str, text: &str) -> anyhow::Result<()> {
        if user_id != self.user_id {
            warn!(user = user_id, "Console reply addressed to another user");
        }
        self.write(text).await
    }

    async fn send_document(&self, user_id: &str, path: &Path, filename: &str) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.export_dir).await?;
        let dest = self.export_dir.join(filename);
        tokio::fs::copy(path, &dest).await?;
        debug!(user = user_id, dest = %dest.display(), "Document saved");
        self.write(&format!("[document saved to {}]", dest.display()))
            .await
    }
}
