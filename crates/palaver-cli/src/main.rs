use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use palaver_agent::{Responder, ResponseRouter};
use palaver_channels::{ConsoleTransport, Transport};
use palaver_core::config::Config;
use palaver_core::session_store::SessionStore;
use palaver_core::types::MediaAttachment;
use palaver_gateway::{AppState, start_dispatcher};
use palaver_media::recognizer::speech_model_from_config;
use palaver_media::{AudioIngestPipeline, IngestOutcome};
use palaver_providers::CompletionClient;

mod logging;

#[derive(Parser)]
#[command(
    name = "palaver",
    about = "Conversational agent for text and voice messages",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat on the console (`/new`, `/export`, `/voice <path|url>`)
    Run,

    /// Send one message and print the reply
    Ask {
        text: String,

        /// User id the exchange is recorded under
        #[arg(long, default_value = "cli")]
        user: String,
    },

    /// Recognize speech in a local audio file
    Transcribe { file: PathBuf },

    /// Show which pattern rule, if any, answers a message
    Rules { text: String },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (secrets masked)
    Show,
    /// Check the configuration for problems
    Validate,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);
    let config = Config::load(&config_path)?;

    logging::init_logging(&config.logging.clone().unwrap_or_default(), cli.verbose);

    match cli.command {
        Commands::Run => run_console(config).await?,
        Commands::Ask { text, user } => {
            let sessions = Arc::new(SessionStore::new(config.seed_prompt()?));
            let router = Arc::new(ResponseRouter::from_config(&config)?);
            let completion = Arc::new(CompletionClient::from_config(&config));
            let responder = Responder::new(sessions, router, completion);
            let reply = responder.respond(&user, &text).await?;
            tracing::debug!(source = ?reply.source, "Reply resolved");
            println!("{}", reply.text);
        }
        Commands::Transcribe { file } => {
            let data = tokio::fs::read(&file).await?;
            let mut attachment = MediaAttachment::from_bytes(data, "application/octet-stream");
            attachment.filename = file.file_name().map(|n| n.to_string_lossy().into_owned());

            let model = speech_model_from_config(&config.voice())?;
            let pipeline = AudioIngestPipeline::from_config(&config, model);
            match pipeline.ingest("cli", &attachment).await {
                IngestOutcome::RecognizedText(text) => println!("{text}"),
                IngestOutcome::Failure { kind, user_message } => {
                    anyhow::bail!("{user_message} ({kind:?})")
                }
            }
        }
        Commands::Rules { text } => {
            let router = ResponseRouter::from_config(&config)?;
            match router.try_respond(&text) {
                Some(reply) => println!("{reply}"),
                None => println!("(no rule matched; the completion backend would answer)"),
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&masked(&config))?;
                println!("{json}");
            }
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for w in &warnings {
                    println!("warning: {w}");
                }
                for e in &errors {
                    println!("error: {e}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} configuration error(s) in {}", errors.len(), config_path.display());
                }
                println!("Config OK ({})", config_path.display());
            }
            ConfigAction::Init { force } => {
                if config_path.exists() && !force {
                    anyhow::bail!("{} already exists (use --force to overwrite)", config_path.display());
                }
                if let Some(parent) = config_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                Config::default().save(&config_path)?;
                println!("Wrote {}", config_path.display());
            }
        },
    }

    Ok(())
}

async fn run_console(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let transport = Arc::new(ConsoleTransport::new(
        config.console_user_id(),
        config.console_export_dir(),
    ));
    let state = Arc::new(AppState::from_config(config, transport.clone())?);

    let (rx, handle) = transport.start().await?;
    let mut dispatcher = start_dispatcher(state, rx);
    tracing::info!("Palaver ready; type a message, /new, /export or /voice <path|url>");

    tokio::select! {
        result = &mut dispatcher => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            handle.shutdown();
            dispatcher.await?;
        }
    }
    Ok(())
}

fn masked(config: &Config) -> Config {
    const MASK: &str = "********";
    let mut config = config.clone();
    if let Some(completion) = config.completion.as_mut() {
        if completion.api_key.is_some() {
            completion.api_key = Some(MASK.into());
        }
    }
    if let Some(stt) = config.voice.as_mut().and_then(|v| v.stt.as_mut()) {
        if stt.api_key.is_some() {
            stt.api_key = Some(MASK.into());
        }
    }
    config
}
