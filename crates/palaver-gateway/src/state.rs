//! Shared application state.

use std::sync::Arc;

use tracing::{info, warn};

use palaver_agent::{Responder, ResponseRouter, TranscriptExporter};
use palaver_channels::Transport;
use palaver_core::config::Config;
use palaver_core::session_store::SessionStore;
use palaver_media::AudioIngestPipeline;
use palaver_media::recognizer::speech_model_from_config;
use palaver_providers::CompletionClient;

/// Everything a dispatch unit needs, shared across all units.
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionStore>,
    pub responder: Arc<Responder>,
    pub exporter: Arc<TranscriptExporter>,
    /// `None` when voice handling is disabled or its engine failed to load.
    pub voice: Option<Arc<AudioIngestPipeline>>,
    pub transport: Arc<dyn Transport>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        responder: Arc<Responder>,
        exporter: Arc<TranscriptExporter>,
        voice: Option<Arc<AudioIngestPipeline>>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            sessions: responder.sessions().clone(),
            config,
            responder,
            exporter,
            voice,
            transport,
        }
    }

    /// Wire the production components from config.
    ///
    /// Bad rules or an unreadable seed prompt are fatal. A speech engine that
    /// cannot be loaded only disables voice messages.
    pub fn from_config(config: Arc<Config>, transport: Arc<dyn Transport>) -> anyhow::Result<Self> {
        let sessions = Arc::new(SessionStore::new(config.seed_prompt()?));
        let router = Arc::new(ResponseRouter::from_config(&config)?);
        let completion = Arc::new(CompletionClient::from_config(&config));
        let responder = Arc::new(Responder::new(sessions, router, completion));
        let exporter = Arc::new(TranscriptExporter::from_config(&config));
        let voice = build_voice(&config);

        info!(
            model = %config.model(),
            voice = voice.is_some(),
            transport = transport.id(),
            "Application state ready"
        );
        Ok(Self::new(config, responder, exporter, voice, transport))
    }
}

fn build_voice(config: &Config) -> Option<Arc<AudioIngestPipeline>> {
    let voice = config.voice();
    if !voice.enabled {
        return None;
    }
    match speech_model_from_config(&voice) {
        Ok(model) => Some(Arc::new(AudioIngestPipeline::from_config(config, model))),
        Err(e) => {
            warn!(engine = %voice.engine, error = %e, "Speech engine unavailable, voice messages disabled");
            None
        }
    }
}
