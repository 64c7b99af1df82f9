//! Routes inbound events to dispatch units.
//!
//! Every event runs in its own task. A failing or panicking unit is answered
//! with an apology and never takes the loop or other users down with it.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use palaver_agent::ExportOutcome;
use palaver_channels::InboundReceiver;
use palaver_core::types::{Command, InboundEvent, InboundPayload};
use palaver_media::IngestOutcome;

use crate::state::AppState;

pub const APOLOGY: &str =
    "Sorry, something went wrong while handling your message. Please try again.";
pub const RESET_CONFIRMATION: &str =
    "New dialog started. Write to me and I'll answer with the new topic in mind!";
pub const HISTORY_EMPTY: &str = "The dialog history is empty.";
pub const VOICE_UNAVAILABLE: &str = "Sorry, voice messages are not supported right now.";

/// Consume `rx` until it closes, then wait for in-flight units to finish.
pub fn start_dispatcher(state: Arc<AppState>, mut rx: InboundReceiver) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let max_units = state.config.max_concurrent_dispatch().max(1);
        let limit = Arc::new(Semaphore::new(max_units));
        info!(max_units, "Dispatcher started");

        while let Some(event) = rx.recv().await {
            let Ok(permit) = limit.clone().acquire_owned().await else {
                break;
            };
            let state = state.clone();
            tokio::spawn(async move {
                run_unit(state, event).await;
                drop(permit);
            });
        }

        let _ = limit.acquire_many(max_units as u32).await;
        info!("Dispatcher stopped");
    })
}

async fn run_unit(state: Arc<AppState>, event: InboundEvent) {
    let user_id = event.user_id.clone();
    let modality = event.modality();
    debug!(user = %user_id, ?modality, "Dispatching event");

    let unit_state = state.clone();
    let failure = match tokio::spawn(async move { handle_event(&unit_state, event).await }).await {
        Ok(Ok(())) => return,
        Ok(Err(e)) => format!("{e:#}"),
        Err(e) if e.is_panic() => "dispatch unit panicked".to_string(),
        Err(e) => e.to_string(),
    };

    error!(user = %user_id, ?modality, error = %failure, "Failed to handle inbound event");
    if let Err(e) = state.transport.send_text(&user_id, APOLOGY).await {
        error!(user = %user_id, %e, "Failed to send apology");
    }
}

/// Handle one event end to end, replies included.
pub async fn handle_event(state: &Arc<AppState>, event: InboundEvent) -> anyhow::Result<()> {
    let user_id = event.user_id;
    match event.payload {
        InboundPayload::Text { text } => reply_to_text(state, &user_id, &text).await,
        InboundPayload::Voice { attachment } => {
            let Some(pipeline) = &state.voice else {
                return state.transport.send_text(&user_id, VOICE_UNAVAILABLE).await;
            };
            match pipeline.ingest(&user_id, &attachment).await {
                IngestOutcome::RecognizedText(text) => reply_to_text(state, &user_id, &text).await,
                IngestOutcome::Failure { kind, user_message } => {
                    info!(user = %user_id, ?kind, "Voice message not usable");
                    state.transport.send_text(&user_id, &user_message).await
                }
            }
        }
        InboundPayload::Command {
            command: Command::Reset,
        } => {
            state.responder.reset(&user_id).await;
            state.transport.send_text(&user_id, RESET_CONFIRMATION).await
        }
        InboundPayload::Command {
            command: Command::Export,
        } => export(state, &user_id).await,
    }
}

async fn reply_to_text(state: &Arc<AppState>, user_id: &str, text: &str) -> anyhow::Result<()> {
    let reply = state.responder.respond(user_id, text).await?;
    state.transport.send_text(user_id, &reply.text).await
}

async fn export(state: &Arc<AppState>, user_id: &str) -> anyhow::Result<()> {
    let Some(session) = state.sessions.snapshot(user_id).await else {
        return state.transport.send_text(user_id, HISTORY_EMPTY).await;
    };

    let transport = state.transport.clone();
    let recipient = user_id.to_string();
    let outcome = state
        .exporter
        .export(&session, move |path, filename| async move {
            transport.send_document(&recipient, &path, &filename).await
        })
        .await?;

    match outcome {
        ExportOutcome::Empty => state.transport.send_text(user_id, HISTORY_EMPTY).await,
        ExportOutcome::Delivered { .. } => Ok(()),
    }
}
