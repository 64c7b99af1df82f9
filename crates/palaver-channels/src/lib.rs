//! Transport abstraction.
//!
//! A transport turns a messaging surface into a stream of
//! [`InboundEvent`]s and delivers replies back to users. Platform wiring
//! lives behind the [`Transport`] trait; the console transport is built in.

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::mpsc;

use palaver_core::types::InboundEvent;

pub mod console;

pub use console::ConsoleTransport;

/// Handle to stop a running transport.
pub struct TransportHandle {
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

impl TransportHandle {
    pub fn new(shutdown_tx: tokio::sync::oneshot::Sender<()>) -> Self {
        Self { shutdown_tx }
    }

    pub fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Receiver for inbound events from a transport.
pub type InboundReceiver = mpsc::UnboundedReceiver<InboundEvent>;

/// Sender for inbound events (used by transport implementations).
pub type InboundSender = mpsc::UnboundedSender<InboundEvent>;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Unique transport identifier (e.g. "console").
    fn id(&self) -> &str;

    /// Start receiving. The receiver closes when the transport stops.
    async fn start(&self) -> anyhow::Result<(InboundReceiver, TransportHandle)>;

    async fn send_text(&self, user_id: &str, text: &str) -> anyhow::Result<()>;

    /// Deliver the file at `path` to the user under `filename`.
    async fn send_document(&self, user_id: &str, path: &Path, filename: &str)
    -> anyhow::Result<()>;
}
