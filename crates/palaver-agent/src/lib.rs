//! Response resolution for one user exchange.
//!
//! A message is first offered to the deterministic [`ResponseRouter`]; on a
//! miss it goes to the completion client with the user's full history. The
//! [`Responder`] ties both tiers to the session store so every accepted
//! exchange lands in history as one user/assistant pair.

pub mod responder;
pub mod router;
pub mod transcript;

pub use responder::{Reply, ReplySource, Responder};
pub use router::ResponseRouter;
pub use transcript::{ExportOutcome, TranscriptExporter};
