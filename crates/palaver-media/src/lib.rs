//! Voice ingestion: turns a voice message into recognized text.
//!
//! Stages run in order and stop at the first failure: download the payload,
//! transcode it to PCM WAV, validate the stream format, then feed it in fixed
//! chunks to a speech recognizer. Every temp file a job creates is removed on
//! every exit path.

pub mod download;
pub mod job;
pub mod pipeline;
pub mod recognizer;
pub mod stt;
pub mod transcode;
pub mod wav;

#[cfg(feature = "vosk")]
pub mod vosk;

pub use pipeline::{AudioIngestPipeline, FailureKind, IngestOutcome};
pub use recognizer::{Recognizer, SpeechModel};
