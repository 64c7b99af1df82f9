//! Event dispatch: inbound events from a transport become replies.
//!
//! Text goes straight to the responder, voice goes through the audio
//! pipeline first, and commands reset or export the user's dialog.

pub mod dispatch;
pub mod state;

pub use dispatch::{handle_event, start_dispatcher};
pub use state::AppState;
