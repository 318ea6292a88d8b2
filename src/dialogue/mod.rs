//! Conversational turn-taking
//!
//! The [`DialogueSystem`] is driven from the input thread with discrete
//! [`InputEvent`]s. Recording, transcription, reply generation and
//! synthesis run on the background [`Scheduler`](crate::scheduler::Scheduler)
//! and write their results back through shared state.

mod event;
mod session;
mod state;
mod system;

pub use event::{DialogueCommand, DialogueView, INSTRUCTIONS, InputEvent};
pub use session::{ConversationState, DEFAULT_PLAYER_POSITION, Message, Role};
pub use state::{TurnState, TurnTracker};
pub use system::DialogueSystem;

/// Spoken when a take captured nothing
pub const NO_AUDIO_MESSAGE: &str =
    "No audio detected. Please hold SPACE to record and release to send.";

/// Spoken when the transcript is blank
pub const NOT_CAUGHT_MESSAGE: &str = "I didn't catch that. Could you repeat?";

/// Spoken in place of a reply when completion fails
pub const APOLOGY_MESSAGE: &str = "I apologize, but I'm having trouble connecting right now.";

/// Shown when synthesis fails
pub const AUDIO_UNAVAILABLE_MESSAGE: &str = "Audio unavailable, please use text input.";

/// Spoken when transcription fails
#[must_use]
pub fn transcription_failed_message(reason: &str) -> String {
    format!("Sorry, I couldn't process your audio: {reason}. Try typing instead.")
}

/// Spoken when the microphone fails
#[must_use]
pub fn audio_input_error_message(reason: &str) -> String {
    format!("Audio input error: {reason}. Please check your microphone.")
}
