//! Office Dialogue - full-duplex voice conversations with office NPCs
//!
//! This library provides the audio and turn-taking core behind the NPCs:
//! - Microphone capture and streaming playback
//! - The listening / transcribing / speaking state machine
//! - Persona and transcript management
//! - HTTP clients for transcription, completion and synthesis
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              Input thread (frame loop)               │
//! │      InputEvent  →  DialogueSystem  →  DialogueView  │
//! └────────────────────┬────────────────────────────────┘
//!                      │ submit
//! ┌────────────────────▼────────────────────────────────┐
//! │                    Scheduler                         │
//! │   Capture  →  Finalize  →  Reply  →  Speak           │
//! └──────────┬─────────────────────────────┬────────────┘
//!            │                             │ enqueue
//! ┌──────────▼──────────┐      ┌───────────▼────────────┐
//! │  STT / LLM / TTS    │      │  PlaybackQueue → cpal  │
//! └─────────────────────┘      └────────────────────────┘
//! ```

pub mod config;
pub mod dialogue;
pub mod error;
pub mod llm;
pub mod persona;
pub mod scheduler;
pub mod services;
pub mod voice;

pub use config::Config;
pub use dialogue::{DialogueCommand, DialogueSystem, DialogueView, InputEvent, TurnState};
pub use error::{Error, Result};
pub use persona::{Persona, PersonaTable};
pub use scheduler::Scheduler;
pub use services::{
    Services, SpeechSynthesisService, TextCompletionService, TranscriptionService,
};
