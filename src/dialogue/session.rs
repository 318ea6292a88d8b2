//! Per-conversation context

use serde::{Deserialize, Serialize};

use crate::persona::Persona;

/// Where the player stands when no position is given
pub const DEFAULT_PLAYER_POSITION: [f32; 3] = [0.0, 0.5, 0.0];

/// Speaker of a transcript turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One transcript turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a turn
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// State of the active conversation
#[derive(Debug, Clone)]
pub struct ConversationState {
    persona_id: String,
    voice: String,
    history: Vec<Message>,
    player_position: [f32; 3],
}

impl ConversationState {
    /// Seed a transcript with the persona's system prompt and greeting
    #[must_use]
    pub fn new(persona: &Persona, player_position: Option<[f32; 3]>) -> Self {
        Self {
            persona_id: persona.id.clone(),
            voice: persona.voice.clone(),
            history: vec![
                Message::new(Role::System, persona.system_prompt.clone()),
                Message::new(Role::Assistant, persona.greeting.clone()),
            ],
            player_position: player_position.unwrap_or(DEFAULT_PLAYER_POSITION),
        }
    }

    /// Append a turn
    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.history.push(Message::new(role, content));
    }

    /// Transcript in order
    #[must_use]
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    #[must_use]
    pub fn persona_id(&self) -> &str {
        &self.persona_id
    }

    /// Synthesis voice of the persona
    #[must_use]
    pub fn voice(&self) -> &str {
        &self.voice
    }

    /// Where the player stood when the conversation began
    #[must_use]
    pub const fn player_position(&self) -> [f32; 3] {
        self.player_position
    }
}
