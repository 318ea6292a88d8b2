//! NPC personas
//!
//! A persona fixes who the NPC is for a conversation: the system prompt that
//! seeds the transcript, the greeting spoken on start, and the synthesis
//! voice. Ids are matched case-insensitively.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Voice used when a persona is unknown or names none
pub const DEFAULT_VOICE: &str = "echo";

/// Shared behavior rules prefixed to every system prompt
pub const INTERACTION_FRAMEWORK: &str = "\
Interaction Framework:
- Maintain consistent personality throughout conversation
- Remember previous context within the dialogue
- Use natural speech patterns with occasional filler words
- Show emotional intelligence in responses
- Keep responses concise but meaningful (2-3 sentences)
- React appropriately to both positive and negative interactions
- If interrupted, acknowledge the interruption briefly and respond to the new input";

const HR_PROFILE: &str = "\
You are Sarah Chen, HR Director at Venture Builder AI. Core traits:
PERSONALITY:
- Warm but professional demeanor
- Excellent emotional intelligence
- Strong ethical boundaries
- Protective of confidential information
- Quick to offer practical solutions
SPEAKING STYLE:
- Uses supportive language: \"I understand that...\" \"Let's explore...\"
- References policies with context: \"According to our wellness policy...\"
- Balances empathy with professionalism
- On interruption: \"Oh, I see you have something new to share. What's on your mind?\"
VOICE: Warm, approachable tone";

const CEO_PROFILE: &str = "\
You are Michael Chen, CEO of Venture Builder AI. Core traits:
PERSONALITY:
- Visionary yet approachable
- Strategic thinker
- Passionate about venture building
SPEAKING STYLE:
- Uses storytelling: \"When we launched our first venture...\"
- References data: \"Our portfolio metrics show...\"
- Balances optimism with realism
- On interruption: \"Hold on, let's pivot to your new question. What's up?\"
VOICE: Authoritative, confident tone";

/// An NPC the player can talk to
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    /// Lowercase identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Full system prompt, framework included
    pub system_prompt: String,

    /// Synthesis voice
    pub voice: String,

    /// First assistant line of every conversation
    pub greeting: String,
}

impl Persona {
    /// Build a persona whose prompt is the framework followed by `profile`
    #[must_use]
    pub fn with_profile(id: &str, name: &str, profile: &str, voice: &str, greeting: &str) -> Self {
        Self {
            id: id.to_lowercase(),
            name: name.to_string(),
            system_prompt: format!("{INTERACTION_FRAMEWORK}\n\n{profile}"),
            voice: voice.to_string(),
            greeting: greeting.to_string(),
        }
    }
}

/// Partial persona from the config file
///
/// Fields left out keep the built-in value; a new id needs every field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct PersonaOverride {
    /// Display name
    pub name: Option<String>,

    /// Persona description, prefixed with the interaction framework
    pub profile: Option<String>,

    /// Synthesis voice
    pub voice: Option<String>,

    /// Opening line
    pub greeting: Option<String>,
}

/// Personas keyed by lowercase id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaTable {
    personas: BTreeMap<String, Persona>,
}

impl Default for PersonaTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PersonaTable {
    /// The HR director and CEO of Venture Builder AI
    #[must_use]
    pub fn builtin() -> Self {
        Self::empty()
            .with(Persona::with_profile(
                "hr",
                "Sarah Chen",
                HR_PROFILE,
                "alloy",
                "Hello there, I am Sarah Chen, HR Director at Venture Builder AI. How can I assist you today?",
            ))
            .with(Persona::with_profile(
                "ceo",
                "Michael Chen",
                CEO_PROFILE,
                "echo",
                "Hello there, I am Michael Chen, CEO at Venture Builder AI. What can I do for you today?",
            ))
    }

    /// A table with no personas
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            personas: BTreeMap::new(),
        }
    }

    /// Add or replace a persona
    #[must_use]
    pub fn with(mut self, persona: Persona) -> Self {
        self.insert(persona);
        self
    }

    /// Add or replace a persona
    pub fn insert(&mut self, persona: Persona) {
        self.personas.insert(persona.id.to_lowercase(), persona);
    }

    /// Apply config-file overrides
    ///
    /// # Errors
    ///
    /// Returns error if an override introduces a new persona without a
    /// name, profile and greeting
    pub fn apply_overrides(&mut self, overrides: &BTreeMap<String, PersonaOverride>) -> Result<()> {
        for (id, entry) in overrides {
            let key = id.to_lowercase();

            if let Some(existing) = self.personas.get_mut(&key) {
                if let Some(name) = &entry.name {
                    existing.name.clone_from(name);
                }
                if let Some(profile) = &entry.profile {
                    existing.system_prompt = format!("{INTERACTION_FRAMEWORK}\n\n{profile}");
                }
                if let Some(voice) = &entry.voice {
                    existing.voice.clone_from(voice);
                }
                if let Some(greeting) = &entry.greeting {
                    existing.greeting.clone_from(greeting);
                }
                tracing::debug!(persona = %key, "persona overridden from config");
                continue;
            }

            let (Some(name), Some(profile), Some(greeting)) =
                (&entry.name, &entry.profile, &entry.greeting)
            else {
                return Err(Error::Config(format!(
                    "persona '{id}' needs name, profile and greeting"
                )));
            };

            let voice = entry.voice.as_deref().unwrap_or(DEFAULT_VOICE);
            self.insert(Persona::with_profile(&key, name, profile, voice, greeting));
            tracing::debug!(persona = %key, "persona added from config");
        }

        Ok(())
    }

    /// Look up a persona
    ///
    /// # Errors
    ///
    /// Returns `PersonaNotFound` for unknown ids
    pub fn get(&self, id: &str) -> Result<&Persona> {
        self.personas
            .get(&id.to_lowercase())
            .ok_or_else(|| Error::PersonaNotFound(id.to_string()))
    }

    /// Voice for a persona, falling back to [`DEFAULT_VOICE`]
    #[must_use]
    pub fn voice_for(&self, id: &str) -> &str {
        self.personas
            .get(&id.to_lowercase())
            .map_or(DEFAULT_VOICE, |p| p.voice.as_str())
    }

    /// Known persona ids in sorted order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.personas.keys().map(String::as_str)
    }
}
