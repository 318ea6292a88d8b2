//! Input events, commands back to the caller and the display snapshot

use super::state::TurnState;

/// Key help shown above the prompt
pub const INSTRUCTIONS: &str =
    "Hold SPACE to record, release to send, M to toggle mic, Shift+Q to exit";

/// Edge-triggered user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// Record key pressed
    RecordStart,

    /// Record key released
    RecordStop,

    /// Switch between speech and text mode
    ToggleMode,

    /// Send the text buffer
    Submit,

    /// Printable character typed
    Char(char),

    /// Delete the last typed character
    Backspace,

    /// Leave the conversation
    Exit,
}

/// Instruction for the caller
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DialogueCommand {
    /// Put the player back where the conversation started
    MovePlayerBack { position: [f32; 3] },
}

/// What the dialogue box should show
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueView {
    /// A conversation is open
    pub active: bool,

    /// Last NPC line
    pub npc_message: String,

    /// Speech mode (as opposed to typing)
    pub speech_mode: bool,

    /// Microphone is capturing
    pub recording: bool,

    /// Typed text not yet sent
    pub input: String,

    pub turn_state: TurnState,
}

impl DialogueView {
    /// Prompt line under the NPC message
    #[must_use]
    pub fn prompt_line(&self) -> String {
        if !self.speech_mode {
            format!("> {}_", self.input)
        } else if self.recording {
            "> (Recording...)".to_string()
        } else {
            "> (Hold SPACE to record)".to_string()
        }
    }
}
