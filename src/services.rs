//! Contracts for the remote speech and language services

use std::sync::Arc;

use async_trait::async_trait;

use crate::dialogue::Message;
use crate::llm::ChatCompletion;
use crate::voice::{SpeechToText, TextToSpeech};
use crate::{Config, Error, Result};

/// Turns recorded speech into text
#[async_trait]
pub trait TranscriptionService: Send + Sync {
    /// Transcribe a WAV-encoded take
    ///
    /// # Errors
    ///
    /// Returns error if the service call fails
    async fn transcribe(&self, wav: &[u8], sample_rate: u32) -> Result<String>;
}

/// Produces the NPC's reply to a conversation
#[async_trait]
pub trait TextCompletionService: Send + Sync {
    /// Complete the transcript with one assistant message
    ///
    /// # Errors
    ///
    /// Returns error if the service call fails
    async fn complete(&self, transcript: &[Message]) -> Result<String>;
}

/// Renders reply text as speech
#[async_trait]
pub trait SpeechSynthesisService: Send + Sync {
    /// Synthesize `text` with `voice`, returning 24kHz mono s16le PCM
    ///
    /// # Errors
    ///
    /// Returns error if the service call fails
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>>;
}

/// The three remote collaborators of a dialogue
#[derive(Clone)]
pub struct Services {
    /// Speech-to-text
    pub stt: Arc<dyn TranscriptionService>,

    /// Reply generation
    pub llm: Arc<dyn TextCompletionService>,

    /// Text-to-speech
    pub tts: Arc<dyn SpeechSynthesisService>,
}

impl Services {
    /// Build HTTP-backed services from configuration
    ///
    /// # Errors
    ///
    /// Returns error if a required API key is missing
    pub fn from_config(config: &Config) -> Result<Self> {
        let openai = config.api_keys.openai.clone().unwrap_or_default();

        let stt = match config.voice.stt_provider.as_str() {
            "deepgram" => SpeechToText::new_deepgram(
                config.api_keys.deepgram.clone().unwrap_or_default(),
                config.voice.stt_model.clone(),
            )?,
            "openai" | "whisper" => {
                SpeechToText::new_whisper(openai.clone(), config.voice.stt_model.clone())?
            }
            other => return Err(Error::Config(format!("unknown STT provider: {other}"))),
        };

        let tts = match config.voice.tts_provider.as_str() {
            "elevenlabs" => TextToSpeech::new_elevenlabs_with_model(
                config.api_keys.elevenlabs.clone().unwrap_or_default(),
                config.voice.tts_model.clone(),
            )?,
            "openai" => TextToSpeech::new_openai_with_model(
                openai.clone(),
                config.voice.tts_speed,
                config.voice.tts_model.clone(),
            )?,
            other => return Err(Error::Config(format!("unknown TTS provider: {other}"))),
        };

        let llm = ChatCompletion::new(openai, config.llm.clone())?;

        tracing::debug!(
            stt = %config.voice.stt_provider,
            tts = %config.voice.tts_provider,
            model = %config.llm.model,
            "services initialized"
        );

        Ok(Self {
            stt: Arc::new(stt),
            llm: Arc::new(llm),
            tts: Arc::new(tts),
        })
    }
}
