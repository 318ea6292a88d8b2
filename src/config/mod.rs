//! Configuration management
//!
//! Every setting resolves as env var > config file > built-in default.

pub mod file;

use std::time::Duration;

use crate::persona::PersonaTable;
use crate::voice::{CaptureSettings, SAMPLE_RATE};
use crate::{Error, Result};

use file::ConfigFile;

/// Dialogue configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// API keys
    pub api_keys: ApiKeys,

    /// Reply generation parameters
    pub llm: LlmConfig,

    /// Speech backends
    pub voice: VoiceConfig,

    /// Microphone recording
    pub capture: CaptureSettings,

    /// Known NPCs
    pub personas: PersonaTable,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (chat, Whisper and TTS)
    pub openai: Option<String>,

    /// Deepgram API key (optional STT)
    pub deepgram: Option<String>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<String>,
}

/// Chat completion parameters
#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    /// Model identifier
    pub model: String,

    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-2024-08-06".to_string(),
            temperature: 0.85,
            max_tokens: 150,
            top_p: 0.95,
            frequency_penalty: 0.2,
            presence_penalty: 0.1,
        }
    }
}

/// Speech backend configuration
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceConfig {
    /// "whisper" or "deepgram"
    pub stt_provider: String,

    /// STT model (e.g. "whisper-1", "nova-2")
    pub stt_model: String,

    /// "openai" or "elevenlabs"
    pub tts_provider: String,

    /// TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            stt_provider: "whisper".to_string(),
            stt_model: "whisper-1".to_string(),
            tts_provider: "openai".to_string(),
            tts_model: "tts-1".to_string(),
            tts_speed: 1.0,
        }
    }
}

impl Config {
    /// Load configuration from `.env`, the config file and the environment
    ///
    /// # Errors
    ///
    /// Returns error if the persona overrides are invalid
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env");
        }

        Self::resolve(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with values from `env`
    ///
    /// # Errors
    ///
    /// Returns error if the persona overrides or capture block size are invalid
    pub fn resolve(fc: ConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            deepgram: env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram),
            elevenlabs: env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs),
        };

        let llm_defaults = LlmConfig::default();
        let llm = LlmConfig {
            model: env("OFFICE_DIALOGUE_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or(llm_defaults.model),
            temperature: fc.llm.temperature.unwrap_or(llm_defaults.temperature),
            max_tokens: fc.llm.max_tokens.unwrap_or(llm_defaults.max_tokens),
            top_p: fc.llm.top_p.unwrap_or(llm_defaults.top_p),
            frequency_penalty: fc
                .llm
                .frequency_penalty
                .unwrap_or(llm_defaults.frequency_penalty),
            presence_penalty: fc
                .llm
                .presence_penalty
                .unwrap_or(llm_defaults.presence_penalty),
        };

        let voice_defaults = VoiceConfig::default();
        let voice = VoiceConfig {
            stt_provider: env("OFFICE_DIALOGUE_STT_PROVIDER")
                .or(fc.voice.stt_provider)
                .unwrap_or(voice_defaults.stt_provider),
            stt_model: env("OFFICE_DIALOGUE_STT_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or(voice_defaults.stt_model),
            tts_provider: env("OFFICE_DIALOGUE_TTS_PROVIDER")
                .or(fc.voice.tts_provider)
                .unwrap_or(voice_defaults.tts_provider),
            tts_model: env("OFFICE_DIALOGUE_TTS_MODEL")
                .or(fc.voice.tts_model)
                .unwrap_or(voice_defaults.tts_model),
            tts_speed: fc.voice.tts_speed.unwrap_or(voice_defaults.tts_speed),
        };

        let defaults = CaptureSettings::default();
        let sample_rate = fc.capture.sample_rate.unwrap_or(SAMPLE_RATE);
        let block_ms = fc.capture.block_ms.unwrap_or(200);
        let capture = CaptureSettings {
            sample_rate,
            block_frames: block_frames(sample_rate, block_ms)?,
            warmup: fc.capture.warmup_ms.map_or(defaults.warmup, Duration::from_millis),
            timeout: fc.capture.timeout_secs.map_or(defaults.timeout, Duration::from_secs),
            poll_interval: fc
                .capture
                .poll_ms
                .map_or(defaults.poll_interval, Duration::from_millis),
            device: env("OFFICE_DIALOGUE_INPUT_DEVICE").or(fc.capture.device),
            ..defaults
        };

        let mut personas = PersonaTable::builtin();
        personas.apply_overrides(&fc.personas)?;

        Ok(Self {
            api_keys,
            llm,
            voice,
            capture,
            personas,
        })
    }
}

/// Longest accepted capture block
const MAX_BLOCK_MS: u64 = 1000;

/// Samples in one block of `block_ms` at `sample_rate`
fn block_frames(sample_rate: u32, block_ms: u64) -> Result<usize> {
    if sample_rate == 0 {
        return Err(Error::Config("capture.sample_rate must be positive".to_string()));
    }
    if !(1..=MAX_BLOCK_MS).contains(&block_ms) {
        return Err(Error::Config(format!(
            "capture.block_ms must be between 1 and {MAX_BLOCK_MS}, got {block_ms}"
        )));
    }

    let frames = u64::from(sample_rate)
        .checked_mul(block_ms)
        .map(|f| f / 1000)
        .and_then(|f| usize::try_from(f).ok())
        .ok_or_else(|| Error::Config("capture block size overflows".to_string()))?;
    Ok(frames.max(1))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_file_or_env() {
        let config = Config::resolve(ConfigFile::default(), env_of(&[])).unwrap();

        assert_eq!(config.llm, LlmConfig::default());
        assert_eq!(config.voice, VoiceConfig::default());
        assert_eq!(config.capture.block_frames, 4800);
        assert_eq!(config.capture.timeout, Duration::from_secs(10));
        assert!(config.api_keys.openai.is_none());
        assert_eq!(config.personas.voice_for("hr"), "alloy");
    }

    #[test]
    fn env_wins_over_file() {
        let fc: ConfigFile = toml::from_str(
            r#"
[api_keys]
openai = "sk-file"

[llm]
model = "gpt-file"
max_tokens = 64
"#,
        )
        .unwrap();

        let config = Config::resolve(
            fc,
            env_of(&[("OPENAI_API_KEY", "sk-env"), ("OFFICE_DIALOGUE_LLM_MODEL", "gpt-env")]),
        )
        .unwrap();

        assert_eq!(config.api_keys.openai.as_deref(), Some("sk-env"));
        assert_eq!(config.llm.model, "gpt-env");
        assert_eq!(config.llm.max_tokens, 64);
    }

    #[test]
    fn capture_block_follows_rate() {
        let fc: ConfigFile = toml::from_str(
            r"
[capture]
sample_rate = 16000
block_ms = 100
",
        )
        .unwrap();

        let config = Config::resolve(fc, env_of(&[])).unwrap();

        assert_eq!(config.capture.sample_rate, 16000);
        assert_eq!(config.capture.block_frames, 1600);
    }

    #[test]
    fn oversized_capture_block_is_rejected() {
        for block_ms in [5000, 0, u64::MAX] {
            let mut fc = ConfigFile::default();
            fc.capture.block_ms = Some(block_ms);

            assert!(matches!(
                Config::resolve(fc, env_of(&[])),
                Err(Error::Config(_))
            ));
        }
    }

    #[test]
    fn longest_capture_block_is_accepted() {
        let fc: ConfigFile = toml::from_str("[capture]\nblock_ms = 1000\n").unwrap();
        let config = Config::resolve(fc, env_of(&[])).unwrap();
        assert_eq!(config.capture.block_frames, 24000);
    }

    #[test]
    fn invalid_persona_override_fails() {
        let fc: ConfigFile = toml::from_str("[personas.cto]\nname = \"Ada\"\n").unwrap();
        assert!(Config::resolve(fc, env_of(&[])).is_err());
    }
}
