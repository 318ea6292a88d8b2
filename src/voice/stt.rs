//! Speech-to-text (STT) processing

use async_trait::async_trait;

use crate::services::TranscriptionService;
use crate::{Error, Result};

const WHISPER_URL: &str = "https://api.openai.com/v1/audio/transcriptions";
const DEEPGRAM_URL: &str = "https://api.deepgram.com/v1/listen";

/// Response from OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// STT provider backend
#[derive(Clone, Copy, Debug)]
enum SttProvider {
    Whisper,
    Deepgram,
}

/// Transcribes speech to text
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: String,
    model: String,
    provider: SttProvider,
}

impl SpeechToText {
    /// Create a new STT instance using `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_whisper(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider: SttProvider::Whisper,
        })
    }

    /// Create a new STT instance using Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_deepgram(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "Deepgram API key required".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider: SttProvider::Deepgram,
        })
    }

    /// Upload a WAV file to the `OpenAI` transcription endpoint
    async fn transcribe_whisper(&self, wav: &[u8]) -> Result<String> {
        let file = reqwest::multipart::Part::bytes(wav.to_vec())
            .file_name("take.wav")
            .mime_str("audio/wav")
            .map_err(|e| Error::Stt(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("model", self.model.clone());

        let request = self
            .client
            .post(WHISPER_URL)
            .bearer_auth(&self.api_key)
            .multipart(form);
        let body: WhisperResponse = send(request, "Whisper").await?;

        Ok(body.text)
    }

    /// Post a WAV file to Deepgram; the container carries the sample rate
    async fn transcribe_deepgram(&self, wav: &[u8]) -> Result<String> {
        let request = self
            .client
            .post(self.deepgram_url())
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(wav.to_vec());
        let body: DeepgramResponse = send(request, "Deepgram").await?;

        Ok(body.into_transcript())
    }

    fn deepgram_url(&self) -> String {
        format!("{DEEPGRAM_URL}?model={}&punctuate=true", self.model)
    }
}

#[async_trait]
impl TranscriptionService for SpeechToText {
    async fn transcribe(&self, wav: &[u8], sample_rate: u32) -> Result<String> {
        tracing::debug!(
            provider = ?self.provider,
            wav_bytes = wav.len(),
            sample_rate,
            "starting transcription"
        );

        let transcript = match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(wav).await?,
            SttProvider::Deepgram => self.transcribe_deepgram(wav).await?,
        };

        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

/// Send a transcription request and decode its JSON body
///
/// Non-success statuses become [`Error::Stt`] carrying the response body.
async fn send<T: serde::de::DeserializeOwned>(
    request: reqwest::RequestBuilder,
    provider: &str,
) -> Result<T> {
    let response = request.send().await.map_err(|e| {
        tracing::error!(error = %e, provider, "transcription request failed");
        e
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::error!(%status, %body, provider, "transcription API error");
        return Err(Error::Stt(format!("{provider} API error {status}: {body}")));
    }

    Ok(response.json().await?)
}

impl DeepgramResponse {
    /// First alternative of the first channel, or empty
    fn into_transcript(self) -> String {
        self.results
            .channels
            .into_iter()
            .next()
            .and_then(|c| c.alternatives.into_iter().next())
            .map(|a| a.transcript)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whisper_requires_key() {
        assert!(matches!(
            SpeechToText::new_whisper(String::new(), "whisper-1".to_string()),
            Err(Error::Config(_))
        ));
        assert!(SpeechToText::new_whisper("sk-test".to_string(), "whisper-1".to_string()).is_ok());
    }

    #[test]
    fn deepgram_transcript_takes_first_alternative() {
        let body = r#"{"results":{"channels":[{"alternatives":[{"transcript":"hello there"},{"transcript":"yellow hair"}]}]}}"#;
        let parsed: DeepgramResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.into_transcript(), "hello there");
    }

    #[test]
    fn deepgram_without_channels_is_blank() {
        let parsed: DeepgramResponse = serde_json::from_str(r#"{"results":{"channels":[]}}"#).unwrap();
        assert_eq!(parsed.into_transcript(), "");
    }

    #[test]
    fn deepgram_url_names_model() {
        let stt = SpeechToText::new_deepgram("dg-test".to_string(), "nova-2".to_string()).unwrap();
        assert_eq!(
            stt.deepgram_url(),
            "https://api.deepgram.com/v1/listen?model=nova-2&punctuate=true"
        );
    }

    #[test]
    fn whisper_response_parses_text() {
        let parsed: WhisperResponse = serde_json::from_str(r#"{"text":" Hi Sarah. "}"#).unwrap();
        assert_eq!(parsed.text, " Hi Sarah. ");
    }
}
