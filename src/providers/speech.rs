use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use log::{debug, error};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use crate::app_config::SpeechConfig;
use crate::errors::ProviderError;
use crate::providers::{transport_error, truncate_body, Prosody, SpeechProvider, SpeechRequest};

/// Fish Audio text-to-speech client
pub struct FishSpeech {
    /// HTTP client for API requests
    client: Client,
    /// API key for authentication
    api_key: String,
    /// API endpoint URL
    endpoint: String,
    /// Optional backend model header
    model: Option<String>,
}

impl std::fmt::Debug for FishSpeech {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FishSpeech")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish()
    }
}

/// Reference recording sent along with the text
#[derive(Debug, Serialize)]
struct TtsReference {
    /// Base64 encoded audio
    audio: String,
    /// What is being said in the recording
    text: String,
}

/// TTS request body
#[derive(Debug, Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    references: Vec<TtsReference>,
    format: &'a str,
    prosody: Prosody,
}

impl FishSpeech {
    /// Create a new client
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            model: None,
        }
    }

    /// Create a client from the speech configuration
    pub fn from_config(config: &SpeechConfig) -> Self {
        let mut speech = Self::new(config.resolved_api_key(), config.endpoint.clone(), config.timeout_secs);
        speech.model = config.model.clone();
        speech
    }

    fn api_url(&self) -> String {
        format!("{}/v1/tts", self.endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl SpeechProvider for FishSpeech {
    async fn synthesize(&self, request: SpeechRequest) -> Result<Bytes, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NotConfigured("speech API key is missing".to_string()));
        }

        let body = TtsRequest {
            text: &request.text,
            references: vec![TtsReference {
                audio: STANDARD.encode(&request.reference_audio),
                text: request.reference_transcript.clone(),
            }],
            format: &request.format,
            prosody: request.prosody,
        };

        let mut builder = self
            .client
            .post(self.api_url())
            .bearer_auth(&self.api_key)
            .json(&body);
        if let Some(model) = &self.model {
            builder = builder.header("model", model);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error("speech API", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error response text".to_string());
            error!("Speech API error ({}): {}", status, truncate_body(&error_text));
            return Err(ProviderError::from_status(status.as_u16(), truncate_body(&error_text)));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| transport_error("speech API", e))?;
        if audio.is_empty() {
            return Err(ProviderError::ParseError("speech API returned no audio".to_string()));
        }

        debug!("Synthesized {} bytes of {} audio", audio.len(), request.format);
        Ok(audio)
    }
}
