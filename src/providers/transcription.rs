use async_trait::async_trait;
use log::{debug, error};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::app_config::TranscriptionConfig;
use crate::errors::ProviderError;
use crate::providers::{transport_error, truncate_body, Transcriber};

/// Client for a Whisper-compatible transcription endpoint
pub struct Whisper {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
}

impl std::fmt::Debug for Whisper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Whisper")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

impl Whisper {
    /// Create a new client
    pub fn new(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            model: model.into(),
        }
    }

    /// Create a client from the transcription configuration
    pub fn from_config(config: &TranscriptionConfig) -> Self {
        Self::new(
            config.resolved_api_key(),
            config.endpoint.clone(),
            config.model.clone(),
            config.timeout_secs,
        )
    }
}

#[async_trait]
impl Transcriber for Whisper {
    async fn transcribe(&self, audio_path: &Path) -> Result<String, ProviderError> {
        let audio = tokio::fs::read(audio_path).await.map_err(|e| {
            ProviderError::RequestFailed(format!("reading {}: {}", audio_path.display(), e))
        })?;

        let file_name = audio_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "reference.mp3".to_string());

        let form = Form::new()
            .text("model", self.model.clone())
            .part("file", Part::bytes(audio).file_name(file_name));

        let api_url = format!("{}/v1/audio/transcriptions", self.endpoint.trim_end_matches('/'));
        let mut builder = self.client.post(&api_url).multipart(form);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error("transcription API", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error response text".to_string());
            error!("Transcription API error ({}): {}", status, truncate_body(&error_text));
            return Err(ProviderError::from_status(status.as_u16(), truncate_body(&error_text)));
        }

        let parsed = response
            .json::<TranscriptionResponse>()
            .await
            .map_err(|e| ProviderError::ParseError(format!("transcription API response: {}", e)))?;

        debug!("Transcribed {}", audio_path.display());
        Ok(parsed.text.trim().to_string())
    }
}
