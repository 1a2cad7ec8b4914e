/*!
 * Provider implementations for the external generation services.
 *
 * This module contains the collaborator interfaces and their clients:
 * - Speech: reference-conditioned text-to-speech (Fish Audio style API)
 * - Images: text-to-image generation (OpenAI-compatible images API)
 * - Ollama: local embedding server
 * - Transcription: Whisper-compatible speech recognition
 * - Mock: deterministic in-process providers for tests
 */

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use crate::app_config::Config;
use crate::errors::ProviderError;

/// Prosody controls forwarded to the speech service
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prosody {
    /// Playback speed multiplier
    pub speed: f32,
    /// Volume adjustment in dB
    pub volume: f32,
}

impl Default for Prosody {
    fn default() -> Self {
        Self {
            speed: 1.2,
            volume: 0.0,
        }
    }
}

/// One speech synthesis request
#[derive(Debug, Clone)]
pub struct SpeechRequest {
    /// Text to speak
    pub text: String,
    /// Raw bytes of the reference recording
    pub reference_audio: Bytes,
    /// Transcript of the reference recording
    pub reference_transcript: String,
    /// Prosody controls
    pub prosody: Prosody,
    /// Output audio format, also used as the artifact extension
    pub format: String,
}

/// One image generation request
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    /// Scene description
    pub prompt: String,
    /// Diffusion steps
    pub steps: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Output image format
    pub format: String,
}

/// Reference-conditioned speech synthesis
#[async_trait]
pub trait SpeechProvider: Send + Sync + Debug {
    /// Synthesize `request.text` in the voice of the reference recording
    async fn synthesize(&self, request: SpeechRequest) -> Result<Bytes, ProviderError>;
}

/// Text-to-image generation
#[async_trait]
pub trait ImageProvider: Send + Sync + Debug {
    /// Generate an image and return its location
    async fn generate(&self, request: ImageRequest) -> Result<String, ProviderError>;

    /// Fetch the bytes of a generated image
    async fn download(&self, location: &str) -> Result<Bytes, ProviderError>;
}

/// Text embedding service
#[async_trait]
pub trait EmbeddingProvider: Send + Sync + Debug {
    /// Embed each text, returning one vector per input in the same order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// Speech recognition used for reference transcripts
#[async_trait]
pub trait Transcriber: Send + Sync + Debug {
    /// Transcribe an audio file
    async fn transcribe(&self, audio_path: &Path) -> Result<String, ProviderError>;
}

/// The collaborators a pipeline run talks to
#[derive(Debug, Clone)]
pub struct ProviderSet {
    pub speech: Arc<dyn SpeechProvider>,
    pub images: Arc<dyn ImageProvider>,
    pub embeddings: Arc<dyn EmbeddingProvider>,
    pub transcriber: Option<Arc<dyn Transcriber>>,
}

impl ProviderSet {
    /// Build the HTTP clients described by the configuration
    pub fn from_config(config: &Config) -> Self {
        let transcriber: Option<Arc<dyn Transcriber>> = if config.transcription.enabled {
            Some(Arc::new(transcription::Whisper::from_config(&config.transcription)))
        } else {
            None
        };

        Self {
            speech: Arc::new(speech::FishSpeech::from_config(&config.speech)),
            images: Arc::new(images::ImageGenerator::from_config(&config.image)),
            embeddings: Arc::new(ollama::Ollama::from_config(&config.embedding)),
            transcriber,
        }
    }
}

/// Shorten a response body for log and error messages
pub(crate) fn truncate_body(body: &str) -> String {
    if body.chars().count() > 500 {
        body.chars().take(500).collect::<String>()
    } else {
        body.to_string()
    }
}

/// Map a reqwest transport error onto a provider error
pub(crate) fn transport_error(service: &str, error: reqwest::Error) -> ProviderError {
    if error.is_connect() || error.is_timeout() {
        ProviderError::ConnectionError(format!("{}: {}", service, error))
    } else {
        ProviderError::RequestFailed(format!("{}: {}", service, error))
    }
}

pub mod images;
pub mod mock;
pub mod ollama;
pub mod speech;
pub mod transcription;
