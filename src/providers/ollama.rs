use async_trait::async_trait;
use log::{debug, error};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::app_config::EmbeddingConfig;
use crate::errors::ProviderError;
use crate::providers::{transport_error, truncate_body, EmbeddingProvider};

/// Ollama client used for text embeddings
pub struct Ollama {
    /// Base URL of the Ollama API
    base_url: String,
    /// Embedding model name
    model: String,
    /// Keep-alive duration forwarded with every request
    keep_alive: Option<String>,
    /// HTTP client for making requests
    client: Client,
}

impl std::fmt::Debug for Ollama {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ollama")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("keep_alive", &self.keep_alive)
            .finish()
    }
}

/// Embeddings request for the Ollama API
#[derive(Debug, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// Model name to use
    model: String,
    /// Prompt to generate embeddings for
    prompt: String,
    /// How long to keep the model loaded in memory
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<String>,
}

/// Embeddings response from the Ollama API
#[derive(Debug, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// Embedding vector
    pub embedding: Vec<f32>,
}

impl Ollama {
    /// Create a new Ollama client from a complete URL
    ///
    /// A URL without scheme is treated as plain http.
    pub fn new(url: impl Into<String>, model: impl Into<String>, timeout_secs: u64) -> Self {
        let url = url.into();
        let base_url = if url.starts_with("http://") || url.starts_with("https://") {
            url.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", url.trim_end_matches('/'))
        };

        Self {
            base_url,
            model: model.into(),
            keep_alive: None,
            client: Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                // Ollama uses HTTP/1.1
                .http1_only()
                .pool_idle_timeout(Duration::from_secs(90))
                .tcp_keepalive(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Create a client from the embedding configuration
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self::new(config.endpoint.clone(), config.model.clone(), config.timeout_secs)
            .with_keep_alive(config.keep_alive.clone())
    }

    /// Ask the server to keep the model loaded for `keep_alive`
    pub fn with_keep_alive(mut self, keep_alive: Option<String>) -> Self {
        self.keep_alive = keep_alive.filter(|value| !value.trim().is_empty());
        self
    }

    fn embedding_request(&self, prompt: &str) -> EmbeddingRequest {
        EmbeddingRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            keep_alive: self.keep_alive.clone(),
        }
    }

    /// Base URL of the server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Embed a single prompt
    pub async fn embed_one(&self, prompt: &str) -> Result<Vec<f32>, ProviderError> {
        let url = format!("{}/api/embeddings", self.base_url);

        let request = self.embedding_request(prompt);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error("Ollama embeddings", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error response text".to_string());
            error!("Ollama API error ({}): {}", status, truncate_body(&error_text));
            return Err(ProviderError::from_status(status.as_u16(), truncate_body(&error_text)));
        }

        // Get the raw response text first
        let response_text = response
            .text()
            .await
            .map_err(|e| transport_error("Ollama embeddings", e))?;

        parse_embedding(&response_text)
    }
}

/// Parse an embeddings response, falling back to a lenient extraction
fn parse_embedding(response_text: &str) -> Result<Vec<f32>, ProviderError> {
    match serde_json::from_str::<EmbeddingResponse>(response_text) {
        Ok(embedding_response) if !embedding_response.embedding.is_empty() => {
            Ok(embedding_response.embedding)
        }
        Ok(_) => Err(ProviderError::ParseError(
            "Ollama API returned an empty embedding".to_string(),
        )),
        Err(e) => {
            error!(
                "Failed to parse Ollama API embeddings response: {}. Raw response (first 500 chars): {}",
                e,
                truncate_body(response_text)
            );

            // Try a more lenient approach - parse as Value first
            let value = serde_json::from_str::<serde_json::Value>(response_text).map_err(|_| {
                ProviderError::ParseError(format!(
                    "Failed to parse Ollama API embeddings response: {}. Response contains invalid JSON.",
                    e
                ))
            })?;

            // Newer servers answer /api/embed with a list of vectors
            let array = value
                .get("embedding")
                .and_then(|v| v.as_array())
                .or_else(|| {
                    value
                        .get("embeddings")
                        .and_then(|v| v.as_array())
                        .and_then(|rows| rows.first())
                        .and_then(|v| v.as_array())
                });

            let embedding: Vec<f32> = array
                .map(|values| {
                    values
                        .iter()
                        .filter_map(|v| v.as_f64().map(|f| f as f32))
                        .collect()
                })
                .unwrap_or_default();

            if embedding.is_empty() {
                Err(ProviderError::ParseError(
                    "Failed to extract embedding from Ollama API response".to_string(),
                ))
            } else {
                Ok(embedding)
            }
        }
    }
}

#[async_trait]
impl EmbeddingProvider for Ollama {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed_one(text).await?);
        }
        debug!("Embedded {} texts with {}", texts.len(), self.model);
        Ok(vectors)
    }
}
