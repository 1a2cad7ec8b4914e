use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, error};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::app_config::ImageConfig;
use crate::errors::ProviderError;
use crate::providers::{transport_error, truncate_body, ImageProvider, ImageRequest};

/// Client for an OpenAI-compatible image generation API
pub struct ImageGenerator {
    /// HTTP client for API requests
    client: Client,
    /// API key for authentication
    api_key: String,
    /// API endpoint URL
    endpoint: String,
    /// Model name
    model: String,
}

impl std::fmt::Debug for ImageGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageGenerator")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish()
    }
}

/// Image generation request body
#[derive(Debug, Serialize)]
struct GenerationBody<'a> {
    model: &'a str,
    prompt: &'a str,
    steps: u32,
    height: u32,
    width: u32,
    response_format: &'static str,
    output_format: &'a str,
}

/// Image generation response
#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    data: Vec<GeneratedImage>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    #[serde(default)]
    url: Option<String>,
}

impl ImageGenerator {
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

    /// Create a client from the image configuration
    pub fn from_config(config: &ImageConfig) -> Self {
        Self::new(
            config.resolved_api_key(),
            config.endpoint.clone(),
            config.model.clone(),
            config.timeout_secs,
        )
    }
}

/// Pull the first image URL out of a generation response
fn extract_url(body: &str) -> Result<String, ProviderError> {
    let parsed: GenerationResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::ParseError(format!("image API response: {}", e)))?;
    parsed
        .data
        .into_iter()
        .next()
        .and_then(|image| image.url)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ProviderError::ParseError("image API response contains no image URL".to_string()))
}

#[async_trait]
impl ImageProvider for ImageGenerator {
    async fn generate(&self, request: ImageRequest) -> Result<String, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NotConfigured("image API key is missing".to_string()));
        }

        let api_url = format!("{}/v1/images/generations", self.endpoint.trim_end_matches('/'));
        let body = GenerationBody {
            model: &self.model,
            prompt: &request.prompt,
            steps: request.steps,
            height: request.height,
            width: request.width,
            response_format: "url",
            output_format: &request.format,
        };

        let response = self
            .client
            .post(&api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("image API", e))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| transport_error("image API", e))?;

        if !status.is_success() {
            error!("Image API error ({}): {}", status, truncate_body(&response_text));
            return Err(ProviderError::from_status(status.as_u16(), truncate_body(&response_text)));
        }

        let url = extract_url(&response_text)?;
        debug!("Generated image at {}", url);
        Ok(url)
    }

    async fn download(&self, location: &str) -> Result<Bytes, ProviderError> {
        let response = self
            .client
            .get(location)
            .send()
            .await
            .map_err(|e| transport_error("image download", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::from_status(
                status.as_u16(),
                format!("downloading {}", location),
            ));
        }

        response
            .bytes()
            .await
            .map_err(|e| transport_error("image download", e))
    }
}
