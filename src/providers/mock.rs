/*!
 * Mock provider implementations for testing.
 *
 * This module provides in-process providers that simulate different behaviors:
 * - `MockSpeech::working()` - Always succeeds with `AUDIO:<text>` bytes
 * - `MockSpeech::intermittent(n)` - Fails every n-th request
 * - `MockSpeech::failing()` - Always fails with a retryable error
 * - `MockEmbedder` - Deterministic vectors from a lookup table or a hash
 */

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::ProviderError;
use crate::providers::{EmbeddingProvider, ImageProvider, ImageRequest, SpeechProvider, SpeechRequest, Transcriber};

/// Behavior mode for the mock providers
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockBehavior {
    /// Always succeeds
    Working,
    /// Fails intermittently (every Nth request)
    Intermittent { fail_every: usize },
    /// Each distinct input fails this many times before succeeding
    FailFirst { failures: usize },
    /// Always fails with a retryable server error
    Failing,
    /// Always fails with a client error that must not be retried
    Rejecting,
    /// Simulates slow response
    Slow { delay_ms: u64 },
    /// Succeeds after a random delay up to the bound
    RandomDelay { max_delay_ms: u64 },
}

/// Request bookkeeping shared between clones
#[derive(Debug, Default)]
struct CallLog {
    /// Total requests seen
    requests: AtomicUsize,
    /// Requests per distinct input
    per_input: Mutex<HashMap<String, usize>>,
}

impl CallLog {
    /// Record a request and return (global index, attempt for this input)
    fn record(&self, input: &str) -> (usize, usize) {
        let index = self.requests.fetch_add(1, Ordering::SeqCst);
        let mut per_input = self.per_input.lock();
        let attempts = per_input.entry(input.to_string()).or_insert(0);
        *attempts += 1;
        (index, *attempts)
    }

    fn attempts_for(&self, input: &str) -> usize {
        self.per_input.lock().get(input).copied().unwrap_or(0)
    }
}

impl MockBehavior {
    /// Decide the outcome of one call
    async fn apply(&self, index: usize, attempt: usize) -> Result<(), ProviderError> {
        match *self {
            MockBehavior::Working => Ok(()),
            MockBehavior::Intermittent { fail_every } => {
                if fail_every > 0 && index % fail_every == fail_every - 1 {
                    Err(ProviderError::ApiError {
                        message: format!("Simulated intermittent failure (request #{})", index + 1),
                        status_code: 503,
                    })
                } else {
                    Ok(())
                }
            }
            MockBehavior::FailFirst { failures } => {
                if attempt <= failures {
                    Err(ProviderError::ConnectionError(format!(
                        "Simulated failure (attempt #{})",
                        attempt
                    )))
                } else {
                    Ok(())
                }
            }
            MockBehavior::Failing => Err(ProviderError::ApiError {
                message: "Simulated provider failure".to_string(),
                status_code: 500,
            }),
            MockBehavior::Rejecting => Err(ProviderError::ApiError {
                message: "Simulated invalid request".to_string(),
                status_code: 400,
            }),
            MockBehavior::Slow { delay_ms } => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(())
            }
            MockBehavior::RandomDelay { max_delay_ms } => {
                let delay = rand::rng().random_range(0..=max_delay_ms);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(())
            }
        }
    }
}

/// Mock speech provider
#[derive(Debug, Clone)]
pub struct MockSpeech {
    behavior: MockBehavior,
    calls: Arc<CallLog>,
    /// Inputs matching this predicate always fail, regardless of behavior
    fail_when: Option<fn(&str) -> bool>,
}

impl MockSpeech {
    /// Create a new mock with the specified behavior
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(CallLog::default()),
            fail_when: None,
        }
    }

    /// Create a mock that always succeeds
    pub fn working() -> Self {
        Self::new(MockBehavior::Working)
    }

    /// Create an intermittently failing mock
    pub fn intermittent(fail_every: usize) -> Self {
        Self::new(MockBehavior::Intermittent { fail_every })
    }

    /// Create a mock that always errors
    pub fn failing() -> Self {
        Self::new(MockBehavior::Failing)
    }

    /// Create a mock that answers after random delays
    pub fn random_delay(max_delay_ms: u64) -> Self {
        Self::new(MockBehavior::RandomDelay { max_delay_ms })
    }

    /// Fail every request whose text matches the predicate
    pub fn with_failure_predicate(mut self, predicate: fn(&str) -> bool) -> Self {
        self.fail_when = Some(predicate);
        self
    }

    /// Number of requests received so far
    pub fn request_count(&self) -> usize {
        self.calls.requests.load(Ordering::SeqCst)
    }

    /// Number of requests received for one text
    pub fn attempts_for(&self, text: &str) -> usize {
        self.calls.attempts_for(text)
    }
}

#[async_trait]
impl SpeechProvider for MockSpeech {
    async fn synthesize(&self, request: SpeechRequest) -> Result<Bytes, ProviderError> {
        let (index, attempt) = self.calls.record(&request.text);

        if let Some(predicate) = self.fail_when {
            if predicate(&request.text) {
                return Err(ProviderError::ApiError {
                    message: format!("Simulated failure for '{}'", request.text),
                    status_code: 500,
                });
            }
        }

        self.behavior.apply(index, attempt).await?;
        Ok(Bytes::from(format!("AUDIO:{}", request.text)))
    }
}

/// Mock image provider
#[derive(Debug, Clone)]
pub struct MockImages {
    behavior: MockBehavior,
    calls: Arc<CallLog>,
}

impl MockImages {
    /// Create a new mock with the specified behavior
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(CallLog::default()),
        }
    }

    /// Create a mock that always succeeds
    pub fn working() -> Self {
        Self::new(MockBehavior::Working)
    }

    /// Create a mock that always errors
    pub fn failing() -> Self {
        Self::new(MockBehavior::Failing)
    }

    /// Number of generation requests received so far
    pub fn request_count(&self) -> usize {
        self.calls.requests.load(Ordering::SeqCst)
    }

    /// Location returned for a prompt
    pub fn location_for(prompt: &str) -> String {
        let digest = Sha256::digest(prompt.as_bytes());
        let hex: String = digest.iter().take(6).map(|b| format!("{:02x}", b)).collect();
        format!("https://images.mock/{}.webp", hex)
    }
}

#[async_trait]
impl ImageProvider for MockImages {
    async fn generate(&self, request: ImageRequest) -> Result<String, ProviderError> {
        let (index, attempt) = self.calls.record(&request.prompt);
        self.behavior.apply(index, attempt).await?;
        Ok(Self::location_for(&request.prompt))
    }

    async fn download(&self, location: &str) -> Result<Bytes, ProviderError> {
        Ok(Bytes::from(format!("IMAGE:{}", location)))
    }
}

/// Deterministic embedding provider
#[derive(Debug, Clone, Default)]
pub struct MockEmbedder {
    table: HashMap<String, Vec<f32>>,
    failing: bool,
    calls: Arc<AtomicUsize>,
    texts: Arc<AtomicUsize>,
}

impl MockEmbedder {
    /// Create an embedder that hashes every text
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an embedder that always errors
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Pin the vector returned for a text (matched case-insensitively)
    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.table.insert(text.trim().to_lowercase(), vector);
        self
    }

    /// Number of embed calls
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of texts embedded across all calls
    pub fn embedded_count(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }

    /// Hash-derived unit vector for texts without a pinned vector
    pub fn hashed_vector(text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.trim().to_lowercase().as_bytes());
        let raw: Vec<f32> = digest
            .iter()
            .take(8)
            .map(|b| *b as f32 / 255.0 + 0.01)
            .collect();
        let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        raw.into_iter().map(|x| x / norm).collect()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(ProviderError::ConnectionError("Simulated embedding outage".to_string()));
        }
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        // Embedding services return no vector for blank input
        if texts.iter().any(|text| text.trim().is_empty()) {
            return Err(ProviderError::ParseError("empty embedding for blank text".to_string()));
        }

        Ok(texts
            .iter()
            .map(|text| {
                self.table
                    .get(&text.trim().to_lowercase())
                    .cloned()
                    .unwrap_or_else(|| Self::hashed_vector(text))
            })
            .collect())
    }
}

/// Transcriber returning a fixed text
#[derive(Debug, Clone)]
pub struct MockTranscriber {
    text: String,
    calls: Arc<AtomicUsize>,
}

impl MockTranscriber {
    /// Create a transcriber that always answers with `text`
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of transcriptions performed
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, _audio_path: &Path) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.text.clone())
    }
}
