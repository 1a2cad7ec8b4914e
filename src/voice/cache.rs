/*!
 * Embedding caching functionality.
 *
 * Emotion labels and voice descriptions repeat a lot within a script and
 * across runs, so vectors are cached by their input text to avoid redundant
 * calls to the embedding service.
 */

use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::errors::ProviderError;
use crate::providers::EmbeddingProvider;

/// Embedding cache for storing and retrieving vectors
#[derive(Debug, Clone)]
pub struct EmbeddingCache {
    /// Internal cache storage, keyed by input text
    cache: Arc<RwLock<HashMap<String, Arc<Vec<f32>>>>>,

    /// Cache hit counter
    hits: Arc<AtomicUsize>,

    /// Cache miss counter
    misses: Arc<AtomicUsize>,

    /// Whether caching is enabled
    enabled: bool,
}

impl EmbeddingCache {
    /// Create a new embedding cache
    pub fn new(enabled: bool) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            hits: Arc::new(AtomicUsize::new(0)),
            misses: Arc::new(AtomicUsize::new(0)),
            enabled,
        }
    }

    /// Get a vector from the cache
    pub fn get(&self, text: &str) -> Option<Arc<Vec<f32>>> {
        if !self.enabled {
            return None;
        }

        match self.cache.read().get(text) {
            Some(vector) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Embedding cache hit for '{}'", truncate_text(text, 30));
                Some(Arc::clone(vector))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a vector in the cache
    pub fn store(&self, text: &str, vector: Vec<f32>) -> Arc<Vec<f32>> {
        let vector = Arc::new(vector);
        if self.enabled {
            self.cache.write().insert(text.to_string(), Arc::clone(&vector));
        }
        vector
    }

    /// Get cache statistics (hits, misses, hit rate)
    pub fn stats(&self) -> (usize, usize, f64) {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        let hit_rate = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };

        (hits, misses, hit_rate)
    }

    /// Get the number of entries in the cache
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Embedding provider front that consults the cache first
#[derive(Debug, Clone)]
pub struct CachingEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    cache: EmbeddingCache,
}

impl CachingEmbedder {
    /// Wrap a provider with a fresh cache
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self::with_cache(provider, EmbeddingCache::default())
    }

    /// Wrap a provider with an existing cache
    pub fn with_cache(provider: Arc<dyn EmbeddingProvider>, cache: EmbeddingCache) -> Self {
        Self { provider, cache }
    }

    /// The underlying cache
    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Embed one text
    pub async fn embed_one(&self, text: &str) -> Result<Arc<Vec<f32>>, ProviderError> {
        let mut vectors = self.embed_many(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| ProviderError::ParseError("embedding service returned no vector".to_string()))
    }

    /// Embed many texts, sending only uncached ones to the provider in one call
    pub async fn embed_many(&self, texts: &[String]) -> Result<Vec<Arc<Vec<f32>>>, ProviderError> {
        let mut slots: Vec<Option<Arc<Vec<f32>>>> = texts.iter().map(|text| self.cache.get(text)).collect();

        let mut missing: Vec<String> = Vec::new();
        for (text, slot) in texts.iter().zip(&slots) {
            if slot.is_none() && !missing.contains(text) {
                missing.push(text.clone());
            }
        }

        if !missing.is_empty() {
            let vectors = self.provider.embed(&missing).await?;
            if vectors.len() != missing.len() {
                return Err(ProviderError::ParseError(format!(
                    "embedding service returned {} vectors for {} texts",
                    vectors.len(),
                    missing.len()
                )));
            }

            let fresh: HashMap<String, Arc<Vec<f32>>> = missing
                .into_iter()
                .zip(vectors)
                .map(|(text, vector)| {
                    let stored = self.cache.store(&text, vector);
                    (text, stored)
                })
                .collect();

            for (text, slot) in texts.iter().zip(slots.iter_mut()) {
                if slot.is_none() {
                    *slot = fresh.get(text).cloned();
                }
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }
}

/// Truncate text to a maximum length with ellipsis
fn truncate_text(text: &str, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(max_length).collect::<String>())
    }
}
