/*!
 * Reference-audio store.
 *
 * The catalog is a JSON object mapping voice profile ids to their emotion
 * references, in the order they appear in the file:
 *
 * ```json
 * {
 *   "Epic_Storyteller_deep_voice": {
 *     "Epic_Storyteller_deep_Joy_1": "storyteller/joy.mp3",
 *     "Epic_Storyteller_deep_Sad": { "audio": "storyteller/sad.mp3", "transcript": "..." }
 *   }
 * }
 * ```
 *
 * Building a registry embeds every profile description and every cleaned
 * emotion label once, so later lookups only embed the query.
 */

use anyhow::{anyhow, Context, Result};
use futures::future::try_join_all;
use log::{debug, info};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::errors::ResolutionError;
use crate::voice::cache::CachingEmbedder;
use crate::voice::emotion::similarity_key;
use crate::voice::similarity::best_match;

/// Location of one reference recording in the catalog
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ReferenceSource {
    /// Bare audio path
    Path(PathBuf),
    /// Audio path with its transcript
    Detailed {
        audio: PathBuf,
        #[serde(default)]
        transcript: Option<String>,
    },
}

impl ReferenceSource {
    fn into_parts(self) -> (PathBuf, Option<String>) {
        match self {
            ReferenceSource::Path(audio) => (audio, None),
            ReferenceSource::Detailed { audio, transcript } => (audio, transcript),
        }
    }
}

/// Parsed catalog, profiles and labels in file order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceCatalog {
    pub profiles: Vec<(String, Vec<(String, ReferenceSource)>)>,
}

impl ReferenceCatalog {
    /// Parse a catalog from JSON text
    pub fn from_json_str(json: &str) -> Result<Self> {
        let root: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(json).context("Voice catalog must be a JSON object")?;

        let mut profiles = Vec::with_capacity(root.len());
        for (profile, value) in root {
            let labels: serde_json::Map<String, serde_json::Value> = serde_json::from_value(value)
                .with_context(|| format!("Voice profile '{}' must map labels to audio files", profile))?;

            let mut references = Vec::with_capacity(labels.len());
            for (label, source) in labels {
                let source: ReferenceSource = serde_json::from_value(source)
                    .with_context(|| format!("Invalid reference '{}' in profile '{}'", label, profile))?;
                references.push((label, source));
            }
            profiles.push((profile, references));
        }

        Ok(Self { profiles })
    }

    /// Load a catalog file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read voice catalog: {}", path.display()))?;
        Self::from_json_str(&json)
    }

    /// Build a catalog from in-memory entries
    pub fn from_entries<I, P, L>(entries: I) -> Self
    where
        I: IntoIterator<Item = (P, Vec<(L, ReferenceSource)>)>,
        P: Into<String>,
        L: Into<String>,
    {
        Self {
            profiles: entries
                .into_iter()
                .map(|(profile, refs)| {
                    (
                        profile.into(),
                        refs.into_iter().map(|(label, src)| (label.into(), src)).collect(),
                    )
                })
                .collect(),
        }
    }
}

/// One emotion reference of a voice profile
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceEntry {
    /// Label as written in the catalog
    pub raw_label: String,
    /// Label after structural cleanup, used for similarity; never blank
    pub cleaned_label: String,
    /// Audio file, relative to the reference root unless absolute
    pub audio: PathBuf,
    /// Transcript supplied by the catalog
    pub transcript: Option<String>,
    /// Embedding of `cleaned_label`
    pub embedding: Vec<f32>,
}

/// A named voice with its emotion references
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceProfile {
    pub id: String,
    /// Embedding of the readable profile description
    pub description_embedding: Vec<f32>,
    pub references: Vec<ReferenceEntry>,
}

impl VoiceProfile {
    /// Reference whose raw label equals `label` exactly
    pub fn reference(&self, label: &str) -> Option<&ReferenceEntry> {
        self.references.iter().find(|entry| entry.raw_label == label)
    }
}

/// Readable description of a profile id, used for embedding
pub fn profile_description(id: &str) -> String {
    id.replace('_', " ").trim().to_string()
}

/// All voice profiles with precomputed embeddings
#[derive(Debug, Clone)]
pub struct VoiceRegistry {
    profiles: Vec<VoiceProfile>,
    index: HashMap<String, usize>,
    embedder: CachingEmbedder,
}

impl VoiceRegistry {
    /// Embed the catalog and build the registry
    pub async fn build(catalog: ReferenceCatalog, embedder: CachingEmbedder) -> Result<Self> {
        let descriptions: Vec<String> = catalog
            .profiles
            .iter()
            .map(|(id, _)| profile_description(id))
            .collect();
        let description_vectors = embedder
            .embed_many(&descriptions)
            .await
            .map_err(|e| anyhow!("Failed to embed voice profiles: {}", e))?;

        // Label sets of all profiles are embedded concurrently
        let cleaned_sets: Vec<Vec<String>> = catalog
            .profiles
            .iter()
            .map(|(_, references)| references.iter().map(|(label, _)| similarity_key(label)).collect())
            .collect();
        let label_vectors = try_join_all(cleaned_sets.iter().zip(&catalog.profiles).map(|(cleaned, (id, _))| {
            let embedder = &embedder;
            async move {
                embedder
                    .embed_many(cleaned)
                    .await
                    .map_err(|e| anyhow!("Failed to embed emotions of '{}': {}", id, e))
            }
        }))
        .await?;

        let mut profiles = Vec::with_capacity(catalog.profiles.len());
        for ((((id, references), cleaned), vectors), description_embedding) in catalog
            .profiles
            .into_iter()
            .zip(cleaned_sets)
            .zip(label_vectors)
            .zip(description_vectors)
        {
            let references = references
                .into_iter()
                .zip(cleaned)
                .zip(vectors)
                .map(|(((raw_label, source), cleaned_label), embedding)| {
                    let (audio, transcript) = source.into_parts();
                    ReferenceEntry {
                        raw_label,
                        cleaned_label,
                        audio,
                        transcript,
                        embedding: embedding.as_ref().clone(),
                    }
                })
                .collect::<Vec<_>>();

            debug!("Voice profile '{}' has {} references", id, references.len());
            profiles.push(VoiceProfile {
                id,
                description_embedding: description_embedding.as_ref().clone(),
                references,
            });
        }

        let (hits, misses, _) = embedder.cache().stats();
        info!(
            "Loaded {} voice profiles ({} embeddings, {} reused)",
            profiles.len(),
            misses,
            hits
        );
        Ok(Self::from_profiles(profiles, embedder))
    }

    /// Build a registry from already embedded profiles
    pub fn from_profiles(profiles: Vec<VoiceProfile>, embedder: CachingEmbedder) -> Self {
        let mut index = HashMap::with_capacity(profiles.len());
        for (position, profile) in profiles.iter().enumerate() {
            // First occurrence wins on duplicate ids
            index.entry(profile.id.clone()).or_insert(position);
        }
        Self {
            profiles,
            index,
            embedder,
        }
    }

    /// Profile by exact id
    pub fn profile(&self, id: &str) -> Option<&VoiceProfile> {
        self.index.get(id).map(|position| &self.profiles[*position])
    }

    /// Profile by exact id, as a resolution error when missing
    pub fn require(&self, id: &str) -> Result<&VoiceProfile, ResolutionError> {
        self.profile(id)
            .ok_or_else(|| ResolutionError::UnknownVoiceProfile(id.to_string()))
    }

    /// Whether a profile with this exact id exists
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// All profiles in catalog order
    pub fn profiles(&self) -> &[VoiceProfile] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Embedder shared with the resolvers
    pub fn embedder(&self) -> &CachingEmbedder {
        &self.embedder
    }

    /// Profile whose description is most similar to `description`
    pub async fn nearest_profile(&self, description: &str) -> Result<(&VoiceProfile, f32), ResolutionError> {
        let query = self.embedder.embed_one(description).await?;
        best_match(
            &query,
            self.profiles.iter().map(|p| p.description_embedding.as_slice()),
        )
        .map(|(position, score)| (&self.profiles[position], score))
        .ok_or_else(|| ResolutionError::UnknownVoiceProfile(description.to_string()))
    }
}
