/*!
 * Speaker-to-voice assignment.
 *
 * `VoiceAssignments` is the resolver context shared by every step of a run
 * (and by consecutive runs of one controller). Bindings are first-writer-wins:
 * check-then-set happens under one lock, so concurrent resolvers can never
 * overwrite each other.
 */

use anyhow::{Context, Result};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use crate::errors::ResolutionError;
use crate::markup::assignments::{AssignmentScanner, VoiceDeclaration};
use crate::voice::registry::VoiceRegistry;

/// Canonical form of a speaker name
pub fn canonical_speaker(name: &str) -> String {
    name.trim().to_uppercase()
}

/// Shared speaker -> voice profile mapping
#[derive(Debug, Clone, Default)]
pub struct VoiceAssignments {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl VoiceAssignments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `speaker` unless it is already bound.
    ///
    /// Returns `None` when the binding was made, or the existing profile.
    pub fn bind_if_absent(&self, speaker: &str, profile: &str) -> Option<String> {
        let speaker = canonical_speaker(speaker);
        let mut map = self.inner.lock();
        match map.get(&speaker) {
            Some(existing) => Some(existing.clone()),
            None => {
                map.insert(speaker, profile.to_string());
                None
            }
        }
    }

    /// Profile bound to `speaker`
    pub fn get(&self, speaker: &str) -> Option<String> {
        self.inner.lock().get(&canonical_speaker(speaker)).cloned()
    }

    pub fn contains(&self, speaker: &str) -> bool {
        self.inner.lock().contains_key(&canonical_speaker(speaker))
    }

    /// Copy of all bindings, sorted by speaker
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.inner
            .lock()
            .iter()
            .map(|(speaker, profile)| (speaker.clone(), profile.clone()))
            .collect()
    }

    /// Bound speaker names, sorted
    pub fn speakers(&self) -> Vec<String> {
        self.snapshot().into_keys().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Load bindings saved by [`VoiceAssignments::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read voice assignments: {}", path.display()))?;
        let saved: BTreeMap<String, String> = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse voice assignments: {}", path.display()))?;

        let assignments = Self::new();
        for (speaker, profile) in saved {
            assignments.bind_if_absent(&speaker, &profile);
        }
        Ok(assignments)
    }

    /// Write the bindings as a JSON object
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&self.snapshot())
            .context("Failed to serialize voice assignments")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write voice assignments: {}", path.display()))?;
        Ok(())
    }
}

/// How a speaker's profile was chosen
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "method")]
pub enum BindingMethod {
    /// The description is a profile id
    Exact,
    /// Closest profile description by cosine similarity
    Similarity { score: f32 },
    /// Bound to the configured default voice
    Default,
    /// The speaker was already bound; the declaration was ignored
    Retained,
}

/// Outcome for one declaration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceBinding {
    pub speaker: String,
    pub profile: String,
    #[serde(flatten)]
    pub method: BindingMethod,
}

/// Resolves assignment declarations against the voice registry
#[derive(Debug, Clone)]
pub struct VoiceResolver {
    registry: Arc<VoiceRegistry>,
    scanner: AssignmentScanner,
}

impl VoiceResolver {
    pub fn new(registry: Arc<VoiceRegistry>, scanner: AssignmentScanner) -> Self {
        Self { registry, scanner }
    }

    /// Scan the raw script and merge its declarations into `assignments`.
    ///
    /// Declarations that cannot be resolved are logged and skipped.
    pub async fn resolve_script(&self, script: &str, assignments: &VoiceAssignments) -> Vec<VoiceBinding> {
        let mut bindings = Vec::new();
        for declaration in self.scanner.declarations(script) {
            match self.resolve_declaration(&declaration, assignments).await {
                Ok(binding) => bindings.push(binding),
                Err(e) => warn!("Could not assign a voice to '{}': {}", declaration.name, e),
            }
        }
        bindings
    }

    /// Resolve one declaration, honoring existing bindings
    pub async fn resolve_declaration(
        &self,
        declaration: &VoiceDeclaration,
        assignments: &VoiceAssignments,
    ) -> Result<VoiceBinding, ResolutionError> {
        let speaker = canonical_speaker(&declaration.name);

        if let Some(existing) = assignments.get(&speaker) {
            debug!("Speaker '{}' already assigned to '{}'", speaker, existing);
            return Ok(VoiceBinding {
                speaker,
                profile: existing,
                method: BindingMethod::Retained,
            });
        }

        let (profile, method) = self.match_description(&declaration.description).await?;

        // Another resolver may have bound the speaker while we were embedding
        if let Some(existing) = assignments.bind_if_absent(&speaker, &profile) {
            return Ok(VoiceBinding {
                speaker,
                profile: existing,
                method: BindingMethod::Retained,
            });
        }

        info!("Speaker '{}' -> voice '{}' ({:?})", speaker, profile, method);
        Ok(VoiceBinding {
            speaker,
            profile,
            method,
        })
    }

    /// Bind `speaker` to `profile` unless already bound
    pub fn bind_default(&self, speaker: &str, profile: &str, assignments: &VoiceAssignments) -> VoiceBinding {
        let speaker = canonical_speaker(speaker);
        match assignments.bind_if_absent(&speaker, profile) {
            Some(existing) => VoiceBinding {
                speaker,
                profile: existing,
                method: BindingMethod::Retained,
            },
            None => VoiceBinding {
                speaker,
                profile: profile.to_string(),
                method: BindingMethod::Default,
            },
        }
    }

    /// Profile id for a voice description
    async fn match_description(&self, description: &str) -> Result<(String, BindingMethod), ResolutionError> {
        let description = description.trim();
        if self.registry.contains(description) {
            return Ok((description.to_string(), BindingMethod::Exact));
        }

        let (profile, score) = self.registry.nearest_profile(description).await?;
        Ok((profile.id.clone(), BindingMethod::Similarity { score }))
    }
}
