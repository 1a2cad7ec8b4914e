/*!
 * Emotion resolution.
 *
 * A text segment's emotion label is matched against the reference labels of
 * its voice profile: an exact match on the raw label wins, otherwise the
 * cleaned label is compared by embedding similarity.
 */

use log::debug;
use std::sync::Arc;

use crate::errors::ResolutionError;
use crate::voice::registry::{ReferenceEntry, VoiceProfile, VoiceRegistry};
use crate::voice::similarity::best_match;

/// Structural cleanup of an emotion label.
///
/// Catalog labels look like `Voice_Name_Variant_Emotion_Words_3`: the three
/// leading name parts and a trailing numeric index are dropped, and the
/// remaining underscores become spaces. Labels with fewer than four parts
/// only lose the numeric suffix.
pub fn clean_emotion_key(label: &str) -> String {
    let label = label.trim();
    let parts: Vec<&str> = label.split('_').collect();
    let candidate = if parts.len() >= 4 {
        parts[3..].join("_")
    } else {
        label.to_string()
    };

    let mut candidate_parts: Vec<&str> = candidate.split('_').collect();
    if let Some(last) = candidate_parts.last() {
        if !last.is_empty() && last.chars().all(|c| c.is_ascii_digit()) {
            candidate_parts.pop();
        }
    }

    candidate_parts.join(" ")
}

/// Text embedded for similarity: the cleaned label, or the whole label with
/// spaces for underscores when cleanup leaves nothing (`A_B_C_1`)
pub fn similarity_key(label: &str) -> String {
    let cleaned = clean_emotion_key(label);
    if cleaned.trim().is_empty() {
        label.trim().replace('_', " ")
    } else {
        cleaned
    }
}

/// How an emotion reference was selected
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EmotionMatchKind {
    /// The raw label is a key of the profile
    Exact,
    /// Closest cleaned label by cosine similarity
    Similarity { score: f32 },
}

/// The reference chosen for a segment
#[derive(Debug, Clone, PartialEq)]
pub struct EmotionMatch<'p> {
    pub entry: &'p ReferenceEntry,
    pub kind: EmotionMatchKind,
}

/// Picks the reference recording for an emotion label
#[derive(Debug, Clone)]
pub struct EmotionResolver {
    registry: Arc<VoiceRegistry>,
}

impl EmotionResolver {
    pub fn new(registry: Arc<VoiceRegistry>) -> Self {
        Self { registry }
    }

    /// Resolve `raw_label` within the profile `profile_id`
    pub async fn resolve_in(&self, profile_id: &str, raw_label: &str) -> Result<(String, ReferenceEntry), ResolutionError> {
        let profile = self.registry.require(profile_id)?;
        let found = self.resolve(profile, raw_label).await?;
        Ok((profile.id.clone(), found.entry.clone()))
    }

    /// Resolve `raw_label` within an already selected profile
    pub async fn resolve<'p>(
        &self,
        profile: &'p VoiceProfile,
        raw_label: &str,
    ) -> Result<EmotionMatch<'p>, ResolutionError> {
        if profile.references.is_empty() {
            return Err(ResolutionError::EmptyReferenceSet(profile.id.clone()));
        }

        let raw_label = raw_label.trim();
        if let Some(entry) = profile.reference(raw_label) {
            debug!("Exact emotion match '{}' in '{}'", raw_label, profile.id);
            return Ok(EmotionMatch {
                entry,
                kind: EmotionMatchKind::Exact,
            });
        }

        let query = self.registry.embedder().embed_one(&similarity_key(raw_label)).await?;
        let (position, score) = best_match(
            &query,
            profile.references.iter().map(|entry| entry.embedding.as_slice()),
        )
        // Every score was NaN; fall back to the first reference
        .unwrap_or((0, 0.0));

        let entry = &profile.references[position];
        debug!(
            "Emotion '{}' matched '{}' in '{}' with similarity {:.4}",
            raw_label, entry.raw_label, profile.id, score
        );
        Ok(EmotionMatch {
            entry,
            kind: EmotionMatchKind::Similarity { score },
        })
    }
}
