/*!
 * Synthesis results and the ordered output manifest.
 */

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::file_utils::FileManager;
use crate::markup::flatten::SegmentKind;

/// Final state of one segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    /// The artifact was generated and persisted
    Synthesized,
    /// Generation failed after retries
    Failed,
    /// No voice profile or emotion reference could be found
    Unresolved,
    /// Text segment with no preceding image
    Orphaned,
}

/// Outcome for one segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisResult {
    pub order: usize,
    pub kind: SegmentKind,
    /// Artifact location; absent unless synthesized
    pub artifact: Option<String>,
    pub status: ArtifactStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SynthesisResult {
    pub fn synthesized(order: usize, kind: SegmentKind, artifact: impl Into<String>) -> Self {
        Self {
            order,
            kind,
            artifact: Some(artifact.into()),
            status: ArtifactStatus::Synthesized,
            error: None,
        }
    }

    pub fn failed(order: usize, kind: SegmentKind, error: impl Into<String>) -> Self {
        Self::absent(order, kind, ArtifactStatus::Failed, error)
    }

    pub fn unresolved(order: usize, error: impl Into<String>) -> Self {
        Self::absent(order, SegmentKind::Text, ArtifactStatus::Unresolved, error)
    }

    pub fn orphaned(order: usize) -> Self {
        Self::absent(
            order,
            SegmentKind::Text,
            ArtifactStatus::Orphaned,
            "text segment precedes any image",
        )
    }

    fn absent(order: usize, kind: SegmentKind, status: ArtifactStatus, error: impl Into<String>) -> Self {
        Self {
            order,
            kind,
            artifact: None,
            status,
            error: Some(error.into()),
        }
    }

    pub fn is_synthesized(&self) -> bool {
        self.status == ArtifactStatus::Synthesized
    }
}

/// Results of a run sorted by `order`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub entries: Vec<SynthesisResult>,
}

impl Manifest {
    /// Build a manifest from results in any order
    pub fn from_results(mut entries: Vec<SynthesisResult>) -> Self {
        entries.sort_by_key(|entry| entry.order);
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for a segment
    pub fn get(&self, order: usize) -> Option<&SynthesisResult> {
        self.entries
            .binary_search_by_key(&order, |entry| entry.order)
            .ok()
            .map(|index| &self.entries[index])
    }

    /// Number of entries with the given status
    pub fn count(&self, status: ArtifactStatus) -> usize {
        self.entries.iter().filter(|entry| entry.status == status).count()
    }

    /// Whether every entry has an artifact
    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(SynthesisResult::is_synthesized)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize manifest")
    }

    /// Write the manifest as pretty JSON
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        FileManager::write_to_file(path, &self.to_json()?)
    }
}
