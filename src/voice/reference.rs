/*!
 * Reference-audio loading.
 *
 * Transcripts come from the catalog when present, otherwise from a cached
 * `<stem>_transcript.txt` beside the audio file. Missing transcripts are
 * produced once by the transcriber and written to that file.
 */

use bytes::Bytes;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::ResolutionError;
use crate::file_utils::FileManager;
use crate::providers::Transcriber;
use crate::voice::registry::ReferenceEntry;

/// Reference recording ready to be sent with a speech request
#[derive(Debug, Clone)]
pub struct ReferenceAudio {
    pub path: PathBuf,
    pub audio: Bytes,
    pub transcript: String,
}

/// Loads reference recordings and their transcripts, once per file
#[derive(Debug, Clone)]
pub struct ReferenceLoader {
    root: PathBuf,
    transcriber: Option<Arc<dyn Transcriber>>,
    loaded: Arc<Mutex<HashMap<PathBuf, ReferenceAudio>>>,
}

impl ReferenceLoader {
    pub fn new(root: impl Into<PathBuf>, transcriber: Option<Arc<dyn Transcriber>>) -> Self {
        Self {
            root: root.into(),
            transcriber,
            loaded: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Absolute location of a catalog audio path
    pub fn audio_path(&self, audio: &Path) -> PathBuf {
        if audio.is_absolute() {
            audio.to_path_buf()
        } else {
            self.root.join(audio)
        }
    }

    /// Load the recording and transcript of a reference entry
    pub async fn load(&self, entry: &ReferenceEntry) -> Result<ReferenceAudio, ResolutionError> {
        let path = self.audio_path(&entry.audio);
        let cached = self.loaded.lock().get(&path).cloned();
        if let Some(cached) = cached {
            return Ok(cached);
        }

        let audio = tokio::fs::read(&path)
            .await
            .map_err(|e| ResolutionError::ReferenceIo {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        let transcript = self.transcript_for(entry, &path).await?;
        debug!("Loaded reference {} ({} bytes)", path.display(), audio.len());

        let reference = ReferenceAudio {
            path: path.clone(),
            audio: Bytes::from(audio),
            transcript,
        };
        self.loaded.lock().insert(path, reference.clone());
        Ok(reference)
    }

    async fn transcript_for(&self, entry: &ReferenceEntry, path: &Path) -> Result<String, ResolutionError> {
        if let Some(text) = entry.transcript.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            return Ok(text.to_string());
        }

        let transcript_path = FileManager::transcript_path(path);
        if FileManager::file_exists(&transcript_path) {
            let text = tokio::fs::read_to_string(&transcript_path)
                .await
                .map_err(|e| ResolutionError::ReferenceIo {
                    path: transcript_path.display().to_string(),
                    message: e.to_string(),
                })?;
            return Ok(text.trim().to_string());
        }

        let transcriber = self
            .transcriber
            .as_ref()
            .ok_or_else(|| ResolutionError::MissingTranscript(path.display().to_string()))?;

        info!("No transcript for {}, transcribing", path.display());
        let text = transcriber.transcribe(path).await?;
        if let Err(e) = tokio::fs::write(&transcript_path, &text).await {
            warn!("Could not cache transcript at {}: {}", transcript_path.display(), e);
        }
        Ok(text)
    }
}
