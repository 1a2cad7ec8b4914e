use anyhow::{Context, Result};
use chrono::Local;
use sha2::{Digest, Sha256};
use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;

// @module: File and directory utilities

/// Suffix of cached reference transcripts
pub const TRANSCRIPT_SUFFIX: &str = "_transcript.txt";

/// Extensions recognized as narration scripts when scanning folders
pub const SCRIPT_EXTENSIONS: &[&str] = &["xml", "txt", "narration"];

// @struct: File operations utility
pub struct FileManager;

impl FileManager {
    // @checks: File existence
    pub fn file_exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().exists() && path.as_ref().is_file()
    }

    // @checks: Directory existence
    pub fn dir_exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().exists() && path.as_ref().is_dir()
    }

    // @creates: Directory and parents if needed
    pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path)
                .with_context(|| format!("Failed to create directory: {:?}", path))?;
        }
        Ok(())
    }

    // @generates: Artifact path keyed by segment order
    // @params: run_dir, order, extension
    pub fn segment_artifact_path<P: AsRef<Path>>(run_dir: P, order: usize, extension: &str) -> PathBuf {
        let extension = extension.trim_start_matches('.');
        run_dir.as_ref().join(format!("segment_{}.{}", order, extension))
    }

    // @generates: Transcript path beside a reference recording
    pub fn transcript_path<P: AsRef<Path>>(audio_path: P) -> PathBuf {
        let audio_path = audio_path.as_ref();
        let stem = audio_path.file_stem().unwrap_or_default().to_string_lossy();
        audio_path.with_file_name(format!("{}{}", stem, TRANSCRIPT_SUFFIX))
    }

    /// Create a fresh run directory under `root`.
    ///
    /// The name starts with a content hash of the script so runs of the same
    /// script sort together; the random suffix keeps concurrent runs apart.
    pub fn create_run_directory<P: AsRef<Path>>(root: P, script: &str) -> Result<PathBuf> {
        let digest = Sha256::digest(script.as_bytes());
        let hash: String = digest.iter().take(6).map(|b| format!("{:02x}", b)).collect();
        let suffix = Uuid::new_v4().simple().to_string();
        let dir = root.as_ref().join(format!("{}_{}", hash, &suffix[..8]));
        Self::ensure_dir(&dir)?;
        Ok(dir)
    }

    /// Find narration scripts in a directory tree, sorted by path
    pub fn find_scripts<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
        let mut result = Vec::new();

        for entry in WalkDir::new(dir.as_ref()).follow_links(true) {
            let entry = entry.context("Failed to read directory entry")?;
            let path = entry.path();

            if path.is_file() {
                let name = path.to_string_lossy();
                if name.ends_with(TRANSCRIPT_SUFFIX) {
                    continue;
                }
                if let Some(ext) = path.extension() {
                    let ext = ext.to_string_lossy();
                    if SCRIPT_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)) {
                        result.push(path.to_path_buf());
                    }
                }
            }
        }

        result.sort();
        Ok(result)
    }

    /// Read a file to a string
    pub fn read_to_string<P: AsRef<Path>>(path: P) -> Result<String> {
        fs::read_to_string(&path)
            .with_context(|| format!("Failed to read file: {:?}", path.as_ref()))
    }

    /// Write a string to a file
    pub fn write_to_file<P: AsRef<Path>>(path: P, content: &str) -> Result<()> {
        Self::write_bytes(path, content.as_bytes())
    }

    /// Write bytes to a file, creating the parent directory
    pub fn write_bytes<P: AsRef<Path>>(path: P, content: &[u8]) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            Self::ensure_dir(parent)?;
        }

        fs::write(&path, content)
            .with_context(|| format!("Failed to write to file: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// Append content to a log file with timestamp
    pub fn append_to_log_file<P: AsRef<Path>>(path: P, content: &str) -> Result<()> {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

        if let Some(parent) = path.as_ref().parent() {
            Self::ensure_dir(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file: {:?}", path.as_ref()))?;

        writeln!(file, "[{}] {}", timestamp, content)
            .with_context(|| format!("Failed to write to log file: {:?}", path.as_ref()))?;

        Ok(())
    }
}
