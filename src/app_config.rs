use anyhow::{anyhow, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::default::Default;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Application configuration module
/// This module handles loading, validating and saving the pipeline settings.
/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Markup conventions of the narration script
    #[serde(default)]
    pub narration: NarrationConfig,

    /// Reference-audio store location
    #[serde(default)]
    pub voices: VoicesConfig,

    /// Speech synthesis service
    #[serde(default)]
    pub speech: SpeechConfig,

    /// Image generation service
    #[serde(default)]
    pub image: ImageConfig,

    /// Embedding service used for similarity fallback
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Speech recognition service used to produce missing reference transcripts
    #[serde(default)]
    pub transcription: TranscriptionConfig,

    /// Worker pool and retry settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Root directory receiving one sub-directory per run
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Markup conventions used by the parser and flattener
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NarrationConfig {
    /// Tag names (first token, case-insensitive) delimiting narration blocks
    #[serde(default = "default_block_tags")]
    pub block_tags: Vec<String>,

    /// Tag name of voice-assignment blocks
    #[serde(default = "default_assignment_tag")]
    pub assignment_tag: String,

    /// Prefix of image cue tags
    #[serde(default = "default_image_marker")]
    pub image_marker: String,

    /// Recognized speaker names; names bound in assignment blocks are added per run
    #[serde(default = "default_speakers")]
    pub speakers: Vec<String>,

    /// Speaker bound to the default voice when a script declares no voices
    #[serde(default = "default_speaker")]
    pub default_speaker: String,

    /// Voice profile used for speakers without an assignment
    #[serde(default = "default_voice_profile")]
    pub default_voice_profile: String,

    /// Emotion label of text outside any emotion tag
    #[serde(default = "default_emotion")]
    pub default_emotion: String,

    /// Treat a script without narration block tags as one block
    #[serde(default = "default_true")]
    pub implicit_block: bool,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            block_tags: default_block_tags(),
            assignment_tag: default_assignment_tag(),
            image_marker: default_image_marker(),
            speakers: default_speakers(),
            default_speaker: default_speaker(),
            default_voice_profile: default_voice_profile(),
            default_emotion: default_emotion(),
            implicit_block: true,
        }
    }
}

/// Reference-audio store configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VoicesConfig {
    /// JSON catalog mapping voice profile -> emotion label -> audio file
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,

    /// Directory that relative audio paths in the catalog are resolved against.
    /// Defaults to the catalog's parent directory when empty.
    #[serde(default)]
    pub reference_root: Option<PathBuf>,

    /// Speaker bindings carried between sessions, none when unset
    #[serde(default)]
    pub assignments_file: Option<PathBuf>,
}

impl Default for VoicesConfig {
    fn default() -> Self {
        Self {
            catalog_path: default_catalog_path(),
            reference_root: None,
            assignments_file: None,
        }
    }
}

impl VoicesConfig {
    /// Directory used to resolve relative reference-audio paths
    pub fn effective_reference_root(&self) -> PathBuf {
        match &self.reference_root {
            Some(root) => root.clone(),
            None => self
                .catalog_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }
}

/// Speech synthesis service configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SpeechConfig {
    /// Service endpoint URL
    #[serde(default = "default_speech_endpoint")]
    pub endpoint: String,

    /// API key (falls back to NARRAVOX_SPEECH_API_KEY)
    #[serde(default = "String::new")]
    pub api_key: String,

    /// Optional model/backend identifier
    #[serde(default)]
    pub model: Option<String>,

    /// Playback speed multiplier
    #[serde(default = "default_speech_speed")]
    pub speed: f32,

    /// Volume adjustment in dB
    #[serde(default)]
    pub volume: f32,

    /// Audio container format of the synthesized clips
    #[serde(default = "default_speech_format")]
    pub format: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            endpoint: default_speech_endpoint(),
            api_key: String::new(),
            model: None,
            speed: default_speech_speed(),
            volume: 0.0,
            format: default_speech_format(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Image generation service configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImageConfig {
    /// Service endpoint URL
    #[serde(default = "default_image_endpoint")]
    pub endpoint: String,

    /// API key (falls back to NARRAVOX_IMAGE_API_KEY)
    #[serde(default = "String::new")]
    pub api_key: String,

    /// Image model name
    #[serde(default = "default_image_model")]
    pub model: String,

    /// Diffusion steps
    #[serde(default = "default_image_steps")]
    pub steps: u32,

    /// Image width in pixels
    #[serde(default = "default_image_size")]
    pub width: u32,

    /// Image height in pixels
    #[serde(default = "default_image_size")]
    pub height: u32,

    /// Image file format
    #[serde(default = "default_image_format")]
    pub format: String,

    /// Download generated images into the run directory instead of keeping URLs
    #[serde(default)]
    pub download: bool,

    /// Request timeout in seconds
    #[serde(default = "default_image_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            endpoint: default_image_endpoint(),
            api_key: String::new(),
            model: default_image_model(),
            steps: default_image_steps(),
            width: default_image_size(),
            height: default_image_size(),
            format: default_image_format(),
            download: false,
            timeout_secs: default_image_timeout_secs(),
        }
    }
}

/// Embedding service configuration (Ollama API)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Service endpoint URL
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,

    /// Embedding model name
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// How long the server keeps the model loaded between requests (e.g. "10m");
    /// the server default applies when unset
    #[serde(default)]
    pub keep_alive: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_embedding_endpoint(),
            model: default_embedding_model(),
            timeout_secs: default_timeout_secs(),
            keep_alive: None,
        }
    }
}

/// Speech recognition service configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TranscriptionConfig {
    /// Whether missing transcripts may be produced by the service
    #[serde(default)]
    pub enabled: bool,

    /// Service endpoint URL (OpenAI-compatible)
    #[serde(default = "default_transcription_endpoint")]
    pub endpoint: String,

    /// API key (falls back to NARRAVOX_TRANSCRIPTION_API_KEY)
    #[serde(default = "String::new")]
    pub api_key: String,

    /// Recognition model name
    #[serde(default = "default_transcription_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_image_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_transcription_endpoint(),
            api_key: String::new(),
            model: default_transcription_model(),
            timeout_secs: default_image_timeout_secs(),
        }
    }
}

/// Worker pool and retry configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of in-flight generation requests
    #[serde(default = "default_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Backoff schedule in milliseconds; one attempt per entry
    #[serde(default = "default_retry_delays_ms")]
    pub retry_delays_ms: Vec<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_concurrent_requests(),
            retry_delays_ms: default_retry_delays_ms(),
        }
    }
}

impl SchedulerConfig {
    /// Backoff schedule as durations
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Matching filter for the `log` facade
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

fn default_block_tags() -> Vec<String> {
    // Matches both <Audiobook> and <Audiobook Narration>
    vec!["Audiobook".to_string()]
}

fn default_assignment_tag() -> String {
    "ASSIGN_VOICE".to_string()
}

fn default_image_marker() -> String {
    "IMAGE".to_string()
}

fn default_speakers() -> Vec<String> {
    vec!["STORYTELLER".to_string()]
}

fn default_speaker() -> String {
    "STORYTELLER".to_string()
}

fn default_voice_profile() -> String {
    "Epic_Storyteller_deep_voice".to_string()
}

fn default_emotion() -> String {
    "default".to_string()
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("voices/folder_mp3_mapping.json")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("segments")
}

fn default_speech_endpoint() -> String {
    "https://api.fish.audio".to_string()
}

fn default_speech_speed() -> f32 {
    1.2
}

fn default_speech_format() -> String {
    "mp3".to_string()
}

fn default_image_endpoint() -> String {
    "https://api.hyprlab.io".to_string()
}

fn default_image_model() -> String {
    "flux-1.1-pro".to_string()
}

fn default_image_steps() -> u32 {
    20
}

fn default_image_size() -> u32 {
    1024
}

fn default_image_format() -> String {
    "webp".to_string()
}

fn default_embedding_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_embedding_model() -> String {
    "bge-small-en-v1.5".to_string()
}

fn default_transcription_endpoint() -> String {
    "https://api.openai.com".to_string()
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_image_timeout_secs() -> u64 {
    120
}

fn default_concurrent_requests() -> usize {
    10
}

fn default_retry_delays_ms() -> Vec<u64> {
    vec![500, 1000, 2000, 3000, 4000, 5000, 6000, 7000, 8000, 9000, 10000]
}

fn default_true() -> bool {
    true
}

/// Returns the configured key, or the environment variable when the key is empty
fn key_or_env(configured: &str, variable: &str) -> String {
    if !configured.is_empty() {
        return configured.to_string();
    }
    std::env::var(variable).unwrap_or_default()
}

fn validate_endpoint(name: &str, endpoint: &str) -> Result<()> {
    Url::parse(endpoint)
        .map(|_| ())
        .map_err(|e| anyhow!("Invalid {} endpoint '{}': {}", name, endpoint, e))
}

impl Config {
    /// Load the configuration from a JSON file, writing a default one when missing
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let file = File::open(path)
                .with_context(|| format!("Failed to open config file: {:?}", path))?;
            let reader = BufReader::new(file);
            let config: Config = serde_json::from_reader(reader)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?;
            Ok(config)
        } else {
            warn!("Config file not found at {:?}, creating default config.", path);
            let config = Config::default();
            let config_json = serde_json::to_string_pretty(&config)
                .context("Failed to serialize default config to JSON")?;
            std::fs::write(path, config_json)
                .with_context(|| format!("Failed to write default config to file: {:?}", path))?;
            Ok(config)
        }
    }

    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_concurrent_requests == 0 {
            return Err(anyhow!("scheduler.max_concurrent_requests must be at least 1"));
        }

        let delays = &self.scheduler.retry_delays_ms;
        if delays.is_empty() {
            return Err(anyhow!("scheduler.retry_delays_ms must contain at least one entry"));
        }
        if delays.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(anyhow!("scheduler.retry_delays_ms must be ascending: {:?}", delays));
        }

        let narration = &self.narration;
        if narration.block_tags.iter().any(|t| t.trim().is_empty()) {
            return Err(anyhow!("narration.block_tags must not contain empty names"));
        }
        if narration.assignment_tag.trim().is_empty() {
            return Err(anyhow!("narration.assignment_tag must not be empty"));
        }
        if narration.image_marker.trim().is_empty() {
            return Err(anyhow!("narration.image_marker must not be empty"));
        }
        if narration.default_voice_profile.trim().is_empty() {
            return Err(anyhow!("narration.default_voice_profile must not be empty"));
        }

        if self.image.width == 0 || self.image.height == 0 {
            return Err(anyhow!(
                "Image dimensions must be positive, got {}x{}",
                self.image.width,
                self.image.height
            ));
        }

        validate_endpoint("speech", &self.speech.endpoint)?;
        validate_endpoint("image", &self.image.endpoint)?;
        validate_endpoint("embedding", &self.embedding.endpoint)?;
        if self.transcription.enabled {
            validate_endpoint("transcription", &self.transcription.endpoint)?;
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            narration: NarrationConfig::default(),
            voices: VoicesConfig::default(),
            speech: SpeechConfig::default(),
            image: ImageConfig::default(),
            embedding: EmbeddingConfig::default(),
            transcription: TranscriptionConfig::default(),
            scheduler: SchedulerConfig::default(),
            output_dir: default_output_dir(),
            log_level: LogLevel::default(),
        }
    }
}

impl SpeechConfig {
    /// API key from the config or the environment
    pub fn resolved_api_key(&self) -> String {
        key_or_env(&self.api_key, "NARRAVOX_SPEECH_API_KEY")
    }
}

impl ImageConfig {
    /// API key from the config or the environment
    pub fn resolved_api_key(&self) -> String {
        key_or_env(&self.api_key, "NARRAVOX_IMAGE_API_KEY")
    }
}

impl TranscriptionConfig {
    /// API key from the config or the environment
    pub fn resolved_api_key(&self) -> String {
        key_or_env(&self.api_key, "NARRAVOX_TRANSCRIPTION_API_KEY")
    }
}
