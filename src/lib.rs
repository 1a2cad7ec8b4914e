/*!
 * # narravox - illustrated audiobooks from narration markup
 *
 * A Rust library that turns an annotated narration script into scene images
 * and voiced lines.
 *
 * ## Features
 *
 * - Tolerant parsing of tag-based narration markup
 * - Speaker voice assignment by exact name or embedding similarity
 * - Emotion-matched reference audio for voice cloning
 * - Bounded-concurrency image and speech generation with retries
 * - Ordered manifest of results, partial runs included
 *
 * ## Architecture
 *
 * The library is organized in these main modules:
 * - `app_config`: Configuration management
 * - `markup`: Markup parsing, flattening and rendering:
 *   - `markup::parser`: Recursive-descent markup parser
 *   - `markup::flatten`: Tree to ordered segments
 *   - `markup::assignments`: Voice assignment blocks
 *   - `markup::writer`: Segments back to markup
 * - `voice`: Voice profiles, speaker bindings and emotion references
 * - `synthesis`: Scheduling, retries and ordered assembly
 * - `providers`: Clients for the speech, image, embedding and transcription services
 * - `file_utils`: File system operations
 * - `app_controller`: Main application controller
 * - `errors`: Custom error types for the application
 *
 * ## License
 *
 * This project is licensed under the MIT License
 */

// Global lints configuration
// These lints will be allowed but not auto-fixed
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod app_controller;
pub mod errors;
pub mod file_utils;
pub mod markup;
pub mod providers;
pub mod synthesis;
pub mod voice;

// Re-export main types for easier usage
pub use app_config::Config;
pub use app_controller::{analyze_script, Controller, RunEvent, RunReport, ScriptAnalysis};
pub use errors::{AppError, ProviderError, ResolutionError, SynthesisError};
pub use markup::{parse_document, Segment, SegmentKind};
pub use synthesis::{ArtifactStatus, Manifest, SynthesisResult};
