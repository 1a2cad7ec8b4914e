/*!
 * Narration markup handling.
 *
 * - `parser`: tolerant recursive-descent parser producing a markup tree
 * - `flatten`: turns the tree into ordered text and image segments
 * - `assignments`: extracts `NAME=voice` declarations from the raw script
 * - `writer`: renders segments back into markup
 */

pub mod assignments;
pub mod flatten;
pub mod parser;
pub mod writer;

pub use assignments::{AssignmentScanner, VoiceDeclaration};
pub use flatten::{FlattenOptions, FlattenWarning, FlattenedScript, Segment, SegmentFlattener, SegmentKind};
pub use parser::{parse_document, DiagnosticKind, MarkupNode, ParseDiagnostic, ParsedDocument};
pub use writer::{render_segments, RenderOptions};
