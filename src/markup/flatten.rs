/*!
 * Tree-to-segment flattening.
 *
 * Walks the parsed markup depth-first and turns it into a flat, ordered list of
 * segments. Speaker tags and emotion tags set context for their subtree, image
 * tags become image segments and assignment blocks are skipped.
 */

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::app_config::NarrationConfig;
use crate::markup::parser::MarkupNode;
use crate::voice::emotion::clean_emotion_key;

/// Kind of output artifact a segment produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    /// Spoken line
    Text,
    /// Scene image
    Image,
}

/// One atomic unit of output with a stable order index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Dense, 0-based position in the flattened script
    pub order: usize,
    /// Text or image
    pub kind: SegmentKind,
    /// Uppercase speaker name, empty for untagged narration and images
    pub speaker: String,
    /// Emotion label as written in the script
    pub emotion_raw: String,
    /// Emotion label after structural cleanup
    pub emotion_normalized: String,
    /// Spoken text or image caption
    pub content: String,
    /// Voice profile bound during resolution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_profile: Option<String>,
    /// Reference-audio label chosen during resolution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_key: Option<String>,
    /// Where the synthesized artifact ended up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_location: Option<String>,
}

impl Segment {
    /// Create a text segment
    pub fn text(
        order: usize,
        speaker: impl Into<String>,
        emotion: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let emotion_raw = emotion.into();
        Self {
            order,
            kind: SegmentKind::Text,
            speaker: speaker.into(),
            emotion_normalized: clean_emotion_key(&emotion_raw),
            emotion_raw,
            content: content.into(),
            voice_profile: None,
            reference_key: None,
            artifact_location: None,
        }
    }

    /// Create an image segment
    pub fn image(order: usize, caption: impl Into<String>) -> Self {
        Self {
            order,
            kind: SegmentKind::Image,
            speaker: String::new(),
            emotion_raw: String::new(),
            emotion_normalized: String::new(),
            content: caption.into(),
            voice_profile: None,
            reference_key: None,
            artifact_location: None,
        }
    }

    /// Whether this is a spoken line
    pub fn is_text(&self) -> bool {
        self.kind == SegmentKind::Text
    }

    /// Whether this is a scene image
    pub fn is_image(&self) -> bool {
        self.kind == SegmentKind::Image
    }
}

/// Authoring problems that do not stop flattening
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlattenWarning {
    /// An emotion tag inside another one; the inner label wins
    NestedEmotion { outer: String, inner: String },
}

/// Tag conventions used while flattening
#[derive(Debug, Clone)]
pub struct FlattenOptions {
    /// Uppercase speaker names
    pub speakers: HashSet<String>,
    /// Uppercase image tag prefix
    pub image_marker: String,
    /// Assignment block tag
    pub assignment_tag: String,
    /// Narration block tags
    pub narration_tags: Vec<String>,
    /// Emotion of text outside any emotion tag
    pub default_emotion: String,
    /// Flatten the whole document when it has no narration block
    pub implicit_block: bool,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self::from_config(&NarrationConfig::default())
    }
}

impl FlattenOptions {
    /// Build options from the narration configuration
    pub fn from_config(config: &NarrationConfig) -> Self {
        Self {
            speakers: config.speakers.iter().map(|s| s.trim().to_uppercase()).collect(),
            image_marker: config.image_marker.trim().to_uppercase(),
            assignment_tag: config.assignment_tag.trim().to_string(),
            narration_tags: config.block_tags.iter().map(|t| t.trim().to_string()).collect(),
            default_emotion: config.default_emotion.clone(),
            implicit_block: config.implicit_block,
        }
    }

    /// Add recognized speaker names
    pub fn with_speakers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.speakers
            .extend(names.into_iter().map(|n| n.as_ref().trim().to_uppercase()));
        self
    }

    fn is_narration_tag(&self, tag: &str) -> bool {
        self.narration_tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// Flattened narration
#[derive(Debug, Clone, Default, Serialize)]
pub struct FlattenedScript {
    /// Segments with dense order indices
    pub segments: Vec<Segment>,
    /// Lint warnings
    pub warnings: Vec<FlattenWarning>,
    /// Number of narration blocks found (0 when the implicit block was used)
    pub narration_blocks: usize,
}

/// Segment produced by the walk before orders are assigned
enum Pending {
    Text {
        speaker: String,
        emotion: String,
        text: String,
    },
    Image {
        caption: String,
    },
}

/// Walks markup trees and emits ordered segments
pub struct SegmentFlattener {
    options: FlattenOptions,
}

impl SegmentFlattener {
    /// Create a flattener with the given tag conventions
    pub fn new(options: FlattenOptions) -> Self {
        Self { options }
    }

    /// Flatten the narration blocks of a parsed document
    pub fn flatten(&self, nodes: &[MarkupNode]) -> FlattenedScript {
        let mut blocks = Vec::new();
        for node in nodes {
            self.find_blocks(node, &mut blocks);
        }

        let narration_blocks = blocks.len();
        if blocks.is_empty() {
            if self.options.implicit_block {
                debug!("No narration block found, flattening the whole document");
                blocks.extend(nodes.iter());
            } else {
                warn!("No narration block found, nothing to flatten");
            }
        }

        let mut pending = Vec::new();
        let mut warnings = Vec::new();
        for block in blocks {
            let content = match block {
                MarkupNode::Element { tag, content } if self.options.is_narration_tag(tag) => &**content,
                other => other,
            };
            self.walk(content, "", &self.options.default_emotion, None, &mut pending, &mut warnings);
        }

        let segments = pending
            .into_iter()
            .enumerate()
            .map(|(order, item)| match item {
                Pending::Text { speaker, emotion, text } => Segment::text(order, speaker, emotion, text),
                Pending::Image { caption } => Segment::image(order, caption),
            })
            .collect();

        FlattenedScript {
            segments,
            warnings,
            narration_blocks,
        }
    }

    fn find_blocks<'n>(&self, node: &'n MarkupNode, out: &mut Vec<&'n MarkupNode>) {
        match node {
            MarkupNode::Element { tag, content } => {
                if self.options.is_narration_tag(tag) {
                    out.push(node);
                } else {
                    self.find_blocks(content, out);
                }
            }
            MarkupNode::List(items) => {
                for item in items {
                    self.find_blocks(item, out);
                }
            }
            MarkupNode::Text(_) => {}
        }
    }

    fn walk(
        &self,
        node: &MarkupNode,
        speaker: &str,
        emotion: &str,
        emotion_tag: Option<&str>,
        out: &mut Vec<Pending>,
        warnings: &mut Vec<FlattenWarning>,
    ) {
        match node {
            MarkupNode::Text(text) => {
                if !text.is_empty() {
                    out.push(Pending::Text {
                        speaker: speaker.to_string(),
                        emotion: emotion.to_string(),
                        text: text.clone(),
                    });
                }
            }
            MarkupNode::List(items) => {
                for item in items {
                    self.walk(item, speaker, emotion, emotion_tag, out, warnings);
                }
            }
            MarkupNode::Element { tag, content } => {
                let name = tag.trim();
                let upper = name.to_uppercase();

                if name.eq_ignore_ascii_case(&self.options.assignment_tag) {
                    return;
                }

                // Speaker names take precedence over the image marker
                if self.options.speakers.contains(&upper) {
                    self.walk(content, &upper, emotion, emotion_tag, out, warnings);
                } else if upper.starts_with(&self.options.image_marker) {
                    out.push(Pending::Image {
                        caption: content.text_content().trim().to_string(),
                    });
                } else if self.options.is_narration_tag(name) {
                    self.walk(content, speaker, emotion, emotion_tag, out, warnings);
                } else {
                    if let Some(outer) = emotion_tag {
                        warn!("Emotion tag <{}> nested inside <{}>", name, outer);
                        warnings.push(FlattenWarning::NestedEmotion {
                            outer: outer.to_string(),
                            inner: name.to_string(),
                        });
                    }
                    self.walk(content, speaker, name, Some(name), out, warnings);
                }
            }
        }
    }
}
