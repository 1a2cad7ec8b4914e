/*!
 * Segment-to-markup rendering.
 *
 * Produces a script that parses and flattens back to the same segments, which
 * is used by the `parse` command to print a normalized script.
 */

use crate::app_config::NarrationConfig;
use crate::markup::flatten::Segment;

/// Tag conventions used when rendering
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Narration block tag wrapping the output
    pub block_tag: String,
    /// Image tag prefix
    pub image_marker: String,
    /// Emotion used for segments without one
    pub default_emotion: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            block_tag: "Audiobook".to_string(),
            image_marker: "IMAGE".to_string(),
            default_emotion: "default".to_string(),
        }
    }
}

impl RenderOptions {
    /// Tag conventions of the narration configuration
    pub fn from_config(config: &NarrationConfig) -> Self {
        let defaults = Self::default();
        Self {
            block_tag: config
                .block_tags
                .first()
                .map(|tag| tag.trim().to_string())
                .unwrap_or(defaults.block_tag),
            image_marker: config.image_marker.trim().to_uppercase(),
            default_emotion: config.default_emotion.clone(),
        }
    }
}

/// Render segments as one narration block
pub fn render_segments(segments: &[Segment], options: &RenderOptions) -> String {
    let mut out = String::new();
    out.push_str(&format!("<{} Narration>\n", options.block_tag));

    let mut image_number = 0usize;
    for segment in segments {
        if segment.is_image() {
            image_number += 1;
            out.push_str(&format!(
                "<{marker} {n}>{caption}</{marker} {n}>\n",
                marker = options.image_marker,
                n = image_number,
                caption = escape(&segment.content),
            ));
            continue;
        }

        // Every line gets an emotion tag so adjacent lines never merge
        let emotion = match segment.emotion_raw.trim() {
            "" => options.default_emotion.as_str(),
            raw => raw,
        };
        let mut line = format!("<{emotion}>{}</{emotion}>", escape(&segment.content));
        if !segment.speaker.is_empty() {
            line = format!("<{speaker}>{line}</{speaker}>", speaker = segment.speaker);
        }
        out.push_str(&line);
        out.push('\n');
    }

    out.push_str(&format!("</{} Narration>\n", options.block_tag));
    out
}

// Text may not contain tag delimiters; there is no escape syntax in the
// markup, so they are dropped.
fn escape(text: &str) -> String {
    text.chars().filter(|c| *c != '<' && *c != '>').collect()
}
