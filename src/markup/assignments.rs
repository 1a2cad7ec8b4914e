/*!
 * Voice-assignment block extraction.
 *
 * Assignment blocks declare which voice a speaker uses:
 *
 * ```text
 * <ASSIGN_VOICE>
 * JOHN=Deep male voice, calm;
 * NICOLE=Young_Female_bright;
 * </ASSIGN_VOICE>
 * ```
 *
 * They are read from the raw script with a regex rather than from the parsed
 * tree, so a declaration survives even when the surrounding markup is broken.
 */

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Default assignment tag
pub const DEFAULT_ASSIGNMENT_TAG: &str = "ASSIGN_VOICE";

static DEFAULT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    build_pattern(DEFAULT_ASSIGNMENT_TAG).expect("Invalid assignment block regex")
});

fn build_pattern(tag: &str) -> Result<Regex, regex::Error> {
    let tag = regex::escape(tag.trim());
    Regex::new(&format!(r"(?is)<\s*{tag}\s*>(.*?)</\s*{tag}\s*>"))
}

/// One `NAME=description` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceDeclaration {
    /// Uppercase, trimmed speaker name
    pub name: String,
    /// Trimmed voice description or profile id
    pub description: String,
}

/// Finds assignment blocks in raw script text
#[derive(Debug, Clone)]
pub struct AssignmentScanner {
    pattern: Regex,
}

impl Default for AssignmentScanner {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_PATTERN.clone(),
        }
    }
}

impl AssignmentScanner {
    /// Create a scanner for a custom tag name
    pub fn new(tag: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: build_pattern(tag)?,
        })
    }

    /// Whether the script contains at least one assignment block
    pub fn has_blocks(&self, script: &str) -> bool {
        self.pattern.is_match(script)
    }

    /// Bodies of all assignment blocks in document order
    pub fn blocks<'s>(&self, script: &'s str) -> Vec<&'s str> {
        self.pattern
            .captures_iter(script)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect()
    }

    /// All declarations of all blocks in document order, duplicates included
    pub fn declarations(&self, script: &str) -> Vec<VoiceDeclaration> {
        self.blocks(script)
            .into_iter()
            .flat_map(parse_declarations)
            .collect()
    }

    /// The script with all assignment blocks removed
    pub fn strip(&self, script: &str) -> String {
        self.pattern.replace_all(script, "").into_owned()
    }
}

/// Parse the body of one assignment block
pub fn parse_declarations(block: &str) -> Vec<VoiceDeclaration> {
    block
        .split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter_map(|part| match part.split_once('=') {
            Some((name, description)) => {
                let name = name.trim().to_uppercase();
                let description = description.trim().to_string();
                if name.is_empty() || description.is_empty() {
                    debug!("Ignoring incomplete voice declaration '{}'", part);
                    None
                } else {
                    Some(VoiceDeclaration { name, description })
                }
            }
            None => {
                debug!("Ignoring voice declaration without '=': '{}'", part);
                None
            }
        })
        .collect()
}
