/*!
 * Fault-tolerant parser for narration markup.
 *
 * The markup looks like XML but is written by a language model, so it is
 * frequently broken: closing tags that do not match, opening tags that never
 * end, stray text between blocks. The parser never fails. Every problem is
 * recorded as a `ParseDiagnostic`, logged, and parsing continues with the
 * closest sensible interpretation.
 */

use log::warn;
use serde::Serialize;
use std::fmt;

/// Elements nested deeper than this are dropped as malformed
const MAX_DEPTH: usize = 128;

/// One node of the parsed markup tree.
///
/// Element content is collapsed while parsing: pure text children become a
/// single `Text`, a single child replaces the list, anything else stays a
/// `List`. An emotion tag around plain text and an emotion tag around one
/// nested element therefore look the same to the flattener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkupNode {
    /// Trimmed text run
    Text(String),
    /// Tagged element with its collapsed content
    Element {
        /// First token of the opening tag
        tag: String,
        /// Collapsed children
        content: Box<MarkupNode>,
    },
    /// Ordered children that could not be collapsed
    List(Vec<MarkupNode>),
}

impl MarkupNode {
    /// Build an element node
    pub fn element(tag: impl Into<String>, content: MarkupNode) -> Self {
        Self::Element {
            tag: tag.into(),
            content: Box::new(content),
        }
    }

    /// Build a text node
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Tag name if this node is an element
    pub fn tag(&self) -> Option<&str> {
        match self {
            Self::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    /// All text below this node, joined by single spaces
    pub fn text_content(&self) -> String {
        let mut parts = Vec::new();
        self.collect_text(&mut parts);
        parts.join(" ")
    }

    fn collect_text<'a>(&'a self, parts: &mut Vec<&'a str>) {
        match self {
            Self::Text(text) => {
                if !text.is_empty() {
                    parts.push(text);
                }
            }
            Self::Element { content, .. } => content.collect_text(parts),
            Self::List(items) => {
                for item in items {
                    item.collect_text(parts);
                }
            }
        }
    }
}

/// Kind of recoverable problem found while parsing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// `</found>` closed an element opened as `<expected>`
    MismatchedClosingTag { expected: String, found: String },
    /// Opening tag without `>` or without a name
    MalformedTag,
    /// Input ended before the element was closed
    UnterminatedElement { tag: String },
    /// Closing tag outside of any element
    StrayClosingTag { tag: String },
    /// Nesting exceeded the supported depth
    DepthExceeded,
}

/// A recoverable parse problem and the byte offset where it was found
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseDiagnostic {
    /// Byte offset into the source
    pub position: usize,
    /// What went wrong
    pub kind: DiagnosticKind,
}

impl fmt::Display for ParseDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DiagnosticKind::MismatchedClosingTag { expected, found } => write!(
                f,
                "Mismatched closing tag at {}: expected </{}> but found </{}>",
                self.position, expected, found
            ),
            DiagnosticKind::MalformedTag => {
                write!(f, "Malformed tag at {}, fragment skipped", self.position)
            }
            DiagnosticKind::UnterminatedElement { tag } => {
                write!(f, "Element <{}> opened at {} is never closed", tag, self.position)
            }
            DiagnosticKind::StrayClosingTag { tag } => {
                write!(f, "Stray closing tag </{}> at {}", tag, self.position)
            }
            DiagnosticKind::DepthExceeded => write!(
                f,
                "Nesting deeper than {} levels at {}, tag skipped",
                MAX_DEPTH, self.position
            ),
        }
    }
}

/// Result of parsing a whole document
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParsedDocument {
    /// Top-level elements in document order
    pub nodes: Vec<MarkupNode>,
    /// Problems recovered from
    pub diagnostics: Vec<ParseDiagnostic>,
}

impl ParsedDocument {
    /// Whether the document parsed without any diagnostic
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Parse a full narration document
pub fn parse_document(source: &str) -> ParsedDocument {
    MarkupParser::new(source).parse()
}

/// Recursive-descent parser over the raw markup
pub struct MarkupParser<'a> {
    source: &'a str,
    pos: usize,
    diagnostics: Vec<ParseDiagnostic>,
}

impl<'a> MarkupParser<'a> {
    /// Create a parser over the given source
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            pos: 0,
            diagnostics: Vec::new(),
        }
    }

    /// Parse the whole source into top-level nodes.
    ///
    /// Text between top-level elements is not part of any element and is dropped.
    pub fn parse(mut self) -> ParsedDocument {
        let mut nodes = Vec::new();

        while self.pos < self.source.len() {
            match self.find(self.pos, '<') {
                Some(lt) => self.pos = lt,
                None => break,
            }

            if self.rest().starts_with("</") {
                let start = self.pos;
                let (tag, end) = self.closing_tag_at(start);
                self.record(start, DiagnosticKind::StrayClosingTag { tag });
                self.pos = end;
                continue;
            }

            let start = self.pos;
            match self.parse_element(0) {
                Ok(node) => nodes.push(node),
                Err(kind) => {
                    if !self.recover(start, kind) {
                        break;
                    }
                }
            }
        }

        ParsedDocument {
            nodes,
            diagnostics: self.diagnostics,
        }
    }

    fn rest(&self) -> &'a str {
        &self.source[self.pos..]
    }

    fn find(&self, from: usize, needle: char) -> Option<usize> {
        self.source[from..].find(needle).map(|offset| from + offset)
    }

    fn record(&mut self, position: usize, kind: DiagnosticKind) {
        let diagnostic = ParseDiagnostic { position, kind };
        warn!("{}", diagnostic);
        self.diagnostics.push(diagnostic);
    }

    /// Skip a tag that could not be parsed. Returns false when nothing is left.
    fn recover(&mut self, start: usize, kind: DiagnosticKind) -> bool {
        self.record(start, kind);
        match self.find(start, '>') {
            Some(gt) => {
                self.pos = gt + 1;
                true
            }
            None => {
                self.pos = self.source.len();
                false
            }
        }
    }

    /// Name of the closing tag starting at `start` and the offset just past it.
    ///
    /// A closing tag without `>` ends at the next `<` (not consumed) or at the
    /// end of input.
    fn closing_tag_at(&self, start: usize) -> (String, usize) {
        let body_start = start + 2;
        let stop = self.source[body_start..]
            .find(&['>', '<'][..])
            .map(|offset| body_start + offset);

        let (body, end) = match stop {
            Some(idx) if self.source.as_bytes()[idx] == b'>' => (&self.source[body_start..idx], idx + 1),
            Some(idx) => (&self.source[body_start..idx], idx),
            None => (&self.source[body_start..], self.source.len()),
        };

        let name = body.split_whitespace().next().unwrap_or("").to_string();
        (name, end)
    }

    /// Parse one element starting at the current `<`
    fn parse_element(&mut self, depth: usize) -> Result<MarkupNode, DiagnosticKind> {
        if depth >= MAX_DEPTH {
            return Err(DiagnosticKind::DepthExceeded);
        }

        let start = self.pos;
        let gt = self.find(start + 1, '>').ok_or(DiagnosticKind::MalformedTag)?;
        let tag = self.source[start + 1..gt]
            .split_whitespace()
            .next()
            .ok_or(DiagnosticKind::MalformedTag)?
            .to_string();
        self.pos = gt + 1;

        let mut children = Vec::new();
        let mut closed = false;

        while self.pos < self.source.len() {
            let rest = self.rest();
            if rest.starts_with("</") {
                let close_start = self.pos;
                let (found, end) = self.closing_tag_at(close_start);
                if !found.eq_ignore_ascii_case(&tag) {
                    self.record(
                        close_start,
                        DiagnosticKind::MismatchedClosingTag {
                            expected: tag.clone(),
                            found,
                        },
                    );
                }
                self.pos = end;
                closed = true;
                break;
            } else if rest.starts_with('<') {
                let child_start = self.pos;
                match self.parse_element(depth + 1) {
                    Ok(child) => children.push(child),
                    Err(kind) => {
                        if !self.recover(child_start, kind) {
                            break;
                        }
                    }
                }
            } else {
                let end = self.find(self.pos, '<').unwrap_or(self.source.len());
                let text = self.source[self.pos..end].trim();
                if !text.is_empty() {
                    children.push(MarkupNode::Text(text.to_string()));
                }
                self.pos = end;
            }
        }

        if !closed {
            self.record(start, DiagnosticKind::UnterminatedElement { tag: tag.clone() });
        }

        Ok(MarkupNode::element(tag, collapse(children)))
    }
}

/// Apply the collapsing rule to the children of one element
fn collapse(mut children: Vec<MarkupNode>) -> MarkupNode {
    let all_text = !children.is_empty()
        && children.iter().all(|child| matches!(child, MarkupNode::Text(_)));

    if all_text {
        let joined = children
            .iter()
            .filter_map(|child| match child {
                MarkupNode::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" ");
        MarkupNode::Text(joined)
    } else if children.len() == 1 {
        children.remove(0)
    } else {
        MarkupNode::List(children)
    }
}
