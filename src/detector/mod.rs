//! Script block detection in raw model output
//!
//! Scripts are embedded between literal `<tool-calls>` and `</tool-calls>`
//! tags, non-nesting. Detection requires a matching close tag; the counting
//! utilities are deliberately more lenient and also see unterminated opening
//! tags, so the two can disagree on partial input.

use serde::{Deserialize, Serialize};

/// Opening delimiter for embedded scripts
pub const OPEN_TAG: &str = "<tool-calls>";

/// Closing delimiter for embedded scripts
pub const CLOSE_TAG: &str = "</tool-calls>";

/// A detected script block, discarded after parsing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptBlock {
    /// Embedding format marker
    pub format: String,

    /// Trimmed script source between the tags
    pub code: String,

    /// Script language
    pub language: String,

    /// Byte offset of the opening tag in the original text
    pub start_index: usize,

    /// Byte offset just past the closing tag
    pub end_index: usize,
}

/// One piece of a segmented model response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Segment {
    /// Plain conversational text
    Text { text: String },

    /// A script block; `text` is the raw slice including tags
    Script {
        index: usize,
        text: String,
        code: String,
    },
}

impl Segment {
    /// Raw text of this segment as it appeared in the input
    pub fn raw(&self) -> &str {
        match self {
            Segment::Text { text } => text,
            Segment::Script { text, .. } => text,
        }
    }
}

/// Result of structural validation of the embedding tags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XmlValidation {
    pub valid: bool,
    pub issues: Vec<String>,
}

/// Find all well-formed script blocks in order of appearance.
///
/// A block requires a matching close tag; an unterminated opening tag yields
/// no block. Tags do not nest, so pairing is first-close-after-open.
pub fn detect_script_blocks(text: &str) -> Vec<ScriptBlock> {
    let mut blocks = Vec::new();
    let mut cursor = 0;

    while let Some(rel_open) = text[cursor..].find(OPEN_TAG) {
        let open_at = cursor + rel_open;
        let code_start = open_at + OPEN_TAG.len();

        let Some(rel_close) = text[code_start..].find(CLOSE_TAG) else {
            break;
        };
        let close_at = code_start + rel_close;
        let end = close_at + CLOSE_TAG.len();

        blocks.push(ScriptBlock {
            format: "tool-calls".to_string(),
            code: text[code_start..close_at].trim().to_string(),
            language: "javascript".to_string(),
            start_index: open_at,
            end_index: end,
        });
        cursor = end;
    }

    blocks
}

/// Partition text into ordered text/script segments.
///
/// Concatenating the raw text of every segment reconstructs the input
/// exactly, including unterminated tags (which stay in a text segment).
pub fn segment_text(text: &str) -> Vec<Segment> {
    let blocks = detect_script_blocks(text);
    let mut segments = Vec::new();
    let mut cursor = 0;

    for (index, block) in blocks.iter().enumerate() {
        if block.start_index > cursor {
            segments.push(Segment::Text {
                text: text[cursor..block.start_index].to_string(),
            });
        }
        segments.push(Segment::Script {
            index,
            text: text[block.start_index..block.end_index].to_string(),
            code: block.code.clone(),
        });
        cursor = block.end_index;
    }

    if cursor < text.len() {
        segments.push(Segment::Text {
            text: text[cursor..].to_string(),
        });
    }

    segments
}

/// Reassemble segmented text
pub fn reconstruct(segments: &[Segment]) -> String {
    segments.iter().map(Segment::raw).collect()
}

/// Validate tag structure independently of detection.
///
/// Flags nesting, unbalanced open/close counts, and closes with no matching
/// open. Well-formedness here is advisory; detection does not enforce it.
pub fn validate_xml_structure(text: &str) -> XmlValidation {
    let mut issues = Vec::new();
    let mut depth: usize = 0;
    let mut opens = 0;
    let mut closes = 0;
    let mut i = 0;

    while i < text.len() {
        if text[i..].starts_with(OPEN_TAG) {
            opens += 1;
            if depth > 0 {
                issues.push(format!("nested opening tag at byte {}", i));
            }
            depth += 1;
            i += OPEN_TAG.len();
        } else if text[i..].starts_with(CLOSE_TAG) {
            closes += 1;
            if depth == 0 {
                issues.push(format!("closing tag with no matching open at byte {}", i));
            } else {
                depth -= 1;
            }
            i += CLOSE_TAG.len();
        } else {
            // Advance one char, respecting UTF-8 boundaries
            i += text[i..].chars().next().map_or(1, char::len_utf8);
        }
    }

    if opens != closes {
        issues.push(format!(
            "unbalanced tags: {} opening, {} closing",
            opens, closes
        ));
    }

    XmlValidation {
        valid: issues.is_empty(),
        issues,
    }
}

/// Lenient presence check: partial tags count
pub fn has_script_blocks(text: &str) -> bool {
    text.contains("<tool-calls")
}

/// Count opening tags, including unterminated ones.
///
/// Deliberately more lenient than [`detect_script_blocks`]: the two disagree
/// on partial input and both behaviors are part of the contract.
pub fn count_script_blocks(text: &str) -> usize {
    text.match_indices(OPEN_TAG).count()
}

/// Extract just the trimmed code from every well-formed block
pub fn extract_script_code(text: &str) -> Vec<String> {
    detect_script_blocks(text)
        .into_iter()
        .map(|b| b.code)
        .collect()
}

/// Strip well-formed script blocks, leaving the surrounding text
pub fn remove_script_blocks(text: &str) -> String {
    replace_script_blocks(text, |_| String::new())
}

/// Replace each well-formed block with a placeholder derived from its index
pub fn replace_script_blocks(text: &str, placeholder: impl Fn(usize) -> String) -> String {
    let mut out = String::with_capacity(text.len());
    for segment in segment_text(text) {
        match segment {
            Segment::Text { text } => out.push_str(&text),
            Segment::Script { index, .. } => out.push_str(&placeholder(index)),
        }
    }
    out
}
