//! Pre-execution script validation
//!
//! Lightweight lexical validation, not a grammar: the parser strips a leading
//! BOM, enforces the source size ceiling, scans for banned identifiers as
//! real tokens (string and comment interiors are ignored), and runs a single
//! comment/string-aware pass over delimiters. Failures are returned as
//! values so batch parsing isolates per-item errors.

use crate::errors::{Result, ScriptError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identifiers a script may never reference as real tokens.
///
/// Loaded once into a read-only table; occurrences inside string or comment
/// literals are allowed.
const BANNED_IDENTIFIERS: &[&str] = &[
    "eval",
    "require",
    "process",
    "Function",
    "__proto__",
    "globalThis",
    "importScripts",
    "XMLHttpRequest",
    "constructor",
];

/// Byte-order mark stripped from the front of model-emitted source
const BOM: char = '\u{feff}';

/// A validated script, immutable once produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedScript {
    /// Source after BOM stripping
    pub source_code: String,

    /// SHA-256 hex digest of `source_code`
    pub source_hash: String,

    /// Script language
    pub language: String,

    /// UTF-8 byte length of `source_code`
    pub size_bytes: usize,

    /// Always true for Rust strings; kept for wire fidelity
    pub is_valid_utf8: bool,

    /// Non-fatal findings (e.g. stripped BOM)
    pub warnings: Vec<String>,
}

/// Parser options
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Maximum source size in bytes
    pub max_source_bytes: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_source_bytes: 20_000,
        }
    }
}

/// Validate a script string before execution.
///
/// # Flow
/// 1. Strip a leading BOM, recording a warning
/// 2. Reject oversized source
/// 3. Scan for banned identifiers, reporting every distinct match
/// 4. Scan delimiters for unclosed/mismatched constructs
pub fn parse_script(code: &str, opts: Option<ParseOptions>) -> Result<ParsedScript> {
    let opts = opts.unwrap_or_default();
    let mut warnings = Vec::new();

    let source = match code.strip_prefix(BOM) {
        Some(stripped) => {
            warnings.push("leading byte-order mark stripped".to_string());
            stripped
        }
        None => code,
    };

    let size_bytes = source.len();
    if size_bytes > opts.max_source_bytes {
        return Err(ScriptError::ScriptTooLarge {
            size_bytes,
            max_bytes: opts.max_source_bytes,
        });
    }

    let banned = find_banned_identifiers(source);
    if !banned.is_empty() {
        return Err(ScriptError::BannedIdentifier { identifiers: banned });
    }

    check_delimiters(source)?;

    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let source_hash = format!("{:x}", hasher.finalize());

    Ok(ParsedScript {
        source_code: source.to_string(),
        source_hash,
        language: "javascript".to_string(),
        size_bytes,
        is_valid_utf8: true,
        warnings,
    })
}

/// Parse many scripts independently; results correspond 1:1 by index
pub fn parse_scripts(codes: &[String]) -> Vec<Result<ParsedScript>> {
    codes.iter().map(|c| parse_script(c, None)).collect()
}

/// Boolean convenience over [`parse_script`]
pub fn is_valid_script(code: &str) -> bool {
    parse_script(code, None).is_ok()
}

/// Lexer state shared by the identifier and delimiter scans
#[derive(Debug, Clone, Copy, PartialEq)]
enum LexState {
    Code,
    LineComment,
    BlockComment,
    SingleQuote,
    DoubleQuote,
    Template,
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Collect every distinct banned identifier appearing as a real token.
///
/// String and comment interiors are skipped. Lenient about unclosed
/// constructs; the delimiter scan reports those.
fn find_banned_identifiers(source: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let mut state = LexState::Code;
    let mut chars = source.chars().peekable();
    let mut token = String::new();

    let mut flush = |token: &mut String, found: &mut Vec<String>| {
        if !token.is_empty() {
            if BANNED_IDENTIFIERS.contains(&token.as_str())
                && !found.iter().any(|f| f == token)
            {
                found.push(token.clone());
            }
            token.clear();
        }
    };

    while let Some(c) = chars.next() {
        match state {
            LexState::Code => match c {
                '/' if chars.peek() == Some(&'/') => {
                    flush(&mut token, &mut found);
                    chars.next();
                    state = LexState::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    flush(&mut token, &mut found);
                    chars.next();
                    state = LexState::BlockComment;
                }
                '\'' => {
                    flush(&mut token, &mut found);
                    state = LexState::SingleQuote;
                }
                '"' => {
                    flush(&mut token, &mut found);
                    state = LexState::DoubleQuote;
                }
                '`' => {
                    flush(&mut token, &mut found);
                    state = LexState::Template;
                }
                c if token.is_empty() && is_ident_start(c) => token.push(c),
                c if !token.is_empty() && is_ident_continue(c) => token.push(c),
                _ => flush(&mut token, &mut found),
            },
            LexState::LineComment => {
                if c == '\n' {
                    state = LexState::Code;
                }
            }
            LexState::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = LexState::Code;
                }
            }
            LexState::SingleQuote | LexState::DoubleQuote | LexState::Template => {
                let quote = match state {
                    LexState::SingleQuote => '\'',
                    LexState::DoubleQuote => '"',
                    _ => '`',
                };
                if c == '\\' {
                    chars.next();
                } else if c == quote {
                    state = LexState::Code;
                }
            }
        }
    }
    flush(&mut token, &mut found);

    found
}

/// Single comment/string-aware pass over brackets, quotes, and comments.
///
/// Fails with a specific reason for unclosed or mismatched brackets,
/// unclosed strings, unclosed template literals, and unclosed block
/// comments.
fn check_delimiters(source: &str) -> Result<()> {
    let mut state = LexState::Code;
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match state {
            LexState::Code => match c {
                '/' if matches!(chars.peek(), Some((_, '/'))) => {
                    chars.next();
                    state = LexState::LineComment;
                }
                '/' if matches!(chars.peek(), Some((_, '*'))) => {
                    chars.next();
                    state = LexState::BlockComment;
                }
                '\'' => state = LexState::SingleQuote,
                '"' => state = LexState::DoubleQuote,
                '`' => state = LexState::Template,
                '(' | '[' | '{' => stack.push((c, pos)),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.pop() {
                        Some((open, _)) if open == expected => {}
                        Some((open, open_pos)) => {
                            return Err(ScriptError::ScriptSyntax {
                                reason: format!(
                                    "mismatched bracket: '{}' at byte {} closed by '{}'",
                                    open, open_pos, c
                                ),
                                position: Some(pos),
                            });
                        }
                        None => {
                            return Err(ScriptError::ScriptSyntax {
                                reason: format!("unexpected closing bracket '{}'", c),
                                position: Some(pos),
                            });
                        }
                    }
                }
                _ => {}
            },
            LexState::LineComment => {
                if c == '\n' {
                    state = LexState::Code;
                }
            }
            LexState::BlockComment => {
                if c == '*' && matches!(chars.peek(), Some((_, '/'))) {
                    chars.next();
                    state = LexState::Code;
                }
            }
            LexState::SingleQuote | LexState::DoubleQuote | LexState::Template => {
                let quote = match state {
                    LexState::SingleQuote => '\'',
                    LexState::DoubleQuote => '"',
                    _ => '`',
                };
                if c == '\\' {
                    chars.next();
                } else if c == quote {
                    state = LexState::Code;
                }
            }
        }
    }

    match state {
        LexState::SingleQuote | LexState::DoubleQuote => Err(ScriptError::ScriptSyntax {
            reason: "unclosed string literal".to_string(),
            position: None,
        }),
        LexState::Template => Err(ScriptError::ScriptSyntax {
            reason: "unclosed template literal".to_string(),
            position: None,
        }),
        LexState::BlockComment => Err(ScriptError::ScriptSyntax {
            reason: "unclosed block comment".to_string(),
            position: None,
        }),
        _ => {
            if let Some((open, pos)) = stack.pop() {
                Err(ScriptError::ScriptSyntax {
                    reason: format!("unclosed bracket '{}'", open),
                    position: Some(pos),
                })
            } else {
                Ok(())
            }
        }
    }
}
