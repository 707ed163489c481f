//! Detection of incomplete interactive input.
//!
//! An interactive console keeps reading lines until the buffered source forms
//! a complete statement. The rules here are deliberately shallow (no parsing):
//! a trailing line continuation, an unclosed bracket or triple-quoted string,
//! a last significant line ending in `:`, or a pending decorator all mean
//! "more input needed".
//!
//! Input typed line by line follows console rules on top of that: once a
//! block is open, indented lines keep extending it and a blank line closes it
//! (see [`continues_block`] and [`is_blank`]).

use crate::error::RelayError;

/// Returns `true` for a submission with nothing but whitespace.
///
/// While a statement is buffered, such a submission is the terminator that
/// runs it rather than an empty request.
#[must_use]
pub fn is_blank(code: &str) -> bool {
    code.trim().is_empty()
}

/// Rejects submissions that are empty after trimming.
///
/// Runs before any engine is involved, so an empty payload never costs a
/// context or touches a session.
pub fn validate_submission(code: &str) -> Result<(), RelayError> {
    if is_blank(code) {
        return Err(RelayError::Validation("code must not be empty".to_owned()));
    }
    Ok(())
}

/// Returns `true` when `source` cannot be executed yet because the statement
/// it starts is still open.
#[must_use]
pub fn needs_more_input(source: &str) -> bool {
    let trimmed = source.trim_end();
    if trimmed.is_empty() {
        return false;
    }
    if trimmed.ends_with('\\') {
        return true;
    }

    let scan = scan(trimmed);
    if scan.open_triple_quote || scan.bracket_depth > 0 {
        return true;
    }
    scan.last_significant == Some(':') || last_line(trimmed).trim_start().starts_with('@')
}

/// Returns `true` when `buffer`, built from lines submitted one at a time,
/// is still inside an open block: its last line is indented or a decorator.
///
/// Only meaningful for continuation input. A whole block sent as a single
/// submission is complete as soon as [`needs_more_input`] says so.
#[must_use]
pub fn continues_block(buffer: &str) -> bool {
    let line = last_line(buffer.trim_end_matches(['\n', '\r']));
    if line.trim().is_empty() {
        return false;
    }
    line.starts_with([' ', '\t']) || line.trim_start().starts_with('@')
}

fn last_line(source: &str) -> &str {
    source.rsplit('\n').next().unwrap_or(source)
}

/// Summary of a lexical pass over the source.
struct Scan {
    /// Unclosed `(`, `[` and `{` outside of strings and comments.
    bracket_depth: i32,
    /// A `'''` or `"""` string is still open at end of input.
    open_triple_quote: bool,
    /// Last character outside strings and comments, ignoring whitespace.
    last_significant: Option<char>,
}

fn scan(source: &str) -> Scan {
    let chars: Vec<char> = source.chars().collect();
    let mut bracket_depth = 0i32;
    let mut last_significant = None;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '\'' | '"' => {
                let triple = i + 2 < chars.len() && chars[i + 1] == ch && chars[i + 2] == ch;
                let Some(end) = skip_string(&chars, i, ch, triple) else {
                    return Scan {
                        bracket_depth,
                        open_triple_quote: triple,
                        last_significant: Some(ch),
                    };
                };
                last_significant = Some(ch);
                i = end;
                continue;
            }
            '(' | '[' | '{' => bracket_depth += 1,
            ')' | ']' | '}' => bracket_depth -= 1,
            _ => {}
        }
        if !ch.is_whitespace() {
            last_significant = Some(ch);
        }
        i += 1;
    }

    Scan {
        bracket_depth,
        open_triple_quote: false,
        last_significant,
    }
}

/// Skips a string literal starting at `start`, returning the index just past
/// its closing quote, or `None` if it runs to the end of input.
///
/// An unterminated single-quoted string stops at the end of its line.
fn skip_string(chars: &[char], start: usize, quote: char, triple: bool) -> Option<usize> {
    let mut i = start + if triple { 3 } else { 1 };
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '\n' if !triple => return Some(i),
            c if c == quote => {
                if !triple {
                    return Some(i + 1);
                }
                if i + 2 < chars.len() && chars[i + 1] == quote && chars[i + 2] == quote {
                    return Some(i + 3);
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
    if triple { None } else { Some(chars.len()) }
}
