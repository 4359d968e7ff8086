//! Source line mapping for scroll synchronisation.
//!
//! While rendering, every top-level paragraph, heading and blockquote gets a
//! `line` class and a `data-line` attribute holding its 1-based starting
//! source line. The same numbers are collected into a [`LineMap`] so an editor
//! can find the preview element closest to its cursor.

use crate::registry::{AttributeDecorator, Decoration};
use crate::token::{Token, TokenKind};
use pulldown_cmark::Tag;

/// Ordered 1-based starting lines of the mapped blocks of one render.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LineMap {
    lines: Vec<usize>,
}

impl LineMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line. Lines arrive in document order and never decrease.
    pub fn push(&mut self, line: usize) {
        debug_assert!(self.lines.last().is_none_or(|&last| last <= line));
        self.lines.push(line);
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Largest mapped line that is `<= line`.
    ///
    /// Returns `None` when the map is empty or `line` precedes every entry.
    pub fn closest_line(&self, line: usize) -> Option<usize> {
        let after = self.lines.partition_point(|&l| l <= line);
        after.checked_sub(1).map(|i| self.lines[i])
    }
}

/// 1-based start line of a top-level paragraph, heading or blockquote.
///
/// Every other token is unmapped.
pub(crate) fn mapped_line(token: &Token<'_>) -> Option<usize> {
    if token.level != 0 {
        return None;
    }
    let TokenKind::Open(Tag::Paragraph | Tag::Heading { .. } | Tag::BlockQuote(_)) = &token.kind
    else {
        return None;
    };
    Some(token.source_map?.start + 1)
}

/// Attribute decorator producing `data-line` attributes.
#[derive(Clone, Copy, Debug, Default)]
pub struct LineMapper;

impl AttributeDecorator for LineMapper {
    fn decorate(&self, token: &Token<'_>) -> Option<Decoration> {
        let line = mapped_line(token)?;
        Some(Decoration {
            classes: vec!["line".to_owned()],
            attrs: vec![("data-line".to_owned(), line.to_string())],
            line: Some(line),
        })
    }
}
