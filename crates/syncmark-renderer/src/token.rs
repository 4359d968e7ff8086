//! Token model and tokenizer.
//!
//! The tokenizer drives pulldown-cmark's offset iterator and turns each event
//! into a [`Token`] carrying the block nesting level and, for block tokens, the
//! source line range the block was parsed from.

use std::ops::Range;

use pulldown_cmark::{CodeBlockKind, CowStr, Event, Options, Parser, Tag, TagEnd};

use crate::code_block::parse_fence_info;

/// Source line range of a block token.
///
/// Lines are 0-based, `end` is exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceMap {
    pub start: usize,
    pub end: usize,
}

/// Emoji recognized in text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Emoji {
    /// The emoji itself as Unicode text.
    pub text: String,
    /// Shortcode it was written as (`smile` for `:smile:`), if any.
    pub shortcode: Option<String>,
}

/// What a token represents.
#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind<'a> {
    Open(Tag<'a>),
    Close(TagEnd),
    Text(CowStr<'a>),
    Code(CowStr<'a>),
    Html(CowStr<'a>),
    SoftBreak,
    HardBreak,
    Rule,
    TaskListMarker(bool),
    /// Fenced or indented code block, collapsed into a single token.
    Fence {
        language: Option<String>,
        content: String,
    },
    /// Math inside running text. `display` is set for `$$...$$`.
    Math {
        source: CowStr<'a>,
        display: bool,
    },
    /// Display math occupying a whole block.
    MathBlock(CowStr<'a>),
    Emoji(Emoji),
}

/// Key used to look up render overrides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TokenType {
    Open,
    Close,
    Text,
    Code,
    Html,
    Break,
    Rule,
    TaskListMarker,
    Fence,
    Math,
    MathBlock,
    Emoji,
}

/// A single parsed token.
#[derive(Clone, Debug, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    /// Line range for block tokens; inline tokens have none.
    pub source_map: Option<SourceMap>,
    /// Depth in the block tree, 0 for blocks directly under the document.
    pub level: usize,
    /// Extra attributes, e.g. `key=value` pairs from a fence info string.
    pub attrs: Vec<(String, String)>,
}

impl<'a> Token<'a> {
    /// Create an inline token at the given level.
    #[must_use]
    pub fn new(kind: TokenKind<'a>, level: usize) -> Self {
        Self {
            kind,
            source_map: None,
            level,
            attrs: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_source_map(mut self, source_map: Option<SourceMap>) -> Self {
        self.source_map = source_map;
        self
    }

    /// Look up an attribute by key.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn token_type(&self) -> TokenType {
        match self.kind {
            TokenKind::Open(_) => TokenType::Open,
            TokenKind::Close(_) => TokenType::Close,
            TokenKind::Text(_) => TokenType::Text,
            TokenKind::Code(_) => TokenType::Code,
            TokenKind::Html(_) => TokenType::Html,
            TokenKind::SoftBreak | TokenKind::HardBreak => TokenType::Break,
            TokenKind::Rule => TokenType::Rule,
            TokenKind::TaskListMarker(_) => TokenType::TaskListMarker,
            TokenKind::Fence { .. } => TokenType::Fence,
            TokenKind::Math { .. } => TokenType::Math,
            TokenKind::MathBlock(_) => TokenType::MathBlock,
            TokenKind::Emoji(_) => TokenType::Emoji,
        }
    }

    /// Whether this token is part of the block structure rather than inline content.
    pub fn is_block(&self) -> bool {
        match &self.kind {
            TokenKind::Open(tag) => is_block_tag(tag),
            TokenKind::Close(end) => is_block_end(end),
            TokenKind::Fence { .. } | TokenKind::MathBlock(_) | TokenKind::Rule => true,
            _ => false,
        }
    }
}

fn is_block_tag(tag: &Tag<'_>) -> bool {
    matches!(
        tag,
        Tag::Paragraph
            | Tag::Heading { .. }
            | Tag::BlockQuote(_)
            | Tag::CodeBlock(_)
            | Tag::HtmlBlock
            | Tag::List(_)
            | Tag::Item
            | Tag::FootnoteDefinition(_)
            | Tag::DefinitionList
            | Tag::DefinitionListTitle
            | Tag::DefinitionListDefinition
            | Tag::Table(_)
            | Tag::TableHead
            | Tag::TableRow
            | Tag::TableCell
            | Tag::MetadataBlock(_)
    )
}

fn is_block_end(end: &TagEnd) -> bool {
    matches!(
        end,
        TagEnd::Paragraph
            | TagEnd::Heading(_)
            | TagEnd::BlockQuote(_)
            | TagEnd::CodeBlock
            | TagEnd::HtmlBlock
            | TagEnd::List(_)
            | TagEnd::Item
            | TagEnd::FootnoteDefinition
            | TagEnd::DefinitionList
            | TagEnd::DefinitionListTitle
            | TagEnd::DefinitionListDefinition
            | TagEnd::Table
            | TagEnd::TableHead
            | TagEnd::TableRow
            | TagEnd::TableCell
            | TagEnd::MetadataBlock(_)
    )
}

/// Attribute set on text that starts with a backslash-escaped character.
pub(crate) const ESCAPED_ATTR: &str = "escaped";

/// Whether the text at `range` begins right after an escaping backslash.
fn is_escaped(source: &str, range: &Range<usize>) -> bool {
    let bytes = source.as_bytes();
    range.start > 0
        && bytes[range.start - 1] == b'\\'
        && bytes.get(range.start).is_some_and(u8::is_ascii_punctuation)
}

/// Byte offset to line number lookup.
pub(crate) struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    pub(crate) fn new(source: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { starts }
    }

    /// 0-based line containing the byte at `offset`.
    pub(crate) fn line_of(&self, offset: usize) -> usize {
        self.starts.partition_point(|&start| start <= offset) - 1
    }

    pub(crate) fn source_map(&self, range: &Range<usize>) -> SourceMap {
        let start = self.line_of(range.start);
        let last = range.end.saturating_sub(1).max(range.start);
        SourceMap {
            start,
            end: self.line_of(last) + 1,
        }
    }
}

/// Code block being collected into a [`TokenKind::Fence`].
struct PendingFence {
    language: Option<String>,
    attrs: Vec<(String, String)>,
    content: String,
    source_map: SourceMap,
    level: usize,
}

/// Tokenize markdown source.
pub fn tokenize(source: &str, options: Options) -> Vec<Token<'_>> {
    let index = LineIndex::new(source);
    let mut tokens = Vec::new();
    let mut depth = 0usize;
    let mut fence: Option<PendingFence> = None;

    for (event, range) in Parser::new_ext(source, options).into_offset_iter() {
        if let Some(pending) = fence.as_mut() {
            match event {
                Event::Text(text) => pending.content.push_str(&text),
                Event::End(TagEnd::CodeBlock) => {
                    if let Some(done) = fence.take() {
                        tokens.push(Token {
                            kind: TokenKind::Fence {
                                language: done.language,
                                content: done.content,
                            },
                            source_map: Some(done.source_map),
                            level: done.level,
                            attrs: done.attrs,
                        });
                    }
                }
                _ => {}
            }
            continue;
        }

        let token = match event {
            Event::Start(Tag::CodeBlock(kind)) => {
                let (language, attrs) = match kind {
                    CodeBlockKind::Fenced(ref info) if !info.trim().is_empty() => {
                        let (language, attrs) = parse_fence_info(info);
                        let mut attrs: Vec<_> = attrs.into_iter().collect();
                        attrs.sort();
                        (Some(language), attrs)
                    }
                    _ => (None, Vec::new()),
                };
                fence = Some(PendingFence {
                    language,
                    attrs,
                    content: String::new(),
                    source_map: index.source_map(&range),
                    level: depth,
                });
                continue;
            }
            Event::Start(tag) => {
                let block = is_block_tag(&tag);
                let token = Token::new(TokenKind::Open(tag), depth);
                if block {
                    depth += 1;
                    token.with_source_map(Some(index.source_map(&range)))
                } else {
                    token
                }
            }
            Event::End(end) => {
                if is_block_end(&end) {
                    depth = depth.saturating_sub(1);
                }
                Token::new(TokenKind::Close(end), depth)
            }
            Event::Text(text) => {
                let escaped = is_escaped(source, &range);
                let mut token = Token::new(TokenKind::Text(text), depth);
                if escaped {
                    token.attrs.push((ESCAPED_ATTR.to_owned(), String::new()));
                }
                token
            }
            Event::Code(code) => Token::new(TokenKind::Code(code), depth),
            Event::Html(html) | Event::InlineHtml(html) => {
                Token::new(TokenKind::Html(html), depth)
            }
            Event::InlineMath(source) => Token::new(
                TokenKind::Math {
                    source,
                    display: false,
                },
                depth,
            ),
            Event::DisplayMath(source) => Token::new(
                TokenKind::Math {
                    source,
                    display: true,
                },
                depth,
            ),
            Event::SoftBreak => Token::new(TokenKind::SoftBreak, depth),
            Event::HardBreak => Token::new(TokenKind::HardBreak, depth),
            Event::Rule => {
                Token::new(TokenKind::Rule, depth).with_source_map(Some(index.source_map(&range)))
            }
            Event::TaskListMarker(checked) => Token::new(TokenKind::TaskListMarker(checked), depth),
            Event::FootnoteReference(_) => continue,
        };
        tokens.push(token);
    }

    tokens
}
