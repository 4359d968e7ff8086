//! Inline rules for line breaks and bare URL autolinking.

use std::sync::LazyLock;

use pulldown_cmark::{CowStr, LinkType, Tag, TagEnd};
use regex::Regex;

use crate::registry::InlineRule;
use crate::token::{Token, TokenKind};

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://[^\s<>]*[^\s<>.,:;!?)\]'\x22]").unwrap()
});

static HTML_LINK_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<a[\s>]").unwrap());

static HTML_LINK_CLOSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</a\s*>").unwrap());

/// Converts single newlines inside paragraphs into `<br>`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Breaks;

impl InlineRule for Breaks {
    fn apply<'a>(&self, tokens: Vec<Token<'a>>) -> Vec<Token<'a>> {
        tokens
            .into_iter()
            .map(|mut token| {
                if token.kind == TokenKind::SoftBreak {
                    token.kind = TokenKind::HardBreak;
                }
                token
            })
            .collect()
    }
}

/// Turns bare `http(s)://` URLs in text into links.
///
/// Text inside Markdown links, images and raw `<a>` elements is left alone.
#[derive(Clone, Copy, Debug, Default)]
pub struct Linkify;

impl InlineRule for Linkify {
    fn apply<'a>(&self, tokens: Vec<Token<'a>>) -> Vec<Token<'a>> {
        let mut out = Vec::with_capacity(tokens.len());
        let mut in_link = 0usize;

        for token in tokens {
            match &token.kind {
                TokenKind::Open(Tag::Link { .. } | Tag::Image { .. }) => in_link += 1,
                TokenKind::Close(TagEnd::Link | TagEnd::Image) => {
                    in_link = in_link.saturating_sub(1);
                }
                TokenKind::Html(html) => {
                    in_link += HTML_LINK_OPEN_RE.find_iter(html).count();
                    in_link = in_link.saturating_sub(HTML_LINK_CLOSE_RE.find_iter(html).count());
                }
                TokenKind::Text(text) if in_link == 0 && URL_RE.is_match(text) => {
                    linkify_text(text, token.level, &mut out);
                    continue;
                }
                _ => {}
            }
            out.push(token);
        }

        out
    }
}

fn linkify_text<'a>(text: &str, level: usize, out: &mut Vec<Token<'a>>) {
    let mut last = 0;
    for m in URL_RE.find_iter(text) {
        if m.start() > last {
            out.push(Token::new(
                TokenKind::Text(CowStr::from(text[last..m.start()].to_owned())),
                level,
            ));
        }
        let url = m.as_str().to_owned();
        out.push(Token::new(
            TokenKind::Open(Tag::Link {
                link_type: LinkType::Autolink,
                dest_url: CowStr::from(url.clone()),
                title: CowStr::Borrowed(""),
                id: CowStr::Borrowed(""),
            }),
            level,
        ));
        out.push(Token::new(TokenKind::Text(CowStr::from(url)), level));
        out.push(Token::new(TokenKind::Close(TagEnd::Link), level));
        last = m.end();
    }
    if last < text.len() {
        out.push(Token::new(
            TokenKind::Text(CowStr::from(text[last..].to_owned())),
            level,
        ));
    }
}
