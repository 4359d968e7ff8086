//! Emoji recognition and image rendering.
//!
//! [`EmojiRule`] turns `:shortcode:` sequences and Unicode emoji in text into
//! emoji tokens. [`EmojiOverride`] renders them as images whose path is a pure
//! function of the emoji's codepoints.

use std::fmt::Write;
use std::sync::{Arc, LazyLock};

use pulldown_cmark::{CowStr, Tag, TagEnd};
use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

use crate::code_block::ProcessResult;
use crate::registry::{InlineRule, RenderContext, RenderOverride};
use crate::state::escape_html;
use crate::token::{Emoji, Token, TokenKind, TokenType};

/// Default location of the Twemoji SVG set.
pub const DEFAULT_ASSET_BASE: &str = "/_assets/svg/twemoji";

static SHORTCODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":([a-z0-9_+\-]+):").unwrap());

const ZWJ: char = '\u{200D}';
const VARIATION_SELECTOR: char = '\u{FE0F}';
const KEYCAP: char = '\u{20E3}';

/// Maps an emoji's codepoint sequence to an asset path.
pub trait EmojiAssets: Send + Sync {
    /// `codepoints` is lowercase hex joined by `-`, e.g. `1f44d` or `1f468-200d-1f4bb`.
    fn asset_path(&self, codepoints: &str) -> String;
}

/// Twemoji SVG files under a fixed base path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TwemojiAssets {
    base: String,
}

impl Default for TwemojiAssets {
    fn default() -> Self {
        Self::new(DEFAULT_ASSET_BASE)
    }
}

impl TwemojiAssets {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        let base = base.trim_end_matches('/').to_owned();
        Self { base }
    }
}

impl EmojiAssets for TwemojiAssets {
    fn asset_path(&self, codepoints: &str) -> String {
        format!("{}/{codepoints}.svg", self.base)
    }
}

/// Codepoint key used for asset file names.
///
/// The emoji presentation selector (U+FE0F) is dropped unless the emoji is a
/// ZWJ sequence.
pub fn codepoints(emoji: &str) -> String {
    let keep_selector = emoji.contains(ZWJ);
    let mut out = String::new();
    for c in emoji
        .chars()
        .filter(|&c| keep_selector || c != VARIATION_SELECTOR)
    {
        if !out.is_empty() {
            out.push('-');
        }
        write!(out, "{:x}", u32::from(c)).unwrap();
    }
    out
}

/// Whether a grapheme is written as an emoji rather than plain text such as a
/// digit or `©`.
///
/// Fully-qualified emoji match their database form exactly (`✅`, `❤️`).
/// Text-default symbols like `©` only qualify with a presentation selector.
fn is_emoji_candidate(grapheme: &str, emoji: &emojis::Emoji) -> bool {
    emoji.as_str() == grapheme
        || grapheme
            .chars()
            .any(|c| u32::from(c) >= 0x1F000 || c == VARIATION_SELECTOR || c == KEYCAP)
}

enum Segment {
    Text(String),
    Emoji(Emoji),
}

/// Push `text` onto `segments`, splitting out Unicode emoji.
fn scan_unicode(text: &str, plain: &mut String, segments: &mut Vec<Segment>) {
    for grapheme in text.graphemes(true) {
        match emojis::get(grapheme).filter(|emoji| is_emoji_candidate(grapheme, emoji)) {
            Some(emoji) => {
                if !plain.is_empty() {
                    segments.push(Segment::Text(std::mem::take(plain)));
                }
                segments.push(Segment::Emoji(Emoji {
                    text: emoji.as_str().to_owned(),
                    shortcode: None,
                }));
            }
            None => plain.push_str(grapheme),
        }
    }
}

fn scan(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut plain = String::new();
    let mut last = 0;

    for caps in SHORTCODE_RE.captures_iter(text) {
        let (Some(whole), Some(code)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let Some(emoji) = emojis::get_by_shortcode(code.as_str()) else {
            continue;
        };
        scan_unicode(&text[last..whole.start()], &mut plain, &mut segments);
        if !plain.is_empty() {
            segments.push(Segment::Text(std::mem::take(&mut plain)));
        }
        segments.push(Segment::Emoji(Emoji {
            text: emoji.as_str().to_owned(),
            shortcode: Some(code.as_str().to_owned()),
        }));
        last = whole.end();
    }

    scan_unicode(&text[last..], &mut plain, &mut segments);
    if !plain.is_empty() {
        segments.push(Segment::Text(plain));
    }
    segments
}

/// Recognizes emoji in text outside links and images.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmojiRule;

impl InlineRule for EmojiRule {
    fn apply<'a>(&self, tokens: Vec<Token<'a>>) -> Vec<Token<'a>> {
        let mut out = Vec::with_capacity(tokens.len());
        let mut in_link = 0usize;

        for token in tokens {
            match &token.kind {
                TokenKind::Open(Tag::Link { .. } | Tag::Image { .. }) => in_link += 1,
                TokenKind::Close(TagEnd::Link | TagEnd::Image) => {
                    in_link = in_link.saturating_sub(1);
                }
                TokenKind::Text(text) if in_link == 0 => {
                    let segments = scan(text);
                    if segments.iter().any(|s| matches!(s, Segment::Emoji(_))) {
                        let level = token.level;
                        out.extend(segments.into_iter().map(|segment| match segment {
                            Segment::Text(text) => {
                                Token::new(TokenKind::Text(CowStr::from(text)), level)
                            }
                            Segment::Emoji(emoji) => Token::new(TokenKind::Emoji(emoji), level),
                        }));
                        continue;
                    }
                }
                _ => {}
            }
            out.push(token);
        }

        out
    }
}

/// Renders emoji tokens as `<img>` elements.
pub struct EmojiOverride {
    assets: Arc<dyn EmojiAssets>,
}

impl EmojiOverride {
    pub fn new(assets: Arc<dyn EmojiAssets>) -> Self {
        Self { assets }
    }
}

impl RenderOverride for EmojiOverride {
    fn token_type(&self) -> TokenType {
        TokenType::Emoji
    }

    fn render(&self, token: &Token<'_>, _ctx: &mut RenderContext<'_>) -> ProcessResult {
        let TokenKind::Emoji(emoji) = &token.kind else {
            return ProcessResult::PassThrough;
        };
        let path = self.assets.asset_path(&codepoints(&emoji.text));
        let mut html = String::new();
        write!(
            html,
            r#"<img class="emoji" draggable="false" alt="{}" src="{}">"#,
            escape_html(&emoji.text),
            escape_html(&path)
        )
        .unwrap();
        ProcessResult::Html(html)
    }
}
