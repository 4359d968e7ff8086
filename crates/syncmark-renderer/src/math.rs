//! LaTeX math: parser rules, macro expansion and MathML rendering.
//!
//! Inline spans (`$...$`) are recognised by the parser once
//! [`MathInlineRule`] enables math syntax; the rule also recovers spans the
//! parser rejected, such as ones with unbalanced braces. [`MathBlockRule`] lifts paragraphs
//! consisting only of display math (`$$...$$`) into standalone math blocks.
//! Both are rendered by [`MathOverride`] through a pluggable [`MathRenderer`];
//! the default [`LatexRenderer`] produces MathML via pulldown-latex.
//!
//! A failing expression never aborts the document: the override logs a
//! warning and emits the escaped source text instead.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::ops::Range;
use std::sync::Arc;

use pulldown_cmark::{CowStr, Options, Tag, TagEnd};
use pulldown_latex::{
    Parser, Storage, config::DisplayMode, config::RenderConfig, mathml::push_mathml,
};

use crate::code_block::ProcessResult;
use crate::registry::{BlockRule, InlineRule, RenderContext, RenderOverride};
use crate::state::escape_html;
use crate::token::{ESCAPED_ATTR, Token, TokenKind, TokenType};

/// Maximum nesting of macro expansions before giving up.
const MAX_MACRO_DEPTH: usize = 16;

/// Math rendering failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MathError {
    /// The expression could not be parsed.
    #[error("invalid expression: {0}")]
    Parse(String),
    /// The parsed expression could not be converted to markup.
    #[error("failed to render expression: {0}")]
    Render(String),
    /// Macro expansion did not terminate.
    #[error("macro `{name}` exceeds maximum expansion depth")]
    MacroDepth { name: String },
    /// A macro was used with fewer arguments than it declares.
    #[error("macro `{name}` is missing argument #{index}")]
    MissingArgument { name: String, index: usize },
}

/// Options passed to a [`MathRenderer`] for one expression.
#[derive(Clone, Copy, Debug)]
pub struct MathOptions<'a> {
    pub display_mode: bool,
    pub macros: &'a MacroTable,
}

/// Converts a math expression (without delimiters) to markup.
pub trait MathRenderer: Send + Sync {
    fn render(&self, expression: &str, options: &MathOptions<'_>) -> Result<String, MathError>;
}

/// User-defined math macros.
///
/// Names are stored with their leading backslash. Expansions may reference
/// arguments as `#1` to `#9`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MacroTable {
    macros: BTreeMap<String, String>,
}

impl MacroTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a macro. A missing leading backslash is added.
    pub fn insert(&mut self, name: impl Into<String>, expansion: impl Into<String>) {
        let name = name.into();
        let name = if name.starts_with('\\') {
            name
        } else {
            format!("\\{name}")
        };
        self.macros.insert(name, expansion.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.macros.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.macros.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Expand all known macros in `latex`.
    pub fn expand(&self, latex: &str) -> Result<String, MathError> {
        if self.macros.is_empty() {
            return Ok(latex.to_owned());
        }
        self.expand_at(latex, 0)
    }

    fn expand_at(&self, latex: &str, depth: usize) -> Result<String, MathError> {
        let mut out = String::with_capacity(latex.len());
        let mut rest = latex;

        while let Some(pos) = rest.find('\\') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            let name_len = after
                .find(|c: char| !c.is_ascii_alphabetic())
                .unwrap_or(after.len());

            if name_len == 0 {
                // Control symbol such as `\\` or `\{`
                let symbol_len = after.chars().next().map_or(0, char::len_utf8);
                out.push_str(&rest[pos..=pos + symbol_len]);
                rest = &after[symbol_len..];
                continue;
            }

            let name = &rest[pos..=pos + name_len];
            rest = &after[name_len..];

            let Some(expansion) = self.get(name) else {
                out.push_str(name);
                continue;
            };
            if depth >= MAX_MACRO_DEPTH {
                return Err(MathError::MacroDepth {
                    name: name.to_owned(),
                });
            }

            let mut args = Vec::new();
            for index in 1..=arity(expansion) {
                let (arg, remaining) =
                    take_argument(rest).ok_or_else(|| MathError::MissingArgument {
                        name: name.to_owned(),
                        index,
                    })?;
                args.push(arg);
                rest = remaining;
            }

            let body = substitute(expansion, &args);
            out.push_str(&self.expand_at(&body, depth + 1)?);
        }

        out.push_str(rest);
        Ok(out)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MacroTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (name, expansion) in iter {
            table.insert(name, expansion);
        }
        table
    }
}

/// Highest `#n` referenced by a macro body.
fn arity(expansion: &str) -> usize {
    let bytes = expansion.as_bytes();
    bytes
        .windows(2)
        .filter(|w| w[0] == b'#' && (b'1'..=b'9').contains(&w[1]))
        .map(|w| usize::from(w[1] - b'0'))
        .max()
        .unwrap_or(0)
}

/// Read one macro argument: a braced group, a control word or a single character.
fn take_argument(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    let first = input.chars().next()?;

    match first {
        '{' => {
            let mut depth = 0usize;
            let mut escaped = false;
            for (i, c) in input.char_indices() {
                if escaped {
                    escaped = false;
                    continue;
                }
                match c {
                    '\\' => escaped = true,
                    '{' => depth += 1,
                    '}' => {
                        depth -= 1;
                        if depth == 0 {
                            return Some((&input[1..i], &input[i + 1..]));
                        }
                    }
                    _ => {}
                }
            }
            None
        }
        '}' => None,
        '\\' => {
            let end = input[1..]
                .find(|c: char| !c.is_ascii_alphabetic())
                .map_or(input.len(), |n| n + 1);
            // A control symbol is two characters long
            let end = if end == 1 {
                1 + input[1..].chars().next().map_or(0, char::len_utf8)
            } else {
                end
            };
            Some((&input[..end], &input[end..]))
        }
        c => Some(input.split_at(c.len_utf8())),
    }
}

/// Replace `#n` placeholders with arguments; `##` is a literal `#`.
fn substitute(expansion: &str, args: &[&str]) -> String {
    let mut out = String::with_capacity(expansion.len());
    let mut chars = expansion.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '#' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('#') => {
                chars.next();
                out.push('#');
            }
            Some(d @ '1'..='9') => {
                chars.next();
                let index = d as usize - '1' as usize;
                out.push_str(args.get(index).copied().unwrap_or_default());
            }
            _ => out.push('#'),
        }
    }
    out
}

/// MathML renderer backed by pulldown-latex.
#[derive(Clone, Copy, Debug, Default)]
pub struct LatexRenderer;

impl MathRenderer for LatexRenderer {
    fn render(&self, expression: &str, options: &MathOptions<'_>) -> Result<String, MathError> {
        let latex = options.macros.expand(expression)?;

        let storage = Storage::new();
        let parser = Parser::new(&latex, &storage);
        let config = RenderConfig {
            display_mode: if options.display_mode {
                DisplayMode::Block
            } else {
                DisplayMode::Inline
            },
            ..Default::default()
        };

        let events: Vec<_> = parser.collect();
        let errors: Vec<String> = events
            .iter()
            .filter_map(|e| e.as_ref().err().map(ToString::to_string))
            .collect();
        if !errors.is_empty() {
            return Err(MathError::Parse(errors.join("; ")));
        }

        let mut mathml = String::new();
        push_mathml(&mut mathml, events.into_iter(), config)
            .map_err(|e| MathError::Render(e.to_string()))?;
        Ok(mathml)
    }
}

/// Enables `$...$` and `$$...$$` in running text.
///
/// The parser only accepts spans whose braces balance. Spans it left as text
/// are picked up here so that a broken formula still reaches the math
/// override and its fallback. Backslash-escaped dollars never delimit math.
#[derive(Clone, Copy, Debug, Default)]
pub struct MathInlineRule;

impl InlineRule for MathInlineRule {
    fn parser_options(&self) -> Options {
        Options::ENABLE_MATH
    }

    fn apply<'a>(&self, tokens: Vec<Token<'a>>) -> Vec<Token<'a>> {
        let mut out = Vec::with_capacity(tokens.len());
        let mut text_run = Vec::new();

        for token in tokens {
            if matches!(token.kind, TokenKind::Text(_)) {
                text_run.push(token);
                continue;
            }
            split_math(&mut text_run, &mut out);
            out.push(token);
        }
        split_math(&mut text_run, &mut out);

        out
    }
}

/// `$` delimited span in a run of text, as byte ranges.
#[derive(Debug, PartialEq, Eq)]
struct MathSpan {
    /// Including delimiters.
    outer: Range<usize>,
    inner: Range<usize>,
    display: bool,
}

/// Drain adjacent text tokens into `out`, turning `$` spans into math tokens.
fn split_math<'a>(run: &mut Vec<Token<'a>>, out: &mut Vec<Token<'a>>) {
    if run.is_empty() {
        return;
    }

    let mut text = String::new();
    let mut literal = Vec::new();
    for token in run.iter() {
        if let TokenKind::Text(part) = &token.kind {
            if token.attr(ESCAPED_ATTR).is_some() {
                literal.push(text.len());
            }
            text.push_str(part);
        }
    }

    let spans = math_spans(&text, &literal);
    if spans.is_empty() {
        out.append(run);
        return;
    }

    let level = run[0].level;
    run.clear();
    let mut last = 0;
    for span in spans {
        if span.outer.start > last {
            out.push(Token::new(
                TokenKind::Text(CowStr::from(text[last..span.outer.start].to_owned())),
                level,
            ));
        }
        out.push(Token::new(
            TokenKind::Math {
                source: CowStr::from(text[span.inner].to_owned()),
                display: span.display,
            },
            level,
        ));
        last = span.outer.end;
    }
    if last < text.len() {
        out.push(Token::new(
            TokenKind::Text(CowStr::from(text[last..].to_owned())),
            level,
        ));
    }
}

/// Find math spans in `text`. Dollars at the `literal` offsets are plain text.
///
/// Inline math must not start or end next to whitespace and its closing `$`
/// must not be followed by a digit, so `$5 and $6` stays text.
fn math_spans(text: &str, literal: &[usize]) -> Vec<MathSpan> {
    let bytes = text.as_bytes();
    let is_dollar = |i: usize| bytes.get(i) == Some(&b'$') && !literal.contains(&i);
    let mut spans = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if !is_dollar(i) {
            i += 1;
            continue;
        }

        if is_dollar(i + 1) {
            let start = i + 2;
            let close = (start..bytes.len()).find(|&j| is_dollar(j) && is_dollar(j + 1));
            match close {
                Some(close) if close > start => {
                    spans.push(MathSpan {
                        outer: i..close + 2,
                        inner: start..close,
                        display: true,
                    });
                    i = close + 2;
                }
                _ => i += 2,
            }
            continue;
        }

        let start = i + 1;
        if bytes.get(start).is_none_or(u8::is_ascii_whitespace) {
            i += 1;
            continue;
        }
        let close = (start + 1..bytes.len()).find(|&j| {
            is_dollar(j)
                && !bytes[j - 1].is_ascii_whitespace()
                && !is_dollar(j + 1)
                && bytes.get(j + 1).is_none_or(|b| !b.is_ascii_digit())
        });
        match close {
            Some(close) => {
                spans.push(MathSpan {
                    outer: i..close + 1,
                    inner: start..close,
                    display: false,
                });
                i = close + 1;
            }
            None => i += 1,
        }
    }

    spans
}

/// Turns paragraphs holding nothing but display math into math blocks.
#[derive(Clone, Copy, Debug, Default)]
pub struct MathBlockRule;

impl BlockRule for MathBlockRule {
    fn parser_options(&self) -> Options {
        Options::ENABLE_MATH
    }

    fn interrupts(&self) -> &[&'static str] {
        &["paragraph", "reference", "blockquote", "list"]
    }

    fn apply<'a>(&self, tokens: Vec<Token<'a>>) -> Vec<Token<'a>> {
        let mut out = Vec::with_capacity(tokens.len());
        let mut tokens = tokens.into_iter();

        while let Some(open) = tokens.next() {
            if !matches!(open.kind, TokenKind::Open(Tag::Paragraph)) {
                out.push(open);
                continue;
            }

            let mut body = Vec::new();
            let mut close = None;
            for token in tokens.by_ref() {
                if matches!(token.kind, TokenKind::Close(TagEnd::Paragraph)) {
                    close = Some(token);
                    break;
                }
                body.push(token);
            }

            match lift_display_math(body) {
                Ok(source) => out.push(
                    Token::new(TokenKind::MathBlock(source), open.level)
                        .with_source_map(open.source_map),
                ),
                Err(body) => {
                    out.push(open);
                    out.extend(body);
                    out.extend(close);
                }
            }
        }

        out
    }
}

/// Extract the expression if `body` is a single display math span surrounded
/// only by whitespace; otherwise hand the tokens back.
fn lift_display_math(body: Vec<Token<'_>>) -> Result<CowStr<'_>, Vec<Token<'_>>> {
    let mut math = 0;
    for token in &body {
        match &token.kind {
            TokenKind::Math { display: true, .. } => math += 1,
            TokenKind::Text(text) if text.trim().is_empty() => {}
            TokenKind::SoftBreak | TokenKind::HardBreak => {}
            _ => return Err(body),
        }
    }
    if math != 1 {
        return Err(body);
    }

    body.into_iter()
        .find_map(|token| match token.kind {
            TokenKind::Math { source, .. } => Some(source),
            _ => None,
        })
        .ok_or_else(Vec::new)
}

/// Renders math tokens, falling back to escaped source on failure.
pub struct MathOverride {
    renderer: Arc<dyn MathRenderer>,
    block: bool,
}

impl MathOverride {
    /// Override for math spans in running text.
    pub fn inline(renderer: Arc<dyn MathRenderer>) -> Self {
        Self {
            renderer,
            block: false,
        }
    }

    /// Override for standalone math blocks.
    pub fn block(renderer: Arc<dyn MathRenderer>) -> Self {
        Self {
            renderer,
            block: true,
        }
    }
}

impl RenderOverride for MathOverride {
    fn token_type(&self) -> TokenType {
        if self.block {
            TokenType::MathBlock
        } else {
            TokenType::Math
        }
    }

    fn render(&self, token: &Token<'_>, ctx: &mut RenderContext<'_>) -> ProcessResult {
        let (source, display_mode) = match &token.kind {
            TokenKind::Math { source, display } if !self.block => (source, *display),
            TokenKind::MathBlock(source) if self.block => (source, true),
            _ => return ProcessResult::PassThrough,
        };

        let options = MathOptions {
            display_mode,
            macros: ctx.macros,
        };
        let markup = match self.renderer.render(source, &options) {
            Ok(markup) => markup,
            Err(e) => {
                tracing::warn!(error = %e, expression = %source, "Failed to render math");
                ctx.warn(format!("math: {e}"));
                escape_html(source)
            }
        };

        if self.block {
            let mut html = String::new();
            write!(html, "<p>{markup}</p>").unwrap();
            ProcessResult::Html(html)
        } else {
            ProcessResult::Html(markup)
        }
    }
}
