//! Syntax highlighting for fenced code blocks.
//!
//! [`HighlightOverride`] renders every fence not claimed by an earlier
//! override. Blocks spanning more than one line get a line-number gutter:
//!
//! ```html
//! <pre class="line-numbers"><code class="language-python">...<span aria-hidden="true" class="line-numbers-rows"><span></span>...</span></code></pre>
//! ```

use std::fmt::Write;
use std::sync::Arc;

use syntect::html::{ClassStyle, ClassedHTMLGenerator};
use syntect::parsing::{SyntaxReference, SyntaxSet};
use syntect::util::LinesWithEndings;

use crate::code_block::{ProcessResult, render_plain};
use crate::registry::{RenderContext, RenderOverride};
use crate::state::escape_html;
use crate::token::{Token, TokenKind, TokenType};

/// Options for highlighting one block.
#[derive(Clone, Copy, Debug, Default)]
pub struct HighlightOptions<'a> {
    /// Declared language; `None` requests auto-detection.
    pub language: Option<&'a str>,
    /// Render best-effort instead of failing on unknown languages or bad input.
    pub ignore_illegals: bool,
}

/// Highlighted code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Highlighted {
    /// Markup for the code, without the `<pre><code>` wrapper.
    pub html: String,
    /// Language used, when declared or detected.
    pub language: Option<String>,
    /// Number of rendered lines.
    pub lines: usize,
}

/// Count lines in a block of code; a trailing newline does not start a new line.
pub fn count_lines(code: &str) -> usize {
    let newlines = code.matches('\n').count();
    if code.is_empty() || code.ends_with('\n') {
        newlines
    } else {
        newlines + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HighlightError {
    #[error("unknown language `{0}`")]
    UnknownLanguage(String),
    #[error("highlighting failed: {0}")]
    Syntax(String),
}

/// Converts source code to highlighted markup.
pub trait Highlighter: Send + Sync {
    fn highlight(
        &self,
        code: &str,
        options: &HighlightOptions<'_>,
    ) -> Result<Highlighted, HighlightError>;
}

/// Highlighter emitting syntect CSS classes.
pub struct SyntectHighlighter {
    syntax_set: SyntaxSet,
}

impl Default for SyntectHighlighter {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntectHighlighter {
    /// Create a highlighter with syntect's bundled syntaxes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            syntax_set: SyntaxSet::load_defaults_newlines(),
        }
    }

    fn detect(&self, code: &str) -> Option<&SyntaxReference> {
        let first_line = code.lines().next()?;
        self.syntax_set.find_syntax_by_first_line(first_line)
    }

    fn classed_html(&self, syntax: &SyntaxReference, code: &str) -> Result<String, HighlightError> {
        let mut generator = ClassedHTMLGenerator::new_with_class_style(
            syntax,
            &self.syntax_set,
            ClassStyle::Spaced,
        );
        for line in LinesWithEndings::from(code) {
            generator
                .parse_html_for_line_which_includes_newline(line)
                .map_err(|e| HighlightError::Syntax(e.to_string()))?;
        }
        Ok(generator.finalize())
    }
}

impl Highlighter for SyntectHighlighter {
    fn highlight(
        &self,
        code: &str,
        options: &HighlightOptions<'_>,
    ) -> Result<Highlighted, HighlightError> {
        let (syntax, language) = match options.language {
            Some(language) => match self.syntax_set.find_syntax_by_token(language) {
                Some(syntax) => (syntax, Some(language.to_owned())),
                None if options.ignore_illegals => {
                    (self.syntax_set.find_syntax_plain_text(), Some(language.to_owned()))
                }
                None => return Err(HighlightError::UnknownLanguage(language.to_owned())),
            },
            None => match self.detect(code) {
                Some(syntax) => (
                    syntax,
                    Some(
                        syntax
                            .file_extensions
                            .first()
                            .cloned()
                            .unwrap_or_else(|| syntax.name.to_lowercase()),
                    ),
                ),
                None => (self.syntax_set.find_syntax_plain_text(), None),
            },
        };

        let html = match self.classed_html(syntax, code) {
            Ok(html) => html,
            Err(e) if options.ignore_illegals => {
                tracing::debug!(error = %e, "Highlighting failed, emitting plain text");
                escape_html(code)
            }
            Err(e) => return Err(e),
        };

        Ok(Highlighted {
            html,
            language,
            lines: count_lines(code),
        })
    }
}

/// Render override highlighting fenced code blocks.
pub struct HighlightOverride {
    highlighter: Arc<dyn Highlighter>,
    line_numbers: bool,
    ignore_illegals: bool,
}

impl HighlightOverride {
    pub fn new(highlighter: Arc<dyn Highlighter>) -> Self {
        Self {
            highlighter,
            line_numbers: true,
            ignore_illegals: true,
        }
    }

    /// Whether multi-line blocks get a line-number gutter.
    #[must_use]
    pub fn line_numbers(mut self, enabled: bool) -> Self {
        self.line_numbers = enabled;
        self
    }

    #[must_use]
    pub fn ignore_illegals(mut self, ignore: bool) -> Self {
        self.ignore_illegals = ignore;
        self
    }
}

impl RenderOverride for HighlightOverride {
    fn token_type(&self) -> TokenType {
        TokenType::Fence
    }

    fn render(&self, token: &Token<'_>, ctx: &mut RenderContext<'_>) -> ProcessResult {
        let TokenKind::Fence { language, content } = &token.kind else {
            return ProcessResult::PassThrough;
        };

        let options = HighlightOptions {
            language: language.as_deref(),
            ignore_illegals: self.ignore_illegals,
        };
        let highlighted = match self.highlighter.highlight(content, &options) {
            Ok(highlighted) => highlighted,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to highlight code block");
                ctx.warn(format!("highlight: {e}"));
                let mut html = String::new();
                render_plain(language.as_deref(), content, &mut html);
                return ProcessResult::Html(html);
            }
        };

        let lines = highlighted.lines;
        let gutter = self.line_numbers && lines > 1;

        let mut html = String::from("<pre");
        if gutter {
            html.push_str(r#" class="line-numbers""#);
        }
        html.push_str("><code");
        if let Some(language) = &highlighted.language {
            write!(html, r#" class="language-{}""#, escape_html(language)).unwrap();
        }
        html.push('>');
        html.push_str(&highlighted.html);
        if gutter {
            html.push_str(r#"<span aria-hidden="true" class="line-numbers-rows">"#);
            for _ in 0..lines {
                html.push_str("<span></span>");
            }
            html.push_str("</span>");
        }
        html.push_str("</code></pre>");

        ProcessResult::Html(html)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::math::MacroTable;

    /// Highlighter returning the code unchanged.
    struct Identity;

    impl Highlighter for Identity {
        fn highlight(
            &self,
            code: &str,
            options: &HighlightOptions<'_>,
        ) -> Result<Highlighted, HighlightError> {
            Ok(Highlighted {
                html: escape_html(code),
                language: options.language.map(ToOwned::to_owned),
                lines: count_lines(code),
            })
        }
    }

    struct Failing;

    impl Highlighter for Failing {
        fn highlight(
            &self,
            _code: &str,
            _options: &HighlightOptions<'_>,
        ) -> Result<Highlighted, HighlightError> {
            Err(HighlightError::Syntax("boom".to_owned()))
        }
    }

    fn fence(language: Option<&str>, content: &str) -> Token<'static> {
        Token::new(
            TokenKind::Fence {
                language: language.map(ToOwned::to_owned),
                content: content.to_owned(),
            },
            0,
        )
    }

    fn render(over: &HighlightOverride, token: &Token<'_>) -> (String, Vec<String>) {
        let macros = MacroTable::new();
        let mut warnings = Vec::new();
        let result = {
            let mut ctx = RenderContext::new(&macros, &mut warnings);
            over.render(token, &mut ctx)
        };
        let ProcessResult::Html(html) = result else {
            panic!("expected html");
        };
        (html, warnings)
    }

    #[test]
    fn test_count_lines() {
        assert_eq!(count_lines(""), 0);
        assert_eq!(count_lines("a"), 1);
        assert_eq!(count_lines("a\n"), 1);
        assert_eq!(count_lines("a\nb"), 2);
        assert_eq!(count_lines("a\nb\n"), 2);
    }

    #[test]
    fn test_gutter_for_multi_line() {
        let over = HighlightOverride::new(Arc::new(Identity));
        let (html, _) = render(&over, &fence(Some("python"), "a\nb\nc\n"));
        assert_eq!(
            html,
            concat!(
                r#"<pre class="line-numbers"><code class="language-python">a"#,
                "\nb\nc\n",
                r#"<span aria-hidden="true" class="line-numbers-rows">"#,
                "<span></span><span></span><span></span></span></code></pre>"
            )
        );
    }

    #[test]
    fn test_no_gutter_for_single_line() {
        let over = HighlightOverride::new(Arc::new(Identity));
        let (html, _) = render(&over, &fence(Some("python"), "x = 1\n"));
        assert_eq!(
            html,
            "<pre><code class=\"language-python\">x = 1\n</code></pre>"
        );
    }

    #[test]
    fn test_gutter_disabled() {
        let over = HighlightOverride::new(Arc::new(Identity)).line_numbers(false);
        let (html, _) = render(&over, &fence(None, "a\nb\n"));
        assert_eq!(html, "<pre><code>a\nb\n</code></pre>");
    }

    #[test]
    fn test_failure_falls_back_to_plain() {
        let over = HighlightOverride::new(Arc::new(Failing));
        let (html, warnings) = render(&over, &fence(Some("rust"), "a < b\n"));
        assert_eq!(
            html,
            "<pre><code class=\"language-rust\">a &lt; b\n</code></pre>"
        );
        assert_eq!(warnings, vec!["highlight: highlighting failed: boom"]);
    }

    #[test]
    fn test_syntect_known_language() {
        let highlighter = SyntectHighlighter::new();
        let options = HighlightOptions {
            language: Some("rust"),
            ignore_illegals: false,
        };
        let highlighted = highlighter.highlight("fn main() {}\n", &options).unwrap();
        assert_eq!(highlighted.language.as_deref(), Some("rust"));
        assert!(highlighted.html.contains("<span class="));
        assert!(highlighted.html.contains("main"));
        assert_eq!(highlighted.lines, 1);
    }

    #[test]
    fn test_syntect_unknown_language() {
        let highlighter = SyntectHighlighter::new();
        let strict = HighlightOptions {
            language: Some("no-such-lang"),
            ignore_illegals: false,
        };
        assert_eq!(
            highlighter.highlight("x", &strict),
            Err(HighlightError::UnknownLanguage("no-such-lang".to_owned()))
        );

        let lenient = HighlightOptions {
            language: Some("no-such-lang"),
            ignore_illegals: true,
        };
        let highlighted = highlighter.highlight("a < b\n", &lenient).unwrap();
        assert_eq!(highlighted.language.as_deref(), Some("no-such-lang"));
        assert!(highlighted.html.contains("a &lt; b"));
    }

    #[test]
    fn test_syntect_detects_language_from_shebang() {
        let highlighter = SyntectHighlighter::new();
        let options = HighlightOptions::default();
        let highlighted = highlighter
            .highlight("#!/usr/bin/env python\nprint(1)\n", &options)
            .unwrap();
        assert!(highlighted.language.is_some());
        assert!(highlighted.html.contains("print"));
        assert_eq!(highlighted.lines, 2);
    }

    #[test]
    fn test_syntect_plain_without_language() {
        let highlighter = SyntectHighlighter::new();
        let highlighted = highlighter
            .highlight("just text\n", &HighlightOptions::default())
            .unwrap();
        assert_eq!(highlighted.language, None);
        assert!(highlighted.html.contains("just text"));
    }
}
