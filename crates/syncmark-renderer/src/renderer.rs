//! Renderer facade: configuration, extension wiring and the preview line query.

use std::sync::Arc;

use pulldown_cmark::Options;

use crate::diagram::DiagramOverride;
use crate::emoji::{DEFAULT_ASSET_BASE, EmojiAssets, EmojiOverride, EmojiRule, TwemojiAssets};
use crate::error::ConfigurationError;
use crate::highlight::{HighlightOverride, Highlighter, SyntectHighlighter};
use crate::html::HtmlWriter;
use crate::inline::{Breaks, Linkify};
use crate::line_map::{LineMap, LineMapper};
use crate::math::{
    LatexRenderer, MacroTable, MathBlockRule, MathInlineRule, MathOverride, MathRenderer,
};
use crate::registry::{Extension, ExtensionRegistry, Pipeline, RuleKind};
use crate::token::tokenize;

/// Result of rendering markdown.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RenderResult {
    /// Rendered HTML fragment.
    pub html: String,
    /// 1-based starting lines of the top-level blocks, in document order.
    pub line_map: Vec<usize>,
    /// Non-fatal problems, e.g. a formula that failed to typeset.
    pub warnings: Vec<String>,
}

/// Feature switches for the built-in extensions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RendererOptions {
    /// Pass raw HTML through; escaped when disabled.
    pub html: bool,
    /// Render single newlines inside paragraphs as `<br>`.
    pub breaks: bool,
    /// Turn bare URLs into links.
    pub linkify: bool,
    /// Smart quotes and dashes.
    pub typographer: bool,
    /// Tables, strikethrough and task lists.
    pub gfm: bool,
    pub math: bool,
    pub emoji: bool,
    /// Line-number gutter on multi-line code blocks.
    pub line_numbers: bool,
    /// Best-effort highlighting of unknown languages and malformed code.
    pub ignore_illegals: bool,
    /// Emit decoded `diagram` payloads without escaping.
    pub trust_diagram_payload: bool,
    /// Base path for emoji images.
    pub emoji_asset_base: String,
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            html: true,
            breaks: true,
            linkify: true,
            typographer: true,
            gfm: true,
            math: true,
            emoji: true,
            line_numbers: true,
            ignore_illegals: true,
            trust_diagram_payload: true,
            emoji_asset_base: DEFAULT_ASSET_BASE.to_owned(),
        }
    }
}

impl RendererOptions {
    /// Parser options implied by these settings.
    pub fn parser_options(&self) -> Options {
        let mut options = Options::empty();
        if self.gfm {
            options |= Options::ENABLE_TABLES
                | Options::ENABLE_STRIKETHROUGH
                | Options::ENABLE_TASKLISTS
                | Options::ENABLE_GFM;
        }
        if self.typographer {
            options |= Options::ENABLE_SMART_PUNCTUATION;
        }
        options
    }
}

/// Builder for [`MarkdownRenderer`].
///
/// Built-in extensions are registered according to [`RendererOptions`];
/// extensions added with [`extension`](Self::extension) are registered after
/// them, so they may anchor to built-in names.
pub struct RendererBuilder {
    options: RendererOptions,
    macros: MacroTable,
    math_renderer: Arc<dyn MathRenderer>,
    highlighter: Option<Arc<dyn Highlighter>>,
    emoji_assets: Option<Arc<dyn EmojiAssets>>,
    extensions: Vec<Extension>,
}

impl RendererBuilder {
    fn new() -> Self {
        Self {
            options: RendererOptions::default(),
            macros: MacroTable::new(),
            math_renderer: Arc::new(LatexRenderer),
            highlighter: None,
            emoji_assets: None,
            extensions: Vec::new(),
        }
    }

    #[must_use]
    pub fn options(mut self, options: RendererOptions) -> Self {
        self.options = options;
        self
    }

    /// Math macros owned by the renderer.
    #[must_use]
    pub fn macros(mut self, macros: MacroTable) -> Self {
        self.macros = macros;
        self
    }

    #[must_use]
    pub fn math_renderer(mut self, renderer: impl MathRenderer + 'static) -> Self {
        self.math_renderer = Arc::new(renderer);
        self
    }

    /// Replace the default syntect highlighter.
    #[must_use]
    pub fn highlighter(mut self, highlighter: impl Highlighter + 'static) -> Self {
        self.highlighter = Some(Arc::new(highlighter));
        self
    }

    /// Replace the default Twemoji asset mapping.
    #[must_use]
    pub fn emoji_assets(mut self, assets: impl EmojiAssets + 'static) -> Self {
        self.emoji_assets = Some(Arc::new(assets));
        self
    }

    /// Register an additional extension.
    #[must_use]
    pub fn extension(mut self, extension: Extension) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Resolve all extensions and create the renderer.
    pub fn build(self) -> Result<MarkdownRenderer, ConfigurationError> {
        let options = self.options;
        let mut registry = ExtensionRegistry::new();

        if options.breaks {
            registry.register(Extension::inline("breaks", Breaks).after("newline"))?;
        }
        if options.linkify {
            registry.register(Extension::inline("linkify", Linkify).after("text"))?;
        }
        if options.math {
            registry.register(Extension::inline("math_inline", MathInlineRule).after("escape"))?;
            registry.register(Extension::block("math_block", MathBlockRule).after("blockquote"))?;
            registry.register(Extension::render(
                "math_inline",
                MathOverride::inline(Arc::clone(&self.math_renderer)),
            ))?;
            registry.register(Extension::render(
                "math_block",
                MathOverride::block(Arc::clone(&self.math_renderer)),
            ))?;
        }
        if options.emoji {
            let assets = self
                .emoji_assets
                .unwrap_or_else(|| Arc::new(TwemojiAssets::new(options.emoji_asset_base.clone())));
            registry.register(Extension::inline("emoji", EmojiRule).after("entity"))?;
            registry.register(Extension::render("emoji", EmojiOverride::new(assets)))?;
        }

        registry.register(Extension::render(
            "diagram",
            DiagramOverride::new().trust_payload(options.trust_diagram_payload),
        ))?;
        let highlighter = self
            .highlighter
            .unwrap_or_else(|| Arc::new(SyntectHighlighter::new()));
        registry.register(
            Extension::render(
                "highlight",
                HighlightOverride::new(highlighter)
                    .line_numbers(options.line_numbers)
                    .ignore_illegals(options.ignore_illegals),
            )
            .after("diagram"),
        )?;
        registry.register(Extension::attribute("line_map", LineMapper))?;

        for extension in self.extensions {
            registry.register(extension)?;
        }

        tracing::debug!(
            block = ?registry.names(RuleKind::Block),
            inline = ?registry.names(RuleKind::Inline),
            "Resolved extension pipeline"
        );

        Ok(MarkdownRenderer {
            pipeline: registry.resolve(),
            parser_options: options.parser_options(),
            raw_html: options.html,
            macros: self.macros,
            line_map: LineMap::new(),
        })
    }
}

/// Markdown renderer with source line mapping.
///
/// Rendering takes `&mut self`: the line map of the last render is kept on
/// the instance for [`closest_preview_line`](Self::closest_preview_line).
/// Share an instance between threads behind a mutex, or use one per thread.
///
/// # Example
///
/// ```
/// use syncmark_renderer::MarkdownRenderer;
///
/// let mut renderer = MarkdownRenderer::builder().build().unwrap();
/// let result = renderer.render("# Title\n\nBody text\n");
/// assert_eq!(result.line_map, vec![1, 3]);
/// assert_eq!(renderer.closest_preview_line(2), Some(1));
/// ```
pub struct MarkdownRenderer {
    pipeline: Pipeline,
    parser_options: Options,
    raw_html: bool,
    macros: MacroTable,
    line_map: LineMap,
}

impl MarkdownRenderer {
    #[must_use]
    pub fn builder() -> RendererBuilder {
        RendererBuilder::new()
    }

    /// Render markdown source to an HTML fragment.
    ///
    /// Never fails: broken formulas, diagrams or code blocks degrade to their
    /// source text and are reported in [`RenderResult::warnings`].
    pub fn render(&mut self, source: &str) -> RenderResult {
        self.line_map.clear();

        let options = self.parser_options | self.pipeline.parser_options();
        let tokens = self.pipeline.transform(tokenize(source, options));
        let rendered = HtmlWriter::new(&self.pipeline, &self.macros, self.raw_html).render(&tokens);

        tracing::debug!(
            tokens = tokens.len(),
            blocks = rendered.line_map.len(),
            warnings = rendered.warnings.len(),
            "Rendered markdown"
        );

        self.line_map = rendered.line_map;
        RenderResult {
            html: rendered.html,
            line_map: self.line_map.as_slice().to_vec(),
            warnings: rendered.warnings,
        }
    }

    /// Line map of the last render.
    pub fn line_map(&self) -> &LineMap {
        &self.line_map
    }

    /// Greatest mapped line `<= line` from the last render.
    pub fn closest_preview_line(&self, line: usize) -> Option<usize> {
        self.line_map.closest_line(line)
    }

    /// Math macros owned by this renderer.
    pub fn macros(&self) -> &MacroTable {
        &self.macros
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::code_block::ProcessResult;
    use crate::registry::{RenderContext, RenderOverride};
    use crate::token::{Token, TokenKind, TokenType};

    fn renderer(options: RendererOptions) -> MarkdownRenderer {
        MarkdownRenderer::builder().options(options).build().unwrap()
    }

    fn plain() -> RendererOptions {
        RendererOptions {
            breaks: false,
            linkify: false,
            typographer: false,
            math: false,
            emoji: false,
            ..RendererOptions::default()
        }
    }

    #[test]
    fn test_default_build() {
        let mut renderer = MarkdownRenderer::builder().build().unwrap();
        let result = renderer.render("Hello");
        assert_eq!(result.html, r#"<p class="line" data-line="1">Hello</p>"#);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_breaks_option() {
        let mut with = renderer(RendererOptions {
            breaks: true,
            ..plain()
        });
        assert!(with.render("a\nb").html.contains("a<br>b"));

        let mut without = renderer(plain());
        assert!(without.render("a\nb").html.contains("a\nb"));
    }

    #[test]
    fn test_linkify_option() {
        let mut renderer = renderer(RendererOptions {
            linkify: true,
            ..plain()
        });
        let html = renderer.render("go to https://example.com now").html;
        assert!(html.contains(r#"<a href="https://example.com">https://example.com</a>"#));
    }

    #[test]
    fn test_typographer_option() {
        let mut renderer = renderer(RendererOptions {
            typographer: true,
            ..plain()
        });
        let html = renderer.render("\"quoted\" -- dash").html;
        assert!(html.contains('\u{201C}'));
        assert!(html.contains('\u{2013}'));
    }

    #[test]
    fn test_html_option() {
        let mut renderer = renderer(RendererOptions {
            html: false,
            ..plain()
        });
        let html = renderer.render("<div>x</div>\n").html;
        assert!(html.contains("&lt;div&gt;"));
    }

    #[test]
    fn test_emoji_option() {
        let mut renderer = renderer(RendererOptions {
            emoji: true,
            emoji_asset_base: "/e".to_owned(),
            ..plain()
        });
        let html = renderer.render("nice :+1:").html;
        assert!(html.contains(r#"<img class="emoji" draggable="false" alt="👍" src="/e/1f44d.svg">"#));
    }

    #[test]
    fn test_math_disabled_leaves_dollars() {
        let mut renderer = renderer(plain());
        let html = renderer.render("cost $5 and $6").html;
        assert!(html.contains("cost $5 and $6"));
    }

    #[test]
    fn test_math_inline_and_block() {
        let mut renderer = renderer(RendererOptions {
            math: true,
            ..plain()
        });
        let result = renderer.render("Inline $x^2$.\n\n$$\\frac{a}{b}$$\n");
        assert!(result.html.contains("<math"));
        assert!(result.html.contains("<p><math"));
        assert!(result.warnings.is_empty());
        // Math blocks are not line-mapped
        assert_eq!(result.line_map, vec![1]);
    }

    #[test]
    fn test_macros_are_applied() {
        let macros: MacroTable = [("R", r"\mathbb{R}"), ("bad", r"\bad")].into_iter().collect();
        let mut renderer = MarkdownRenderer::builder()
            .options(RendererOptions {
                math: true,
                ..plain()
            })
            .macros(macros)
            .build()
            .unwrap();
        assert_eq!(renderer.macros().len(), 2);

        let result = renderer.render("$x \\in \\R$");
        assert!(result.warnings.is_empty());

        let result = renderer.render("$\\bad$");
        assert_eq!(result.warnings.len(), 1);
        assert!(result.html.contains("\\bad"));
    }

    #[test]
    fn test_line_map_reset_between_renders() {
        let mut renderer = renderer(plain());
        renderer.render("a\n\nb\n\nc\n");
        assert_eq!(renderer.line_map().as_slice(), &[1, 3, 5]);
        assert_eq!(renderer.closest_preview_line(4), Some(3));

        let result = renderer.render("only\n");
        assert_eq!(result.line_map, vec![1]);
        assert_eq!(renderer.closest_preview_line(4), Some(1));
    }

    #[test]
    fn test_custom_extension_anchored_to_builtin() {
        struct Marker;

        impl RenderOverride for Marker {
            fn token_type(&self) -> TokenType {
                TokenType::Fence
            }

            fn render(&self, token: &Token<'_>, _ctx: &mut RenderContext<'_>) -> ProcessResult {
                match &token.kind {
                    TokenKind::Fence {
                        language: Some(language),
                        ..
                    } if language == "marker" => {
                        ProcessResult::Html("<hr class=\"marker\">".to_owned())
                    }
                    _ => ProcessResult::PassThrough,
                }
            }
        }

        let mut renderer = MarkdownRenderer::builder()
            .options(plain())
            .extension(Extension::render("marker", Marker).before("diagram"))
            .build()
            .unwrap();
        let html = renderer.render("```marker\nx\n```\n").html;
        assert_eq!(html, r#"<hr class="marker">"#);
    }

    #[test]
    fn test_custom_extension_unknown_anchor() {
        struct Nothing;

        impl RenderOverride for Nothing {
            fn token_type(&self) -> TokenType {
                TokenType::Fence
            }

            fn render(&self, _token: &Token<'_>, _ctx: &mut RenderContext<'_>) -> ProcessResult {
                ProcessResult::PassThrough
            }
        }

        let result = MarkdownRenderer::builder()
            .extension(Extension::render("nothing", Nothing).after("missing"))
            .build();
        assert!(matches!(
            result,
            Err(ConfigurationError::UnknownAnchor { .. })
        ));
    }

    #[test]
    fn test_parser_options() {
        let options = RendererOptions::default().parser_options();
        assert!(options.contains(Options::ENABLE_TABLES));
        assert!(options.contains(Options::ENABLE_SMART_PUNCTUATION));
        assert_eq!(plain().parser_options() & Options::ENABLE_SMART_PUNCTUATION, Options::empty());
        let no_gfm = RendererOptions {
            gfm: false,
            ..plain()
        };
        assert_eq!(no_gfm.parser_options(), Options::empty());
    }
}
