//! HTML writer for resolved token streams.
//!
//! Each token is first offered to the render overrides registered for its
//! type. Tokens no override claims get the default HTML5 rendering. Block
//! open tokens additionally receive the merged [`Decoration`] of all attribute
//! decorators. When a decoration asks for a line and the block is mapped, the
//! block's own source line is appended to the [`LineMap`].

use std::fmt::Write;

use pulldown_cmark::{HeadingLevel, Tag, TagEnd};

use crate::code_block::{ProcessResult, render_plain};
use crate::line_map::{LineMap, mapped_line};
use crate::math::MacroTable;
use crate::registry::{Decoration, Pipeline, RenderContext};
use crate::state::{ImageState, TableState, escape_html};
use crate::token::{Token, TokenKind};

/// Output of one HTML pass.
pub(crate) struct Rendered {
    pub(crate) html: String,
    pub(crate) line_map: LineMap,
    pub(crate) warnings: Vec<String>,
}

pub(crate) struct HtmlWriter<'r> {
    pipeline: &'r Pipeline,
    macros: &'r MacroTable,
    /// Emit raw HTML verbatim instead of escaping it.
    raw_html: bool,
    output: String,
    table: TableState,
    image: ImageState,
    line_map: LineMap,
    warnings: Vec<String>,
}

impl<'r> HtmlWriter<'r> {
    pub(crate) fn new(pipeline: &'r Pipeline, macros: &'r MacroTable, raw_html: bool) -> Self {
        Self {
            pipeline,
            macros,
            raw_html,
            output: String::with_capacity(4096),
            table: TableState::default(),
            image: ImageState::default(),
            line_map: LineMap::new(),
            warnings: Vec::new(),
        }
    }

    pub(crate) fn render(mut self, tokens: &[Token<'_>]) -> Rendered {
        for token in tokens {
            self.token(token);
        }
        Rendered {
            html: self.output,
            line_map: self.line_map,
            warnings: self.warnings,
        }
    }

    fn token(&mut self, token: &Token<'_>) {
        if self.image.is_active() {
            self.alt_text(token);
            return;
        }

        let decoration = match token.kind {
            TokenKind::Open(_) => self.pipeline.decorate(token),
            _ => Decoration::default(),
        };
        if self.apply_overrides(token) {
            return;
        }

        match &token.kind {
            TokenKind::Open(tag) => {
                if decoration.line.is_some()
                    && let Some(line) = mapped_line(token)
                {
                    self.line_map.push(line);
                }
                self.start_tag(tag, &decoration);
            }
            TokenKind::Close(end) => self.end_tag(*end),
            TokenKind::Text(text) => self.output.push_str(&escape_html(text)),
            TokenKind::Code(code) => {
                write!(self.output, "<code>{}</code>", escape_html(code)).unwrap();
            }
            TokenKind::Html(html) => {
                if self.raw_html {
                    self.output.push_str(html);
                } else {
                    self.output.push_str(&escape_html(html));
                }
            }
            TokenKind::SoftBreak => self.output.push('\n'),
            TokenKind::HardBreak => self.output.push_str("<br>"),
            TokenKind::Rule => self.output.push_str("<hr>"),
            TokenKind::TaskListMarker(checked) => self.task_list_marker(*checked),
            TokenKind::Fence { language, content } => {
                render_plain(language.as_deref(), content, &mut self.output);
            }
            TokenKind::Math { source, display } => {
                let delimiter = if *display { "$$" } else { "$" };
                write!(
                    self.output,
                    "{delimiter}{}{delimiter}",
                    escape_html(source)
                )
                .unwrap();
            }
            TokenKind::MathBlock(source) => {
                write!(self.output, "<p>$${}$$</p>", escape_html(source)).unwrap();
            }
            TokenKind::Emoji(emoji) => self.output.push_str(&escape_html(&emoji.text)),
        }
    }

    /// Offer the token to its overrides; returns whether one produced HTML.
    fn apply_overrides(&mut self, token: &Token<'_>) -> bool {
        let overrides = self.pipeline.overrides(token.token_type());
        if overrides.is_empty() {
            return false;
        }

        let mut ctx = RenderContext::new(self.macros, &mut self.warnings);
        for render_override in overrides {
            if let ProcessResult::Html(html) = render_override.render(token, &mut ctx) {
                self.output.push_str(&html);
                return true;
            }
        }
        false
    }

    /// Collect plain text for an image's alt attribute.
    fn alt_text(&mut self, token: &Token<'_>) {
        match &token.kind {
            TokenKind::Text(text) | TokenKind::Code(text) => self.image.push_str(text),
            TokenKind::Math { source, .. } => self.image.push_str(source),
            TokenKind::Emoji(emoji) => self.image.push_str(&emoji.text),
            TokenKind::SoftBreak | TokenKind::HardBreak => self.image.push_str(" "),
            TokenKind::Close(TagEnd::Image) => self.end_tag(TagEnd::Image),
            _ => {}
        }
    }

    fn start_tag(&mut self, tag: &Tag<'_>, decoration: &Decoration) {
        let attrs = attributes(decoration);
        match tag {
            Tag::Paragraph => write!(self.output, "<p{attrs}>").unwrap(),
            Tag::Heading { level, .. } => {
                write!(self.output, "<h{}{attrs}>", heading_level_to_num(*level)).unwrap();
            }
            Tag::BlockQuote(_) => write!(self.output, "<blockquote{attrs}>").unwrap(),
            Tag::List(start) => match start {
                Some(1) => write!(self.output, "<ol{attrs}>").unwrap(),
                Some(n) => write!(self.output, r#"<ol start="{n}"{attrs}>"#).unwrap(),
                None => write!(self.output, "<ul{attrs}>").unwrap(),
            },
            Tag::Item => write!(self.output, "<li{attrs}>").unwrap(),
            Tag::CodeBlock(_)
            | Tag::FootnoteDefinition(_)
            | Tag::HtmlBlock
            | Tag::MetadataBlock(_) => {}
            Tag::DefinitionList => self.output.push_str("<dl>"),
            Tag::DefinitionListTitle => self.output.push_str("<dt>"),
            Tag::DefinitionListDefinition => self.output.push_str("<dd>"),
            Tag::Table(alignments) => {
                self.table.start(alignments.clone());
                write!(self.output, "<table{attrs}>").unwrap();
            }
            Tag::TableHead => {
                self.table.start_head();
                self.output.push_str("<thead><tr>");
            }
            Tag::TableRow => {
                self.table.start_row();
                self.output.push_str("<tr>");
            }
            Tag::TableCell => {
                let align = self.table.current_alignment_style();
                let cell = if self.table.is_in_head() { "th" } else { "td" };
                write!(self.output, "<{cell}{align}>").unwrap();
            }
            Tag::Emphasis => self.output.push_str("<em>"),
            Tag::Strong => self.output.push_str("<strong>"),
            Tag::Strikethrough => self.output.push_str("<s>"),
            Tag::Superscript => self.output.push_str("<sup>"),
            Tag::Subscript => self.output.push_str("<sub>"),
            Tag::Link {
                dest_url, title, ..
            } => {
                write!(self.output, r#"<a href="{}""#, escape_html(dest_url)).unwrap();
                if !title.is_empty() {
                    write!(self.output, r#" title="{}""#, escape_html(title)).unwrap();
                }
                self.output.push('>');
            }
            Tag::Image {
                dest_url, title, ..
            } => {
                // Rendered on close, once the alt text is known
                self.image.start(dest_url.to_string(), title.to_string());
            }
        }
    }

    fn end_tag(&mut self, end: TagEnd) {
        match end {
            TagEnd::Paragraph => self.output.push_str("</p>"),
            TagEnd::Heading(level) => {
                write!(self.output, "</h{}>", heading_level_to_num(level)).unwrap();
            }
            TagEnd::BlockQuote(_) => self.output.push_str("</blockquote>"),
            TagEnd::List(ordered) => {
                self.output
                    .push_str(if ordered { "</ol>" } else { "</ul>" });
            }
            TagEnd::Item => self.output.push_str("</li>"),
            TagEnd::CodeBlock
            | TagEnd::FootnoteDefinition
            | TagEnd::HtmlBlock
            | TagEnd::MetadataBlock(_) => {}
            TagEnd::DefinitionList => self.output.push_str("</dl>"),
            TagEnd::DefinitionListTitle => self.output.push_str("</dt>"),
            TagEnd::DefinitionListDefinition => self.output.push_str("</dd>"),
            TagEnd::Table => self.output.push_str("</tbody></table>"),
            TagEnd::TableHead => {
                self.output.push_str("</tr></thead><tbody>");
                self.table.end_head();
            }
            TagEnd::TableRow => self.output.push_str("</tr>"),
            TagEnd::TableCell => {
                self.output.push_str(if self.table.is_in_head() {
                    "</th>"
                } else {
                    "</td>"
                });
                self.table.next_cell();
            }
            TagEnd::Emphasis => self.output.push_str("</em>"),
            TagEnd::Strong => self.output.push_str("</strong>"),
            TagEnd::Strikethrough => self.output.push_str("</s>"),
            TagEnd::Superscript => self.output.push_str("</sup>"),
            TagEnd::Subscript => self.output.push_str("</sub>"),
            TagEnd::Link => self.output.push_str("</a>"),
            TagEnd::Image => {
                if let Some((src, title, alt)) = self.image.end() {
                    self.image_tag(&src, &title, &alt);
                }
            }
        }
    }

    fn image_tag(&mut self, src: &str, title: &str, alt: &str) {
        let title_attr = if title.is_empty() {
            String::new()
        } else {
            format!(r#" title="{}""#, escape_html(title))
        };
        write!(
            self.output,
            r#"<img src="{}"{title_attr} alt="{}">"#,
            escape_html(src),
            escape_html(alt)
        )
        .unwrap();
    }

    fn task_list_marker(&mut self, checked: bool) {
        if checked {
            self.output
                .push_str(r#"<input type="checkbox" checked disabled> "#);
        } else {
            self.output.push_str(r#"<input type="checkbox" disabled> "#);
        }
    }
}

/// Render decoration classes and attributes as an attribute string.
fn attributes(decoration: &Decoration) -> String {
    let mut out = String::new();
    if !decoration.classes.is_empty() {
        write!(
            out,
            r#" class="{}""#,
            escape_html(&decoration.classes.join(" "))
        )
        .unwrap();
    }
    for (key, value) in &decoration.attrs {
        write!(out, r#" {}="{}""#, escape_html(key), escape_html(value)).unwrap();
    }
    out
}

fn heading_level_to_num(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use pulldown_cmark::Options;

    use super::*;
    use crate::line_map::LineMapper;
    use crate::registry::{AttributeDecorator, Extension, ExtensionRegistry, RenderOverride};
    use crate::token::{TokenType, tokenize};

    const GFM: Options = Options::ENABLE_TABLES
        .union(Options::ENABLE_STRIKETHROUGH)
        .union(Options::ENABLE_TASKLISTS);

    fn render_with(registry: ExtensionRegistry, markdown: &str, raw_html: bool) -> Rendered {
        let pipeline = registry.resolve();
        let macros = MacroTable::new();
        let tokens = pipeline.transform(tokenize(markdown, GFM | pipeline.parser_options()));
        HtmlWriter::new(&pipeline, &macros, raw_html).render(&tokens)
    }

    fn render_html(markdown: &str) -> String {
        render_with(ExtensionRegistry::new(), markdown, true).html
    }

    fn render_mapped(markdown: &str) -> Rendered {
        let mut registry = ExtensionRegistry::new();
        registry
            .register(Extension::attribute("line_map", LineMapper))
            .unwrap();
        render_with(registry, markdown, true)
    }

    #[test]
    fn test_basic_paragraph() {
        assert_eq!(render_html("Hello, world!"), "<p>Hello, world!</p>");
    }

    #[test]
    fn test_heading() {
        assert_eq!(render_html("## Section Title"), "<h2>Section Title</h2>");
    }

    #[test]
    fn test_blockquote() {
        assert_eq!(
            render_html("> Note"),
            "<blockquote><p>Note</p></blockquote>"
        );
    }

    #[test]
    fn test_code_block_default() {
        assert_eq!(
            render_html("```rust\nfn main() {}\n```"),
            "<pre><code class=\"language-rust\">fn main() {}\n</code></pre>"
        );
    }

    #[test]
    fn test_image() {
        let html = render_html("![Alt *text*](image.png \"Title\")");
        assert_eq!(
            html,
            r#"<p><img src="image.png" title="Title" alt="Alt text"></p>"#
        );
    }

    #[test]
    fn test_link() {
        assert_eq!(
            render_html("[Link](https://example.com?a=1&b=2)"),
            r#"<p><a href="https://example.com?a=1&amp;b=2">Link</a></p>"#
        );
    }

    #[test]
    fn test_table() {
        let html = render_html("| A | B |\n|:--|--:|\n| 1 | 2 |");
        assert_eq!(
            html,
            concat!(
                "<table><thead><tr>",
                r#"<th style="text-align:left">A</th><th style="text-align:right">B</th>"#,
                "</tr></thead><tbody><tr>",
                r#"<td style="text-align:left">1</td><td style="text-align:right">2</td>"#,
                "</tr></tbody></table>"
            )
        );
    }

    #[test]
    fn test_emphasis_and_strikethrough() {
        let html = render_html("*italic* **bold** ~~gone~~");
        assert_eq!(
            html,
            "<p><em>italic</em> <strong>bold</strong> <s>gone</s></p>"
        );
    }

    #[test]
    fn test_lists() {
        assert_eq!(
            render_html("- Item 1\n- Item 2"),
            "<ul><li>Item 1</li><li>Item 2</li></ul>"
        );
        assert_eq!(
            render_html("3. Three\n4. Four"),
            r#"<ol start="3"><li>Three</li><li>Four</li></ol>"#
        );
    }

    #[test]
    fn test_task_list() {
        let html = render_html("- [ ] Unchecked\n- [x] Checked");
        assert!(html.contains(r#"<input type="checkbox" disabled> Unchecked"#));
        assert!(html.contains(r#"<input type="checkbox" checked disabled> Checked"#));
    }

    #[test]
    fn test_raw_html_toggle() {
        assert_eq!(render_html("a <b>bold</b>"), "<p>a <b>bold</b></p>");
        let escaped = render_with(ExtensionRegistry::new(), "a <b>bold</b>", false).html;
        assert_eq!(escaped, "<p>a &lt;b&gt;bold&lt;/b&gt;</p>");
    }

    #[test]
    fn test_soft_and_hard_breaks() {
        assert_eq!(render_html("a\nb"), "<p>a\nb</p>");
        assert_eq!(render_html("a  \nb"), "<p>a<br>b</p>");
    }

    #[test]
    fn test_decorations_and_line_map() {
        let rendered = render_mapped("# Title\n\nFirst\n\n> quote\n> more\n\n- item\n\nLast\n");
        assert_eq!(
            rendered.html,
            concat!(
                r#"<h1 class="line" data-line="1">Title</h1>"#,
                r#"<p class="line" data-line="3">First</p>"#,
                r#"<blockquote class="line" data-line="5"><p>quote"#,
                "\nmore</p></blockquote>",
                "<ul><li>item</li></ul>",
                r#"<p class="line" data-line="10">Last</p>"#
            )
        );
        assert_eq!(rendered.line_map.as_slice(), &[1, 3, 5, 10]);
    }

    #[test]
    fn test_decorator_cannot_invent_lines() {
        struct ClaimsLines;

        impl AttributeDecorator for ClaimsLines {
            fn decorate(&self, token: &Token<'_>) -> Option<Decoration> {
                match token.kind {
                    TokenKind::Open(Tag::Item | Tag::Paragraph) => Some(Decoration {
                        line: Some(1),
                        ..Decoration::default()
                    }),
                    _ => None,
                }
            }
        }

        let mut registry = ExtensionRegistry::new();
        registry
            .register(Extension::attribute("claims_lines", ClaimsLines))
            .unwrap();
        let rendered = render_with(registry, "a\n\nb\n\n- x\n", true);

        // Lines come from the paragraphs' own source maps; list items stay unmapped
        assert_eq!(rendered.line_map.as_slice(), &[1, 3]);
    }

    #[test]
    fn test_overridden_block_is_not_mapped() {
        struct PlainParagraph;

        impl RenderOverride for PlainParagraph {
            fn token_type(&self) -> TokenType {
                TokenType::Open
            }

            fn render(&self, token: &Token<'_>, _ctx: &mut RenderContext<'_>) -> ProcessResult {
                match token.kind {
                    TokenKind::Open(Tag::Paragraph) => ProcessResult::Html("<p>".to_owned()),
                    _ => ProcessResult::PassThrough,
                }
            }
        }

        let mut registry = ExtensionRegistry::new();
        registry
            .register(Extension::attribute("line_map", LineMapper))
            .unwrap();
        registry
            .register(Extension::render("plain_paragraph", PlainParagraph))
            .unwrap();
        let rendered = render_with(registry, "# Title\n\nbody\n", true);

        assert_eq!(
            rendered.html,
            r#"<h1 class="line" data-line="1">Title</h1><p>body</p>"#
        );
        assert_eq!(rendered.line_map.as_slice(), &[1]);
    }

    #[test]
    fn test_override_replaces_default() {
        struct Upper;

        impl RenderOverride for Upper {
            fn token_type(&self) -> TokenType {
                TokenType::Text
            }

            fn render(&self, token: &Token<'_>, ctx: &mut RenderContext<'_>) -> ProcessResult {
                let TokenKind::Text(text) = &token.kind else {
                    return ProcessResult::PassThrough;
                };
                ctx.warn("upper");
                ProcessResult::Html(text.to_uppercase())
            }
        }

        let mut registry = ExtensionRegistry::new();
        registry.register(Extension::render("upper", Upper)).unwrap();
        let rendered = render_with(registry, "shout", true);
        assert_eq!(rendered.html, "<p>SHOUT</p>");
        assert_eq!(rendered.warnings, vec!["upper"]);
    }

    #[test]
    fn test_math_default_rendering() {
        let mut registry = ExtensionRegistry::new();
        registry
            .register(Extension::inline("math_inline", crate::math::MathInlineRule))
            .unwrap();
        assert_eq!(
            render_with(registry, "x $a<b$ y", true).html,
            "<p>x $a&lt;b$ y</p>"
        );
    }
}
