//! Extensible markdown renderer with source line mapping.
//!
//! Renders markdown to an HTML fragment and records, for every top-level
//! paragraph, heading and blockquote, the source line it starts on. A live
//! preview uses [`MarkdownRenderer::closest_preview_line`] to scroll the
//! rendered block matching the editor position into view.
//!
//! # Architecture
//!
//! - [`ExtensionRegistry`]: ordered block, inline, render and attribute rules,
//!   positioned relative to each other through named anchors.
//! - [`tokenize`]: pulldown-cmark events as [`Token`]s carrying source line
//!   ranges and nesting levels.
//! - Render overrides: math ([`MathOverride`]), diagrams ([`DiagramOverride`]),
//!   syntax highlighting ([`HighlightOverride`]) and emoji ([`EmojiOverride`]).
//!   A failing override degrades to source text and records a warning.
//! - [`LineMapper`]: attribute decorator adding `data-line` attributes.
//! - [`MarkdownRenderer`]: wires everything together.
//!
//! # Example
//!
//! ```
//! use syncmark_renderer::{MarkdownRenderer, RendererOptions};
//!
//! let mut renderer = MarkdownRenderer::builder()
//!     .options(RendererOptions::default())
//!     .build()
//!     .unwrap();
//!
//! let result = renderer.render("# Hello\n\n**Bold** text\n");
//! assert!(result.html.starts_with(r#"<h1 class="line" data-line="1">"#));
//! assert_eq!(renderer.closest_preview_line(5), Some(3));
//! ```

mod code_block;
mod diagram;
mod emoji;
mod error;
mod highlight;
mod html;
mod inline;
mod line_map;
mod math;
mod registry;
mod renderer;
mod state;
mod token;

pub use pulldown_cmark::{CowStr, Options, Tag, TagEnd};

pub use code_block::ProcessResult;
pub use diagram::{CLIENT_DIAGRAMS, DiagramError, DiagramOverride, ENCODED_DIAGRAM, decode_payload};
pub use emoji::{
    DEFAULT_ASSET_BASE, EmojiAssets, EmojiOverride, EmojiRule, TwemojiAssets, codepoints,
};
pub use error::ConfigurationError;
pub use highlight::{
    HighlightError, HighlightOptions, HighlightOverride, Highlighted, Highlighter,
    SyntectHighlighter, count_lines,
};
pub use inline::{Breaks, Linkify};
pub use line_map::{LineMap, LineMapper};
pub use math::{
    LatexRenderer, MacroTable, MathBlockRule, MathError, MathInlineRule, MathOptions,
    MathOverride, MathRenderer,
};
pub use registry::{
    Anchor, AttributeDecorator, BlockRule, Decoration, Extension, ExtensionRegistry, InlineRule,
    NATIVE_BLOCK_RULES, NATIVE_INLINE_RULES, Pipeline, RenderContext, RenderOverride, Rule,
    RuleKind,
};
pub use renderer::{MarkdownRenderer, RenderResult, RendererBuilder, RendererOptions};
pub use state::escape_html;
pub use token::{Emoji, SourceMap, Token, TokenKind, TokenType, tokenize};
