//! Extension registry and resolved rule pipeline.
//!
//! Extensions are registered by kind into ordered rule lists. Each list starts
//! with the native rules implemented by the parser itself, so extensions can
//! anchor relative to them (`After("escape")`) or to each other. Anchors are
//! resolved as each extension is registered; [`ExtensionRegistry::resolve`]
//! then freezes the lists into a [`Pipeline`].
//!
//! When several extensions anchor to the same rule, the one registered first
//! stays closest to it.
//!
//! # Example
//!
//! ```
//! use syncmark_renderer::{Extension, ExtensionRegistry, InlineRule, RuleKind, Token};
//!
//! struct Shout;
//!
//! impl InlineRule for Shout {
//!     fn apply<'a>(&self, tokens: Vec<Token<'a>>) -> Vec<Token<'a>> {
//!         tokens
//!     }
//! }
//!
//! let mut registry = ExtensionRegistry::new();
//! registry
//!     .register(Extension::inline("shout", Shout).after("emphasis"))
//!     .unwrap();
//! let names = registry.names(RuleKind::Inline);
//! let at = names.iter().position(|n| *n == "emphasis").unwrap();
//! assert_eq!(names[at + 1], "shout");
//! ```

use std::collections::BTreeMap;
use std::fmt;

use pulldown_cmark::Options;

use crate::code_block::ProcessResult;
use crate::error::ConfigurationError;
use crate::math::MacroTable;
use crate::token::{Token, TokenType};

/// Native block rules, in parser order.
pub const NATIVE_BLOCK_RULES: &[&str] = &[
    "table",
    "code",
    "fence",
    "blockquote",
    "hr",
    "list",
    "reference",
    "html_block",
    "heading",
    "lheading",
    "paragraph",
];

/// Native inline rules, in parser order.
pub const NATIVE_INLINE_RULES: &[&str] = &[
    "text",
    "newline",
    "escape",
    "backticks",
    "strikethrough",
    "emphasis",
    "link",
    "image",
    "autolink",
    "html_inline",
    "entity",
];

/// Kind of rule an extension contributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RuleKind {
    Block,
    Inline,
    Render,
    Attribute,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Block => "block",
            Self::Inline => "inline",
            Self::Render => "render",
            Self::Attribute => "attribute",
        };
        f.write_str(name)
    }
}

/// Position of an extension relative to another rule of the same kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Anchor {
    Before(String),
    After(String),
}

impl Anchor {
    /// Name of the rule this anchor refers to.
    pub fn target(&self) -> &str {
        match self {
            Self::Before(name) | Self::After(name) => name,
        }
    }
}

/// Transform over the whole token sequence, run after parsing.
pub trait BlockRule: Send + Sync {
    /// Parser options this rule depends on.
    fn parser_options(&self) -> Options {
        Options::empty()
    }

    /// Block rules this rule may interrupt.
    ///
    /// Validated against the registered block rules at registration time.
    fn interrupts(&self) -> &[&'static str] {
        &[]
    }

    fn apply<'a>(&self, tokens: Vec<Token<'a>>) -> Vec<Token<'a>>;
}

/// Transform over one run of inline tokens (the content of a single block).
pub trait InlineRule: Send + Sync {
    /// Parser options this rule depends on.
    fn parser_options(&self) -> Options {
        Options::empty()
    }

    fn apply<'a>(&self, tokens: Vec<Token<'a>>) -> Vec<Token<'a>>;
}

/// Context handed to render overrides.
pub struct RenderContext<'r> {
    /// Math macros owned by the renderer.
    pub macros: &'r MacroTable,
    warnings: &'r mut Vec<String>,
}

impl<'r> RenderContext<'r> {
    pub(crate) fn new(macros: &'r MacroTable, warnings: &'r mut Vec<String>) -> Self {
        Self { macros, warnings }
    }

    /// Record a non-fatal rendering problem.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Replaces the default HTML for one token type.
///
/// Overrides for the same token type are tried in registry order; the first
/// one returning [`ProcessResult::Html`] wins.
pub trait RenderOverride: Send + Sync {
    fn token_type(&self) -> TokenType;

    fn render(&self, token: &Token<'_>, ctx: &mut RenderContext<'_>) -> ProcessResult;
}

/// Extra markup for a block element plus an optional line map entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Decoration {
    pub classes: Vec<String>,
    pub attrs: Vec<(String, String)>,
    /// Requests a line map entry for the decorated block.
    ///
    /// The recorded line always comes from the token's own source map, and
    /// only top-level paragraphs, headings and blockquotes are recorded.
    pub line: Option<usize>,
}

impl Decoration {
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.attrs.is_empty() && self.line.is_none()
    }

    fn merge(&mut self, other: Self) {
        self.classes.extend(other.classes);
        self.attrs.extend(other.attrs);
        if self.line.is_none() {
            self.line = other.line;
        }
    }
}

/// Adds attributes to block open tokens.
pub trait AttributeDecorator: Send + Sync {
    fn decorate(&self, token: &Token<'_>) -> Option<Decoration>;
}

/// The rule carried by an [`Extension`].
pub enum Rule {
    Block(Box<dyn BlockRule>),
    Inline(Box<dyn InlineRule>),
    Render(Box<dyn RenderOverride>),
    Attribute(Box<dyn AttributeDecorator>),
}

impl Rule {
    pub fn kind(&self) -> RuleKind {
        match self {
            Self::Block(_) => RuleKind::Block,
            Self::Inline(_) => RuleKind::Inline,
            Self::Render(_) => RuleKind::Render,
            Self::Attribute(_) => RuleKind::Attribute,
        }
    }
}

/// A named rule with an optional anchor.
pub struct Extension {
    name: String,
    anchor: Option<Anchor>,
    rule: Rule,
}

impl Extension {
    pub fn block(name: impl Into<String>, rule: impl BlockRule + 'static) -> Self {
        Self::new(name, Rule::Block(Box::new(rule)))
    }

    pub fn inline(name: impl Into<String>, rule: impl InlineRule + 'static) -> Self {
        Self::new(name, Rule::Inline(Box::new(rule)))
    }

    pub fn render(name: impl Into<String>, rule: impl RenderOverride + 'static) -> Self {
        Self::new(name, Rule::Render(Box::new(rule)))
    }

    pub fn attribute(name: impl Into<String>, rule: impl AttributeDecorator + 'static) -> Self {
        Self::new(name, Rule::Attribute(Box::new(rule)))
    }

    fn new(name: impl Into<String>, rule: Rule) -> Self {
        Self {
            name: name.into(),
            anchor: None,
            rule,
        }
    }

    /// Insert directly after the named rule.
    #[must_use]
    pub fn after(mut self, name: impl Into<String>) -> Self {
        self.anchor = Some(Anchor::After(name.into()));
        self
    }

    /// Insert directly before the named rule.
    #[must_use]
    pub fn before(mut self, name: impl Into<String>) -> Self {
        self.anchor = Some(Anchor::Before(name.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn anchor(&self) -> Option<&Anchor> {
        self.anchor.as_ref()
    }

    pub fn kind(&self) -> RuleKind {
        self.rule.kind()
    }
}

/// Entry in an ordered rule list. Native rules have no implementation.
struct Slot {
    name: String,
    anchor: Option<Anchor>,
    rule: Option<Rule>,
}

impl Slot {
    fn native(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            anchor: None,
            rule: None,
        }
    }
}

/// Ordered rule lists, one per [`RuleKind`].
pub struct ExtensionRegistry {
    block: Vec<Slot>,
    inline: Vec<Slot>,
    render: Vec<Slot>,
    attribute: Vec<Slot>,
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtensionRegistry {
    /// Create a registry holding only the native rules.
    #[must_use]
    pub fn new() -> Self {
        Self {
            block: NATIVE_BLOCK_RULES.iter().map(|n| Slot::native(n)).collect(),
            inline: NATIVE_INLINE_RULES.iter().map(|n| Slot::native(n)).collect(),
            render: Vec::new(),
            attribute: Vec::new(),
        }
    }

    fn slots(&self, kind: RuleKind) -> &Vec<Slot> {
        match kind {
            RuleKind::Block => &self.block,
            RuleKind::Inline => &self.inline,
            RuleKind::Render => &self.render,
            RuleKind::Attribute => &self.attribute,
        }
    }

    fn slots_mut(&mut self, kind: RuleKind) -> &mut Vec<Slot> {
        match kind {
            RuleKind::Block => &mut self.block,
            RuleKind::Inline => &mut self.inline,
            RuleKind::Render => &mut self.render,
            RuleKind::Attribute => &mut self.attribute,
        }
    }

    /// Rule names of one kind in effective order.
    pub fn names(&self, kind: RuleKind) -> Vec<&str> {
        self.slots(kind).iter().map(|s| s.name.as_str()).collect()
    }

    /// Insert an extension into the ordered list for its kind.
    ///
    /// Unanchored extensions are appended.
    pub fn register(&mut self, extension: Extension) -> Result<(), ConfigurationError> {
        let kind = extension.kind();
        let slots = self.slots(kind);

        if slots.iter().any(|s| s.name == extension.name) {
            return Err(ConfigurationError::DuplicateName {
                kind,
                name: extension.name,
            });
        }

        if let Rule::Block(rule) = &extension.rule
            && let Some(target) = rule
                .interrupts()
                .iter()
                .find(|target| !slots.iter().any(|s| s.name == **target))
        {
            return Err(ConfigurationError::UnknownInterrupt {
                name: extension.name,
                target: (*target).to_owned(),
            });
        }

        let position = match &extension.anchor {
            None => slots.len(),
            Some(anchor) => {
                let Some(index) = slots.iter().position(|s| s.name == anchor.target()) else {
                    return Err(ConfigurationError::UnknownAnchor {
                        kind,
                        name: extension.name,
                        anchor: anchor.target().to_owned(),
                    });
                };
                anchored_position(slots, index, anchor)
            }
        };

        tracing::debug!(
            kind = %kind,
            name = %extension.name,
            position,
            "Registered extension"
        );

        self.slots_mut(kind).insert(
            position,
            Slot {
                name: extension.name,
                anchor: extension.anchor,
                rule: Some(extension.rule),
            },
        );
        Ok(())
    }

    /// Freeze the registry into an executable pipeline.
    #[must_use]
    pub fn resolve(self) -> Pipeline {
        let mut options = Options::empty();

        let block: Vec<_> = self
            .block
            .into_iter()
            .filter_map(|slot| match slot.rule {
                Some(Rule::Block(rule)) => Some(rule),
                _ => None,
            })
            .inspect(|rule| options |= rule.parser_options())
            .collect();

        let inline: Vec<_> = self
            .inline
            .into_iter()
            .filter_map(|slot| match slot.rule {
                Some(Rule::Inline(rule)) => Some(rule),
                _ => None,
            })
            .inspect(|rule| options |= rule.parser_options())
            .collect();

        let mut render: BTreeMap<TokenType, Vec<Box<dyn RenderOverride>>> = BTreeMap::new();
        for slot in self.render {
            if let Some(Rule::Render(rule)) = slot.rule {
                render.entry(rule.token_type()).or_default().push(rule);
            }
        }

        let attribute = self
            .attribute
            .into_iter()
            .filter_map(|slot| match slot.rule {
                Some(Rule::Attribute(rule)) => Some(rule),
                _ => None,
            })
            .collect();

        Pipeline {
            options,
            block,
            inline,
            render,
            attribute,
        }
    }
}

/// Index to insert at for an anchored extension.
///
/// Skips past earlier extensions anchored the same way so that the first
/// registered one stays closest to the target.
fn anchored_position(slots: &[Slot], target: usize, anchor: &Anchor) -> usize {
    let same_anchor = |slot: &Slot| slot.anchor.as_ref() == Some(anchor);
    match anchor {
        Anchor::After(_) => {
            let mut position = target + 1;
            while position < slots.len() && same_anchor(&slots[position]) {
                position += 1;
            }
            position
        }
        Anchor::Before(_) => {
            let mut position = target;
            while position > 0 && same_anchor(&slots[position - 1]) {
                position -= 1;
            }
            position
        }
    }
}

/// Resolved, immutable rule pipeline.
pub struct Pipeline {
    options: Options,
    block: Vec<Box<dyn BlockRule>>,
    inline: Vec<Box<dyn InlineRule>>,
    render: BTreeMap<TokenType, Vec<Box<dyn RenderOverride>>>,
    attribute: Vec<Box<dyn AttributeDecorator>>,
}

impl Pipeline {
    /// Parser options required by the registered rules.
    pub fn parser_options(&self) -> Options {
        self.options
    }

    /// Run block rules over the whole sequence, then inline rules over each
    /// inline run.
    pub fn transform<'a>(&self, tokens: Vec<Token<'a>>) -> Vec<Token<'a>> {
        let tokens = self
            .block
            .iter()
            .fold(tokens, |tokens, rule| rule.apply(tokens));

        if self.inline.is_empty() {
            return tokens;
        }

        let mut out = Vec::with_capacity(tokens.len());
        let mut run = Vec::new();
        for token in tokens {
            if token.is_block() {
                if !run.is_empty() {
                    out.extend(self.apply_inline(std::mem::take(&mut run)));
                }
                out.push(token);
            } else {
                run.push(token);
            }
        }
        if !run.is_empty() {
            out.extend(self.apply_inline(run));
        }
        out
    }

    fn apply_inline<'a>(&self, run: Vec<Token<'a>>) -> Vec<Token<'a>> {
        self.inline.iter().fold(run, |run, rule| rule.apply(run))
    }

    /// Overrides registered for a token type, in order.
    pub fn overrides(&self, token_type: TokenType) -> &[Box<dyn RenderOverride>] {
        self.render
            .get(&token_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Combined decoration from all attribute decorators.
    pub fn decorate(&self, token: &Token<'_>) -> Decoration {
        let mut decoration = Decoration::default();
        for decorator in &self.attribute {
            if let Some(extra) = decorator.decorate(token) {
                decoration.merge(extra);
            }
        }
        decoration
    }
}
