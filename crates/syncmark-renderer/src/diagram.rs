//! Render override for diagram code blocks.
//!
//! Fenced blocks are dispatched on their language tag:
//!
//! - `diagram`: base64-encoded markup, decoded and emitted inside
//!   `<pre class="diagram">`.
//! - `mermaid`, `plantuml`: escaped source inside
//!   `<pre class="codeblock-{lang}"><code>` for client-side rendering.
//! - anything else passes through to the next override.

use std::fmt::Write;

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

use crate::code_block::ProcessResult;
use crate::registry::{RenderContext, RenderOverride};
use crate::state::escape_html;
use crate::token::{Token, TokenKind, TokenType};

/// Language tag carrying a base64 payload.
pub const ENCODED_DIAGRAM: &str = "diagram";

/// Language tags rendered in the browser.
pub const CLIENT_DIAGRAMS: &[&str] = &["mermaid", "plantuml"];

/// Failure to decode a `diagram` payload.
#[derive(Debug, thiserror::Error)]
pub enum DiagramError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Standard alphabet, padding optional.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode a base64 diagram payload, ignoring embedded whitespace.
pub fn decode_payload(content: &str) -> Result<String, DiagramError> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = PAYLOAD_ENGINE.decode(compact)?;
    Ok(String::from_utf8(bytes)?)
}

/// Render override for fenced diagram blocks.
#[derive(Clone, Copy, Debug)]
pub struct DiagramOverride {
    trust_payload: bool,
}

impl Default for DiagramOverride {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagramOverride {
    /// Create an override that emits decoded payloads verbatim.
    #[must_use]
    pub fn new() -> Self {
        Self {
            trust_payload: true,
        }
    }

    /// Whether decoded `diagram` payloads are emitted without escaping.
    ///
    /// Only trust payloads produced by the same authoring pipeline.
    #[must_use]
    pub fn trust_payload(mut self, trust: bool) -> Self {
        self.trust_payload = trust;
        self
    }
}

impl RenderOverride for DiagramOverride {
    fn token_type(&self) -> TokenType {
        TokenType::Fence
    }

    fn render(&self, token: &Token<'_>, ctx: &mut RenderContext<'_>) -> ProcessResult {
        let TokenKind::Fence {
            language: Some(language),
            content,
        } = &token.kind
        else {
            return ProcessResult::PassThrough;
        };

        let mut html = String::new();
        if language == ENCODED_DIAGRAM {
            match decode_payload(content) {
                Ok(markup) if self.trust_payload => {
                    write!(html, r#"<pre class="diagram">{markup}</pre>"#).unwrap();
                }
                Ok(markup) => {
                    write!(html, r#"<pre class="diagram">{}</pre>"#, escape_html(&markup)).unwrap();
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to decode diagram payload");
                    ctx.warn(format!("diagram: {e}"));
                    write!(html, r#"<pre class="diagram">{}</pre>"#, escape_html(content)).unwrap();
                }
            }
        } else if CLIENT_DIAGRAMS.contains(&language.as_str()) {
            write!(
                html,
                r#"<pre class="codeblock-{language}"><code>{}</code></pre>"#,
                escape_html(content)
            )
            .unwrap();
        } else {
            return ProcessResult::PassThrough;
        }

        ProcessResult::Html(html)
    }
}
