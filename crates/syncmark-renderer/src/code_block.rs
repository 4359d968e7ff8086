//! Code block helpers shared by the fence render overrides.
//!
//! Fenced code blocks are dispatched through the render-override table: the
//! diagram override claims reserved languages, the highlight override claims
//! everything else, and [`render_plain`] is the fallback when neither is
//! registered.

use std::collections::HashMap;
use std::fmt::Write;

use crate::state::escape_html;

/// Result of a render override.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessResult {
    /// Replace the token with this HTML.
    Html(String),

    /// Not handled here; try the next override, then the default rendering.
    PassThrough,
}

/// Parse fence info string into language and attributes.
///
/// Format: `language [key=value ...]`
#[must_use]
pub(crate) fn parse_fence_info(info: &str) -> (String, HashMap<String, String>) {
    let mut parts = info.split_whitespace();
    let language = parts.next().unwrap_or("").to_owned();

    let mut attrs = HashMap::new();
    for part in parts {
        if let Some((key, value)) = part.split_once('=') {
            // Strip quotes if present
            let value = value.trim_matches('"').trim_matches('\'');
            attrs.insert(key.to_owned(), value.to_owned());
        }
    }

    (language, attrs)
}

/// Render a code block without highlighting.
pub(crate) fn render_plain(language: Option<&str>, content: &str, out: &mut String) {
    if let Some(lang) = language {
        write!(
            out,
            r#"<pre><code class="language-{}">{}</code></pre>"#,
            escape_html(lang),
            escape_html(content)
        )
        .unwrap();
    } else {
        write!(out, "<pre><code>{}</code></pre>", escape_html(content)).unwrap();
    }
}
