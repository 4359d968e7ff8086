//! CLI command implementations.

pub(crate) mod line;
pub(crate) mod render;

use std::path::{Path, PathBuf};

use clap::Args;
use syncmark_config::{CliSettings, Config};
use syncmark_renderer::MarkdownRenderer;

use crate::error::CliError;

pub(crate) use line::LineArgs;
pub(crate) use render::RenderArgs;

/// Renderer settings shared by all commands.
#[derive(Args, Debug)]
pub(crate) struct SettingsArgs {
    /// Path to configuration file (default: auto-discover syncmark.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable math rendering (default: enabled).
    #[arg(long)]
    math: Option<bool>,

    /// Disable math rendering.
    #[arg(long, conflicts_with = "math")]
    no_math: bool,

    /// Enable emoji images (default: enabled).
    #[arg(long)]
    emoji: Option<bool>,

    /// Disable emoji images.
    #[arg(long, conflicts_with = "emoji")]
    no_emoji: bool,

    /// Escape raw HTML in the source.
    #[arg(long)]
    no_html: bool,

    /// Disable the line-number gutter on code blocks.
    #[arg(long)]
    no_line_numbers: bool,

    /// Escape decoded diagram payloads instead of trusting them.
    #[arg(long)]
    untrusted_diagrams: bool,

    /// Base path or URL for emoji images (overrides config).
    #[arg(long, env = "SYNCMARK_EMOJI_BASE")]
    emoji_base: Option<String>,
}

impl SettingsArgs {
    /// Overrides implied by the flags; unset flags leave the config alone.
    fn cli_settings(&self) -> CliSettings {
        CliSettings {
            html: self.no_html.then_some(false),
            math: self.no_math.then_some(false).or(self.math),
            emoji: self.no_emoji.then_some(false).or(self.emoji),
            line_numbers: self.no_line_numbers.then_some(false),
            trust_diagram_payload: self.untrusted_diagrams.then_some(false),
            emoji_asset_base: self.emoji_base.clone(),
        }
    }

    /// Load config and build a renderer from it.
    pub(crate) fn renderer(&self) -> Result<MarkdownRenderer, CliError> {
        let config = Config::load(self.config.as_deref(), Some(&self.cli_settings()))?;
        if let Some(path) = &config.config_path {
            tracing::info!(path = %path.display(), "Loaded configuration");
        }
        let renderer = MarkdownRenderer::builder()
            .options(config.renderer_options())
            .macros(config.macro_table())
            .build()?;
        Ok(renderer)
    }
}

/// Read a markdown source file.
pub(crate) fn read_source(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.display().to_string(),
        source,
    })
}
