//! `syncmark render` command implementation.

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use syncmark_renderer::RenderResult;

use super::{SettingsArgs, read_source};
use crate::error::CliError;
use crate::output::Output;

/// Output format for the render command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum Format {
    /// HTML fragment only.
    #[default]
    Html,
    /// HTML, line map and warnings as a JSON object.
    Json,
}

/// Arguments for the render command.
#[derive(Args, Debug)]
pub(crate) struct RenderArgs {
    /// Markdown file to render.
    pub file: PathBuf,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Html)]
    format: Format,

    #[command(flatten)]
    settings: SettingsArgs,
}

impl RenderArgs {
    /// Execute the render command.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration fails or the file cannot be read.
    pub(crate) fn execute(self) -> Result<(), CliError> {
        let output = Output::new();
        let source = read_source(&self.file)?;
        let mut renderer = self.settings.renderer()?;

        let result = renderer.render(&source);
        tracing::info!(
            file = %self.file.display(),
            blocks = result.line_map.len(),
            "Rendered"
        );

        // JSON consumers get warnings in the payload
        if self.format == Format::Html {
            for warning in &result.warnings {
                output.warning(&format!("Warning: {warning}"));
            }
        }

        output.emit(&format_result(&result, self.format)?)?;
        Ok(())
    }
}

fn format_result(result: &RenderResult, format: Format) -> Result<String, CliError> {
    match format {
        Format::Html => Ok(result.html.clone()),
        Format::Json => Ok(serde_json::to_string_pretty(result)?),
    }
}
