//! `syncmark line` command implementation.

use std::path::PathBuf;

use clap::Args;

use super::{SettingsArgs, read_source};
use crate::error::CliError;
use crate::output::Output;

/// Arguments for the line command.
#[derive(Args, Debug)]
pub(crate) struct LineArgs {
    /// Markdown file to render.
    pub file: PathBuf,

    /// 1-based editor line.
    pub line: usize,

    #[command(flatten)]
    settings: SettingsArgs,
}

impl LineArgs {
    /// Execute the line command.
    ///
    /// Prints the starting line of the nearest preview block at or above
    /// `line`. Prints nothing when the line precedes every block.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration fails or the file cannot be read.
    pub(crate) fn execute(self) -> Result<(), CliError> {
        let output = Output::new();
        let source = read_source(&self.file)?;
        let mut renderer = self.settings.renderer()?;
        renderer.render(&source);

        match renderer.closest_preview_line(self.line) {
            Some(line) => output.emit(&line.to_string())?,
            None => output.info(&format!("No preview block at or before line {}", self.line)),
        }
        Ok(())
    }
}
