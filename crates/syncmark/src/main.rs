//! syncmark CLI - markdown preview renderer.
//!
//! Provides commands for:
//! - `render`: Render a markdown file to HTML (or JSON with the line map)
//! - `line`: Find the preview block for an editor line

mod commands;
mod error;
mod output;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{LineArgs, RenderArgs};
use output::Output;

/// syncmark - markdown preview renderer with source line mapping.
#[derive(Parser)]
#[command(name = "syncmark", version, about)]
struct Cli {
    /// Enable verbose output (show render warnings as logs).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a markdown file.
    Render(RenderArgs),
    /// Print the preview line closest to an editor line.
    Line(LineArgs),
}

fn main() {
    let cli = Cli::parse();
    let output = Output::new();

    // --verbose enables INFO level, otherwise use RUST_LOG or default to WARN
    let filter = if cli.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Render(args) => args.execute(),
        Commands::Line(args) => args.execute(),
    };

    if let Err(err) = result {
        output.error(&format!("Error: {err}"));
        std::process::exit(1);
    }
}
