//! Auricle CLI - drive the effect pipeline from the command line.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "auricle")]
#[command(author, version, about = "Auricle audio effect pipeline CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a WAV file through a scene's effect chain
    Render(commands::render::RenderArgs),

    /// Run the threaded sink against null devices for a while
    Demo(commands::demo::DemoArgs),
}

fn main() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render(args) => commands::render::run(args),
        Commands::Demo(args) => commands::demo::run(args),
    }
}
