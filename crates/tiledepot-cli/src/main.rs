use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "tiledepot")]
#[command(version, about = "TileDepot tile cache server", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve tiles, TileJSON, styles, sprites, glyphs and GeoJSON
    Serve(commands::serve::ServeArgs),

    /// Run the seed and cleanup tasks declared under the data directory
    Seed(commands::seed::SeedArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tiledepot={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Execute the command
    match cli.command {
        Commands::Serve(args) => commands::serve::execute(args).await,
        Commands::Seed(args) => commands::seed::execute(args).await,
    }
}
