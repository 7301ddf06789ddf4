//! Modwatch CLI entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "modwatch")]
#[command(about = "Track the module dependencies of JS/CSS entry files and report what changed", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project root (defaults to current directory)
    #[arg(short, long, default_value = ".", global = true)]
    root: PathBuf,

    /// TOML file with setup options
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Cache namespace (defaults to the root directory name)
    #[arg(short, long, global = true)]
    project: Option<String>,

    /// Entry glob, relative to the project root
    #[arg(short, long = "glob", global = true)]
    globs: Vec<String>,

    /// Explicit entry file
    #[arg(short, long = "entry", global = true)]
    entries: Vec<PathBuf>,

    /// Snapshot directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every entry with its dependencies as JSON
    Entries,
    /// Check for changes since the last run and print them as JSON
    Changes,
    /// Print the directories a watch session listens to
    Dirs,
    /// Watch the project and report each batch of changes
    Watch {
        /// Shell command to run per batch; the batch JSON is in MODWATCH_INFO
        #[arg(short = 'x', long)]
        exec: Option<String>,

        /// Include affected entries and their dependencies in each batch
        #[arg(long)]
        with_entries: bool,
    },
    /// Remove the project's snapshot
    Clear,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("modwatch v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let options = commands::load_options(commands::OptionArgs {
        root: cli.root,
        config: cli.config,
        project: cli.project,
        globs: cli.globs,
        entries: cli.entries,
        cache_dir: cli.cache_dir,
    })?;

    // Initialize logging
    let log_level = if cli.verbose || options.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!("modwatch={}", log_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::debug!("Project root: {}", options.project_root.display());

    match cli.command {
        Commands::Entries => commands::entries(options),
        Commands::Changes => commands::changes(options),
        Commands::Dirs => commands::dirs(options),
        Commands::Watch { exec, with_entries } => {
            commands::watch(options, exec, with_entries).await
        }
        Commands::Clear => commands::clear(options),
        Commands::Version => Ok(()),
    }
}
