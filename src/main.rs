use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use watchfolder::logging;
use watchfolder::watcher::{ChannelUploader, PipelineError, WatchRegistry, WatchSources};
use watchfolder::{Settings, WatcherState};

#[derive(Parser)]
#[command(name = "watchfolder")]
#[command(about = "Move new files out of watched folders and hand them to an uploader")]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "WATCHFOLDER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default settings file
    Init {
        /// Overwrite an existing settings file
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration
    Config,

    /// List configured watch folders
    List,

    /// Watch all enabled folders until interrupted
    Run,
}

/// A missing file yields defaults; an unreadable or invalid one is an error.
fn load_settings(path: &Path) -> Result<Settings> {
    Settings::load_from(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(Settings::default_path);

    match cli.command {
        Commands::Init { force } => {
            let path = Settings::init_config_file(&config_path, force)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("Created configuration file at: {}", path.display());
            println!("Edit this file to add watch folders.");
        }

        Commands::Config => {
            let settings = load_settings(&config_path)?;
            println!("Current Configuration ({}):", config_path.display());
            println!("{}", "=".repeat(50));
            println!(
                "{}",
                toml::to_string_pretty(&settings).context("Error displaying config")?
            );
        }

        Commands::List => {
            let settings = load_settings(&config_path)?;
            let sources = WatchSources::from_settings(&settings);
            let mut any = false;
            for task in sources.tasks() {
                for target in task.targets() {
                    any = true;
                    let status = if task.is_target_active(&target) {
                        "enabled"
                    } else {
                        "disabled"
                    };
                    println!(
                        "{:<10} {:<16} {} [{}]{}",
                        status,
                        task.name(),
                        target.folder().display(),
                        target.filter(),
                        if target.move_to_destination() { " -> move" } else { "" }
                    );
                }
            }
            if !any {
                println!("No watch folders configured in {}", config_path.display());
            }
        }

        Commands::Run => run(load_settings(&config_path)?).await?,
    }

    Ok(())
}

async fn run(settings: Settings) -> Result<()> {
    logging::init_with_config(&settings.logging);

    let (uploader, mut uploads) = ChannelUploader::new();
    let registry = WatchRegistry::builder()
        .uploader(Arc::new(uploader))
        .options(settings.watch.clone())
        .on_failure(Arc::new(|path: &Path, e: &PipelineError| {
            eprintln!("Failed to process {}: {e}", path.display());
        }))
        .build()?;

    let sources = WatchSources::from_settings(&settings);
    let report = registry.synchronize(&sources);
    for failure in &report.failed {
        eprintln!("Cannot watch {}: {}", failure.folder.display(), failure.error);
    }

    let watching = registry
        .watchers()
        .iter()
        .filter(|w| w.state == WatcherState::Enabled)
        .count();
    println!(
        "Watching {watching} of {} folders. Press Ctrl-C to stop.",
        report.registered
    );

    loop {
        tokio::select! {
            Some(request) = uploads.recv() => {
                watchfolder::log_event!("upload", "queued", path = request.path, task = request.task.name);
                println!("{}\t{}", request.task.name, request.path.display());
            }
            res = tokio::signal::ctrl_c() => {
                res.context("Failed to listen for Ctrl-C")?;
                break;
            }
        }
    }

    registry.dispose();
    println!("Stopped.");
    Ok(())
}
