//! CLI command implementations

use anyhow::Context;
use modwatch_core::clear_cache;
use modwatch_indexer::{ProjectConfig, SetupOptions};
use modwatch_watcher::{ModulesWatcher, WatchBatch};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// Setup options as given on the command line.
pub struct OptionArgs {
    pub root: PathBuf,
    pub config: Option<PathBuf>,
    pub project: Option<String>,
    pub globs: Vec<String>,
    pub entries: Vec<PathBuf>,
    pub cache_dir: Option<PathBuf>,
}

/// Build setup options from an optional TOML file, then apply command-line
/// overrides. Relative paths are taken from the current directory.
pub fn load_options(args: OptionArgs) -> anyhow::Result<SetupOptions> {
    let cwd = std::env::current_dir()?;
    let mut options = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            toml::from_str::<SetupOptions>(&text)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => SetupOptions::new("", PathBuf::new()),
    };

    if options.project_root.as_os_str().is_empty() || args.root != Path::new(".") {
        options.project_root = args.root;
    }
    options.project_root = absolute(&cwd, &options.project_root);
    if let Some(project) = args.project {
        options.project = project;
    }
    options.glob_entries.extend(args.globs);
    options.entries.extend(args.entries);
    options.entries = options
        .entries
        .iter()
        .map(|entry| absolute(&cwd, entry))
        .collect();
    if let Some(dir) = args.cache_dir {
        options.cache_dir = Some(absolute(&cwd, &dir));
    }
    Ok(options)
}

fn absolute(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        modwatch_core::paths::clean(path)
    } else {
        modwatch_core::paths::clean(&base.join(path))
    }
}

pub fn entries(options: SetupOptions) -> anyhow::Result<()> {
    let watcher = ModulesWatcher::setup(options)?;
    let entries = watcher.get_entries();
    tracing::info!("{} entries", entries.len());
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

pub fn changes(options: SetupOptions) -> anyhow::Result<()> {
    let watcher = ModulesWatcher::setup(options)?;
    let changes = watcher.make_changes();
    tracing::info!("{} change(s)", changes.len());
    println!("{}", serde_json::to_string_pretty(&changes)?);
    Ok(())
}

pub fn dirs(options: SetupOptions) -> anyhow::Result<()> {
    let watcher = ModulesWatcher::setup(options)?;
    for dir in watcher.get_dirs_to_watch() {
        println!("{}", dir.display());
    }
    Ok(())
}

pub async fn watch(
    options: SetupOptions,
    exec: Option<String>,
    with_entries: bool,
) -> anyhow::Result<()> {
    let mut watcher = ModulesWatcher::setup(options)?;
    let initial = watcher.make_changes();
    tracing::info!(
        "Baseline established ({} change(s) since last run)",
        initial.len()
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    watcher.watch(with_entries, move |batch| {
        let _ = tx.send(batch);
    })?;
    tracing::info!("Watching {} (Ctrl-C to stop)", watcher.config().root.display());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            batch = rx.recv() => match batch {
                Some(Ok(batch)) => report(&batch, exec.as_deref()).await?,
                Some(Err(e)) => tracing::error!("Watch error: {}", e),
                None => break,
            },
        }
    }

    watcher.stop_watching().await;
    Ok(())
}

async fn report(batch: &WatchBatch, exec: Option<&str>) -> anyhow::Result<()> {
    let json = serde_json::to_string(batch)?;
    println!("{}", json);
    let Some(command) = exec else {
        return Ok(());
    };
    tracing::debug!("Running `{}`", command);
    let status = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .env("MODWATCH_INFO", &json)
        .status()
        .await?;
    if !status.success() {
        tracing::warn!("`{}` exited with {}", command, status);
    }
    Ok(())
}

pub fn clear(options: SetupOptions) -> anyhow::Result<()> {
    let config = ProjectConfig::from_options(options)?;
    tracing::info!("Clearing cache for: {}", config.project);

    if clear_cache(&config.cache_dir, &config.project)? {
        tracing::info!("Cache cleared");
    } else {
        tracing::info!("No snapshot at {}", config.snapshot_path().display());
    }
    Ok(())
}
