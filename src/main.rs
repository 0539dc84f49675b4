mod cli;

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use backup_mirror::config::{CONFIG_FILE, MirrorConfig, MirrorSettings};
use backup_mirror::output::print_summary;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            watch_dir,
            backup_dir,
            config,
            rename,
            layout,
            serialize,
            json,
        } => {
            let backup_root = prepare_backup_root(backup_dir)?;
            let watch_root = prepare_watch_root(watch_dir)?;

            let config = match config {
                Some(path) if !path.exists() => {
                    bail!("config file {} does not exist", path.display())
                }
                Some(path) => MirrorConfig::load(&path),
                None => MirrorConfig::load(Path::new(CONFIG_FILE)),
            };

            let mut settings = MirrorSettings::new(watch_root, backup_root).with_config(config);
            if let Some(rename) = rename {
                settings.rename = rename;
            }
            if let Some(layout) = layout {
                settings.layout = layout;
            }
            if serialize {
                settings.serialize_per_path = true;
            }

            println!(
                "Watching {}, mirroring into {}. Press Enter to stop.",
                settings.watch_root.display(),
                settings.backup_root.display()
            );

            let stats = backup_mirror::run(settings, stop_signal()).await?;
            print_summary(&stats, json);
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("backup_mirror=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Resolve the backup directory, creating it if needed.
fn prepare_backup_root(arg: Option<PathBuf>) -> Result<PathBuf> {
    let path = match arg {
        Some(path) => path,
        None => PathBuf::from(prompt("Enter the backup directory path: ")?),
    };
    if path.as_os_str().is_empty() {
        bail!("invalid backup path");
    }

    if !path.is_dir() {
        std::fs::create_dir_all(&path)
            .with_context(|| format!("failed to create backup directory {}", path.display()))?;
        info!(path = %path.display(), "backup directory created");
    }

    path.canonicalize()
        .with_context(|| format!("failed to resolve {}", path.display()))
}

fn prepare_watch_root(arg: Option<PathBuf>) -> Result<PathBuf> {
    let path = match arg {
        Some(path) => path,
        None => PathBuf::from(prompt("Enter the directory to watch: ")?),
    };
    if path.as_os_str().is_empty() || !path.is_dir() {
        bail!("invalid directory to watch: {}", path.display());
    }

    path.canonicalize()
        .with_context(|| format!("failed to resolve {}", path.display()))
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Resolves on Enter or Ctrl-C. If stdin is closed, only Ctrl-C stops.
async fn stop_signal() {
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    // Plain thread: a blocking stdin read must not hold up runtime shutdown.
    std::thread::spawn(move || {
        let mut line = String::new();
        if let Ok(n) = io::stdin().read_line(&mut line)
            && n > 0
        {
            let _ = tx.send(());
        }
    });

    tokio::select! {
        Ok(()) = rx => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}
