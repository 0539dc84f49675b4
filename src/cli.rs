use std::path::PathBuf;

use clap::{Parser, Subcommand};

use backup_mirror::mirror::handlers::RenamePolicy;
use backup_mirror::mirror::target::TargetLayout;

/// Mirror file changes from a watched directory into a backup directory as they happen.
///
/// Created and modified files are copied into the backup directory, deletions
/// remove the backup copy, and renames are applied according to the rename policy.
#[derive(Parser, Debug)]
#[command(
    name = "backup-mirror",
    version,
    about,
    long_about = None,
    propagate_version = true,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch a directory and mirror its changes until Enter or Ctrl-C.
    ///
    /// Omitted directories are prompted for on stdin. A missing backup
    /// directory is created.
    Watch {
        /// Directory tree to watch.
        watch_dir: Option<PathBuf>,

        /// Directory receiving the mirrored files.
        backup_dir: Option<PathBuf>,

        /// Config file (defaults to ./backup-mirror.toml when present).
        #[arg(long)]
        config: Option<PathBuf>,

        /// What a rename does to the backup directory.
        #[arg(long, value_enum)]
        rename: Option<RenamePolicy>,

        /// Flatten everything into the backup root, or keep subdirectories.
        #[arg(long, value_enum)]
        layout: Option<TargetLayout>,

        /// Serialize handlers that touch the same backup file.
        #[arg(long)]
        serialize: bool,

        /// Print the session summary as JSON.
        #[arg(long)]
        json: bool,
    },
}
