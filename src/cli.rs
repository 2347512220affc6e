/// CLI argument parsing

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use stackvault::utils::Overrides;

// Build timestamp injected at compile time
pub const VERSION_WITH_BUILD: &str = concat!(env!("CARGO_PKG_VERSION"), " (built: ", env!("BUILD_TIMESTAMP"), ")");

#[derive(Parser)]
#[command(name = "stackvault")]
#[command(author, version = VERSION_WITH_BUILD, about, long_about = None)]
pub struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print the run report as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(flatten)]
    pub roots: RootArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Default)]
pub struct RootArgs {
    /// Directory whose subdirectories are the projects to back up
    #[arg(long, global = true, env = "STACKVAULT_SOURCE_ROOT", value_name = "DIR")]
    pub source_root: Option<PathBuf>,

    /// Directory holding backup sets
    #[arg(long, global = true, env = "STACKVAULT_BACKUP_ROOT", value_name = "DIR")]
    pub backup_root: Option<PathBuf>,

    /// Default directory projects are restored into
    #[arg(long, global = true, env = "STACKVAULT_RESTORE_ROOT", value_name = "DIR")]
    pub restore_root: Option<PathBuf>,

    /// Image used for the disposable volume data mover
    #[arg(long, global = true, env = "STACKVAULT_MOVER_IMAGE", value_name = "IMAGE")]
    pub mover_image: Option<String>,
}

impl From<RootArgs> for Overrides {
    fn from(args: RootArgs) -> Self {
        Self {
            source_root: args.source_root,
            backup_root: args.backup_root,
            restore_root: args.restore_root,
            mover_image: args.mover_image,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Back up every project under the source root
    Backup,

    /// Restore a backup set (the newest one by default)
    Restore {
        /// Backup set directory to restore
        backup_path: Option<PathBuf>,

        /// Directory to restore projects into
        target_root: Option<PathBuf>,
    },

    /// List backup sets, newest first
    List,

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Save the effective configuration to the config file
    Save,
}
