// Command line arguments
use crate::pool::DEFAULT_MAX_SESSIONS;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ssh-remote")]
#[command(about = "Reconcile files and folders on a remote host over SSH")]
#[command(version = "0.1.0")]
pub struct Cli {
    /// SSH server hostname or IP address
    #[arg(short = 'H', long)]
    pub host: String,

    /// SSH server port
    #[arg(short, long, default_value = "22")]
    pub port: u16,

    /// SSH username (defaults to $USER)
    #[arg(short, long)]
    pub username: Option<String>,

    /// SSH password
    #[arg(short = 'P', long)]
    pub password: Option<String>,

    /// Environment variable holding the SSH password
    #[arg(long)]
    pub password_env_var: Option<String>,

    /// SSH private key file path
    #[arg(short, long)]
    pub key_file: Option<PathBuf>,

    /// Use SSH agent for authentication
    #[arg(long)]
    pub use_agent: bool,

    /// Prefix remote commands with sudo
    #[arg(long)]
    pub sudo: bool,

    /// Maximum number of concurrent SSH channels
    #[arg(long, default_value_t = DEFAULT_MAX_SESSIONS)]
    pub max_sessions: usize,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage a remote file
    File {
        #[command(subcommand)]
        action: FileAction,
    },
    /// Manage remote folders
    Folder {
        #[command(subcommand)]
        action: FolderAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum FileAction {
    /// Create the file, or converge it to the given content and ownership
    Apply {
        /// Absolute path of the remote file
        #[arg(long)]
        path: String,
        /// File content
        #[arg(long, conflicts_with = "content_file", required_unless_present = "content_file")]
        content: Option<String>,
        /// Local file whose content is uploaded
        #[arg(long)]
        content_file: Option<PathBuf>,
        /// Create missing parent directories first
        #[arg(long)]
        ensure_dir: bool,
        #[command(flatten)]
        ownership: OwnershipArgs,
    },
    /// Print the current state of remote files
    Read {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Delete remote files
    Delete {
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum FolderAction {
    /// Create the folders, or converge their ownership
    Apply {
        #[arg(required = true)]
        paths: Vec<String>,
        #[command(flatten)]
        ownership: OwnershipArgs,
    },
    /// Print the current state of remote folders
    Read {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Delete remote folders and everything inside them
    Delete {
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct OwnershipArgs {
    /// Owner uid
    #[arg(long)]
    pub owner: Option<u32>,
    /// Owner user name, used when no uid is given
    #[arg(long)]
    pub owner_name: Option<String>,
    /// Group gid
    #[arg(long)]
    pub group: Option<u32>,
    /// Group name, used when no gid is given
    #[arg(long)]
    pub group_name: Option<String>,
    /// Octal permissions, e.g. 0644
    #[arg(long)]
    pub permissions: Option<String>,
}
