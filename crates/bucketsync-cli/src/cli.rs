use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "bucketsync",
    about = "Mirror a file tree into an S3-compatible bucket",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML file with connection settings
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Object store endpoint (host[:port] or URL)
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Connect without TLS
    #[arg(long, global = true)]
    pub insecure: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// List the mirrored tree under a bucket/prefix
    Ls(LsArgs),
    /// Mirror a local file, symlink or directory tree
    Put(PutArgs),
    /// Remove one entry from the mirrored tree
    Rm(RmArgs),
}

#[derive(Args)]
pub struct LsArgs {
    /// Destination as bucket/prefix
    pub dest: String,
    /// Fetch per-object metadata for original mtime and mode
    #[arg(long)]
    pub full: bool,
}

#[derive(Args)]
pub struct PutArgs {
    /// Local file or directory
    pub local: PathBuf,
    /// Destination as bucket/prefix
    pub dest: String,
    /// Relative path to store the local root under
    #[arg(long = "as", value_name = "RELPATH")]
    pub as_path: Option<String>,
}

#[derive(Args)]
pub struct RmArgs {
    /// Destination as bucket/prefix
    pub dest: String,
    /// Relative path of the entry
    pub path: String,
    /// The entry is a directory
    #[arg(long)]
    pub dir: bool,
}
