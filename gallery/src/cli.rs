use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{download::DownloadCommand, list::ListCommand, upload::UploadCommand};

#[derive(Parser)]
#[command(name = "gallery")]
#[command(about = "Browse, download and upload images on a media-asset server")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global_args: GlobalArgs,
}

#[derive(clap::Args, Clone)]
pub struct GlobalArgs {
    /// Path to a gallery.toml file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Show debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the images available on the server
    #[command(alias = "ls")]
    List(ListCommand),

    /// Download images with progress
    Download(DownloadCommand),

    /// Compress a local image and upload it
    Upload(UploadCommand),
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::List(cmd) => cmd.run(self.global_args).await,
            Commands::Download(cmd) => cmd.run(self.global_args).await,
            Commands::Upload(cmd) => cmd.run(self.global_args).await,
        }
    }
}
