use crate::cli::GlobalArgs;
use crate::ui;
use anyhow::{Context, Result};
use clap::Args;
use gallery_lib::compressor::load_image;
use gallery_lib::config::Config;
use gallery_lib::error::UploadError;
use gallery_lib::gallery::Gallery;
use gallery_lib::media_client::HttpMediaClient;
use gallery_lib::uploader::DEFAULT_FILENAME;
use indicatif::HumanBytes;
use std::path::PathBuf;

#[derive(Args)]
pub struct UploadCommand {
    /// Image file to upload (any format the decoder understands)
    pub path: PathBuf,

    /// Compression budget in bytes (defaults to the configured budget, 1 MiB)
    #[arg(long)]
    pub max_bytes: Option<usize>,

    /// File name reported to the server
    #[arg(long, default_value = DEFAULT_FILENAME)]
    pub name: String,
}

impl UploadCommand {
    pub async fn run(self, global_args: GlobalArgs) -> Result<()> {
        let config = Config::setup(global_args.config.as_deref())?;
        let mut compression = config.compression;
        if let Some(max_bytes) = self.max_bytes {
            compression.max_bytes = max_bytes;
        }
        compression.validate()?;
        let mut gallery = Gallery::new(HttpMediaClient::new(&config)?, compression);

        let image = load_image(&self.path)
            .with_context(|| format!("Failed to read image {}", self.path.display()))?;

        // Dropping the upload future on Ctrl-C aborts the transfer.
        let outcome = tokio::select! {
            outcome = gallery.upload_image(&image, &self.name) => outcome,
            _ = tokio::signal::ctrl_c() => Err(UploadError::Cancelled),
        };

        match outcome {
            Ok(report) => {
                ui::success(&format!(
                    "Uploaded {} ({} at quality {:.1})",
                    self.name,
                    HumanBytes(report.bytes as u64),
                    report.quality
                ));
                if report.bytes > compression.max_bytes {
                    ui::warning(&format!(
                        "It was still above the {} budget at minimum quality.",
                        HumanBytes(compression.max_bytes as u64)
                    ));
                }
                if report.refreshed {
                    ui::info(&format!(
                        "The server now has {} images.",
                        gallery.catalog().len()
                    ));
                } else {
                    ui::warning("Could not refresh the catalog after the upload.");
                }
                Ok(())
            }
            Err(e) => {
                ui::error("Upload failed");
                if e.is_retryable() {
                    ui::tip("This looks temporary; try again in a moment.");
                }
                Err(e.into())
            }
        }
    }
}
