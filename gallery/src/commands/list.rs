use crate::cli::GlobalArgs;
use crate::ui;
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use gallery_lib::config::Config;
use gallery_lib::gallery::Gallery;
use gallery_lib::media_client::HttpMediaClient;

#[derive(Args)]
pub struct ListCommand {
    /// Only show assets whose URL contains this text
    pub filter: Option<String>,
}

impl ListCommand {
    pub async fn run(self, global_args: GlobalArgs) -> Result<()> {
        let config = Config::setup(global_args.config.as_deref())?;
        let mut gallery = Gallery::new(HttpMediaClient::new(&config)?, config.compression);

        let catalog = gallery
            .refresh()
            .await
            .context("Failed to fetch the asset catalog")?;

        if catalog.is_empty() {
            ui::info("The server has no images yet.");
            ui::tip("Use `gallery upload <path>` to add one.");
            return Ok(());
        }

        let mut shown = 0;
        for (position, asset) in catalog.iter().enumerate() {
            let url = asset.url.as_str();
            if self.filter.as_deref().is_some_and(|f| !url.contains(f)) {
                continue;
            }
            tracing::info!("{:>4}  {}", format!("{}", position + 1).dimmed(), url);
            shown += 1;
        }

        tracing::info!("");
        ui::success(&format!("{} of {} images shown", shown, catalog.len()));
        ui::tip("Use `gallery download <number>...` to fetch images.");
        Ok(())
    }
}
