use crate::cli::GlobalArgs;
use crate::ui;
use anyhow::{Context, Result, bail};
use clap::Args;
use gallery_lib::catalog::RemoteAsset;
use gallery_lib::config::Config;
use gallery_lib::download_tracker::{DownloadObserver, Progress};
use gallery_lib::error::DownloadError;
use gallery_lib::gallery::Gallery;
use gallery_lib::media_client::HttpMediaClient;
use image::DynamicImage;
use indicatif::{MultiProgress, ProgressBar};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

#[derive(Args)]
pub struct DownloadCommand {
    /// Catalog numbers as shown by `gallery list`
    pub indices: Vec<usize>,

    /// Download every image in the catalog
    #[arg(long, conflicts_with = "indices")]
    pub all: bool,

    /// Where to save the images (defaults to the configured download directory)
    #[arg(long, short)]
    pub out_dir: Option<PathBuf>,
}

type Outcomes = Rc<RefCell<Vec<Result<PathBuf, String>>>>;

/// Drives one progress bar and saves the decoded image.
struct BarObserver {
    bar: ProgressBar,
    target: PathBuf,
    indeterminate: bool,
    outcomes: Outcomes,
}

impl DownloadObserver for BarObserver {
    fn on_progress(&mut self, progress: Progress) {
        match progress {
            Progress::Determinate(fraction) => {
                self.bar.set_position((fraction * 100.0).round() as u64);
            }
            Progress::Indeterminate { bytes_written } => {
                if !self.indeterminate {
                    self.indeterminate = true;
                    self.bar.set_style(ui::bytes_spinner_style());
                }
                self.bar.set_position(bytes_written);
            }
        }
    }

    fn on_complete(&mut self, image: DynamicImage) {
        let outcome = match image.save(&self.target) {
            Ok(()) => {
                self.bar.finish_with_message("saved");
                Ok(self.target.clone())
            }
            Err(e) => {
                self.bar.abandon_with_message("save failed");
                Err(format!("Failed to save {}: {}", self.target.display(), e))
            }
        };
        self.outcomes.borrow_mut().push(outcome);
    }

    fn on_failed(&mut self, error: DownloadError) {
        self.bar.abandon_with_message("failed");
        self.outcomes
            .borrow_mut()
            .push(Err(format!("{}: {}", self.target.display(), error)));
    }
}

impl DownloadCommand {
    pub async fn run(self, global_args: GlobalArgs) -> Result<()> {
        if !self.all && self.indices.is_empty() {
            bail!("Name at least one image number, or pass --all");
        }

        let config = Config::setup(global_args.config.as_deref())?;
        let mut gallery = Gallery::new(HttpMediaClient::new(&config)?, config.compression);
        gallery
            .refresh()
            .await
            .context("Failed to fetch the asset catalog")?;

        let selected = self.select(gallery.catalog().iter().collect())?;
        if selected.is_empty() {
            ui::info("The server has no images yet.");
            return Ok(());
        }

        let out_dir = self.out_dir.clone().unwrap_or(config.download_dir.clone());
        fs::create_dir_all(&out_dir)
            .with_context(|| format!("Failed to create {}", out_dir.display()))?;

        let multi = MultiProgress::new();
        let outcomes: Outcomes = Rc::new(RefCell::new(Vec::new()));
        let mut tracker = gallery.download_tracker();
        let mut handles = Vec::with_capacity(selected.len());

        for (position, asset) in &selected {
            let bar = multi.add(ProgressBar::new(100));
            bar.set_style(ui::percent_bar_style());
            bar.set_prefix(format!("#{position}"));

            let observer = BarObserver {
                bar,
                target: out_dir.join(target_file_name(*position, asset)),
                indeterminate: false,
                outcomes: Rc::clone(&outcomes),
            };
            handles.push(tracker.start_download(asset.url.clone(), observer));
        }

        tokio::select! {
            _ = tracker.run_until_idle() => {}
            _ = tokio::signal::ctrl_c() => {
                drop(handles);
                tracker.dispatch_pending();
                bail!("Download cancelled");
            }
        }
        drop(handles);

        let outcomes = outcomes.take();
        let failures: Vec<&String> = outcomes.iter().filter_map(|o| o.as_ref().err()).collect();
        for failure in &failures {
            ui::error(failure);
        }

        let saved = outcomes.len() - failures.len();
        if saved > 0 {
            ui::success(&format!("Saved {} images to {}", saved, out_dir.display()));
        }
        if !failures.is_empty() {
            bail!("{} of {} downloads failed", failures.len(), selected.len());
        }
        Ok(())
    }

    /// Pairs each chosen asset with its 1-based catalog number.
    fn select<'a>(&self, assets: Vec<&'a RemoteAsset>) -> Result<Vec<(usize, &'a RemoteAsset)>> {
        if self.all {
            return Ok(assets.into_iter().enumerate().map(|(i, a)| (i + 1, a)).collect());
        }

        let mut selected = Vec::with_capacity(self.indices.len());
        for &position in &self.indices {
            let Some(asset) = position.checked_sub(1).and_then(|i| assets.get(i)) else {
                bail!(
                    "There is no image #{} (the catalog has {})",
                    position,
                    assets.len()
                );
            };
            if !selected.iter().any(|(p, _)| *p == position) {
                selected.push((position, *asset));
            }
        }
        Ok(selected)
    }
}

fn target_file_name(position: usize, asset: &RemoteAsset) -> String {
    let stem = asset
        .url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|name| Path::new(name).file_stem())
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or("image");
    format!("{position:03}-{stem}.png")
}
