use crate::catalog::Catalog;
use crate::compressor::{CompressionResult, ImageCompressor};
use crate::config::CompressionSettings;
use crate::download_tracker::DownloadTracker;
use crate::error::{CatalogError, UploadError};
use crate::media_client::MediaClient;
use crate::uploader::{AssetUploader, UploadRequest};
use image::DynamicImage;
use reqwest::StatusCode;
use std::sync::Arc;

/// What a successful [`Gallery::upload_image`] did.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadReport {
    pub status: StatusCode,
    pub quality: f32,
    pub bytes: usize,
    /// Whether the follow-up catalog refresh succeeded
    pub refreshed: bool,
}

/// Owns the catalog and wires the transfer components to one [`MediaClient`].
pub struct Gallery<C> {
    client: Arc<C>,
    compressor: ImageCompressor,
    uploader: AssetUploader<C>,
    catalog: Catalog,
}

impl<C: MediaClient + 'static> Gallery<C> {
    pub fn new(client: C, compression: CompressionSettings) -> Self {
        let client = Arc::new(client);
        Self {
            uploader: AssetUploader::new(Arc::clone(&client)),
            compressor: ImageCompressor::new(compression),
            catalog: Catalog::default(),
            client,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// A tracker sharing this gallery's client.
    pub fn download_tracker(&self) -> DownloadTracker<C> {
        DownloadTracker::new(Arc::clone(&self.client))
    }

    /// Fetches the catalog and replaces the current one as a whole.
    /// On failure the previous catalog stays untouched.
    pub async fn refresh(&mut self) -> Result<&Catalog, CatalogError> {
        let catalog = self.client.fetch_catalog().await?;
        tracing::debug!("Catalog refreshed: {} assets", catalog.len());
        self.catalog = catalog;
        Ok(&self.catalog)
    }

    /// Hook for a confirmed upload: brings the catalog up to date.
    pub async fn did_upload_image(&mut self) -> Result<&Catalog, CatalogError> {
        self.refresh().await
    }

    pub fn compress(&self, image: &DynamicImage) -> Result<CompressionResult, UploadError> {
        Ok(self.compressor.compress(image)?)
    }

    /// Compresses, uploads and, once the server confirmed, refreshes the catalog.
    /// A failed refresh is logged but does not turn the upload into a failure.
    /// Dropping the returned future aborts an upload still in flight.
    pub async fn upload_image(
        &mut self,
        image: &DynamicImage,
        filename: &str,
    ) -> Result<UploadReport, UploadError> {
        let compressed = self.compress(image)?;
        let bytes = compressed.payload.len();
        let status = self
            .uploader
            .spawn(UploadRequest::jpeg(compressed.payload, filename))
            .outcome()
            .await?;

        let refreshed = match self.did_upload_image().await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Upload succeeded but refreshing the catalog failed: {}", e);
                false
            }
        };

        Ok(UploadReport {
            status,
            quality: compressed.quality,
            bytes,
            refreshed,
        })
    }
}
