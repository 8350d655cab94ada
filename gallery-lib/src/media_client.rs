use crate::catalog::{self, Catalog};
use crate::config::Config;
use crate::download_tracker::{self, DownloadStream};
use crate::error::{CatalogError, DownloadError, UploadError};
use crate::uploader::{self, UploadRequest};
use anyhow::{Context, Result};
use reqwest::{Client, StatusCode, Url};

/// The fixed REST surface of the asset server.
pub trait MediaClient: Send + Sync {
    /// Fetches the full list of remote assets.
    fn fetch_catalog(&self) -> impl Future<Output = Result<Catalog, CatalogError>> + Send;

    /// Uploads a single file. Resolves to the (always `200 OK`) status on success.
    fn upload(
        &self,
        request: UploadRequest,
    ) -> impl Future<Output = Result<StatusCode, UploadError>> + Send;

    /// Starts streaming the body behind `url`.
    fn open_download(
        &self,
        url: &Url,
    ) -> impl Future<Output = Result<DownloadStream, DownloadError>> + Send;
}

pub struct HttpMediaClient {
    config: Config,
    client: Client,
}

impl HttpMediaClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("gallery/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self::with_client(config, client))
    }

    /// Uses a preconfigured client, e.g. one with a request timeout.
    pub fn with_client(config: &Config, client: Client) -> Self {
        Self {
            config: config.clone(),
            client,
        }
    }
}

impl MediaClient for HttpMediaClient {
    async fn fetch_catalog(&self) -> Result<Catalog, CatalogError> {
        catalog::request_catalog(&self.client, &self.config).await
    }

    async fn upload(&self, request: UploadRequest) -> Result<StatusCode, UploadError> {
        uploader::post_upload(&self.client, &self.config, request).await
    }

    async fn open_download(&self, url: &Url) -> Result<DownloadStream, DownloadError> {
        download_tracker::open_stream(&self.client, url).await
    }
}
