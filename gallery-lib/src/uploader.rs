use crate::config::Config;
use crate::error::UploadError;
use crate::logging::spinner_style;
use crate::media_client::MediaClient;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::instrument;
use tracing_indicatif::span_ext::IndicatifSpanExt;

pub const UPLOAD_PATH: &str = "/api/upload";

/// Multipart field name the server expects the file under.
pub const UPLOAD_FIELD: &str = "files";

pub const DEFAULT_FILENAME: &str = "photo.jpg";
pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub payload: Vec<u8>,
    pub filename: String,
    pub content_type: String,
}

impl UploadRequest {
    pub fn jpeg(payload: Vec<u8>, filename: impl Into<String>) -> Self {
        Self {
            payload,
            filename: filename.into(),
            content_type: JPEG_CONTENT_TYPE.to_string(),
        }
    }
}

/// Builds the single-part form. Every form gets its own random boundary.
pub(crate) fn build_form(request: UploadRequest) -> Result<Form, UploadError> {
    let part = Part::bytes(request.payload)
        .file_name(request.filename)
        .mime_str(&request.content_type)
        .map_err(UploadError::InvalidRequest)?;
    Ok(Form::new().part(UPLOAD_FIELD, part))
}

#[instrument(skip_all, fields(filename = %request.filename, bytes = request.payload.len()))]
pub(crate) async fn post_upload(
    client: &Client,
    config: &Config,
    request: UploadRequest,
) -> Result<StatusCode, UploadError> {
    let current_span = tracing::Span::current();
    if let Ok(style) = spinner_style("{msg}") {
        current_span.pb_set_style(&style);
    }
    current_span.pb_set_message(&format!("Uploading {}...", request.filename));
    current_span.pb_set_finish_message(&format!("Uploading {}... Done", request.filename));

    let form = build_form(request)?;
    tracing::debug!("Multipart boundary: {}", form.boundary());

    let response = client
        .post(config.endpoint(UPLOAD_PATH))
        .bearer_auth(&config.token)
        .multipart(form)
        .send()
        .await
        .map_err(UploadError::Network)?;

    let status = response.status();
    if status != StatusCode::OK {
        return Err(UploadError::Server(status));
    }
    Ok(status)
}

/// Sends compressed payloads through a [`MediaClient`], with optional cancellation.
pub struct AssetUploader<C> {
    client: Arc<C>,
}

impl<C> Clone for AssetUploader<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
        }
    }
}

impl<C: MediaClient + 'static> AssetUploader<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }

    /// Uploads once. No retries.
    pub async fn upload(&self, request: UploadRequest) -> Result<StatusCode, UploadError> {
        let filename = request.filename.clone();
        let result = self.client.upload(request).await;
        match &result {
            Ok(_) => tracing::debug!("Uploaded {}", filename),
            Err(e) => tracing::debug!("Upload of {} failed: {}", filename, e),
        }
        result
    }

    /// Runs the upload in the background so it can be cancelled.
    pub fn spawn(&self, request: UploadRequest) -> UploadHandle {
        let uploader = self.clone();
        UploadHandle {
            task: tokio::spawn(async move { uploader.upload(request).await }),
        }
    }
}

/// Owner side of a spawned upload. Dropping it aborts the transfer.
pub struct UploadHandle {
    task: JoinHandle<Result<StatusCode, UploadError>>,
}

impl UploadHandle {
    /// Aborts the transfer. [`Self::outcome`] then reports [`UploadError::Cancelled`],
    /// unless the upload had already finished.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Waits for the upload to end. Call it once.
    pub async fn outcome(&mut self) -> Result<StatusCode, UploadError> {
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(UploadError::Cancelled),
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        }
    }
}

impl Drop for UploadHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
