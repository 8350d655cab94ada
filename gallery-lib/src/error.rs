use reqwest::StatusCode;
use thiserror::Error;

/// Failure kinds of a catalog fetch. None of them are retried internally.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Network error while fetching the catalog: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Server answered the catalog request with status {0}")]
    Server(StatusCode),

    #[error("Server sent an empty catalog body")]
    EmptyBody,

    #[error("Unable to parse the catalog response: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Network error while uploading: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Server rejected the upload with status {0}")]
    Server(StatusCode),

    #[error("Upload was cancelled")]
    Cancelled,

    #[error("Invalid upload request: {0}")]
    InvalidRequest(#[source] reqwest::Error),

    #[error("Failed to encode image for upload: {0}")]
    Encode(#[from] image::ImageError),
}

impl UploadError {
    /// Transport failures and 5xx answers may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::Network(_) => true,
            UploadError::Server(status) => status.is_server_error(),
            UploadError::Cancelled | UploadError::InvalidRequest(_) | UploadError::Encode(_) => {
                false
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Network error while downloading: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Download failed with status {0}")]
    Server(StatusCode),

    #[error("Download ended after {received} of {expected} bytes")]
    Truncated { expected: u64, received: u64 },

    #[error("Downloaded data is not a decodable image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Download worker stopped without reporting a result")]
    WorkerLost,
}
