use crate::catalog::{Catalog, RemoteAsset};
use crate::download_tracker::DownloadStream;
use crate::error::{CatalogError, DownloadError, UploadError};
use crate::media_client::MediaClient;
use crate::uploader::UploadRequest;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use reqwest::{StatusCode, Url};
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::Mutex;

/// Scripted catalog answer.
#[derive(Debug, Clone)]
pub enum CatalogReply {
    Assets(Vec<String>),
    Status(StatusCode),
}

/// Scripted download body.
#[derive(Debug, Clone)]
pub struct MockDownload {
    pub expected_len: Option<u64>,
    pub chunks: Vec<Vec<u8>>,
    /// Never finish after the last chunk, like a stalled connection.
    pub hang_after_chunks: bool,
}

impl MockDownload {
    pub fn chunked(data: &[u8], chunk_size: usize, announce_len: bool) -> Self {
        Self {
            expected_len: announce_len.then_some(data.len() as u64),
            chunks: data.chunks(chunk_size).map(<[u8]>::to_vec).collect(),
            hang_after_chunks: false,
        }
    }
}

/// In-memory [`MediaClient`]. Catalog replies are consumed in order; the last
/// one keeps being served once the script runs out.
pub struct MockMediaClient {
    catalog_replies: Mutex<VecDeque<CatalogReply>>,
    upload_status: Mutex<StatusCode>,
    hang_uploads: Mutex<bool>,
    uploads: Mutex<Vec<UploadRequest>>,
    downloads: Mutex<HashMap<Url, MockDownload>>,
}

impl Default for MockMediaClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMediaClient {
    pub fn new() -> Self {
        Self {
            catalog_replies: Mutex::new(VecDeque::new()),
            upload_status: Mutex::new(StatusCode::OK),
            hang_uploads: Mutex::new(false),
            uploads: Mutex::new(Vec::new()),
            downloads: Mutex::new(HashMap::new()),
        }
    }

    pub fn push_catalog(&self, reply: CatalogReply) {
        self.catalog_replies.lock().unwrap().push_back(reply);
    }

    pub fn set_upload_status(&self, status: StatusCode) {
        *self.upload_status.lock().unwrap() = status;
    }

    pub fn hang_uploads(&self) {
        *self.hang_uploads.lock().unwrap() = true;
    }

    pub fn uploads(&self) -> Vec<UploadRequest> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn add_download(&self, url: Url, download: MockDownload) {
        self.downloads.lock().unwrap().insert(url, download);
    }

    fn next_catalog_reply(&self) -> Option<CatalogReply> {
        let mut replies = self.catalog_replies.lock().unwrap();
        if replies.len() > 1 {
            replies.pop_front()
        } else {
            replies.front().cloned()
        }
    }
}

impl MediaClient for MockMediaClient {
    async fn fetch_catalog(&self) -> Result<Catalog, CatalogError> {
        match self.next_catalog_reply() {
            Some(CatalogReply::Assets(urls)) => Ok(Catalog::new(
                urls.iter()
                    .filter_map(|u| Url::parse(u).ok())
                    .map(|url| RemoteAsset { url })
                    .collect(),
            )),
            Some(CatalogReply::Status(status)) => Err(CatalogError::Server(status)),
            None => Err(CatalogError::EmptyBody),
        }
    }

    async fn upload(&self, request: UploadRequest) -> Result<StatusCode, UploadError> {
        let hang = *self.hang_uploads.lock().unwrap();
        if hang {
            std::future::pending::<()>().await;
        }
        self.uploads.lock().unwrap().push(request);
        let status = *self.upload_status.lock().unwrap();
        if status == StatusCode::OK {
            Ok(status)
        } else {
            Err(UploadError::Server(status))
        }
    }

    async fn open_download(&self, url: &Url) -> Result<DownloadStream, DownloadError> {
        let download = self
            .downloads
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or(DownloadError::Server(StatusCode::NOT_FOUND))?;

        let chunks = stream::iter(
            download
                .chunks
                .into_iter()
                .map(|chunk| Ok::<_, DownloadError>(Bytes::from(chunk))),
        );
        let chunks = if download.hang_after_chunks {
            chunks.chain(stream::pending()).boxed()
        } else {
            chunks.boxed()
        };
        Ok(DownloadStream {
            expected_len: download.expected_len,
            chunks,
        })
    }
}

/// A small PNG with a gradient, as a download body.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 40) as u8, (y * 40) as u8, 128])
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}
