use crate::config::Config;
use crate::error::CatalogError;
use crate::logging::spinner_style;
use reqwest::{Client, StatusCode, Url};
use serde_json::{Map, Value};
use std::fmt;
use tracing::instrument;
use tracing_indicatif::span_ext::IndicatifSpanExt;

pub const CATALOG_PATH: &str = "/api/upload/files";

/// The part of a server asset record we care about. Every other field is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDescriptor {
    pub relative_path: String,
}

impl AssetDescriptor {
    fn from_record(record: &Map<String, Value>) -> Option<Self> {
        record
            .get("url")
            .and_then(Value::as_str)
            .map(|path| AssetDescriptor {
                relative_path: path.to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAsset {
    pub url: Url,
}

impl fmt::Display for RemoteAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Ordered list of remote assets. A refresh replaces it as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    assets: Vec<RemoteAsset>,
}

impl Catalog {
    pub fn new(assets: Vec<RemoteAsset>) -> Self {
        Self { assets }
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RemoteAsset> {
        self.assets.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemoteAsset> {
        self.assets.iter()
    }
}

impl<'a> IntoIterator for &'a Catalog {
    type Item = &'a RemoteAsset;
    type IntoIter = std::slice::Iter<'a, RemoteAsset>;

    fn into_iter(self) -> Self::IntoIter {
        self.assets.iter()
    }
}

#[instrument(skip_all)]
pub(crate) async fn request_catalog(
    client: &Client,
    config: &Config,
) -> Result<Catalog, CatalogError> {
    let current_span = tracing::Span::current();
    if let Ok(style) = spinner_style("{msg}") {
        current_span.pb_set_style(&style);
    }
    current_span.pb_set_message("Fetching asset catalog...");
    current_span.pb_set_finish_message("Fetching asset catalog... Done");

    let url = config.endpoint(CATALOG_PATH);
    tracing::debug!("GET {}", url);
    let response = client
        .get(url)
        .bearer_auth(&config.token)
        .send()
        .await
        .map_err(CatalogError::Network)?;

    let status = response.status();
    if status != StatusCode::OK {
        return Err(CatalogError::Server(status));
    }
    let body = response.bytes().await.map_err(CatalogError::Network)?;
    catalog_from_response(config, status, &body)
}

/// Turns a raw catalog response into a [`Catalog`].
///
/// Anything but a 200 is a [`CatalogError::Server`], regardless of the body.
pub fn catalog_from_response(
    config: &Config,
    status: StatusCode,
    body: &[u8],
) -> Result<Catalog, CatalogError> {
    if status != StatusCode::OK {
        return Err(CatalogError::Server(status));
    }
    if body.is_empty() {
        return Err(CatalogError::EmptyBody);
    }
    parse_catalog(config, body)
}

/// Parses a JSON array of asset records.
///
/// The body as a whole must be an array of objects; individual records without a
/// string `url` field, or whose resolved URL does not parse, are skipped.
pub fn parse_catalog(config: &Config, body: &[u8]) -> Result<Catalog, CatalogError> {
    let records: Vec<Map<String, Value>> = serde_json::from_slice(body)?;
    let total = records.len();

    let assets: Vec<RemoteAsset> = records
        .iter()
        .filter_map(|record| {
            let Some(descriptor) = AssetDescriptor::from_record(record) else {
                tracing::debug!("Skipping asset record without a `url` field");
                return None;
            };
            match config.resolve(&descriptor.relative_path) {
                Some(url) => Some(RemoteAsset { url }),
                None => {
                    tracing::debug!(
                        "Skipping asset record with unusable path: {}",
                        descriptor.relative_path
                    );
                    None
                }
            }
        })
        .collect();

    if assets.len() != total {
        tracing::debug!("Dropped {} of {} asset records", total - assets.len(), total);
    }
    Ok(Catalog::new(assets))
}
