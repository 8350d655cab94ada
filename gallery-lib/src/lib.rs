pub mod catalog;
pub mod compressor;
pub mod config;
pub mod download_tracker;
pub mod error;
pub mod gallery;
pub mod logging;
pub mod media_client;
pub mod uploader;

#[cfg(test)]
pub mod test_helpers;
