//! Dataset ingestion: download the zipped dataset and unpack it
//!
//! Sharing links from Google Drive are rewritten into direct-download links
//! before fetching; any other URL is fetched as given.

mod extract;
mod fetch;

use std::path::PathBuf;

pub use extract::extract_zip;
pub use fetch::{
    direct_download_url, drive_file_id, with_retries, Attempt, Downloader, RetryPolicy,
    RETRY_STATUSES,
};

use crate::config::{DataIngestionConfig, ValidationError};
use crate::error::Result;

/// Map a configured source URL to the URL actually fetched
pub fn resolve_download_url(source_url: &str) -> Result<String> {
    if !source_url.contains("drive.google.com") {
        return Ok(source_url.to_string());
    }
    let file_id = drive_file_id(source_url)
        .ok_or_else(|| ValidationError::InvalidSourceUrl(source_url.to_string()))?;
    Ok(direct_download_url(&file_id))
}

/// Downloads and extracts the dataset described by a [`DataIngestionConfig`]
#[derive(Debug)]
pub struct DataIngestion {
    config: DataIngestionConfig,
    downloader: Downloader,
}

impl DataIngestion {
    pub fn new(config: DataIngestionConfig) -> Result<Self> {
        let downloader = Downloader::new(RetryPolicy::default())?;
        Ok(Self { config, downloader })
    }

    pub fn with_downloader(config: DataIngestionConfig, downloader: Downloader) -> Self {
        Self { config, downloader }
    }

    pub fn config(&self) -> &DataIngestionConfig {
        &self.config
    }

    /// Fetch the archive into `local_data_file`
    pub fn download_file(&self) -> Result<PathBuf> {
        let source = &self.config.source_url;
        let dest = &self.config.local_data_file;
        tracing::info!("Downloading data from {} into file {}", source, dest.display());

        let url = resolve_download_url(source)?;
        let bytes = self.downloader.fetch_to(&url, dest)?;

        tracing::info!(
            "Downloaded data from {} into file {} (~ {} KB)",
            source,
            dest.display(),
            (bytes as f64 / 1024.0).round() as u64
        );
        Ok(dest.clone())
    }

    /// Unpack `local_data_file` into `unzip_dir`
    pub fn extract_zip_file(&self) -> Result<()> {
        let entries = extract_zip(&self.config.local_data_file, &self.config.unzip_dir)?;
        tracing::info!(
            "Extracted {} entries into {}",
            entries,
            self.config.unzip_dir.display()
        );
        Ok(())
    }
}
