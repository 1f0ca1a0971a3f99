//! Download a fundus photograph from a URL, bounded by the upload limit

use reqwest::{Client, StatusCode, Url};
use thiserror::Error;
use tracing::*;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid image URL: {0}")]
    InvalidUrl(String),

    #[error("remote image exceeds the {limit} byte upload limit")]
    TooLarge { limit: usize },

    #[error("could not download image: {0}")]
    Unreachable(#[from] reqwest::Error),

    #[error("image host answered {0}")]
    Status(StatusCode),
}

/// Only plain web URLs are fetched
pub fn parse_url(raw: &str) -> Result<Url, FetchError> {
    let url = Url::parse(raw.trim()).map_err(|e| FetchError::InvalidUrl(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(FetchError::InvalidUrl(format!("unsupported scheme {scheme}"))),
    }
}

/// GET `url` and collect at most `limit` bytes of body
#[tracing::instrument(skip(client))]
pub async fn fetch_image(client: &Client, url: &str, limit: usize) -> Result<Vec<u8>, FetchError> {
    let url = parse_url(url)?;
    let mut response = client.get(url).send().await?;
    if !response.status().is_success() {
        warn!("image host answered {}", response.status());
        return Err(FetchError::Status(response.status()));
    }
    if response.content_length().map_or(false, |len| len > limit as u64) {
        return Err(FetchError::TooLarge { limit });
    }

    let mut data = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if data.len() + chunk.len() > limit {
            return Err(FetchError::TooLarge { limit });
        }
        data.extend_from_slice(&chunk);
    }
    debug!("downloaded {} bytes", data.len());
    Ok(data)
}
