use crate::error_utils::describe_error_body;
use crate::twitter::{ExtendedEntities, MediaVariant, Tweet};
use futures_util::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tracing::debug;

/// Outcome of inspecting a tweet for an attached video
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoLookup {
    /// Best variant of the attached video
    Found { url: String, bitrate: u64 },
    /// No media, or media that is not a video (photos)
    Absent,
    /// A media descriptor was present but could not be interpreted
    Malformed(String),
}

impl VideoLookup {
    /// The URL to download, only for `Found`
    pub fn url(&self) -> Option<&str> {
        match self {
            VideoLookup::Found { url, .. } => Some(url.as_str()),
            VideoLookup::Absent | VideoLookup::Malformed(_) => None,
        }
    }
}

/// Picks the variant with the highest declared bitrate.
///
/// A missing bitrate (HLS playlists) counts as 0. Ties keep the first variant,
/// which `Iterator::max_by_key` would not.
pub fn select_best_variant(variants: &[MediaVariant]) -> Option<&MediaVariant> {
    variants.iter().fold(None, |best: Option<&MediaVariant>, variant| match best {
        Some(current) if current.bitrate.unwrap_or(0) >= variant.bitrate.unwrap_or(0) => {
            Some(current)
        }
        _ => Some(variant),
    })
}

/// Inspects the first native media item of a tweet for a downloadable video
pub fn video_lookup(tweet: &Tweet) -> VideoLookup {
    let Some(raw) = &tweet.extended_entities else {
        return VideoLookup::Absent;
    };

    let entities: ExtendedEntities = match serde_json::from_value(raw.clone()) {
        Ok(entities) => entities,
        Err(e) => return VideoLookup::Malformed(format!("unreadable extended_entities: {e}")),
    };

    let Some(media) = entities.media.first() else {
        return VideoLookup::Absent;
    };

    let Some(video_info) = &media.video_info else {
        return match media.type_field.as_str() {
            "video" | "animated_gif" => VideoLookup::Malformed(format!(
                "{media_type} media without video_info",
                media_type = media.type_field
            )),
            _ => VideoLookup::Absent,
        };
    };

    let Some(best) = select_best_variant(&video_info.variants) else {
        return VideoLookup::Malformed("video_info has no variants".to_string());
    };

    match &best.url {
        Some(url) if !url.is_empty() => VideoLookup::Found {
            url: url.clone(),
            bitrate: best.bitrate.unwrap_or(0),
        },
        _ => VideoLookup::Malformed("highest bitrate variant has no url".to_string()),
    }
}

/// Video download errors
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Failed to download {url}: HTTP status {status}. Body: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Request for {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Connection for {url} failed while reading the body: {source}")]
    Body {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write video to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DownloadError {
    /// Remote failures skip a single post; local I/O failures stop the run
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            DownloadError::Status { .. }
                | DownloadError::Request { .. }
                | DownloadError::Body { .. }
        )
    }
}

/// Path of the in-progress download next to its final location
fn partial_path(file_path: &Path) -> PathBuf {
    let mut name = file_path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    file_path.with_file_name(name)
}

/// Downloads `url` to `file_path`, returning the number of bytes written.
///
/// Nothing is left at `file_path` unless the server answered with a success
/// status and the whole body was written.
pub async fn download_video(
    client: &Client,
    url: &str,
    file_path: &Path,
) -> Result<u64, DownloadError> {
    let response = client
        .get(url)
        .header(
            "User-Agent",
            "Mozilla/5.0 (X11; Linux x86_64; rv:139.0) Gecko/20100101 Firefox/139.0",
        )
        .header("Accept", "video/mp4,video/webm,video/*;q=0.8,*/*;q=0.5")
        .send()
        .await
        .map_err(|source| DownloadError::Request {
            url: url.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            body: describe_error_body(response).await,
        });
    }

    let part_path = partial_path(file_path);
    match stream_response_to_file(response, url, &part_path).await {
        Ok(bytes) => {
            fs::rename(&part_path, file_path)
                .await
                .map_err(|source| DownloadError::Io {
                    path: file_path.to_path_buf(),
                    source,
                })?;
            debug!(
                "Saved {bytes} bytes to {path}",
                path = file_path.display()
            );
            Ok(bytes)
        }
        Err(e) => {
            if let Err(remove_err) = fs::remove_file(&part_path).await {
                debug!(
                    "Failed to remove partial download {path}: {remove_err}",
                    path = part_path.display()
                );
            }
            Err(e)
        }
    }
}

/// Stream HTTP response to file with progress logging.
///
/// Read errors come from the connection and are reported as `Body`;
/// only failures of the local file are `Io`.
async fn stream_response_to_file(
    response: reqwest::Response,
    url: &str,
    path: &Path,
) -> Result<u64, DownloadError> {
    let local_err = |source| DownloadError::Io {
        path: path.to_path_buf(),
        source,
    };

    let total_size = response.content_length().unwrap_or(0);
    let mut file = File::create(path).await.map_err(local_err)?;

    let stream = response.bytes_stream();
    let mut reader = StreamReader::new(stream.map(|result| result.map_err(std::io::Error::other)));

    let mut buffer = vec![0u8; 8192];
    let mut downloaded = 0u64;

    loop {
        let n = reader
            .read(&mut buffer)
            .await
            .map_err(|source| DownloadError::Body {
                url: url.to_string(),
                source,
            })?;
        if n == 0 {
            break;
        }

        file.write_all(&buffer[..n]).await.map_err(local_err)?;
        downloaded += n as u64;

        if total_size > 0 {
            let progress = (downloaded * 100) / total_size;
            debug!("Download progress: {progress}%");
        }
    }

    file.flush().await.map_err(local_err)?;
    Ok(downloaded)
}
