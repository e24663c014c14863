use anyhow::{Context, Result};
use sanitize_filename::sanitize;
use std::path::{Path, PathBuf};
use url::Url;

/// Utility functions for generating consistent filenames across the application
///
/// Name of the per-hashtag log file
/// Format: hashtag.csv
pub fn hashtag_log_filename(hashtag: &str) -> String {
    sanitize(format!("{hashtag}.csv"))
}

/// Name of the directory holding a hashtag's videos
pub fn hashtag_dir_name(hashtag: &str) -> String {
    sanitize(hashtag)
}

/// File name for a downloaded video: the final path segment of its URL,
/// without the query string (`.../vid/720x1280/abc.mp4?tag=12` -> `abc.mp4`)
pub fn video_filename(video_url: &str) -> Result<String> {
    let parsed =
        Url::parse(video_url).with_context(|| format!("Invalid video URL: {video_url}"))?;
    let segment = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .with_context(|| format!("Video URL has no file name: {video_url}"))?;

    let filename = sanitize(segment);
    anyhow::ensure!(!filename.is_empty(), "Video URL has no usable file name: {video_url}");
    Ok(filename)
}

/// Sanitize and create full file path
pub fn sanitized_file_path(output_dir: &Path, filename: &str) -> PathBuf {
    let sanitized_filename = sanitize(filename);
    output_dir.join(sanitized_filename)
}

/// Path recorded in the `video_name` column: `hashtag/file.mp4`
pub fn ledger_video_name(hashtag: &str, filename: &str) -> String {
    format!("{dir}/{filename}", dir = hashtag_dir_name(hashtag))
}
