use crate::collector::{Collector, CollectorConfig, RunSummary};
use crate::error_utils::create_http_client_with_context;
use crate::oauth::OAuthCredentials;
use crate::twitter::TwitterClient;
use anyhow::{Context, Result};
use tracing::info;

/// Download all new videos for a hashtag
///
/// # Arguments
/// * `config` - Hashtag, data directory and resume settings
/// * `credentials` - OAuth 1.0a user-context credentials
pub async fn execute(config: CollectorConfig, credentials: OAuthCredentials) -> Result<RunSummary> {
    let twitter =
        TwitterClient::new(credentials).context("Failed to initialize Twitter client")?;
    let http = create_http_client_with_context()?;

    let hashtag = config.hashtag.clone();
    let data_dir = config.data_dir.clone();

    let summary = Collector::new(config, &twitter, http)
        .run()
        .await
        .with_context(|| format!("Failed to collect videos for {hashtag}"))?;

    if summary.videos_downloaded == 0 {
        info!("No new videos for {hashtag}");
    } else {
        info!(
            "Saved {count} new videos for {hashtag} in {path}",
            count = summary.videos_downloaded,
            path = data_dir.display()
        );
    }

    Ok(summary)
}
