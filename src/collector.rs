use crate::datetime_utils::{format_for_display, now_utc, parse_display_datetime};
use crate::filename_utils::{
    hashtag_dir_name, hashtag_log_filename, ledger_video_name, sanitized_file_path,
    video_filename,
};
use crate::ledger::{LedgerWriter, LogRecord};
use crate::resume::{
    check_prior_run, load_resume_state, PriorRunCheck, SeenSet, DEFAULT_INITIAL_START_DATE,
    DEFAULT_TIME_LEEWAY_SECS,
};
use crate::twitter::{Tweet, TwitterClient};
use crate::video::{download_video, video_lookup, VideoLookup};
use anyhow::{Context, Result};
use chrono::{Duration, NaiveDateTime};
use reqwest::Client;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Everything a collection run needs to know, resolved up front
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Search keyword, also used for the log file and video directory names
    pub hashtag: String,
    /// Root for the per-hashtag log and video directory
    pub data_dir: PathBuf,
    /// Cross-hashtag manifest
    pub manifest_path: PathBuf,
    /// Start of the window when the hashtag has no log rows yet
    pub initial_start_date: NaiveDateTime,
    /// Allowed gap before a prior run is reported as possibly truncated
    pub time_leeway: Duration,
}

impl CollectorConfig {
    /// Configuration with the default start date, leeway and `<data_dir>/manifest.csv`
    pub fn new(hashtag: &str, data_dir: PathBuf) -> Result<Self> {
        Ok(Self {
            hashtag: hashtag.to_string(),
            manifest_path: data_dir.join("manifest.csv"),
            data_dir,
            initial_start_date: parse_display_datetime(DEFAULT_INITIAL_START_DATE)?,
            time_leeway: Duration::seconds(DEFAULT_TIME_LEEWAY_SECS),
        })
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(hashtag_log_filename(&self.hashtag))
    }

    pub fn video_dir(&self) -> PathBuf {
        self.data_dir.join(hashtag_dir_name(&self.hashtag))
    }
}

/// Counters reported at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub posts_seen: usize,
    pub videos_downloaded: usize,
    pub duplicates_skipped: usize,
    pub without_video: usize,
    pub malformed: usize,
    pub failed_downloads: usize,
    pub bytes_downloaded: u64,
}

/// Downloads new videos for one hashtag and records them in the log and manifest
pub struct Collector<'a> {
    config: CollectorConfig,
    twitter: &'a TwitterClient,
    http: Client,
}

impl<'a> Collector<'a> {
    pub fn new(config: CollectorConfig, twitter: &'a TwitterClient, http: Client) -> Self {
        Self {
            config,
            twitter,
            http,
        }
    }

    /// Runs one collection pass: resume, search, download, record
    pub async fn run(&self) -> Result<RunSummary> {
        let hashtag = &self.config.hashtag;
        let video_dir = self.config.video_dir();
        let log_path = self.config.log_path();

        fs::create_dir_all(&video_dir).with_context(|| {
            format!(
                "Failed to create video directory {path}",
                path = video_dir.display()
            )
        })?;

        let state = load_resume_state(
            &log_path,
            &self.config.manifest_path,
            self.config.initial_start_date,
        )?;

        if let PriorRunCheck::PossiblyTruncated { earliest, gap } = check_prior_run(
            &state,
            self.config.initial_start_date,
            self.config.time_leeway,
        ) {
            warn!(
                "Earliest logged video for {hashtag} is from {earliest}, {hours} hours after the initial start date {start}; an earlier run may not have completed",
                earliest = format_for_display(&earliest),
                hours = gap.num_hours(),
                start = format_for_display(&self.config.initial_start_date)
            );
        }

        let since_date = state.since_date();
        let log_rows = state.log_rows;
        let mut seen = state.seen;

        info!(
            "Collecting videos for hashtag {hashtag} since {since_date} ({log_rows} already logged, current time: {now})",
            now = now_utc().format("%Y-%m-%d %H:%M:%S")
        );

        let mut ledger = LedgerWriter::open(&log_path, &self.config.manifest_path, hashtag)?;
        let mut summary = RunSummary::default();
        let mut pages = self.twitter.search(hashtag, &since_date);

        while let Some(page) = pages.next_page().await? {
            for tweet in &page {
                self.process_tweet(tweet, &mut seen, &mut ledger, &mut summary).await?;
            }
        }

        info!(
            "Finished {hashtag}: {downloaded} new videos ({bytes} bytes) from {posts} posts; {duplicates} already downloaded, {without} without video, {malformed} malformed, {failed} failed",
            downloaded = summary.videos_downloaded,
            bytes = summary.bytes_downloaded,
            posts = summary.posts_seen,
            duplicates = summary.duplicates_skipped,
            without = summary.without_video,
            malformed = summary.malformed,
            failed = summary.failed_downloads
        );

        Ok(summary)
    }

    /// Lookup, dedup, fetch, write, then append to log and manifest
    async fn process_tweet(
        &self,
        tweet: &Tweet,
        seen: &mut SeenSet,
        ledger: &mut LedgerWriter,
        summary: &mut RunSummary,
    ) -> Result<()> {
        summary.posts_seen += 1;
        let tweet_id = &tweet.id_str;

        let lookup = video_lookup(tweet);
        match &lookup {
            VideoLookup::Absent => {
                summary.without_video += 1;
                debug!("Tweet {tweet_id} has no video");
            }
            VideoLookup::Malformed(reason) => {
                summary.malformed += 1;
                warn!("Tweet {tweet_id} has an unusable video descriptor: {reason}");
            }
            VideoLookup::Found { .. } => {}
        }

        let Some(url) = seen.claim(lookup.url()) else {
            if let VideoLookup::Found { url, .. } = &lookup {
                summary.duplicates_skipped += 1;
                debug!("Skipping tweet {tweet_id}: {url} already downloaded");
            }
            return Ok(());
        };

        let filename = match video_filename(url) {
            Ok(filename) => filename,
            Err(e) => {
                summary.malformed += 1;
                warn!("Tweet {tweet_id}: {e:#}");
                return Ok(());
            }
        };
        let file_path = sanitized_file_path(&self.config.video_dir(), &filename);
        let created_at = tweet.created_at_display()?;

        info!(
            "Downloading video for tweet {tweet_id} created {created_at}: {url} -> {path}",
            path = file_path.display()
        );
        if let VideoLookup::Found { bitrate, .. } = &lookup {
            debug!("Selected variant bitrate: {bitrate}");
        }

        let bytes = match download_video(&self.http, url, &file_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_remote() => {
                summary.failed_downloads += 1;
                warn!("Skipping tweet {tweet_id}: {e}");
                return Ok(());
            }
            Err(e) => return Err(e).context("Failed to store video"),
        };

        let record = LogRecord {
            tweet_id: tweet_id.clone(),
            created_at,
            text: tweet.display_text(),
            video_url: url.to_string(),
            video_name: ledger_video_name(&self.config.hashtag, &filename),
        };
        ledger.append(&record)?;

        summary.videos_downloaded += 1;
        summary.bytes_downloaded += bytes;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    #[test]
    fn test_config_paths() {
        let config = CollectorConfig::new("cats", PathBuf::from("/data")).unwrap();
        assert_eq!(config.log_path(), Path::new("/data/cats.csv"));
        assert_eq!(config.video_dir(), Path::new("/data/cats"));
        assert_eq!(config.manifest_path, Path::new("/data/manifest.csv"));
        assert_eq!(
            format_for_display(&config.initial_start_date),
            DEFAULT_INITIAL_START_DATE
        );
        assert_eq!(config.time_leeway.num_seconds(), DEFAULT_TIME_LEEWAY_SECS);
    }
}
