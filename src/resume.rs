use crate::datetime_utils::{format_date_only, format_for_display, parse_display_datetime};
use crate::ledger::{read_log_records, read_video_urls};
use anyhow::{Context, Result};
use chrono::{Duration, NaiveDateTime};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// Default start of the collection window for a hashtag with no log yet
pub const DEFAULT_INITIAL_START_DATE: &str = "2019-10-01 01:01:01";

/// Default allowed gap between the initial start date and a log's earliest row
pub const DEFAULT_TIME_LEEWAY_SECS: i64 = 2 * 60 * 60;

/// Converts the `--time-leeway-secs` value, rejecting negative or out-of-range input
pub fn time_leeway_from_secs(secs: i64) -> Result<Duration> {
    anyhow::ensure!(secs >= 0, "Time leeway must not be negative, got {secs}");
    Duration::try_seconds(secs)
        .with_context(|| format!("Time leeway of {secs} seconds is out of range"))
}

/// The "no video" sentinel: what a post without a downloadable video maps to
pub const NO_VIDEO: Option<&str> = None;

/// Video URLs that must not be downloaded again.
///
/// The "no video" sentinel is always a member, so posts without a video
/// are never treated as pending downloads.
#[derive(Debug, Clone, Default)]
pub struct SeenSet {
    urls: HashSet<String>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Membership test; `None` is the sentinel
    pub fn contains(&self, url: Option<&str>) -> bool {
        match url {
            None => true,
            Some(url) => self.urls.contains(url),
        }
    }

    /// Adds `url`, returning true if it was not already present
    pub fn insert(&mut self, url: &str) -> bool {
        self.urls.insert(url.to_string())
    }

    /// Claims `url` for download: returns it if it was not seen yet and records it as seen
    pub fn claim<'u>(&mut self, url: Option<&'u str>) -> Option<&'u str> {
        match url {
            Some(url) if self.insert(url) => Some(url),
            _ => None,
        }
    }

    /// Number of real URLs (the sentinel is not counted)
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

impl Extend<String> for SeenSet {
    fn extend<I: IntoIterator<Item = String>>(&mut self, iter: I) {
        self.urls.extend(iter);
    }
}

/// What earlier runs left behind for one hashtag
#[derive(Debug, Clone)]
pub struct ResumeState {
    pub seen: SeenSet,
    /// Lower bound for the next query, before truncation to a date
    pub since: NaiveDateTime,
    /// Earliest `tweet.created_at` in the per-hashtag log
    pub earliest: Option<NaiveDateTime>,
    pub log_rows: usize,
}

impl ResumeState {
    /// Lower bound as accepted by the search API (date only, time of day dropped)
    pub fn since_date(&self) -> String {
        format_date_only(&self.since)
    }
}

/// Loads the seen set and the query lower bound from the per-hashtag log and
/// the manifest.
///
/// Manifest URLs are always included so a video collected under another
/// hashtag is not downloaded twice. Without log rows the lower bound is
/// `initial_start`; otherwise it is the latest logged timestamp.
pub fn load_resume_state(
    log_path: &Path,
    manifest_path: &Path,
    initial_start: NaiveDateTime,
) -> Result<ResumeState> {
    let mut seen = SeenSet::new();

    if manifest_path.is_file() {
        seen.extend(read_video_urls(manifest_path)?);
        debug!(
            "Loaded {count} known video URLs from {path}",
            count = seen.len(),
            path = manifest_path.display()
        );
    }

    let mut earliest: Option<NaiveDateTime> = None;
    let mut latest: Option<NaiveDateTime> = None;
    let mut log_rows = 0;

    if log_path.is_file() {
        let records = read_log_records(log_path)?;
        log_rows = records.len();

        for (index, record) in records.into_iter().enumerate() {
            let created = parse_display_datetime(&record.created_at).with_context(|| {
                format!(
                    "Invalid tweet.created_at in row {row} of {path}",
                    row = index + 1,
                    path = log_path.display()
                )
            })?;
            earliest = Some(earliest.map_or(created, |e| e.min(created)));
            latest = Some(latest.map_or(created, |l| l.max(created)));

            if !record.video_url.is_empty() {
                seen.insert(&record.video_url);
            }
        }
    }

    let since = latest.unwrap_or(initial_start);

    info!(
        "Resuming with {known} known videos, {log_rows} rows in {path}, since {since}",
        known = seen.len(),
        path = log_path.display(),
        since = format_for_display(&since)
    );

    Ok(ResumeState {
        seen,
        since,
        earliest,
        log_rows,
    })
}

/// Integrity of the previous runs, judged from the log's earliest row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriorRunCheck {
    /// Nothing logged yet
    NoRows,
    /// The earliest row is within the leeway of the initial start date
    Complete,
    /// The earliest row is far after the initial start date: an earlier run
    /// may have stopped before reaching back to it
    PossiblyTruncated {
        earliest: NaiveDateTime,
        gap: Duration,
    },
}

/// Compares the log's earliest row against the configured initial start date.
///
/// Purely informational: the result never changes the query window.
pub fn check_prior_run(
    state: &ResumeState,
    initial_start: NaiveDateTime,
    leeway: Duration,
) -> PriorRunCheck {
    let Some(earliest) = state.earliest else {
        return PriorRunCheck::NoRows;
    };

    let gap = earliest - initial_start;
    if gap > leeway {
        PriorRunCheck::PossiblyTruncated { earliest, gap }
    } else {
        PriorRunCheck::Complete
    }
}
