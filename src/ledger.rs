use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Header of the per-hashtag log
pub const LOG_HEADER: [&str; 5] = [
    "tweet.id",
    "tweet.created_at",
    "tweet.text",
    "video_url",
    "video_name",
];

/// Header of the cross-hashtag manifest
pub const MANIFEST_HEADER: [&str; 6] = [
    "tweet.id",
    "tweet.created_at",
    "tweet.text",
    "video_url",
    "video_name",
    "hashtag",
];

/// One downloaded video as recorded in the per-hashtag log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "tweet.id")]
    pub tweet_id: String,
    #[serde(rename = "tweet.created_at")]
    pub created_at: String,
    #[serde(rename = "tweet.text")]
    pub text: String,
    pub video_url: String,
    pub video_name: String,
}

/// A log row plus the hashtag it was collected under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRecord {
    #[serde(rename = "tweet.id")]
    pub tweet_id: String,
    #[serde(rename = "tweet.created_at")]
    pub created_at: String,
    #[serde(rename = "tweet.text")]
    pub text: String,
    pub video_url: String,
    pub video_name: String,
    pub hashtag: String,
}

impl LogRecord {
    pub fn with_hashtag(&self, hashtag: &str) -> ManifestRecord {
        ManifestRecord {
            tweet_id: self.tweet_id.clone(),
            created_at: self.created_at.clone(),
            text: self.text.clone(),
            video_url: self.video_url.clone(),
            video_name: self.video_name.clone(),
            hashtag: hashtag.to_string(),
        }
    }
}

/// Creates `path` containing only `header` unless it already has content.
///
/// Returns true when the header was written.
pub fn ensure_ledger_file(path: &Path, header: &[&str]) -> Result<bool> {
    let has_content = fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
    if has_content {
        return Ok(false);
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer
        .write_record(header)
        .with_context(|| format!("Failed to write header to {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", path.display()))?;

    info!("Created {path}", path = path.display());
    Ok(true)
}

/// Reads every row of a per-hashtag log
pub fn read_log_records(path: &Path) -> Result<Vec<LogRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    reader
        .deserialize::<LogRecord>()
        .enumerate()
        .map(|(index, row)| {
            row.with_context(|| {
                format!(
                    "Failed to read row {row} of {path}",
                    row = index + 1,
                    path = path.display()
                )
            })
        })
        .collect()
}

/// Reads the `video_url` column of a log or manifest, skipping empty cells
pub fn read_video_urls(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read header of {}", path.display()))?;
    if headers.is_empty() {
        // Created but never written; the header is added on open
        debug!("{path} is empty", path = path.display());
        return Ok(Vec::new());
    }
    let Some(url_column) = headers.iter().position(|h| h == "video_url") else {
        bail!("{} has no video_url column", path.display());
    };

    let mut urls = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let row = row.with_context(|| {
            format!(
                "Failed to read row {row} of {path}",
                row = index + 1,
                path = path.display()
            )
        })?;
        if let Some(url) = row.get(url_column).filter(|u| !u.is_empty()) {
            urls.push(url.to_string());
        }
    }

    debug!(
        "Read {count} video URLs from {path}",
        count = urls.len(),
        path = path.display()
    );
    Ok(urls)
}

/// Append handles on the per-hashtag log and the manifest.
///
/// Both files are flushed after every row and closed when the writer is dropped.
pub struct LedgerWriter<L: Write = File, M: Write = File> {
    hashtag: String,
    log_path: PathBuf,
    manifest_path: PathBuf,
    log: csv::Writer<L>,
    manifest: csv::Writer<M>,
}

impl LedgerWriter {
    /// Opens both files for appending, writing headers to new or empty files first
    pub fn open(log_path: &Path, manifest_path: &Path, hashtag: &str) -> Result<Self> {
        ensure_ledger_file(manifest_path, &MANIFEST_HEADER)?;
        ensure_ledger_file(log_path, &LOG_HEADER)?;

        Ok(Self::from_writers(
            hashtag,
            log_path,
            manifest_path,
            open_append(log_path)?,
            open_append(manifest_path)?,
        ))
    }
}

impl<L: Write, M: Write> LedgerWriter<L, M> {
    fn from_writers(
        hashtag: &str,
        log_path: &Path,
        manifest_path: &Path,
        log: L,
        manifest: M,
    ) -> Self {
        // Headers are already on disk
        let builder = || {
            let mut builder = csv::WriterBuilder::new();
            builder.has_headers(false);
            builder
        };

        Self {
            hashtag: hashtag.to_string(),
            log_path: log_path.to_path_buf(),
            manifest_path: manifest_path.to_path_buf(),
            log: builder().from_writer(log),
            manifest: builder().from_writer(manifest),
        }
    }

    /// Appends `record` to the log, then the same record with the hashtag to the manifest
    pub fn append(&mut self, record: &LogRecord) -> Result<()> {
        self.log
            .serialize(record)
            .with_context(|| format!("Failed to append to {}", self.log_path.display()))?;
        self.log
            .flush()
            .with_context(|| format!("Failed to flush {}", self.log_path.display()))?;

        if let Err(e) = self.append_manifest(record) {
            error!(
                "Tweet {tweet_id} is in {log} but could not be added to {manifest}: {e:#}",
                tweet_id = record.tweet_id,
                log = self.log_path.display(),
                manifest = self.manifest_path.display()
            );
            return Err(e).with_context(|| {
                format!(
                    "Tweet {tweet_id} was recorded in {log} but not in {manifest}",
                    tweet_id = record.tweet_id,
                    log = self.log_path.display(),
                    manifest = self.manifest_path.display()
                )
            });
        }

        Ok(())
    }

    fn append_manifest(&mut self, record: &LogRecord) -> Result<()> {
        self.manifest
            .serialize(record.with_hashtag(&self.hashtag))
            .with_context(|| format!("Failed to append to {}", self.manifest_path.display()))?;
        self.manifest
            .flush()
            .with_context(|| format!("Failed to flush {}", self.manifest_path.display()))
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {} for appending", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io;
    use tempfile::TempDir;

    fn sample_record(id: &str, url: &str) -> LogRecord {
        LogRecord {
            tweet_id: id.to_string(),
            created_at: "2023-05-01 10:00:00".to_string(),
            text: "Cats, \"quoted\"\nand a second line #cats".to_string(),
            video_url: url.to_string(),
            video_name: "cats/abc.mp4".to_string(),
        }
    }

    #[test]
    fn test_ensure_ledger_file_writes_header_once() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cats.csv");

        assert!(ensure_ledger_file(&path, &LOG_HEADER).unwrap());
        assert!(!ensure_ledger_file(&path, &LOG_HEADER).unwrap());

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content.trim_end(),
            "tweet.id,tweet.created_at,tweet.text,video_url,video_name"
        );
    }

    #[test]
    fn test_ensure_ledger_file_fills_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("manifest.csv");
        fs::write(&path, "").unwrap();

        assert!(ensure_ledger_file(&path, &MANIFEST_HEADER).unwrap());
        assert!(fs::read_to_string(&path).unwrap().trim_end().ends_with(",hashtag"));
    }

    #[test]
    fn test_append_writes_matching_rows() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("cats.csv");
        let manifest_path = temp_dir.path().join("manifest.csv");

        let record = sample_record("1", "https://video.twimg.com/a.mp4");
        {
            let mut writer = LedgerWriter::open(&log_path, &manifest_path, "cats").unwrap();
            writer.append(&record).unwrap();
        }

        let log_rows = read_log_records(&log_path).unwrap();
        assert_eq!(log_rows, vec![record.clone()]);

        let mut reader = csv::Reader::from_path(&manifest_path).unwrap();
        let manifest_rows: Vec<ManifestRecord> =
            reader.deserialize().collect::<Result<_, _>>().unwrap();
        assert_eq!(manifest_rows, vec![record.with_hashtag("cats")]);
    }

    #[test]
    fn test_reopen_appends_after_existing_rows() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("cats.csv");
        let manifest_path = temp_dir.path().join("manifest.csv");

        {
            let mut writer = LedgerWriter::open(&log_path, &manifest_path, "cats").unwrap();
            writer.append(&sample_record("1", "https://v/a.mp4")).unwrap();
        }
        {
            let mut writer = LedgerWriter::open(&log_path, &manifest_path, "dogs").unwrap();
            writer.append(&sample_record("2", "https://v/b.mp4")).unwrap();
        }

        let ids: Vec<_> = read_log_records(&log_path)
            .unwrap()
            .into_iter()
            .map(|r| r.tweet_id)
            .collect();
        assert_eq!(ids, vec!["1", "2"]);

        assert_eq!(
            read_video_urls(&manifest_path).unwrap(),
            vec!["https://v/a.mp4", "https://v/b.mp4"]
        );
    }

    #[test]
    fn test_read_video_urls_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("manifest.csv");
        fs::write(&path, "").unwrap();

        assert!(read_video_urls(&path).unwrap().is_empty());
    }

    /// Accepts nothing, like a full disk
    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("no space left on device"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_manifest_failure_names_the_tweet() {
        let mut writer = LedgerWriter::from_writers(
            "cats",
            Path::new("cats.csv"),
            Path::new("manifest.csv"),
            Vec::new(),
            FullDisk,
        );

        let err = writer.append(&sample_record("1653", "https://v/a.mp4")).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("Tweet 1653 was recorded in cats.csv but not in manifest.csv"));
        assert!(message.contains("no space left on device"));

        // The log row itself went through
        let log = String::from_utf8(writer.log.into_inner().unwrap()).unwrap();
        assert!(log.starts_with("1653,"));
    }

    #[test]
    fn test_read_video_urls_requires_column() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("other.csv");
        fs::write(&path, "a,b\n1,2\n").unwrap();

        assert!(read_video_urls(&path).is_err());
    }

    #[test]
    fn test_read_video_urls_skips_empty_cells() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cats.csv");
        fs::write(
            &path,
            "tweet.id,tweet.created_at,tweet.text,video_url,video_name\n\
             1,2023-05-01 10:00:00,hi,,\n\
             2,2023-05-01 11:00:00,hi,https://v/a.mp4,cats/a.mp4\n",
        )
        .unwrap();

        assert_eq!(read_video_urls(&path).unwrap(), vec!["https://v/a.mp4"]);
    }
}
