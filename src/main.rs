use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use clap::Parser;
use dotenv::dotenv;
use hashtag_videos::collector::CollectorConfig;
use hashtag_videos::commands;
use hashtag_videos::datetime_utils::parse_display_datetime;
use hashtag_videos::oauth::OAuthCredentials;
use hashtag_videos::resume::{
    time_leeway_from_secs, DEFAULT_INITIAL_START_DATE, DEFAULT_TIME_LEEWAY_SECS,
};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    name = "hashtag-videos",
    version,
    about = "Download the videos of tweets matching a hashtag",
    long_about = "Searches tweets for a hashtag, downloads the highest-bitrate variant of every \
                  attached video not downloaded before, and records each one in <hashtag>.csv \
                  and a shared manifest. Later runs resume from the newest recorded tweet."
)]
struct Cli {
    /// Hashtag to search for (used verbatim; include the leading # if wanted)
    #[arg(long, required = true)]
    hashtag: String,

    /// Directory holding the hashtag logs and video directories
    #[arg(short, long = "data-dir", env = "HASHTAG_VIDEOS_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    /// Manifest shared by all hashtags (default: <data-dir>/manifest.csv)
    #[arg(long, env = "HASHTAG_VIDEOS_MANIFEST")]
    manifest: Option<PathBuf>,

    /// Start of the search window for a hashtag without a log ("YYYY-MM-DD HH:MM:SS")
    #[arg(long, default_value = DEFAULT_INITIAL_START_DATE, value_parser = parse_display_datetime)]
    initial_start_date: NaiveDateTime,

    /// Warn when the earliest logged tweet is this many seconds after the initial start date
    #[arg(long, default_value_t = DEFAULT_TIME_LEEWAY_SECS)]
    time_leeway_secs: i64,

    /// Twitter API consumer key
    #[arg(long, env = "TWITTER_CONSUMER_KEY", hide_env_values = true)]
    consumer_key: Option<String>,

    /// Twitter API consumer secret
    #[arg(long, env = "TWITTER_CONSUMER_SECRET", hide_env_values = true)]
    consumer_secret: Option<String>,

    /// Twitter API access token
    #[arg(long, env = "TWITTER_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Twitter API access token secret
    #[arg(long, env = "TWITTER_ACCESS_TOKEN_SECRET", hide_env_values = true)]
    access_token_secret: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

impl Cli {
    fn credentials(&self) -> Result<OAuthCredentials> {
        let require = |value: &Option<String>, var: &str| {
            value
                .clone()
                .filter(|v| !v.is_empty())
                .with_context(|| format!("Twitter credential not specified. Please set {var}"))
        };

        Ok(OAuthCredentials {
            consumer_key: require(&self.consumer_key, "TWITTER_CONSUMER_KEY")?,
            consumer_secret: require(&self.consumer_secret, "TWITTER_CONSUMER_SECRET")?,
            access_token: require(&self.access_token, "TWITTER_ACCESS_TOKEN")?,
            access_token_secret: require(
                &self.access_token_secret,
                "TWITTER_ACCESS_TOKEN_SECRET",
            )?,
        })
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    // Parse command line arguments
    let args = Cli::parse();

    // Initialize logging
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if args.verbose {
        EnvFilter::new("info,hashtag_videos=debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    debug!("Verbose mode enabled");

    let credentials = args.credentials()?;

    // Make sure data directory exists
    if !args.data_dir.exists() {
        std::fs::create_dir_all(&args.data_dir).context("Failed to create data directory")?;
        info!("Created data directory: {path}", path = args.data_dir.display());
    }

    let mut config = CollectorConfig::new(&args.hashtag, args.data_dir.clone())?;
    if let Some(manifest) = args.manifest {
        config.manifest_path = manifest;
    }
    config.initial_start_date = args.initial_start_date;
    config.time_leeway = time_leeway_from_secs(args.time_leeway_secs)?;

    commands::download_videos::execute(config, credentials).await?;

    Ok(())
}
