use crate::datetime_utils::{format_for_display, parse_twitter_created_at};
use crate::error_utils::{describe_error_body, parse_http_response_json};
use crate::oauth::OAuthCredentials;
use anyhow::{Context, Result};
use backoff::{backoff::Backoff, ExponentialBackoffBuilder};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Twitter API specific errors with structured information
#[derive(Debug, Error)]
pub enum TwitterError {
    #[error("Rate limit exceeded (reset at {reset_time:?}, remaining: {remaining:?})")]
    RateLimit {
        reset_time: Option<u64>,
        remaining: Option<u64>,
    },

    #[error("Authentication rejected by the Twitter API: {message}")]
    Unauthorized { message: String },

    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },
}

pub const TWITTER_API_BASE: &str = "https://api.twitter.com";

const SEARCH_PATH: &str = "/1.1/search/tweets.json";

/// Largest page the standard search endpoint serves
const SEARCH_PAGE_SIZE: u32 = 100;

const MAX_ATTEMPTS: u32 = 5;

/// Twitter API rate limit information extracted from response headers
#[derive(Debug, Clone, Default)]
struct RateLimits {
    /// Maximum number of requests allowed in the current time window
    limit: Option<u64>,
    /// Number of requests remaining in the current time window
    remaining: Option<u64>,
    /// Unix timestamp when the rate limit resets
    reset: Option<u64>,
}

/// A status object as returned by the v1.1 search endpoint (`tweet_mode=extended`)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Tweet {
    /// The tweet ID, as a string to avoid precision loss
    pub id_str: String,

    /// Creation date, e.g. "Wed Oct 10 20:19:24 +0000 2018"
    pub created_at: String,

    /// Untruncated text (present with `tweet_mode=extended`)
    #[serde(default)]
    pub full_text: Option<String>,

    /// Legacy, possibly truncated text
    #[serde(default)]
    pub text: Option<String>,

    /// Native media attachments. Kept as raw JSON so that one broken
    /// descriptor cannot fail the whole page; see `video::video_lookup`.
    #[serde(default)]
    pub extended_entities: Option<serde_json::Value>,
}

impl Tweet {
    /// Tweet text with HTML entities decoded, preferring the untruncated form
    pub fn display_text(&self) -> String {
        let raw = self
            .full_text
            .as_deref()
            .or(self.text.as_deref())
            .unwrap_or_default();
        html_escape::decode_html_entities(raw).into_owned()
    }

    /// Creation time in the ledger format ("2018-10-10 20:19:24", UTC)
    pub fn created_at_display(&self) -> Result<String> {
        let created = parse_twitter_created_at(&self.created_at)
            .with_context(|| format!("Invalid created_at on tweet {}", self.id_str))?;
        Ok(format_for_display(&created.naive_utc()))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExtendedEntities {
    pub media: Vec<Media>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Media {
    #[serde(rename = "type")]
    pub type_field: String,
    pub video_info: Option<VideoInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VideoInfo {
    pub variants: Vec<MediaVariant>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MediaVariant {
    /// Absent on HLS playlists
    pub bitrate: Option<u64>,
    pub content_type: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub statuses: Vec<Tweet>,
    pub search_metadata: Option<SearchMetadata>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchMetadata {
    /// Query string for the next (older) page, e.g. "?max_id=123&q=%23cats&include_entities=1"
    pub next_results: Option<String>,
}

/// Extracts the `max_id` cursor from a `next_results` query string
pub fn parse_next_max_id(next_results: &str) -> Option<String> {
    url::form_urlencoded::parse(next_results.trim_start_matches('?').as_bytes())
        .find(|(key, _)| key == "max_id")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Twitter API client for hashtag search
pub struct TwitterClient {
    client: Client,
    credentials: OAuthCredentials,
    api_base: String,
}

impl TwitterClient {
    /// Creates a new client against the public API
    pub fn new(credentials: OAuthCredentials) -> Result<Self> {
        Self::with_api_base(credentials, TWITTER_API_BASE)
    }

    /// Creates a client against a custom API root (used for tests)
    pub fn with_api_base(credentials: OAuthCredentials, api_base: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            credentials,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    /// Starts a search for `hashtag` posted on or after `since_date` (YYYY-MM-DD).
    ///
    /// Pages arrive newest first; a new pager always restarts from the newest post.
    pub fn search<'a>(&'a self, hashtag: &str, since_date: &str) -> SearchPages<'a> {
        SearchPages {
            client: self,
            query: format!("{hashtag} since:{since_date}"),
            max_id: None,
            exhausted: false,
            pages_fetched: 0,
        }
    }

    /// Parses rate limit headers from a response
    fn parse_rate_limit_headers(&self, response: &reqwest::Response) -> RateLimits {
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
        };

        RateLimits {
            limit: header("x-rate-limit-limit"),
            remaining: header("x-rate-limit-remaining"),
            reset: header("x-rate-limit-reset"),
        }
    }

    /// Calculates a sleep duration with random jitter to avoid thundering herd effects
    fn calculate_sleep_duration_with_jitter(&self, base_duration: Duration) -> Duration {
        // Add 0-999ms of jitter to the base duration
        let jitter = rand::random::<u64>() % 1000;
        base_duration + Duration::from_millis(jitter)
    }

    /// Creates an exponential backoff configuration for API request retries
    fn create_backoff_config(&self) -> impl Backoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_secs(1))
            .with_max_interval(Duration::from_secs(60))
            .with_multiplier(2.0)
            .with_max_elapsed_time(Some(Duration::from_secs(300))) // 5 minutes max
            .build()
    }

    /// Makes a signed GET request, waiting out rate limits and retrying timeouts
    async fn api_request(
        &self,
        resource_id: &str,
        path: &str,
        params: &[(String, String)],
    ) -> Result<reqwest::Response> {
        let url = format!("{base}{path}", base = self.api_base);
        let mut backoff = self.create_backoff_config();
        let mut attempt = 0;

        loop {
            debug!(%resource_id, %url, "Making request to Twitter API");

            // Every attempt gets a fresh nonce and timestamp
            let authorization = self.credentials.authorization_header("GET", &url, params)?;

            let response = match self
                .client
                .get(&url)
                .query(params)
                .header(reqwest::header::AUTHORIZATION, authorization)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    attempt += 1;

                    if attempt >= MAX_ATTEMPTS {
                        return Err(anyhow::Error::new(err)).with_context(|| {
                            format!(
                                "Failed to send request to Twitter API after {attempt} attempts"
                            )
                        });
                    }

                    if err.is_timeout() || err.is_connect() {
                        let backoff_time = backoff
                            .next_backoff()
                            .unwrap_or(Duration::from_secs(5 * u64::from(attempt)));
                        let sleep_duration =
                            self.calculate_sleep_duration_with_jitter(backoff_time);

                        debug!("Network error reaching Twitter API for {resource_id}. Retrying in {sleep_duration:?} (attempt {attempt}/{MAX_ATTEMPTS})");
                        tokio::time::sleep(sleep_duration).await;
                        continue;
                    }

                    return Err(
                        anyhow::Error::new(err).context("Failed to send request to Twitter API")
                    );
                }
            };

            let rate_limits = self.parse_rate_limit_headers(&response);

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                attempt += 1;

                if attempt >= MAX_ATTEMPTS {
                    debug!("Maximum retry attempts ({MAX_ATTEMPTS}) reached for {resource_id}, rate limit reset: {rate_limit_reset:?}", rate_limit_reset = rate_limits.reset);
                    return Err(TwitterError::RateLimit {
                        reset_time: rate_limits.reset,
                        remaining: rate_limits.remaining,
                    }
                    .into());
                }

                let now = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_else(|_| Duration::from_secs(0))
                    .as_secs();

                // Seconds until the window resets, if the header is still in the future
                let rate_limit_wait = rate_limits
                    .reset
                    .filter(|&reset_time| reset_time > now)
                    .map(|reset_time| reset_time - now);

                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok());

                // Use the most specific timing information available
                let base_wait_secs = rate_limit_wait.or(retry_after).unwrap_or_else(|| {
                    backoff
                        .next_backoff()
                        .unwrap_or(Duration::from_secs(5 * u64::from(attempt)))
                        .as_secs()
                });

                let sleep_duration =
                    self.calculate_sleep_duration_with_jitter(Duration::from_secs(base_wait_secs));

                info!("Rate limited by Twitter API for {resource_id}. Limit: {limit:?}, Remaining: {remaining:?}, Reset: {reset:?}. Waiting {sleep_duration:?} (attempt {attempt}/{MAX_ATTEMPTS})",
                      limit = rate_limits.limit,
                      remaining = rate_limits.remaining,
                      reset = rate_limits.reset);
                tokio::time::sleep(sleep_duration).await;
                continue;
            }

            let status = response.status();
            if status.is_success() {
                debug!("Received Twitter API response for {resource_id} with limits: {limit:?}/{remaining:?} until {reset:?}",
                       limit = rate_limits.limit,
                       remaining = rate_limits.remaining,
                       reset = rate_limits.reset);
                return Ok(response);
            }

            let body = describe_error_body(response).await;
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    TwitterError::Unauthorized { message: body }
                }
                _ => TwitterError::ApiError {
                    status: status.as_u16(),
                    message: body,
                },
            }
            .into());
        }
    }

    /// Fetches one page of search results, older than `max_id` when given
    async fn fetch_search_page(
        &self,
        query: &str,
        max_id: Option<&str>,
    ) -> Result<SearchResponse> {
        let mut params = vec![
            ("q".to_string(), query.to_string()),
            ("count".to_string(), SEARCH_PAGE_SIZE.to_string()),
            ("include_entities".to_string(), "true".to_string()),
            ("tweet_mode".to_string(), "extended".to_string()),
        ];
        if let Some(max_id) = max_id {
            params.push(("max_id".to_string(), max_id.to_string()));
        }

        let response = self
            .api_request(&format!("search:{query}"), SEARCH_PATH, &params)
            .await?;

        parse_http_response_json(response, "Twitter API search").await
    }
}

/// Lazily pages through search results, one request per `next_page` call
pub struct SearchPages<'a> {
    client: &'a TwitterClient,
    query: String,
    max_id: Option<String>,
    exhausted: bool,
    pages_fetched: u32,
}

impl SearchPages<'_> {
    /// Returns the next page of tweets, or `None` once the API reports no further page
    pub async fn next_page(&mut self) -> Result<Option<Vec<Tweet>>> {
        if self.exhausted {
            return Ok(None);
        }

        let response = self
            .client
            .fetch_search_page(&self.query, self.max_id.as_deref())
            .await
            .with_context(|| format!("Failed to fetch search page for '{}'", self.query))?;
        self.pages_fetched += 1;

        let next_max_id = response
            .search_metadata
            .as_ref()
            .and_then(|m| m.next_results.as_deref())
            .and_then(parse_next_max_id);

        debug!(
            "Search page {page} for '{query}' returned {count} tweets (next page: {next})",
            page = self.pages_fetched,
            query = self.query,
            count = response.statuses.len(),
            next = next_max_id.is_some()
        );

        // A cursor that does not move would loop forever
        match next_max_id {
            Some(next) if self.max_id.as_deref() != Some(next.as_str()) => {
                self.max_id = Some(next);
            }
            _ => self.exhausted = true,
        }

        if response.statuses.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }

        Ok(Some(response.statuses))
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use pretty_assertions::assert_eq;

    fn test_credentials() -> OAuthCredentials {
        OAuthCredentials {
            consumer_key: "consumer".to_string(),
            consumer_secret: "consumer-secret".to_string(),
            access_token: "token".to_string(),
            access_token_secret: "token-secret".to_string(),
        }
    }

    fn status_json(id: &str) -> serde_json::Value {
        serde_json::json!({
            "id_str": id,
            "created_at": "Mon May 01 10:00:00 +0000 2023",
            "full_text": "video &amp; more #cats"
        })
    }

    #[test]
    fn test_parse_search_status() {
        let tweet_json = serde_json::json!({
            "id": 1653000000000000000u64,
            "id_str": "1653000000000000000",
            "created_at": "Mon May 01 10:00:00 +0000 2023",
            "full_text": "Cats &amp; dogs &lt;3 #cats",
            "extended_entities": {
                "media": [{
                    "type": "video",
                    "video_info": {
                        "variants": [
                            {"bitrate": 832000, "content_type": "video/mp4", "url": "https://video.twimg.com/a.mp4"}
                        ]
                    }
                }]
            }
        });

        let tweet: Tweet = serde_json::from_value(tweet_json).unwrap();
        assert_eq!(tweet.id_str, "1653000000000000000");
        assert_eq!(tweet.display_text(), "Cats & dogs <3 #cats");
        assert_eq!(tweet.created_at_display().unwrap(), "2023-05-01 10:00:00");
        assert!(tweet.extended_entities.is_some());
    }

    #[test]
    fn test_display_text_falls_back_to_text() {
        let tweet: Tweet = serde_json::from_value(serde_json::json!({
            "id_str": "1",
            "created_at": "Mon May 01 10:00:00 +0000 2023",
            "text": "short"
        }))
        .unwrap();
        assert_eq!(tweet.display_text(), "short");
        assert!(tweet.extended_entities.is_none());
    }

    #[test]
    fn test_created_at_invalid() {
        let tweet: Tweet = serde_json::from_value(serde_json::json!({
            "id_str": "1",
            "created_at": "yesterday"
        }))
        .unwrap();
        assert!(tweet.created_at_display().is_err());
    }

    #[test]
    fn test_parse_next_max_id() {
        assert_eq!(
            parse_next_max_id("?max_id=1652999999999999999&q=%23cats&count=100&include_entities=1"),
            Some("1652999999999999999".to_string())
        );
        assert_eq!(parse_next_max_id("?q=%23cats"), None);
        assert_eq!(parse_next_max_id("?max_id=&q=x"), None);
    }

    #[tokio::test]
    async fn test_search_pages_follow_cursor() {
        let mut server = mockito::Server::new_async().await;

        let first_page = server
            .mock("GET", SEARCH_PATH)
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("q".into(), "#cats since:2023-05-01".into()),
                // No cursor on the first request
                Matcher::Regex("tweet_mode=extended$".into()),
            ]))
            .match_header("authorization", Matcher::Regex("^OAuth ".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "statuses": [status_json("30"), status_json("20")],
                    "search_metadata": {"next_results": "?max_id=19&q=%23cats"}
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let second_page = server
            .mock("GET", SEARCH_PATH)
            .match_query(Matcher::Regex("max_id=19$".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "statuses": [status_json("10")],
                    "search_metadata": {}
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let client = TwitterClient::with_api_base(test_credentials(), &server.url()).unwrap();
        let mut pages = client.search("#cats", "2023-05-01");

        let page = pages.next_page().await.unwrap().unwrap();
        let ids: Vec<_> = page.iter().map(|t| t.id_str.as_str()).collect();
        assert_eq!(ids, vec!["30", "20"]);

        let page = pages.next_page().await.unwrap().unwrap();
        assert_eq!(page[0].id_str, "10");

        assert!(pages.next_page().await.unwrap().is_none());
        assert_eq!(pages.pages_fetched(), 2);

        first_page.assert_async().await;
        second_page.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limited_request_is_retried() {
        let mut server = mockito::Server::new_async().await;

        let limited = server
            .mock("GET", SEARCH_PATH)
            .match_query(Matcher::Any)
            .with_status(429)
            .with_header("retry-after", "0")
            .expect(1)
            .create_async()
            .await;

        let ok = server
            .mock("GET", SEARCH_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(serde_json::json!({"statuses": []}).to_string())
            .expect(1)
            .create_async()
            .await;

        let client = TwitterClient::with_api_base(test_credentials(), &server.url()).unwrap();
        let mut pages = client.search("#cats", "2023-05-01");
        assert!(pages.next_page().await.unwrap().is_none());

        limited.assert_async().await;
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn test_unauthorized_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", SEARCH_PATH)
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body(r#"{"errors":[{"code":32,"message":"Could not authenticate you."}]}"#)
            .create_async()
            .await;

        let client = TwitterClient::with_api_base(test_credentials(), &server.url()).unwrap();
        let mut pages = client.search("#cats", "2023-05-01");
        let err = pages.next_page().await.unwrap_err();

        let twitter_error = err
            .chain()
            .find_map(|e| e.downcast_ref::<TwitterError>())
            .expect("TwitterError in chain");
        assert!(matches!(twitter_error, TwitterError::Unauthorized { .. }));
        assert!(format!("{err:#}").contains("Could not authenticate you"));
    }
}
