//! OAuth 1.0a (RFC 5849) request signing for the v1.1 API.
//!
//! Only the HMAC-SHA1 signature and the `Authorization` header are built
//! here; the four credential values are issued out of band by the developer
//! portal.

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha1 = Hmac<Sha1>;

const SIGNATURE_METHOD: &str = "HMAC-SHA1";
const OAUTH_VERSION: &str = "1.0";

/// User-context credentials for the v1.1 API
#[derive(Clone)]
pub struct OAuthCredentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_token_secret: String,
}

impl fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"<redacted>")
            .field("access_token", &self.access_token)
            .field("access_token_secret", &"<redacted>")
            .finish()
    }
}

/// RFC 3986 percent-encoding: everything except `A-Za-z0-9-._~`
pub fn percent_encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Builds the signature base string: `METHOD&url&params`, where `params`
/// are encoded, sorted by key then value, and joined with `&`.
pub fn signature_base_string(method: &str, base_url: &str, params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();

    let param_string = encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{method}&{url}&{params}",
        method = method.to_ascii_uppercase(),
        url = percent_encode(base_url),
        params = percent_encode(&param_string)
    )
}

impl OAuthCredentials {
    /// Builds the `Authorization` header for a request with a fresh nonce and timestamp.
    ///
    /// `params` are the query (or form) parameters that will be sent with the request.
    pub fn authorization_header(
        &self,
        method: &str,
        base_url: &str,
        params: &[(String, String)],
    ) -> Result<String> {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.authorization_header_with(method, base_url, params, &nonce, timestamp)
    }

    fn authorization_header_with(
        &self,
        method: &str,
        base_url: &str,
        params: &[(String, String)],
        nonce: &str,
        timestamp: u64,
    ) -> Result<String> {
        let mut oauth_params = vec![
            ("oauth_consumer_key".to_string(), self.consumer_key.clone()),
            ("oauth_nonce".to_string(), nonce.to_string()),
            (
                "oauth_signature_method".to_string(),
                SIGNATURE_METHOD.to_string(),
            ),
            ("oauth_timestamp".to_string(), timestamp.to_string()),
            ("oauth_token".to_string(), self.access_token.clone()),
            ("oauth_version".to_string(), OAUTH_VERSION.to_string()),
        ];

        let mut all_params = oauth_params.clone();
        all_params.extend_from_slice(params);
        let base_string = signature_base_string(method, base_url, &all_params);
        let signature = self.sign(&base_string)?;

        oauth_params.push(("oauth_signature".to_string(), signature));
        oauth_params.sort();

        let fields = oauth_params
            .iter()
            .map(|(k, v)| format!("{k}=\"{v}\"", k = percent_encode(k), v = percent_encode(v)))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(format!("OAuth {fields}"))
    }

    /// HMAC-SHA1 over the base string, keyed by `consumer_secret&token_secret`
    fn sign(&self, base_string: &str) -> Result<String> {
        let key = format!(
            "{}&{}",
            percent_encode(&self.consumer_secret),
            percent_encode(&self.access_token_secret)
        );
        let mut mac = HmacSha1::new_from_slice(key.as_bytes())
            .map_err(|e| anyhow!("Invalid OAuth signing key: {e}"))?;
        mac.update(base_string.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }
}
