//! HTTP fetch pipeline for remote images.
//!
//! ### Safety gates
//! - http/https schemes only
//! - Request timeout on every call (probe and full fetch)
//! - Max redirects: 5
//! - Max body bytes: 5MB (configurable), checked against the declared
//!   Content-Length before the body is read and against the real size after
//!
//! Scheme/security policy beyond that (which URLs are routed through the
//! proxy at all) belongs to the embedding hook layer.

pub mod probe;

use bytes::Bytes;
use reqwest::{Client, StatusCode, header};
use url::Url;
use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pixmirror_core::{AppConfig, ArtifactKind, Error};

use crate::transcode::{self, ResizeLimits};

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "pixmirror/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 5MB)
    pub max_bytes: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "pixmirror/0.1".to_string(),
            max_bytes: 5 * 1024 * 1024,
            timeout: Duration::from_millis(20000),
            max_redirects: 5,
        }
    }
}

/// Response from a fetch operation.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// The original URL requested
    pub url: Url,
    /// The final URL after redirects
    pub final_url: Url,
    /// HTTP status code
    pub status: StatusCode,
    /// Content-Type header
    pub content_type: Option<String>,
    /// Response body bytes
    pub bytes: Bytes,
    /// Time taken to fetch in milliseconds
    pub fetch_ms: u64,
}

/// HTTP fetch client with safety checks.
pub struct FetchClient {
    http: Client,
    config: FetchConfig,
}

impl FetchClient {
    /// Create a new fetch client with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Http(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Fetch a URL, returning raw bytes and metadata.
    ///
    /// Respects the configured timeout, redirect limit, and byte cap.
    pub async fn fetch(&self, url_str: &str) -> Result<FetchResponse, Error> {
        let start = Instant::now();
        let url = parse_source_url(url_str)?;

        let request = self.http.get(url.as_str()).header(
            "Accept",
            "image/avif,image/webp,image/png,image/jpeg,*/*;q=0.8",
        );

        let response = request.send().await.map_err(map_send_error)?;

        let status = response.status();

        if !status.is_success() {
            return Err(Error::Http(format!("status {}", status.as_u16())));
        }

        let content_length = response.content_length();
        if let Some(len) = content_length
            && len as usize > self.config.max_bytes
        {
            return Err(Error::FetchTooLarge(format!(
                "{} bytes exceeds {}",
                len, self.config.max_bytes
            )));
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Http(format!("failed to read response: {}", e)))?;

        if bytes.len() > self.config.max_bytes {
            return Err(Error::FetchTooLarge(format!(
                "{} bytes exceeds {}",
                bytes.len(),
                self.config.max_bytes
            )));
        }

        let fetch_ms = start.elapsed().as_millis() as u64;

        tracing::debug!(
            "fetched {} -> {} in {}ms ({} bytes)",
            url,
            final_url,
            fetch_ms,
            bytes.len()
        );

        Ok(FetchResponse { url, final_url, status, content_type, bytes, fetch_ms })
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }
}

/// Parse and gate a source URL: http/https only.
pub(crate) fn parse_source_url(input: &str) -> Result<Url, Error> {
    let url = Url::parse(input.trim()).map_err(|e| Error::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(Error::InvalidUrl(format!("unsupported scheme: {scheme}"))),
    }
}

fn map_send_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::FetchTimeout(err.to_string())
    } else {
        Error::Http(format!("network error: {}", err))
    }
}

/// Seam between the retry scheduler and the network.
///
/// The production implementation is [`HttpImageFetcher`]; tests substitute
/// fakes to drive the state machine without touching the network.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Best-effort declared-size check in MB; 0.0 means unknown/assume small.
    async fn sniff_size_mb(&self, url: &str) -> f64;

    /// Download, resize, and write the artifact for `url` at `dest`.
    ///
    /// Must not leave a partial artifact behind on failure.
    async fn fetch_and_store(&self, url: &str, dest: &Path, kind: ArtifactKind) -> Result<(), Error>;
}

/// Production fetcher: HTTP download plus resize/transcode on a blocking
/// worker thread.
pub struct HttpImageFetcher {
    client: FetchClient,
    limits: ResizeLimits,
}

impl HttpImageFetcher {
    pub fn new(client: FetchClient, limits: ResizeLimits) -> Self {
        Self { client, limits }
    }

    /// Build the production fetcher straight from the application config.
    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let client = FetchClient::new(FetchConfig {
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_bytes,
            timeout: config.timeout(),
            max_redirects: FetchConfig::default().max_redirects,
        })?;
        let limits = ResizeLimits { max_width: config.max_width, max_height: config.max_height };
        Ok(Self::new(client, limits))
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn sniff_size_mb(&self, url: &str) -> f64 {
        match self.client.sniff_size_mb(url).await {
            Ok(mb) => mb,
            Err(e) => {
                tracing::debug!("size probe failed for {url}: {e}");
                0.0
            }
        }
    }

    async fn fetch_and_store(&self, url: &str, dest: &Path, kind: ArtifactKind) -> Result<(), Error> {
        let response = self.client.fetch(url).await?;

        let bytes = response.bytes;
        let dest = dest.to_path_buf();
        let limits = self.limits;
        tokio::task::spawn_blocking(move || transcode::write_artifact(&bytes, &dest, kind, limits))
            .await
            .map_err(|e| Error::ImageEncode(format!("transcode worker failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_config_default() {
        let config = FetchConfig::default();
        assert_eq!(config.user_agent, "pixmirror/0.1");
        assert_eq!(config.max_bytes, 5 * 1024 * 1024);
        assert_eq!(config.timeout, Duration::from_millis(20000));
        assert_eq!(config.max_redirects, 5);
    }

    #[test]
    fn test_parse_source_url_accepts_http_and_https() {
        assert!(parse_source_url("https://example.com/a.png").is_ok());
        assert!(parse_source_url("http://example.com/a.png").is_ok());
        assert!(parse_source_url("  https://example.com/a.png  ").is_ok());
    }

    #[test]
    fn test_parse_source_url_rejects_other_schemes() {
        let result = parse_source_url("file:///etc/passwd");
        assert!(matches!(result, Err(Error::InvalidUrl(_))));

        let result = parse_source_url("not a url");
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_fetch_client_new() {
        let config = FetchConfig::default();
        let client = FetchClient::new(config);
        assert!(client.is_ok());
    }

    #[test]
    fn test_fetch_response_fields() {
        let response = FetchResponse {
            url: Url::parse("https://example.com/a.png").unwrap(),
            final_url: Url::parse("https://cdn.example.com/a.png").unwrap(),
            status: StatusCode::OK,
            content_type: Some("image/png".to_string()),
            bytes: Bytes::new(),
            fetch_ms: 100,
        };

        assert_eq!(response.url.as_str(), "https://example.com/a.png");
        assert_eq!(response.final_url.as_str(), "https://cdn.example.com/a.png");
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.content_type, Some("image/png".to_string()));
        assert_eq!(response.fetch_ms, 100);
    }

    #[tokio::test]
    async fn test_http_image_fetcher_from_config() {
        let config = AppConfig { max_width: 800, max_height: 600, ..Default::default() };
        let fetcher = HttpImageFetcher::from_config(&config).unwrap();
        assert_eq!(fetcher.limits.max_width, 800);
        assert_eq!(fetcher.limits.max_height, 600);
        assert_eq!(fetcher.client.config().user_agent, "pixmirror/0.1");
    }
}
