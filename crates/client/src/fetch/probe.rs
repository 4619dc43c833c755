//! Best-effort remote size probe.
//!
//! A HEAD request issued only at seed time, so an obviously oversized
//! resource can be flagged as permanently skipped without ever downloading
//! it. An unknown or unreadable length reads as 0 ("assume small"), never
//! as an error.

use super::{FetchClient, parse_source_url};
use pixmirror_core::Error;
use reqwest::header;

impl FetchClient {
    /// Declared size of the remote resource in MB, rounded to 2 decimals.
    ///
    /// Returns 0.0 when the server sends no usable Content-Length.
    pub async fn sniff_size_mb(&self, url_str: &str) -> Result<f64, Error> {
        let url = parse_source_url(url_str)?;

        let response = self
            .http
            .head(url.as_str())
            .send()
            .await
            .map_err(|e| Error::Http(format!("head request failed: {}", e)))?;

        let declared = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        Ok(declared.map(bytes_to_mb).unwrap_or(0.0))
    }
}

/// Bytes to MB, rounded to 2 decimals.
pub(crate) fn bytes_to_mb(bytes: u64) -> f64 {
    (bytes as f64 / 1_048_576.0 * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_mb_whole() {
        assert_eq!(bytes_to_mb(1_048_576), 1.0);
        assert_eq!(bytes_to_mb(3 * 1_048_576), 3.0);
    }

    #[test]
    fn test_bytes_to_mb_rounds_to_two_decimals() {
        assert_eq!(bytes_to_mb(5_767_168), 5.5);
        assert_eq!(bytes_to_mb(157_286), 0.15);
    }

    #[test]
    fn test_bytes_to_mb_tiny_rounds_to_zero() {
        assert_eq!(bytes_to_mb(1), 0.0);
        assert_eq!(bytes_to_mb(0), 0.0);
    }
}
