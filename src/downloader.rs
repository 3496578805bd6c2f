//! C2 Downloader (spec §4.2).
//!
//! Bounded-concurrency HTTPS fetch with preflight size check, retries and
//! a fixed `1s, 2s` backoff. Never panics or bubbles an error for a single
//! URL — failures are reported in the returned [`DownloadResult`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::config::PipelineConfig;
use crate::error::DownloadError;
use crate::types::DownloadResult;

const USER_AGENT: &str = "media-ingest-pipeline/1.0";
/// Ceiling on the exponential backoff so a generously configured
/// `IMG_RETRY_MAX` cannot make a single download sleep for minutes.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Backoff before retry attempt `retry_count + 2` (spec §9: exponential,
/// base 2, starting at 1s — `1s, 2s, 4s, ...`), capped at [`MAX_BACKOFF`].
fn backoff_for(retry_count: u32) -> Duration {
    let secs = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
    Duration::from_secs(secs).min(MAX_BACKOFF)
}

#[derive(Clone)]
pub struct Downloader {
    client: Client,
    semaphore: Arc<Semaphore>,
    config: Arc<PipelineConfig>,
}

impl Downloader {
    pub fn new(config: Arc<PipelineConfig>) -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(10)
            .connect_timeout(config.connect_timeout)
            .timeout(config.connect_timeout + config.read_timeout + config.write_timeout)
            .build()
            .expect("reqwest client configuration is valid");

        Self {
            client,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_downloads)),
            config,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_client(config: Arc<PipelineConfig>, client: Client) -> Self {
        Self {
            client,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_downloads)),
            config,
        }
    }

    /// Download every URL, preserving input order in the output. Never
    /// throws for an individual URL's failure.
    pub async fn download(&self, urls: &[String]) -> Vec<DownloadResult> {
        let mut tasks = Vec::with_capacity(urls.len());
        for url in urls {
            let this = self.clone();
            let url = url.clone();
            tasks.push(tokio::spawn(async move { this.download_one(&url).await }));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok(result) => results.push(result),
                Err(join_err) => results.push(DownloadResult {
                    url: String::new(),
                    success: false,
                    bytes: None,
                    http_status: None,
                    content_type: None,
                    content_length: None,
                    duration: Duration::ZERO,
                    retry_count: 0,
                    error: Some(DownloadError::Request(join_err.to_string())),
                }),
            }
        }
        results
    }

    /// Like [`Downloader::download`], but abandons any URL whose fetch has
    /// not yet completed once `cancel` fires (spec §5's cancellation
    /// semantics: in-flight HTTP operations are cut, not awaited to
    /// completion). The returned vector may be shorter than `urls` — a
    /// missing entry means that URL's download was abandoned, not that it
    /// failed.
    pub async fn download_cancellable(
        &self,
        urls: &[String],
        cancel: &CancellationToken,
    ) -> Vec<DownloadResult> {
        let mut tasks: Vec<_> = urls
            .iter()
            .map(|url| {
                let this = self.clone();
                let url = url.clone();
                tokio::spawn(async move { this.download_one(&url).await })
            })
            .collect();

        let mut results = Vec::with_capacity(tasks.len());
        while !tasks.is_empty() {
            let task = tasks.remove(0);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    task.abort();
                    for remaining in tasks.drain(..) {
                        remaining.abort();
                    }
                    break;
                }
                joined = task => {
                    if let Ok(result) = joined {
                        results.push(result);
                    }
                }
            }
        }
        results
    }

    #[instrument(skip(self), fields(url_fp = %crate::metrics::url_fingerprint(url)))]
    async fn download_one(&self, url: &str) -> DownloadResult {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("semaphore is never closed while the downloader is alive");

        let start = Instant::now();
        let mut retry_count = 0u32;

        loop {
            match self.attempt(url).await {
                Ok((bytes, status, content_type)) => {
                    return DownloadResult {
                        url: url.to_string(),
                        success: true,
                        content_length: Some(bytes.len() as u64),
                        bytes: Some(bytes),
                        http_status: Some(status.as_u16()),
                        content_type,
                        duration: start.elapsed(),
                        retry_count,
                        error: None,
                    };
                }
                Err(err)
                    if Self::is_retryable(&err)
                        && retry_count < self.config.retry_max.saturating_sub(1) =>
                {
                    warn!(url_fp = %crate::metrics::url_fingerprint(url), attempt = retry_count + 1, error = %err, "download attempt failed, retrying");
                    tokio::time::sleep(backoff_for(retry_count)).await;
                    retry_count += 1;
                }
                Err(err) => {
                    return DownloadResult {
                        url: url.to_string(),
                        success: false,
                        bytes: None,
                        http_status: match &err {
                            DownloadError::Http(s) => Some(*s),
                            _ => None,
                        },
                        content_type: None,
                        content_length: None,
                        duration: start.elapsed(),
                        retry_count,
                        error: Some(err),
                    };
                }
            }
        }
    }

    fn is_retryable(err: &DownloadError) -> bool {
        matches!(
            err,
            DownloadError::Timeout | DownloadError::Request(_)
        ) || matches!(err, DownloadError::Http(status) if (500..600).contains(status))
    }

    async fn attempt(
        &self,
        url: &str,
    ) -> Result<(bytes::Bytes, StatusCode, Option<String>), DownloadError> {
        // Optional preflight HEAD to short-circuit obviously oversized files.
        if let Ok(head) = self.client.head(url).send().await {
            if let Some(len) = head.content_length() {
                if len > self.config.max_bytes {
                    return Err(DownloadError::TooLarge(len as usize));
                }
            }
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(Self::map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Http(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        if let Some(len) = response.content_length() {
            if len > self.config.max_bytes {
                return Err(DownloadError::TooLarge(len as usize));
            }
        }

        // A malicious or misconfigured server can omit Content-Length or lie
        // about it; cap the body as it streams in rather than trusting the
        // header alone.
        let mut buf = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(Self::map_reqwest_error)?;
            buf.extend_from_slice(&chunk);
            if buf.len() as u64 > self.config.max_bytes {
                return Err(DownloadError::TooLarge(buf.len()));
            }
        }
        let bytes = bytes::Bytes::from(buf);

        debug!(url_fp = %crate::metrics::url_fingerprint(url), bytes = bytes.len(), "download succeeded");
        Ok((bytes, status, content_type))
    }

    fn map_reqwest_error(e: reqwest::Error) -> DownloadError {
        if e.is_timeout() {
            DownloadError::Timeout
        } else if let Some(status) = e.status() {
            DownloadError::Http(status.as_u16())
        } else {
            DownloadError::Request(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> Arc<PipelineConfig> {
        Arc::new(PipelineConfig {
            retry_max: 3,
            max_concurrent_downloads: 3,
            max_bytes: 10 * 1024 * 1024,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn downloads_succeed_and_preserve_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1, 2, 3]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![4, 5]))
            .mount(&server)
            .await;

        let downloader = Downloader::with_client(test_config(), Client::new());
        let urls = vec![
            format!("{}/a.jpg", server.uri()),
            format!("{}/b.jpg", server.uri()),
        ];
        let results = downloader.download(&urls).await;

        assert_eq!(results.len(), 2);
        assert!(results[0].success);
        assert_eq!(results[0].bytes.as_ref().unwrap().as_ref(), &[1, 2, 3]);
        assert!(results[1].success);
        assert_eq!(results[1].bytes.as_ref().unwrap().as_ref(), &[4, 5]);
    }

    #[tokio::test]
    async fn http_4xx_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.jpg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let downloader = Downloader::with_client(test_config(), Client::new());
        let url = format!("{}/missing.jpg", server.uri());
        let results = downloader.download(&[url]).await;

        assert!(!results[0].success);
        assert_eq!(results[0].retry_count, 0);
        assert!(matches!(results[0].error, Some(DownloadError::Http(404))));
    }

    #[tokio::test]
    async fn http_5xx_is_retried_up_to_retry_max() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky.jpg"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let downloader = Downloader::with_client(test_config(), Client::new());
        let url = format!("{}/flaky.jpg", server.uri());
        let start = Instant::now();
        let results = downloader.download(&[url]).await;
        let elapsed = start.elapsed();

        assert!(!results[0].success);
        assert_eq!(results[0].retry_count, 2);
        // two backoffs: 1s + 2s
        assert!(elapsed >= Duration::from_millis(2900));
    }

    #[tokio::test]
    async fn retry_max_of_zero_still_attempts_once_without_panicking() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky.jpg"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let config = Arc::new(PipelineConfig {
            retry_max: 0,
            ..Default::default()
        });
        let downloader = Downloader::with_client(config, Client::new());
        let url = format!("{}/flaky.jpg", server.uri());
        let results = downloader.download(&[url]).await;

        assert!(!results[0].success);
        assert_eq!(results[0].retry_count, 0);
    }

    #[tokio::test]
    async fn retry_max_above_the_backoff_table_size_does_not_panic() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky.jpg"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let config = Arc::new(PipelineConfig {
            retry_max: 4,
            ..Default::default()
        });
        let downloader = Downloader::with_client(config, Client::new());
        let url = format!("{}/flaky.jpg", server.uri());
        let results = downloader.download(&[url]).await;

        assert!(!results[0].success);
        assert_eq!(results[0].retry_count, 3);
    }

    #[test]
    fn backoff_doubles_from_one_second_and_is_capped() {
        assert_eq!(backoff_for(0), Duration::from_secs(1));
        assert_eq!(backoff_for(1), Duration::from_secs(2));
        assert_eq!(backoff_for(2), Duration::from_secs(4));
        assert_eq!(backoff_for(63), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn oversized_content_length_fails_without_get_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/huge.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-length", "20000000")
                    .set_body_bytes(vec![0u8; 10]),
            )
            .mount(&server)
            .await;

        let config = Arc::new(PipelineConfig {
            max_bytes: 10 * 1024 * 1024,
            ..Default::default()
        });
        let downloader = Downloader::with_client(config, Client::new());
        let url = format!("{}/huge.jpg", server.uri());
        let results = downloader.download(&[url]).await;

        assert!(!results[0].success);
        assert!(matches!(results[0].error, Some(DownloadError::TooLarge(_))));
    }
}
