use crate::config::HttpConfig;
use crate::feed::parser::{parse_feed, ParseResult};
use crate::types::Entry;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Transport-level failures. Anything that produced an HTTP response is
/// reported through [`FeedDocument`] instead.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Request exceeded the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// What one request to a feed URL produced.
#[derive(Debug, Clone, Default)]
pub struct FeedDocument {
    /// HTTP status code of the response.
    pub status: u16,
    /// Entries in feed order (newest first for the upstream we watch).
    pub entries: Vec<Entry>,
    /// The body could not be parsed as RSS/Atom.
    pub malformed: bool,
    /// Items dropped for lacking a timestamp.
    pub skipped: usize,
}

impl FeedDocument {
    pub fn ok(entries: Vec<Entry>) -> Self {
        Self {
            status: 200,
            entries,
            ..Self::default()
        }
    }
}

/// Retrieves and parses one feed. Implementations should bound their own
/// latency; the scheduler waits on every call.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, url: &Url, label: Option<&str>) -> Result<FeedDocument, FetchError>;
}

#[async_trait]
impl<T: FeedFetcher + ?Sized> FeedFetcher for Arc<T> {
    async fn fetch(&self, url: &Url, label: Option<&str>) -> Result<FeedDocument, FetchError> {
        (**self).fetch(url, label).await
    }
}

/// Fetches feeds over HTTP with `reqwest`.
///
/// Issues exactly one request per call; pacing belongs to the scheduler.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self::with_client(
            client,
            Duration::from_secs(config.timeout_secs),
        ))
    }

    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Status plus body; the body is only read for 2xx responses.
    async fn download(
        &self,
        url: &Url,
    ) -> Result<(reqwest::StatusCode, Option<Vec<u8>>), FetchError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Ok((status, None));
        }
        let bytes = read_limited_bytes(response, MAX_FEED_SIZE).await?;
        Ok((status, Some(bytes)))
    }
}

#[async_trait]
impl FeedFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, label: Option<&str>) -> Result<FeedDocument, FetchError> {
        // One deadline covers the request and the body read together
        let (status, body) = tokio::time::timeout(self.timeout, self.download(url))
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))??;

        let Some(bytes) = body else {
            tracing::debug!(url = %url, status = %status, "Non-success response");
            return Ok(FeedDocument {
                status: status.as_u16(),
                ..FeedDocument::default()
            });
        };

        match parse_feed(&bytes, label) {
            Ok(ParseResult { entries, skipped }) => {
                if skipped > 0 {
                    tracing::warn!(url = %url, skipped, "Entries without timestamps skipped");
                }
                Ok(FeedDocument {
                    status: status.as_u16(),
                    entries,
                    malformed: false,
                    skipped,
                })
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Feed body did not parse");
                Ok(FeedDocument {
                    status: status.as_u16(),
                    malformed: true,
                    ..FeedDocument::default()
                })
            }
        }
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item>
        <title>Newer</title>
        <link>https://example.com/2</link>
        <pubDate>Tue, 14 Nov 2023 22:30:00 +0000</pubDate>
    </item>
    <item>
        <title>Older</title>
        <link>https://example.com/1</link>
        <pubDate>Tue, 14 Nov 2023 22:13:20 +0000</pubDate>
    </item>
</channel></rss>"#;

    fn fetcher() -> HttpFetcher {
        HttpFetcher::with_client(reqwest::Client::new(), Duration::from_secs(5))
    }

    fn feed_url(server: &MockServer) -> Url {
        Url::parse(&format!("{}/rss.php?rub=au", server.uri())).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss.php"))
            .and(query_param("rub", "au"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("Content-Type", "application/xml"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let doc = fetcher()
            .fetch(&feed_url(&mock_server), Some("Auto"))
            .await
            .unwrap();
        assert_eq!(doc.status, 200);
        assert!(!doc.malformed);
        assert_eq!(doc.entries.len(), 2);
        assert_eq!(doc.entries[0].title, "Newer");
        assert_eq!(doc.entries[0].category.as_deref(), Some("Auto"));
    }

    #[tokio::test]
    async fn test_forbidden_is_reported_as_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&mock_server)
            .await;

        let doc = fetcher().fetch(&feed_url(&mock_server), None).await.unwrap();
        assert_eq!(doc.status, 403);
        assert!(doc.entries.is_empty());
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&mock_server)
            .await;

        let doc = fetcher().fetch(&feed_url(&mock_server), None).await.unwrap();
        assert_eq!(doc.status, 503);
    }

    #[tokio::test]
    async fn test_malformed_feed_sets_flag() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<not valid xml"))
            .mount(&mock_server)
            .await;

        let doc = fetcher().fetch(&feed_url(&mock_server), None).await.unwrap();
        assert_eq!(doc.status, 200);
        assert!(doc.malformed);
        assert!(doc.entries.is_empty());
    }

    #[tokio::test]
    async fn test_empty_feed_success() {
        let empty_rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel></channel></rss>"#;

        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(empty_rss))
            .mount(&mock_server)
            .await;

        let doc = fetcher().fetch(&feed_url(&mock_server), None).await.unwrap();
        assert!(!doc.malformed);
        assert!(doc.entries.is_empty());
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&mock_server)
            .await;

        let fetcher = HttpFetcher::with_client(reqwest::Client::new(), Duration::from_millis(200));
        let err = fetcher
            .fetch(&feed_url(&mock_server), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout(_)));
    }

    /// Serves one response whose headers and body each arrive after `step`.
    async fn serve_in_two_steps(step: Duration) -> Url {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;

            tokio::time::sleep(step).await;
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/rss+xml\r\nContent-Length: {}\r\n\r\n",
                VALID_RSS.len()
            );
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.flush().await;

            tokio::time::sleep(step).await;
            let _ = socket.write_all(VALID_RSS.as_bytes()).await;
            let _ = socket.flush().await;
        });
        Url::parse(&format!("http://{addr}/rss.php?rub=au")).unwrap()
    }

    #[tokio::test]
    async fn test_timeout_bounds_request_and_body_together() {
        // Each phase alone fits the budget; both together do not
        let url = serve_in_two_steps(Duration::from_millis(300)).await;
        let fetcher = HttpFetcher::with_client(reqwest::Client::new(), Duration::from_millis(450));

        let err = fetcher.fetch(&url, None).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_slow_body_within_budget_succeeds() {
        let url = serve_in_two_steps(Duration::from_millis(100)).await;
        let fetcher = HttpFetcher::with_client(reqwest::Client::new(), Duration::from_secs(5));

        let doc = fetcher.fetch(&url, None).await.unwrap();
        assert_eq!(doc.status, 200);
        assert_eq!(doc.entries.len(), 2);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b' '; MAX_FEED_SIZE + 1]))
            .mount(&mock_server)
            .await;

        let err = fetcher()
            .fetch(&feed_url(&mock_server), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::ResponseTooLarge));
    }
}
