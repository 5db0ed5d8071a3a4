use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Client, ClientBuilder};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;
use url::Url;

pub const DEFAULT_INGESTION_URL: &str = "https://dc.services.visualstudio.com/v2/track";
pub const INGESTION_PATH: &str = "/v2/track";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Request timeout: {0}")]
    RequestTimeout(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl From<ClientError> for crate::domain::TelemetryError {
    fn from(err: ClientError) -> Self {
        crate::domain::TelemetryError::Client(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub ingestion_url: String,
    pub timeout: Duration,
    pub connection_timeout: Duration,
    pub max_connections: usize,
    pub keep_alive_timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ingestion_url: DEFAULT_INGESTION_URL.to_string(),
            timeout: Duration::from_secs(10),
            connection_timeout: Duration::from_secs(5),
            max_connections: 8,
            keep_alive_timeout: Duration::from_secs(60),
            user_agent: default_user_agent(),
        }
    }
}

pub fn default_user_agent() -> String {
    format!(
        "rask-telemetry/{} ({})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS
    )
}

/// Parses an ingestion endpoint and makes sure its path ends in `/v2/track`.
pub fn normalize_ingestion_url(raw: &str) -> Result<Url, ClientError> {
    let mut url: Url = raw
        .trim()
        .parse()
        .map_err(|e| ClientError::InvalidConfiguration(format!("Invalid ingestion URL '{raw}': {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ClientError::InvalidConfiguration(format!(
            "Ingestion URL must be http(s): {raw}"
        )));
    }

    let path = url.path().trim_end_matches('/').to_string();
    if path.ends_with(INGESTION_PATH) {
        url.set_path(&path);
    } else {
        url.set_path(&format!("{path}{INGESTION_PATH}"));
    }
    Ok(url)
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionStats {
    pub max_connections: usize,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_response_time: Duration,
}

#[derive(Debug)]
pub struct ClientStats {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    total_response_time: AtomicU64,
}

impl ClientStats {
    fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            total_response_time: AtomicU64::new(0),
        }
    }

    pub fn record_request(&self, success: bool, response_time: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_time
            .fetch_add(response_time.as_millis() as u64, Ordering::Relaxed);

        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    pub config: ClientConfig,
    ingestion_url: Url,
    pub stats: Arc<ClientStats>,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let ingestion_url = normalize_ingestion_url(&config.ingestion_url)?;

        // Configure HTTP client with connection pooling
        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.connection_timeout)
            .pool_max_idle_per_host(config.max_connections)
            .pool_idle_timeout(config.keep_alive_timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            .build()
            .map_err(|e| {
                ClientError::InvalidConfiguration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            config,
            ingestion_url,
            stats: Arc::new(ClientStats::new()),
        })
    }

    pub fn ingestion_url(&self) -> &Url {
        &self.ingestion_url
    }

    /// POSTs `body` to the ingestion URL and returns whatever status came back.
    /// Only transport failures are errors.
    pub async fn post(&self, body: Bytes, headers: HeaderMap) -> Result<HttpResponse, ClientError> {
        let start = Instant::now();

        let result = self
            .client
            .post(self.ingestion_url.clone())
            .headers(headers)
            .body(body)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.stats.record_request(false, start.elapsed());
                if e.is_timeout() {
                    return Err(ClientError::RequestTimeout(e.to_string()));
                }
                return Err(ClientError::NetworkError(e));
            }
        };

        let status = response.status().as_u16();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                debug!("Failed to read response body (HTTP {}): {}", status, e);
                Bytes::new()
            }
        };
        self.stats.record_request(status == 200, start.elapsed());

        Ok(HttpResponse { status, body })
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        let total_requests = self.stats.total_requests.load(Ordering::Relaxed);
        let total_response_time = self.stats.total_response_time.load(Ordering::Relaxed);

        let average_response_time = if total_requests > 0 {
            Duration::from_millis(total_response_time / total_requests)
        } else {
            Duration::ZERO
        };

        ConnectionStats {
            max_connections: self.config.max_connections,
            total_requests,
            successful_requests: self.stats.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.stats.failed_requests.load(Ordering::Relaxed),
            average_response_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_appends_track_path() {
        let url = normalize_ingestion_url("https://westeurope-1.in.applicationinsights.azure.com/")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://westeurope-1.in.applicationinsights.azure.com/v2/track"
        );

        let url = normalize_ingestion_url("http://localhost:8080").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/v2/track");
    }

    #[test]
    fn test_normalize_keeps_existing_track_path() {
        let url = normalize_ingestion_url(DEFAULT_INGESTION_URL).unwrap();
        assert_eq!(url.as_str(), DEFAULT_INGESTION_URL);

        let url = normalize_ingestion_url("https://example.com/v2/track/").unwrap();
        assert_eq!(url.as_str(), "https://example.com/v2/track");
    }

    #[test]
    fn test_normalize_keeps_prefix_path() {
        let url = normalize_ingestion_url("https://proxy.local/telemetry").unwrap();
        assert_eq!(url.as_str(), "https://proxy.local/telemetry/v2/track");
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(normalize_ingestion_url("loremipsum").is_err());
        assert!(normalize_ingestion_url("ftp://example.com").is_err());
    }

    #[test]
    fn test_user_agent_names_client() {
        let agent = default_user_agent();
        assert!(agent.starts_with("rask-telemetry/"));
        assert!(agent.contains(std::env::consts::OS));
    }

    #[test]
    fn test_client_builds_with_defaults() {
        let client = HttpClient::new(ClientConfig::default()).unwrap();
        assert_eq!(client.ingestion_url().as_str(), DEFAULT_INGESTION_URL);
        assert_eq!(client.connection_stats().total_requests, 0);
    }

    #[tokio::test]
    async fn test_truncated_body_keeps_status() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            while !request.ends_with(b"\r\n\r\n[]") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
            }
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npartial")
                .await
                .unwrap();
        });

        let client = HttpClient::new(ClientConfig {
            ingestion_url: format!("http://{addr}"),
            ..ClientConfig::default()
        })
        .unwrap();
        let response = client
            .post(Bytes::from_static(b"[]"), HeaderMap::new())
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert!(response.body.is_empty());
    }
}
