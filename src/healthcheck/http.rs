use super::HealthChecker;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::OnceLock;
use std::time::Duration;

/// Shared HTTP client for health checks; one connection pool for every
/// service. Requests set their own timeout.
static SHARED_HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

pub(crate) fn shared_client() -> &'static Client {
    SHARED_HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_else(|_| Client::new())
    })
}

/// Checks `GET <url>`; any 2xx response is healthy.
pub struct HttpChecker {
    url: String,
    client: Client,
    timeout: Duration,
}

impl HttpChecker {
    /// # Errors
    ///
    /// Returns error if URL is malformed or uses unsupported scheme.
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        Self::validate_url(&url)?;
        Ok(Self {
            url,
            client: shared_client().clone(),
            timeout,
        })
    }

    /// Check of a service's health path through its published port.
    pub fn for_port(port: u16, path: &str, timeout: Duration) -> Result<Self> {
        Self::new(format!("http://127.0.0.1:{}{}", port, path), timeout)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn validate_url(url: &str) -> Result<()> {
        match url::Url::parse(url) {
            Ok(parsed) => {
                let scheme = parsed.scheme();
                if scheme != "http" && scheme != "https" {
                    return Err(Error::Config(format!(
                        "Invalid healthcheck URL '{}': scheme must be http or https, got '{}'",
                        url, scheme
                    )));
                }
                Ok(())
            }
            Err(e) => Err(Error::Config(format!(
                "Invalid healthcheck URL '{}': {}",
                url, e
            ))),
        }
    }
}

#[async_trait]
impl HealthChecker for HttpChecker {
    async fn check(&self) -> Result<bool> {
        match self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn unreachable_port_is_unhealthy() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let checker = HttpChecker::for_port(port, "/health", Duration::from_secs(1)).unwrap();
        assert!(!checker.check().await.unwrap());
    }

    #[tokio::test]
    async fn success_status_is_healthy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
                .await;
        });

        let checker = HttpChecker::for_port(port, "/health", Duration::from_secs(2)).unwrap();
        assert_eq!(checker.url(), format!("http://127.0.0.1:{}/health", port));
        assert!(checker.check().await.unwrap());
    }

    #[test]
    fn rejects_invalid_url() {
        assert!(HttpChecker::new("not-a-url".to_string(), Duration::from_secs(1)).is_err());
        assert!(
            HttpChecker::new("ftp://localhost/health".to_string(), Duration::from_secs(1))
                .is_err()
        );
        assert!(
            HttpChecker::new("https://localhost/health".to_string(), Duration::from_secs(1))
                .is_ok()
        );
    }
}
