//! Network fetchers.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, trace};

use crate::{NetError, Request, Response};

/// Performs network fetches on behalf of the worker.
///
/// Implementations return `Ok` for every HTTP response regardless of status.
/// `Err` is reserved for failures where no response arrived at all.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: Request) -> Result<Response, NetError>;
}

/// HTTP fetcher configuration.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// User agent string.
    pub user_agent: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("LivestreamSchedule-SW/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// [`Fetcher`] backed by a `reqwest` client.
pub struct HttpFetcher {
    client: Client,
    config: FetcherConfig,
}

impl HttpFetcher {
    /// Create a new fetcher.
    pub fn new(config: FetcherConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(timeout = ?config.timeout, "HttpFetcher initialized");

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        debug!(id = request.id.raw(), url = %request.url, method = %request.method, "Fetching");

        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);

        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                NetError::Timeout(self.config.timeout)
            } else {
                NetError::Http(e)
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await?;

        trace!(url = %url, status = %status, body_len = body.len(), "Response received");

        Ok(Response::new(url, status, headers, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, StatusCode};
    use wiremock::matchers::{body_string, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(FetcherConfig {
            timeout: Duration::from_secs(5),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_fetcher_config_default() {
        let config = FetcherConfig::default();
        assert!(config.user_agent.starts_with("LivestreamSchedule-SW/"));
        assert_eq!(config.max_redirects, 10);
    }

    #[tokio::test]
    async fn test_fetch_get() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/static/css/style.css"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/css")
                    .set_body_string("body { margin: 0; }"),
            )
            .mount(&server)
            .await;

        let url = format!("{}/static/css/style.css?v=2", server.uri());
        let request = Request::parse(Method::GET, &url).unwrap();
        let response = fetcher().fetch(request).await.unwrap();

        assert!(response.ok());
        assert_eq!(response.content_type(), Some("text/css"));
        assert_eq!(response.text().unwrap(), "body { margin: 0; }");
    }

    #[tokio::test]
    async fn test_server_error_is_a_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let request = Request::parse(Method::GET, &server.uri()).unwrap();
        let response = fetcher().fetch(request).await.unwrap();

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!response.ok());
    }

    #[tokio::test]
    async fn test_post_forwards_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/vote"))
            .and(body_string("{\"slot\":3}"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/api/vote", server.uri());
        let request = Request::parse(Method::POST, &url)
            .unwrap()
            .body("{\"slot\":3}");
        let response = fetcher().fetch(request).await.unwrap();

        assert_eq!(response.status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_an_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let request = Request::parse(Method::GET, &format!("http://127.0.0.1:{port}/")).unwrap();
        assert!(fetcher().fetch(request).await.is_err());
    }
}
