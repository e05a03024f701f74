//! Network access for the worker.
//!
//! The worker only ever talks to the network through the [`Fetcher`]
//! trait, so the fetch strategy can be exercised against a scripted
//! fetcher in tests and against `reqwest` in production.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::{Origin, Url};

use crate::error::FetchError;
use crate::http::{Request, RequestMode, Response, ResponseType};

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Issue the request. Non-2xx statuses are successful fetches; only
    /// transport failures are errors.
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// `reqwest`-backed fetcher.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    origin: Origin,
}

impl HttpFetcher {
    /// Create a fetcher for an application served from `base`.
    pub fn new(base: &Url, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            origin: base.origin(),
        })
    }

    /// Classify a response the way a browser would. `final_url` is where
    /// the response actually came from, after any redirects.
    fn response_type(&self, final_url: &Url, mode: RequestMode) -> ResponseType {
        if final_url.origin() == self.origin {
            ResponseType::Basic
        } else if mode == RequestMode::NoCors {
            ResponseType::Opaque
        } else {
            ResponseType::Cors
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        debug!(url = %request.url, method = %request.method, "Fetching from network");

        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .send()
            .await?;

        let kind = self.response_type(response.url(), request.mode);
        if response.url() != &request.url {
            debug!(url = %request.url, final_url = %response.url(), kind = %kind, "Followed redirect");
        }

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?;

        if kind == ResponseType::Opaque {
            // Opaque responses expose nothing to the worker
            return Ok(Response {
                status: 0,
                status_text: String::new(),
                headers: Vec::new(),
                body: bytes::Bytes::new(),
                kind,
            });
        }

        Ok(Response {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn fetcher() -> HttpFetcher {
        let base = Url::parse("https://notes.example/app/").unwrap();
        HttpFetcher::new(&base, Duration::from_secs(5)).expect("client builds")
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_same_origin_is_basic() {
        let kind = fetcher().response_type(&url("https://notes.example/other/path.js"), RequestMode::Cors);
        assert_eq!(kind, ResponseType::Basic);
    }

    #[test]
    fn test_cross_origin_types() {
        let cdn = url("https://cdnjs.cloudflare.com/lib.js");
        assert_eq!(fetcher().response_type(&cdn, RequestMode::Cors), ResponseType::Cors);
        assert_eq!(fetcher().response_type(&cdn, RequestMode::NoCors), ResponseType::Opaque);
    }

    #[test]
    fn test_scheme_or_port_change_is_cross_origin() {
        let http = url("http://notes.example/app/");
        let port = url("https://notes.example:8443/app/");
        assert_eq!(fetcher().response_type(&http, RequestMode::Cors), ResponseType::Cors);
        assert_eq!(fetcher().response_type(&port, RequestMode::Cors), ResponseType::Cors);
    }

    /// Serve every connection on `listener` with the same raw HTTP response.
    fn serve(listener: TcpListener, raw: String) {
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let raw = raw.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket.write_all(raw.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
    }

    #[tokio::test]
    async fn test_redirect_to_other_origin_is_not_basic() {
        let app = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let other = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let app_port = app.local_addr().unwrap().port();
        let other_port = other.local_addr().unwrap().port();

        serve(
            app,
            format!(
                "HTTP/1.1 302 Found\r\nLocation: http://127.0.0.1:{other_port}/x\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            ),
        );
        serve(
            other,
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nforgn".to_string(),
        );

        let base = url(&format!("http://127.0.0.1:{app_port}/"));
        let fetcher = HttpFetcher::new(&base, Duration::from_secs(5)).unwrap();

        let response = fetcher
            .fetch(&Request::get(base.join("r").unwrap()))
            .await
            .expect("redirect followed");
        assert_eq!(response.status, 200);
        assert_eq!(&response.body[..], b"forgn");
        assert_eq!(response.kind, ResponseType::Cors);
        assert!(!response.is_cacheable());

        let no_cors = fetcher
            .fetch(&Request::get(base.join("r").unwrap()).with_mode(RequestMode::NoCors))
            .await
            .unwrap();
        assert_eq!(no_cors.kind, ResponseType::Opaque);
    }

    #[tokio::test]
    async fn test_same_origin_response_is_basic() {
        let app = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = app.local_addr().unwrap().port();
        serve(
            app,
            "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok".to_string(),
        );

        let base = url(&format!("http://127.0.0.1:{port}/"));
        let fetcher = HttpFetcher::new(&base, Duration::from_secs(5)).unwrap();
        let response = fetcher
            .fetch(&Request::get(base.join("index.html").unwrap()))
            .await
            .unwrap();
        assert_eq!(response.kind, ResponseType::Basic);
        assert!(response.is_cacheable());
    }
}
