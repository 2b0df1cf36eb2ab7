//! Backend HTTP client built on `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use flowgate_core::constructs::{filter_request_headers, is_hop_by_hop};
use flowgate_core::{ClientError, Exchange, HttpClient, Response};
use http::header::{HeaderMap, CONTENT_LENGTH};

/// [`HttpClient`] that forwards the exchange's request to its first
/// destination.
///
/// Redirects are passed through to the caller rather than followed. Request
/// and connect timeouts are enforced by the underlying client and reported as
/// [`ClientError::Timeout`].
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestHttpClient {
    /// Creates a client with the given total and connect timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(timeout: Duration, connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client, timeout })
    }

    fn map_error(&self, url: &str, error: reqwest::Error) -> ClientError {
        if error.is_timeout() {
            #[allow(clippy::cast_possible_truncation)]
            let timeout_ms = self.timeout.as_millis() as u64;
            ClientError::Timeout {
                url: url.to_string(),
                timeout_ms,
            }
        } else if error.is_connect() {
            ClientError::Connect {
                url: url.to_string(),
                reason: error.to_string(),
            }
        } else {
            ClientError::Other(anyhow::Error::new(error))
        }
    }
}

/// Copies backend response headers, dropping hop-by-hop headers and
/// `Content-Length`, which is recomputed from the buffered body.
fn backend_response_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name) || *name == CONTENT_LENGTH {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn call(&self, exchange: &mut Exchange) -> Result<Response, ClientError> {
        let url = exchange
            .destinations()
            .first()
            .cloned()
            .ok_or(ClientError::NoDestination)?;
        let target = reqwest::Url::parse(&url)
            .map_err(|_| ClientError::InvalidDestination { url: url.clone() })?;

        let request = exchange.request();
        let headers = filter_request_headers(&request.method, &request.headers);
        let mut builder = self
            .client
            .request(request.method.clone(), target)
            .headers(headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        tracing::debug!(exchange = exchange.id(), %url, method = %request.method, "dispatching to backend");
        let backend = builder.send().await.map_err(|e| self.map_error(&url, e))?;

        let status = backend.status();
        let headers = backend_response_headers(backend.headers());
        let body = backend.bytes().await.map_err(|e| self.map_error(&url, e))?;

        let mut response = Response::new(status);
        response.headers = headers;
        response.set_body(body);
        Ok(response)
    }
}
