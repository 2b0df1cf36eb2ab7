use std::sync::Arc;

use async_trait::async_trait;
use http::header::{HeaderMap, HeaderName, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, HOST, SERVER};
use http::Method;

use crate::client::HttpClient;
use crate::error::InterceptorError;
use crate::exchange::Exchange;
use crate::flow_controller::FlowController;
use crate::interceptor::Interceptor;
use crate::lang::Template;
use crate::message::Request;
use crate::outcome::{Flow, Flows, Outcome};
use crate::problem::ProblemDetails;

use super::expression_failed;

/// Connection-scoped headers that are never forwarded between hops.
#[must_use]
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

fn has_body(method: &Method) -> bool {
    ![Method::GET, Method::HEAD, Method::OPTIONS, Method::TRACE, Method::CONNECT].contains(method)
}

/// Headers forwarded from the current request to the called resource.
///
/// Drops hop-by-hop headers and `Host`; body headers are dropped too when the
/// method carries no body.
#[must_use]
pub fn filter_request_headers(method: &Method, headers: &HeaderMap) -> HeaderMap {
    let strip_body_headers = !has_body(method);
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name) || *name == HOST {
            continue;
        }
        if strip_body_headers && (*name == CONTENT_LENGTH || *name == CONTENT_TYPE) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Headers copied back from the called resource's response.
///
/// Drops hop-by-hop and identity headers (`Server`, `Content-Encoding`) and
/// `Content-Length`, which is recomputed from the copied body.
#[must_use]
pub fn filter_response_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name) || *name == SERVER || *name == CONTENT_ENCODING || *name == CONTENT_LENGTH {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Calls another resource and merges its response into the current request.
///
/// The called response's body replaces the current request body and its
/// filtered headers are set on the current request, so later interceptors
/// (and the backend) see the enriched request. A non-2xx status is not an
/// error; a transport failure aborts with a 502 problem.
pub struct Call {
    url: Template,
    client: Arc<dyn HttpClient>,
    controller: FlowController,
}

impl Call {
    #[must_use]
    pub fn new(url: Template, client: Arc<dyn HttpClient>) -> Self {
        Self {
            url,
            client,
            controller: FlowController::default(),
        }
    }

    #[must_use]
    pub fn with_controller(mut self, controller: FlowController) -> Self {
        self.controller = controller;
        self
    }

    fn sub_exchange(exchange: &Exchange, url: &str) -> Exchange {
        let current = exchange.request();
        let mut request = Request::new(current.method.clone(), url);
        request.headers = filter_request_headers(&current.method, &current.headers);
        if has_body(&current.method) {
            request.body = current.body.clone();
        }

        let mut sub = Exchange::new(request);
        sub.set_destinations(vec![url.to_string()]);
        sub.set_cancellation_token(exchange.cancellation_token().child_token());
        sub
    }
}

#[async_trait]
impl Interceptor for Call {
    fn name(&self) -> &str {
        "call"
    }

    fn flows(&self) -> Flows {
        Flows::REQUEST
    }

    fn short_description(&self) -> String {
        format!("call {}", self.url.source())
    }

    async fn handle_request(&self, exchange: &mut Exchange) -> Result<Outcome, InterceptorError> {
        let url = match self.url.render(exchange, Flow::Request) {
            Ok(url) => url,
            Err(error) => {
                return Ok(expression_failed(
                    &self.controller,
                    exchange,
                    "call",
                    self.url.source(),
                    Flow::Request,
                    &error,
                ))
            }
        };

        let mut sub = Self::sub_exchange(exchange, &url);
        tracing::debug!(exchange = exchange.id(), sub_exchange = sub.id(), %url, "calling");

        let response = match self.client.call(&mut sub).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(exchange = exchange.id(), %url, %error, "call failed");
                ProblemDetails::gateway(self.controller.production(), "call")
                    .add_subtype("call-failed")
                    .title("Calling an external resource failed.")
                    .flow(Flow::Request)
                    .internal_field("url", url.as_str())
                    .error(&error)
                    .build_and_set_response(exchange);
                return Ok(Outcome::Abort);
            }
        };

        tracing::debug!(exchange = exchange.id(), %url, status = response.status.as_u16(), "call returned");
        let headers = filter_response_headers(&response.headers);
        let request = exchange.request_mut();
        for name in headers.keys() {
            request.headers.remove(name);
        }
        for (name, value) in &headers {
            request.headers.append(name.clone(), value.clone());
        }
        request.set_body(response.body);
        Ok(Outcome::Continue)
    }
}
