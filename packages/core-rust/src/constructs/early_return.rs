use async_trait::async_trait;
use http::header::CONTENT_TYPE;
use http::StatusCode;

use crate::error::InterceptorError;
use crate::exchange::Exchange;
use crate::interceptor::Interceptor;
use crate::message::{set_header, HttpMessage, Response};
use crate::outcome::{Flows, Outcome};

/// Ends the request pass and skips the backend call.
///
/// Reuses the exchange's response if there is one, otherwise answers
/// `200 OK` with the request's body and content type.
#[derive(Debug, Default)]
pub struct Return {
    status: Option<StatusCode>,
    content_type: Option<String>,
}

impl Return {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

#[async_trait]
impl Interceptor for Return {
    fn name(&self) -> &str {
        "return"
    }

    fn flows(&self) -> Flows {
        Flows::REQUEST
    }

    async fn handle_request(&self, exchange: &mut Exchange) -> Result<Outcome, InterceptorError> {
        let mut response = exchange.take_response().unwrap_or_else(|| {
            let request = exchange.request();
            let mut response = Response::ok().with_body(request.body.clone());
            if let Some(content_type) = request.content_type() {
                response = response.with_content_type(content_type);
            }
            response
        });

        if let Some(status) = self.status {
            response.status = status;
        }
        if let Some(content_type) = &self.content_type {
            set_header(&mut response.headers, CONTENT_TYPE.as_str(), content_type);
        }
        exchange.set_response(response);
        Ok(Outcome::Return)
    }
}
