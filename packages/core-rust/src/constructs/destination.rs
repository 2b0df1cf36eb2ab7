use async_trait::async_trait;

use crate::error::InterceptorError;
use crate::exchange::Exchange;
use crate::interceptor::Interceptor;
use crate::outcome::{Flows, Outcome};

/// Replaces the exchange's destinations with a single URL.
#[derive(Debug)]
pub struct Destination {
    url: String,
}

impl Destination {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Interceptor for Destination {
    fn name(&self) -> &str {
        "destination"
    }

    fn flows(&self) -> Flows {
        Flows::REQUEST
    }

    fn short_description(&self) -> String {
        format!("destination {}", self.url)
    }

    async fn handle_request(&self, exchange: &mut Exchange) -> Result<Outcome, InterceptorError> {
        exchange.set_destinations(vec![self.url.clone()]);
        Ok(Outcome::Continue)
    }
}
