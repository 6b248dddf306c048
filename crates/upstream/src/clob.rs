//! CLOB tradability lookup.

use std::time::Duration;

use crate::auth::RequestSigner;
use crate::error::ClientResult;
use crate::http::Requester;
use crate::models::ClobMarket;

/// Per-market lookup against the order-book service, keyed by condition id.
pub struct ClobClient {
    requester: Requester,
}

impl ClobClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            requester: Requester::new(base_url, timeout),
        }
    }

    /// Attaches L2 credentials; unauthenticated lookups work without them.
    #[must_use]
    pub fn with_signer(mut self, signer: RequestSigner) -> Self {
        self.requester = self.requester.with_signer(signer);
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        self.requester.base_url()
    }

    /// Fetches the tradability state for one condition id.
    ///
    /// # Errors
    /// Propagates the classified client error; a 404 means the CLOB does not
    /// serve the market at all.
    pub async fn market(&self, condition_id: &str) -> ClientResult<ClobMarket> {
        self.requester
            .get_json(&format!("/markets/{condition_id}"), &[])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn market_lookup_decodes_tradability() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/markets/0xcond"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "condition_id": "0xcond",
                "closed": false,
                "accepting_orders": false,
                "enable_order_book": true
            })))
            .mount(&server)
            .await;

        let client = ClobClient::new(server.uri(), Duration::from_secs(5));
        let market = client.market("0xcond").await.unwrap();
        assert!(!market.is_tradable());
        assert!(!market.accepting_orders);
    }

    #[tokio::test]
    async fn unknown_condition_maps_to_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/markets/0xmissing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;

        let client = ClobClient::new(server.uri(), Duration::from_secs(5));
        let err = client.market("0xmissing").await.unwrap_err();
        assert!(matches!(err, ClientError::Api { status: 404, .. }));
        assert!(!err.is_retryable());
    }
}
