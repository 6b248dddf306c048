//! Paginated catalog client for events and markets metadata.
//!
//! The catalog serves offset pages ordered by id; a short page means the end
//! of the result set. Requests are rate limited because the catalog rejects
//! bursts well before it rejects sustained load.

use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ClientResult;
use crate::http::Requester;
use crate::models::{CatalogEvent, CatalogMarket, RawEvent, RawMarket};

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

pub struct CatalogClient {
    requester: Requester,
    rate_limiter: Arc<DirectRateLimiter>,
}

impl CatalogClient {
    /// Creates a client with the default 30 requests/minute budget.
    #[must_use]
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self::with_rate_limit(base_url, timeout, nonzero!(30u32))
    }

    #[must_use]
    pub fn with_rate_limit(
        base_url: impl Into<String>,
        timeout: Duration,
        requests_per_minute: NonZeroU32,
    ) -> Self {
        Self {
            requester: Requester::new(base_url, timeout),
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_minute(requests_per_minute))),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        self.requester.base_url()
    }

    /// Fetches one page of events with the given closed filter.
    ///
    /// # Errors
    /// Propagates the classified client error.
    pub async fn events_page(
        &self,
        closed: bool,
        limit: u32,
        offset: u32,
    ) -> ClientResult<Vec<CatalogEvent>> {
        self.rate_limiter.until_ready().await;
        let raw: Vec<RawEvent> = self
            .requester
            .get_json("/events", &page_query(closed, limit, offset))
            .await?;
        Ok(raw.into_iter().map(Into::into).collect())
    }

    /// Fetches one page of markets with the given closed filter.
    ///
    /// # Errors
    /// Propagates the classified client error.
    pub async fn markets_page(
        &self,
        closed: bool,
        limit: u32,
        offset: u32,
    ) -> ClientResult<Vec<CatalogMarket>> {
        self.rate_limiter.until_ready().await;
        let raw: Vec<RawMarket> = self
            .requester
            .get_json("/markets", &page_query(closed, limit, offset))
            .await?;
        Ok(raw.into_iter().map(Into::into).collect())
    }
}

fn page_query(closed: bool, limit: u32, offset: u32) -> [(&'static str, String); 5] {
    [
        ("closed", closed.to_string()),
        ("limit", limit.to_string()),
        ("offset", offset.to_string()),
        ("order", "id".to_string()),
        ("ascending", "true".to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(uri: &str) -> CatalogClient {
        CatalogClient::new(uri, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn events_page_sends_filter_and_decodes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .and(query_param("closed", "false"))
            .and(query_param("limit", "500"))
            .and(query_param("offset", "1000"))
            .and(query_param("order", "id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "id": "ev-1",
                    "title": "First event",
                    "active": true,
                    "closed": false,
                    "markets": [
                        {"id": "m-1", "clobTokenIds": "[\"a\",\"b\"]"}
                    ]
                }
            ])))
            .mount(&server)
            .await;

        let events = client(&server.uri()).events_page(false, 500, 1000).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "ev-1");
        assert_eq!(events[0].markets.len(), 1);
    }

    #[tokio::test]
    async fn markets_page_decodes_catalog_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/markets"))
            .and(query_param("closed", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "id": "m-7",
                    "conditionId": "0x7",
                    "question": "Done deal?",
                    "outcomes": "[\"Yes\",\"No\"]",
                    "outcomePrices": "[\"1\",\"0\"]",
                    "clobTokenIds": "[\"y\",\"n\"]",
                    "closed": true
                }
            ])))
            .mount(&server)
            .await;

        let markets = client(&server.uri()).markets_page(true, 500, 0).await.unwrap();
        assert_eq!(markets.len(), 1);
        assert!(markets[0].closed);
        assert!(markets[0].resolved);
        assert_eq!(markets[0].winning_outcome, Some(0));
    }

    #[tokio::test]
    async fn empty_page_decodes_to_empty_vec() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/markets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let markets = client(&server.uri()).markets_page(false, 500, 0).await.unwrap();
        assert!(markets.is_empty());
    }
}
