//! Global trades feed client.

use std::time::Duration;

use crate::error::ClientResult;
use crate::http::Requester;
use crate::models::{GlobalTrade, RawTrade};

/// Fetches a time-ordered sample of recent executions across all markets.
///
/// The feed is global and unauthenticated; callers filter against their own
/// tracked token set.
pub struct TradesClient {
    requester: Requester,
}

impl TradesClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            requester: Requester::new(base_url, timeout),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        self.requester.base_url()
    }

    /// Fetches one batch of recent trades, newest first.
    ///
    /// Rows without an asset id are dropped during decode.
    ///
    /// # Errors
    /// Propagates the classified client error.
    pub async fn recent(&self, limit: u32) -> ClientResult<Vec<GlobalTrade>> {
        let raw: Vec<RawTrade> = self
            .requester
            .get_json(
                "/trades",
                &[
                    ("limit", limit.to_string()),
                    ("takerOnly", "true".to_string()),
                ],
            )
            .await?;
        Ok(raw.into_iter().filter_map(GlobalTrade::from_raw).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn recent_decodes_and_drops_assetless_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/trades"))
            .and(query_param("limit", "500"))
            .and(query_param("takerOnly", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "asset": "tok-1",
                    "side": "BUY",
                    "price": 0.5,
                    "size": 10,
                    "timestamp": 1700,
                    "transactionHash": "0xabc",
                    "proxyWallet": "0xwallet"
                },
                {"side": "SELL", "price": 0.4}
            ])))
            .mount(&server)
            .await;

        let client = TradesClient::new(server.uri(), Duration::from_secs(5));
        let trades = client.recent(500).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].asset, "tok-1");
        assert_eq!(trades[0].price, dec!(0.5));
        assert_eq!(trades[0].transaction_hash, "0xabc");
    }
}
