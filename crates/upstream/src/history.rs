//! Per-condition price history client.

use std::str::FromStr;
use std::time::Duration;

use crate::error::{ClientError, ClientResult};
use crate::http::Requester;
use crate::models::{HistoryPoint, RawHistory};

/// Supported history windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryInterval {
    Max,
    OneWeek,
    OneDay,
    SixHours,
    OneHour,
}

impl HistoryInterval {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryInterval::Max => "max",
            HistoryInterval::OneWeek => "1w",
            HistoryInterval::OneDay => "1d",
            HistoryInterval::SixHours => "6h",
            HistoryInterval::OneHour => "1h",
        }
    }
}

impl FromStr for HistoryInterval {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "max" => Ok(HistoryInterval::Max),
            "1w" => Ok(HistoryInterval::OneWeek),
            "1d" => Ok(HistoryInterval::OneDay),
            "6h" => Ok(HistoryInterval::SixHours),
            "1h" => Ok(HistoryInterval::OneHour),
            other => Err(ClientError::validation(format!(
                "unknown history interval '{other}'"
            ))),
        }
    }
}

pub struct PriceHistoryClient {
    requester: Requester,
}

impl PriceHistoryClient {
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

    /// Fetches the price series for one condition id, oldest first.
    ///
    /// # Errors
    /// Propagates the classified client error.
    pub async fn history(
        &self,
        condition_id: &str,
        interval: HistoryInterval,
    ) -> ClientResult<Vec<HistoryPoint>> {
        let raw: RawHistory = self
            .requester
            .get_json(
                "/prices-history",
                &[
                    ("market", condition_id.to_string()),
                    ("interval", interval.as_str().to_string()),
                ],
            )
            .await?;
        Ok(raw.history.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn interval_round_trips_through_strings() {
        for s in ["max", "1w", "1d", "6h", "1h"] {
            assert_eq!(HistoryInterval::from_str(s).unwrap().as_str(), s);
        }
        assert!(HistoryInterval::from_str("2w").is_err());
    }

    #[tokio::test]
    async fn history_sends_condition_and_interval() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prices-history"))
            .and(query_param("market", "0xcond"))
            .and(query_param("interval", "1w"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "history": [{"t": 1000, "p": 0.7}, {"t": 2000, "p": 0.6}]
            })))
            .mount(&server)
            .await;

        let client = PriceHistoryClient::new(server.uri(), Duration::from_secs(5));
        let points = client.history("0xcond", HistoryInterval::OneWeek).await.unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].p, dec!(0.7));
        assert_eq!(points[1].t, 2000);
    }

    #[tokio::test]
    async fn empty_history_is_ok() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prices-history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"history": []})))
            .mount(&server)
            .await;

        let client = PriceHistoryClient::new(server.uri(), Duration::from_secs(5));
        let points = client.history("0xcond", HistoryInterval::Max).await.unwrap();
        assert!(points.is_empty());
    }
}
