//! Shared HTTP request pipeline.
//!
//! All four REST clients go through [`Requester`]: URL assembly with sorted
//! query parameters, a per-call timeout, optional L2 signing, JSON decoding,
//! and error classification. Query parameters are sorted so the signed
//! path-with-query is stable for a given logical request.

use reqwest::header::{HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::auth::RequestSigner;
use crate::error::{ClientError, ClientResult};

#[derive(Debug, Clone)]
pub struct Requester {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    signer: Option<RequestSigner>,
}

impl Requester {
    /// Creates a requester rooted at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            signer: None,
        }
    }

    /// Attaches an L2 signer; subsequent requests carry `POLY_*` headers.
    #[must_use]
    pub fn with_signer(mut self, signer: RequestSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issues a GET and decodes the JSON body.
    ///
    /// # Errors
    /// `Api`/`RateLimit` on non-2xx, `Network` on transport failure or
    /// timeout, `Validation` when the body does not decode.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> ClientResult<T> {
        let mut params: Vec<(&str, &str)> = query.iter().map(|(k, v)| (*k, v.as_str())).collect();
        params.sort_by_key(|(k, _)| *k);

        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.http.get(&url).timeout(self.timeout);
        if !params.is_empty() {
            builder = builder.query(&params);
        }
        let mut request = builder.build()?;

        if let Some(signer) = &self.signer {
            let path_with_query = match request.url().query() {
                Some(q) => format!("{}?{}", request.url().path(), q),
                None => request.url().path().to_string(),
            };
            for (name, value) in signer.headers("GET", &path_with_query, "")? {
                let name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|e| ClientError::validation(e.to_string()))?;
                let value = HeaderValue::from_str(&value)
                    .map_err(|e| ClientError::validation(e.to_string()))?;
                request.headers_mut().insert(name, value);
            }
        }

        tracing::debug!(url = %request.url(), "GET");
        let response = self.http.execute(request).await?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::from_status(status.as_u16(), body, &headers));
        }

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| ClientError::validation(format!("{e} in response from {url}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::URL_SAFE, Engine};
    use mirror_core::ClobCredentials;
    use serde::Deserialize;
    use wiremock::matchers::{header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize)]
    struct Payload {
        value: u32,
    }

    fn requester(uri: &str) -> Requester {
        Requester::new(uri, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn decodes_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/thing"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"value": 7})))
            .mount(&server)
            .await;

        let payload: Payload = requester(&server.uri()).get_json("/thing", &[]).await.unwrap();
        assert_eq!(payload.value, 7);
    }

    #[tokio::test]
    async fn query_parameters_are_sent_sorted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .and(query_param("closed", "false"))
            .and(query_param("limit", "500"))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"value": 1})))
            .mount(&server)
            .await;

        // Parameters handed over out of order still match.
        let payload: Payload = requester(&server.uri())
            .get_json(
                "/page",
                &[
                    ("offset", "0".to_string()),
                    ("closed", "false".to_string()),
                    ("limit", "500".to_string()),
                ],
            )
            .await
            .unwrap();
        assert_eq!(payload.value, 1);
    }

    #[tokio::test]
    async fn non_2xx_maps_to_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/thing"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let err = requester(&server.uri())
            .get_json::<Payload>("/thing", &[])
            .await
            .unwrap_err();
        match err {
            ClientError::Api { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "unavailable");
            }
            other => panic!("expected Api, got {other:?}"),
        }
        assert!(requester(&server.uri())
            .get_json::<Payload>("/thing", &[])
            .await
            .unwrap_err()
            .is_retryable());
    }

    #[tokio::test]
    async fn status_429_maps_to_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/thing"))
            .respond_with(
                ResponseTemplate::new(429).insert_header("retry-after", "3"),
            )
            .mount(&server)
            .await;

        let err = requester(&server.uri())
            .get_json::<Payload>("/thing", &[])
            .await
            .unwrap_err();
        match err {
            ClientError::RateLimit { retry_after, .. } => assert_eq!(retry_after, Some(3)),
            other => panic!("expected RateLimit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_maps_to_validation_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/thing"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = requester(&server.uri())
            .get_json::<Payload>("/thing", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Validation { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn signed_requests_carry_poly_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/markets/0xabc"))
            .and(header_exists("POLY_ADDRESS"))
            .and(header_exists("POLY_SIGNATURE"))
            .and(header_exists("POLY_TIMESTAMP"))
            .and(header_exists("POLY_API_KEY"))
            .and(header_exists("POLY_PASSPHRASE"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"value": 2})))
            .mount(&server)
            .await;

        let signer = RequestSigner::new(ClobCredentials {
            address: "0xabc".to_string(),
            api_key: "key".to_string(),
            secret: URL_SAFE.encode(b"secret-bytes"),
            passphrase: "pass".to_string(),
        });
        let payload: Payload = requester(&server.uri())
            .with_signer(signer)
            .get_json("/markets/0xabc", &[])
            .await
            .unwrap();
        assert_eq!(payload.value, 2);
    }
}
