use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use tally_core::config::RatesConfig;
use tally_core::domain::currency::{CurrencyCode, Rate};
use tally_core::rates::{RateError, RateProvider};
use thiserror::Error;
use tracing::{debug, warn};

use crate::service::RateBody;

#[derive(Debug, Error)]
#[error("failed to build rate service client: {0}")]
pub struct ClientBuildError(#[from] reqwest::Error);

/// Rate lookups against a remote rate service.
///
/// Every request is bounded by the configured timeout; anything other than a
/// clean 200 or 400 answer is reported as [`RateError::Unavailable`].
pub struct HttpRateProvider {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpRateProvider {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        api_key: Option<SecretString>,
    ) -> Result<Self, ClientBuildError> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Ok(Self { client, base_url, api_key })
    }

    pub fn from_config(config: &RatesConfig) -> Result<Self, ClientBuildError> {
        Self::new(config.service_url.clone(), config.timeout(), config.api_key.clone())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn fetch(&self, code: &CurrencyCode) -> Result<Rate, RateError> {
        let mut request = self
            .client
            .get(format!("{}/rate", self.base_url))
            .query(&[("currency", code.as_str())]);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response =
            request.send().await.map_err(|error| RateError::Unavailable(error.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let body: RateBody = response
                    .json()
                    .await
                    .map_err(|error| RateError::Unavailable(format!("malformed rate body: {error}")))?;
                Rate::new(body.rate).map_err(|_| {
                    RateError::Unavailable(format!("rate service returned non-positive rate {}", body.rate))
                })
            }
            StatusCode::BAD_REQUEST => Err(RateError::NotFound(code.clone())),
            status => Err(RateError::Unavailable(format!("rate service returned {status}"))),
        }
    }
}

#[async_trait]
impl RateProvider for HttpRateProvider {
    async fn lookup(&self, code: &CurrencyCode) -> Result<Rate, RateError> {
        let result = self.fetch(code).await;
        match &result {
            Ok(rate) => debug!(event_name = "rates.client.lookup", currency = %code, rate = %rate, "rate fetched"),
            Err(RateError::NotFound(_)) => {
                debug!(event_name = "rates.client.unknown_currency", currency = %code, "rate service does not know currency")
            }
            Err(RateError::Unavailable(detail)) => warn!(
                event_name = "rates.client.unavailable",
                currency = %code,
                base_url = %self.base_url,
                error = %detail,
                "rate service lookup failed"
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{http::StatusCode, routing::get, Json, Router};
    use rust_decimal::Decimal;
    use secrecy::SecretString;
    use tally_core::domain::currency::CurrencyCode;
    use tally_core::rates::{RateError, RateProvider, StaticRateProvider};

    use super::HttpRateProvider;
    use crate::service::router;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{address}")
    }

    fn code(raw: &str) -> CurrencyCode {
        CurrencyCode::parse(raw).expect("code")
    }

    fn client(base_url: &str, api_key: Option<&str>) -> HttpRateProvider {
        HttpRateProvider::new(
            base_url,
            Duration::from_secs(2),
            api_key.map(|key| SecretString::from(key.to_owned())),
        )
        .expect("client")
    }

    #[tokio::test]
    async fn reads_rates_and_unknown_currencies_from_the_service() {
        let base = serve(router(Arc::new(StaticRateProvider::standard()), None)).await;
        let provider = client(&format!("{base}/"), None);

        let rate = provider.lookup(&code("EUR")).await.expect("rate");
        assert_eq!(rate.value(), Decimal::from(100));
        assert_eq!(provider.lookup(&code("GBP")).await, Err(RateError::NotFound(code("GBP"))));
    }

    #[tokio::test]
    async fn sends_the_configured_bearer_token() {
        let app = router(
            Arc::new(StaticRateProvider::standard()),
            Some(SecretString::from("s3cret".to_owned())),
        );
        let base = serve(app).await;

        let anonymous = client(&base, None).lookup(&code("USD")).await;
        assert!(matches!(anonymous, Err(RateError::Unavailable(_))));

        let rate = client(&base, Some("s3cret")).lookup(&code("USD")).await.expect("rate");
        assert_eq!(rate.value(), Decimal::from(90));
    }

    #[tokio::test]
    async fn malformed_and_non_positive_bodies_are_unavailable() {
        let app = Router::new()
            .route("/rate", get(|| async { (StatusCode::OK, "not json") }))
            .route("/zero/rate", get(|| async { Json(serde_json::json!({ "rate": 0 })) }));
        let base = serve(app).await;

        let malformed = client(&base, None).lookup(&code("USD")).await;
        assert!(matches!(malformed, Err(RateError::Unavailable(_))));

        let zero = client(&format!("{base}/zero"), None).lookup(&code("USD")).await;
        assert!(matches!(zero, Err(RateError::Unavailable(_))));
    }

    #[tokio::test]
    async fn server_errors_and_timeouts_are_unavailable() {
        let app = Router::new()
            .route("/rate", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
            .route(
                "/slow/rate",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    StatusCode::OK
                }),
            );
        let base = serve(app).await;

        let failed = client(&base, None).lookup(&code("USD")).await;
        assert!(matches!(failed, Err(RateError::Unavailable(_))));

        let slow = HttpRateProvider::new(format!("{base}/slow"), Duration::from_millis(100), None)
            .expect("client");
        assert!(matches!(slow.lookup(&code("USD")).await, Err(RateError::Unavailable(_))));
    }

    #[tokio::test]
    async fn unreachable_service_is_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        drop(listener);

        let result = client(&format!("http://{address}"), None).lookup(&code("USD")).await;
        assert!(matches!(result, Err(RateError::Unavailable(_))));
    }
}
