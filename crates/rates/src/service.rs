use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tally_core::domain::currency::CurrencyCode;
use tally_core::rates::{RateError, RateProvider};
use tracing::{info, warn};

pub const UNKNOWN_CURRENCY: &str = "UNKNOWN CURRENCY";
pub const CURRENCY_REQUIRED: &str = "CURRENCY REQUIRED";
pub const SOURCE_UNAVAILABLE: &str = "RATE SOURCE UNAVAILABLE";
pub const UNAUTHORIZED: &str = "UNAUTHORIZED";

#[derive(Clone)]
pub struct RateServiceState {
    provider: Arc<dyn RateProvider>,
    api_key: Option<SecretString>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RateBody {
    #[serde(with = "rust_decimal::serde::float")]
    pub rate: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMessage {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct RateQuery {
    currency: Option<String>,
}

/// `/rate` and `/health`. With an `api_key`, `/rate` requires a matching bearer token.
pub fn router(provider: Arc<dyn RateProvider>, api_key: Option<SecretString>) -> Router {
    Router::new()
        .route("/rate", get(rate))
        .route("/health", get(health))
        .with_state(RateServiceState { provider, api_key })
}

async fn health() -> Json<ServiceMessage> {
    Json(ServiceMessage { message: "OK".to_owned() })
}

async fn rate(
    State(state): State<RateServiceState>,
    headers: HeaderMap,
    Query(query): Query<RateQuery>,
) -> Response {
    if !authorized(&headers, state.api_key.as_ref()) {
        return message(StatusCode::UNAUTHORIZED, UNAUTHORIZED);
    }

    let Some(raw) = query.currency.as_deref().map(str::trim).filter(|raw| !raw.is_empty()) else {
        return message(StatusCode::BAD_REQUEST, CURRENCY_REQUIRED);
    };
    let Ok(code) = CurrencyCode::parse(raw) else {
        return message(StatusCode::BAD_REQUEST, UNKNOWN_CURRENCY);
    };

    match state.provider.lookup(&code).await {
        Ok(rate) => {
            info!(event_name = "rates.service.lookup", currency = %code, rate = %rate, "rate served");
            (StatusCode::OK, Json(RateBody { rate: rate.value() })).into_response()
        }
        Err(RateError::NotFound(_)) => {
            info!(event_name = "rates.service.unknown_currency", currency = %code, "unknown currency requested");
            message(StatusCode::BAD_REQUEST, UNKNOWN_CURRENCY)
        }
        Err(RateError::Unavailable(detail)) => {
            warn!(
                event_name = "rates.service.source_unavailable",
                currency = %code,
                error = %detail,
                "rate source unavailable"
            );
            message(StatusCode::SERVICE_UNAVAILABLE, SOURCE_UNAVAILABLE)
        }
    }
}

fn authorized(headers: &HeaderMap, api_key: Option<&SecretString>) -> bool {
    let Some(expected) = api_key else {
        return true;
    };
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected.expose_secret())
}

fn message(status: StatusCode, text: &str) -> Response {
    (status, Json(ServiceMessage { message: text.to_owned() })).into_response()
}
