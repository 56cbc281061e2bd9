use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tally_core::flows::ConversationStore;
use tally_db::DbPool;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    store: Arc<ConversationStore>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    Degraded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: Readiness,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: Readiness,
    pub database: HealthCheck,
    /// Conversations currently mid-flow.
    pub active_conversations: usize,
    /// Keys the store holds, including expired-flow tombstones.
    pub tracked_keys: usize,
    pub checked_at: DateTime<Utc>,
}

pub fn router(db_pool: DbPool, store: Arc<ConversationStore>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, store })
}

pub async fn spawn(
    bind_address: &str,
    port: u16,
    db_pool: DbPool,
    store: Arc<ConversationStore>,
) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(event_name = "system.health.start", bind_address = %address, "health endpoint listening");

    let app = router(db_pool, store);
    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, app).await {
            error!(event_name = "system.health.error", error = %error, "health endpoint stopped");
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthReport>) {
    let database = match tally_db::ping(&state.db_pool).await {
        Ok(()) => HealthCheck { status: Readiness::Ready, detail: "select 1 succeeded".to_string() },
        Err(error) => HealthCheck { status: Readiness::Degraded, detail: error.to_string() },
    };

    let report = HealthReport {
        status: database.status,
        database,
        active_conversations: state.store.active_count(),
        tracked_keys: state.store.tracked_count(),
        checked_at: Utc::now(),
    };

    let code = match report.status {
        Readiness::Ready => StatusCode::OK,
        Readiness::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(report))
}
