//! GET /health - liveness plus dependency checks (no auth required).
//!
//! `?deep=true` also sends a one-word completion to the model backend.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::warn;

use colloquy_infra::llm::test_provider_connection;

use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct HealthQuery {
    #[serde(default)]
    pub deep: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub version: &'static str,
    pub database: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<&'static str>,
}

pub async fn health_check(
    State(state): State<AppState>,
    Query(query): Query<HealthQuery>,
) -> (StatusCode, Json<HealthReport>) {
    let database_ok = sqlx::query("SELECT 1")
        .execute(&state.db_pool.reader)
        .await
        .inspect_err(|e| warn!(error = %e, "Health check: database unavailable"))
        .is_ok();

    let backend_ok = if query.deep {
        Some(
            test_provider_connection(&state.provider)
                .await
                .inspect_err(|e| warn!(error = %e, "Health check: model backend unavailable"))
                .is_ok(),
        )
    } else {
        None
    };

    let healthy = database_ok && backend_ok.unwrap_or(true);
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let label = |ok: bool| if ok { "ok" } else { "error" };

    (
        status,
        Json(HealthReport {
            status: if healthy { "ok" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            database: label(database_ok),
            backend: backend_ok.map(label),
        }),
    )
}
