use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use ventix_agent::ProviderPool;
use ventix_db::{ping, DbPool};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    provider_pool: Option<Arc<ProviderPool>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub classifier: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, provider_pool: Option<Arc<ProviderPool>>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, provider_pool })
}

/// Only the database decides readiness; a cooling or empty provider pool
/// still answers through the keyword fallback.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let classifier = classifier_check(state.provider_pool.as_deref());
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if !ready {
            "unavailable"
        } else if classifier.status == "ready" {
            "ready"
        } else {
            "degraded"
        },
        service: HealthCheck {
            status: "ready",
            detail: "ventix-server runtime initialized".to_string(),
        },
        database,
        classifier,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match ping(pool).await {
        Ok(()) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

fn classifier_check(pool: Option<&ProviderPool>) -> HealthCheck {
    let Some(pool) = pool else {
        return HealthCheck {
            status: "degraded",
            detail: "no provider credentials; keyword fallback only".to_string(),
        };
    };

    let status = pool.status(Utc::now());
    let available = status.available_credentials();
    if available == 0 {
        HealthCheck {
            status: "degraded",
            detail: format!(
                "all {} credential(s) cooling down; keyword fallback in use",
                status.credentials.len()
            ),
        }
    } else {
        HealthCheck {
            status: "ready",
            detail: format!(
                "{available}/{} credential(s) available, next model `{}`",
                status.credentials.len(),
                pool.model(status.cursor.model).unwrap_or("unknown")
            ),
        }
    }
}
