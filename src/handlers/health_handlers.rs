//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks SQLite and the blob storage root

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::BTreeMap, path::Path};
use tokio::fs;
use uuid::Uuid;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl CheckStatus {
    fn pass() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn fail(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

/// `GET /healthz`
///
/// Liveness only; never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /readyz`
///
/// 200 when both the database answers `SELECT 1` and a probe file can be
/// written, read back and removed under the blob root; 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();
    checks.insert("sqlite", probe_sqlite(&state).await);
    checks.insert("storage", probe_storage(&state.blobs.base_path).await);

    let ready = checks.values().all(|check| check.ok);
    let (status, label) = if ready {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "error")
    };
    (
        status,
        Json(ReadyResponse {
            status: label,
            checks,
        }),
    )
}

async fn probe_sqlite(state: &AppState) -> CheckStatus {
    match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&state.db)
        .await
    {
        Ok(1) => CheckStatus::pass(),
        Ok(v) => CheckStatus::fail(format!("unexpected result: {}", v)),
        Err(e) => CheckStatus::fail(format!("error: {}", e)),
    }
}

async fn probe_storage(root: &Path) -> CheckStatus {
    let probe = root.join(format!(".readyz-{}", Uuid::new_v4()));
    let outcome = async {
        fs::create_dir_all(root).await?;
        fs::write(&probe, b"readyz").await?;
        let bytes = fs::read(&probe).await?;
        Ok::<_, std::io::Error>(bytes == b"readyz")
    }
    .await;
    let _ = fs::remove_file(&probe).await;

    match outcome {
        Ok(true) => CheckStatus::pass(),
        Ok(false) => CheckStatus::fail("probe content mismatch"),
        Err(e) => CheckStatus::fail(format!("probe failed: {}", e)),
    }
}
