use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use serde::Serialize;

use crate::{
    control::SharedReconciler,
    credential::mask_url,
    handler::{ApiError, ApiJsonResult},
    manager::{ChannelState, ChannelStatus},
    state::types::ChannelId,
};

pub fn pipe_router() -> Router<SharedReconciler> {
    Router::new()
        .route("/list", get(list_pipes))
        .route("/status/{id}", get(get_pipe_status))
}

#[derive(Serialize)]
struct PipeStatus {
    #[serde(flatten)]
    status: ChannelStatus,
    error_msg: Option<String>,
    black_ok: Option<bool>,
    override_link: Option<String>,
}

async fn list_pipes(State(reconciler): State<SharedReconciler>) -> Json<Vec<ChannelStatus>> {
    Json(reconciler.lock().await.status())
}

async fn get_pipe_status(
    State(reconciler): State<SharedReconciler>,
    Path(id): Path<String>,
) -> ApiJsonResult<Option<PipeStatus>> {
    let id: ChannelId = id
        .trim()
        .parse()
        .map_err(|_| ApiError::bad_request(anyhow::anyhow!("invalid channel id {:?}", id)))?;
    let reconciler = reconciler.lock().await;
    if reconciler.state(id) == ChannelState::Absent {
        return Ok(Json(None));
    }
    let entry = reconciler.validation().and_then(|v| v.get(id));
    let override_link = reconciler
        .registry()
        .get(id)
        .and_then(|r| r.override_link())
        .map(mask_url);
    let status = reconciler
        .status()
        .into_iter()
        .find(|s| s.id == id)
        .ok_or_else(|| anyhow::anyhow!("channel {} vanished", id))?;
    Ok(Json(Some(PipeStatus {
        status,
        error_msg: entry.and_then(|e| e.error()).map(str::to_string),
        black_ok: entry.map(|e| e.black_ok),
        override_link,
    })))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{http::StatusCode, response::IntoResponse};
    use tokio::sync::Mutex;

    use super::*;
    use crate::{
        config::ReconcilerConfig,
        credential::{CredentialVault, Credentials},
        media::testing::RecordingLauncher,
        reconciler::Reconciler,
    };

    fn shared() -> SharedReconciler {
        let vault = CredentialVault::new(Credentials::new("admin", "p@ss"));
        let reconciler = Reconciler::new(&ReconcilerConfig::default(), vault, RecordingLauncher::new());
        Arc::new(Mutex::new(reconciler))
    }

    #[tokio::test]
    async fn test_status_rejects_non_numeric_id() {
        let Err(err) = get_pipe_status(State(shared()), Path("cam-3".to_string())).await else {
            panic!("non-numeric id accepted");
        };
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        let Ok(Json(status)) = get_pipe_status(State(shared()), Path(" 3 ".to_string())).await else {
            panic!("numeric id rejected");
        };
        assert!(status.is_none());
    }
}
