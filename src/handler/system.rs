use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::{control::SharedReconciler, state::source::fingerprint};

pub fn system_router() -> Router<SharedReconciler> {
    Router::new()
        .route("/health", get(health))
        .route("/summary", get(summary))
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct Summary {
    desired_fingerprint: Option<String>,
    validation_fingerprint: Option<String>,
    tracked: usize,
    running: usize,
    /// The file on disk differs from the loaded snapshot; applied on the next pass.
    desired_pending: bool,
    validation_pending: bool,
}

async fn summary(State(reconciler): State<SharedReconciler>) -> Json<Summary> {
    let (mut summary, resource_path, validation_path) = {
        let reconciler = reconciler.lock().await;
        let summary = Summary {
            desired_fingerprint: reconciler.desired().map(|d| d.fingerprint.clone()),
            validation_fingerprint: reconciler.validation().map(|v| v.fingerprint.clone()),
            tracked: reconciler.registry().tracked().len(),
            running: reconciler.registry().running_count(),
            desired_pending: false,
            validation_pending: false,
        };
        (
            summary,
            reconciler.source().resource_path().to_path_buf(),
            reconciler.source().validation_path().to_path_buf(),
        )
    };

    let on_disk = fingerprint(&resource_path).await;
    summary.desired_pending = on_disk.is_some() && on_disk != summary.desired_fingerprint;
    let on_disk = fingerprint(&validation_path).await;
    summary.validation_pending = on_disk.is_some() && on_disk != summary.validation_fingerprint;
    Json(summary)
}
