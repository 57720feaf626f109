use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::control::SharedReconciler;

pub(crate) fn api_router(reconciler: SharedReconciler) -> Router {
    Router::new()
        .nest("/pipe", crate::handler::pipe::pipe_router())
        .nest("/system", crate::handler::system::system_router())
        .with_state(reconciler)
}

pub(crate) fn start_api_server(addr: &str, reconciler: SharedReconciler, cancel: CancellationToken) {
    let addr = addr.to_string();
    tokio::spawn(async move {
        let app = api_router(reconciler);

        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                log::error!("API: failed to bind {}: {}", addr, e);
                return;
            }
        };
        log::info!("API: server started on {}", addr);
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(cancel))
            .await
        {
            log::error!("API: server error: {}", e);
        }
    });
}

async fn shutdown_signal(cancel: CancellationToken) {
    cancel.cancelled().await;
    log::info!("API: shutting down");
}
