//! HTTP grouping service
//!
//! Exposes a [`Grouper`](crate::Grouper) over the same API that
//! [`ServiceClient`](crate::client::ServiceClient) speaks:
//!
//! - `POST /process` groups one exception and returns `{"group_id": ...}`
//! - `GET /top_exceptions?limit=10&days=1` returns the most frequent groups
//! - `GET /health` liveness check
//!
//! Grouping failures are answered with status 500 and a
//! `{"detail": ..., "code": ...}` body.

#[cfg(feature = "http-server")]
mod routes {
    use std::sync::Arc;

    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use tower_http::trace::TraceLayer;

    use crate::client::{ErrorBody, ProcessRequest, ProcessResponse, TopExceptionsQuery};
    use crate::error::GroupingError;
    use crate::grouper::Grouper;
    use crate::types::TopException;

    struct ApiError(GroupingError);

    impl IntoResponse for ApiError {
        fn into_response(self) -> Response {
            tracing::warn!(
                code = %self.0.status_code(),
                "request failed: {}",
                self.0
            );
            let body = ErrorBody {
                detail: self.0.to_string(),
                code: Some(self.0.status_code()),
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }

    impl From<GroupingError> for ApiError {
        fn from(error: GroupingError) -> Self {
            Self(error)
        }
    }

    async fn process(
        State(grouper): State<Arc<Grouper>>,
        Json(request): Json<ProcessRequest>,
    ) -> Result<Json<ProcessResponse>, ApiError> {
        let event = request.into_event();
        let group_id = grouper.group_exception(&event).await?;
        Ok(Json(ProcessResponse { group_id }))
    }

    async fn top_exceptions(
        State(grouper): State<Arc<Grouper>>,
        Query(query): Query<TopExceptionsQuery>,
    ) -> Result<Json<Vec<TopException>>, ApiError> {
        let top = grouper.top_exceptions(query.limit, query.days).await?;
        Ok(Json(top))
    }

    async fn health() -> Json<serde_json::Value> {
        Json(serde_json::json!({ "status": "ok" }))
    }

    /// Routes of the grouping service, without a listener attached.
    pub fn router(grouper: Arc<Grouper>) -> Router {
        Router::new()
            .route("/process", post(process))
            .route("/top_exceptions", get(top_exceptions))
            .route("/health", get(health))
            .layer(TraceLayer::new_for_http())
            .with_state(grouper)
    }
}

#[cfg(feature = "http-server")]
pub use routes::router;

/// Runs the grouping service on `bind` until Ctrl+C.
#[cfg(feature = "http-server")]
pub async fn serve(settings: crate::Settings, bind: String) -> anyhow::Result<()> {
    use std::sync::Arc;

    use crate::grouper::Grouper;
    use crate::hook;

    let grouper = Arc::new(Grouper::from_settings(&settings).await?);

    if settings.server.capture_panics {
        let (sender, receiver) = hook::exception_channel();
        hook::install_panic_hook(sender);
        hook::spawn_reporter(Arc::clone(&grouper), receiver);
        tracing::info!("panics of the service will be grouped");
    }

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!("Grouping service listening on http://{bind}");
    eprintln!("Press Ctrl+C to stop the server");

    axum::serve(listener, router(grouper))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Grouping service shut down gracefully");
    Ok(())
}

#[cfg(feature = "http-server")]
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for ctrl+c: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received shutdown signal");
}

#[cfg(not(feature = "http-server"))]
pub async fn serve(_settings: crate::Settings, _bind: String) -> anyhow::Result<()> {
    eprintln!("HTTP server support is not compiled in.");
    eprintln!("Please rebuild with: cargo build --features http-server");
    std::process::exit(1);
}
