//! HTTP handlers for the guard (observability only).
//!
//! The guard does not receive instructions over HTTP; these endpoints are a
//! READ-ONLY projection of its state for operators and load balancers:
//!
//! - `GET /` and `GET /status` — the JSON status snapshot, always 200;
//! - `GET /health` — the same snapshot, 503 when `critical` is non-empty.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};

use crate::guard::Guard;
use crate::status::StatusSnapshot;

/// Shared application state for the router.
pub struct AppState {
    /// The guard whose state is projected.
    pub guard: Arc<Guard>,
}

/// GET / and GET /status
pub async fn status_handler(State(app): State<Arc<AppState>>) -> Json<StatusSnapshot> {
    Json(app.guard.snapshot())
}

/// GET /health
///
/// Health check for monitoring and load balancers.
pub async fn health_handler(
    State(app): State<Arc<AppState>>,
) -> (StatusCode, Json<StatusSnapshot>) {
    let snap = app.guard.snapshot();
    let status = if snap.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(snap))
}

/// Build the observability router.
pub fn build_router(app: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(status_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .with_state(app)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::states::WatcherState;
    use futures::FutureExt;
    use valguard_common::GuardConfig;

    fn test_guard() -> Arc<Guard> {
        let config = GuardConfig {
            nodes_endpoints: vec!["http://a".to_string()],
            validator_address: "AB".to_string(),
            ..GuardConfig::default()
        };
        Guard::new(config, Box::new(|| async {}.boxed()))
    }

    #[tokio::test]
    async fn test_health_unhealthy_without_watchers() {
        let app = Arc::new(AppState { guard: test_guard() });
        let (status, Json(snap)) = health_handler(State(app)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!snap.critical.is_empty());
    }

    #[tokio::test]
    async fn test_status_reflects_guard() {
        let guard = test_guard();
        {
            use crate::guard::Guarder;
            // not running: reports are dropped, snapshot stays at defaults
            guard.report_watcher("a", WatcherState::Watching);
        }
        let app = Arc::new(AppState { guard });
        let Json(snap) = status_handler(State(app)).await;
        assert_eq!(snap.guard_state, "starting");
        assert_eq!(snap.watchers_count, 0);
    }
}
