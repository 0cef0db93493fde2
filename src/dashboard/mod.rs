use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;

use crate::orchestrator::{MetricsReport, StatusReport};
use crate::store::Store;
use crate::tasks::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub status: watch::Receiver<StatusReport>,
    pub metrics: Arc<Metrics>,
    pub store: Store,
}

/// Build the Axum router for the status endpoints.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(status_handler))
        .route("/api/metrics", get(metrics_handler))
        .route("/api/stats", get(stats_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// GET /api/status
async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.status.borrow().clone())
}

/// GET /api/metrics
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(MetricsReport::collect(&state.metrics, &state.store))
}

/// GET /api/stats
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.stats())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Collection;
    use crate::tasks::inc;
    use chrono::Utc;
    use serde_json::{json, Value};

    async fn get_json(app: Router, path: &str) -> Value {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        reqwest::get(format!("http://{}{}", addr, path))
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    fn state(dir: &tempfile::TempDir) -> (AppState, watch::Sender<StatusReport>) {
        let (tx, rx) = watch::channel(StatusReport {
            started_at: Utc::now(),
            uptime_secs: 0,
            session_restarts: 0,
            timer_polls: 0,
            leagues: Vec::new(),
            timers: Vec::new(),
        });
        let state = AppState {
            status: rx,
            metrics: Arc::new(Metrics::default()),
            store: Store::open(dir.path()).unwrap(),
        };
        (state, tx)
    }

    #[tokio::test]
    async fn test_status_reflects_latest_report() {
        let dir = tempfile::tempdir().unwrap();
        let (state, tx) = state(&dir);
        tx.send_modify(|r| r.timer_polls = 42);

        let body = get_json(router(state), "/api/status").await;
        assert_eq!(body["timer_polls"], 42);
        assert_eq!(body["leagues"], json!([]));
    }

    #[tokio::test]
    async fn test_metrics_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _tx) = state(&dir);
        inc(&state.metrics.odds_written);
        state
            .store
            .upsert(Collection::Results, "english_0_0130", &json!({"home_score": 1}))
            .unwrap();

        let body = get_json(router(state.clone()), "/api/metrics").await;
        assert_eq!(body["counters"]["odds_written"], 1);
        assert_eq!(body["store"]["counts"]["results"], 1);

        let body = get_json(router(state), "/api/stats").await;
        assert_eq!(body["counts"]["results"], 1);
        assert_eq!(body["write_failures"], 0);
    }
}
