use crate::chart::ChartSpec;
use crate::classify::{Alert, Severity};
use crate::metrics::Metrics;
use crate::state::{DashboardState, DashboardStatus};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub state: Arc<RwLock<DashboardState>>,
}

#[derive(Debug, Serialize)]
struct AlertsResponse {
    status: DashboardStatus,
    severity: Severity,
    error: Option<String>,
    alerts: Vec<Alert>,
}

pub fn build_router(metrics: Arc<Metrics>, state: Arc<RwLock<DashboardState>>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/dashboard", get(dashboard_handler))
        .route("/api/charts", get(charts_handler))
        .route("/api/alerts", get(alerts_handler))
        .with_state(HttpAppState { metrics, state })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

async fn dashboard_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    let guard = state.state.read().await;
    Json(guard.view())
}

async fn charts_handler(State(state): State<HttpAppState>) -> Json<Vec<ChartSpec>> {
    let guard = state.state.read().await;
    Json(guard.view().charts)
}

async fn alerts_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    let guard = state.state.read().await;
    Json(AlertsResponse {
        status: guard.status(),
        severity: Severity::overall(guard.alerts()),
        error: guard.error().map(str::to_string),
        alerts: guard.alerts().to_vec(),
    })
}
