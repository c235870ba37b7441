use crate::config::{Config, ServiceSpec};
use crate::metrics::Metrics;
use crate::monitor::StatusMonitor;
use crate::store::StatusRead;
use crate::weather::WeatherClient;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct HttpAppState {
    pub cfg: Arc<Config>,
    pub metrics: Arc<Metrics>,
    pub monitor: Arc<StatusMonitor>,
    pub weather: WeatherClient,
}

#[derive(Debug, Serialize)]
pub struct ServiceCategory<'a> {
    pub name: &'a str,
    pub services: Vec<&'a ServiceSpec>,
}

#[derive(Debug, Serialize)]
pub struct Layout<'a> {
    pub site_title: &'a str,
    pub services: &'a [ServiceSpec],
    pub categories: Vec<ServiceCategory<'a>>,
}

/// Groups services by category in first-seen order; blank categories fall
/// into "Misc".
pub fn group_by_category(services: &[ServiceSpec]) -> Vec<ServiceCategory<'_>> {
    let mut categories: Vec<ServiceCategory<'_>> = Vec::new();
    for svc in services {
        let name = svc
            .category
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or("Misc");
        match categories.iter_mut().find(|c| c.name == name) {
            Some(category) => category.services.push(svc),
            None => categories.push(ServiceCategory {
                name,
                services: vec![svc],
            }),
        }
    }
    categories
}

pub fn build_router(state: HttpAppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/status", get(status_handler))
        .route("/api/check", post(check_handler))
        .route("/api/services", get(services_handler))
        .route("/api/weather", get(weather_handler))
        .with_state(state)
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
            format!("ошибка кодирования метрик: {err}"),
        )
            .into_response(),
    }
}

async fn status_handler(State(state): State<HttpAppState>) -> Json<StatusRead> {
    Json(state.monitor.read_status().await)
}

async fn check_handler(State(state): State<HttpAppState>) -> Json<StatusRead> {
    if let Err(err) = state.monitor.force_check().await {
        warn!(error = %err, "ручная проверка не сохранена");
    }
    Json(state.monitor.store().load().await)
}

async fn services_handler(State(state): State<HttpAppState>) -> Response {
    let layout = Layout {
        site_title: &state.cfg.site_title,
        services: &state.cfg.services,
        categories: group_by_category(&state.cfg.services),
    };
    Json(layout).into_response()
}

async fn weather_handler(State(state): State<HttpAppState>) -> Response {
    Json(state.weather.report(&state.cfg.weather).await).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::tests::{test_config, FakeProber};
    use axum::body::to_bytes;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn app(dir: &std::path::Path) -> Router {
        let mut cfg = test_config();
        cfg.status_file = dir.join("status.json");
        let cfg = Arc::new(cfg);
        let metrics = Metrics::new().expect("инициализация метрик");
        let prober = Arc::new(FakeProber::with_up(&[("http://router.lan", 3.0)]));
        let monitor = Arc::new(StatusMonitor::new(cfg.clone(), prober, metrics.clone()));
        build_router(HttpAppState {
            cfg,
            metrics,
            monitor,
            weather: WeatherClient::new(),
        })
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path())
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.as_ref(), b"ok");
    }

    #[tokio::test]
    async fn status_runs_a_cycle_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path())
            .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["services"][0]["name"], "Router");
        assert_eq!(body["services"][0]["status"], "up");
        assert_eq!(body["services"][3]["status"], "unknown");
        assert_eq!(body["internet"]["total_targets"], 3);
        assert!(dir.path().join("status.json").exists());
    }

    #[tokio::test]
    async fn status_reports_malformed_file_when_refresh_cannot_write() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let response = app(&blocker)
            .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["available"], false);
    }

    #[tokio::test]
    async fn manual_check_returns_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/check")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body["checked_at"].is_string());
        assert_eq!(body["internet_services"][0]["type"], "http");
    }

    #[tokio::test]
    async fn services_are_grouped_by_category() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path())
            .oneshot(Request::builder().uri("/api/services").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let body = json_body(response).await;
        assert_eq!(body["site_title"], "Home Portal");
        assert_eq!(body["categories"][0]["name"], "Network");
        assert_eq!(body["categories"][1]["name"], "Misc");
        assert_eq!(body["categories"][1]["services"].as_array().unwrap().len(), 3);
        assert_eq!(body["services"][1]["type"], "tcp");
        assert_eq!(body["services"][1]["port"], 22);
    }

    #[tokio::test]
    async fn metrics_are_exported_after_a_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let _ = app
            .clone()
            .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("portal_cycles_total 1"));
    }
}
