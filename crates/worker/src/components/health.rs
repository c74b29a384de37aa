use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use taskq_core::models::{HealthStatus, InstanceState, WorkerStats};
use taskq_core::traits::QueueStore;
use tokio::sync::RwLock;

use super::monitor::QueueMonitor;

/// 健康检查端点的共享状态
#[derive(Clone)]
pub struct HealthState {
    pub instance_name: String,
    pub state: Arc<RwLock<InstanceState>>,
    pub monitor: Arc<QueueMonitor>,
    pub stats: Arc<RwLock<WorkerStats>>,
    pub store: Arc<dyn QueueStore>,
    pub prometheus: Option<PrometheusHandle>,
    pub error_rate_threshold: f64,
}

/// 创建实例的健康/指标路由
pub fn create_health_routes(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn live() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "alive" })))
}

async fn ready(State(state): State<HealthState>) -> impl IntoResponse {
    let current = *state.state.read().await;
    let code = if current.is_running() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(json!({
            "instance": state.instance_name,
            "state": current,
        })),
    )
}

async fn health(State(state): State<HealthState>) -> impl IntoResponse {
    let report = state.monitor.check_all().await;
    let stats = state.stats.read().await.clone();

    let mut status = report
        .status
        .worst(stats.health(state.error_rate_threshold));
    let store_error = state.store.ping().await.err().map(|e| e.to_string());
    if store_error.is_some() {
        status = HealthStatus::Unhealthy;
    }

    let code = if status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        code,
        Json(json!({
            "instance": state.instance_name,
            "status": status,
            "state": *state.state.read().await,
            "backend": state.store.backend_name(),
            "store_error": store_error,
            "queues": report.queues,
            "stats": {
                "processed": stats.processed,
                "succeeded": stats.succeeded,
                "failed": stats.failed,
                "busy_loops": stats.busy_loops,
                "concurrency": stats.concurrency,
                "avg_latency_ms": stats.avg_latency_ms(),
                "error_rate": stats.error_rate(),
            },
            "timestamp": report.checked_at.to_rfc3339(),
        })),
    )
}

async fn metrics(State(state): State<HealthState>) -> Response {
    match &state.prometheus {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics exporter not installed").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use taskq_core::config::MonitorConfig;
    use taskq_infrastructure::InMemoryTaskQueue;
    use tower::ServiceExt;

    fn state(instance_state: InstanceState) -> HealthState {
        let store: Arc<dyn QueueStore> = Arc::new(InMemoryTaskQueue::default());
        let stats = Arc::new(RwLock::new(WorkerStats::default()));
        HealthState {
            instance_name: "health-test".to_string(),
            state: Arc::new(RwLock::new(instance_state)),
            monitor: Arc::new(QueueMonitor::new(
                store.clone(),
                vec!["default".to_string()],
                MonitorConfig::default(),
                stats.clone(),
            )),
            stats,
            store,
            prometheus: None,
            error_rate_threshold: 0.2,
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_ready_reflects_instance_state() {
        let (status, _) = get_json(create_health_routes(state(InstanceState::Running)), "/health/ready").await;
        assert_eq!(status, StatusCode::OK);

        let (status, json) =
            get_json(create_health_routes(state(InstanceState::Stopped)), "/health/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["state"], "stopped");
    }

    #[tokio::test]
    async fn test_live_always_ok() {
        let (status, json) =
            get_json(create_health_routes(state(InstanceState::Stopped)), "/health/live").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "alive");
    }

    #[tokio::test]
    async fn test_aggregate_health_snapshot() {
        let (status, json) =
            get_json(create_health_routes(state(InstanceState::Running)), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["backend"], "memory");
        assert_eq!(json["queues"][0]["queue"], "default");
    }
}
