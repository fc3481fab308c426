use axum::Router;
use tower_http::trace::TraceLayer;

use crate::api::api_routes;
use crate::postgres::PoolProvider;

use super::AppState;

pub fn create_app<P: PoolProvider>(state: AppState<P>) -> Router {
    Router::new()
        .merge(api_routes::<P>())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::config::{DatabaseConfig, Settings};
    use crate::connection::Manager;
    use crate::context::Context;
    use crate::observer::MemoryObserver;
    use crate::postgres::{MemoryProvider, PoolStat};

    fn state(provider: &MemoryProvider) -> AppState<MemoryProvider> {
        let manager = Manager::with_provider(provider.clone())
            .config(DatabaseConfig::default())
            .observer(Arc::new(MemoryObserver::new()))
            .build()
            .unwrap();
        AppState::new(Settings::default(), Arc::new(manager))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn busy_pool() -> PoolStat {
        PoolStat {
            total_conns: 4,
            acquired_conns: 2,
            idle_conns: 2,
            max_conns: 10,
            ..PoolStat::default()
        }
    }

    #[tokio::test]
    async fn test_health_unconnected_is_503() {
        let provider = MemoryProvider::new();
        let app = create_app(state(&provider));

        let (status, body) = get(app, "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["database"]["healthy"], false);
        assert_eq!(body["database"]["message"], "database pool not initialized");
        assert_eq!(provider.probes(), 0);
    }

    #[tokio::test]
    async fn test_health_connected_is_200() {
        let provider = MemoryProvider::new();
        provider.set_stat(busy_pool());
        let state = state(&provider);
        state.manager.connect(&Context::background()).await.unwrap();

        let (status, body) = get(create_app(state), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["database"]["message"], "database is healthy");
        assert_eq!(body["database"]["connections"], 2);
        assert_eq!(body["database"]["max_connections"], 10);
    }

    #[tokio::test]
    async fn test_ready_reports_error_kind() {
        let provider = MemoryProvider::new();
        let app = create_app(state(&provider));

        let (status, body) = get(app, "/health/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["ready"], false);
        assert_eq!(body["error"]["kind"], "not_connected");
    }

    #[tokio::test]
    async fn test_ready_exhausted_pool_skips_probe() {
        let provider = MemoryProvider::new();
        provider.set_stat(PoolStat {
            acquired_conns: 10,
            max_conns: 10,
            ..PoolStat::default()
        });
        let state = state(&provider);
        state.manager.connect(&Context::background()).await.unwrap();

        let (status, body) = get(create_app(state), "/health/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["kind"], "resource_exhausted");
        assert_eq!(provider.probes(), 0);
    }

    #[tokio::test]
    async fn test_ready_ok() {
        let provider = MemoryProvider::new();
        provider.set_stat(busy_pool());
        let state = state(&provider);
        state.manager.connect(&Context::background()).await.unwrap();

        let (status, body) = get(create_app(state), "/health/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ready"], true);
        assert!(body.get("error").is_none());
    }

    #[tokio::test]
    async fn test_stats_serializes_pool_counters() {
        let provider = MemoryProvider::new();
        provider.set_stat(PoolStat {
            acquire_count: 4,
            acquire_duration: std::time::Duration::from_millis(10),
            ..busy_pool()
        });
        let state = state(&provider);
        state.manager.connect(&Context::background()).await.unwrap();

        let (status, body) = get(create_app(state), "/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connected"], true);
        assert_eq!(body["pool"]["total_acquire_count"], 4);
        assert_eq!(body["pool"]["total_acquire_time_ms"], 10);
        assert_eq!(body["average_acquire_time_ms"], 2.5);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_renders_text() {
        let provider = MemoryProvider::new();
        let app = create_app(state(&provider));

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("pgres_pool_max_connections"));
    }
}
