//! # Health Handlers
//!
//! Liveness is unconditional while the process runs. Readiness degrades when
//! the broker has been flagged unavailable; the body carries the current
//! metrics snapshot either way.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::metrics::MetricsSnapshot;
use crate::web::state::AppState;

/// `GET /health/live`
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// `GET /health/ready`
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<MetricsSnapshot>) {
    let snapshot = state.metrics.snapshot();
    let status = if snapshot.broker_available {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditStore, InMemoryAuditStore};
    use crate::config::NotifyConfig;
    use crate::metrics::PipelineMetrics;
    use crate::notify::ConnectionRegistry;
    use std::sync::Arc;

    fn test_state() -> AppState {
        let metrics = PipelineMetrics::new();
        AppState::new(
            Arc::new(ConnectionRegistry::new(
                NotifyConfig::default(),
                Arc::clone(&metrics),
            )),
            Arc::new(InMemoryAuditStore::new()) as Arc<dyn AuditStore>,
            metrics,
        )
    }

    #[tokio::test]
    async fn test_liveness_is_always_ok() {
        assert_eq!(liveness().await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readiness_follows_broker_flag() {
        let state = test_state();
        let (status, _) = readiness(State(state.clone())).await;
        assert_eq!(status, StatusCode::OK);

        state.metrics.set_broker_available(false);
        let (status, Json(snapshot)) = readiness(State(state.clone())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!snapshot.broker_available);

        state.metrics.set_broker_available(true);
        let (status, _) = readiness(State(state)).await;
        assert_eq!(status, StatusCode::OK);
    }
}
