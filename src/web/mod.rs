//! # HTTP Surface
//!
//! The streaming interface (`GET /notifications/stream`), the audit history
//! query (`GET /audit/tasks/{task_id}`), and health endpoints. Identity comes
//! from the upstream auth layer via the `x-taskpulse-user` header.

pub mod errors;
pub mod handlers;
pub mod state;

pub use errors::{ApiError, ApiResult};
pub use state::{authenticated_user, AppState, USER_HEADER};

use axum::routing::get;
use axum::Router;

/// Build the router over shared application state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/notifications/stream", get(handlers::streams::notification_stream))
        .route("/audit/tasks/{task_id}", get(handlers::audit::task_history))
        .route("/health/live", get(handlers::health::liveness))
        .route("/health/ready", get(handlers::health::readiness))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditStore, InMemoryAuditStore};
    use crate::config::NotifyConfig;
    use crate::metrics::PipelineMetrics;
    use crate::notify::ConnectionRegistry;
    use std::sync::Arc;

    #[test]
    fn test_router_builds() {
        let metrics = PipelineMetrics::new();
        let state = AppState::new(
            Arc::new(ConnectionRegistry::new(
                NotifyConfig::default(),
                Arc::clone(&metrics),
            )),
            Arc::new(InMemoryAuditStore::new()) as Arc<dyn AuditStore>,
            metrics,
        );
        let _router = router(state);
    }
}
