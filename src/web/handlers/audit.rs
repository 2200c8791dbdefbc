//! # Audit Query Handler
//!
//! `GET /audit/tasks/{task_id}`: the full chronological event history for one
//! task, ascending by timestamp. Read-only; the log exposes no mutation
//! surface.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use uuid::Uuid;

use crate::audit::AuditEntry;
use crate::web::errors::{ApiError, ApiResult};
use crate::web::state::{authenticated_user, AppState};

/// Return the ordered event history for a task.
pub async fn task_history(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    authenticated_user(&headers)?;
    let history = state
        .audit
        .history_for_task(task_id)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(Json(history))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditStore, InMemoryAuditStore};
    use crate::config::NotifyConfig;
    use crate::events::{TaskEvent, TaskEventPayload};
    use crate::metrics::PipelineMetrics;
    use crate::notify::ConnectionRegistry;
    use axum::http::HeaderValue;
    use std::sync::Arc;

    fn state_with_store(store: Arc<InMemoryAuditStore>) -> AppState {
        let metrics = PipelineMetrics::new();
        AppState::new(
            Arc::new(ConnectionRegistry::new(
                NotifyConfig::default(),
                Arc::clone(&metrics),
            )),
            store as Arc<dyn AuditStore>,
            metrics,
        )
    }

    fn auth_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            crate::web::state::USER_HEADER,
            HeaderValue::from_str(&Uuid::new_v4().to_string()).unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn test_history_returns_events_in_order() {
        let store = Arc::new(InMemoryAuditStore::new());
        let task_id = Uuid::new_v4();

        let mut entries = Vec::new();
        for minutes in [0i64, 5, 10] {
            let mut event = TaskEvent::new(TaskEventPayload::Deleted {
                actor_id: Uuid::new_v4(),
                task_id,
            });
            event.timestamp = chrono::Utc::now() + chrono::Duration::minutes(minutes);
            entries.push(AuditEntry::from_event(&event).unwrap());
        }
        // Insert out of order.
        store
            .append(&[entries[2].clone(), entries[0].clone(), entries[1].clone()])
            .await
            .unwrap();

        let state = state_with_store(store);
        let Json(history) = task_history(State(state), Path(task_id), auth_headers())
            .await
            .unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn test_unknown_task_returns_empty_history() {
        let state = state_with_store(Arc::new(InMemoryAuditStore::new()));
        let Json(history) = task_history(State(state), Path(Uuid::new_v4()), auth_headers())
            .await
            .unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_history_requires_identity() {
        let state = state_with_store(Arc::new(InMemoryAuditStore::new()));
        let result = task_history(State(state), Path(Uuid::new_v4()), HeaderMap::new()).await;
        assert!(matches!(result, Err(ApiError::Unauthorized(_))));
    }
}
