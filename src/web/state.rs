//! # Web Application State
//!
//! Shared state for the HTTP surface, plus the identity helper. The upstream
//! auth layer authenticates every request and forwards the owner id in the
//! `x-taskpulse-user` header; this subsystem trusts that id without
//! re-validating credentials.

use axum::http::HeaderMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::AuditStore;
use crate::metrics::PipelineMetrics;
use crate::notify::ConnectionRegistry;
use crate::web::errors::{ApiError, ApiResult};

/// Header carrying the authenticated owner id, set by the identity layer
pub const USER_HEADER: &str = "x-taskpulse-user";

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub audit: Arc<dyn AuditStore>,
    pub metrics: Arc<PipelineMetrics>,
}

impl AppState {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        audit: Arc<dyn AuditStore>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            registry,
            audit,
            metrics,
        }
    }
}

/// Extract the authenticated owner id forwarded by the identity layer.
pub fn authenticated_user(headers: &HeaderMap) -> ApiResult<Uuid> {
    let raw = headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing authenticated user header".to_string()))?;
    Uuid::parse_str(raw)
        .map_err(|_| ApiError::Unauthorized("malformed authenticated user header".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_missing_header_is_unauthorized() {
        let headers = HeaderMap::new();
        assert!(matches!(
            authenticated_user(&headers),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_valid_header_yields_owner_id() {
        let owner = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, HeaderValue::from_str(&owner.to_string()).unwrap());
        assert_eq!(authenticated_user(&headers).unwrap(), owner);
    }

    #[test]
    fn test_malformed_header_is_unauthorized() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, HeaderValue::from_static("not-a-uuid"));
        assert!(matches!(
            authenticated_user(&headers),
            Err(ApiError::Unauthorized(_))
        ));
    }
}
