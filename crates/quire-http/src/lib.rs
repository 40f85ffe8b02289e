//! Quire HTTP Transport
//!
//! A thin axum layer over the version control protocol: route wiring,
//! request parsing, and the mapping from the core error taxonomy onto
//! status codes. An optional [`RequestGuard`] can veto any operation before
//! it commits.

pub mod guard;
pub mod router;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use quire_core::{Envelope, Error};
use quire_protocol::DocumentService;
use quire_store::RuntimeMode;
use serde_json::json;

pub use guard::{GuardAction, GuardContext, GuardedOp, RequestGuard};
pub use router::build_router;

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    service: Arc<DocumentService>,
    guard: Option<Arc<dyn RequestGuard>>,
    mode: RuntimeMode,
}

impl AppState {
    pub fn new(service: Arc<DocumentService>, mode: RuntimeMode) -> Self {
        Self {
            service,
            guard: None,
            mode,
        }
    }

    /// Install the decoration hook.
    pub fn with_guard(mut self, guard: Arc<dyn RequestGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn service(&self) -> &Arc<DocumentService> {
        &self.service
    }

    pub fn mode(&self) -> RuntimeMode {
        self.mode
    }

    pub(crate) fn check_guard(
        &self,
        op: GuardedOp,
        collection: &str,
        id: Option<&str>,
        envelopes: &[Envelope],
    ) -> Result<(), ApiError> {
        if let Some(guard) = &self.guard {
            let action = guard.inspect(&GuardContext {
                op,
                collection,
                id,
                envelopes,
            });
            if !action.is_allowed() {
                return Err(ApiError::Veto(action));
            }
        }
        Ok(())
    }
}

/// Status code for each kind in the error taxonomy. Every kind stays
/// distinguishable to the caller.
pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::VersionConflict { .. } => StatusCode::CONFLICT,
        Error::Validation(_) | Error::PatchApply(_) | Error::InvalidState(_) => {
            StatusCode::BAD_REQUEST
        }
        Error::NotPermitted(_) => StatusCode::FORBIDDEN,
        Error::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Transport-level failure: a core error or a guard veto.
pub enum ApiError {
    Core(Error),
    Veto(GuardAction),
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        ApiError::Core(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Core(error) => {
                let status = status_for(&error);
                (status, Json(json!({ "message": error.to_string() }))).into_response()
            }
            ApiError::Veto(action) => {
                let message = action.message.unwrap_or_default();
                (action.status, Json(json!({ "message": message }))).into_response()
            }
        }
    }
}
