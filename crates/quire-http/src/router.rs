//! Route wiring for the document API
//!
//! The surface mirrors the protocol one-to-one:
//!
//! ```text
//! GET    /kick                              liveness greeting
//! GET    /{collection}/document             read many (patches/extra stripped)
//! POST   /{collection}/document             create            -> {id, version}
//! GET    /{collection}/{id}/document        read one (stripped)
//! POST   /{collection}/{id}/document        whole-document update
//! DELETE /{collection}/{id}/document        delete            -> {id}
//! GET    /{collection}/{id}/patch/{version} history since version
//! PATCH  /{collection}/{id}/patch/{version} apply operations  -> {version}
//! GET    /reset                             clear store (test/development only)
//! ```

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use quire_core::{Document, Envelope, Error, Patch};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::guard::GuardedOp;
use crate::{ApiError, AppState};

/// Build the router. The reset route is only mounted in test/development
/// mode; the store enforces the same gate underneath.
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/kick", get(kick))
        .route("/{collection}/document", get(read_many).post(create))
        .route(
            "/{collection}/{id}/document",
            get(read_one).post(replace).delete(delete_one),
        )
        .route(
            "/{collection}/{id}/patch/{version}",
            get(history).patch(apply_patch),
        );

    if state.mode().allows_reset() {
        router = router.route("/reset", get(reset));
    }

    router.with_state(state)
}

#[derive(Deserialize)]
struct CreateBody {
    document: Document,
}

#[derive(Deserialize)]
struct ReplaceBody {
    document: Document,
    version: u64,
}

#[derive(Serialize)]
struct WriteReply {
    id: String,
    version: u64,
}

#[derive(Serialize)]
struct VersionReply {
    version: u64,
}

#[derive(Serialize)]
struct IdReply {
    id: String,
}

async fn kick() -> Json<Value> {
    debug!("GET /kick");
    Json(json!({ "message": "Hello cruel World!" }))
}

async fn read_one(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Json<Envelope>, ApiError> {
    debug!(%collection, %id, "GET document");

    let envelope = state
        .service()
        .get(&collection, &id)
        .await?
        .ok_or_else(|| not_visible(&collection, &id))?;

    state.check_guard(
        GuardedOp::Read,
        &collection,
        Some(&id),
        std::slice::from_ref(&envelope),
    )?;
    Ok(Json(envelope.detached()))
}

async fn read_many(
    State(state): State<AppState>,
    Path(collection): Path<String>,
) -> Result<Json<Vec<Envelope>>, ApiError> {
    debug!(%collection, "GET documents");

    let envelopes = state.service().list(&collection).await?;
    state.check_guard(GuardedOp::ReadMany, &collection, None, &envelopes)?;
    Ok(Json(envelopes.iter().map(Envelope::detached).collect()))
}

async fn create(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(body): Json<CreateBody>,
) -> Result<Json<WriteReply>, ApiError> {
    debug!(%collection, "POST create document");

    let candidate = Envelope::new(body.document.clone());
    state.check_guard(
        GuardedOp::Create,
        &collection,
        None,
        std::slice::from_ref(&candidate),
    )?;

    let envelope = state.service().create(&collection, body.document).await?;
    Ok(Json(WriteReply {
        id: envelope.id.unwrap_or_default(),
        version: envelope.version,
    }))
}

async fn replace(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Json(body): Json<ReplaceBody>,
) -> Result<Json<WriteReply>, ApiError> {
    debug!(%collection, %id, version = body.version, "POST update document");

    let mut candidate = Envelope::new(body.document.clone());
    candidate.id = Some(id.clone());
    candidate.version = body.version;
    state.check_guard(
        GuardedOp::Replace,
        &collection,
        Some(&id),
        std::slice::from_ref(&candidate),
    )?;

    let envelope = state
        .service()
        .replace(&collection, &id, body.document, body.version)
        .await?;
    Ok(Json(WriteReply {
        id,
        version: envelope.version,
    }))
}

async fn apply_patch(
    State(state): State<AppState>,
    Path((collection, id, version)): Path<(String, String, u64)>,
    Json(operations): Json<Vec<Value>>,
) -> Result<Json<VersionReply>, ApiError> {
    debug!(%collection, %id, version, "PATCH document");

    state.check_guard(GuardedOp::Patch, &collection, Some(&id), &[])?;

    let envelope = state
        .service()
        .apply_patch(&collection, &id, &operations, version)
        .await?;
    Ok(Json(VersionReply {
        version: envelope.version,
    }))
}

async fn history(
    State(state): State<AppState>,
    Path((collection, id, version)): Path<(String, String, u64)>,
) -> Result<Json<Vec<Patch>>, ApiError> {
    debug!(%collection, %id, version, "GET patches");

    state.check_guard(GuardedOp::History, &collection, Some(&id), &[])?;

    let patches = state
        .service()
        .history_since(&collection, &id, version)
        .await?;
    Ok(Json(patches))
}

async fn delete_one(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Json<IdReply>, ApiError> {
    debug!(%collection, %id, "DELETE document");

    state.check_guard(GuardedOp::Delete, &collection, Some(&id), &[])?;

    state.service().delete(&collection, &id).await?;
    Ok(Json(IdReply { id }))
}

async fn reset(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    debug!("GET /reset");
    state.service().reset().await?;
    Ok(StatusCode::OK)
}

fn not_visible(collection: &str, id: &str) -> ApiError {
    ApiError::Core(Error::NotFound(format!(
        "document {} id: {} not found",
        collection, id
    )))
}
