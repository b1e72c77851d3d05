//! Record endpoint routes.

use axum::{
    extract::{Path, Query, State},
    http::{
        header::{ETAG, IF_MATCH},
        HeaderMap, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use liveset_engine::{parse_if_match, Record};
use serde_json::Value;

use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::handlers::{
    create_record, delete_record, get_record, list_records, replace_record, update_record,
};
use crate::stream::{open_list, open_record, wants_stream};
use crate::AppState;

/// Create record routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/{collection}", get(list_handler).post(create_handler))
        .route(
            "/{collection}/{id}",
            get(get_handler)
                .patch(update_handler)
                .put(replace_handler)
                .delete(delete_handler),
        )
}

/// Respond with a record and its `ETag` header.
fn with_etag(status: StatusCode, record: Record) -> Response {
    let etag = format!("\"{}\"", record.etag);
    (status, [(ETAG, etag)], Json(record)).into_response()
}

/// Read the optional `If-Match` precondition.
fn if_match(headers: &HeaderMap) -> Result<Option<String>> {
    match headers.get(IF_MATCH) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(parse_if_match)
            .map_err(|_| AppError::BadRequest("If-Match must be ASCII".to_string())),
    }
}

/// POST /{collection} - Create a record.
async fn create_handler(
    State(state): State<AppState>,
    user: AuthUser,
    Path(collection): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response> {
    tracing::debug!(user = %user.name(), collection = %collection, "Create");
    let record = create_record(&state, &collection, body)?;
    Ok(with_etag(StatusCode::CREATED, record))
}

/// GET /{collection} - List records, or stream them.
async fn list_handler(
    State(state): State<AppState>,
    user: AuthUser,
    Path(collection): Path<String>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response> {
    if wants_stream(&headers) {
        tracing::debug!(user = %user.name(), collection = %collection, "List stream");
        return open_list(&state, collection, &params);
    }

    let records = list_records(&state, &collection, &params)?;
    Ok(Json(records).into_response())
}

/// GET /{collection}/{id} - Fetch a record, or stream it.
async fn get_handler(
    State(state): State<AppState>,
    user: AuthUser,
    Path((collection, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response> {
    if wants_stream(&headers) {
        tracing::debug!(user = %user.name(), collection = %collection, id = %id, "Record stream");
        return open_record(&state, collection, id);
    }

    let record = get_record(&state, &collection, &id)?;
    Ok(with_etag(StatusCode::OK, record))
}

/// PATCH /{collection}/{id} - Merge-patch a record.
async fn update_handler(
    State(state): State<AppState>,
    _user: AuthUser,
    Path((collection, id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response> {
    let expected = if_match(&headers)?;
    let record = update_record(&state, &collection, &id, body, expected.as_deref())?;
    Ok(with_etag(StatusCode::OK, record))
}

/// PUT /{collection}/{id} - Replace a record.
async fn replace_handler(
    State(state): State<AppState>,
    _user: AuthUser,
    Path((collection, id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response> {
    let expected = if_match(&headers)?;
    let record = replace_record(&state, &collection, &id, body, expected.as_deref())?;
    Ok(with_etag(StatusCode::OK, record))
}

/// DELETE /{collection}/{id} - Delete a record.
async fn delete_handler(
    State(state): State<AppState>,
    _user: AuthUser,
    Path((collection, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode> {
    let expected = if_match(&headers)?;
    delete_record(&state, &collection, &id, expected.as_deref())?;
    Ok(StatusCode::NO_CONTENT)
}
