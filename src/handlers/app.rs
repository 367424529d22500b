use axum::{
    body::Bytes,
    extract::{Extension, Path, Query, State},
    http::Method,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::auth::Identity;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, RouteContext};
use crate::services::collection_service::LIST_COLLECTIONS;
use crate::types::FieldMap;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct AppQuery {
    pub db: Option<String>,
    pub id: Option<String>,
    /// Lenient: anything unparseable falls back to the default
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl AppQuery {
    fn database(&self) -> Result<String, ApiError> {
        self.db
            .as_deref()
            .map(str::trim)
            .filter(|db| !db.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request("Query parameter 'db' is required"))
    }

    fn document_id(&self) -> Option<&str> {
        self.id.as_deref().map(str::trim).filter(|id| !id.is_empty())
    }

    fn page(&self) -> Option<i64> {
        self.page.as_deref().and_then(|p| p.trim().parse().ok())
    }

    fn limit(&self) -> Option<i64> {
        self.limit.as_deref().and_then(|l| l.trim().parse().ok())
    }
}

fn parse_body(body: &Bytes) -> Result<Value, ApiError> {
    if body.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| ApiError::invalid_json(format!("Invalid JSON body: {}", e)))
}

/// `null` and absent are the same thing to the router
fn body_field(body: &Value, name: &str) -> Option<Value> {
    body.get(name).filter(|v| !v.is_null()).cloned()
}

/// GET /api/app/:collection - list collections, or query one
pub async fn get(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(query): Query<AppQuery>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Value> {
    let db = query.database()?;
    let context = RouteContext::new(&db, &collection, Method::GET);
    debug!("{} reading {}/{}", identity.subject_id, db, collection);

    if collection == LIST_COLLECTIONS {
        let collections = state.collections.list(&db).await?;
        return Ok(ApiResponse::success(
            context,
            "Collection names and schemas fetched successfully",
            json!(collections),
        ));
    }

    let page = state
        .documents
        .query(&db, &collection, query.page(), query.limit())
        .await?;
    Ok(ApiResponse::success(context, "Data fetched successfully", page.to_api_json()))
}

/// POST /api/app/:collection - create the collection from `collectionSchema`,
/// or insert `data` into it
pub async fn post(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(query): Query<AppQuery>,
    Extension(identity): Extension<Identity>,
    body: Bytes,
) -> ApiResult<Value> {
    let db = query.database()?;
    let context = RouteContext::new(&db, &collection, Method::POST);
    let body = parse_body(&body)?;

    if let Some(schema) = body_field(&body, "collectionSchema") {
        let fields: FieldMap = serde_json::from_value(schema)
            .map_err(|e| ApiError::bad_request(format!("Invalid collection schema: {}", e)))?;
        let descriptor = state.collections.create(&db, &collection, fields).await?;
        debug!("{} created {}/{}", identity.subject_id, db, collection);
        return Ok(ApiResponse::created(
            context,
            format!(
                "Collection '{}' created successfully in database '{}' with the defined schema",
                collection, db
            ),
            json!(descriptor),
        ));
    }

    if let Some(data) = body_field(&body, "data") {
        let inserted = state.documents.insert(&db, &collection, data).await?;
        return Ok(ApiResponse::created(
            context,
            format!("Data inserted successfully into collection '{}'", collection),
            inserted.to_api_json(),
        ));
    }

    Err(ApiError::bad_request(
        "Request must contain either 'collectionSchema' for creating a collection or 'data' for inserting data",
    ))
}

/// PUT /api/app/:collection?id= - partial update of one document
pub async fn put(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(query): Query<AppQuery>,
    body: Bytes,
) -> ApiResult<Value> {
    let db = query.database()?;
    let context = RouteContext::new(&db, &collection, Method::PUT);
    let id = query
        .document_id()
        .ok_or_else(|| ApiError::bad_request("Query parameter 'id' is required"))?;

    let body = parse_body(&body)?;
    let data = body_field(&body, "data").ok_or_else(|| ApiError::bad_request("Request must contain 'data'"))?;

    let outcome = state.documents.update(&db, &collection, id, data).await?;
    Ok(ApiResponse::success(
        context,
        format!("{} document(s) updated in collection '{}'", outcome.modified, collection),
        json!({
            "matchedCount": outcome.matched,
            "modifiedCount": outcome.modified,
        }),
    ))
}

/// DELETE /api/app/:collection[?id=] - delete one document, or drop the
/// whole collection when no id is given
pub async fn delete(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(query): Query<AppQuery>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Value> {
    let db = query.database()?;
    let context = RouteContext::new(&db, &collection, Method::DELETE);

    match query.document_id() {
        Some(id) => {
            let deleted = state.documents.delete(&db, &collection, id).await?;
            Ok(ApiResponse::success(
                context,
                format!("{} document deleted from collection '{}'", deleted, collection),
                json!({ "deletedCount": deleted }),
            ))
        }
        None => {
            state.collections.drop_collection(&db, &collection).await?;
            debug!("{} dropped {}/{}", identity.subject_id, db, collection);
            Ok(ApiResponse::success(
                context,
                format!(
                    "Collection '{}' and its schema configuration deleted successfully from database '{}'",
                    collection, db
                ),
                json!({ "dropped": collection }),
            ))
        }
    }
}
