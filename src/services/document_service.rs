use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::database::manager::{ConnectionRegistry, DatabaseError, TenantLease};
use crate::database::store::UpdateOutcome;
use crate::services::catalog::SchemaCatalog;
use crate::services::validation::{check_document, check_required, normalize_patch_timestamps, normalize_timestamps};
use crate::services::ServiceError;
use crate::types::{Document, DocumentId, StoredDocument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    #[serde(rename = "hasMore")]
    pub has_more: bool,
}

#[derive(Debug, Clone)]
pub struct QueryPage {
    pub documents: Vec<StoredDocument>,
    pub pagination: Pagination,
}

impl QueryPage {
    pub fn to_api_json(&self) -> Value {
        json!({
            "documents": self.documents.iter().map(StoredDocument::to_api_json).collect::<Vec<_>>(),
            "pagination": self.pagination,
        })
    }
}

#[derive(Debug, Clone)]
pub struct InsertResult {
    pub id: DocumentId,
    pub document: Document,
}

impl InsertResult {
    pub fn to_api_json(&self) -> Value {
        StoredDocument {
            id: self.id,
            document: self.document.clone(),
        }
        .to_api_json()
    }
}

/// Document operations inside a schema-governed collection
pub struct DocumentService {
    registry: Arc<ConnectionRegistry>,
    catalog: Arc<dyn SchemaCatalog>,
    default_limit: u64,
}

impl DocumentService {
    pub fn new(registry: Arc<ConnectionRegistry>, catalog: Arc<dyn SchemaCatalog>, default_limit: u64) -> Self {
        Self {
            registry,
            catalog,
            default_limit: default_limit.max(1),
        }
    }

    /// Validate against the recorded schema and insert
    pub async fn insert(&self, db: &str, collection: &str, body: Value) -> Result<InsertResult, ServiceError> {
        let store = self.registry.open(db).await?;
        let descriptor = self.catalog.lookup(db, collection).await?;

        let mut document = Document::from_json(body)?;
        normalize_timestamps(&mut document, Utc::now());
        check_required(&descriptor, &document)?;

        let probes = check_document(&descriptor, &document)?;
        Self::probe_unique(&store, collection, &document, &probes, None).await?;

        let id = store
            .insert_one(collection, &document)
            .await
            .map_err(|e| Self::conflict(e, &document))?;

        info!("Inserted document {} into {}/{}", id, db, collection);
        Ok(InsertResult { id, document })
    }

    /// One page of documents in insertion order. Non-positive or absent
    /// `page`/`limit` fall back to the defaults.
    pub async fn query(
        &self,
        db: &str,
        collection: &str,
        page: Option<i64>,
        limit: Option<i64>,
    ) -> Result<QueryPage, ServiceError> {
        let store = self.registry.open(db).await?;
        Self::require_collection(&store, collection).await?;

        let page = page.filter(|p| *p > 0).map(|p| p as u64).unwrap_or(1);
        let limit = limit
            .filter(|l| *l > 0)
            .map(|l| l as u64)
            .unwrap_or(self.default_limit);
        let skip = (page - 1).saturating_mul(limit);

        let (total, documents) = futures::try_join!(
            store.count(collection),
            store.find_page(collection, skip, limit),
        )?;

        debug!("Query {}/{} page {} returned {} of {}", db, collection, page, documents.len(), total);
        Ok(QueryPage {
            documents,
            pagination: Pagination {
                page,
                limit,
                total,
                has_more: page.saturating_mul(limit) < total,
            },
        })
    }

    /// Partial update; unspecified fields keep their stored values
    pub async fn update(&self, db: &str, collection: &str, id: &str, body: Value) -> Result<UpdateOutcome, ServiceError> {
        let store = self.registry.open(db).await?;
        Self::require_collection(&store, collection).await?;
        let descriptor = self.catalog.lookup(db, collection).await?;
        let id = DocumentId::parse(id)?;

        let mut patch = Document::from_json(body)?;
        normalize_patch_timestamps(&mut patch, Utc::now());

        let probes = check_document(&descriptor, &patch)?;
        Self::probe_unique(&store, collection, &patch, &probes, Some(id)).await?;

        let outcome = store
            .update_one(collection, id, &patch)
            .await
            .map_err(|e| Self::conflict(e, &patch))?;

        if outcome.matched == 0 {
            return Err(ServiceError::DocumentNotFound(id.to_string()));
        }

        info!("Updated document {} in {}/{}", id, db, collection);
        Ok(outcome)
    }

    pub async fn delete(&self, db: &str, collection: &str, id: &str) -> Result<u64, ServiceError> {
        let store = self.registry.open(db).await?;
        Self::require_collection(&store, collection).await?;
        let id = DocumentId::parse(id)?;

        let deleted = store.delete_one(collection, id).await?;
        if deleted == 0 {
            return Err(ServiceError::DocumentNotFound(id.to_string()));
        }

        info!("Deleted document {} from {}/{}", id, db, collection);
        Ok(deleted)
    }

    async fn require_collection(store: &TenantLease, collection: &str) -> Result<(), ServiceError> {
        if store.collection_exists(collection).await? {
            Ok(())
        } else {
            Err(ServiceError::CollectionNotFound(collection.to_string()))
        }
    }

    /// Reject values already held by another document, naming the field
    async fn probe_unique(
        store: &TenantLease,
        collection: &str,
        document: &Document,
        probes: &[String],
        exclude: Option<DocumentId>,
    ) -> Result<(), ServiceError> {
        for field in probes {
            let Some(value) = document.get(field) else { continue };
            if store.find_by_field(collection, field, value, exclude).await?.is_some() {
                return Err(ServiceError::DuplicateValue {
                    field: field.clone(),
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }

    /// A constraint hit at write time reports the same conflict the probe would
    fn conflict(err: DatabaseError, document: &Document) -> ServiceError {
        match err {
            DatabaseError::DuplicateKey { field: Some(field), .. } => match document.get(&field) {
                Some(value) => ServiceError::DuplicateValue {
                    value: value.to_string(),
                    field,
                },
                None => ServiceError::DuplicateKey,
            },
            other => other.into(),
        }
    }
}
