pub mod catalog;
pub mod collection_service;
pub mod document_service;
pub mod validation;

use thiserror::Error;

use crate::database::manager::DatabaseError;
use crate::types::{DocumentError, InvalidId};

pub use catalog::{CatalogError, MemorySchemaCatalog, PgSchemaCatalog, SchemaCatalog};
pub use collection_service::{CollectionInfo, CollectionService};
pub use document_service::{DocumentService, InsertResult, Pagination, QueryPage};
pub use validation::ValidationError;

/// Failures surfaced by the collection and document services
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Collection '{0}' does not exist")]
    CollectionNotFound(String),

    #[error("Collection '{collection}' has no schema in database '{db}'")]
    SchemaMissing { db: String, collection: String },

    #[error("Collection '{collection}' already exists in database '{db}'")]
    CollectionExists { db: String, collection: String },

    #[error("Field '{field}' with value '{value}' must be unique")]
    DuplicateValue { field: String, value: String },

    #[error("Duplicate key error: unique field constraint violated")]
    DuplicateKey,

    #[error("No document found with the specified _id: '{0}'")]
    DocumentNotFound(String),

    #[error("Invalid collection name: {0}")]
    InvalidName(String),

    #[error(transparent)]
    InvalidDocument(#[from] DocumentError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    InvalidId(#[from] InvalidId),

    #[error(transparent)]
    Database(DatabaseError),
}

impl From<DatabaseError> for ServiceError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::CollectionNotFound(name) => ServiceError::CollectionNotFound(name),
            DatabaseError::InvalidCollectionName(name) => ServiceError::InvalidName(name),
            DatabaseError::DuplicateKey { .. } => ServiceError::DuplicateKey,
            other => ServiceError::Database(other),
        }
    }
}

impl From<CatalogError> for ServiceError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Conflict { db, collection } => ServiceError::CollectionExists { db, collection },
            CatalogError::NotFound { db, collection } => ServiceError::SchemaMissing { db, collection },
            CatalogError::Database(e) => e.into(),
        }
    }
}
