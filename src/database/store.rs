use async_trait::async_trait;

use crate::database::manager::DatabaseError;
use crate::types::{DocValue, Document, DocumentId, StoredDocument};

/// Result of a partial update against a single document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
}

/// Physical operations against one tenant's document database
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Names of the physical collections, sorted
    async fn list_collections(&self) -> Result<Vec<String>, DatabaseError>;

    async fn collection_exists(&self, collection: &str) -> Result<bool, DatabaseError> {
        Ok(self.list_collections().await?.iter().any(|name| name == collection))
    }

    /// Ensure the collection exists, declaring a native uniqueness constraint
    /// for each of `unique_fields`
    async fn create_collection(&self, collection: &str, unique_fields: &[String]) -> Result<(), DatabaseError>;

    async fn drop_collection(&self, collection: &str) -> Result<(), DatabaseError>;

    async fn count(&self, collection: &str) -> Result<u64, DatabaseError>;

    /// Documents in insertion order
    async fn find_page(&self, collection: &str, skip: u64, limit: u64) -> Result<Vec<StoredDocument>, DatabaseError>;

    /// First document whose `field` equals `value`, ignoring `exclude`
    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &DocValue,
        exclude: Option<DocumentId>,
    ) -> Result<Option<DocumentId>, DatabaseError>;

    /// Fails with `DatabaseError::DuplicateKey` when a declared constraint is hit
    async fn insert_one(&self, collection: &str, document: &Document) -> Result<DocumentId, DatabaseError>;

    /// Merge `patch` into the document's fields; never replaces the document
    async fn update_one(&self, collection: &str, id: DocumentId, patch: &Document) -> Result<UpdateOutcome, DatabaseError>;

    /// Returns the number of documents deleted (0 or 1)
    async fn delete_one(&self, collection: &str, id: DocumentId) -> Result<u64, DatabaseError>;

    /// Release underlying resources once the registry evicts this handle
    async fn close(&self) {}
}

/// Collection names become table names: 1-63 chars, leading letter or
/// underscore, then [a-zA-Z0-9_]
pub fn is_valid_collection_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
