// In-process backend for development runs and tests. Mirrors the Postgres
// backend's semantics: unique fields are enforced on write, absent fields
// never collide, and documents come back in insertion order.

use async_trait::async_trait;
use serde_json::Number;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::database::manager::{DatabaseError, TenantConnector, TenantHandle};
use crate::database::store::{DocumentStore, UpdateOutcome};
use crate::types::{DocValue, Document, DocumentId, StoredDocument};

/// Hands out one `MemoryStore` per tenant; data outlives registry eviction
#[derive(Default)]
pub struct MemoryConnector {
    tenants: std::sync::Mutex<HashMap<String, Arc<MemoryStore>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantConnector for MemoryConnector {
    async fn connect(&self, tenant: &str) -> Result<TenantHandle, DatabaseError> {
        let mut tenants = self
            .tenants
            .lock()
            .map_err(|_| DatabaseError::ConnectionError("memory connector poisoned".to_string()))?;
        let store = tenants
            .entry(tenant.to_string())
            .or_insert_with(|| Arc::new(MemoryStore::new()))
            .clone();
        Ok(store)
    }
}

#[derive(Default)]
struct MemoryCollection {
    unique_fields: BTreeSet<String>,
    rows: Vec<StoredDocument>,
}

impl MemoryCollection {
    fn collides(&self, document: &Document, exclude: Option<DocumentId>) -> Option<String> {
        self.unique_fields
            .iter()
            .filter_map(|field| document.get(field).map(|value| (field, value)))
            .find(|(field, value)| {
                self.rows.iter().any(|row| {
                    Some(row.id) != exclude
                        && row.document.get(field).map(|v| values_equal(v, value)).unwrap_or(false)
                })
            })
            .map(|(field, _)| field.clone())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<String, MemoryCollection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn missing(collection: &str) -> DatabaseError {
    DatabaseError::CollectionNotFound(collection.to_string())
}

/// Equality as a JSON document store sees it: numbers compare by value
fn values_equal(a: &DocValue, b: &DocValue) -> bool {
    match (a, b) {
        (DocValue::Number(x), DocValue::Number(y)) => numbers_equal(x, y),
        (DocValue::Array(xs), DocValue::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (DocValue::Object(xs), DocValue::Object(ys)) => {
            xs.len() == ys.len()
                && xs.iter().all(|(k, x)| ys.get(k).map(|y| values_equal(x, y)).unwrap_or(false))
        }
        _ => a == b,
    }
}

/// Integers compare exactly; only a float on either side falls back to f64
fn numbers_equal(x: &Number, y: &Number) -> bool {
    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (x.as_u64(), y.as_u64()) {
        return a == b;
    }
    if !x.is_f64() && !y.is_f64() {
        // One negative i64 against a u64 beyond i64::MAX
        return false;
    }
    x.as_f64() == y.as_f64()
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn list_collections(&self) -> Result<Vec<String>, DatabaseError> {
        Ok(self.collections.read().await.keys().cloned().collect())
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool, DatabaseError> {
        Ok(self.collections.read().await.contains_key(collection))
    }

    async fn create_collection(&self, collection: &str, unique_fields: &[String]) -> Result<(), DatabaseError> {
        let mut collections = self.collections.write().await;
        let entry = collections.entry(collection.to_string()).or_default();
        entry.unique_fields.extend(unique_fields.iter().cloned());
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), DatabaseError> {
        self.collections
            .write()
            .await
            .remove(collection)
            .map(|_| ())
            .ok_or_else(|| missing(collection))
    }

    async fn count(&self, collection: &str) -> Result<u64, DatabaseError> {
        let collections = self.collections.read().await;
        let entry = collections.get(collection).ok_or_else(|| missing(collection))?;
        Ok(entry.rows.len() as u64)
    }

    async fn find_page(&self, collection: &str, skip: u64, limit: u64) -> Result<Vec<StoredDocument>, DatabaseError> {
        let collections = self.collections.read().await;
        let entry = collections.get(collection).ok_or_else(|| missing(collection))?;
        Ok(entry
            .rows
            .iter()
            .skip(skip as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &DocValue,
        exclude: Option<DocumentId>,
    ) -> Result<Option<DocumentId>, DatabaseError> {
        let collections = self.collections.read().await;
        let entry = collections.get(collection).ok_or_else(|| missing(collection))?;
        Ok(entry
            .rows
            .iter()
            .filter(|row| Some(row.id) != exclude)
            .find(|row| row.document.get(field).map(|v| values_equal(v, value)).unwrap_or(false))
            .map(|row| row.id))
    }

    async fn insert_one(&self, collection: &str, document: &Document) -> Result<DocumentId, DatabaseError> {
        let mut collections = self.collections.write().await;
        let entry = collections.get_mut(collection).ok_or_else(|| missing(collection))?;
        if let Some(field) = entry.collides(document, None) {
            return Err(DatabaseError::DuplicateKey {
                collection: collection.to_string(),
                field: Some(field),
            });
        }
        let id = DocumentId::generate();
        entry.rows.push(StoredDocument {
            id,
            document: document.clone(),
        });
        Ok(id)
    }

    async fn update_one(&self, collection: &str, id: DocumentId, patch: &Document) -> Result<UpdateOutcome, DatabaseError> {
        let mut collections = self.collections.write().await;
        let entry = collections.get_mut(collection).ok_or_else(|| missing(collection))?;
        let Some(index) = entry.rows.iter().position(|row| row.id == id) else {
            return Ok(UpdateOutcome::default());
        };

        let mut merged = entry.rows[index].document.clone();
        merged.merge(patch);
        if merged == entry.rows[index].document {
            return Ok(UpdateOutcome { matched: 1, modified: 0 });
        }
        if let Some(field) = entry.collides(patch, Some(id)) {
            return Err(DatabaseError::DuplicateKey {
                collection: collection.to_string(),
                field: Some(field),
            });
        }
        entry.rows[index].document = merged;
        Ok(UpdateOutcome { matched: 1, modified: 1 })
    }

    async fn delete_one(&self, collection: &str, id: DocumentId) -> Result<u64, DatabaseError> {
        let mut collections = self.collections.write().await;
        let entry = collections.get_mut(collection).ok_or_else(|| missing(collection))?;
        let before = entry.rows.len();
        entry.rows.retain(|row| row.id != id);
        Ok((before - entry.rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        Document::from_json(value).unwrap()
    }

    #[tokio::test]
    async fn enforces_declared_unique_fields() {
        let store = MemoryStore::new();
        store.create_collection("people", &["email".to_string()]).await.unwrap();

        store.insert_one("people", &doc(json!({ "email": "a@x" }))).await.unwrap();
        let err = store.insert_one("people", &doc(json!({ "email": "a@x" }))).await.unwrap_err();
        assert!(matches!(err, DatabaseError::DuplicateKey { field: Some(ref f), .. } if f == "email"));

        // Documents without the field never collide
        store.insert_one("people", &doc(json!({ "name": "n" }))).await.unwrap();
        store.insert_one("people", &doc(json!({ "name": "m" }))).await.unwrap();
        assert_eq!(store.count("people").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn numbers_compare_by_value() {
        let store = MemoryStore::new();
        store.create_collection("scores", &[]).await.unwrap();
        store.insert_one("scores", &doc(json!({ "n": 1 }))).await.unwrap();
        let hit = store
            .find_by_field("scores", "n", &DocValue::from_json(json!(1.0)), None)
            .await
            .unwrap();
        assert!(hit.is_some());
    }

    #[tokio::test]
    async fn large_integers_stay_distinct() {
        let store = MemoryStore::new();
        store.create_collection("ledger", &["seq".to_string()]).await.unwrap();
        store.insert_one("ledger", &doc(json!({ "seq": 9_007_199_254_740_993_u64 }))).await.unwrap();
        store.insert_one("ledger", &doc(json!({ "seq": 9_007_199_254_740_992_u64 }))).await.unwrap();
        store.insert_one("ledger", &doc(json!({ "seq": u64::MAX }))).await.unwrap();
        store.insert_one("ledger", &doc(json!({ "seq": -1 }))).await.unwrap();

        let err = store
            .insert_one("ledger", &doc(json!({ "seq": 9_007_199_254_740_993_u64 })))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::DuplicateKey { .. }));
        assert_eq!(store.count("ledger").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn update_merges_and_reports_modification() {
        let store = MemoryStore::new();
        store.create_collection("people", &["email".to_string()]).await.unwrap();
        let id = store.insert_one("people", &doc(json!({ "email": "a@x", "age": 1 }))).await.unwrap();
        let other = store.insert_one("people", &doc(json!({ "email": "b@x" }))).await.unwrap();

        let outcome = store.update_one("people", id, &doc(json!({ "age": 2 }))).await.unwrap();
        assert_eq!(outcome, UpdateOutcome { matched: 1, modified: 1 });

        let outcome = store.update_one("people", id, &doc(json!({ "age": 2 }))).await.unwrap();
        assert_eq!(outcome, UpdateOutcome { matched: 1, modified: 0 });

        let err = store.update_one("people", other, &doc(json!({ "email": "a@x" }))).await.unwrap_err();
        assert!(matches!(err, DatabaseError::DuplicateKey { .. }));

        let page = store.find_page("people", 0, 10).await.unwrap();
        assert_eq!(page[0].document.get("email"), Some(&DocValue::String("a@x".into())));
        assert_eq!(page[0].document.get("age"), Some(&DocValue::from_json(json!(2))));
    }

    #[tokio::test]
    async fn delete_and_drop_report_missing_targets() {
        let store = MemoryStore::new();
        store.create_collection("people", &[]).await.unwrap();
        let id = store.insert_one("people", &doc(json!({ "a": 1 }))).await.unwrap();
        assert_eq!(store.delete_one("people", id).await.unwrap(), 1);
        assert_eq!(store.delete_one("people", id).await.unwrap(), 0);

        store.drop_collection("people").await.unwrap();
        assert!(!store.collection_exists("people").await.unwrap());
        assert!(matches!(
            store.drop_collection("people").await.unwrap_err(),
            DatabaseError::CollectionNotFound(_)
        ));
    }

    #[tokio::test]
    async fn connector_keeps_one_store_per_tenant() {
        let connector = MemoryConnector::new();
        let a = connector.connect("alpha").await.unwrap();
        a.create_collection("things", &[]).await.unwrap();

        let again = connector.connect("alpha").await.unwrap();
        assert_eq!(again.list_collections().await.unwrap(), vec!["things".to_string()]);

        let other = connector.connect("beta").await.unwrap();
        assert!(other.list_collections().await.unwrap().is_empty());
    }
}
