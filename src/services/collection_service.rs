use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

use crate::database::manager::ConnectionRegistry;
use crate::database::models::SchemaDescriptor;
use crate::database::store::is_valid_collection_name;
use crate::services::catalog::SchemaCatalog;
use crate::services::ServiceError;
use crate::types::FieldMap;

/// Path segment reserved for listing collections
pub const LIST_COLLECTIONS: &str = "collection";

/// A physical collection joined with its recorded schema, if any
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub schema: Option<FieldMap>,
}

/// Collection lifecycle: list, create, drop
pub struct CollectionService {
    registry: Arc<ConnectionRegistry>,
    catalog: Arc<dyn SchemaCatalog>,
}

impl CollectionService {
    pub fn new(registry: Arc<ConnectionRegistry>, catalog: Arc<dyn SchemaCatalog>) -> Self {
        Self { registry, catalog }
    }

    /// Physical collections left-joined with the catalog by name
    pub async fn list(&self, db: &str) -> Result<Vec<CollectionInfo>, ServiceError> {
        let store = self.registry.open(db).await?;
        let (names, descriptors) = futures::try_join!(
            async { store.list_collections().await.map_err(ServiceError::from) },
            async { self.catalog.list(db).await.map_err(ServiceError::from) },
        )?;

        let mut schemas: HashMap<String, FieldMap> = descriptors
            .into_iter()
            .map(|descriptor| (descriptor.collection, descriptor.fields))
            .collect();

        let mut collections: Vec<CollectionInfo> = names
            .into_iter()
            .map(|name| {
                let schema = schemas.remove(&name);
                CollectionInfo { name, schema }
            })
            .collect();
        collections.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(collections)
    }

    /// Record the schema, then make sure the physical collection exists.
    /// Existence is judged by the catalog alone.
    pub async fn create(&self, db: &str, name: &str, fields: FieldMap) -> Result<SchemaDescriptor, ServiceError> {
        Self::validate_name(name)?;
        let store = self.registry.open(db).await?;

        let descriptor = self.catalog.define(db, name, fields).await?;

        if let Err(e) = store.create_collection(name, &descriptor.unique_fields()).await {
            // Descriptor stays recorded; reported, not rolled back
            error!("Schema for {}/{} recorded but physical create failed: {}", db, name, e);
            return Err(e.into());
        }

        info!("Created collection {}/{} with {} fields", db, name, descriptor.fields.len());
        Ok(descriptor)
    }

    /// Drop the physical collection, then its descriptor
    pub async fn drop_collection(&self, db: &str, name: &str) -> Result<(), ServiceError> {
        Self::validate_name(name)?;
        let store = self.registry.open(db).await?;

        if !store.collection_exists(name).await? {
            return Err(ServiceError::CollectionNotFound(name.to_string()));
        }

        store.drop_collection(name).await?;

        if let Err(e) = self.catalog.remove(db, name).await {
            error!("Collection {}/{} dropped but schema removal failed: {}", db, name, e);
            return Err(e.into());
        }

        info!("Dropped collection {}/{}", db, name);
        Ok(())
    }

    fn validate_name(name: &str) -> Result<(), ServiceError> {
        if name == LIST_COLLECTIONS || !is_valid_collection_name(name) {
            return Err(ServiceError::InvalidName(name.to_string()));
        }
        Ok(())
    }
}
