use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use crate::database::manager::DatabaseError;
use crate::database::models::{SchemaDescriptor, SchemaRow};
use crate::database::postgres::UNIQUE_VIOLATION;
use crate::types::FieldMap;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Collection '{collection}' already exists in database '{db}'")]
    Conflict { db: String, collection: String },

    #[error("Collection '{collection}' has no schema in database '{db}'")]
    NotFound { db: String, collection: String },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<sqlx::Error> for CatalogError {
    fn from(err: sqlx::Error) -> Self {
        CatalogError::Database(DatabaseError::Sqlx(err))
    }
}

/// Persists the field schema recorded for each (tenant, collection) pair
#[async_trait]
pub trait SchemaCatalog: Send + Sync {
    /// Register a new descriptor; `createdAt`/`updatedAt` are appended
    async fn define(&self, db: &str, collection: &str, fields: FieldMap) -> Result<SchemaDescriptor, CatalogError>;

    async fn lookup(&self, db: &str, collection: &str) -> Result<SchemaDescriptor, CatalogError>;

    /// Delete a descriptor. Callers confirm existence beforehand; removing an
    /// absent pair is a no-op.
    async fn remove(&self, db: &str, collection: &str) -> Result<(), CatalogError>;

    async fn list(&self, db: &str) -> Result<Vec<SchemaDescriptor>, CatalogError>;
}

/// Catalog kept in the system database's `collection_schemas` table
pub struct PgSchemaCatalog {
    pool: PgPool,
}

impl PgSchemaCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the catalog table if this is a fresh system database
    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collection_schemas (
                db TEXT NOT NULL,
                collection TEXT NOT NULL,
                schema JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (db, collection)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        info!("Schema catalog ready");
        Ok(())
    }
}

#[async_trait]
impl SchemaCatalog for PgSchemaCatalog {
    async fn define(&self, db: &str, collection: &str, fields: FieldMap) -> Result<SchemaDescriptor, CatalogError> {
        let descriptor = SchemaDescriptor::new(db, collection, fields);
        let inserted = sqlx::query(
            "INSERT INTO collection_schemas (db, collection, schema, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(&descriptor.db)
        .bind(&descriptor.collection)
        .bind(Json(&descriptor.fields))
        .bind(descriptor.created_at)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(descriptor),
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                Err(CatalogError::Conflict {
                    db: db.to_string(),
                    collection: collection.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn lookup(&self, db: &str, collection: &str) -> Result<SchemaDescriptor, CatalogError> {
        let row: Option<SchemaRow> = sqlx::query_as(
            "SELECT db, collection, schema, created_at FROM collection_schemas WHERE db = $1 AND collection = $2",
        )
        .bind(db)
        .bind(collection)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SchemaDescriptor::from).ok_or_else(|| CatalogError::NotFound {
            db: db.to_string(),
            collection: collection.to_string(),
        })
    }

    async fn remove(&self, db: &str, collection: &str) -> Result<(), CatalogError> {
        sqlx::query("DELETE FROM collection_schemas WHERE db = $1 AND collection = $2")
            .bind(db)
            .bind(collection)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self, db: &str) -> Result<Vec<SchemaDescriptor>, CatalogError> {
        let rows: Vec<SchemaRow> = sqlx::query_as(
            "SELECT db, collection, schema, created_at FROM collection_schemas WHERE db = $1 ORDER BY collection",
        )
        .bind(db)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SchemaDescriptor::from).collect())
    }
}

/// In-process catalog for the memory backend
#[derive(Default)]
pub struct MemorySchemaCatalog {
    entries: RwLock<BTreeMap<(String, String), SchemaDescriptor>>,
}

impl MemorySchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SchemaCatalog for MemorySchemaCatalog {
    async fn define(&self, db: &str, collection: &str, fields: FieldMap) -> Result<SchemaDescriptor, CatalogError> {
        let mut entries = self.entries.write().await;
        let key = (db.to_string(), collection.to_string());
        if entries.contains_key(&key) {
            return Err(CatalogError::Conflict {
                db: key.0,
                collection: key.1,
            });
        }
        let descriptor = SchemaDescriptor::new(db, collection, fields);
        entries.insert(key, descriptor.clone());
        Ok(descriptor)
    }

    async fn lookup(&self, db: &str, collection: &str) -> Result<SchemaDescriptor, CatalogError> {
        self.entries
            .read()
            .await
            .get(&(db.to_string(), collection.to_string()))
            .cloned()
            .ok_or_else(|| CatalogError::NotFound {
                db: db.to_string(),
                collection: collection.to_string(),
            })
    }

    async fn remove(&self, db: &str, collection: &str) -> Result<(), CatalogError> {
        self.entries
            .write()
            .await
            .remove(&(db.to_string(), collection.to_string()));
        Ok(())
    }

    async fn list(&self, db: &str) -> Result<Vec<SchemaDescriptor>, CatalogError> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .filter(|descriptor| descriptor.db == db)
            .cloned()
            .collect())
    }
}
