use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use uuid::Uuid;

use crate::database::manager::{ConnectionRegistry, DatabaseError, TenantConnector, TenantHandle};
use crate::database::store::{is_valid_collection_name, DocumentStore, UpdateOutcome};
use crate::types::{DocValue, Document, DocumentId, StoredDocument};

/// Postgres SQLSTATE for unique_violation
pub const UNIQUE_VIOLATION: &str = "23505";
const UNDEFINED_TABLE: &str = "42P01";

#[derive(Debug, Clone)]
pub struct PgSettings {
    pub base_url: String,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

impl PgSettings {
    pub fn from_env(max_connections: u32, connection_timeout: u64) -> Result<Self, DatabaseError> {
        let base_url = std::env::var("DATABASE_URL")
            .map_err(|_| DatabaseError::ConfigMissing("DATABASE_URL"))?;
        Ok(Self {
            base_url,
            max_connections,
            connection_timeout,
        })
    }

    /// Swap the database name into the path of the base URL
    pub fn connection_string(&self, database_name: &str) -> Result<String, DatabaseError> {
        let mut url = url::Url::parse(&self.base_url).map_err(|_| DatabaseError::InvalidDatabaseUrl)?;
        url.set_path(&format!("/{}", database_name));
        Ok(url.into())
    }

    pub async fn connect(&self, database_name: &str) -> Result<PgPool, DatabaseError> {
        let connection_string = self.connection_string(database_name)?;
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(Duration::from_secs(self.connection_timeout))
            .connect(&connection_string)
            .await
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))
    }
}

/// Physical database name for a tenant key
pub fn tenant_database_name(tenant: &str) -> String {
    format!("tenant_{}", tenant)
}

/// Quote SQL identifier to prevent injection
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Index names are capped at 63 bytes, so derive them from a digest
pub fn unique_index_name(collection: &str, field: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(collection.as_bytes());
    hasher.update([0u8]);
    hasher.update(field.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    format!("uq_{}", &hash[..24])
}

/// Opens one pool per tenant database, creating the database on first use
pub struct PgConnector {
    settings: PgSettings,
    admin: OnceCell<PgPool>,
}

impl PgConnector {
    pub fn new(settings: PgSettings) -> Self {
        Self {
            settings,
            admin: OnceCell::new(),
        }
    }

    /// Administrative pool on the `postgres` database
    async fn admin_pool(&self) -> Result<&PgPool, DatabaseError> {
        self.admin.get_or_try_init(|| self.settings.connect("postgres")).await
    }

    async fn ensure_database(&self, database_name: &str) -> Result<(), DatabaseError> {
        let admin = self.admin_pool().await?;
        let exists: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pg_database WHERE datname = $1")
            .bind(database_name)
            .fetch_one(admin)
            .await?;
        if exists.0 == 0 {
            let ddl = format!("CREATE DATABASE {}", quote_identifier(database_name));
            sqlx::query(&ddl).execute(admin).await?;
            info!("Created tenant database: {}", database_name);
        }
        Ok(())
    }
}

#[async_trait]
impl TenantConnector for PgConnector {
    async fn connect(&self, tenant: &str) -> Result<TenantHandle, DatabaseError> {
        if !ConnectionRegistry::is_valid_tenant_key(tenant) {
            return Err(DatabaseError::InvalidTenantName(tenant.to_string()));
        }
        let database_name = tenant_database_name(tenant);
        self.ensure_database(&database_name).await?;
        let pool = self.settings.connect(&database_name).await?;
        Ok(std::sync::Arc::new(PgDocumentStore::new(pool)))
    }
}

/// One JSONB table per collection: `id uuid, seq bigserial, doc jsonb`
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn table(collection: &str) -> Result<String, DatabaseError> {
        if !is_valid_collection_name(collection) {
            return Err(DatabaseError::InvalidCollectionName(collection.to_string()));
        }
        Ok(quote_identifier(collection))
    }

    fn map_error(collection: &str, document: &Document, err: sqlx::Error) -> DatabaseError {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.code().as_deref() {
                Some(UNIQUE_VIOLATION) => {
                    let constraint = db_err.constraint().unwrap_or_default();
                    let field = document
                        .iter()
                        .map(|(name, _)| name)
                        .find(|name| unique_index_name(collection, name) == constraint)
                        .cloned();
                    return DatabaseError::DuplicateKey {
                        collection: collection.to_string(),
                        field,
                    };
                }
                Some(UNDEFINED_TABLE) => return DatabaseError::CollectionNotFound(collection.to_string()),
                _ => {}
            }
        }
        DatabaseError::Sqlx(err)
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn list_collections(&self) -> Result<Vec<String>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT table_name::text AS name FROM information_schema.tables \
             WHERE table_schema = 'public' AND table_type = 'BASE TABLE' ORDER BY table_name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|row| row.get::<String, _>("name")).collect())
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool, DatabaseError> {
        let exists: (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_schema = 'public' AND table_name = $1)",
        )
        .bind(collection)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists.0)
    }

    async fn create_collection(&self, collection: &str, unique_fields: &[String]) -> Result<(), DatabaseError> {
        let table = Self::table(collection)?;
        let mut tx = self.pool.begin().await?;

        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                \"id\" UUID PRIMARY KEY,\n    \
                \"seq\" BIGSERIAL NOT NULL,\n    \
                \"doc\" JSONB NOT NULL\n)",
            table
        );
        sqlx::query(&ddl).execute(&mut *tx).await?;

        for field in unique_fields {
            let ddl = format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ((\"doc\" -> {}))",
                quote_identifier(&unique_index_name(collection, field)),
                table,
                quote_literal(field)
            );
            sqlx::query(&ddl).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        debug!("Ensured collection {} ({} unique fields)", collection, unique_fields.len());
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), DatabaseError> {
        let sql = format!("DROP TABLE {}", Self::table(collection)?);
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| Self::map_error(collection, &Document::new(), e))?;
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<u64, DatabaseError> {
        let sql = format!("SELECT COUNT(*) FROM {}", Self::table(collection)?);
        let count: (i64,) = sqlx::query_as(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Self::map_error(collection, &Document::new(), e))?;
        Ok(count.0.max(0) as u64)
    }

    async fn find_page(&self, collection: &str, skip: u64, limit: u64) -> Result<Vec<StoredDocument>, DatabaseError> {
        let sql = format!(
            "SELECT \"id\", \"doc\" FROM {} ORDER BY \"seq\" OFFSET $1 LIMIT $2",
            Self::table(collection)?
        );
        let rows: Vec<(Uuid, Value)> = sqlx::query_as(&sql)
            .bind(skip.min(i64::MAX as u64) as i64)
            .bind(limit.min(i64::MAX as u64) as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Self::map_error(collection, &Document::new(), e))?;

        rows.into_iter()
            .map(|(id, doc)| {
                Document::from_json(doc)
                    .map(|document| StoredDocument {
                        id: DocumentId(id),
                        document,
                    })
                    .map_err(|e| DatabaseError::QueryError(format!("{} in {}", e, collection)))
            })
            .collect()
    }

    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &DocValue,
        exclude: Option<DocumentId>,
    ) -> Result<Option<DocumentId>, DatabaseError> {
        let sql = format!(
            "SELECT \"id\" FROM {} WHERE \"doc\" -> $1 = $2 AND ($3::uuid IS NULL OR \"id\" <> $3) LIMIT 1",
            Self::table(collection)?
        );
        let row: Option<(Uuid,)> = sqlx::query_as(&sql)
            .bind(field)
            .bind(value.to_storage_json())
            .bind(exclude.map(|id| id.0))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Self::map_error(collection, &Document::new(), e))?;
        Ok(row.map(|(id,)| DocumentId(id)))
    }

    async fn insert_one(&self, collection: &str, document: &Document) -> Result<DocumentId, DatabaseError> {
        let sql = format!("INSERT INTO {} (\"id\", \"doc\") VALUES ($1, $2)", Self::table(collection)?);
        let id = DocumentId::generate();
        sqlx::query(&sql)
            .bind(id.0)
            .bind(document.to_storage_json())
            .execute(&self.pool)
            .await
            .map_err(|e| Self::map_error(collection, document, e))?;
        Ok(id)
    }

    async fn update_one(&self, collection: &str, id: DocumentId, patch: &Document) -> Result<UpdateOutcome, DatabaseError> {
        let table = Self::table(collection)?;
        // `||` merges top-level keys, leaving unmentioned fields intact
        let sql = format!(
            "UPDATE {} SET \"doc\" = \"doc\" || $2 WHERE \"id\" = $1 AND (\"doc\" || $2) IS DISTINCT FROM \"doc\"",
            table
        );
        let result = sqlx::query(&sql)
            .bind(id.0)
            .bind(patch.to_storage_json())
            .execute(&self.pool)
            .await
            .map_err(|e| Self::map_error(collection, patch, e))?;

        if result.rows_affected() > 0 {
            return Ok(UpdateOutcome { matched: 1, modified: 1 });
        }

        let exists_sql = format!("SELECT EXISTS (SELECT 1 FROM {} WHERE \"id\" = $1)", table);
        let exists: (bool,) = sqlx::query_as(&exists_sql).bind(id.0).fetch_one(&self.pool).await?;
        Ok(UpdateOutcome {
            matched: u64::from(exists.0),
            modified: 0,
        })
    }

    async fn delete_one(&self, collection: &str, id: DocumentId) -> Result<u64, DatabaseError> {
        let sql = format!("DELETE FROM {} WHERE \"id\" = $1", Self::table(collection)?);
        let result = sqlx::query(&sql)
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| Self::map_error(collection, &Document::new(), e))?;
        Ok(result.rows_affected())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
