use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

use crate::types::{FieldMap, FieldSpec, FieldType, CREATED_AT, UPDATED_AT};

/// The recorded schema for one (tenant, collection) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub db: String,
    pub collection: String,
    pub fields: FieldMap,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl SchemaDescriptor {
    /// Build a descriptor, appending the implicit `createdAt`/`updatedAt`
    /// Date fields (these override any caller-supplied spec of that name)
    pub fn new(db: impl Into<String>, collection: impl Into<String>, mut fields: FieldMap) -> Self {
        fields.insert(CREATED_AT.to_string(), FieldSpec::new(FieldType::Date));
        fields.insert(UPDATED_AT.to_string(), FieldSpec::new(FieldType::Date));
        Self {
            db: db.into(),
            collection: collection.into(),
            fields,
            created_at: Utc::now(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    pub fn unique_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|(_, spec)| spec.unique)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Row shape of the `collection_schemas` catalog table
#[derive(Debug, Clone, FromRow)]
pub struct SchemaRow {
    pub db: String,
    pub collection: String,
    pub schema: Json<FieldMap>,
    pub created_at: DateTime<Utc>,
}

impl From<SchemaRow> for SchemaDescriptor {
    fn from(row: SchemaRow) -> Self {
        Self {
            db: row.db,
            collection: row.collection,
            fields: row.schema.0,
            created_at: row.created_at,
        }
    }
}
