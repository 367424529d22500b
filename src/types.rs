/// Shared types used across the codebase

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Storage tag marking a JSON object as a timestamp literal
pub const DATE_TAG: &str = "$date";

/// Implicit timestamp fields appended to every schema
pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";

/// Field types a collection schema may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    String,
    Number,
    Date,
    Boolean,
    Array,
    Object,
    Null,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "String",
            FieldType::Number => "Number",
            FieldType::Date => "Date",
            FieldType::Boolean => "Boolean",
            FieldType::Array => "Array",
            FieldType::Object => "Object",
            FieldType::Null => "Null",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
}

impl FieldSpec {
    pub fn new(field_type: FieldType) -> Self {
        Self { field_type, unique: false, required: false }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Field name → spec, ordered for stable output
pub type FieldMap = BTreeMap<String, FieldSpec>;

/// A loosely-typed document value, closed over the schema field types
#[derive(Debug, Clone, PartialEq)]
pub enum DocValue {
    String(String),
    Number(Number),
    Date(DateTime<Utc>),
    Boolean(bool),
    Array(Vec<DocValue>),
    Object(BTreeMap<String, DocValue>),
    Null,
}

impl DocValue {
    /// Runtime kind of the value, expressed as the schema type it would satisfy
    pub fn kind(&self) -> FieldType {
        match self {
            DocValue::String(_) => FieldType::String,
            DocValue::Number(_) => FieldType::Number,
            DocValue::Date(_) => FieldType::Date,
            DocValue::Boolean(_) => FieldType::Boolean,
            DocValue::Array(_) => FieldType::Array,
            DocValue::Object(_) => FieldType::Object,
            DocValue::Null => FieldType::Null,
        }
    }

    /// Convert wire or storage JSON. `{"$date": "<rfc3339>"}` is a Date; a
    /// `$date` object whose payload does not parse stays an Object.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => DocValue::Null,
            Value::Bool(b) => DocValue::Boolean(b),
            Value::Number(n) => DocValue::Number(n),
            Value::String(s) => DocValue::String(s),
            Value::Array(items) => DocValue::Array(items.into_iter().map(DocValue::from_json).collect()),
            Value::Object(map) => {
                if let Some(date) = date_literal(&map) {
                    return DocValue::Date(date);
                }
                DocValue::Object(map.into_iter().map(|(k, v)| (k, DocValue::from_json(v))).collect())
            }
        }
    }

    /// Storage form: dates keep their tag so they read back as dates
    pub fn to_storage_json(&self) -> Value {
        match self {
            DocValue::Date(d) => {
                let mut map = Map::new();
                map.insert(DATE_TAG.to_string(), Value::String(format_timestamp(d)));
                Value::Object(map)
            }
            DocValue::Array(items) => Value::Array(items.iter().map(DocValue::to_storage_json).collect()),
            DocValue::Object(map) => Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_storage_json())).collect(),
            ),
            other => other.to_api_json(),
        }
    }

    /// API output form: dates render as RFC 3339 strings
    pub fn to_api_json(&self) -> Value {
        match self {
            DocValue::String(s) => Value::String(s.clone()),
            DocValue::Number(n) => Value::Number(n.clone()),
            DocValue::Date(d) => Value::String(format_timestamp(d)),
            DocValue::Boolean(b) => Value::Bool(*b),
            DocValue::Array(items) => Value::Array(items.iter().map(DocValue::to_api_json).collect()),
            DocValue::Object(map) => Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_api_json())).collect(),
            ),
            DocValue::Null => Value::Null,
        }
    }
}

impl fmt::Display for DocValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocValue::String(s) => f.write_str(s),
            other => write!(f, "{}", other.to_api_json()),
        }
    }
}

fn date_literal(map: &Map<String, Value>) -> Option<DateTime<Utc>> {
    if map.len() != 1 {
        return None;
    }
    match map.get(DATE_TAG) {
        Some(Value::String(raw)) => DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|d| d.with_timezone(&Utc)),
        _ => None,
    }
}

pub fn format_timestamp(d: &DateTime<Utc>) -> String {
    d.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse the date-like strings clients send for timestamp fields
pub fn parse_date_like(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(d) = DateTime::parse_from_rfc3339(raw) {
        return Some(d.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Field name → value. Ordered so repeated reads serialize identically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: BTreeMap<String, DocValue>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DocumentError {
    #[error("Document must be a JSON object")]
    NotAnObject,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from request JSON; only objects are documents
    pub fn from_json(json: Value) -> Result<Self, DocumentError> {
        match json {
            Value::Object(map) => Ok(Self {
                fields: map.into_iter().map(|(k, v)| (k, DocValue::from_json(v))).collect(),
            }),
            _ => Err(DocumentError::NotAnObject),
        }
    }

    pub fn get(&self, field: &str) -> Option<&DocValue> {
        self.fields.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: DocValue) -> &mut Self {
        self.fields.insert(field.into(), value);
        self
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DocValue)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Overlay `patch` onto this document, field by field
    pub fn merge(&mut self, patch: &Document) {
        for (k, v) in patch.iter() {
            self.fields.insert(k.clone(), v.clone());
        }
    }

    pub fn to_storage_json(&self) -> Value {
        Value::Object(self.fields.iter().map(|(k, v)| (k.clone(), v.to_storage_json())).collect())
    }

    pub fn to_api_json(&self) -> Value {
        Value::Object(self.fields.iter().map(|(k, v)| (k.clone(), v.to_api_json())).collect())
    }
}

/// Native document id as the stores issue it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub Uuid);

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("Invalid document id: '{0}'")]
pub struct InvalidId(pub String);

impl DocumentId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Result<Self, InvalidId> {
        Uuid::parse_str(raw.trim())
            .map(Self)
            .map_err(|_| InvalidId(raw.to_string()))
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A document as read back from a store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: DocumentId,
    pub document: Document,
}

impl StoredDocument {
    pub fn to_api_json(&self) -> Value {
        let mut value = self.document.to_api_json();
        if let Value::Object(map) = &mut value {
            map.insert("_id".to_string(), Value::String(self.id.to_string()));
        }
        value
    }
}
