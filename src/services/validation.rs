use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::database::models::SchemaDescriptor;
use crate::types::{parse_date_like, DocValue, Document, FieldType, CREATED_AT, UPDATED_AT};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Field '{0}' is not defined in the schema")]
    FieldUnknown(String),

    #[error("Field '{field}' should be of type '{expected}', got '{actual}'")]
    TypeMismatch {
        field: String,
        expected: FieldType,
        actual: FieldType,
    },

    #[error("Field '{0}' is required")]
    MissingField(String),
}

impl ValidationError {
    pub fn field(&self) -> &str {
        match self {
            ValidationError::FieldUnknown(field) => field,
            ValidationError::TypeMismatch { field, .. } => field,
            ValidationError::MissingField(field) => field,
        }
    }
}

/// Strict type check, no coercion. Date accepts only a real timestamp; a
/// numeric epoch or raw string is a mismatch.
pub fn type_matches(expected: FieldType, value: &DocValue) -> bool {
    match (expected, value) {
        (FieldType::String, DocValue::String(_)) => true,
        (FieldType::Number, DocValue::Number(_)) => true,
        (FieldType::Boolean, DocValue::Boolean(_)) => true,
        (FieldType::Date, DocValue::Date(_)) => true,
        (FieldType::Array, DocValue::Array(_)) => true,
        (FieldType::Object, DocValue::Object(_)) => true,
        (FieldType::Null, DocValue::Null) => true,
        _ => false,
    }
}

/// Check every field of `document` against the closed schema field set.
/// On success returns the fields that need a uniqueness probe, in field order.
pub fn check_document(descriptor: &SchemaDescriptor, document: &Document) -> Result<Vec<String>, ValidationError> {
    let mut probes = Vec::new();
    for (field, value) in document.iter() {
        let spec = descriptor
            .field(field)
            .ok_or_else(|| ValidationError::FieldUnknown(field.clone()))?;

        if !type_matches(spec.field_type, value) {
            return Err(ValidationError::TypeMismatch {
                field: field.clone(),
                expected: spec.field_type,
                actual: value.kind(),
            });
        }

        if spec.unique {
            probes.push(field.clone());
        }
    }
    Ok(probes)
}

/// Full documents must carry every `required` field
pub fn check_required(descriptor: &SchemaDescriptor, document: &Document) -> Result<(), ValidationError> {
    match descriptor
        .fields
        .iter()
        .find(|(name, spec)| spec.required && !document.contains(name))
    {
        Some((name, _)) => Err(ValidationError::MissingField(name.clone())),
        None => Ok(()),
    }
}

/// Insert-time normalization of `createdAt`/`updatedAt`: absent or null
/// becomes `now`, date-like strings are parsed. Unparseable values are left
/// for `check_document` to reject.
pub fn normalize_timestamps(document: &mut Document, now: DateTime<Utc>) {
    for field in [CREATED_AT, UPDATED_AT] {
        normalize_field(document, field, now, true);
    }
}

/// Patch-time normalization: parse any supplied timestamps and touch
/// `updatedAt` when the patch leaves it out
pub fn normalize_patch_timestamps(patch: &mut Document, now: DateTime<Utc>) {
    normalize_field(patch, CREATED_AT, now, false);
    normalize_field(patch, UPDATED_AT, now, true);
}

fn normalize_field(document: &mut Document, field: &str, now: DateTime<Utc>, fill_absent: bool) {
    let replacement = match document.get(field) {
        None | Some(DocValue::Null) if fill_absent => Some(DocValue::Date(now)),
        Some(DocValue::String(raw)) => parse_date_like(raw).map(DocValue::Date),
        _ => None,
    };
    if let Some(value) = replacement {
        document.insert(field, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldMap, FieldSpec};
    use chrono::TimeZone;
    use serde_json::json;

    fn descriptor() -> SchemaDescriptor {
        let mut fields = FieldMap::new();
        fields.insert("name".to_string(), FieldSpec::new(FieldType::String).unique().required());
        fields.insert("age".to_string(), FieldSpec::new(FieldType::Number));
        fields.insert("tags".to_string(), FieldSpec::new(FieldType::Array));
        fields.insert("profile".to_string(), FieldSpec::new(FieldType::Object));
        fields.insert("deletedAt".to_string(), FieldSpec::new(FieldType::Null));
        SchemaDescriptor::new("shop", "customers", fields)
    }

    fn doc(value: serde_json::Value) -> Document {
        Document::from_json(value).unwrap()
    }

    #[test]
    fn type_matching_is_strict() {
        let date = DocValue::Date(Utc::now());
        assert!(type_matches(FieldType::Date, &date));
        assert!(!type_matches(FieldType::Date, &DocValue::from_json(json!(1714564800))));
        assert!(!type_matches(FieldType::Date, &DocValue::from_json(json!("2024-05-01"))));
        assert!(!type_matches(FieldType::Number, &DocValue::from_json(json!("1"))));
        assert!(!type_matches(FieldType::Object, &DocValue::from_json(json!([]))));
        assert!(!type_matches(FieldType::Object, &DocValue::Null));
        assert!(type_matches(FieldType::Null, &DocValue::Null));
        assert!(!type_matches(FieldType::String, &DocValue::Null));
    }

    #[test]
    fn flags_unique_fields_for_probing() {
        let probes = check_document(&descriptor(), &doc(json!({ "name": "a", "age": 1 }))).unwrap();
        assert_eq!(probes, vec!["name".to_string()]);
    }

    #[test]
    fn rejects_fields_outside_the_schema() {
        let err = check_document(&descriptor(), &doc(json!({ "name": "a", "nickname": "b" }))).unwrap_err();
        assert_eq!(err, ValidationError::FieldUnknown("nickname".to_string()));
    }

    #[test]
    fn reports_type_mismatches() {
        let err = check_document(&descriptor(), &doc(json!({ "age": "old" }))).unwrap_err();
        assert_eq!(
            err,
            ValidationError::TypeMismatch {
                field: "age".to_string(),
                expected: FieldType::Number,
                actual: FieldType::String,
            }
        );
        assert_eq!(err.field(), "age");
    }

    #[test]
    fn required_fields_must_be_present() {
        assert_eq!(
            check_required(&descriptor(), &doc(json!({ "age": 1 }))),
            Err(ValidationError::MissingField("name".to_string()))
        );
        assert!(check_required(&descriptor(), &doc(json!({ "name": "a" }))).is_ok());
    }

    #[test]
    fn normalizes_insert_timestamps() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let mut document = doc(json!({ "createdAt": "2024-01-02T03:04:05Z", "updatedAt": null }));
        normalize_timestamps(&mut document, now);

        assert_eq!(
            document.get(CREATED_AT),
            Some(&DocValue::Date(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()))
        );
        assert_eq!(document.get(UPDATED_AT), Some(&DocValue::Date(now)));

        let mut absent = doc(json!({}));
        normalize_timestamps(&mut absent, now);
        assert_eq!(absent.get(CREATED_AT), Some(&DocValue::Date(now)));
    }

    #[test]
    fn unparseable_timestamps_fail_validation() {
        let mut document = doc(json!({ "name": "a", "createdAt": "someday" }));
        normalize_timestamps(&mut document, Utc::now());
        let err = check_document(&descriptor(), &document).unwrap_err();
        assert!(matches!(err, ValidationError::TypeMismatch { ref field, .. } if field == CREATED_AT));
    }

    #[test]
    fn patches_touch_updated_at_only() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let mut patch = doc(json!({ "age": 3 }));
        normalize_patch_timestamps(&mut patch, now);
        assert!(!patch.contains(CREATED_AT));
        assert_eq!(patch.get(UPDATED_AT), Some(&DocValue::Date(now)));
    }
}
