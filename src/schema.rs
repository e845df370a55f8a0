//! Schema validator (spec §9 design note, §11.2).
//!
//! Field-type checks plus foreign-key existence checks. Deliberately not
//! a schema DSL: the collaborator it needs from the document store is
//! narrowed to exactly the two lookups foreign-key validation requires.

use std::collections::HashMap;

use tracing::warn;

use crate::error::{DocStoreError, Result};
use crate::types::{FieldType, SchemaDefinition, Value};

/// The only capability the schema validator needs from the rest of the
/// store: look a document up by id within a named collection, or by the
/// value of one field.
pub trait DocumentLookup {
    fn get_document(&self, collection_name: &str, id: u64) -> bool;
    fn get_document_by_field(&self, collection_name: &str, field: &str, value: &Value) -> bool;
}

/// Validates a document's fields against a collection's schema, filling in
/// declared defaults for fields the caller omitted.
pub struct SchemaValidator;

impl SchemaValidator {
    pub fn validate(
        schema: &SchemaDefinition,
        fields: &mut HashMap<String, Value>,
        lookup: &dyn DocumentLookup,
    ) -> Result<()> {
        for (name, field_def) in &schema.fields {
            match fields.get(name) {
                Some(value) => {
                    Self::check_type(name, field_def.field_type, value)?;
                    if field_def.field_type == FieldType::Ref {
                        if let Some(target) = &field_def.ref_collection {
                            let id = value.as_i64().ok_or_else(|| {
                                DocStoreError::Validation(format!(
                                    "field '{name}' is a REF and must hold a document id"
                                ))
                            })?;
                            if !lookup.get_document(target, id as u64) {
                                warn!(field = name, target, id, "schema validation: dangling REF");
                                return Err(DocStoreError::Validation(format!(
                                    "field '{name}' references missing {target}#{id}"
                                )));
                            }
                        }
                    }
                }
                None if field_def.required => {
                    warn!(field = name, "schema validation: missing required field");
                    return Err(DocStoreError::Validation(format!(
                        "missing required field '{name}'"
                    )))
                }
                None => {
                    if let Some(default) = &field_def.default {
                        fields.insert(name.clone(), default.clone());
                    }
                }
            }
        }

        for (name, fk) in &schema.foreign_keys {
            if let Some(value) = fields.get(name) {
                if !lookup.get_document_by_field(&fk.collection, &fk.field, value) {
                    warn!(field = name, collection = %fk.collection, "schema validation: dangling foreign key");
                    return Err(DocStoreError::Validation(format!(
                        "foreign key '{name}' references missing {}.{}",
                        fk.collection, fk.field
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_type(name: &str, expected: FieldType, value: &Value) -> Result<()> {
        let ok = match expected {
            FieldType::String => matches!(value, Value::String(_)),
            FieldType::Integer => matches!(value, Value::Int(_)),
            FieldType::Float => matches!(value, Value::Float(_) | Value::Int(_)),
            FieldType::Boolean => matches!(value, Value::Bool(_)),
            FieldType::List => matches!(value, Value::List(_)),
            FieldType::Dict => matches!(value, Value::Map(_)),
            FieldType::Ref => matches!(value, Value::Int(_) | Value::String(_)),
        };
        if ok {
            Ok(())
        } else {
            warn!(field = name, expected = ?expected, "schema validation: field type mismatch");
            Err(DocStoreError::Validation(format!(
                "field '{name}' does not match expected type {expected:?}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SchemaField;

    struct NoRefs;
    impl DocumentLookup for NoRefs {
        fn get_document(&self, _collection_name: &str, _id: u64) -> bool {
            false
        }
        fn get_document_by_field(&self, _collection_name: &str, _field: &str, _value: &Value) -> bool {
            true
        }
    }

    #[test]
    fn rejects_wrong_type() {
        let mut schema = SchemaDefinition::default();
        schema.fields.insert(
            "age".to_string(),
            SchemaField {
                field_type: FieldType::Integer,
                required: true,
                default: None,
                ref_collection: None,
            },
        );
        let mut fields = HashMap::new();
        fields.insert("age".to_string(), Value::String("not a number".to_string()));
        let result = SchemaValidator::validate(&schema, &mut fields, &NoRefs);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_missing_required_field() {
        let mut schema = SchemaDefinition::default();
        schema.fields.insert(
            "age".to_string(),
            SchemaField {
                field_type: FieldType::Integer,
                required: true,
                default: None,
                ref_collection: None,
            },
        );
        let mut fields = HashMap::new();
        let result = SchemaValidator::validate(&schema, &mut fields, &NoRefs);
        assert!(result.is_err());
    }

    #[test]
    fn accepts_valid_document() {
        let mut schema = SchemaDefinition::default();
        schema.fields.insert(
            "age".to_string(),
            SchemaField {
                field_type: FieldType::Integer,
                required: true,
                default: None,
                ref_collection: None,
            },
        );
        let mut fields = HashMap::new();
        fields.insert("age".to_string(), Value::Int(42));
        assert!(SchemaValidator::validate(&schema, &mut fields, &NoRefs).is_ok());
    }

    #[test]
    fn missing_optional_field_is_filled_with_its_default() {
        let mut schema = SchemaDefinition::default();
        schema.fields.insert(
            "role".to_string(),
            SchemaField {
                field_type: FieldType::String,
                required: false,
                default: Some(Value::from("member")),
                ref_collection: None,
            },
        );
        let mut fields = HashMap::new();
        SchemaValidator::validate(&schema, &mut fields, &NoRefs).unwrap();
        assert_eq!(fields.get("role"), Some(&Value::from("member")));
    }

    #[test]
    fn present_field_is_not_overridden_by_its_default() {
        let mut schema = SchemaDefinition::default();
        schema.fields.insert(
            "role".to_string(),
            SchemaField {
                field_type: FieldType::String,
                required: false,
                default: Some(Value::from("member")),
                ref_collection: None,
            },
        );
        let mut fields = HashMap::new();
        fields.insert("role".to_string(), Value::from("admin"));
        SchemaValidator::validate(&schema, &mut fields, &NoRefs).unwrap();
        assert_eq!(fields.get("role"), Some(&Value::from("admin")));
    }

    struct FixedRefs {
        known_id: u64,
    }
    impl DocumentLookup for FixedRefs {
        fn get_document(&self, _collection_name: &str, id: u64) -> bool {
            id == self.known_id
        }
        fn get_document_by_field(&self, _collection_name: &str, _field: &str, _value: &Value) -> bool {
            true
        }
    }

    #[test]
    fn ref_field_rejects_missing_target_document() {
        let mut schema = SchemaDefinition::default();
        schema.fields.insert(
            "author".to_string(),
            SchemaField {
                field_type: FieldType::Ref,
                required: true,
                default: None,
                ref_collection: Some("users".to_string()),
            },
        );
        let mut fields = HashMap::new();
        fields.insert("author".to_string(), Value::Int(42));
        let result = SchemaValidator::validate(&schema, &mut fields, &FixedRefs { known_id: 7 });
        assert!(result.is_err());
    }

    #[test]
    fn ref_field_accepts_existing_target_document() {
        let mut schema = SchemaDefinition::default();
        schema.fields.insert(
            "author".to_string(),
            SchemaField {
                field_type: FieldType::Ref,
                required: true,
                default: None,
                ref_collection: Some("users".to_string()),
            },
        );
        let mut fields = HashMap::new();
        fields.insert("author".to_string(), Value::Int(7));
        let result = SchemaValidator::validate(&schema, &mut fields, &FixedRefs { known_id: 7 });
        assert!(result.is_ok());
    }
}
