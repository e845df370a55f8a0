//! Core data-model types shared across the document store.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Document identifier: monotonic, unique across the whole store.
pub type DocumentId = u64;

/// Collection identifier: monotonic, unique across the whole store.
pub type CollectionId = u64;

/// Block-pointer-table entry identifier.
pub type PointerEntryId = u64;

/// Opaque document payload tree. The facade treats this as bytes for
/// block I/O and as a structured value only for schema validation and
/// indexing — it never interprets a payload beyond these variants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    /// A stable sort/comparison key for indexing. Only scalar values are
    /// directly indexable; composite values index on their JSON text.
    pub fn index_key(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => format!("{i:020}"),
            Value::Float(f) => format!("{f}"),
            Value::String(s) => s.clone(),
            other => serde_json::to_string(other).unwrap_or_default(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// A document stored by the document store.
///
/// For small payloads `payload` carries the decoded value directly; once a
/// document crosses the compression threshold its `data` field is held
/// compressed and `compressed` is set, matching the source's on-the-wire
/// representation (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub collection_id: CollectionId,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub compressed: bool,
    /// User payload, or the raw compressed bytes (base64-free; stored as a
    /// byte list) when `compressed` is set.
    pub data: Value,
    /// Present only for documents whose payload is block-stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_pointer: Option<PointerEntryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl Document {
    pub fn size_bytes(&self) -> usize {
        serde_json::to_vec(&self.data).map(|v| v.len()).unwrap_or(0)
    }
}

/// Supported schema field types (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    List,
    Dict,
    #[serde(rename = "REF")]
    Ref,
}

/// One field of a collection's schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaField {
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    /// Target collection name for `FieldType::Ref` fields.
    #[serde(default)]
    pub ref_collection: Option<String>,
}

/// A foreign key maps a local field to a (collection, field) pair in
/// another collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    pub collection: String,
    pub field: String,
}

/// Schema definition for a collection: named fields plus foreign keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(default)]
    pub fields: HashMap<String, SchemaField>,
    #[serde(default)]
    pub foreign_keys: HashMap<String, ForeignKey>,
}

/// Collection descriptor, stored as a document in the collection metadata
/// store (spec §3, §11.1). Deletion is logical: a deleted descriptor stays
/// in the metadata store with `deleted` set, rather than being removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionDescriptor {
    pub id: CollectionId,
    pub name: String,
    #[serde(default)]
    pub schema: Option<SchemaDefinition>,
    #[serde(default)]
    pub enforce_schema: bool,
    #[serde(default)]
    pub document_count: u64,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub deleted: bool,
}
