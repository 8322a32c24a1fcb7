//! Schema data model
//!
//! Value types produced by schema extraction: per-field shape information,
//! per-collection schemas, inferred relationships, and the immutable
//! database-level snapshot. A snapshot is never patched in place; a fresh
//! extraction always builds a wholly new one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed tag set for observed field types.
///
/// `Mixed` is the collapse state for a field observed with conflicting
/// primitive types across samples; downstream consumers treat it as
/// "unknown, exclude from default projections".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    Null,
    Undefined,
    Bool,
    Number,
    String,
    Date,
    ObjectId,
    Binary,
    Array,
    Object,
    Mixed,
}

impl FieldType {
    /// Fold another observation into this type tag.
    ///
    /// Null/undefined observations never change an established type (they
    /// only degrade requiredness, which the caller tracks); a genuine
    /// conflict between two concrete types collapses to `Mixed`, and
    /// `Mixed` is terminal.
    pub fn merge(self, other: FieldType) -> FieldType {
        match (self, other) {
            (a, b) if a == b => a,
            (FieldType::Mixed, _) | (_, FieldType::Mixed) => FieldType::Mixed,
            (FieldType::Null, b) | (FieldType::Undefined, b) => b,
            (a, FieldType::Null) | (a, FieldType::Undefined) => a,
            _ => FieldType::Mixed,
        }
    }
}

/// One observed field path within a collection.
///
/// `name` is the full dot-separated path for nested fields, capped at the
/// extractor's depth limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchema {
    pub name: String,

    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// True only if every sampled document carried a non-null value.
    /// Degrades to false on any observed null/absence and never recovers.
    pub required: bool,

    pub is_array: bool,

    pub is_nested: bool,

    /// Up to a configured handful of representative values.
    #[serde(default)]
    pub sample_values: Vec<serde_json::Value>,
}

/// Schema for one collection: observed fields in first-seen order, raw index
/// metadata, the exact document count, and one representative document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
    pub indexes: Vec<serde_json::Value>,
    pub document_count: u64,
    pub sample_document: Option<serde_json::Value>,
}

impl CollectionSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipType {
    OneToOne,
    OneToMany,
    ManyToMany,
}

/// Direction of an inferred edge. The detector currently only emits
/// `Forward`; the other variants are part of the stored model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipDirection {
    Forward,
    Reverse,
    Bidirectional,
}

/// A directed foreign-key-like edge between two collections, inferred from
/// naming conventions. A hint, not ground truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub from: String,
    pub to: String,
    pub field: String,
    #[serde(rename = "type")]
    pub relationship_type: RelationshipType,
    pub direction: RelationshipDirection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaStats {
    pub total_collections: usize,
    pub total_documents: u64,
    pub average_field_count: u64,
}

/// Immutable database-level schema description at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSnapshot {
    pub collections: Vec<CollectionSchema>,
    pub relationships: Vec<Relationship>,
    pub stats: SchemaStats,
    pub last_synced: DateTime<Utc>,
}

impl SchemaSnapshot {
    pub fn collection(&self, name: &str) -> Option<&CollectionSchema> {
        self.collections.iter().find(|c| c.name == name)
    }

    pub fn collection_names(&self) -> Vec<&str> {
        self.collections.iter().map(|c| c.name.as_str()).collect()
    }
}
