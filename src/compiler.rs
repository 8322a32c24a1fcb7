//! Query compilation and validation
//!
//! Deterministically turns a parsed intent into a concrete, bounded,
//! read-only query against one named collection, then runs a structural
//! safety gate over the result. Only three read verbs are ever constructed
//! (count, find, aggregate); the gate additionally rejects any write
//! operator appearing as a key in the filter or pipeline, so a future
//! extension cannot quietly introduce a write path. Compilation never
//! errors; a bad intent yields `is_valid: false` with explanatory text.

use crate::intent::{IntentType, QueryIntent};
use crate::schema::{FieldType, SchemaSnapshot};
use bson::{doc, Bson, Document};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// The only query kinds this engine will ever execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    Count,
    Find,
    Aggregate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection: Option<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

/// A compiled, executable read-only operation. Once `is_valid` is false it
/// stays false; callers re-derive a fresh query instead of repairing one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledQuery {
    #[serde(rename = "type")]
    pub kind: QueryKind,
    pub collection: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<Vec<Document>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<QueryOptions>,
    pub is_valid: bool,
    pub validation_errors: Vec<String>,
}

impl CompiledQuery {
    fn invalid(collection: &str, error: String) -> Self {
        CompiledQuery {
            kind: QueryKind::Find,
            collection: collection.to_string(),
            query: None,
            pipeline: None,
            options: None,
            is_valid: false,
            validation_errors: vec![error],
        }
    }
}

/// Write operators that must never appear as keys in anything this engine
/// executes. Values containing these strings are data and pass.
const WRITE_OPERATORS: &[&str] = &[
    "$set", "$unset", "$push", "$pull", "$inc", "$rename", "$out", "$merge",
];

/// How many schema fields a default projection carries.
const DEFAULT_PROJECTION_WIDTH: usize = 8;

pub struct QueryCompiler {
    default_find_limit: i64,
    default_aggregate_limit: i64,
}

impl QueryCompiler {
    pub fn new(default_find_limit: i64, default_aggregate_limit: i64) -> Self {
        Self {
            default_find_limit,
            default_aggregate_limit,
        }
    }

    pub fn compile(&self, intent: &QueryIntent, snapshot: &SchemaSnapshot) -> CompiledQuery {
        let Some(collection) = intent.collection.as_deref() else {
            return CompiledQuery::invalid(
                "",
                "No collection could be resolved from the message".to_string(),
            );
        };
        let Some(schema) = snapshot.collection(collection) else {
            return CompiledQuery::invalid(
                collection,
                format!("Collection '{}' does not exist in the schema", collection),
            );
        };

        let filters = filters_to_document(intent);

        let mut compiled = match intent.intent_type {
            IntentType::Count => CompiledQuery {
                kind: QueryKind::Count,
                collection: collection.to_string(),
                query: Some(filters),
                pipeline: None,
                options: None,
                is_valid: true,
                validation_errors: Vec::new(),
            },
            IntentType::Aggregate => {
                let mut pipeline = Vec::new();
                if !filters.is_empty() {
                    pipeline.push(doc! { "$match": filters });
                }
                if let Some(group_field) = &intent.aggregation_stage {
                    pipeline.push(doc! {
                        "$group": {
                            "_id": format!("${}", group_field),
                            "count": { "$sum": 1 },
                        }
                    });
                }
                pipeline.push(doc! {
                    "$limit": intent.limit.unwrap_or(self.default_aggregate_limit)
                });
                CompiledQuery {
                    kind: QueryKind::Aggregate,
                    collection: collection.to_string(),
                    query: None,
                    pipeline: Some(pipeline),
                    options: None,
                    is_valid: true,
                    validation_errors: Vec::new(),
                }
            }
            // Find, and every non-query intent type, compiles as a find so
            // the caller always has something bounded to run.
            _ => {
                let projection = if intent.fields.is_empty() {
                    default_projection(schema)
                } else {
                    explicit_projection(&intent.fields)
                };
                CompiledQuery {
                    kind: QueryKind::Find,
                    collection: collection.to_string(),
                    query: Some(filters),
                    pipeline: None,
                    options: Some(QueryOptions {
                        projection,
                        limit: Some(intent.limit.unwrap_or(self.default_find_limit)),
                    }),
                    is_valid: true,
                    validation_errors: Vec::new(),
                }
            }
        };

        validate(&mut compiled);
        compiled
    }
}

fn filters_to_document(intent: &QueryIntent) -> Document {
    let mut filters = Document::new();
    for (field, value) in &intent.filters {
        filters.insert(field.clone(), value.to_bson());
    }
    filters
}

/// Deterministic compact projection: the first 8 fields that are not the
/// identifier and not binary or mixed typed (mixed means "type unknown").
fn default_projection(schema: &crate::schema::CollectionSchema) -> Option<Document> {
    let mut projection = Document::new();
    for field in schema
        .fields
        .iter()
        .filter(|f| {
            f.name != "_id"
                && f.field_type != FieldType::Binary
                && f.field_type != FieldType::Mixed
        })
        .take(DEFAULT_PROJECTION_WIDTH)
    {
        projection.insert(field.name.clone(), Bson::Int32(1));
    }
    if projection.is_empty() {
        None
    } else {
        Some(projection)
    }
}

fn explicit_projection(fields: &[String]) -> Option<Document> {
    let mut projection = Document::new();
    for field in fields {
        projection.insert(field.clone(), Bson::Int32(1));
    }
    Some(projection)
}

/// The safety gate. Always run on a compiled result; overrides its
/// tentative validity. Checks keys structurally, not serialized text, so a
/// *value* containing `$set` is data and passes while an operator key is
/// rejected.
fn validate(compiled: &mut CompiledQuery) {
    let mut offenders = Vec::new();
    if let Some(query) = &compiled.query {
        collect_write_operators(query, &mut offenders);
    }
    if let Some(pipeline) = &compiled.pipeline {
        for stage in pipeline {
            collect_write_operators(stage, &mut offenders);
        }
    }
    if !offenders.is_empty() {
        warn!(operators = ?offenders, "rejected compiled query containing write operators");
        compiled.is_valid = false;
        for op in offenders {
            compiled
                .validation_errors
                .push(format!("Write operator '{}' is not allowed", op));
        }
    }
}

fn collect_write_operators(doc: &Document, offenders: &mut Vec<String>) {
    for (key, value) in doc {
        if WRITE_OPERATORS.contains(&key.as_str()) {
            offenders.push(key.clone());
        }
        collect_from_bson(value, offenders);
    }
}

fn collect_from_bson(value: &Bson, offenders: &mut Vec<String>) {
    match value {
        Bson::Document(d) => collect_write_operators(d, offenders),
        Bson::Array(items) => {
            for item in items {
                collect_from_bson(item, offenders);
            }
        }
        _ => {}
    }
}
