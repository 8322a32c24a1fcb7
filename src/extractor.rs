//! Schema extraction
//!
//! Samples every non-system collection of a connected database and folds the
//! sampled documents into a statistical schema: field paths, type tags,
//! requiredness, nesting and array-ness, plus a few representative values.
//! Best effort by nature; the sample is random and unordered, so optional
//! fields can flip requiredness between extractions.
//!
//! A failure at any stage aborts the whole extraction. Partial snapshots are
//! never returned.

use crate::config::LensConfig;
use crate::connection::ConnectionHandle;
use crate::error::Result;
use crate::schema::{CollectionSchema, FieldSchema, FieldType, SchemaSnapshot, SchemaStats};
use bson::{Bson, Document};
use chrono::Utc;
use std::collections::HashMap;
use tracing::{debug, info};

pub struct SchemaExtractor {
    config: LensConfig,
}

/// Per-path accumulator while folding the sample.
struct FieldAccumulator {
    field_type: FieldType,
    null_seen: bool,
    seen_count: usize,
    is_array: bool,
    is_nested: bool,
}

impl SchemaExtractor {
    pub fn new(config: LensConfig) -> Self {
        Self { config }
    }

    /// Extract a full snapshot for `db`. Collections are processed
    /// sequentially to bound load on the source; the three per-collection
    /// fetches (sample, exact count, indexes) run concurrently.
    pub async fn extract(&self, handle: &ConnectionHandle, db: &str) -> Result<SchemaSnapshot> {
        let names = handle.list_collections(db).await?;
        info!(db = %db, collections = names.len(), "starting schema extraction");

        let mut collections = Vec::with_capacity(names.len());
        for name in &names {
            let schema = self.analyze_collection(handle, db, name).await?;
            debug!(
                collection = %name,
                fields = schema.fields.len(),
                documents = schema.document_count,
                "analyzed collection"
            );
            collections.push(schema);
        }

        let stats = snapshot_stats(&collections);
        Ok(SchemaSnapshot {
            collections,
            relationships: Vec::new(),
            stats,
            last_synced: Utc::now(),
        })
    }

    async fn analyze_collection(
        &self,
        handle: &ConnectionHandle,
        db: &str,
        name: &str,
    ) -> Result<CollectionSchema> {
        let (sample, document_count, indexes) = tokio::try_join!(
            handle.sample_collection(db, name, self.config.sample_size),
            handle.exact_count(db, name),
            handle.list_indexes(db, name),
        )?;

        let mut fields = fold_documents(&sample, self.config.max_field_depth);
        attach_sample_values(&mut fields, &sample, self.config.sample_values_per_field);

        let sample_document = sample
            .first()
            .map(|d| Bson::Document(d.clone()).into_relaxed_extjson());

        Ok(CollectionSchema {
            name: name.to_string(),
            fields,
            indexes: indexes
                .into_iter()
                .map(|d| Bson::Document(d).into_relaxed_extjson())
                .collect(),
            document_count,
            sample_document,
        })
    }
}

/// Fold a document sample into per-path field schemas, in first-seen order.
///
/// Walks nested objects (not arrays) up to `max_depth` path segments. A
/// field is `required` only if every sampled document carried a non-null
/// value for it; `mixed` is the collapse state for conflicting types.
pub fn fold_documents(sample: &[Document], max_depth: usize) -> Vec<FieldSchema> {
    let mut order: Vec<String> = Vec::new();
    let mut acc: HashMap<String, FieldAccumulator> = HashMap::new();

    for doc in sample {
        walk_document(doc, "", 1, max_depth, &mut order, &mut acc);
    }

    let total = sample.len();
    order
        .into_iter()
        .map(|path| {
            let a = acc.remove(&path).expect("accumulator exists for every ordered path");
            FieldSchema {
                required: total > 0 && a.seen_count == total && !a.null_seen,
                name: path,
                field_type: a.field_type,
                is_array: a.is_array,
                is_nested: a.is_nested,
                sample_values: Vec::new(),
            }
        })
        .collect()
}

fn walk_document(
    doc: &Document,
    prefix: &str,
    depth: usize,
    max_depth: usize,
    order: &mut Vec<String>,
    acc: &mut HashMap<String, FieldAccumulator>,
) {
    for (key, value) in doc {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        observe(&path, value, depth, order, acc);

        if let Bson::Document(nested) = value {
            if depth < max_depth {
                walk_document(nested, &path, depth + 1, max_depth, order, acc);
            }
        }
    }
}

fn observe(
    path: &str,
    value: &Bson,
    depth: usize,
    order: &mut Vec<String>,
    acc: &mut HashMap<String, FieldAccumulator>,
) {
    let observed = tag_of(value);
    let is_null = matches!(observed, FieldType::Null | FieldType::Undefined);

    match acc.get_mut(path) {
        Some(a) => {
            a.field_type = a.field_type.merge(observed);
            a.null_seen = a.null_seen || is_null;
            a.seen_count += 1;
            a.is_array = a.is_array || observed == FieldType::Array;
        }
        None => {
            order.push(path.to_string());
            acc.insert(
                path.to_string(),
                FieldAccumulator {
                    field_type: observed,
                    null_seen: is_null,
                    seen_count: 1,
                    is_array: observed == FieldType::Array,
                    is_nested: depth > 1,
                },
            );
        }
    }
}

/// Map a BSON value onto the closed field-type tag set.
pub fn tag_of(value: &Bson) -> FieldType {
    match value {
        Bson::Null => FieldType::Null,
        Bson::Undefined => FieldType::Undefined,
        Bson::Boolean(_) => FieldType::Bool,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => {
            FieldType::Number
        }
        Bson::String(_) | Bson::Symbol(_) | Bson::RegularExpression(_) | Bson::JavaScriptCode(_) => {
            FieldType::String
        }
        Bson::DateTime(_) | Bson::Timestamp(_) => FieldType::Date,
        Bson::ObjectId(_) => FieldType::ObjectId,
        Bson::Binary(_) => FieldType::Binary,
        Bson::Array(_) => FieldType::Array,
        Bson::Document(_) => FieldType::Object,
        _ => FieldType::Mixed,
    }
}

/// Second pass over the same sample: attach up to `cap` representative
/// non-null values per field path.
pub fn attach_sample_values(fields: &mut [FieldSchema], sample: &[Document], cap: usize) {
    for field in fields.iter_mut() {
        for doc in sample {
            if field.sample_values.len() >= cap {
                break;
            }
            if let Some(value) = lookup_path(doc, &field.name) {
                if !matches!(value, Bson::Null | Bson::Undefined) {
                    field.sample_values.push(value.clone().into_relaxed_extjson());
                }
            }
        }
    }
}

/// Resolve a dot-separated path inside a document. Does not descend into
/// arrays, mirroring the fold.
fn lookup_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut current = doc;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let value = current.get(segment)?;
        if segments.peek().is_none() {
            return Some(value);
        }
        match value {
            Bson::Document(nested) => current = nested,
            _ => return None,
        }
    }
    None
}

fn snapshot_stats(collections: &[CollectionSchema]) -> SchemaStats {
    let total_collections = collections.len();
    let total_documents = collections.iter().map(|c| c.document_count).sum();
    let total_fields: usize = collections.iter().map(|c| c.fields.len()).sum();
    let average_field_count = if total_collections == 0 {
        0
    } else {
        (total_fields as f64 / total_collections as f64).round() as u64
    };
    SchemaStats {
        total_collections,
        total_documents,
        average_field_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use bson::oid::ObjectId;

    #[test]
    fn fold_tracks_first_seen_order_and_types() {
        let sample = vec![
            doc! { "name": "ada", "age": 36 },
            doc! { "age": 37, "name": "grace" },
        ];
        let fields = fold_documents(&sample, 3);
        let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["name", "age"]);
        assert_eq!(fields[0].field_type, FieldType::String);
        assert_eq!(fields[1].field_type, FieldType::Number);
        assert!(fields[0].required && fields[1].required);
    }

    #[test]
    fn conflicting_types_collapse_to_mixed() {
        let sample = vec![doc! { "v": "text" }, doc! { "v": 12 }];
        let fields = fold_documents(&sample, 3);
        assert_eq!(fields[0].field_type, FieldType::Mixed);
    }

    #[test]
    fn absence_and_null_degrade_required() {
        let sample = vec![
            doc! { "a": 1, "b": 1, "c": 1 },
            doc! { "a": 1, "b": Bson::Null },
        ];
        let fields = fold_documents(&sample, 3);
        let by_name: HashMap<_, _> = fields.iter().map(|f| (f.name.as_str(), f)).collect();
        assert!(by_name["a"].required);
        assert!(!by_name["b"].required, "observed null degrades required");
        assert!(!by_name["c"].required, "absence degrades required");
        // null observation keeps the established type
        assert_eq!(by_name["b"].field_type, FieldType::Number);
    }

    #[test]
    fn nested_objects_walked_to_depth_cap() {
        let sample = vec![doc! {
            "a": { "b": { "c": { "d": 1 } } }
        }];
        let fields = fold_documents(&sample, 3);
        let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "a.b", "a.b.c"]);
        let deepest = fields.iter().find(|f| f.name == "a.b.c").unwrap();
        assert_eq!(deepest.field_type, FieldType::Object);
        assert!(deepest.is_nested);
        assert!(!fields[0].is_nested);
    }

    #[test]
    fn arrays_are_tagged_but_not_recursed() {
        let sample = vec![doc! { "tags": ["a", "b"], "items": [{ "sku": 1 }] }];
        let fields = fold_documents(&sample, 3);
        let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["tags", "items"]);
        assert!(fields.iter().all(|f| f.is_array));
        assert!(fields.iter().all(|f| f.field_type == FieldType::Array));
    }

    #[test]
    fn empty_sample_yields_no_fields() {
        let fields = fold_documents(&[], 3);
        assert!(fields.is_empty());
    }

    #[test]
    fn object_ids_and_dates_get_their_own_tags() {
        let sample = vec![doc! {
            "_id": ObjectId::new(),
            "created": bson::DateTime::now(),
        }];
        let fields = fold_documents(&sample, 3);
        assert_eq!(fields[0].field_type, FieldType::ObjectId);
        assert_eq!(fields[1].field_type, FieldType::Date);
    }

    #[test]
    fn sample_values_capped_and_skip_nulls() {
        let sample = vec![
            doc! { "v": Bson::Null },
            doc! { "v": 1 },
            doc! { "v": 2 },
            doc! { "v": 3 },
            doc! { "v": 4 },
        ];
        let mut fields = fold_documents(&sample, 3);
        attach_sample_values(&mut fields, &sample, 3);
        assert_eq!(fields[0].sample_values.len(), 3);
        assert_eq!(fields[0].sample_values[0], serde_json::json!(1));
    }

    #[test]
    fn lookup_path_resolves_nested_but_not_arrays() {
        let d = doc! { "a": { "b": 7 }, "arr": [{ "x": 1 }] };
        assert_eq!(lookup_path(&d, "a.b"), Some(&Bson::Int32(7)));
        assert!(lookup_path(&d, "arr.x").is_none());
        assert!(lookup_path(&d, "a.missing").is_none());
    }

    #[test]
    fn stats_average_is_rounded() {
        let mk = |name: &str, n: usize| CollectionSchema {
            name: name.into(),
            fields: (0..n)
                .map(|i| FieldSchema {
                    name: format!("f{}", i),
                    field_type: FieldType::String,
                    required: true,
                    is_array: false,
                    is_nested: false,
                    sample_values: vec![],
                })
                .collect(),
            indexes: vec![],
            document_count: 10,
            sample_document: None,
        };
        let stats = snapshot_stats(&[mk("a", 3), mk("b", 4)]);
        assert_eq!(stats.total_collections, 2);
        assert_eq!(stats.total_documents, 20);
        assert_eq!(stats.average_field_count, 4); // 3.5 rounds up
    }
}
