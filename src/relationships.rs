//! Relationship detection
//!
//! Infers foreign-key-like edges between collections purely from field
//! naming conventions and collection-name matching over an extracted
//! schema. No I/O, no value inspection beyond the already-folded type tags.
//! Both false negatives and false positives are expected; the output is a
//! hint for the intent parser and prompt builder, not ground truth.

use crate::schema::{
    CollectionSchema, FieldType, Relationship, RelationshipDirection, RelationshipType,
};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, HashSet};

lazy_static! {
    /// H1: reference-suffix family on the field name.
    static ref REF_SUFFIX: Regex = Regex::new(r"(?i)^(.+)_(ids?|refs?)$").unwrap();

    /// H2: ordered base-name extractors for objectId-typed fields.
    /// First match wins.
    static ref ID_SUFFIXES: Vec<Regex> = vec![
        Regex::new(r"^(.+?)Id$").unwrap(),
        Regex::new(r"(?i)^(.+?)_id$").unwrap(),
        Regex::new(r"^(.+?)Ref$").unwrap(),
        Regex::new(r"(?i)^(.+?)_ref$").unwrap(),
    ];
}

/// Detect relationships across `collections`. Deterministic and
/// order-independent: results are deduplicated on `(from, to, field)` and
/// sorted.
pub fn detect(collections: &[CollectionSchema]) -> Vec<Relationship> {
    // lowercase -> canonical collection name
    let known: HashMap<String, &str> = collections
        .iter()
        .map(|c| (c.name.to_lowercase(), c.name.as_str()))
        .collect();

    let mut seen: HashSet<(String, String, String)> = HashSet::new();
    let mut edges = Vec::new();

    for collection in collections {
        for field in &collection.fields {
            let mut targets: Vec<&str> = Vec::new();

            // H1: name carries a reference suffix
            if let Some(caps) = REF_SUFFIX.captures(&field.name) {
                if let Some(target) = resolve_collection(&caps[1], &known) {
                    targets.push(target);
                }
            }

            // H2: objectId-typed field that is not the primary key
            if field.field_type == FieldType::ObjectId && field.name != "_id" {
                let base = strip_id_suffix(&field.name);
                if let Some(target) = resolve_collection(base, &known) {
                    targets.push(target);
                }
            }

            for target in targets {
                let triple = (
                    collection.name.clone(),
                    target.to_string(),
                    field.name.clone(),
                );
                if !seen.insert(triple) {
                    continue;
                }
                edges.push(Relationship {
                    from: collection.name.clone(),
                    to: target.to_string(),
                    field: field.name.clone(),
                    relationship_type: if field.is_array {
                        RelationshipType::OneToMany
                    } else {
                        RelationshipType::OneToOne
                    },
                    direction: RelationshipDirection::Forward,
                });
            }
        }
    }

    edges.sort_by(|a, b| {
        (&a.from, &a.to, &a.field).cmp(&(&b.from, &b.to, &b.field))
    });
    edges
}

/// Strip the first matching reference suffix; an unmatched name is used
/// as-is (an objectId field named `author` can still point at `authors`).
fn strip_id_suffix(name: &str) -> &str {
    for re in ID_SUFFIXES.iter() {
        if let Some(caps) = re.captures(name) {
            return name[..caps.get(1).unwrap().end()].trim_end_matches('_');
        }
    }
    name
}

/// Match a base name against the known collections: exact form first, then
/// pluralized (+s), then singularized (-s). First match wins.
fn resolve_collection<'a>(base: &str, known: &HashMap<String, &'a str>) -> Option<&'a str> {
    let base = base.to_lowercase();
    if base.is_empty() {
        return None;
    }
    if let Some(name) = known.get(&base) {
        return Some(name);
    }
    if let Some(name) = known.get(&format!("{}s", base)) {
        return Some(name);
    }
    if let Some(stripped) = base.strip_suffix('s') {
        if let Some(name) = known.get(stripped) {
            return Some(name);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSchema;

    fn coll(name: &str, fields: Vec<FieldSchema>) -> CollectionSchema {
        CollectionSchema {
            name: name.to_string(),
            fields,
            indexes: vec![],
            document_count: 0,
            sample_document: None,
        }
    }

    fn field(name: &str, field_type: FieldType, is_array: bool) -> FieldSchema {
        FieldSchema {
            name: name.to_string(),
            field_type,
            required: true,
            is_array,
            is_nested: false,
            sample_values: vec![],
        }
    }

    #[test]
    fn object_id_field_links_to_pluralized_collection() {
        let collections = vec![
            coll("orders", vec![field("userId", FieldType::ObjectId, false)]),
            coll("users", vec![field("_id", FieldType::ObjectId, false)]),
        ];
        let edges = detect(&collections);
        assert_eq!(edges.len(), 1);
        let edge = &edges[0];
        assert_eq!(edge.from, "orders");
        assert_eq!(edge.to, "users");
        assert_eq!(edge.field, "userId");
        assert_eq!(edge.relationship_type, RelationshipType::OneToOne);
        assert_eq!(edge.direction, RelationshipDirection::Forward);
    }

    #[test]
    fn array_reference_is_one_to_many() {
        let collections = vec![
            coll("users", vec![field("order_ids", FieldType::Array, true)]),
            coll("orders", vec![]),
        ];
        // suffix family strips `_id`; base `order` pluralizes to `orders`
        let edges = detect(&collections);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].relationship_type, RelationshipType::OneToMany);
    }

    #[test]
    fn both_heuristics_on_one_field_produce_one_edge() {
        let collections = vec![
            coll("orders", vec![field("user_id", FieldType::ObjectId, false)]),
            coll("users", vec![]),
        ];
        let edges = detect(&collections);
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn primary_key_is_never_a_reference() {
        let collections = vec![
            coll("ids", vec![field("_id", FieldType::ObjectId, false)]),
            coll("id", vec![]),
        ];
        assert!(detect(&collections).is_empty());
    }

    #[test]
    fn unmatched_base_name_yields_no_edge() {
        let collections = vec![
            coll("orders", vec![field("warehouseId", FieldType::ObjectId, false)]),
            coll("users", vec![]),
        ];
        assert!(detect(&collections).is_empty());
    }

    #[test]
    fn detection_is_order_independent() {
        let a = coll("orders", vec![field("userId", FieldType::ObjectId, false)]);
        let b = coll(
            "users",
            vec![field("profile_ref", FieldType::String, false)],
        );
        let c = coll("profiles", vec![]);

        let forward = detect(&[a.clone(), b.clone(), c.clone()]);
        let reversed = detect(&[c, b, a]);
        assert_eq!(forward, reversed);
        assert_eq!(forward.len(), 2);
    }

    #[test]
    fn singular_collection_name_matches_plural_base() {
        // base `invoices` from `invoicesId` singularizes to `invoice`
        let collections = vec![
            coll("payments", vec![field("invoicesId", FieldType::ObjectId, false)]),
            coll("invoice", vec![]),
        ];
        let edges = detect(&collections);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].to, "invoice");
    }
}
