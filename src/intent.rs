//! Intent parsing
//!
//! Converts a free-text user message plus the current schema snapshot into a
//! typed query intent with a confidence score. Not NLP: a linear pass of
//! ordered literal pattern rules, so the classification priority
//! (count > aggregate > find > schema > relationship > general) is enforced
//! by construction. Parsing never fails; an unintelligible message simply
//! comes back as a low-confidence `General` intent.

use crate::schema::SchemaSnapshot;
use bson::Bson;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentType {
    Count,
    Aggregate,
    Find,
    Schema,
    Relationship,
    General,
}

/// A coerced filter value. Kept as a closed variant rather than raw JSON so
/// the coercion rules (bool, then number, then string) stay explicit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FilterValue {
    pub fn coerce(raw: &str) -> FilterValue {
        let trimmed = raw.trim_matches(|c| c == '"' || c == '\'');
        if trimmed.eq_ignore_ascii_case("true") {
            return FilterValue::Bool(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return FilterValue::Bool(false);
        }
        if let Ok(n) = trimmed.parse::<f64>() {
            return FilterValue::Number(n);
        }
        FilterValue::Text(trimmed.to_string())
    }

    pub fn to_bson(&self) -> Bson {
        match self {
            FilterValue::Bool(b) => Bson::Boolean(*b),
            FilterValue::Number(n) => Bson::Double(*n),
            FilterValue::Text(s) => Bson::String(s.clone()),
        }
    }
}

/// Structured interpretation of one user message. Immutable once built;
/// purely a function of (message, snapshot).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryIntent {
    #[serde(rename = "type")]
    pub intent_type: IntentType,
    pub collection: Option<String>,
    pub collections: Vec<String>,
    pub filters: BTreeMap<String, FilterValue>,
    pub fields: Vec<String>,
    /// Group-by field for aggregations, when the message asked for one.
    pub aggregation_stage: Option<String>,
    pub limit: Option<i64>,
    pub confidence: f64,
    pub explanation: String,
}

/// Ordered classification rules; the first bucket with a keyword hit wins.
const CLASSIFICATION_RULES: &[(IntentType, &[&str])] = &[
    (
        IntentType::Count,
        &["how many", "count", "number of", "total number"],
    ),
    (
        IntentType::Aggregate,
        &[
            "average", "avg", "sum of", "group by", "grouped by", "maximum", "minimum",
            "aggregate",
        ],
    ),
    (
        IntentType::Find,
        &[
            "show", "find", "get", "list", "display", "select", "give me", "what are",
        ],
    ),
    (
        IntentType::Schema,
        &["schema", "structure", "fields", "columns", "describe", "what does"],
    ),
    (
        IntentType::Relationship,
        &["related", "relationship", "connected", "linked", "references"],
    ),
];

lazy_static! {
    static ref WHERE_FILTER: Regex =
        Regex::new(r#"(?i)\bwhere\s+([\w.]+)\s+(?:is|equals|=)\s+("[^"]+"|'[^']+'|[$\w.-]+)"#)
            .unwrap();
    static ref GENERIC_FILTER: Regex =
        Regex::new(r#"([\w.]+)\s*[:=]\s*("[^"]+"|'[^']+'|[$\w.-]+)"#).unwrap();
    static ref FIELD_LIST: Regex =
        Regex::new(r"(?i)\b(?:show|get|display|select)\s+(?:me\s+)?(.+?)(?:\s+(?:from|in)\s|$)")
            .unwrap();
    static ref LIMIT: Regex = Regex::new(r"(?i)\b(?:limit|top|first)\s+(\d+)").unwrap();
    static ref GROUP_BY: Regex = Regex::new(r"(?i)\bgroup(?:ed)?\s+by\s+([\w.]+)").unwrap();
}

pub struct IntentParser {
    max_limit: i64,
}

impl IntentParser {
    pub fn new(max_limit: i64) -> Self {
        Self { max_limit }
    }

    pub fn parse(&self, message: &str, snapshot: &SchemaSnapshot) -> QueryIntent {
        let lowered = message.to_lowercase();

        let intent_type = classify(&lowered);
        let collections = mentioned_collections(&lowered, snapshot);
        let collection = collections.first().cloned();
        let filters = extract_filters(message);
        let fields = match &collection {
            Some(name) => extract_fields(message, name, snapshot),
            None => Vec::new(),
        };
        let aggregation_stage = GROUP_BY
            .captures(message)
            .map(|c| c[1].to_string());
        let limit = extract_limit(message, self.max_limit);

        let confidence = score(intent_type, collection.is_some(), !filters.is_empty());

        let explanation = format!(
            "Classified as {:?}{}{}{}",
            intent_type,
            collection
                .as_deref()
                .map(|c| format!(" against collection '{}'", c))
                .unwrap_or_default(),
            if filters.is_empty() {
                String::new()
            } else {
                format!(" with {} filter(s)", filters.len())
            },
            limit
                .map(|l| format!(", limit {}", l))
                .unwrap_or_default(),
        );

        debug!(
            intent = ?intent_type,
            collection = ?collection,
            confidence,
            "parsed intent"
        );

        QueryIntent {
            intent_type,
            collection,
            collections,
            filters,
            fields,
            aggregation_stage,
            limit,
            confidence,
            explanation,
        }
    }
}

fn classify(lowered: &str) -> IntentType {
    for (intent_type, keywords) in CLASSIFICATION_RULES {
        if keywords.iter().any(|kw| lowered.contains(kw)) {
            return *intent_type;
        }
    }
    IntentType::General
}

/// A collection is "mentioned" when its lowercased name appears as a literal
/// substring of the message. Mentions are ordered by where they occur in the
/// message, so the primary collection is the first one the user named, not
/// an accident of snapshot ordering.
fn mentioned_collections(lowered: &str, snapshot: &SchemaSnapshot) -> Vec<String> {
    let mut hits: Vec<(usize, String)> = snapshot
        .collections
        .iter()
        .filter_map(|c| {
            lowered
                .find(&c.name.to_lowercase())
                .map(|pos| (pos, c.name.clone()))
        })
        .collect();
    hits.sort_by_key(|(pos, _)| *pos);
    hits.into_iter().map(|(_, name)| name).collect()
}

/// Two ordered passes: the explicit `where <field> is|equals|= <value>`
/// form, then the generic `<field>[:=]<value>` form. The generic pass never
/// overwrites a field the first pass already set. Field names are kept
/// exactly as written; MongoDB field names are case-sensitive, so folding
/// `userId` to `userid` would silently match nothing.
fn extract_filters(message: &str) -> BTreeMap<String, FilterValue> {
    let mut filters = BTreeMap::new();
    for caps in WHERE_FILTER.captures_iter(message) {
        filters.insert(caps[1].to_string(), FilterValue::coerce(&caps[2]));
    }
    for caps in GENERIC_FILTER.captures_iter(message) {
        filters
            .entry(caps[1].to_string())
            .or_insert_with(|| FilterValue::coerce(&caps[2]));
    }
    filters
}

/// Requested projection fields: only attempted when a collection was
/// mentioned, and only field names the schema actually knows about.
fn extract_fields(message: &str, collection: &str, snapshot: &SchemaSnapshot) -> Vec<String> {
    let Some(schema) = snapshot.collection(collection) else {
        return Vec::new();
    };
    let Some(caps) = FIELD_LIST.captures(message) else {
        return Vec::new();
    };
    let fragment = caps[1].to_lowercase();
    schema
        .fields
        .iter()
        .filter(|f| fragment.contains(&f.name.to_lowercase()))
        .map(|f| f.name.clone())
        .collect()
}

fn extract_limit(message: &str, max_limit: i64) -> Option<i64> {
    LIMIT
        .captures(message)
        .and_then(|c| c[1].parse::<i64>().ok())
        .map(|n| n.min(max_limit))
}

/// Additive, order-dependent confidence scoring. Downstream execution gating
/// depends on these exact increments, so they never change silently:
/// 0.5 base, +0.3 collection mentioned, +0.15 any filter, +0.15 non-general
/// type, then a further +0.2 for find-with-collection, clamping to 1.0 at
/// each step.
fn score(intent_type: IntentType, has_collection: bool, has_filters: bool) -> f64 {
    let mut confidence: f64 = 0.5;
    if has_collection {
        confidence = (confidence + 0.3).min(1.0);
    }
    if has_filters {
        confidence = (confidence + 0.15).min(1.0);
    }
    if intent_type != IntentType::General {
        confidence = (confidence + 0.15).min(1.0);
    }
    if intent_type == IntentType::Find && has_collection {
        confidence = (confidence + 0.2).min(1.0);
    }
    confidence
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CollectionSchema, FieldSchema, FieldType, SchemaStats};
    use chrono::Utc;

    fn snapshot() -> SchemaSnapshot {
        let field = |name: &str, ft: FieldType| FieldSchema {
            name: name.to_string(),
            field_type: ft,
            required: true,
            is_array: false,
            is_nested: false,
            sample_values: vec![],
        };
        SchemaSnapshot {
            collections: vec![
                CollectionSchema {
                    name: "users".into(),
                    fields: vec![
                        field("_id", FieldType::ObjectId),
                        field("name", FieldType::String),
                        field("email", FieldType::String),
                        field("active", FieldType::Bool),
                    ],
                    indexes: vec![],
                    document_count: 100,
                    sample_document: None,
                },
                CollectionSchema {
                    name: "orders".into(),
                    fields: vec![
                        field("_id", FieldType::ObjectId),
                        field("status", FieldType::String),
                        field("total", FieldType::Number),
                    ],
                    indexes: vec![],
                    document_count: 500,
                    sample_document: None,
                },
            ],
            relationships: vec![],
            stats: SchemaStats {
                total_collections: 2,
                total_documents: 600,
                average_field_count: 4,
            },
            last_synced: Utc::now(),
        }
    }

    fn parser() -> IntentParser {
        IntentParser::new(1000)
    }

    #[test]
    fn count_question_classifies_with_high_confidence() {
        let intent = parser().parse("how many users are there", &snapshot());
        assert_eq!(intent.intent_type, IntentType::Count);
        assert_eq!(intent.collection.as_deref(), Some("users"));
        assert!(intent.confidence >= 0.8);
    }

    #[test]
    fn count_wins_over_find_when_both_match() {
        // "show" (find) and "how many" (count) both present
        let intent = parser().parse("show me how many orders exist", &snapshot());
        assert_eq!(intent.intent_type, IntentType::Count);
    }

    #[test]
    fn where_filter_and_limit_extracted() {
        let intent = parser().parse("show orders where status = shipped limit 20", &snapshot());
        assert_eq!(intent.intent_type, IntentType::Find);
        assert_eq!(intent.collection.as_deref(), Some("orders"));
        assert_eq!(
            intent.filters.get("status"),
            Some(&FilterValue::Text("shipped".into()))
        );
        assert_eq!(intent.limit, Some(20));
        assert!((intent.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn generic_filter_does_not_overwrite_where_filter() {
        let intent = parser().parse(
            "find orders where status is shipped and status:pending",
            &snapshot(),
        );
        assert_eq!(
            intent.filters.get("status"),
            Some(&FilterValue::Text("shipped".into()))
        );
    }

    #[test]
    fn filter_values_are_coerced() {
        let intent = parser().parse("find users where active = true and age:42", &snapshot());
        assert_eq!(intent.filters.get("active"), Some(&FilterValue::Bool(true)));
        assert_eq!(intent.filters.get("age"), Some(&FilterValue::Number(42.0)));
    }

    #[test]
    fn limit_is_capped() {
        let intent = parser().parse("show me top 5000 users", &snapshot());
        assert_eq!(intent.limit, Some(1000));
    }

    #[test]
    fn fields_matched_only_against_known_schema() {
        let intent = parser().parse("show name and email from users", &snapshot());
        assert_eq!(intent.fields, vec!["name".to_string(), "email".to_string()]);
    }

    #[test]
    fn fields_skipped_without_collection_mention() {
        let intent = parser().parse("show name and email", &snapshot());
        assert!(intent.fields.is_empty());
        assert!(intent.collection.is_none());
    }

    #[test]
    fn group_by_field_captured() {
        let intent = parser().parse("average total grouped by status in orders", &snapshot());
        assert_eq!(intent.intent_type, IntentType::Aggregate);
        assert_eq!(intent.aggregation_stage.as_deref(), Some("status"));
    }

    #[test]
    fn unrecognized_message_is_low_confidence_general() {
        let intent = parser().parse("hello there", &snapshot());
        assert_eq!(intent.intent_type, IntentType::General);
        assert!((intent.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn confidence_is_monotonic_and_bounded() {
        let none = score(IntentType::General, false, false);
        let coll = score(IntentType::General, true, false);
        let coll_filters = score(IntentType::General, true, true);
        let typed = score(IntentType::Count, true, true);
        let find = score(IntentType::Find, true, true);
        assert!(none <= coll && coll <= coll_filters && coll_filters <= typed && typed <= find);
        assert!(find <= 1.0);
    }

    #[test]
    fn camel_case_filter_fields_are_preserved() {
        let intent = parser().parse("how many orders where userId = 42", &snapshot());
        assert_eq!(intent.filters.get("userId"), Some(&FilterValue::Number(42.0)));
        assert!(!intent.filters.contains_key("userid"));
    }

    #[test]
    fn primary_collection_is_first_mentioned_in_message() {
        // snapshot order is [users, orders]; the message names orders first
        let intent = parser().parse("orders placed by users", &snapshot());
        assert_eq!(intent.collection.as_deref(), Some("orders"));
        assert_eq!(
            intent.collections,
            vec!["orders".to_string(), "users".to_string()]
        );
    }

    #[test]
    fn multiple_mentions_keep_first_as_primary() {
        let intent = parser().parse("list users and their orders", &snapshot());
        assert_eq!(intent.collection.as_deref(), Some("users"));
        assert_eq!(intent.collections, vec!["users".to_string(), "orders".to_string()]);
    }
}
