//! Compiled query execution
//!
//! Runs a validated [`CompiledQuery`] against a live handle. The last line
//! of write-prevention: an invalid query short-circuits here no matter what
//! the caller did, and only the three read verbs have execution paths.

use crate::compiler::{CompiledQuery, QueryKind};
use crate::connection::ConnectionHandle;
use crate::error::{LensError, Result};
use bson::{doc, Document};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Language-native result shape; the transport layer serializes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum QueryOutcome {
    Count(u64),
    Documents(Vec<Document>),
    Groups(Vec<Document>),
}

pub async fn execute(
    handle: &ConnectionHandle,
    db: &str,
    compiled: &CompiledQuery,
) -> Result<QueryOutcome> {
    if !compiled.is_valid {
        return Err(LensError::Validation(format!(
            "refusing to execute invalid query: {}",
            compiled.validation_errors.join("; ")
        )));
    }

    info!(
        collection = %compiled.collection,
        kind = ?compiled.kind,
        "executing compiled query"
    );

    match compiled.kind {
        QueryKind::Count => {
            let filter = compiled.query.clone().unwrap_or_else(|| doc! {});
            let count = handle
                .count_with_filter(db, &compiled.collection, filter)
                .await?;
            Ok(QueryOutcome::Count(count))
        }
        QueryKind::Find => {
            let filter = compiled.query.clone().unwrap_or_else(|| doc! {});
            let (projection, limit) = compiled
                .options
                .as_ref()
                .map(|o| (o.projection.clone(), o.limit))
                .unwrap_or((None, None));
            let docs = handle
                .execute_find(db, &compiled.collection, filter, projection, limit)
                .await?;
            Ok(QueryOutcome::Documents(docs))
        }
        QueryKind::Aggregate => {
            let pipeline = compiled.pipeline.clone().unwrap_or_default();
            let docs = handle
                .execute_aggregate(db, &compiled.collection, pipeline)
                .await?;
            Ok(QueryOutcome::Groups(docs))
        }
    }
}
