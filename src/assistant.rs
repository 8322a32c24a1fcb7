//! Conversational engine
//!
//! The composition root wires one `DataAssistant` from explicitly
//! constructed parts (pool, cache, parser, compiler, generator) and passes
//! it around; nothing here is global. The assistant owns the execution
//! gate: a compiled query only runs when the parsed intent clears the
//! confidence threshold and survived validation, otherwise the reply falls
//! back to a schema-only conversational answer instead of surfacing an
//! error to the end user.

use crate::compiler::{CompiledQuery, QueryCompiler};
use crate::config::LensConfig;
use crate::connection::{database_name_from_uri, ConnectionPool};
use crate::error::{LensError, Result};
use crate::executor::{self, QueryOutcome};
use crate::extractor::SchemaExtractor;
use crate::intent::{IntentParser, QueryIntent};
use crate::llm::{self, ChatMessage, TextGenerator};
use crate::relationships;
use crate::schema::SchemaSnapshot;
use crate::schema_cache::SchemaCache;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything one user turn produced. `outcome` is present only when the
/// execution gate opened.
#[derive(Debug)]
pub struct AssistantReply {
    pub answer: String,
    pub intent: QueryIntent,
    pub compiled: CompiledQuery,
    pub outcome: Option<QueryOutcome>,
    pub tokens_used: u32,
}

pub struct DataAssistant {
    config: LensConfig,
    pool: Arc<ConnectionPool>,
    extractor: SchemaExtractor,
    cache: SchemaCache,
    parser: IntentParser,
    compiler: QueryCompiler,
    generator: Option<Arc<dyn TextGenerator>>,
}

impl DataAssistant {
    pub fn new(
        config: LensConfig,
        pool: Arc<ConnectionPool>,
        cache: SchemaCache,
        generator: Option<Arc<dyn TextGenerator>>,
    ) -> Self {
        let extractor = SchemaExtractor::new(config.clone());
        let parser = IntentParser::new(config.max_limit);
        let compiler = QueryCompiler::new(config.default_find_limit, config.default_aggregate_limit);
        Self {
            config,
            pool,
            extractor,
            cache,
            parser,
            compiler,
            generator,
        }
    }

    /// Fresh extraction plus relationship enrichment. Any stage failure
    /// aborts the whole extraction; partial snapshots are never returned.
    pub async fn extract_schema(&self, connection_string: &str) -> Result<SchemaSnapshot> {
        let db = target_database(connection_string)?;
        let handle = self.pool.acquire(connection_string).await?;
        let extracted = self.extractor.extract(&handle, &db).await;
        self.pool.release(connection_string);

        let mut snapshot = extracted?;
        snapshot.relationships = relationships::detect(&snapshot.collections);
        info!(
            collections = snapshot.stats.total_collections,
            relationships = snapshot.relationships.len(),
            "schema extraction complete"
        );
        Ok(snapshot)
    }

    /// Cached snapshot when fresh, extraction otherwise.
    pub async fn cached_or_fresh_schema(
        &self,
        project_id: &str,
        connection_string: &str,
    ) -> Result<SchemaSnapshot> {
        self.cache
            .get_or_extract(project_id, || self.extract_schema(connection_string))
            .await
    }

    /// Parse a message and compile the result in one step. Infallible by
    /// design: bad input comes back as low confidence / invalid, never Err.
    pub fn parse_and_compile(
        &self,
        message: &str,
        snapshot: &SchemaSnapshot,
    ) -> (QueryIntent, CompiledQuery) {
        let intent = self.parser.parse(message, snapshot);
        let compiled = self.compiler.compile(&intent, snapshot);
        (intent, compiled)
    }

    pub async fn execute_compiled(
        &self,
        connection_string: &str,
        db: &str,
        compiled: &CompiledQuery,
    ) -> Result<QueryOutcome> {
        let handle = self.pool.acquire(connection_string).await?;
        let outcome = executor::execute(&handle, db, compiled).await;
        self.pool.release(connection_string);
        outcome
    }

    /// One conversational turn.
    pub async fn ask(
        &self,
        project_id: &str,
        connection_string: &str,
        message: &str,
        history: &[ChatMessage],
    ) -> Result<AssistantReply> {
        let snapshot = self
            .cached_or_fresh_schema(project_id, connection_string)
            .await
            .map_err(|e| {
                warn!(error = %e, "schema extraction failed");
                LensError::Schema("unable to analyze database".into())
            })?;

        let (intent, compiled) = self.parse_and_compile(message, &snapshot);

        let outcome = if intent.confidence > self.config.execution_confidence_threshold
            && compiled.is_valid
        {
            let db = target_database(connection_string)?;
            Some(
                self.execute_compiled(connection_string, &db, &compiled)
                    .await?,
            )
        } else {
            info!(
                confidence = intent.confidence,
                valid = compiled.is_valid,
                "skipping query execution, answering from schema only"
            );
            None
        };

        let query_context = outcome
            .as_ref()
            .map(|o| llm::result_context(&compiled, o));
        let (answer, tokens_used) = match &self.generator {
            Some(generator) => {
                let prompt =
                    llm::build_prompt(&snapshot, query_context.as_deref(), history, message);
                let generated = generator.generate(&prompt).await?;
                (generated.text, generated.tokens_used)
            }
            // No generator wired in: reply with the structured context the
            // transport layer can still render.
            None => (
                query_context.unwrap_or_else(|| llm::schema_context(&snapshot)),
                0,
            ),
        };

        Ok(AssistantReply {
            answer,
            intent,
            compiled,
            outcome,
            tokens_used,
        })
    }
}

fn target_database(connection_string: &str) -> Result<String> {
    database_name_from_uri(connection_string).ok_or_else(|| {
        LensError::Validation(
            "connection string must include a database name".to_string(),
        )
    })
}
