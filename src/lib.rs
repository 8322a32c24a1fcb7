//! mongolens - conversational schema inference and querying for MongoDB
//!
//! Connect an arbitrary cluster, statistically infer its schema from random
//! samples, detect cross-collection relationships from naming conventions,
//! then answer free-text questions by compiling them into bounded read-only
//! queries. Writes are impossible by construction and double-checked by a
//! structural validation gate.

pub mod assistant;
pub mod compiler;
pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod extractor;
pub mod intent;
pub mod llm;
pub mod relationships;
pub mod schema;
pub mod schema_cache;

pub use assistant::{AssistantReply, DataAssistant};
pub use compiler::{CompiledQuery, QueryCompiler, QueryKind};
pub use config::LensConfig;
pub use connection::{ConnectionHandle, ConnectionPool, ConnectionValidation};
pub use error::{LensError, Result};
pub use executor::QueryOutcome;
pub use extractor::SchemaExtractor;
pub use intent::{FilterValue, IntentParser, IntentType, QueryIntent};
pub use schema::{
    CollectionSchema, FieldSchema, FieldType, Relationship, SchemaSnapshot,
};
pub use schema_cache::{CacheStore, MemoryCacheStore, ProjectStore, SchemaCache};
