//! LLM collaborator
//!
//! The engine never writes prose itself; it builds a compact structured
//! context block (schema description plus optional query results) and hands
//! it to a text-generation collaborator together with the chat history.
//! `OpenAiChatClient` is the production implementation; tests swap in a
//! canned generator through the `TextGenerator` trait.

use crate::compiler::CompiledQuery;
use crate::error::{LensError, Result};
use crate::executor::QueryOutcome;
use crate::schema::SchemaSnapshot;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedText {
    pub text: String,
    pub tokens_used: u32,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<GeneratedText>;
}

#[derive(Clone)]
pub struct OpenAiChatClient {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: u32,
}

impl OpenAiChatClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            api_key,
            base_url,
            model,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiChatClient {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<GeneratedText> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: 0.2,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LensError::Llm(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LensError::Llm(format!("API error {}: {}", status, body)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LensError::Llm(format!("malformed response: {}", e)))?;

        let tokens_used = parsed.usage.map(|u| u.total_tokens).unwrap_or(0);
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LensError::Llm("empty choices in response".into()))?;

        info!(tokens = tokens_used, "LLM response received");
        Ok(GeneratedText { text, tokens_used })
    }
}

/// Render the schema snapshot as a compact context block. Token-optimized:
/// field name plus type tag only, a few relationships, no sample documents.
pub fn schema_context(snapshot: &SchemaSnapshot) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Database schema ({} collections, {} documents total):\n",
        snapshot.stats.total_collections, snapshot.stats.total_documents
    ));
    for collection in &snapshot.collections {
        let fields: Vec<String> = collection
            .fields
            .iter()
            .map(|f| {
                let mut tag = format!("{}: {:?}", f.name, f.field_type);
                if f.is_array {
                    tag.push_str("[]");
                }
                if !f.required {
                    tag.push('?');
                }
                tag
            })
            .collect();
        out.push_str(&format!(
            "- {} ({} docs): {}\n",
            collection.name,
            collection.document_count,
            fields.join(", ")
        ));
    }
    if !snapshot.relationships.is_empty() {
        out.push_str("Relationships:\n");
        for rel in &snapshot.relationships {
            out.push_str(&format!(
                "- {}.{} -> {} ({:?})\n",
                rel.from, rel.field, rel.to, rel.relationship_type
            ));
        }
    }
    out
}

/// Render an executed query plus its outcome for the response prompt.
pub fn result_context(compiled: &CompiledQuery, outcome: &QueryOutcome) -> String {
    let query = serde_json::to_string(compiled).unwrap_or_else(|_| "<unserializable>".into());
    let rendered = match outcome {
        QueryOutcome::Count(n) => format!("count = {}", n),
        QueryOutcome::Documents(docs) => {
            let shown: Vec<String> = docs.iter().take(10).map(|d| d.to_string()).collect();
            format!("{} document(s):\n{}", docs.len(), shown.join("\n"))
        }
        QueryOutcome::Groups(groups) => {
            let shown: Vec<String> = groups.iter().take(20).map(|d| d.to_string()).collect();
            format!("{} group(s):\n{}", groups.len(), shown.join("\n"))
        }
    };
    format!("Executed query: {}\nResult: {}", query, rendered)
}

/// Assemble the full prompt: system context, prior turns, current question.
pub fn build_prompt(
    snapshot: &SchemaSnapshot,
    query_context: Option<&str>,
    history: &[ChatMessage],
    question: &str,
) -> Vec<ChatMessage> {
    let mut system = String::from(
        "You are a data assistant for a MongoDB database. Answer using only \
         the schema and query results provided. Be concise.\n\n",
    );
    system.push_str(&schema_context(snapshot));
    if let Some(ctx) = query_context {
        system.push('\n');
        system.push_str(ctx);
    }

    let mut messages = vec![ChatMessage::system(system)];
    messages.extend_from_slice(history);
    messages.push(ChatMessage::user(question));
    debug!(turns = messages.len(), "built chat prompt");
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{
        CollectionSchema, FieldSchema, FieldType, Relationship, RelationshipDirection,
        RelationshipType, SchemaStats,
    };
    use chrono::Utc;

    fn snapshot() -> SchemaSnapshot {
        SchemaSnapshot {
            collections: vec![CollectionSchema {
                name: "users".into(),
                fields: vec![
                    FieldSchema {
                        name: "name".into(),
                        field_type: FieldType::String,
                        required: true,
                        is_array: false,
                        is_nested: false,
                        sample_values: vec![],
                    },
                    FieldSchema {
                        name: "tags".into(),
                        field_type: FieldType::Array,
                        required: false,
                        is_array: true,
                        is_nested: false,
                        sample_values: vec![],
                    },
                ],
                indexes: vec![],
                document_count: 42,
                sample_document: None,
            }],
            relationships: vec![Relationship {
                from: "orders".into(),
                to: "users".into(),
                field: "userId".into(),
                relationship_type: RelationshipType::OneToOne,
                direction: RelationshipDirection::Forward,
            }],
            stats: SchemaStats {
                total_collections: 1,
                total_documents: 42,
                average_field_count: 2,
            },
            last_synced: Utc::now(),
        }
    }

    #[test]
    fn schema_context_lists_collections_and_relationships() {
        let ctx = schema_context(&snapshot());
        assert!(ctx.contains("users (42 docs)"));
        assert!(ctx.contains("tags: Array[]?"));
        assert!(ctx.contains("orders.userId -> users"));
    }

    #[test]
    fn prompt_sandwiches_history_between_system_and_question() {
        let history = vec![ChatMessage::user("earlier question")];
        let messages = build_prompt(&snapshot(), None, &history, "how many users?");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[2].content, "how many users?");
    }
}
