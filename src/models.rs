//! Core data models flowing through the ingestion, retrieval, and agent
//! subsystems.
//!
//! [`EntityValue`] replaces the teacher's single `Document`/`Chunk` pair
//! with a generic, schema-driven record: one flat `label + fields` value
//! per node, keyed by `(label, unique_value)`. No struct here holds a
//! reference/ownership cycle, per the "cyclic graphs" design note —
//! neighbour lists are rebuilt on demand from the graph adapter rather
//! than retained inline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// A single typed field value. Closed over the types the schema declares,
/// with an `Unknown` escape hatch only at LLM/JSON ingress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Str(String),
    Number(f64),
    Bool(bool),
    DateTime(DateTime<Utc>),
    StrArray(Vec<String>),
    NumberArray(Vec<f64>),
    Unknown(JsonValue),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Raw item produced by a connector before it is parsed into entities.
#[derive(Debug, Clone)]
pub struct SourceItem {
    pub source: String,
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub content_type: String,
    pub body: String,
    pub updated_at: DateTime<Utc>,
}

/// A flat, schema-typed node value: one per entity instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityValue {
    pub label: String,
    pub fields: BTreeMap<String, FieldValue>,
}

impl EntityValue {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn unique_value(&self, unique_field: &str) -> Option<&str> {
        self.fields.get(unique_field).and_then(FieldValue::as_str)
    }
}

/// A chunk of ingested text awaiting (or holding) an embedding.
#[derive(Debug, Clone)]
pub struct PendingChunk {
    pub entity_label: String,
    pub unique_value: String,
    pub index_name: String,
    pub source_field: String,
    pub text: String,
    pub content_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    Created,
    Modified,
    Deleted,
}

/// A recorded mutation of a content-bearing entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    pub id: String,
    pub entity_label: String,
    pub unique_value: String,
    pub change_type: ChangeType,
    pub timestamp: DateTime<Utc>,
    pub lines_added: i64,
    pub lines_removed: i64,
    pub diff: String,
}

/// A search result returned from the query engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub label: String,
    pub unique_value: String,
    pub score: f64,
    pub score_breakdown: ScoreBreakdown,
    pub display: String,
    pub snippet: String,
    pub related: Vec<RelatedEntity>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub vector: f64,
    pub bm25: f64,
    pub fused: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedEntity {
    pub relationship_type: String,
    pub depth: usize,
    pub label: String,
    pub unique_value: String,
    pub display: String,
}

// ============ Conversation model ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolCallStatus {
    Pending,
    Running,
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallMeta {
    pub tool_name: String,
    pub arguments: JsonValue,
    pub status: ToolCallStatus,
    pub result: Option<JsonValue>,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub tool_call: Option<ToolCallMeta>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

// ============ Persona model ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersonaColor {
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
    Gray,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub color: PersonaColor,
    pub language: String,
    pub description: String,
    pub persona: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_value_unique_field_lookup() {
        let e = EntityValue::new("Scope")
            .with_field("uuid", FieldValue::Str("abc-123".into()))
            .with_field("startLine", FieldValue::Number(10.0));
        assert_eq!(e.unique_value("uuid"), Some("abc-123"));
        assert_eq!(e.fields.get("startLine").and_then(FieldValue::as_f64), Some(10.0));
    }

    #[test]
    fn field_value_json_roundtrip() {
        let v = FieldValue::StrArray(vec!["a".into(), "b".into()]);
        let json = serde_json::to_string(&v).unwrap();
        let back: FieldValue = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back);
    }
}
