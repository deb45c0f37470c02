//! Declarative entity schema and the pure tool-descriptor generator.
//!
//! The schema is the single source of truth for what a RagForge instance
//! knows about: entity labels, their typed fields, relationships to other
//! entities, and the vector/full-text indexes attached to them. Everything
//! downstream — the tool surface handed to the agent runtime, the graph
//! adapter's table layout, the ingestion engine's chunkers — is derived
//! from one `Schema` value rather than from reflection over Rust types,
//! so `generate_tools`/`generate_handlers` are plain total functions over
//! data (see DESIGN.md).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    DateTime,
    StringArray,
    NumberArray,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipDirection {
    Outgoing,
    Incoming,
    Bidirectional,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipDef {
    pub rel_type: String,
    pub to_label: String,
    pub direction: RelationshipDirection,
    /// When true, `semantic_search`/`query` results enrich with this relationship's neighbours.
    pub enrich: bool,
    pub max_items: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Similarity {
    Cosine,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndexDef {
    pub name: String,
    pub source_field: String,
    pub embedding_field: String,
    pub dimension: usize,
    pub similarity: Similarity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDef {
    pub label: String,
    pub unique_field: String,
    pub display_field: String,
    pub query_field: String,
    pub fields: Vec<FieldDef>,
    pub relationships: Vec<RelationshipDef>,
    pub vector_indexes: Vec<VectorIndexDef>,
    pub fulltext_fields: Vec<String>,
    pub mutable: bool,
}

impl EntityDef {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_datetime_field(&self) -> bool {
        self.fields.iter().any(|f| f.field_type == FieldType::DateTime)
    }

    pub fn has_number_field(&self) -> bool {
        self.fields.iter().any(|f| f.field_type == FieldType::Number)
    }

    pub fn has_string_field(&self) -> bool {
        self.fields.iter().any(|f| f.field_type == FieldType::String)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub entities: Vec<EntityDef>,
}

impl Schema {
    pub fn entity(&self, label: &str) -> Option<&EntityDef> {
        self.entities.iter().find(|e| e.label == label)
    }

    pub fn labels(&self) -> Vec<&str> {
        self.entities.iter().map(|e| e.label.as_str()).collect()
    }
}

/// Builds the canonical code + document entity schema described in §3.
pub fn default_schema() -> Schema {
    let scope = EntityDef {
        label: "Scope".to_string(),
        unique_field: "uuid".to_string(),
        display_field: "name".to_string(),
        query_field: "name".to_string(),
        fields: vec![
            FieldDef::new("uuid", FieldType::String),
            FieldDef::new("name", FieldType::String),
            FieldDef::new("type", FieldType::String),
            FieldDef::new("file", FieldType::String),
            FieldDef::new("startLine", FieldType::Number),
            FieldDef::new("endLine", FieldType::Number),
            FieldDef::new("signature", FieldType::String),
            FieldDef::new("source", FieldType::String),
            FieldDef::new("contentHash", FieldType::String),
        ],
        relationships: vec![
            RelationshipDef {
                rel_type: "DEFINED_IN".to_string(),
                to_label: "File".to_string(),
                direction: RelationshipDirection::Outgoing,
                enrich: true,
                max_items: 1,
            },
            RelationshipDef {
                rel_type: "CONSUMES".to_string(),
                to_label: "Scope".to_string(),
                direction: RelationshipDirection::Bidirectional,
                enrich: true,
                max_items: 10,
            },
            RelationshipDef {
                rel_type: "USES_LIBRARY".to_string(),
                to_label: "ExternalLibrary".to_string(),
                direction: RelationshipDirection::Outgoing,
                enrich: false,
                max_items: 10,
            },
            RelationshipDef {
                rel_type: "BELONGS_TO".to_string(),
                to_label: "Project".to_string(),
                direction: RelationshipDirection::Outgoing,
                enrich: false,
                max_items: 1,
            },
        ],
        vector_indexes: vec![VectorIndexDef {
            name: "scopeSource".to_string(),
            source_field: "source".to_string(),
            embedding_field: "sourceEmbedding".to_string(),
            dimension: 384,
            similarity: Similarity::Cosine,
        }],
        fulltext_fields: vec!["source".to_string(), "signature".to_string()],
        mutable: false,
    };

    let file = EntityDef {
        label: "File".to_string(),
        unique_field: "path".to_string(),
        display_field: "name".to_string(),
        query_field: "name".to_string(),
        fields: vec![
            FieldDef::new("path", FieldType::String),
            FieldDef::new("name", FieldType::String),
            FieldDef::new("directory", FieldType::String),
            FieldDef::new("extension", FieldType::String),
            FieldDef::new("contentHash", FieldType::String),
            FieldDef::new("mtime", FieldType::DateTime),
        ],
        relationships: vec![RelationshipDef {
            rel_type: "IN_DIRECTORY".to_string(),
            to_label: "Directory".to_string(),
            direction: RelationshipDirection::Outgoing,
            enrich: false,
            max_items: 1,
        }],
        vector_indexes: vec![],
        fulltext_fields: vec![],
        mutable: false,
    };

    let directory = EntityDef {
        label: "Directory".to_string(),
        unique_field: "path".to_string(),
        display_field: "path".to_string(),
        query_field: "path".to_string(),
        fields: vec![
            FieldDef::new("path", FieldType::String),
            FieldDef::new("depth", FieldType::Number),
        ],
        relationships: vec![RelationshipDef {
            rel_type: "PARENT_OF".to_string(),
            to_label: "Directory".to_string(),
            direction: RelationshipDirection::Outgoing,
            enrich: false,
            max_items: 50,
        }],
        vector_indexes: vec![],
        fulltext_fields: vec![],
        mutable: false,
    };

    let external_library = EntityDef {
        label: "ExternalLibrary".to_string(),
        unique_field: "name".to_string(),
        display_field: "name".to_string(),
        query_field: "name".to_string(),
        fields: vec![FieldDef::new("name", FieldType::String)],
        relationships: vec![],
        vector_indexes: vec![],
        fulltext_fields: vec![],
        mutable: false,
    };

    let markdown_document = EntityDef {
        label: "MarkdownDocument".to_string(),
        unique_field: "uuid".to_string(),
        display_field: "title".to_string(),
        query_field: "title".to_string(),
        fields: vec![
            FieldDef::new("uuid", FieldType::String),
            FieldDef::new("title", FieldType::String),
            FieldDef::new("path", FieldType::String),
            FieldDef::new("contentHash", FieldType::String),
        ],
        relationships: vec![],
        vector_indexes: vec![],
        fulltext_fields: vec![],
        mutable: false,
    };

    let markdown_section = EntityDef {
        label: "MarkdownSection".to_string(),
        unique_field: "uuid".to_string(),
        display_field: "heading".to_string(),
        query_field: "heading".to_string(),
        fields: vec![
            FieldDef::new("uuid", FieldType::String),
            FieldDef::new("heading", FieldType::String),
            FieldDef::new("level", FieldType::Number),
            FieldDef::new("text", FieldType::String),
            FieldDef::new("contentHash", FieldType::String),
        ],
        relationships: vec![RelationshipDef {
            rel_type: "SECTION_OF".to_string(),
            to_label: "MarkdownDocument".to_string(),
            direction: RelationshipDirection::Outgoing,
            enrich: true,
            max_items: 1,
        }],
        vector_indexes: vec![VectorIndexDef {
            name: "sectionText".to_string(),
            source_field: "text".to_string(),
            embedding_field: "textEmbedding".to_string(),
            dimension: 384,
            similarity: Similarity::Cosine,
        }],
        fulltext_fields: vec!["text".to_string()],
        mutable: false,
    };

    let code_block = EntityDef {
        label: "CodeBlock".to_string(),
        unique_field: "uuid".to_string(),
        display_field: "language".to_string(),
        query_field: "code".to_string(),
        fields: vec![
            FieldDef::new("uuid", FieldType::String),
            FieldDef::new("language", FieldType::String),
            FieldDef::new("code", FieldType::String),
            FieldDef::new("contentHash", FieldType::String),
        ],
        relationships: vec![RelationshipDef {
            rel_type: "CONTAINED_IN".to_string(),
            to_label: "MarkdownSection".to_string(),
            direction: RelationshipDirection::Outgoing,
            enrich: false,
            max_items: 1,
        }],
        vector_indexes: vec![VectorIndexDef {
            name: "codeText".to_string(),
            source_field: "code".to_string(),
            embedding_field: "codeEmbedding".to_string(),
            dimension: 384,
            similarity: Similarity::Cosine,
        }],
        fulltext_fields: vec!["code".to_string()],
        mutable: false,
    };

    let web_page = EntityDef {
        label: "WebPage".to_string(),
        unique_field: "url".to_string(),
        display_field: "url".to_string(),
        query_field: "textContent".to_string(),
        fields: vec![
            FieldDef::new("url", FieldType::String),
            FieldDef::new("textContent", FieldType::String),
            FieldDef::new("crawlDepth", FieldType::Number),
            FieldDef::new("contentHash", FieldType::String),
            FieldDef::new("crawledAt", FieldType::DateTime),
        ],
        relationships: vec![],
        vector_indexes: vec![VectorIndexDef {
            name: "contentEmbedding".to_string(),
            source_field: "textContent".to_string(),
            embedding_field: "contentEmbedding".to_string(),
            dimension: 384,
            similarity: Similarity::Cosine,
        }],
        fulltext_fields: vec!["textContent".to_string()],
        mutable: false,
    };

    let project = EntityDef {
        label: "Project".to_string(),
        unique_field: "name".to_string(),
        display_field: "name".to_string(),
        query_field: "name".to_string(),
        fields: vec![
            FieldDef::new("name", FieldType::String),
            FieldDef::new("rootPath", FieldType::String),
        ],
        relationships: vec![],
        vector_indexes: vec![],
        fulltext_fields: vec![],
        mutable: false,
    };

    Schema {
        entities: vec![
            scope,
            file,
            directory,
            external_library,
            markdown_document,
            markdown_section,
            code_block,
            web_page,
            project,
        ],
    }
}

// ============ Tool descriptor generation ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolArgSpec {
    pub name: String,
    pub arg_type: ArgType,
    pub required: bool,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub args: Vec<ToolArgSpec>,
    pub requires_validation: bool,
}

fn arg(name: &str, arg_type: ArgType, required: bool, description: &str) -> ToolArgSpec {
    ToolArgSpec {
        name: name.to_string(),
        arg_type,
        required,
        description: description.to_string(),
    }
}

/// Generates the full tool surface for a schema. Pure: same schema in,
/// same descriptors out, no I/O and no reflection over Rust types.
pub fn generate_tools(schema: &Schema) -> Vec<ToolDescriptor> {
    let mut tools = Vec::new();

    tools.push(ToolDescriptor {
        name: "describe_schema".to_string(),
        description: "Return every entity's unique/display/query field, typed fields, \
            relationships, and semantic indexes."
            .to_string(),
        args: vec![],
        requires_validation: false,
    });

    tools.push(ToolDescriptor {
        name: "search".to_string(),
        description: "Hybrid BM25 + vector search across every indexed entity, or the given \
            `entities` subset, fused by weighted sum, reranked per configured strategy, and \
            enriched with each result's one-hop related entities."
            .to_string(),
        args: vec![
            arg("query", ArgType::String, true, "natural language query"),
            arg("entities", ArgType::Array, false, "restrict to these entity labels; default: all indexed"),
            arg("topK", ArgType::Number, false, "max results after fusion/rerank"),
            arg("minScore", ArgType::Number, false, "score floor in [0,1]"),
        ],
        requires_validation: false,
    });

    for entity in &schema.entities {
        let label = &entity.label;

        tools.push(ToolDescriptor {
            name: format!("query_{label}"),
            description: format!(
                "Filter {label} nodes by field predicates (equals/contains/gt/lt/in per field type). \
                 Unique field: {}.",
                entity.unique_field
            ),
            args: vec![
                arg("filter", ArgType::Object, false, "field -> {op, value} predicates"),
                arg("limit", ArgType::Number, false, "max rows, default 20"),
                arg("offset", ArgType::Number, false, "pagination offset"),
                arg("orderBy", ArgType::String, false, "field to sort by, default unique field"),
                arg("expand", ArgType::Array, false, "relationship types to include inline"),
            ],
            requires_validation: false,
        });

        tools.push(ToolDescriptor {
            name: format!("get_{label}_by_id"),
            description: format!("Fetch a single {label} node by its unique field ({}).", entity.unique_field),
            args: vec![arg("uniqueValue", ArgType::String, true, "value of the unique field")],
            requires_validation: false,
        });

        if entity.has_datetime_field() {
            tools.push(ToolDescriptor {
                name: format!("query_{label}_by_date_range"),
                description: format!("Filter {label} nodes by a datetime field range."),
                args: vec![
                    arg("field", ArgType::String, true, "datetime field name"),
                    arg("from", ArgType::String, false, "ISO8601 lower bound"),
                    arg("to", ArgType::String, false, "ISO8601 upper bound"),
                ],
                requires_validation: false,
            });
        }

        if entity.has_number_field() {
            tools.push(ToolDescriptor {
                name: format!("query_{label}_by_number_range"),
                description: format!("Filter {label} nodes by a numeric field range."),
                args: vec![
                    arg("field", ArgType::String, true, "numeric field name"),
                    arg("gte", ArgType::Number, false, "lower bound, inclusive"),
                    arg("lte", ArgType::Number, false, "upper bound, inclusive"),
                ],
                requires_validation: false,
            });
        }

        if entity.has_string_field() {
            tools.push(ToolDescriptor {
                name: format!("query_{label}_by_pattern"),
                description: format!("Filter {label} nodes by a string field pattern (contains/startsWith/endsWith/regex)."),
                args: vec![
                    arg("field", ArgType::String, true, "string field name"),
                    arg("op", ArgType::String, true, "contains|startsWith|endsWith|regex"),
                    arg("value", ArgType::String, true, "pattern value"),
                ],
                requires_validation: false,
            });
        }

        if !entity.vector_indexes.is_empty() {
            let index_names: Vec<&str> = entity.vector_indexes.iter().map(|v| v.name.as_str()).collect();
            tools.push(ToolDescriptor {
                name: format!("semantic_search_{label}"),
                description: format!(
                    "Vector search over {label} nodes. `index` selects one of this entity's \
                     vector indexes: {}.",
                    index_names.join(", ")
                ),
                args: vec![
                    arg("query", ArgType::String, true, "natural language query"),
                    arg("index", ArgType::String, true, "vector index name to search"),
                    arg("topK", ArgType::Number, false, "max results, default 10"),
                    arg("minScore", ArgType::Number, false, "score floor in [0,1]"),
                    arg("fieldFilter", ArgType::Object, false, "post-filter on structural fields"),
                    arg("uuidFilter", ArgType::Array, false, "restrict results to these unique field values"),
                ],
                requires_validation: false,
            });
        }

        if !entity.relationships.is_empty() {
            tools.push(ToolDescriptor {
                name: format!("expand_{label}"),
                description: format!("Walk a declared relationship from one {label} node up to `depth` hops."),
                args: vec![
                    arg("uniqueValue", ArgType::String, true, "starting node's unique field value"),
                    arg("relType", ArgType::String, true, "declared relationship type"),
                    arg("depth", ArgType::Number, false, "hop count, default 1, bounded at 5"),
                ],
                requires_validation: false,
            });
        }

        if entity.mutable {
            tools.push(ToolDescriptor {
                name: format!("mutate_{label}"),
                description: format!("Create, update, or delete {label} nodes."),
                args: vec![
                    arg("op", ArgType::String, true, "create|update|delete|createBatch"),
                    arg("uniqueValue", ArgType::String, false, "required for update/delete"),
                    arg("fields", ArgType::Object, false, "field values for create/update"),
                    arg("items", ArgType::Array, false, "array of field-value objects for createBatch"),
                ],
                requires_validation: true,
            });
        }
    }

    tools.push(ToolDescriptor {
        name: "raw_cypher".to_string(),
        description: "Execute a parameterised Cypher query directly against the graph. \
            Rejected unless `mutate=true` is passed for write statements."
            .to_string(),
        args: vec![
            arg("cypher", ArgType::String, true, "parameterised Cypher text"),
            arg("params", ArgType::Object, false, "named parameters"),
            arg("mutate", ArgType::Boolean, false, "must be true to permit write statements"),
        ],
        requires_validation: true,
    });

    tools
}

/// Index of generated descriptors by name, used by the agent runtime
/// to validate arguments before dispatch.
pub fn index_tools(tools: &[ToolDescriptor]) -> BTreeMap<String, &ToolDescriptor> {
    tools.iter().map(|t| (t.name.clone(), t)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schema_has_canonical_entities() {
        let schema = default_schema();
        for label in [
            "Scope",
            "File",
            "Directory",
            "ExternalLibrary",
            "MarkdownDocument",
            "MarkdownSection",
            "CodeBlock",
            "WebPage",
            "Project",
        ] {
            assert!(schema.entity(label).is_some(), "missing entity {label}");
        }
    }

    #[test]
    fn generator_is_pure_and_deterministic() {
        let schema = default_schema();
        let a = generate_tools(&schema);
        let b = generate_tools(&schema);
        assert_eq!(a.len(), b.len());
        assert_eq!(
            a.iter().map(|t| t.name.clone()).collect::<Vec<_>>(),
            b.iter().map(|t| t.name.clone()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn scope_gets_semantic_search_and_expand_tools() {
        let schema = default_schema();
        let tools = generate_tools(&schema);
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&"semantic_search_Scope"));
        assert!(names.contains(&"expand_Scope"));
        assert!(names.contains(&"query_Scope_by_number_range"));
        assert!(!names.contains(&"query_Scope_by_date_range"), "Scope has no datetime field");
        assert!(names.contains(&"query_File_by_date_range"), "File.mtime is a datetime field");
    }

    #[test]
    fn immutable_entities_get_no_mutate_tool() {
        let schema = default_schema();
        let tools = generate_tools(&schema);
        assert!(!tools.iter().any(|t| t.name == "mutate_Scope"));
    }

    #[test]
    fn raw_cypher_requires_validation() {
        let schema = default_schema();
        let tools = generate_tools(&schema);
        let raw = tools.iter().find(|t| t.name == "raw_cypher").unwrap();
        assert!(raw.requires_validation);
    }
}
