//! Similarity Store Adapter
//!
//! Narrow contract over a vector index holding three record kinds: worked
//! question/SQL examples, schema DDL and free-text documentation. The question
//! pipeline only ever reads through [`SimilarityStore::find_similar`];
//! [`SimilarityStore::upsert`] is reserved for training flows.

pub mod embedder;
pub mod vector_store;

pub use embedder::*;
pub use vector_store::*;

use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Example,
    Ddl,
    Documentation,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [RecordKind::Example, RecordKind::Ddl, RecordKind::Documentation];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Example => "example",
            RecordKind::Ddl => "ddl",
            RecordKind::Documentation => "documentation",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a training example came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExampleSource {
    VectorStore,
    #[default]
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub question: String,
    pub sql: String,
    #[serde(default)]
    pub source: ExampleSource,
}

impl TrainingExample {
    pub fn new(question: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            sql: sql.into(),
            source: ExampleSource::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaFact {
    /// Table or column name
    pub identifier: String,
    pub ddl_or_description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentationFact {
    pub topic: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Example(TrainingExample),
    Ddl(SchemaFact),
    Documentation(DocumentationFact),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Example(_) => RecordKind::Example,
            Record::Ddl(_) => RecordKind::Ddl,
            Record::Documentation(_) => RecordKind::Documentation,
        }
    }

    /// Text the record is indexed under. Examples are matched on their
    /// question only; the SQL would drown the natural-language signal.
    pub fn embedding_text(&self) -> String {
        match self {
            Record::Example(example) => example.question.clone(),
            Record::Ddl(fact) => format!("{}\n{}", fact.identifier, fact.ddl_or_description),
            Record::Documentation(doc) => format!("{}\n{}", doc.topic, doc.text),
        }
    }

    /// Full content, used to derive a stable document id.
    pub fn content_key(&self) -> String {
        match self {
            Record::Example(example) => format!("{}\u{1f}{}", example.question, example.sql),
            Record::Ddl(fact) => format!("{}\u{1f}{}", fact.identifier, fact.ddl_or_description),
            Record::Documentation(doc) => format!("{}\u{1f}{}", doc.topic, doc.text),
        }
    }
}

/// One scored hit for a single question-processing cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedMatch {
    pub record: Record,
    /// Similarity in [0, 1], higher is closer.
    pub similarity_score: f32,
}

impl RetrievedMatch {
    pub fn new(record: Record, similarity_score: f32) -> Self {
        Self {
            record,
            similarity_score: similarity_score.clamp(0.0, 1.0),
        }
    }

    pub fn as_example(&self) -> Option<&TrainingExample> {
        match &self.record {
            Record::Example(example) => Some(example),
            _ => None,
        }
    }

    pub fn as_schema(&self) -> Option<&SchemaFact> {
        match &self.record {
            Record::Ddl(fact) => Some(fact),
            _ => None,
        }
    }

    pub fn as_documentation(&self) -> Option<&DocumentationFact> {
        match &self.record {
            Record::Documentation(doc) => Some(doc),
            _ => None,
        }
    }
}

/// Similarity search and upsert over the three record kinds.
///
/// Implementations must be safe to share across concurrent questions.
#[async_trait]
pub trait SimilarityStore: Send + Sync {
    /// Up to `limit` records of `kind`, highest similarity first.
    async fn find_similar(
        &self,
        text: &str,
        kind: RecordKind,
        limit: usize,
    ) -> Result<Vec<RetrievedMatch>, StoreError>;

    async fn upsert(&self, record: Record) -> Result<(), StoreError>;
}

/// Shared argument checks for `find_similar` implementations.
pub fn validate_search_request(text: &str, limit: usize) -> Result<(), StoreError> {
    if text.trim().is_empty() {
        return Err(StoreError::InvalidQuery);
    }
    if limit == 0 {
        return Err(StoreError::InvalidLimit);
    }
    Ok(())
}
