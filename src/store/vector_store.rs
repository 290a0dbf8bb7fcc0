//! Vector Store
//!
//! In-memory cosine-similarity index over training records, with JSON
//! persistence. `VectorSimilarityStore` wraps it behind the
//! [`SimilarityStore`] contract.

use crate::error::StoreError;
use crate::store::embedder::{fnv1a, Embedder};
use crate::store::{
    validate_search_request, ExampleSource, Record, RecordKind, RetrievedMatch, SimilarityStore,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Vector embedding (simple f32 vector)
pub type Embedding = Vec<f32>;

/// Document in the vector store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub record: Record,
    pub embedding: Embedding,
}

impl Document {
    pub fn kind(&self) -> RecordKind {
        self.record.kind()
    }
}

/// Search result from vector store
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub document: Document,
    pub score: f32,
}

#[derive(Serialize, Deserialize)]
struct PersistedStore {
    dimension: usize,
    documents: Vec<Document>,
}

/// In-memory vector store with linear cosine search.
///
/// Documents keep their insertion order; equal scores are returned in that
/// order.
#[derive(Debug, Clone)]
pub struct InMemoryVectorStore {
    documents: Vec<Document>,
    /// Mapping from document ID to position in `documents`
    positions: HashMap<String, usize>,
    dimension: usize,
}

impl InMemoryVectorStore {
    /// Create a new vector store with specified embedding dimension
    pub fn new(dimension: usize) -> Self {
        Self {
            documents: Vec::new(),
            positions: HashMap::new(),
            dimension,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Add a document, replacing any existing one with the same id in place.
    pub fn add_document(&mut self, document: Document) -> Result<(), StoreError> {
        if document.embedding.len() != self.dimension {
            return Err(StoreError::Embedding(format!(
                "Embedding dimension {} doesn't match store dimension {}",
                document.embedding.len(),
                self.dimension
            )));
        }

        match self.positions.get(&document.id) {
            Some(&pos) => self.documents[pos] = document,
            None => {
                self.positions.insert(document.id.clone(), self.documents.len());
                self.documents.push(document);
            }
        }
        Ok(())
    }

    /// Top `top_k` documents of `kind` by cosine similarity, best first.
    pub fn search(
        &self,
        query_embedding: &[f32],
        kind: RecordKind,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, StoreError> {
        if query_embedding.len() != self.dimension {
            return Err(StoreError::Embedding(format!(
                "Query embedding dimension {} doesn't match store dimension {}",
                query_embedding.len(),
                self.dimension
            )));
        }

        let mut results: Vec<SearchResult> = self
            .documents
            .iter()
            .filter(|doc| doc.kind() == kind)
            .map(|doc| SearchResult {
                document: doc.clone(),
                score: cosine_similarity(query_embedding, &doc.embedding).clamp(0.0, 1.0),
            })
            .collect();

        // Stable sort keeps insertion order for ties
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);

        Ok(results)
    }

    /// Get document by ID
    pub fn get_document(&self, id: &str) -> Option<&Document> {
        self.positions.get(id).map(|&pos| &self.documents[pos])
    }

    /// Get number of documents
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Check if store is empty
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn count_by_kind(&self, kind: RecordKind) -> usize {
        self.documents.iter().filter(|doc| doc.kind() == kind).count()
    }

    /// Save the vector store to disk
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let data = PersistedStore {
            dimension: self.dimension,
            documents: self.documents.clone(),
        };
        let encoded = serde_json::to_string(&data)
            .map_err(|e| StoreError::Persistence(format!("Failed to serialize vector store: {}", e)))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Persistence(format!("Failed to create {}: {}", parent.display(), e)))?;
        }
        std::fs::write(path, encoded)
            .map_err(|e| StoreError::Persistence(format!("Failed to write vector store: {}", e)))?;
        Ok(())
    }

    /// Load the vector store from disk
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let encoded = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Persistence(format!("Failed to read vector store: {}", e)))?;
        let data: PersistedStore = serde_json::from_str(&encoded)
            .map_err(|e| StoreError::Persistence(format!("Failed to parse vector store: {}", e)))?;

        let mut store = Self::new(data.dimension);
        for document in data.documents {
            store.add_document(document)?;
        }
        Ok(store)
    }
}

/// Compute cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Stable id for a record: kind plus a content hash.
pub fn document_id(record: &Record) -> String {
    format!("{}:{:016x}", record.kind(), fnv1a(record.content_key().as_bytes()))
}

/// [`SimilarityStore`] backed by an embedder and an [`InMemoryVectorStore`].
pub struct VectorSimilarityStore {
    embedder: Arc<dyn Embedder>,
    index: RwLock<InMemoryVectorStore>,
    path: Option<PathBuf>,
}

impl VectorSimilarityStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        let dimension = embedder.dimensions();
        Self {
            embedder,
            index: RwLock::new(InMemoryVectorStore::new(dimension)),
            path: None,
        }
    }

    /// Open a persisted store, starting empty if the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>, embedder: Arc<dyn Embedder>) -> Result<Self, StoreError> {
        let path = path.into();
        let index = if path.exists() {
            let loaded = InMemoryVectorStore::load(&path)?;
            if loaded.dimension() != embedder.dimensions() {
                return Err(StoreError::Persistence(format!(
                    "Store at {} was built with {} dimensions but embedder '{}' produces {}",
                    path.display(),
                    loaded.dimension(),
                    embedder.name(),
                    embedder.dimensions()
                )));
            }
            info!("Loaded {} documents from {}", loaded.len(), path.display());
            loaded
        } else {
            info!("No vector store at {}, starting empty", path.display());
            InMemoryVectorStore::new(embedder.dimensions())
        };

        Ok(Self {
            embedder,
            index: RwLock::new(index),
            path: Some(path),
        })
    }

    /// Persist to the path the store was opened from.
    pub fn save(&self) -> Result<(), StoreError> {
        let Some(ref path) = self.path else {
            return Err(StoreError::Persistence("Store has no backing file".to_string()));
        };
        let index = self
            .index
            .read()
            .map_err(|_| StoreError::StoreUnavailable("Vector index lock poisoned".to_string()))?;
        index.save(path)?;
        info!("Saved {} documents to {}", index.len(), path.display());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.index.read().map(|index| index.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count_by_kind(&self, kind: RecordKind) -> usize {
        self.index
            .read()
            .map(|index| index.count_by_kind(kind))
            .unwrap_or(0)
    }
}

#[async_trait]
impl SimilarityStore for VectorSimilarityStore {
    async fn find_similar(
        &self,
        text: &str,
        kind: RecordKind,
        limit: usize,
    ) -> Result<Vec<RetrievedMatch>, StoreError> {
        validate_search_request(text, limit)?;

        let query_embedding = self.embedder.embed(text).await.map_err(|e| match e {
            StoreError::StoreUnavailable(msg) => StoreError::StoreUnavailable(msg),
            other => StoreError::StoreUnavailable(other.to_string()),
        })?;

        let results = {
            let index = self
                .index
                .read()
                .map_err(|_| StoreError::StoreUnavailable("Vector index lock poisoned".to_string()))?;
            index.search(&query_embedding, kind, limit)?
        };
        debug!("{} {} matches for query", results.len(), kind);

        Ok(results
            .into_iter()
            .map(|result| {
                let record = match result.document.record {
                    Record::Example(mut example) => {
                        example.source = ExampleSource::VectorStore;
                        Record::Example(example)
                    }
                    other => other,
                };
                RetrievedMatch::new(record, result.score)
            })
            .collect())
    }

    async fn upsert(&self, record: Record) -> Result<(), StoreError> {
        let text = record.embedding_text();
        if text.trim().is_empty() {
            warn!("Skipping {} record with empty text", record.kind());
            return Err(StoreError::InvalidQuery);
        }

        let embedding = self.embedder.embed(&text).await?;
        let document = Document {
            id: document_id(&record),
            record,
            embedding,
        };

        let mut index = self
            .index
            .write()
            .map_err(|_| StoreError::StoreUnavailable("Vector index lock poisoned".to_string()))?;
        index.add_document(document)
    }
}
