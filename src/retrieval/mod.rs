//! Evidence retrieval.
//!
//! # Key Concepts
//! - EvidenceChunk: immutable unit of source text with a content-derived id
//! - Embedder / VectorIndex / LexicalIndex: replaceable collaborators
//! - FusionRetriever: semantic + lexical rankings merged by Reciprocal Rank Fusion
//! - Ingestor: loads, chunks, embeds and indexes documents

mod cache;
mod embed;
pub mod fusion;
mod ingest;
mod memory;
mod retriever;

pub use cache::RetrievalCache;
pub use embed::{HashingEmbedder, HttpEmbedder};
pub use fusion::{edge_interleave, reciprocal_rank_fusion, FusedCandidate};
pub use ingest::{chunk_text, load_documents, Document, IngestReport, Ingestor};
pub use memory::{InMemoryLexicalIndex, InMemoryVectorIndex};
pub use retriever::{format_context, FusionRetriever};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors raised by retrieval collaborators.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("failed to read documents: {0}")]
    Io(#[from] std::io::Error),
}

/// Content-derived chunk identifier.
///
/// Derived from the owning document and the chunk text, so re-ingesting
/// identical text yields the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    pub fn derive(document_id: &str, text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(document_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        let digest = hex::encode(hasher.finalize());
        ChunkId(format!("{}#{}", document_id, &digest[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChunkId {
    fn from(s: &str) -> Self {
        ChunkId(s.to_string())
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A retrievable unit of source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceChunk {
    pub id: ChunkId,
    pub document_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f64>,
}

impl EvidenceChunk {
    pub fn new(document_id: impl Into<String>, text: impl Into<String>) -> Self {
        let document_id = document_id.into();
        let text = text.into();
        Self {
            id: ChunkId::derive(&document_id, &text),
            document_id,
            text,
            relevance: None,
        }
    }
}

/// A chunk returned by one `search` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk: EvidenceChunk,
    /// 1-based citation index, stable only within the call that produced it.
    pub reference: usize,
    pub fused_score: f64,
    pub semantic_rank: Option<usize>,
    pub lexical_rank: Option<usize>,
}

/// Text → fixed-length vector. Must be deterministic for identical input.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;

    fn dimensions(&self) -> usize;
}

/// Nearest-neighbour index over chunk embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Ranked `(chunk_id, similarity)`, best first.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<(ChunkId, f32)>, RetrievalError>;

    async fn upsert(
        &self,
        chunk_id: ChunkId,
        vector: Vec<f32>,
        metadata: serde_json::Value,
    ) -> Result<(), RetrievalError>;
}

/// Exact/partial term-match index.
#[async_trait]
pub trait LexicalIndex: Send + Sync {
    /// Ranked `(chunk_id, score)`, best first.
    async fn query(&self, terms: &[String], k: usize) -> Result<Vec<(ChunkId, f32)>, RetrievalError>;

    async fn upsert(&self, chunk_id: ChunkId, text: &str) -> Result<(), RetrievalError>;
}

/// Owns chunk bodies by id. Documents own their chunks.
#[derive(Debug, Default)]
pub struct ChunkStore {
    chunks: RwLock<HashMap<ChunkId, EvidenceChunk>>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a chunk. Returns false if it was already present.
    pub async fn insert(&self, chunk: EvidenceChunk) -> bool {
        let mut chunks = self.chunks.write().await;
        if chunks.contains_key(&chunk.id) {
            return false;
        }
        chunks.insert(chunk.id.clone(), chunk);
        true
    }

    pub async fn contains(&self, id: &ChunkId) -> bool {
        self.chunks.read().await.contains_key(id)
    }

    pub async fn get(&self, id: &ChunkId) -> Option<EvidenceChunk> {
        self.chunks.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.chunks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.chunks.read().await.is_empty()
    }
}

/// The collaborators shared by ingestion and search.
#[derive(Clone)]
pub struct RetrievalBackend {
    pub embedder: Arc<dyn Embedder>,
    pub vectors: Arc<dyn VectorIndex>,
    pub lexical: Arc<dyn LexicalIndex>,
    pub store: Arc<ChunkStore>,
}

impl RetrievalBackend {
    /// Process-local indices around the given embedder.
    pub fn in_memory(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            vectors: Arc::new(InMemoryVectorIndex::new()),
            lexical: Arc::new(InMemoryLexicalIndex::new()),
            store: Arc::new(ChunkStore::new()),
        }
    }
}

/// Lowercased alphanumeric terms of at least two characters.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}
