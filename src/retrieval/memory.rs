//! Process-local index implementations.
//!
//! Both indices rank deterministically: equal scores are ordered by chunk id.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use super::{tokenize, ChunkId, LexicalIndex, RetrievalError, VectorIndex};

fn rank_desc(mut scored: Vec<(ChunkId, f32)>, k: usize) -> Vec<(ChunkId, f32)> {
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored.truncate(k);
    scored
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

struct VectorEntry {
    vector: Vec<f32>,
    metadata: serde_json::Value,
}

/// Brute-force cosine similarity index.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    entries: RwLock<HashMap<ChunkId, VectorEntry>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn metadata(&self, chunk_id: &ChunkId) -> Option<serde_json::Value> {
        self.entries
            .read()
            .await
            .get(chunk_id)
            .map(|e| e.metadata.clone())
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<(ChunkId, f32)>, RetrievalError> {
        let entries = self.entries.read().await;
        let mut scored = Vec::with_capacity(entries.len());
        for (id, entry) in entries.iter() {
            if entry.vector.len() != vector.len() {
                return Err(RetrievalError::DimensionMismatch {
                    expected: entry.vector.len(),
                    got: vector.len(),
                });
            }
            scored.push((id.clone(), cosine(vector, &entry.vector)));
        }
        Ok(rank_desc(scored, k))
    }

    async fn upsert(
        &self,
        chunk_id: ChunkId,
        vector: Vec<f32>,
        metadata: serde_json::Value,
    ) -> Result<(), RetrievalError> {
        self.entries
            .write()
            .await
            .insert(chunk_id, VectorEntry { vector, metadata });
        Ok(())
    }
}

/// Term-match index. An exact term hit scores 1.0, a partial hit
/// (substring of an indexed term, at least 3 characters) scores 0.5.
#[derive(Default)]
pub struct InMemoryLexicalIndex {
    terms: RwLock<HashMap<ChunkId, HashSet<String>>>,
}

impl InMemoryLexicalIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LexicalIndex for InMemoryLexicalIndex {
    async fn query(&self, terms: &[String], k: usize) -> Result<Vec<(ChunkId, f32)>, RetrievalError> {
        let query: HashSet<String> = terms.iter().map(|t| t.to_lowercase()).collect();
        let index = self.terms.read().await;

        let scored: Vec<(ChunkId, f32)> = index
            .iter()
            .filter_map(|(id, indexed)| {
                let score: f32 = query
                    .iter()
                    .map(|term| {
                        if indexed.contains(term) {
                            1.0
                        } else if term.chars().count() >= 3
                            && indexed.iter().any(|t| t.contains(term.as_str()))
                        {
                            0.5
                        } else {
                            0.0
                        }
                    })
                    .sum();
                (score > 0.0).then(|| (id.clone(), score))
            })
            .collect();

        Ok(rank_desc(scored, k))
    }

    async fn upsert(&self, chunk_id: ChunkId, text: &str) -> Result<(), RetrievalError> {
        let terms = tokenize(text).into_iter().collect();
        self.terms.write().await.insert(chunk_id, terms);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_vector_index_ranks_by_similarity() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert("a".into(), vec![1.0, 0.0], serde_json::Value::Null)
            .await
            .unwrap();
        index
            .upsert("b".into(), vec![0.0, 1.0], serde_json::Value::Null)
            .await
            .unwrap();
        index
            .upsert("c".into(), vec![0.7, 0.7], serde_json::Value::Null)
            .await
            .unwrap();

        let ranked = index.query(&[1.0, 0.1], 2).await.unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].0, ChunkId::from("a"));
        assert_eq!(ranked[1].0, ChunkId::from("c"));
    }

    #[tokio::test]
    async fn test_vector_index_dimension_mismatch() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert("a".into(), vec![1.0, 0.0], serde_json::Value::Null)
            .await
            .unwrap();
        assert!(matches!(
            index.query(&[1.0], 1).await,
            Err(RetrievalError::DimensionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_lexical_exact_beats_partial_and_ties_break_by_id() {
        let index = InMemoryLexicalIndex::new();
        index.upsert("b".into(), "cloud revenue").await.unwrap();
        index.upsert("a".into(), "cloud revenue").await.unwrap();
        index.upsert("c".into(), "revenues only").await.unwrap();
        index.upsert("d".into(), "unrelated text").await.unwrap();

        let ranked = index
            .query(&["cloud".to_string(), "revenue".to_string()], 10)
            .await
            .unwrap();
        let ids: Vec<&str> = ranked.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!((ranked[2].1 - 0.5).abs() < f32::EPSILON);
    }
}
