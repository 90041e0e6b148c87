//! Hybrid semantic + lexical retriever.

use std::sync::Arc;

use super::cache::RetrievalCache;
use super::fusion::{edge_interleave, reciprocal_rank_fusion};
use super::{tokenize, ChunkId, RetrievalBackend, RetrievalError, RetrievedChunk};
use crate::config::RetrievalConfig;

/// Retriever for fused evidence search.
pub struct FusionRetriever {
    backend: RetrievalBackend,
    cache: Arc<RetrievalCache>,
    semantic_top_k: usize,
    lexical_top_k: usize,
    fused_top_n: usize,
    rrf_k: f64,
}

impl FusionRetriever {
    /// Create a new retriever. The cache may be shared across runs.
    pub fn new(backend: RetrievalBackend, cache: Arc<RetrievalCache>, cfg: &RetrievalConfig) -> Self {
        Self {
            backend,
            cache,
            semantic_top_k: cfg.semantic_top_k,
            lexical_top_k: cfg.lexical_top_k,
            fused_top_n: cfg.fused_top_n,
            rrf_k: cfg.rrf_k,
        }
    }

    /// Search with the configured result count.
    pub async fn search_default(&self, query: &str) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        self.search(query, self.fused_top_n).await
    }

    /// Return at most `min(k, fused_top_n)` chunks, strongest evidence at both ends.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let k = k.min(self.fused_top_n);
        if let Some(hit) = self.cache.get(query, k).await {
            tracing::debug!("Retrieval cache hit for {:?} (k={})", query, k);
            return Ok(hit.as_ref().clone());
        }

        let terms = tokenize(query);
        let semantic = async {
            let vector = self.backend.embedder.embed(query).await?;
            self.backend.vectors.query(&vector, self.semantic_top_k).await
        };
        let lexical = self.backend.lexical.query(&terms, self.lexical_top_k);
        let (semantic, lexical) = tokio::join!(semantic, lexical);

        let semantic: Vec<ChunkId> = semantic?.into_iter().map(|(id, _)| id).collect();
        let lexical: Vec<ChunkId> = lexical?.into_iter().map(|(id, _)| id).collect();

        let mut fused = reciprocal_rank_fusion(&semantic, &lexical, self.rrf_k);
        fused.truncate(k);

        let mut ranked = Vec::with_capacity(fused.len());
        for candidate in fused {
            match self.backend.store.get(&candidate.id).await {
                Some(mut chunk) => {
                    chunk.relevance = Some(candidate.score);
                    ranked.push(RetrievedChunk {
                        chunk,
                        reference: 0,
                        fused_score: candidate.score,
                        semantic_rank: candidate.semantic_rank,
                        lexical_rank: candidate.lexical_rank,
                    });
                }
                None => tracing::warn!("Index returned unknown chunk {}", candidate.id),
            }
        }

        let mut results = edge_interleave(ranked);
        for (i, r) in results.iter_mut().enumerate() {
            r.reference = i + 1;
        }

        tracing::info!(
            "Retrieved {} chunks for {:?} ({} semantic, {} lexical)",
            results.len(),
            query,
            semantic.len(),
            lexical.len()
        );

        self.cache.insert(query, k, Arc::new(results.clone())).await;
        Ok(results)
    }

    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }
}

/// Render retrieved chunks as numbered source blocks for a prompt.
pub fn format_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|r| {
            format!(
                "[Source {}: {} | ID: {}]\n{}",
                r.reference, r.chunk.document_id, r.chunk.id, r.chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::{EvidenceChunk, HashingEmbedder, LexicalIndex, VectorIndex};
    use std::time::Duration;

    async fn backend_with(texts: &[(&str, &str)]) -> RetrievalBackend {
        let backend = RetrievalBackend::in_memory(Arc::new(HashingEmbedder::new(64)));
        for (doc, text) in texts {
            let chunk = EvidenceChunk::new(*doc, *text);
            let vector = backend.embedder.embed(text).await.unwrap();
            backend
                .vectors
                .upsert(chunk.id.clone(), vector, serde_json::json!({ "document_id": doc }))
                .await
                .unwrap();
            backend.lexical.upsert(chunk.id.clone(), text).await.unwrap();
            backend.store.insert(chunk).await;
        }
        backend
    }

    fn retriever(backend: RetrievalBackend) -> FusionRetriever {
        FusionRetriever::new(
            backend,
            Arc::new(RetrievalCache::new(Duration::from_secs(300), 256)),
            &RetrievalConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_search_respects_k_and_numbers_references() {
        let corpus: Vec<(String, String)> = (0..10)
            .map(|i| (format!("doc{}.md", i), format!("revenue figure number {} for cloud", i)))
            .collect();
        let pairs: Vec<(&str, &str)> = corpus.iter().map(|(d, t)| (d.as_str(), t.as_str())).collect();
        let r = retriever(backend_with(&pairs).await);

        let results = r.search("cloud revenue", 4).await.unwrap();
        assert_eq!(results.len(), 4);
        let refs: Vec<usize> = results.iter().map(|c| c.reference).collect();
        assert_eq!(refs, vec![1, 2, 3, 4]);
        assert!(results.iter().all(|c| c.chunk.relevance.is_some()));
    }

    #[tokio::test]
    async fn test_search_never_exceeds_fused_top_n() {
        let corpus: Vec<(String, String)> = (0..10)
            .map(|i| (format!("doc{}.md", i), format!("cloud revenue line {}", i)))
            .collect();
        let pairs: Vec<(&str, &str)> = corpus.iter().map(|(d, t)| (d.as_str(), t.as_str())).collect();
        let r = retriever(backend_with(&pairs).await);

        let fused_top_n = RetrievalConfig::default().fused_top_n;
        let results = r.search("cloud revenue", 20).await.unwrap();
        assert_eq!(results.len(), fused_top_n);
        assert_eq!(results.last().map(|c| c.reference), Some(fused_top_n));
    }

    #[tokio::test]
    async fn test_strongest_results_sit_at_the_edges() {
        let corpus: Vec<(String, String)> = (0..8)
            .map(|i| (format!("d{}.md", i), format!("margin analysis section {}", i)))
            .collect();
        let pairs: Vec<(&str, &str)> = corpus.iter().map(|(d, t)| (d.as_str(), t.as_str())).collect();
        let r = retriever(backend_with(&pairs).await);

        let results = r.search("margin analysis", 6).await.unwrap();
        let best = results
            .iter()
            .map(|c| c.fused_score)
            .fold(f64::MIN, f64::max);
        assert_eq!(results[0].fused_score, best);
        let middle = results[results.len() / 2].fused_score;
        assert!(results[results.len() - 1].fused_score >= middle);
    }

    #[tokio::test]
    async fn test_search_is_cached_per_query_and_k() {
        let backend = backend_with(&[("a.md", "cloud revenue grew")]).await;
        let r = retriever(backend.clone());
        let first = r.search("cloud", 6).await.unwrap();
        assert_eq!(first.len(), 1);

        // New evidence is invisible until the cached entry is cleared.
        let extra = EvidenceChunk::new("b.md", "cloud costs fell");
        backend.lexical.upsert(extra.id.clone(), &extra.text).await.unwrap();
        let vector = backend.embedder.embed(&extra.text).await.unwrap();
        backend
            .vectors
            .upsert(extra.id.clone(), vector, serde_json::Value::Null)
            .await
            .unwrap();
        backend.store.insert(extra).await;

        assert_eq!(r.search("cloud", 6).await.unwrap().len(), 1);
        r.clear_cache().await;
        assert_eq!(r.search("cloud", 6).await.unwrap().len(), 2);
    }

    #[test]
    fn test_format_context() {
        let chunk = EvidenceChunk::new("q3.md", "Revenue rose.");
        let id = chunk.id.clone();
        let rendered = format_context(&[RetrievedChunk {
            chunk,
            reference: 1,
            fused_score: 0.03,
            semantic_rank: Some(1),
            lexical_rank: None,
        }]);
        assert_eq!(rendered, format!("[Source 1: q3.md | ID: {}]\nRevenue rose.", id));
    }
}
