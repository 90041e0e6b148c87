//! Document loading, chunking and indexing.

use std::path::Path;
use walkdir::WalkDir;

use super::{EvidenceChunk, RetrievalBackend, RetrievalError};
use crate::config::RetrievalConfig;

const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

/// A source document before chunking.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub text: String,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Summary of one ingestion pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    /// Chunks already present from an earlier pass.
    pub skipped: usize,
}

/// Load every `.txt` and `.md` file under `dir`. Ids are paths relative to `dir`.
pub fn load_documents(dir: &Path) -> Result<Vec<Document>, RetrievalError> {
    let mut documents = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| RetrievalError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let supported = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("txt") | Some("md")
        );
        if !supported {
            continue;
        }
        let text = std::fs::read_to_string(path)?;
        if text.trim().is_empty() {
            tracing::debug!("Skipping empty document {}", path.display());
            continue;
        }
        let id = path
            .strip_prefix(dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        documents.push(Document { id, text });
    }
    tracing::info!("Loaded {} documents from {}", documents.len(), dir.display());
    Ok(documents)
}

/// Split `text` into chunks of at most `size` characters, with roughly
/// `overlap` characters carried between neighbours.
///
/// Splits on the coarsest separator that works (paragraph, line, sentence,
/// word) and falls back to a hard character split.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let size = size.max(1);
    let overlap = overlap.min(size.saturating_sub(1));
    let pieces = split_recursive(text, size, &SEPARATORS);
    merge_pieces(pieces, size, overlap)
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Break text into pieces no longer than `size`, keeping separators attached.
fn split_recursive(text: &str, size: usize, separators: &[&str]) -> Vec<String> {
    if char_len(text) <= size {
        return vec![text.to_string()];
    }
    let Some((sep, rest)) = separators.split_first() else {
        return hard_split(text, size);
    };
    if !text.contains(sep) {
        return split_recursive(text, size, rest);
    }

    let mut pieces = Vec::new();
    for part in text.split_inclusive(sep) {
        if char_len(part) <= size {
            pieces.push(part.to_string());
        } else {
            pieces.extend(split_recursive(part, size, rest));
        }
    }
    pieces
}

fn hard_split(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

/// Greedily pack pieces into chunks, seeding each new chunk with the tail
/// pieces of the previous one that fit within `overlap`.
fn merge_pieces(pieces: Vec<String>, size: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: Vec<String> = Vec::new();
    let mut window_len = 0;

    for piece in pieces {
        let len = char_len(&piece);
        if window_len + len > size && !window.is_empty() {
            chunks.push(window.concat());
            while !window.is_empty() && (window_len > overlap || window_len + len > size) {
                let dropped = window.remove(0);
                window_len -= char_len(&dropped);
            }
        }
        window_len += len;
        window.push(piece);
    }
    if !window.is_empty() {
        chunks.push(window.concat());
    }
    chunks
}

/// Chunks, embeds and indexes documents into a [`RetrievalBackend`].
pub struct Ingestor {
    backend: RetrievalBackend,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Ingestor {
    pub fn new(backend: RetrievalBackend, cfg: &RetrievalConfig) -> Self {
        Self {
            backend,
            chunk_size: cfg.chunk_size,
            chunk_overlap: cfg.chunk_overlap,
        }
    }

    /// Index documents. Chunks already in the store are skipped, so
    /// re-ingesting the same corpus is a no-op.
    pub async fn ingest(&self, documents: &[Document]) -> Result<IngestReport, RetrievalError> {
        let mut report = IngestReport {
            documents: documents.len(),
            ..Default::default()
        };

        for doc in documents {
            for text in chunk_text(&doc.text, self.chunk_size, self.chunk_overlap) {
                let chunk = EvidenceChunk::new(doc.id.clone(), text);
                if self.backend.store.contains(&chunk.id).await {
                    report.skipped += 1;
                    continue;
                }

                let vector = self.backend.embedder.embed(&chunk.text).await?;
                self.backend
                    .vectors
                    .upsert(
                        chunk.id.clone(),
                        vector,
                        serde_json::json!({ "document_id": doc.id }),
                    )
                    .await?;
                self.backend.lexical.upsert(chunk.id.clone(), &chunk.text).await?;
                self.backend.store.insert(chunk).await;
                report.chunks += 1;
            }
        }

        tracing::info!(
            "Ingested {} documents: {} new chunks, {} already indexed",
            report.documents,
            report.chunks,
            report.skipped
        );
        Ok(report)
    }
}
