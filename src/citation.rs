//! Citation resolution and auditing.
//!
//! Citations come back from synthesis as drafts pointing at a numbered
//! source or a document name. Drafts are resolved against the evidence
//! retrieved in this run; anything that does not resolve is an orphan and
//! is dropped.

use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::report::{Citation, OrphanCitation};
use crate::retrieval::EvidenceChunk;

/// A citation as produced by synthesis, before resolution.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CitationDraft {
    pub claim: String,
    /// 1-based `[Source N]` index into the numbered evidence.
    #[serde(default)]
    pub source: Option<usize>,
    #[serde(default)]
    pub document: Option<String>,
}

#[derive(Debug, Default)]
pub struct Resolution {
    pub citations: Vec<Citation>,
    pub orphans: Vec<OrphanCitation>,
}

fn source_regex() -> &'static Regex {
    static SOURCE: OnceLock<Regex> = OnceLock::new();
    SOURCE.get_or_init(|| Regex::new(r"\[Source\s*(\d+)[^\]]*\]").expect("valid regex"))
}

fn claim_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"\d+%",
            r"\$[\d,]+",
            r"\b\d{4}\b",
            r"(?i)according to",
            r"(?i)reported that",
            r"(?i)found that",
            r"(?i)shows that",
            r"(?i)indicates",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect()
    })
}

/// All `[Source N]` indices in `text`, in order of appearance.
pub fn extract_source_references(text: &str) -> Vec<usize> {
    source_regex()
        .captures_iter(text)
        .filter_map(|c| c.get(1).and_then(|m| m.as_str().parse().ok()))
        .collect()
}

/// Split prose into sentences on `.`, `!` or `?` followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(next, n)) = chars.peek() {
                if n.is_whitespace() {
                    let sentence = text[start..next].trim();
                    if !sentence.is_empty() {
                        sentences.push(sentence);
                    }
                    start = next;
                }
            }
        }
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

/// Resolve drafts against the evidence of this run.
///
/// `numbered` is the list the synthesizer saw, where `[Source N]` is
/// `numbered[N - 1]`. `evidence` is everything retrieved; a document named
/// directly must appear there.
pub fn resolve(drafts: &[CitationDraft], numbered: &[EvidenceChunk], evidence: &[EvidenceChunk]) -> Resolution {
    let retrieved: HashSet<&str> = evidence
        .iter()
        .chain(numbered.iter())
        .map(|c| c.document_id.as_str())
        .collect();
    let mut resolution = Resolution::default();

    for draft in drafts {
        let by_source = draft
            .source
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| numbered.get(i));

        if let Some(chunk) = by_source {
            resolution.citations.push(Citation::new(
                draft.claim.clone(),
                chunk.document_id.clone(),
                Some(chunk.id.clone()),
            ));
            continue;
        }

        match draft.document.as_deref().map(str::trim) {
            Some(doc) if retrieved.contains(doc) => {
                let chunk_id = evidence
                    .iter()
                    .find(|c| c.document_id == doc)
                    .map(|c| c.id.clone());
                resolution
                    .citations
                    .push(Citation::new(draft.claim.clone(), doc, chunk_id));
            }
            _ => {
                let reference = match (&draft.source, &draft.document) {
                    (_, Some(doc)) => doc.clone(),
                    (Some(n), None) => format!("Source {}", n),
                    (None, None) => "(none)".to_string(),
                };
                tracing::warn!("Dropping orphan citation to {}: {}", reference, draft.claim);
                resolution.orphans.push(OrphanCitation {
                    claim: draft.claim.clone(),
                    reference,
                });
            }
        }
    }
    resolution
}

/// Build drafts from inline `[Source N]` tags, one per (sentence, source) pair.
pub fn drafts_from_text(text: &str) -> Vec<CitationDraft> {
    let mut seen = HashSet::new();
    let mut drafts = Vec::new();
    for sentence in split_sentences(text) {
        let refs = extract_source_references(sentence);
        if refs.is_empty() {
            continue;
        }
        let stripped = source_regex().replace_all(sentence, "");
        let claim = stripped
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .replace(" .", ".");
        for n in refs {
            if seen.insert((claim.clone(), n)) {
                drafts.push(CitationDraft {
                    claim: claim.clone(),
                    source: Some(n),
                    document: None,
                });
            }
        }
    }
    drafts
}

/// Sentences that look like factual claims (figures, years, attributions)
/// but carry no `[Source N]` tag.
pub fn find_uncited_claims(text: &str) -> Vec<String> {
    split_sentences(text)
        .into_iter()
        .filter(|s| claim_patterns().iter().any(|p| p.is_match(s)))
        .filter(|s| !source_regex().is_match(s))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evidence() -> Vec<EvidenceChunk> {
        vec![
            EvidenceChunk::new("q3.md", "Cloud revenue grew 12%."),
            EvidenceChunk::new("risk.md", "Margins fell."),
        ]
    }

    #[test]
    fn test_extract_source_references() {
        let text = "Revenue grew [Source 1]. Margins fell [Source 2: risk.md] and [Source  3].";
        assert_eq!(extract_source_references(text), vec![1, 2, 3]);
    }

    #[test]
    fn test_split_sentences() {
        assert_eq!(
            split_sentences("Revenue grew 2.5% in Q3. Costs fell!  Why? no end"),
            vec!["Revenue grew 2.5% in Q3.", "Costs fell!", "Why?", "no end"]
        );
    }

    #[test]
    fn test_resolve_by_source_and_document() {
        let ev = evidence();
        let drafts = vec![
            CitationDraft {
                claim: "Cloud grew".into(),
                source: Some(1),
                document: None,
            },
            CitationDraft {
                claim: "Margins fell".into(),
                source: None,
                document: Some("risk.md".into()),
            },
        ];
        let r = resolve(&drafts, &ev, &ev);
        assert!(r.orphans.is_empty());
        assert_eq!(r.citations[0].document_id, "q3.md");
        assert_eq!(r.citations[0].chunk_id.as_ref(), Some(&ev[0].id));
        assert_eq!(r.citations[1].document_id, "risk.md");
    }

    #[test]
    fn test_unretrieved_document_is_orphaned() {
        let ev = evidence();
        let drafts = vec![
            CitationDraft {
                claim: "Made up".into(),
                source: None,
                document: Some("never-retrieved.pdf".into()),
            },
            CitationDraft {
                claim: "Out of range".into(),
                source: Some(9),
                document: None,
            },
        ];
        let r = resolve(&drafts, &ev, &ev);
        assert!(r.citations.is_empty());
        assert_eq!(r.orphans.len(), 2);
        assert_eq!(r.orphans[0].reference, "never-retrieved.pdf");
        assert_eq!(r.orphans[1].reference, "Source 9");
    }

    #[test]
    fn test_drafts_from_text() {
        let drafts = drafts_from_text("Cloud grew 12% [Source 1]. Margins fell [Source 2] [Source 2]. No tag here.");
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].claim, "Cloud grew 12%.");
        assert_eq!(drafts[1].claim, "Margins fell.");
        assert_eq!(drafts[1].source, Some(2));
    }

    #[test]
    fn test_find_uncited_claims() {
        let text = "Revenue rose 12% in 2024. Costs fell 3% [Source 2]. The outlook is fine. \
                    The audit found that controls held.";
        assert_eq!(
            find_uncited_claims(text),
            vec!["Revenue rose 12% in 2024.", "The audit found that controls held."]
        );
    }
}
