//! Evidence gathering for one research sub-task.

use std::sync::Arc;

use super::{truncate_chars, AgentError};
use crate::config::ContextLimits;
use crate::llm::{Invoker, ModelTier};
use crate::retrieval::{format_context, FusionRetriever, RetrievedChunk};

const RESEARCH_SYSTEM: &str = "You are the Researcher of an evidence-based research system.\n\n\
You receive the user query, your sub-task, and context retrieved by hybrid search.\n\n\
Rules:\n\
- Focus only on evidence relevant to your sub-task.\n\
- Note the [Source N] reference for every finding.\n\
- If the context is insufficient, say what is missing.\n\
- Never fabricate information. If the documents do not answer the question, say so.\n\
- If sources contradict each other, present both with their references.\n\
- Organise the output as: Key Findings, Gaps, Contradictions.";

const SUFFICIENCY_SYSTEM: &str = "Given the following research findings, assess whether there is \
sufficient evidence to answer the user's question. Respond with exactly \"SUFFICIENT\" or \
\"INSUFFICIENT: <what's missing>\".";

/// What one research step produced.
#[derive(Debug, Clone)]
pub struct ResearchOutput {
    pub search_query: String,
    pub summary: String,
    pub chunks: Vec<RetrievedChunk>,
    /// `None` when the sufficiency check itself failed.
    pub sufficient: Option<bool>,
    pub missing: Option<String>,
}

pub struct Researcher {
    invoker: Arc<Invoker>,
    retriever: Arc<FusionRetriever>,
    findings_chars: usize,
}

impl Researcher {
    pub fn new(invoker: Arc<Invoker>, retriever: Arc<FusionRetriever>, limits: &ContextLimits) -> Self {
        Self {
            invoker,
            retriever,
            findings_chars: limits.findings_chars,
        }
    }

    pub async fn research(&self, anchored_query: &str, task_description: &str) -> Result<ResearchOutput, AgentError> {
        let search_query = format!("{} {}", anchored_query, task_description)
            .trim()
            .to_string();
        let chunks = self.retriever.search_default(&search_query).await?;

        let context = if chunks.is_empty() {
            "(No documents found in corpus)".to_string()
        } else {
            format_context(&chunks)
        };
        let user = format!(
            "ORIGINAL QUERY: {}\n\nSUB-TASK: {}\n\nRETRIEVED CONTEXT:\n{}",
            anchored_query, task_description, context
        );
        let summary = self
            .invoker
            .text(ModelTier::Secondary, RESEARCH_SYSTEM, &user)
            .await?;

        let (sufficient, missing) = self.check_sufficiency(anchored_query, &summary).await;
        tracing::info!(
            "Research on {:?}: {} chunks, sufficient={:?}",
            task_description,
            chunks.len(),
            sufficient
        );

        Ok(ResearchOutput {
            search_query,
            summary,
            chunks,
            sufficient,
            missing,
        })
    }

    async fn check_sufficiency(&self, query: &str, summary: &str) -> (Option<bool>, Option<String>) {
        let user = format!(
            "Query: {}\n\nFindings:\n{}",
            query,
            truncate_chars(summary, self.findings_chars / 2)
        );
        match self
            .invoker
            .text(ModelTier::Secondary, SUFFICIENCY_SYSTEM, &user)
            .await
        {
            Ok(verdict) => parse_sufficiency(&verdict),
            Err(e) => {
                tracing::warn!("Sufficiency check failed: {}", e);
                (None, None)
            }
        }
    }
}

fn parse_sufficiency(verdict: &str) -> (Option<bool>, Option<String>) {
    let verdict = verdict.trim();
    let upper = verdict.to_uppercase();
    if upper.starts_with("SUFFICIENT") {
        (Some(true), None)
    } else if upper.starts_with("INSUFFICIENT") {
        let missing = verdict
            .split_once(':')
            .map(|(_, rest)| rest.trim().to_string())
            .filter(|m| !m.is_empty());
        (Some(false), missing)
    } else {
        (None, None)
    }
}
