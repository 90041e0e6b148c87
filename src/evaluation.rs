//! LLM-as-judge quality scoring of a finished report.
//!
//! Four judges score faithfulness, relevance, completeness and citation
//! quality. The overall score is their weighted mean, graded A to F.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::agents::truncate_chars;
use crate::llm::{Contract, Invoker, ModelTier};
use crate::report::FinalReport;

const JUDGE_SYSTEM: &str = "You are a strict but fair evaluation judge. Return structured scores as a \
JSON object: {\"metric_name\": \"...\", \"score\": 0.0, \"reasoning\": \"...\", \"issues\": [\"...\"]}";

const RESPONSE_CHARS: usize = 4000;

const FAITHFULNESS_WEIGHT: f64 = 0.35;
const RELEVANCE_WEIGHT: f64 = 0.25;
const COMPLETENESS_WEIGHT: f64 = 0.25;
const CITATION_WEIGHT: f64 = 0.15;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricScore {
    pub metric_name: String,
    pub score: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub issues: Vec<String>,
}

impl Contract for MetricScore {
    const NAME: &'static str = "MetricScore";

    fn check(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.score) {
            return Err(format!("score {} outside [0, 1]", self.score));
        }
        Ok(())
    }
}

impl MetricScore {
    fn failed(metric: &str, error: impl std::fmt::Display) -> Self {
        Self {
            metric_name: metric.to_string(),
            score: 0.0,
            reasoning: format!("Evaluation failed: {}", error),
            issues: vec![error.to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub query: String,
    pub faithfulness: MetricScore,
    pub relevance: MetricScore,
    pub completeness: MetricScore,
    pub citation_quality: MetricScore,
    pub overall_score: f64,
    pub grade: char,
    pub summary: String,
}

/// Weighted mean of the four metric scores.
pub fn overall_score(faithfulness: f64, relevance: f64, completeness: f64, citation_quality: f64) -> f64 {
    FAITHFULNESS_WEIGHT * faithfulness
        + RELEVANCE_WEIGHT * relevance
        + COMPLETENESS_WEIGHT * completeness
        + CITATION_WEIGHT * citation_quality
}

pub fn grade(score: f64) -> char {
    match score {
        s if s >= 0.9 => 'A',
        s if s >= 0.8 => 'B',
        s if s >= 0.7 => 'C',
        s if s >= 0.6 => 'D',
        _ => 'F',
    }
}

fn render_response(report: &FinalReport) -> String {
    let recommendations: Vec<String> = report
        .recommendations
        .iter()
        .map(|r| format!("- {}", r))
        .collect();
    let full = format!(
        "{}\n\n{}\n\nRecommendations:\n{}",
        report.executive_summary,
        report.detailed_analysis,
        recommendations.join("\n")
    );
    truncate_chars(&full, RESPONSE_CHARS).to_string()
}

pub struct Evaluator {
    invoker: Arc<Invoker>,
}

impl Evaluator {
    pub fn new(invoker: Arc<Invoker>) -> Self {
        Self { invoker }
    }

    /// Score `report`. Judges run concurrently; a failed judge scores 0.
    pub async fn evaluate(&self, report: &FinalReport, evidence: &str) -> EvaluationResult {
        let response = render_response(report);
        let evidence = truncate_chars(evidence, RESPONSE_CHARS);
        let query = &report.query;

        let faithfulness = format!(
            "Assess FAITHFULNESS: does the response contain only information supported by \
             the evidence? 1.0 = every claim supported, 0.5 = some unsupported, 0.0 = mostly \
             fabricated. List hallucinated claims as issues.\n\nQUERY: {}\n\nRESPONSE:\n{}\n\nEVIDENCE:\n{}",
            query, response, evidence
        );
        let relevance = format!(
            "Assess RELEVANCE: does the response answer what the user asked? 1.0 = directly and \
             fully, 0.5 = partially, 0.0 = not at all. List irrelevant sections as issues.\n\n\
             QUERY: {}\n\nRESPONSE:\n{}",
            query, response
        );
        let completeness = format!(
            "Assess COMPLETENESS: are all aspects of the question addressed? Break the query \
             into sub-questions and check each. List missing aspects as issues.\n\n\
             QUERY: {}\n\nRESPONSE:\n{}",
            query, response
        );
        let citation_quality = format!(
            "Assess CITATION QUALITY: are claims attributed to specific, relevant sources with \
             no important claim left uncited? List citation problems as issues.\n\n\
             QUERY: {}\n\nRESPONSE:\n{}\n\nNUMBER OF CITATIONS: {}",
            query,
            response,
            report.citations.len()
        );

        let (faithfulness, relevance, completeness, citation_quality) = futures::join!(
            self.judge("faithfulness", &faithfulness),
            self.judge("relevance", &relevance),
            self.judge("completeness", &completeness),
            self.judge("citation_quality", &citation_quality),
        );

        let overall = overall_score(
            faithfulness.score,
            relevance.score,
            completeness.score,
            citation_quality.score,
        );
        let grade = grade(overall);
        let summary = format!(
            "Overall: {} ({:.1}%). Faithfulness: {:.1}%, Relevance: {:.1}%, Completeness: {:.1}%, Citations: {:.1}%.",
            grade,
            overall * 100.0,
            faithfulness.score * 100.0,
            relevance.score * 100.0,
            completeness.score * 100.0,
            citation_quality.score * 100.0
        );
        tracing::info!("{}", summary);

        EvaluationResult {
            query: query.clone(),
            faithfulness,
            relevance,
            completeness,
            citation_quality,
            overall_score: (overall * 1000.0).round() / 1000.0,
            grade,
            summary,
        }
    }

    async fn judge(&self, metric: &str, prompt: &str) -> MetricScore {
        match self
            .invoker
            .structured::<MetricScore>(ModelTier::Primary, JUDGE_SYSTEM, prompt)
            .await
        {
            Ok(mut score) => {
                score.metric_name = metric.to_string();
                score
            }
            Err(e) => {
                tracing::warn!("Judge {} failed: {}", metric, e);
                MetricScore::failed(metric, e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_sum_to_one() {
        assert!((overall_score(1.0, 1.0, 1.0, 1.0) - 1.0).abs() < 1e-12);
        assert!((overall_score(0.8, 0.6, 0.4, 1.0) - (0.28 + 0.15 + 0.10 + 0.15)).abs() < 1e-12);
    }

    #[test]
    fn test_grades() {
        assert_eq!(grade(0.95), 'A');
        assert_eq!(grade(0.9), 'A');
        assert_eq!(grade(0.85), 'B');
        assert_eq!(grade(0.7), 'C');
        assert_eq!(grade(0.65), 'D');
        assert_eq!(grade(0.2), 'F');
    }

    #[test]
    fn test_metric_contract_rejects_out_of_range() {
        let m: MetricScore = serde_json::from_str(r#"{"metric_name": "x", "score": 1.2}"#).unwrap();
        assert!(m.check().is_err());
    }
}
