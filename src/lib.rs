//! # Evidentia
//!
//! A multi-agent research orchestrator that answers questions over a private
//! document corpus with cited, confidence-scored reports.
//!
//! This library provides:
//! - Hybrid retrieval (semantic + lexical) merged by Reciprocal Rank Fusion
//! - A supervisor that schedules a dependency graph of sub-tasks
//! - Self-correction when validation finds problems
//! - Human escalation for ambiguous queries and low-confidence results
//!
//! ## Architecture
//!
//! ```text
//!        ┌──────────────────────────────────┐
//!        │           Orchestrator           │
//!        │   (Planner → Supervisor loop)    │
//!        └────────────────┬─────────────────┘
//!                         │
//!         ┌───────────────┼────────────────┐
//!         ▼               ▼                ▼
//!   ┌───────────┐   ┌───────────┐   ┌─────────────┐
//!   │ Researcher│   │ Validator │   │ Synthesizer │
//!   └─────┬─────┘   └───────────┘   └──────┬──────┘
//!         │                                │
//!         ▼                                ▼
//!  ┌────────────────┐            ┌───────────────────┐
//!  │ FusionRetriever│            │ citations +       │
//!  │ (RRF, cache)   │            │ confidence score  │
//!  └────────────────┘            └───────────────────┘
//! ```
//!
//! ## Run Flow
//! 1. Rewrite and decompose the query into a task plan
//! 2. Route the earliest ready sub-task to its capability
//! 3. Inject research + re-validation when a critique fails
//! 4. Pause for a human when the escalation gate fires
//! 5. Return the report with run metadata
//!
//! ## Modules
//! - `orchestrator`: run loop, routing, self-correction, escalation
//! - `agents`: planner, researcher, validator, synthesizer
//! - `retrieval`: ingestion, indices, fusion retrieval
//! - `task`: sub-task graph
//! - `llm`: generation client, rate limiting, retries, output contracts

pub mod agents;
pub mod citation;
pub mod confidence;
pub mod config;
pub mod evaluation;
pub mod llm;
pub mod orchestrator;
pub mod report;
pub mod retrieval;
pub mod state;
pub mod task;

pub use config::Config;
pub use orchestrator::{HumanChannel, HumanReply, HumanRequest, Orchestrator};
pub use report::{FinalReport, RunOutcome};
