//! Evidentia command line.
//!
//! ```text
//! evidentia [--config FILE] [--evaluate] [--no-human] <documents_dir> <query...>
//! ```
//!
//! Ingests `.txt` / `.md` files under `documents_dir`, answers the query and
//! prints the run outcome as JSON on stdout. Escalations are asked on stderr
//! and answered on stdin; an empty line means "proceed".

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

use evidentia::llm::HttpLlmClient;
use evidentia::orchestrator::AutoProceed;
use evidentia::retrieval::{
    load_documents, Embedder, HashingEmbedder, HttpEmbedder, Ingestor, RetrievalBackend,
    RetrievalCache,
};
use evidentia::{Config, HumanChannel, HumanReply, HumanRequest, Orchestrator};

/// Asks on stderr, reads one line from stdin.
struct StdinHumanChannel {
    lines: Mutex<tokio::io::Lines<BufReader<tokio::io::Stdin>>>,
}

impl StdinHumanChannel {
    fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

#[async_trait]
impl HumanChannel for StdinHumanChannel {
    async fn ask(&self, request: &HumanRequest, timeout: Duration) -> HumanReply {
        eprintln!("\n=== Human review needed: {} ===", request.reason);
        eprintln!("{}", request.context);
        eprintln!("{}", request.question);
        eprint!("(answer within {}s) > ", timeout.as_secs());

        let mut lines = self.lines.lock().await;
        match tokio::time::timeout(timeout, lines.next_line()).await {
            Ok(Ok(Some(line))) if !line.trim().is_empty() => HumanReply::Clarified(line.trim().to_string()),
            Ok(Ok(_)) => HumanReply::Proceed,
            Ok(Err(e)) => {
                tracing::warn!("Failed to read reply from stdin: {}", e);
                HumanReply::Proceed
            }
            Err(_) => HumanReply::TimedOut,
        }
    }
}

struct Args {
    config: Option<PathBuf>,
    evaluate: bool,
    interactive: bool,
    documents: PathBuf,
    query: String,
}

fn parse_args() -> Result<Args> {
    let mut config = None;
    let mut evaluate = false;
    let mut interactive = true;
    let mut positional = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().context("--config needs a file path")?;
                config = Some(PathBuf::from(path));
            }
            "--evaluate" => evaluate = true,
            "--no-human" => interactive = false,
            _ => positional.push(arg),
        }
    }

    if positional.len() < 2 {
        bail!("usage: evidentia [--config FILE] [--evaluate] [--no-human] <documents_dir> <query...>");
    }
    let documents = PathBuf::from(positional.remove(0));
    Ok(Args {
        config,
        evaluate,
        interactive,
        documents,
        query: positional.join(" "),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("evidentia=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate()?;

    let Some(api_key) = config.models.api_key.clone() else {
        bail!("no API key configured (set OPENROUTER_API_KEY or OPENAI_API_KEY)");
    };

    let client = Arc::new(HttpLlmClient::new(config.models.api_base.clone(), api_key.clone()));
    let embedder: Arc<dyn Embedder> = if std::env::var("EVIDENTIA_OFFLINE_EMBEDDINGS").is_ok() {
        tracing::info!("Using offline hashing embedder");
        Arc::new(HashingEmbedder::new(config.retrieval.embedding_dimensions))
    } else {
        Arc::new(HttpEmbedder::new(
            config.models.api_base.clone(),
            api_key,
            config.models.embedding_model.clone(),
            config.retrieval.embedding_dimensions,
        ))
    };

    let backend = RetrievalBackend::in_memory(embedder);
    let documents = load_documents(&args.documents)
        .with_context(|| format!("failed to load documents from {}", args.documents.display()))?;
    if documents.is_empty() {
        tracing::warn!("No .txt or .md documents under {}", args.documents.display());
    }
    Ingestor::new(backend.clone(), &config.retrieval)
        .ingest(&documents)
        .await
        .context("ingestion failed")?;

    let human: Arc<dyn HumanChannel> = if args.interactive {
        Arc::new(StdinHumanChannel::new())
    } else {
        Arc::new(AutoProceed)
    };
    let cache = Arc::new(RetrievalCache::new(
        config.retrieval.cache_ttl(),
        config.retrieval.cache_max_entries,
    ));
    let orchestrator = Orchestrator::new(config, client, backend.clone(), cache, human)?;

    let outcome = orchestrator.run(&args.query).await;

    let evaluation = if args.evaluate {
        let mut evidence = Vec::new();
        for citation in &outcome.report.citations {
            if let Some(id) = &citation.chunk_id {
                if let Some(chunk) = backend.store.get(id).await {
                    evidence.push(format!("[{}] {}", chunk.document_id, chunk.text));
                }
            }
        }
        Some(
            orchestrator
                .evaluator()
                .evaluate(&outcome.report, &evidence.join("\n\n"))
                .await,
        )
    } else {
        None
    };

    let output = serde_json::json!({
        "outcome": outcome,
        "evaluation": evaluation,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
