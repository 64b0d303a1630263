//! Ask questions over local text files
//!
//! Run with: cargo run -p grounded-rag -- --docs ./notes "What does insulin do?"

use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;
use walkdir::WalkDir;

use grounded_rag::providers::{EmbeddingProvider, InMemoryVectorStore, OllamaClient};
use grounded_rag::{Chunk, RagConfig, RagEvent, RagOrchestrator, RagRequest};

const CHUNK_CHARS: usize = 800;
const CHUNK_OVERLAP: usize = 100;

#[derive(Parser, Debug)]
#[command(name = "grounded-rag", version, about = "Answer questions from local documents with source citations")]
struct Args {
    /// The question to answer
    question: String,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Files or folders to index (.txt and .md)
    #[arg(short, long, required = true)]
    docs: Vec<PathBuf>,

    /// Decompose the question into sub-questions
    #[arg(long)]
    multi_hop: bool,

    /// Print the answer only when complete
    #[arg(long)]
    no_stream: bool,

    /// Chunks retrieved per query
    #[arg(long)]
    top_k: Option<usize>,

    /// Context token budget
    #[arg(long)]
    budget: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "grounded_rag=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => RagConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => RagConfig::default(),
    };

    let ollama = Arc::new(OllamaClient::new(&config.llm)?);
    if !ollama.health_check().await {
        tracing::warn!("Ollama not available at {}", config.llm.base_url);
        tracing::warn!("  Start it with `ollama serve` and pull the models:");
        tracing::warn!("  ollama pull {} && ollama pull {}", config.llm.embed_model, config.llm.generate_model);
    }

    let store = Arc::new(InMemoryVectorStore::new());
    let indexed = index_documents(&args.docs, ollama.as_ref(), &store).await?;
    tracing::info!("Indexed {} chunks", indexed);

    let orchestrator = RagOrchestrator::new(ollama.clone(), store, ollama, &config);

    let mut options = orchestrator.default_options();
    if let Some(top_k) = args.top_k {
        options.top_k = top_k;
    }
    if let Some(budget) = args.budget {
        options.token_budget = budget;
    }

    let mut request = RagRequest::new(args.question).with_options(options);
    if args.multi_hop {
        request = request.multi_hop();
    }
    if args.no_stream {
        request = request.without_streaming();
    }

    let mut run = orchestrator.run(request);
    let mut stdout = std::io::stdout();

    while let Some(event) = run.next().await {
        match event {
            RagEvent::Fragment { content } => {
                write!(stdout, "{}", content)?;
                stdout.flush()?;
            }
            RagEvent::Final { result } => {
                if args.no_stream {
                    write!(stdout, "{}", result.answer)?;
                }
                writeln!(stdout)?;

                for sq in &result.sub_questions {
                    writeln!(stdout, "\n  Q{}: {}", sq.index + 1, sq.text)?;
                    if let Some(answer) = &sq.answer {
                        writeln!(stdout, "      {}", answer)?;
                    }
                }

                if !result.citations.is_empty() {
                    writeln!(stdout, "\nSources:")?;
                    for citation in &result.citations {
                        writeln!(
                            stdout,
                            "  [{}] {} (relevance {:.2})\n      {}",
                            citation.source_label,
                            citation.format_inline(),
                            citation.relevance_score,
                            citation.preview
                        )?;
                    }
                }
                tracing::info!("Answered in {}ms", result.processing_time_ms);
            }
            RagEvent::Failed { failure } => {
                anyhow::bail!("{} ({}): {}", failure.state, failure.kind, failure.message);
            }
        }
    }

    Ok(())
}

async fn index_documents(
    paths: &[PathBuf],
    embedder: &dyn EmbeddingProvider,
    store: &InMemoryVectorStore,
) -> anyhow::Result<usize> {
    let mut indexed = 0;

    for root in paths {
        for entry in WalkDir::new(root).follow_links(true).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() || !is_text_file(path) {
                continue;
            }

            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let document_id = Uuid::new_v4().to_string();
            let document_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());

            for (index, text) in split_text(&content).into_iter().enumerate() {
                let vector = embedder.embed(&text).await?;
                let chunk = Chunk::new(
                    format!("{}-{}", document_id, index),
                    document_id.as_str(),
                    document_name.as_str(),
                    index as u32,
                    text,
                );
                store.insert(chunk, vector, None)?;
                indexed += 1;
            }
            tracing::info!("Indexed {}", path.display());
        }
    }

    Ok(indexed)
}

fn is_text_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            ext == "txt" || ext == "md"
        })
        .unwrap_or(false)
}

/// Fixed-size character windows with overlap
fn split_text(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + CHUNK_CHARS).min(chars.len());
        let chunk: String = chars[start..end].iter().collect();
        if !chunk.trim().is_empty() {
            chunks.push(chunk.trim().to_string());
        }
        if end == chars.len() {
            break;
        }
        start = end - CHUNK_OVERLAP;
    }

    chunks
}
