//! Interactive console runner for the answer pipeline.
//!
//! Wires the Ollama and Qdrant backends from environment variables, then
//! reads queries from stdin and streams answers to stdout. Intended for
//! poking at a deployment, not as a production surface.

use std::{env, io::Write as _, sync::Arc};

use anyhow::Context;
use futures_util::StreamExt;
use ragpipe::{
    AnswerEvent, Capabilities, Config, RagService,
    embedding::OllamaEmbedder,
    generation::OllamaGenerator,
    index::QdrantIndex,
    logging,
    store::{MemoryDocumentStore, MemoryQueryStore},
};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();
    let config = Config::from_env().context("invalid configuration")?;

    let ollama_url =
        env::var("RAGPIPE_OLLAMA_URL").unwrap_or_else(|_| "http://localhost:11434".into());
    let embed_model = env::var("RAGPIPE_EMBED_MODEL").unwrap_or_else(|_| "nomic-embed-text".into());
    let generate_model = env::var("RAGPIPE_GENERATE_MODEL").unwrap_or_else(|_| "mistral".into());
    let qdrant_url =
        env::var("RAGPIPE_QDRANT_URL").unwrap_or_else(|_| "http://localhost:6333".into());
    let collection =
        env::var("RAGPIPE_QDRANT_COLLECTION").unwrap_or_else(|_| "ragpipe_chunks".into());

    let index = QdrantIndex::new(
        &qdrant_url,
        env::var("RAGPIPE_QDRANT_API_KEY").ok(),
        &collection,
    )
    .context("failed to initialize Qdrant client")?;
    index
        .ensure_collection(config.embedding_dimension as u64)
        .await
        .context("failed to ensure Qdrant collection")?;

    let embedder = OllamaEmbedder::new(&ollama_url, &embed_model, config.embedding_dimension)
        .context("failed to initialize embedding client")?;

    let service = RagService::new(
        config,
        Capabilities {
            embedder: Arc::new(embedder),
            index: Arc::new(index),
            llm: Arc::new(OllamaGenerator::new(ollama_url, generate_model)),
            documents: Arc::new(MemoryDocumentStore::new()),
            queries: Arc::new(MemoryQueryStore::new()),
        },
    )
    .await
    .context("failed to start service")?;

    println!("ragpipe console. Type a question, or an empty line to exit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            break;
        }

        let mut stream = match service.answer(&line) {
            Ok(stream) => stream,
            Err(error) => {
                eprintln!("cannot answer: {error}");
                continue;
            }
        };
        while let Some(event) = stream.next().await {
            match event {
                Ok(AnswerEvent::Content(token)) => {
                    print!("{token}");
                    std::io::stdout().flush().ok();
                }
                Ok(AnswerEvent::Sources(sources)) if !sources.is_empty() => {
                    println!();
                    for source in sources {
                        println!("  source: {} p.{}", source.document, source.page);
                    }
                }
                Ok(AnswerEvent::Images(images)) if !images.is_empty() => {
                    for image in images {
                        println!("  image: {image}");
                    }
                }
                Ok(AnswerEvent::Suggestions(suggestions)) if !suggestions.is_empty() => {
                    for suggestion in suggestions {
                        println!("  follow-up: {suggestion}");
                    }
                }
                Ok(AnswerEvent::Done(summary)) => {
                    println!(
                        "  ({} chunks, {} ms)",
                        summary.chunks_retrieved, summary.latency_ms
                    );
                }
                Ok(_) => {}
                Err(error) => {
                    eprintln!("turn failed: {error}");
                    break;
                }
            }
        }
    }
    Ok(())
}
