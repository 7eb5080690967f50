//! QA CLI - Command-line interface for grounded question answering.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use qa_core::{AnswerReader, Embedder, QaConfig, QaError, Query, StreamEvent, VectorStore};
use qa_embed::embedder_from_config;
use qa_query::SearchEngine;
use qa_server::{AppState, QaServer};
use qa_store::SqliteStore;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// QA - Question answering grounded in your own documents
#[derive(Parser)]
#[command(name = "qa")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: $QA_CONFIG, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path (overrides the config file)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Address to listen on (overrides the config file)
        #[arg(short, long)]
        bind: Option<String>,

        /// Directory of browser client files to serve under `/`
        #[arg(long)]
        static_dir: Option<PathBuf>,
    },

    /// Initialize the database
    Init,

    /// Insert or replace one document
    Insert {
        /// Document id
        id: String,

        /// Document text
        text: String,
    },

    /// Ingest a JSON file of `[{"id": ..., "data": ...}]` records
    Ingest {
        /// Path to the JSON file
        path: PathBuf,
    },

    /// Similarity search without generation
    Search {
        /// Search query
        query: String,

        /// Maximum number of results
        #[arg(short)]
        k: Option<usize>,
    },

    /// Ask a question and stream the answer
    Ask {
        /// The question
        question: String,

        /// Number of grounding documents
        #[arg(short)]
        k: Option<usize>,

        /// Ask a running server instead of loading the models locally
        #[arg(long)]
        url: Option<String>,
    },

    /// Show statistics
    Stats,
}

/// One record of an ingest file.
#[derive(Debug, Deserialize)]
struct IngestRecord {
    id: String,
    data: String,
}

fn setup_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().try_init().ok();
    } else {
        builder.try_init().ok();
    }
}

fn load_config(path: Option<&Path>, database: Option<PathBuf>) -> CliResult<QaConfig> {
    let mut config = match path {
        Some(path) => {
            let mut config = QaConfig::load(path)?;
            config.apply_env_overrides();
            config
        }
        None => QaConfig::load_default()?,
    };

    if let Some(database) = database {
        config.database.path = database;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.log_json);

    let mut config = load_config(cli.config.as_deref(), cli.database)?;

    match cli.command {
        Commands::Serve { bind, static_dir } => {
            if let Some(bind) = bind {
                config.server.bind_address = bind;
            }
            if static_dir.is_some() {
                config.server.static_dir = static_dir;
            }
            QaServer::new(config)?.serve().await?;
        }
        Commands::Init => {
            init_database(&config)?;
        }
        Commands::Insert { id, text } => {
            let engine = open_engine(&config)?;
            let outcome = engine.insert(&id, &text).await?;
            println!("{}: {:?}", id, outcome);
        }
        Commands::Ingest { path } => {
            let engine = open_engine(&config)?;
            ingest(&engine, &path).await?;
        }
        Commands::Search { query, k } => {
            let engine = open_engine(&config)?;
            let query = Query::new(query, Some(k.unwrap_or(config.pipeline.default_k)))?;
            query.ensure_max_k(config.pipeline.max_k)?;
            search(&engine, &query).await?;
        }
        Commands::Ask { question, k, url } => match url {
            Some(url) => ask_remote(&url, &question, k).await?,
            None => {
                let state = AppState::from_config(&config)?;
                ask_local(&state, &question, k).await?;
            }
        },
        Commands::Stats => {
            let engine = open_engine(&config)?;
            let stats = engine.stats().await?;
            println!("Documents: {}", stats.documents);
            println!("Dimension: {}", stats.dimension);
            println!(
                "Storage: {:.2} MB",
                stats.storage_bytes as f64 / 1024.0 / 1024.0
            );
        }
    }

    Ok(())
}

fn init_database(config: &QaConfig) -> CliResult<()> {
    let store = SqliteStore::from_config(&config.database, config.embedding.dimension)?;
    println!(
        "Initialized database at: {} (dimension {})",
        store.path().display(),
        store.dimension()
    );
    Ok(())
}

/// Store and embedder only; ingestion never needs the other models.
fn open_engine(config: &QaConfig) -> CliResult<SearchEngine> {
    let embedder = embedder_from_config(&config.embedding)?;
    let store = Arc::new(SqliteStore::from_config(
        &config.database,
        embedder.dimension(),
    )?);
    Ok(SearchEngine::new(store, embedder)?)
}

fn read_ingest_file(path: &Path) -> CliResult<Vec<(String, String)>> {
    let content = std::fs::read_to_string(path)?;
    let records: Vec<IngestRecord> = serde_json::from_str(&content)?;
    Ok(records.into_iter().map(|r| (r.id, r.data)).collect())
}

async fn ingest(engine: &SearchEngine, path: &Path) -> CliResult<()> {
    let documents = read_ingest_file(path)?;
    if documents.is_empty() {
        println!("No documents found in: {}", path.display());
        return Ok(());
    }

    println!("Ingesting {} document(s)...", documents.len());
    let report = engine.insert_batch(&documents).await?;

    println!(
        "\nComplete: {} inserted, {} updated, {} unchanged",
        report.inserted, report.updated, report.unchanged
    );
    Ok(())
}

async fn search(engine: &SearchEngine, query: &Query) -> CliResult<()> {
    let results = engine.search(query).await?;

    println!(
        "Found {} results in {}ms:\n",
        results.results.len(),
        results.latency_ms
    );
    for hit in results.results {
        println!("---\n[{}] {} (similarity: {:.3})", hit.rank, hit.id, hit.similarity);
        println!("{}\n", hit.text);
    }
    Ok(())
}

async fn ask_local(state: &AppState, question: &str, k: Option<usize>) -> CliResult<()> {
    let query = state.pipeline().query(question, k)?;
    let mut events = state.pipeline().answer(query);

    while let Some(event) = events.next().await {
        render_event(event)?;
    }
    Ok(())
}

async fn ask_remote(url: &str, question: &str, k: Option<usize>) -> CliResult<()> {
    let endpoint = format!("{}/api/query", url.trim_end_matches('/'));
    info!("Asking {}", endpoint);

    let mut params = vec![("query", question.to_string())];
    if let Some(k) = k {
        params.push(("k", k.to_string()));
    }

    let response = reqwest::Client::new()
        .get(&endpoint)
        .query(&params)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(format!("Server returned {}: {}", status, body).into());
    }

    let mut reader = AnswerReader::new();
    let mut body = response.bytes_stream();

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| QaError::protocol(format!("Connection failed: {}", e)))?;
        for event in reader.push(&chunk)? {
            render_event(event)?;
        }
    }

    // A connection closed before `done` is a failed answer.
    reader.finish()?;
    Ok(())
}

/// Print tokens to stdout as they arrive and progress to stderr. An error
/// event fails the command.
fn render_event(event: StreamEvent) -> CliResult<()> {
    match event {
        StreamEvent::Status(text) => eprintln!("[{}]", text),
        StreamEvent::Token(token) => {
            print!("{}", token);
            std::io::stdout().flush()?;
        }
        StreamEvent::Error(payload) => {
            println!();
            return Err(format!(
                "{} during {}: {}",
                payload.code,
                payload.stage.as_deref().unwrap_or("unknown stage"),
                payload.message
            )
            .into());
        }
        StreamEvent::Done => println!(),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ask_remote() {
        let cli = Cli::try_parse_from([
            "qa",
            "--verbose",
            "ask",
            "What is the capital of France?",
            "-k",
            "5",
            "--url",
            "http://localhost:8080",
        ])
        .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Commands::Ask { question, k, url } => {
                assert_eq!(question, "What is the capital of France?");
                assert_eq!(k, Some(5));
                assert_eq!(url.as_deref(), Some("http://localhost:8080"));
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn test_parse_serve_static_dir() {
        let cli = Cli::try_parse_from(["qa", "serve", "--static-dir", "public"]).unwrap();
        match cli.command {
            Commands::Serve { bind, static_dir } => {
                assert!(bind.is_none());
                assert_eq!(static_dir, Some(PathBuf::from("public")));
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_read_ingest_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs.json");
        std::fs::write(
            &path,
            r#"[{"id": "paris", "data": "Paris is the capital of France."},
                {"id": "lyon", "data": "Lyon is in France."}]"#,
        )
        .unwrap();

        let docs = read_ingest_file(&path).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].0, "paris");
        assert_eq!(docs[1].1, "Lyon is in France.");
    }

    #[test]
    fn test_render_error_event_fails() {
        assert!(render_event(StreamEvent::Token("a".into())).is_ok());

        let err = render_event(StreamEvent::Error(qa_core::ErrorPayload {
            code: "GENERATION_ERROR".into(),
            stage: Some("generating".into()),
            message: "boom".into(),
        }))
        .unwrap_err();
        assert!(err.to_string().contains("GENERATION_ERROR during generating"));
    }
}
