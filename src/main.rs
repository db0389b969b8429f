//! # RAG Advisor CLI (`rag`)
//!
//! ## Usage
//!
//! ```bash
//! rag --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag init` | Create the SQLite database and run schema migrations |
//! | `rag ingest <locator>` | Ingest a document under an optional tenant scope |
//! | `rag doc-id <locator>` | Print the document id an ingestion would assign |
//! | `rag search "<query>"` | Tenant-filtered retrieval without a model call |
//! | `rag ask "<query>"` | Retrieval-augmented answer from the chat model |
//! | `rag serve` | Ingest the startup documents and start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! rag init
//! rag ingest ./contracts/lease.pdf --user-id u1 --conversation-id c1
//! rag search "notice period" --user-id u1 --conversation-id c1
//! rag ask "What is the notice period?" --user-id u1 --conversation-id c1 --stream
//! ```

use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use rag_advisor::config::{self, Config};
use rag_advisor::embedding::create_embedding_model;
use rag_advisor::ingest::{DocumentService, IngestError};
use rag_advisor::search::{print_results, search_documents, SearchOptions};
use rag_advisor::service::{open_store, RagService};
use rag_advisor::source::SourceResolver;
use rag_advisor::{logging, migrate, server};
use rag_advisor_core::identity::compute_doc_id;
use rag_advisor_core::ingest::IngestOutcome;
use rag_advisor_core::TenantScope;

/// RAG Advisor: tenant-scoped retrieval-augmented generation.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rag.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "rag", version, about = "Tenant-scoped retrieval-augmented generation service")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Tenant scope flags shared by the document commands.
#[derive(Args, Clone, Debug, Default)]
struct ScopeArgs {
    /// Owning user id.
    #[arg(long)]
    user_id: Option<String>,

    /// Conversation id within the user.
    #[arg(long)]
    conversation_id: Option<String>,
}

impl ScopeArgs {
    fn scope(&self) -> TenantScope {
        TenantScope::new(self.user_id.clone(), self.conversation_id.clone())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Ingest one document.
    ///
    /// The locator may be an http(s) URL, a `file://` URL, a
    /// `classpath:/` path under `[ingest].resource_dir`, or a plain path.
    Ingest {
        locator: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Print the document id for a locator and scope.
    DocId {
        locator: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Search stored chunks within a tenant scope.
    Search {
        query: String,
        #[command(flatten)]
        scope: ScopeArgs,
        /// Maximum number of results (defaults to `[retrieval].top_k`).
        #[arg(long)]
        top_k: Option<usize>,
        /// Extra filter expression, e.g. `source == 'lease.pdf'`.
        #[arg(long)]
        filter: Option<String>,
    },

    /// Ask a question answered from the tenant's documents.
    Ask {
        query: String,
        #[command(flatten)]
        scope: ScopeArgs,
        /// Extra filter expression conjoined with the tenant filter.
        #[arg(long)]
        filter: Option<String>,
        /// Print the answer as it streams in.
        #[arg(long)]
        stream: bool,
    },

    /// Start the HTTP server.
    ///
    /// Ingests the `[ingest].startup` documents first; failures there are
    /// logged and do not prevent the server from starting.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init_with_config(&cfg.logging);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { locator, scope } => {
            let documents = document_service(&cfg).await?;
            let outcome = documents.save(&locator, &scope.scope()).await?;
            print_outcome(&outcome);
        }
        Commands::DocId { locator, scope } => {
            let resolver =
                SourceResolver::new(&cfg.ingest.resource_dir, cfg.ingest.fetch_timeout_secs)?;
            let resource = resolver.fetch(&locator).await.map_err(IngestError::from)?;
            println!("{}", compute_doc_id(&resource.bytes, &scope.scope()));
        }
        Commands::Search {
            query,
            scope,
            top_k,
            filter,
        } => {
            let embedder = create_embedding_model(&cfg.embedding)?;
            let store = open_store(&cfg, embedder).await?;
            let options = SearchOptions {
                top_k: top_k.unwrap_or(cfg.retrieval.top_k),
                similarity_threshold: cfg.retrieval.similarity_threshold,
                raw_filter: filter.as_deref(),
            };
            let results = search_documents(store.as_ref(), &query, &scope.scope(), options).await?;
            print_results(&results);
        }
        Commands::Ask {
            query,
            scope,
            filter,
            stream,
        } => {
            let service = RagService::from_config(&cfg).await?;
            if stream {
                let mut deltas = service
                    .ask_stream(&query, &scope.scope(), filter.as_deref())
                    .await?;
                let mut stdout = std::io::stdout();
                while let Some(delta) = deltas.next().await {
                    write!(stdout, "{}", delta?)?;
                    stdout.flush()?;
                }
                writeln!(stdout)?;
            } else {
                let answer = service.ask(&query, &scope.scope(), filter.as_deref()).await?;
                println!("{}", answer.content());
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn document_service(cfg: &Config) -> Result<DocumentService> {
    let embedder = create_embedding_model(&cfg.embedding)?;
    let store = open_store(cfg, embedder).await?;
    // The CLI runs as the operator, so local paths are always readable.
    Ok(DocumentService::from_config(cfg, store)?.with_local_paths(true))
}

fn print_outcome(outcome: &IngestOutcome) {
    match outcome {
        IngestOutcome::Stored { doc_id, chunks } => {
            println!("Stored {} ({} chunks)", doc_id, chunks)
        }
        IngestOutcome::Skipped { doc_id } => println!("Skipped {} (already ingested)", doc_id),
        IngestOutcome::AlreadyPresent { doc_id } => {
            println!("Already present {} (duplicate on write)", doc_id)
        }
        IngestOutcome::Empty { doc_id } => println!("Empty {} (no text to embed)", doc_id),
    }
}
