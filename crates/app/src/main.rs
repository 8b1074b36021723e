use chrono::Utc;
use clap::{Parser, Subcommand};
use docsearch::config::ServiceConfig;
use docsearch::{build_router, build_state, HttpSettings};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docsearch", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    config: ServiceConfig,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API and landing page (the default).
    Serve,
    /// Ingest a document, or every pdf/docx/txt file under a folder.
    Ingest {
        /// File or folder to ingest.
        #[arg(long)]
        path: PathBuf,
    },
    /// Print the chunks closest to a query; `--top-k` sets how many.
    Query {
        /// Query text.
        #[arg(long)]
        text: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = cli.config;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "docsearch boot"
    );

    let state = build_state(&config).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let settings = HttpSettings::new(&config.cors_origins, config.max_upload_bytes)?;
            let app = build_router(Arc::new(state), &settings);
            let address = config.bind_address();
            let listener = TcpListener::bind(&address).await?;

            info!(address = %address, "listening");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
        Command::Ingest { path } => {
            if path.is_dir() {
                let report = state.ingestion.ingest_folder_best_effort(&path).await?;

                for skipped in &report.skipped_files {
                    warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped document");
                }
                for receipt in &report.ingested {
                    println!(
                        "{} {} chunks={}",
                        receipt.doc_id, receipt.filename, receipt.chunk_count
                    );
                }
                println!(
                    "{} documents ingested, {} skipped at {}",
                    report.ingested.len(),
                    report.skipped_files.len(),
                    Utc::now().to_rfc3339()
                );
            } else {
                let receipt = state.ingestion.ingest_path(&path).await?;
                println!(
                    "{} {} chunks={}",
                    receipt.doc_id, receipt.filename, receipt.chunk_count
                );
            }
        }
        Command::Query { text } => {
            let results = state.query.query_default(&text).await?;

            if results.is_empty() {
                println!("No results found for the query");
            }
            for (rank, chunk) in results.iter().enumerate() {
                println!("[{}] {chunk}", rank + 1);
            }
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(error = %error, "failed to listen for shutdown signal");
    }
    info!("shutting down");
}
