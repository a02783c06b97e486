use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use manga_ingest::activity::RecentActivity;
use manga_ingest::config::Config;
use manga_ingest::db;
use manga_ingest::ingest::Ingestor;
use manga_ingest::ingest::pipeline::ProcessingResult;
use manga_ingest::policy::{Actor, Role, TracingAuditSink};
use manga_ingest::state::AppState;

#[derive(Parser)]
#[command(name = "manga-ingest", version, about = "Manga archive ingestion service")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Process one stored upload inline and exit
    #[arg(long, value_name = "FILE_ID")]
    process: Option<i64>,

    /// Accept a local archive as an upload, process it inline and exit
    #[arg(long, value_name = "PATH", requires = "user_id")]
    ingest: Option<PathBuf>,

    /// Uploader id for --ingest
    #[arg(long)]
    user_id: Option<i64>,

    /// Uploader role for --ingest
    #[arg(long, default_value = "uploader")]
    role: Role,

    /// Existing series to attach the --ingest upload to
    #[arg(long)]
    series_id: Option<i64>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Error loading config: {e}");
        std::process::exit(1);
    });

    let filter =
        EnvFilter::try_new(&config.server.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let pool = db::create_pool(&config.database).await.unwrap_or_else(|e| {
        tracing::error!("Failed to initialize database: {e}");
        std::process::exit(1);
    });
    tracing::info!("Database initialized: {}", config.database.url);

    if let Err(e) = std::fs::create_dir_all(&config.storage.root_path) {
        tracing::error!(
            "Failed to create storage root {}: {e}",
            config.storage.root_path.display()
        );
        std::process::exit(1);
    }

    let config = Arc::new(config);
    let activity = Arc::new(RecentActivity::from_config(&config.activity));
    let (ingestor, receiver) = Ingestor::new(
        pool.clone(),
        config.clone(),
        activity,
        Arc::new(TracingAuditSink),
    );

    // One-shot: process an existing upload
    if let Some(file_id) = cli.process {
        let result = ingestor
            .process_file(file_id, &CancellationToken::new())
            .await;
        exit_with(result);
    }

    // One-shot: ingest a local archive
    if let Some(ref path) = cli.ingest {
        let Some(user_id) = cli.user_id else {
            tracing::error!("--ingest requires --user-id");
            std::process::exit(2);
        };
        let actor = Actor {
            user_id,
            role: cli.role,
        };
        let data = tokio::fs::read(path).await.unwrap_or_else(|e| {
            tracing::error!("Failed to read {}: {e}", path.display());
            std::process::exit(1);
        });
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        // The inline run below claims the file before any worker could.
        ingestor.queue().shutdown();
        let file = ingestor
            .accept_upload(&actor, &filename, &data, cli.series_id)
            .await
            .unwrap_or_else(|e| {
                tracing::error!("Upload rejected: {e}");
                std::process::exit(1);
            });
        tracing::info!("Stored upload {} as {}", file.id, file.stored_path);

        let result = ingestor
            .process_file(file.id, &CancellationToken::new())
            .await;
        exit_with(result);
    }

    // Server mode
    let addr = SocketAddr::new(
        config.server.host.parse().unwrap_or_else(|_| {
            tracing::warn!(
                "Invalid host '{}', falling back to 0.0.0.0",
                config.server.host
            );
            std::net::Ipv4Addr::UNSPECIFIED.into()
        }),
        config.server.port,
    );

    tracing::info!("manga-ingest v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Storage root: {}", config.storage.root_path.display());
    tracing::info!("Listening on {addr}");

    let worker = tokio::spawn(ingestor.worker(receiver).run());

    let state = AppState::new(config, pool, ingestor.clone());
    let app = manga_ingest::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind to {addr}: {e}");
            std::process::exit(1);
        });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Server error: {e}");
            std::process::exit(1);
        });

    tracing::info!("Shutting down, waiting for the current file to finish");
    ingestor.queue().shutdown();
    if let Err(e) = worker.await {
        tracing::error!("Processing worker ended abnormally: {e}");
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}

fn exit_with(result: ProcessingResult) -> ! {
    if result.success {
        tracing::info!(
            "Processed into chapter {:?} of series {:?}: {}",
            result.chapter_id,
            result.series_id,
            result.message
        );
        std::process::exit(0);
    }
    tracing::error!("Processing failed: {}", result.message);
    std::process::exit(1);
}
