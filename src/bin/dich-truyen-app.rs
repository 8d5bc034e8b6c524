use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use clap::Parser;
use futures::StreamExt as _;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tower_http::trace::TraceLayer;

use dich_truyen::app::job_store::{InMemoryJobStore, JobStore, LocalFsJobStore};
use dich_truyen::app::model::{CreateJobRequest, PipelineJob};
use dich_truyen::app::queue::InProcessQueue;
use dich_truyen::app::runner::JobRunner;
use dich_truyen::config::AppConfig;
use dich_truyen::events::{EventBus, EventEnvelope};
use dich_truyen::settings::{self, ResumableBook};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct AppArgs {
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Where job records are written.
    #[arg(long, default_value = "workspace-app")]
    data_dir: PathBuf,

    /// Keep job records in memory only.
    #[arg(long)]
    in_memory_jobs: bool,

    /// Overrides `DICH_TRUYEN_BOOKS_DIR`.
    #[arg(long)]
    books_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 1)]
    max_concurrency: usize,
}

#[derive(Clone)]
struct AppState {
    books_dir: PathBuf,
    runner: Arc<JobRunner>,
}

type ApiError = (StatusCode, String);

#[tokio::main]
async fn main() -> std::process::ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    dich_truyen::logging::init(dich_truyen::logging::DEFAULT_FILTER).context("init logging")?;

    let args = AppArgs::parse();
    tracing::info!(?args, "starting dich-truyen-app");

    let mut config = AppConfig::from_env().context("load config")?;
    if let Some(dir) = args.books_dir {
        config.books_dir = dir;
    }
    let job_store: Arc<dyn JobStore> = if args.in_memory_jobs {
        Arc::new(InMemoryJobStore::new())
    } else {
        Arc::new(LocalFsJobStore::new(&args.data_dir))
    };
    let books_dir = config.books_dir.clone();
    let runner = Arc::new(JobRunner::new(
        config,
        job_store,
        InProcessQueue::new(args.max_concurrency),
        EventBus::new(),
    ));
    let state = AppState { books_dir, runner };

    let app = Router::new()
        .route("/healthz", get(|| async { "ok\n" }))
        .route("/jobs", post(create_job).get(list_jobs))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/cancel", post(cancel_job))
        .route("/events", get(events))
        .route("/books/resumable", get(resumable_books))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .map_err(|err| anyhow::anyhow!("bind {}: {err}", args.addr))?;
    tracing::info!(addr = %args.addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn internal(err: anyhow::Error) -> ApiError {
    tracing::error!(error = %format!("{err:#}"), "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
}

async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<PipelineJob>), ApiError> {
    let job = state
        .runner
        .create_job(request)
        .await
        .map_err(|err| (StatusCode::BAD_REQUEST, format!("{err:#}")))?;
    let job = state.runner.start_job(&job.job_id).await.map_err(internal)?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

async fn list_jobs(State(state): State<AppState>) -> Result<Json<Vec<PipelineJob>>, ApiError> {
    let jobs = state.runner.list_jobs().await.map_err(internal)?;
    Ok(Json(jobs))
}

async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<PipelineJob>, ApiError> {
    match state.runner.get_job(&job_id).await.map_err(internal)? {
        Some(job) => Ok(Json(job)),
        None => Err((StatusCode::NOT_FOUND, format!("job not found: {job_id}"))),
    }
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<PipelineJob>, ApiError> {
    if state.runner.get_job(&job_id).await.map_err(internal)?.is_none() {
        return Err((StatusCode::NOT_FOUND, format!("job not found: {job_id}")));
    }
    let job = state.runner.cancel_job(&job_id).await.map_err(internal)?;
    Ok(Json(job))
}

async fn events(
    State(state): State<AppState>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.runner.events().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(event) => {
                let envelope = EventEnvelope::from(&event);
                Event::default()
                    .event(envelope.kind.clone())
                    .json_data(&envelope)
                    .ok()
                    .map(Ok)
            }
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                tracing::debug!(missed, "event subscriber lagged");
                None
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn resumable_books(
    State(state): State<AppState>,
) -> Result<Json<Vec<ResumableBook>>, ApiError> {
    let books = settings::list_resumable_books(&state.books_dir)
        .await
        .map_err(internal)?;
    Ok(Json(books))
}
