use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context as _;
use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::app::job_store::JobStore;
use crate::app::model::{CreateJobRequest, JobProgress, JobStatus, PipelineJob};
use crate::app::queue::InProcessQueue;
use crate::capabilities::Capabilities;
use crate::config::AppConfig;
use crate::events::EventBus;
use crate::glossary::Glossary;
use crate::pipeline::Pipeline;
use crate::progress::BookProgress;
use crate::raw_store;
use crate::settings::PipelineSettings;

/// Owns pipeline jobs: creates them, runs them on the queue, cancels them.
pub struct JobRunner {
    config: AppConfig,
    job_store: Arc<dyn JobStore>,
    queue: InProcessQueue,
    events: EventBus,
    capabilities: Option<Capabilities>,
    cancels: Mutex<HashMap<String, CancellationToken>>,
}

impl JobRunner {
    pub fn new(
        config: AppConfig,
        job_store: Arc<dyn JobStore>,
        queue: InProcessQueue,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            job_store,
            queue,
            events,
            capabilities: None,
            cancels: Mutex::new(HashMap::new()),
        }
    }

    /// Uses `capabilities` for every job instead of building them from the
    /// request's engine.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn create_job(&self, request: CreateJobRequest) -> anyhow::Result<PipelineJob> {
        if request.options.crawl_only && request.options.translate_only {
            anyhow::bail!("crawl_only and translate_only are mutually exclusive");
        }
        let book_dir = match (&request.book_dir, &request.options.url) {
            (Some(dir), _) => dir.clone(),
            (None, Some(url)) => book_dir_for_url(&self.config.books_dir, url)?,
            (None, None) => anyhow::bail!("either book_dir or url is required"),
        };

        let job = PipelineJob {
            job_id: new_job_id(),
            status: JobStatus::Pending,
            book_dir,
            request,
            progress: JobProgress::default(),
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        self.job_store.create(&job).await.context("save job")?;
        tracing::info!(job_id = %job.job_id, book_dir = %job.book_dir.display(), "job created");
        Ok(job)
    }

    pub async fn start_job(self: &Arc<Self>, job_id: &str) -> anyhow::Result<PipelineJob> {
        let job = self
            .job_store
            .get(job_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("job not found: {job_id}"))?;
        if job.status != JobStatus::Pending {
            anyhow::bail!("job {job_id} is already {:?}", job.status);
        }

        let token = CancellationToken::new();
        self.cancels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id.to_owned(), token.clone());

        let runner = Arc::clone(self);
        let id = job_id.to_owned();
        self.queue.spawn(async move {
            runner.run_job(&id, token).await;
        });
        Ok(job)
    }

    /// Fires the job's cancellation token. A job still waiting in the queue
    /// is marked cancelled straight away.
    pub async fn cancel_job(&self, job_id: &str) -> anyhow::Result<PipelineJob> {
        let mut job = self
            .job_store
            .get(job_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("job not found: {job_id}"))?;
        if job.status.is_finished() {
            return Ok(job);
        }

        let token = self
            .cancels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .cloned();
        if let Some(token) = token {
            token.cancel();
        }
        if job.status == JobStatus::Pending {
            job.status = JobStatus::Cancelled;
            job.finished_at = Some(Utc::now());
            self.job_store.put(&job).await.context("save job")?;
        }
        tracing::info!(job_id, "job cancel requested");
        Ok(job)
    }

    pub async fn get_job(&self, job_id: &str) -> anyhow::Result<Option<PipelineJob>> {
        self.job_store.get(job_id).await
    }

    /// Newest first.
    pub async fn list_jobs(&self) -> anyhow::Result<Vec<PipelineJob>> {
        let mut jobs = self.job_store.list().await?;
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    pub async fn run_job(&self, job_id: &str, cancel: CancellationToken) {
        if let Err(err) = self.try_run_job(job_id, cancel).await {
            tracing::error!(job_id, error = %format!("{err:#}"), "job failed");
            if let Err(err) = self.mark_failed(job_id, format!("{err:#}")).await {
                tracing::warn!(job_id, error = %format!("{err:#}"), "failed job status not saved");
            }
        }
        self.cancels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(job_id);
    }

    async fn try_run_job(&self, job_id: &str, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut job = self
            .job_store
            .get(job_id)
            .await
            .context("load job")?
            .ok_or_else(|| anyhow::anyhow!("job not found: {job_id}"))?;
        if job.status != JobStatus::Pending {
            tracing::info!(job_id, status = ?job.status, "job no longer pending; skipping");
            return Ok(());
        }
        self.mark_running(&mut job).await.context("mark running")?;

        let capabilities = match &self.capabilities {
            Some(capabilities) => capabilities.clone(),
            None => crate::llm::capabilities(job.request.engine, &self.config)?,
        };
        tokio::fs::create_dir_all(&job.book_dir)
            .await
            .with_context(|| format!("create book dir: {}", job.book_dir.display()))?;
        if let Some(csv) = &job.request.glossary_csv {
            Glossary::import_into(&job.book_dir, csv).await?;
        }

        let watcher = self.spawn_progress_watcher(&job);
        let pipeline = Pipeline::new(
            &self.config,
            capabilities,
            self.events.scoped(Some(job.job_id.clone())),
        );
        let outcome = pipeline
            .run(&job.book_dir, &job.request.options, cancel)
            .await;
        watcher.abort();
        let _ = watcher.await;

        let settings = PipelineSettings::from_options(&job.request.options);
        if let Err(err) = settings.save(&job.book_dir).await {
            tracing::warn!(job_id, error = %format!("{err:#}"), "pipeline settings not saved");
        }

        let result = outcome?;
        let mut job = self
            .job_store
            .get(job_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("job not found: {job_id}"))?;
        job.status = if result.cancelled {
            JobStatus::Cancelled
        } else {
            JobStatus::Completed
        };
        if let Some(progress) = BookProgress::load(&job.book_dir).await? {
            job.progress = JobProgress::from_book(&progress);
        }
        job.result = Some(result);
        job.finished_at = Some(Utc::now());
        self.job_store.put(&job).await.context("save job")?;
        tracing::info!(job_id, status = ?job.status, "job finished");
        Ok(())
    }

    /// Refreshes the stored progress snapshot after every chapter event of
    /// this job.
    fn spawn_progress_watcher(&self, job: &PipelineJob) -> tokio::task::JoinHandle<()> {
        let mut rx = self.events.subscribe();
        let store = Arc::clone(&self.job_store);
        let job_id = job.job_id.clone();
        let book_dir = job.book_dir.clone();
        tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(job_id, skipped, "progress watcher lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let ours = event.job_id.as_deref() == Some(job_id.as_str());
                if !ours || !event.event.touches_chapter() {
                    continue;
                }
                if let Err(err) = refresh_progress(store.as_ref(), &job_id, &book_dir).await {
                    tracing::debug!(job_id, error = %format!("{err:#}"), "progress refresh failed");
                }
            }
        })
    }

    async fn mark_running(&self, job: &mut PipelineJob) -> anyhow::Result<()> {
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        self.job_store.put(job).await.context("save job")?;
        Ok(())
    }

    async fn mark_failed(&self, job_id: &str, message: String) -> anyhow::Result<()> {
        let Some(mut job) = self.job_store.get(job_id).await? else {
            return Ok(());
        };
        job.status = JobStatus::Failed;
        job.error = Some(message);
        job.finished_at = Some(Utc::now());
        self.job_store.put(&job).await?;
        Ok(())
    }
}

async fn refresh_progress(store: &dyn JobStore, job_id: &str, book_dir: &Path) -> anyhow::Result<()> {
    let Some(progress) = BookProgress::load(book_dir).await? else {
        return Ok(());
    };
    let Some(mut job) = store.get(job_id).await? else {
        return Ok(());
    };
    job.progress = JobProgress::from_book(&progress);
    store.put(&job).await
}

fn new_job_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_owned()
}

/// `<books_dir>/<slug of the last url path segment>`, falling back to the host.
pub fn book_dir_for_url(books_dir: &Path, url: &str) -> anyhow::Result<PathBuf> {
    let parsed = url::Url::parse(url).with_context(|| format!("invalid url: {url}"))?;
    let segment = parsed
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(|s| s.trim_end_matches(".html").to_owned())
        .or_else(|| parsed.host_str().map(str::to_owned))
        .unwrap_or_default();
    Ok(books_dir.join(raw_store::slugify(&segment)))
}
