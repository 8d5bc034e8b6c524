mod support;

use std::sync::Arc;
use std::time::Duration;

use dich_truyen::app::job_store::{InMemoryJobStore, JobStore, LocalFsJobStore};
use dich_truyen::app::model::{CreateJobRequest, JobStatus, PipelineJob};
use dich_truyen::app::queue::InProcessQueue;
use dich_truyen::app::runner::JobRunner;
use dich_truyen::events::EventBus;
use dich_truyen::settings::PipelineSettings;
use tokio_util::sync::CancellationToken;

use support::{BOOK_URL, FakeCrawler, FakeGlossary, Fakes, test_config};

fn runner(fakes: &Fakes, books_dir: &std::path::Path, store: Arc<dyn JobStore>) -> Arc<JobRunner> {
    Arc::new(
        JobRunner::new(
            test_config(books_dir),
            store,
            InProcessQueue::new(1),
            EventBus::new(),
        )
        .with_capabilities(fakes.capabilities()),
    )
}

fn request(value: serde_json::Value) -> CreateJobRequest {
    serde_json::from_value(value).expect("valid request")
}

async fn wait_finished(runner: &JobRunner, job_id: &str) -> PipelineJob {
    for _ in 0..200 {
        let job = runner
            .get_job(job_id)
            .await
            .expect("get job")
            .expect("job exists");
        if job.status.is_finished() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {job_id} did not finish");
}

#[tokio::test]
async fn job_runs_the_pipeline_and_records_the_result() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let fakes = Fakes::new(FakeCrawler::new(3), FakeGlossary::new(3));
    let runner = runner(&fakes, temp.path(), Arc::new(InMemoryJobStore::new()));

    let job = runner
        .create_job(request(serde_json::json!({ "url": BOOK_URL, "workers": 2 })))
        .await?;
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.book_dir, temp.path().join("42"));

    runner.start_job(&job.job_id).await?;
    let done = wait_finished(&runner, &job.job_id).await;

    assert_eq!(done.status, JobStatus::Completed, "error: {:?}", done.error);
    let result = done.result.expect("result");
    assert_eq!(result.translated, 3);
    assert!(result.all_done);
    assert_eq!(done.progress.translated, 3);
    assert_eq!(done.progress.total_chapters, 3);
    assert!(done.started_at.is_some());
    assert!(done.finished_at.is_some());

    let settings = PipelineSettings::load(&done.book_dir).await?.expect("settings");
    assert_eq!(settings.workers, Some(2));
    Ok(())
}

#[tokio::test]
async fn failing_job_is_marked_failed() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let fakes = Fakes::new(FakeCrawler::new(1), FakeGlossary::new(3));
    let runner = runner(&fakes, temp.path(), Arc::new(InMemoryJobStore::new()));

    let job = runner
        .create_job(request(serde_json::json!({ "book_dir": temp.path().join("empty") })))
        .await?;
    runner.start_job(&job.job_id).await?;
    let done = wait_finished(&runner, &job.job_id).await;

    assert_eq!(done.status, JobStatus::Failed);
    assert!(done.error.unwrap_or_default().contains("source url is required"));
    Ok(())
}

#[tokio::test]
async fn cancelled_job_stops_early() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let fakes = Fakes::new(
        FakeCrawler::new(10).with_delay(Duration::from_millis(150)),
        FakeGlossary::new(3),
    );
    let runner = runner(&fakes, temp.path(), Arc::new(InMemoryJobStore::new()));

    let job = runner
        .create_job(request(serde_json::json!({ "url": BOOK_URL })))
        .await?;
    runner.start_job(&job.job_id).await?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    runner.cancel_job(&job.job_id).await?;

    let done = wait_finished(&runner, &job.job_id).await;
    assert_eq!(done.status, JobStatus::Cancelled);
    let result = done.result.expect("result");
    assert!(result.cancelled);
    assert!(!result.all_done);
    Ok(())
}

#[tokio::test]
async fn create_job_rejects_requests_without_a_book() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let fakes = Fakes::new(FakeCrawler::new(1), FakeGlossary::new(3));
    let runner = runner(&fakes, temp.path(), Arc::new(InMemoryJobStore::new()));

    assert!(runner.create_job(request(serde_json::json!({}))).await.is_err());
    assert!(
        runner
            .create_job(request(serde_json::json!({
                "url": BOOK_URL,
                "crawl_only": true,
                "translate_only": true,
            })))
            .await
            .is_err()
    );
    Ok(())
}

#[tokio::test]
async fn jobs_persist_on_disk_newest_first() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let fakes = Fakes::new(FakeCrawler::new(1), FakeGlossary::new(3));
    let store: Arc<dyn JobStore> = Arc::new(LocalFsJobStore::new(temp.path().join("data")));
    let runner = runner(&fakes, temp.path(), Arc::clone(&store));

    let first = runner
        .create_job(request(serde_json::json!({ "url": BOOK_URL })))
        .await?;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = runner
        .create_job(request(serde_json::json!({ "url": BOOK_URL, "chapters": "1" })))
        .await?;

    let listed = runner.list_jobs().await?;
    let ids = listed.iter().map(|j| j.job_id.as_str()).collect::<Vec<_>>();
    assert_eq!(ids, [second.job_id.as_str(), first.job_id.as_str()]);

    let reloaded = LocalFsJobStore::new(temp.path().join("data"))
        .get(&second.job_id)
        .await?
        .expect("job on disk");
    assert_eq!(reloaded.request.options.chapters.as_deref(), Some("1"));

    let cancelled = runner.cancel_job(&first.job_id).await?;
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    Ok(())
}

/// Accepts every write except the one that marks a job failed.
#[derive(Default)]
struct RejectsFailedStatus(InMemoryJobStore);

#[async_trait::async_trait]
impl JobStore for RejectsFailedStatus {
    async fn create(&self, job: &PipelineJob) -> anyhow::Result<()> {
        self.0.create(job).await
    }

    async fn get(&self, job_id: &str) -> anyhow::Result<Option<PipelineJob>> {
        self.0.get(job_id).await
    }

    async fn put(&self, job: &PipelineJob) -> anyhow::Result<()> {
        if job.status == JobStatus::Failed {
            anyhow::bail!("disk full");
        }
        self.0.put(job).await
    }

    async fn list(&self) -> anyhow::Result<Vec<PipelineJob>> {
        self.0.list().await
    }
}

#[derive(Clone, Default)]
struct LogCapture(Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("log buffer").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn unsaved_failure_status_is_logged() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let fakes = Fakes::new(FakeCrawler::new(1), FakeGlossary::new(3));
    let store = Arc::new(RejectsFailedStatus::default());
    let runner = runner(&fakes, temp.path(), store.clone());

    let logs = LogCapture::default();
    let sink = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || sink.clone())
        .with_ansi(false)
        .finish();
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let stored = tracing::subscriber::with_default(subscriber, || {
        rt.block_on(async {
            let job = runner
                .create_job(request(serde_json::json!({ "book_dir": temp.path().join("empty") })))
                .await?;
            runner.run_job(&job.job_id, CancellationToken::new()).await;
            store
                .get(&job.job_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("job vanished"))
        })
    })?;

    assert_eq!(stored.status, JobStatus::Running);
    let logs = String::from_utf8(logs.0.lock().expect("log buffer").clone())?;
    assert!(logs.contains("failed job status not saved"), "{logs}");
    assert!(logs.contains("disk full"), "{logs}");
    Ok(())
}
