use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;

use crate::app::model::PipelineJob;
use crate::raw_store::{read_json, write_json_atomic};

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: &PipelineJob) -> anyhow::Result<()>;
    async fn get(&self, job_id: &str) -> anyhow::Result<Option<PipelineJob>>;
    async fn put(&self, job: &PipelineJob) -> anyhow::Result<()>;
    async fn list(&self) -> anyhow::Result<Vec<PipelineJob>>;
}

/// Jobs live only as long as the process.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, PipelineJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: &PipelineJob) -> anyhow::Result<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.job_id) {
            anyhow::bail!("job already exists: {}", job.job_id);
        }
        jobs.insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, job_id: &str) -> anyhow::Result<Option<PipelineJob>> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn put(&self, job: &PipelineJob) -> anyhow::Result<()> {
        self.jobs
            .write()
            .await
            .insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn list(&self) -> anyhow::Result<Vec<PipelineJob>> {
        Ok(self.jobs.read().await.values().cloned().collect())
    }
}

/// One `jobs/<job_id>/job.json` per job under `base_dir`.
#[derive(Debug, Clone)]
pub struct LocalFsJobStore {
    base_dir: PathBuf,
}

impl LocalFsJobStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn jobs_dir(&self) -> PathBuf {
        self.base_dir.join("jobs")
    }

    fn job_json_path(&self, job_id: &str) -> PathBuf {
        self.jobs_dir().join(job_id).join("job.json")
    }
}

#[async_trait]
impl JobStore for LocalFsJobStore {
    async fn create(&self, job: &PipelineJob) -> anyhow::Result<()> {
        let path = self.job_json_path(&job.job_id);
        if fs::try_exists(&path).await.unwrap_or(false) {
            anyhow::bail!("job already exists: {}", job.job_id);
        }
        write_json_atomic(&path, job)
            .await
            .context("write job.json")
    }

    async fn get(&self, job_id: &str) -> anyhow::Result<Option<PipelineJob>> {
        let path = self.job_json_path(job_id);
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }

    async fn put(&self, job: &PipelineJob) -> anyhow::Result<()> {
        write_json_atomic(&self.job_json_path(&job.job_id), job)
            .await
            .context("write job.json")
    }

    async fn list(&self) -> anyhow::Result<Vec<PipelineJob>> {
        let dir = self.jobs_dir();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err).with_context(|| format!("read dir: {}", dir.display())),
        };
        let mut jobs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("read dir entry: {}", dir.display()))?
        {
            let Some(job_id) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if let Some(job) = self.get(&job_id).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }
}
