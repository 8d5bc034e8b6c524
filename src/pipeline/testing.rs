use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::capabilities::{BookInfo, Capabilities, Crawler, ExtractedChapter, GlossaryGenerator};
use crate::config::{PipelineConfig, TranslationConfig};
use crate::events::EventSink;
use crate::glossary::{Glossary, GlossaryEntry};
use crate::llm::NoopEngine;
use crate::progress::{BookPatterns, BookProgress, ProgressStore};

use super::bootstrap::BootstrapState;
use super::state::{ContextParts, PipelineContext};

pub struct OfflineCrawler;

#[async_trait]
impl Crawler for OfflineCrawler {
    async fn discover(&self, url: &str, _encoding: Option<&str>) -> anyhow::Result<BookInfo> {
        anyhow::bail!("offline: {url}")
    }

    async fn fetch(&self, url: &str, _encoding: Option<&str>) -> anyhow::Result<String> {
        anyhow::bail!("offline: {url}")
    }

    async fn extract_content(
        &self,
        _html: &str,
        _patterns: &BookPatterns,
    ) -> anyhow::Result<ExtractedChapter> {
        anyhow::bail!("offline")
    }
}

#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    pub generate_calls: AtomicUsize,
    pub extract_calls: AtomicUsize,
    failures_left: AtomicUsize,
    generated: Vec<GlossaryEntry>,
    extracted: Vec<GlossaryEntry>,
}

impl ScriptedGenerator {
    pub fn failing_first(failures: usize, generated: Vec<GlossaryEntry>) -> Arc<Self> {
        Arc::new(Self {
            failures_left: AtomicUsize::new(failures),
            generated,
            ..Self::default()
        })
    }

    pub fn extracting(extracted: Vec<GlossaryEntry>) -> Arc<Self> {
        Arc::new(Self {
            extracted,
            ..Self::default()
        })
    }
}

#[async_trait]
impl GlossaryGenerator for ScriptedGenerator {
    async fn generate_from_samples(
        &self,
        _samples: &[String],
        _style: Option<&str>,
        _existing: &[GlossaryEntry],
    ) -> anyhow::Result<Vec<GlossaryEntry>> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            anyhow::bail!("scripted generation failure");
        }
        Ok(self.generated.clone())
    }

    async fn extract_new_terms(
        &self,
        _chapter_text: &str,
        _existing: &[GlossaryEntry],
        max_new: usize,
    ) -> anyhow::Result<Vec<GlossaryEntry>> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.extracted.iter().take(max_new).cloned().collect())
    }
}

pub fn context_with(book_dir: &Path, generator: Arc<ScriptedGenerator>) -> PipelineContext {
    PipelineContext::new(ContextParts {
        progress: ProgressStore::new(book_dir, BookProgress::new("https://example.com/book/")),
        glossary: Glossary::new(),
        bootstrap: BootstrapState::NotStarted,
        capabilities: Capabilities {
            crawler: Arc::new(OfflineCrawler),
            translator: Arc::new(NoopEngine),
            glossary: generator,
        },
        translation: TranslationConfig {
            glossary_random_sample: false,
            ..TranslationConfig::default()
        },
        pipeline: PipelineConfig {
            glossary_scorer_rebuild_threshold: 0,
            ..PipelineConfig::default()
        },
        style_prompt: String::new(),
        events: EventSink::detached(),
        cancel: CancellationToken::new(),
        total_chapters: 0,
    })
}
