use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio_util::sync::CancellationToken;

use crate::capabilities::Capabilities;
use crate::config::{PipelineConfig, TranslationConfig};
use crate::events::{EventSink, PipelineEvent};
use crate::glossary::Glossary;
use crate::progress::ProgressStore;
use crate::raw_store;
use crate::term_index::TermRelevanceIndex;

use super::bootstrap::BootstrapState;

const MAX_ERROR_MESSAGES: usize = 50;

/// Everything behind the glossary lock.
#[derive(Debug)]
pub struct GlossaryState {
    pub glossary: Glossary,
    /// Raw chapter files waiting for progressive term extraction.
    pub backlog: Vec<PathBuf>,
    pub bootstrap: BootstrapState,
    /// Glossary version the term index was last built from.
    pub indexed_version: u64,
}

impl GlossaryState {
    /// Glossary mutations since the term index was last rebuilt.
    pub fn versions_since_rebuild(&self) -> u64 {
        self.glossary.version().saturating_sub(self.indexed_version)
    }

    /// Records that the term index now reflects the current glossary and
    /// returns the terms to build it from.
    pub fn mark_indexed(&mut self) -> Vec<String> {
        self.indexed_version = self.glossary.version();
        self.glossary.terms()
    }
}

#[derive(Debug, Default)]
pub struct RunStats {
    pub crawled: AtomicUsize,
    pub translated: AtomicUsize,
    pub skipped_translate: AtomicUsize,
    pub failed_crawl: AtomicUsize,
    pub failed_translate: AtomicUsize,
    errors: std::sync::Mutex<Vec<String>>,
}

impl RunStats {
    pub fn record_error(&self, message: String) {
        let mut errors = self.errors.lock().unwrap_or_else(PoisonError::into_inner);
        if errors.len() < MAX_ERROR_MESSAGES {
            errors.push(message);
        }
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn bump(counter: &AtomicUsize) -> usize {
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// State shared by the producer, the consumers and the synchronizer of one
/// run.
///
/// Two locks: the progress store serialises every status write, and
/// `glossary` serialises every glossary write plus the backlog swap. Readers
/// of the glossary and the term index take an `Arc` snapshot and never wait
/// on a writer for longer than a pointer clone.
pub struct PipelineContext {
    pub progress: ProgressStore,
    pub glossary: tokio::sync::Mutex<GlossaryState>,
    glossary_view: RwLock<Arc<Glossary>>,
    term_index: RwLock<Arc<TermRelevanceIndex>>,
    bootstrap_done: AtomicBool,
    pub capabilities: Capabilities,
    pub translation: TranslationConfig,
    pub pipeline: PipelineConfig,
    pub style_prompt: String,
    pub events: EventSink,
    pub cancel: CancellationToken,
    pub stats: RunStats,
    pub total_chapters: usize,
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("book_dir", &self.book_dir())
            .field("total_chapters", &self.total_chapters)
            .finish_non_exhaustive()
    }
}

pub struct ContextParts {
    pub progress: ProgressStore,
    pub glossary: Glossary,
    pub bootstrap: BootstrapState,
    pub capabilities: Capabilities,
    pub translation: TranslationConfig,
    pub pipeline: PipelineConfig,
    pub style_prompt: String,
    pub events: EventSink,
    pub cancel: CancellationToken,
    pub total_chapters: usize,
}

impl PipelineContext {
    pub fn new(parts: ContextParts) -> Self {
        let view = Arc::new(parts.glossary.clone());
        let indexed_version = parts.glossary.version();
        Self {
            progress: parts.progress,
            bootstrap_done: AtomicBool::new(parts.bootstrap == BootstrapState::Done),
            glossary: tokio::sync::Mutex::new(GlossaryState {
                glossary: parts.glossary,
                backlog: Vec::new(),
                bootstrap: parts.bootstrap,
                indexed_version,
            }),
            glossary_view: RwLock::new(view),
            term_index: RwLock::new(Arc::new(TermRelevanceIndex::new())),
            capabilities: parts.capabilities,
            translation: parts.translation,
            pipeline: parts.pipeline,
            style_prompt: parts.style_prompt,
            events: parts.events,
            cancel: parts.cancel,
            stats: RunStats::default(),
            total_chapters: parts.total_chapters,
        }
    }

    pub fn book_dir(&self) -> &Path {
        self.progress.book_dir()
    }

    /// The glossary as of the last write. Lock-free for readers.
    pub fn glossary_snapshot(&self) -> Arc<Glossary> {
        self.glossary_view
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Called by writers, with the glossary lock held, after every change.
    pub fn publish_glossary(&self, glossary: &Glossary) {
        *self
            .glossary_view
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(glossary.clone());
    }

    pub fn term_index(&self) -> Arc<TermRelevanceIndex> {
        self.term_index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn bootstrap_done(&self) -> bool {
        self.bootstrap_done.load(Ordering::Acquire)
    }

    pub fn mark_bootstrap_done(&self, state: &mut GlossaryState) {
        state.bootstrap = BootstrapState::Done;
        self.bootstrap_done.store(true, Ordering::Release);
    }

    /// Refits the term index over the raw corpus and the given term list,
    /// then swaps it in. Readers keep whatever snapshot they already hold.
    pub async fn rebuild_term_index(&self, terms: Vec<String>) -> anyhow::Result<()> {
        let corpus = raw_store::read_corpus(self.book_dir()).await?;
        if corpus.is_empty() || terms.is_empty() {
            return Ok(());
        }
        let docs = corpus.len();
        let index =
            tokio::task::spawn_blocking(move || TermRelevanceIndex::fitted(&corpus, &terms))
                .await?;
        tracing::debug!(docs, terms = index.term_count(), "term index rebuilt");
        *self
            .term_index
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(index);
        Ok(())
    }

    pub fn emit(&self, event: PipelineEvent) {
        self.events.emit(event);
    }

    pub fn emit_progress(&self) {
        self.emit(PipelineEvent::Progress {
            crawled: RunStats::get(&self.stats.crawled),
            translated: RunStats::get(&self.stats.translated),
            total: self.total_chapters,
        });
    }
}
