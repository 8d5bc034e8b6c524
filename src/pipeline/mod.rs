//! Streaming crawl and translate pipeline for one book.
//!
//! One producer crawls chapters in order and feeds a work queue; a pool of
//! consumers translates whatever arrives. A background synchronizer folds
//! newly discovered terms into the glossary while the run is in progress.
//! Every status change is written to `book.json` as it happens, so a run
//! can be killed at any point and resumed by running it again.

pub mod bootstrap;
pub mod consumer;
pub mod producer;
pub mod state;
pub mod synchronizer;
pub mod work_queue;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::capabilities::{Capabilities, TitleKind};
use crate::config::{AppConfig, PipelineConfig, TranslationConfig};
use crate::events::{EventSink, PipelineEvent};
use crate::glossary::Glossary;
use crate::progress::{BookProgress, Chapter, ChapterStatus, ProgressStore, parse_chapter_range};
use crate::raw_store;
use crate::style;

use self::bootstrap::BootstrapState;
use self::state::{ContextParts, PipelineContext, RunStats};
use self::work_queue::WorkQueue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Book index page. Needed only the first time a book is seen.
    pub url: Option<String>,
    /// Range filter such as `"1-5,10"`. `None` means every chapter.
    pub chapters: Option<String>,
    pub style: String,
    /// Translator count. `None` uses the configured default.
    pub workers: Option<usize>,
    pub crawl_only: bool,
    pub translate_only: bool,
    pub auto_glossary: bool,
    pub force: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            url: None,
            chapters: None,
            style: style::DEFAULT_STYLE.to_owned(),
            workers: None,
            crawl_only: false,
            translate_only: false,
            auto_glossary: true,
            force: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub total_chapters: usize,
    pub crawled: usize,
    pub translated: usize,
    pub skipped_crawl: usize,
    pub skipped_translate: usize,
    pub failed_crawl: usize,
    pub failed_translate: usize,
    pub errors: Vec<String>,
    pub cancelled: bool,
    /// Every chapter in range is translated and the run was not cancelled.
    pub all_done: bool,
}

/// Chapters in range, split by what still has to happen to them.
#[derive(Debug, Default)]
struct Plan {
    selected: Vec<u32>,
    to_crawl: Vec<u32>,
    to_translate: Vec<u32>,
    already_crawled: usize,
    already_translated: usize,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    translation: TranslationConfig,
    pipeline: PipelineConfig,
    capabilities: Capabilities,
    events: EventSink,
}

impl Pipeline {
    pub fn new(config: &AppConfig, capabilities: Capabilities, events: EventSink) -> Self {
        Self {
            translation: config.translation.clone(),
            pipeline: config.pipeline.clone(),
            capabilities,
            events,
        }
    }

    /// Runs the book in `book_dir` to completion, or until `cancel` fires.
    ///
    /// Per-chapter failures are recorded on the chapter and in the result.
    /// Only structural problems (bad options, no book to work on, unreadable
    /// state) come back as `Err`.
    pub async fn run(
        &self,
        book_dir: &Path,
        options: &RunOptions,
        cancel: CancellationToken,
    ) -> anyhow::Result<PipelineResult> {
        let outcome = self.run_inner(book_dir, options, cancel).await;
        match &outcome {
            Ok(result) if result.cancelled => self.events.emit(PipelineEvent::JobCancelled),
            Ok(result) => self.events.emit(PipelineEvent::JobCompleted {
                all_done: result.all_done,
                crawled: result.crawled,
                translated: result.translated,
            }),
            Err(err) => self.events.emit(PipelineEvent::JobFailed {
                error: format!("{err:#}"),
            }),
        }
        outcome
    }

    async fn run_inner(
        &self,
        book_dir: &Path,
        options: &RunOptions,
        cancel: CancellationToken,
    ) -> anyhow::Result<PipelineResult> {
        if options.crawl_only && options.translate_only {
            anyhow::bail!("crawl_only and translate_only are mutually exclusive");
        }
        tokio::fs::create_dir_all(book_dir)
            .await
            .with_context(|| format!("create book dir: {}", book_dir.display()))?;

        let mut progress = self.load_or_init(book_dir, options).await?;
        if !options.crawl_only {
            self.translate_metadata(&mut progress).await;
        }

        let plan = classify(book_dir, &mut progress, options).await?;
        progress.save(book_dir).await?;
        tracing::info!(
            book_dir = %book_dir.display(),
            selected = plan.selected.len(),
            to_crawl = plan.to_crawl.len(),
            to_translate = plan.to_translate.len(),
            "pipeline: classified"
        );
        self.events.emit(PipelineEvent::JobStarted {
            book_dir: book_dir.display().to_string(),
            total_chapters: plan.selected.len(),
        });

        if plan.to_crawl.is_empty() && plan.to_translate.is_empty() {
            tracing::info!("pipeline: nothing to do");
            return Ok(summarize(&plan, &progress, &RunStats::default(), false));
        }

        let glossary = Glossary::load_or_create(book_dir).await?;
        let bootstrap = if options.auto_glossary && !options.crawl_only {
            BootstrapState::NotStarted
        } else {
            BootstrapState::Done
        };
        let initial_terms = glossary.terms();
        let ctx = Arc::new(PipelineContext::new(ContextParts {
            progress: ProgressStore::new(book_dir, progress),
            glossary,
            bootstrap,
            capabilities: self.capabilities.clone(),
            translation: self.translation.clone(),
            pipeline: self.pipeline.clone(),
            style_prompt: style::resolve(&options.style).to_prompt(),
            events: self.events.clone(),
            cancel,
            total_chapters: plan.selected.len(),
        }));
        if let Err(err) = ctx.rebuild_term_index(initial_terms).await {
            tracing::warn!(error = %format!("{err:#}"), "term index build failed");
        }

        let workers = options
            .workers
            .unwrap_or(self.pipeline.translator_workers)
            .max(1);
        let driven = drive(&ctx, &plan, workers, options.crawl_only).await;
        let finalized = finalize(&ctx).await;
        let cancelled = driven?;
        finalized?;

        let progress = ctx.progress.snapshot().await;
        let result = summarize(&plan, &progress, &ctx.stats, cancelled);
        tracing::info!(
            crawled = result.crawled,
            translated = result.translated,
            failed_crawl = result.failed_crawl,
            failed_translate = result.failed_translate,
            cancelled = result.cancelled,
            all_done = result.all_done,
            "pipeline: finished"
        );
        Ok(result)
    }

    async fn load_or_init(
        &self,
        book_dir: &Path,
        options: &RunOptions,
    ) -> anyhow::Result<BookProgress> {
        let existing = match BookProgress::load(book_dir).await? {
            Some(progress) if !progress.chapters.is_empty() => return Ok(progress),
            other => other,
        };
        let Some(url) = options.url.as_deref() else {
            anyhow::bail!(
                "no chapters recorded in {}; a source url is required for a new book",
                book_dir.display()
            );
        };

        tracing::info!(url, "pipeline: discovering book");
        let info = self
            .capabilities
            .crawler
            .discover(url, None)
            .await
            .with_context(|| format!("discover {url}"))?;
        if info.chapters.is_empty() {
            anyhow::bail!("no chapters found at {url}");
        }

        let mut progress = existing.unwrap_or_else(|| BookProgress::new(url));
        progress.source_url = url.to_owned();
        progress.title_source = info.title;
        progress.author_source = info.author;
        progress.content_encoding = info.encoding;
        progress.patterns = info.patterns;
        progress.chapters = info
            .chapters
            .into_iter()
            .zip(1u32..)
            .map(|(link, index)| {
                let mut chapter = Chapter::new(index, link.id, link.url);
                chapter.title_source = link.title;
                chapter
            })
            .collect();
        progress.save(book_dir).await?;
        tracing::info!(
            title = %progress.title_source,
            chapters = progress.chapters.len(),
            "pipeline: book initialised"
        );
        Ok(progress)
    }

    async fn translate_metadata(&self, progress: &mut BookProgress) {
        let translator = &self.capabilities.translator;
        if progress.title_target.is_empty() && !progress.title_source.is_empty() {
            match translator
                .translate_title(&progress.title_source, TitleKind::Book)
                .await
            {
                Ok(title) => progress.title_target = title,
                Err(err) => tracing::warn!(error = %format!("{err:#}"), "book title translation failed"),
            }
        }
        if progress.author_target.is_empty() && !progress.author_source.is_empty() {
            match translator
                .translate_title(&progress.author_source, TitleKind::Author)
                .await
            {
                Ok(author) => progress.author_target = author,
                Err(err) => tracing::warn!(error = %format!("{err:#}"), "author translation failed"),
            }
        }
    }
}

/// Applies the range filter and `force`, then buckets chapters by status.
async fn classify(
    book_dir: &Path,
    progress: &mut BookProgress,
    options: &RunOptions,
) -> anyhow::Result<Plan> {
    let max = progress.chapters.iter().map(|c| c.index).max().unwrap_or(0);
    let known = progress.chapters.iter().map(|c| c.index).collect::<HashSet<_>>();
    let selected = parse_chapter_range(options.chapters.as_deref().unwrap_or(""), max)?
        .into_iter()
        .filter(|i| known.contains(i))
        .collect::<Vec<_>>();

    if options.force {
        let recrawl = options.url.is_some() && !options.translate_only;
        for &index in &selected {
            let has_raw = raw_store::find_raw_chapter(book_dir, index).await?.is_some();
            if let Some(chapter) = progress.chapter_mut(index) {
                force_reset(chapter, recrawl, has_raw);
            }
        }
    }

    let mut plan = Plan {
        selected,
        ..Plan::default()
    };
    for &index in &plan.selected {
        let Some(chapter) = progress.chapter(index) else {
            continue;
        };
        match chapter.status {
            ChapterStatus::Pending if !options.translate_only => plan.to_crawl.push(index),
            ChapterStatus::Pending | ChapterStatus::Error => {}
            ChapterStatus::Crawled => {
                plan.already_crawled += 1;
                if !options.crawl_only {
                    plan.to_translate.push(index);
                }
            }
            ChapterStatus::Translated | ChapterStatus::Formatted | ChapterStatus::Exported => {
                plan.already_crawled += 1;
                plan.already_translated += 1;
            }
        }
    }
    Ok(plan)
}

/// With a source url everything goes back to `pending`. Without one only
/// chapters whose raw file survives can be re-translated.
fn force_reset(chapter: &mut Chapter, recrawl: bool, has_raw: bool) {
    if chapter.status == ChapterStatus::Pending {
        return;
    }
    chapter.status = if !recrawl && has_raw {
        ChapterStatus::Crawled
    } else {
        ChapterStatus::Pending
    };
    chapter.error_message = None;
}

/// Runs producer and consumers until they finish or the run is cancelled.
/// Returns whether the run was cancelled.
async fn drive(
    ctx: &Arc<PipelineContext>,
    plan: &Plan,
    workers: usize,
    crawl_only: bool,
) -> anyhow::Result<bool> {
    let queue = WorkQueue::new();
    let mut tasks = JoinSet::new();

    let sync_stop = CancellationToken::new();
    let synchronizer = (!crawl_only).then(|| {
        let ctx = Arc::clone(ctx);
        let stop = sync_stop.clone();
        tokio::spawn(async move { synchronizer::run(&ctx, stop).await })
    });

    if crawl_only {
        let ctx = Arc::clone(ctx);
        let chapters = plan.to_crawl.clone();
        let queue = queue.clone();
        tasks.spawn(async move { producer::run(&ctx, chapters, queue, 0).await });
    } else {
        for &index in &plan.to_translate {
            queue.push(index);
        }
        if plan.to_crawl.is_empty() {
            queue.close(workers);
        } else {
            let ctx = Arc::clone(ctx);
            let chapters = plan.to_crawl.clone();
            let queue = queue.clone();
            tasks.spawn(async move { producer::run(&ctx, chapters, queue, workers).await });
        }
        for worker in 0..workers {
            tasks.spawn(consumer::run(Arc::clone(ctx), worker, queue.clone()));
        }
    }

    let grace = ctx.pipeline.shutdown_grace();
    let cancelled = supervise(&mut tasks, &ctx.cancel, grace).await;

    sync_stop.cancel();
    if let Some(mut handle) = synchronizer
        && tokio::time::timeout(grace, &mut handle).await.is_err()
    {
        tracing::warn!("glossary synchronizer did not stop in time; aborting");
        handle.abort();
    }
    Ok(cancelled)
}

async fn supervise(tasks: &mut JoinSet<()>, cancel: &CancellationToken, grace: Duration) -> bool {
    tokio::select! {
        _ = drain(tasks) => return cancel.is_cancelled(),
        _ = cancel.cancelled() => {}
    }

    tracing::info!(grace_secs = grace.as_secs(), "pipeline: cancelling; waiting for in-flight chapters");
    if tokio::time::timeout(grace, drain(tasks)).await.is_err() {
        tracing::warn!("pipeline: grace period expired; aborting remaining tasks");
        tasks.abort_all();
        drain(tasks).await;
    }
    true
}

async fn drain(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined
            && err.is_panic()
        {
            tracing::error!(%err, "pipeline task panicked");
        }
    }
}

/// Last write of glossary and progress. Runs on every exit path.
async fn finalize(ctx: &PipelineContext) -> anyhow::Result<()> {
    let glossary = {
        let state = ctx.glossary.lock().await;
        state.glossary.save(ctx.book_dir()).await
    };
    let progress = ctx.progress.save().await;
    glossary.context("final glossary save")?;
    progress.context("final progress save")
}

fn summarize(
    plan: &Plan,
    progress: &BookProgress,
    stats: &RunStats,
    cancelled: bool,
) -> PipelineResult {
    let translated_in_range = plan
        .selected
        .iter()
        .filter_map(|&i| progress.chapter(i))
        .filter(|c| c.status.is_translated())
        .count();
    PipelineResult {
        total_chapters: plan.selected.len(),
        crawled: RunStats::get(&stats.crawled),
        translated: RunStats::get(&stats.translated),
        skipped_crawl: plan.already_crawled,
        skipped_translate: plan.already_translated + RunStats::get(&stats.skipped_translate),
        failed_crawl: RunStats::get(&stats.failed_crawl),
        failed_translate: RunStats::get(&stats.failed_translate),
        errors: stats.errors(),
        cancelled,
        all_done: !cancelled && translated_in_range >= plan.selected.len(),
    }
}
