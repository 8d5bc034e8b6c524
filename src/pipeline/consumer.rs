use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::capabilities::{ChunkRequest, TitleKind};
use crate::chunking;
use crate::events::{ChunkPhase, PipelineEvent};
use crate::glossary::{Glossary, format_entries};
use crate::progress::ChapterStatus;
use crate::raw_store;
use crate::term_index::{TermRelevanceIndex, select_relevant};

use super::bootstrap;
use super::state::{PipelineContext, RunStats};
use super::work_queue::{WorkItem, WorkQueue};

enum Outcome {
    Translated { title: String },
    AlreadyDone,
}

/// One translation worker. Exits on a shutdown pill, on a closed queue, or
/// when the run is cancelled.
pub async fn run(ctx: Arc<PipelineContext>, worker: usize, queue: WorkQueue) {
    loop {
        if ctx.cancel.is_cancelled() {
            break;
        }
        let item = tokio::select! {
            item = queue.recv() => item,
            _ = ctx.cancel.cancelled() => break,
        };
        let index = match item {
            Some(WorkItem::Chapter(index)) => index,
            Some(WorkItem::Shutdown) | None => break,
        };

        match translate_chapter(&ctx, index).await {
            Ok(Outcome::Translated { title }) => {
                RunStats::bump(&ctx.stats.translated);
                tracing::info!(worker, chapter = index, "translate: saved");
                ctx.emit(PipelineEvent::ChapterTranslated { index, title });
                ctx.emit_progress();
            }
            Ok(Outcome::AlreadyDone) => {
                RunStats::bump(&ctx.stats.skipped_translate);
                tracing::debug!(worker, chapter = index, "translate: already done");
            }
            Err(err) => {
                let message = format!("{err:#}");
                tracing::warn!(worker, chapter = index, error = %message, "translate: failed");
                RunStats::bump(&ctx.stats.failed_translate);
                ctx.stats
                    .record_error(format!("translate chapter {index}: {message}"));
                if let Err(err) = ctx
                    .progress
                    .update_chapter_status(index, ChapterStatus::Error, Some(message.clone()))
                    .await
                {
                    tracing::warn!(chapter = index, error = %format!("{err:#}"), "translate: status write failed");
                }
                ctx.emit(PipelineEvent::ChapterFailed {
                    index,
                    phase: "translate".to_owned(),
                    error: message,
                });
            }
        }
    }
    tracing::debug!(worker, "translator stopped");
}

async fn translate_chapter(ctx: &Arc<PipelineContext>, index: u32) -> anyhow::Result<Outcome> {
    let chapter = ctx
        .progress
        .chapter(index)
        .await
        .ok_or_else(|| anyhow::anyhow!("unknown chapter index: {index}"))?;
    if chapter.status.is_translated() {
        return Ok(Outcome::AlreadyDone);
    }

    if let Err(err) = bootstrap::ensure_glossary(ctx).await {
        tracing::warn!(error = %format!("{err:#}"), "glossary bootstrap failed; continuing without it");
    }

    let raw_path = raw_store::find_raw_chapter(ctx.book_dir(), index)
        .await?
        .ok_or_else(|| anyhow::anyhow!("raw file missing for chapter {index}"))?;
    let contents = tokio::fs::read_to_string(&raw_path)
        .await
        .with_context(|| format!("read: {}", raw_path.display()))?;
    let (raw_title, body) = raw_store::split_raw_chapter(&contents);

    let translated = translate_body(ctx, index, body).await?;
    let out_path = raw_store::translated_chapter_path(ctx.book_dir(), index);
    raw_store::write_atomic(&out_path, translated.as_bytes())
        .await
        .with_context(|| format!("write: {}", out_path.display()))?;

    let source_title = if chapter.title_source.is_empty() {
        raw_title.unwrap_or_default().to_owned()
    } else {
        chapter.title_source.clone()
    };
    let title_target = match &chapter.title_target {
        Some(done) => Some(done.clone()),
        None if source_title.is_empty() => None,
        None => match ctx
            .capabilities
            .translator
            .translate_title(&source_title, TitleKind::Chapter)
            .await
        {
            Ok(title) => Some(title),
            Err(err) => {
                tracing::warn!(chapter = index, error = %format!("{err:#}"), "chapter title translation failed");
                None
            }
        },
    };

    if ctx.translation.progressive_glossary {
        ctx.glossary.lock().await.backlog.push(raw_path);
    }

    let shown_title = title_target.clone().unwrap_or_else(|| source_title.clone());
    ctx.progress
        .update(move |progress| {
            progress.apply_status(index, ChapterStatus::Translated, None)?;
            if let Some(chapter) = progress.chapter_mut(index) {
                if chapter.title_source.is_empty() {
                    chapter.title_source = source_title;
                }
                if title_target.is_some() {
                    chapter.title_target = title_target;
                }
            }
            Ok(())
        })
        .await?;
    Ok(Outcome::Translated {
        title: shown_title,
    })
}

/// Translates `body` chunk by chunk, at most `concurrent_requests` at a time,
/// and joins the results in source order.
async fn translate_body(
    ctx: &Arc<PipelineContext>,
    index: u32,
    body: &str,
) -> anyhow::Result<String> {
    let chunks = chunking::chunk_with_context(
        body,
        ctx.translation.chunk_size,
        ctx.translation.chunk_overlap,
    );
    let total = chunks.len();
    if total == 0 {
        return Ok(String::new());
    }

    let glossary = ctx.glossary_snapshot();
    let term_index = ctx.term_index();
    let semaphore = Arc::new(Semaphore::new(ctx.translation.concurrent_requests.max(1)));
    let mut tasks = JoinSet::new();
    for (n, chunk) in chunks.into_iter().enumerate() {
        let glossary_block = relevant_glossary(
            &glossary,
            &term_index,
            &chunk.text,
            ctx.translation.relevant_terms_top_k,
        );
        let ctx = Arc::clone(ctx);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await?;
            let text = ctx
                .capabilities
                .translator
                .translate_chunk(ChunkRequest {
                    text: &chunk.text,
                    style: &ctx.style_prompt,
                    glossary: &glossary_block,
                    prior_context: chunk.context.as_deref(),
                })
                .await
                .with_context(|| format!("chunk {}/{total}", n + 1))?;
            anyhow::Ok((n, text))
        });
    }

    let mut parts = vec![String::new(); total];
    let mut completed = 0;
    while let Some(joined) = tasks.join_next().await {
        let (n, text) = joined.context("chunk task")??;
        parts[n] = text;
        completed += 1;
        ctx.emit(PipelineEvent::ChunkProgress {
            index,
            phase: ChunkPhase::Translating,
            completed,
            total,
        });
    }

    ctx.emit(PipelineEvent::ChunkProgress {
        index,
        phase: ChunkPhase::Combining,
        completed,
        total,
    });
    let mut translated = parts.join("\n\n");

    if ctx.translation.enable_polish_pass {
        ctx.emit(PipelineEvent::ChunkProgress {
            index,
            phase: ChunkPhase::Polishing,
            completed,
            total,
        });
        let glossary_block = relevant_glossary(
            &glossary,
            &term_index,
            body,
            ctx.translation.relevant_terms_top_k,
        );
        match ctx
            .capabilities
            .translator
            .polish(body, &translated, &ctx.style_prompt, &glossary_block)
            .await
        {
            Ok(polished) if !polished.trim().is_empty() => translated = polished,
            Ok(_) => tracing::warn!(chapter = index, "polish returned nothing; keeping draft"),
            Err(err) => {
                tracing::warn!(chapter = index, error = %format!("{err:#}"), "polish failed; keeping draft");
            }
        }
    }

    ctx.emit(PipelineEvent::ChunkProgress {
        index,
        phase: ChunkPhase::Done,
        completed,
        total,
    });
    Ok(translated)
}

fn relevant_glossary(
    glossary: &Glossary,
    index: &TermRelevanceIndex,
    text: &str,
    top_k: usize,
) -> String {
    let entries = select_relevant(glossary, index, text, top_k);
    format_entries(&entries, None)
}
