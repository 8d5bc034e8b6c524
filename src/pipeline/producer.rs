use anyhow::Context as _;

use crate::events::PipelineEvent;
use crate::progress::ChapterStatus;
use crate::raw_store;

use super::state::{PipelineContext, RunStats};
use super::work_queue::{CloseOnDrop, WorkQueue};

/// Crawls `chapters` in order, handing each success to the consumers.
///
/// `consumers` shutdown pills are queued when this returns, however it
/// returns.
pub async fn run(ctx: &PipelineContext, chapters: Vec<u32>, queue: WorkQueue, consumers: usize) {
    let _close = CloseOnDrop::new(queue.clone(), consumers);
    let delay = ctx.pipeline.crawl_delay();
    let total = chapters.len();

    for (n, index) in chapters.into_iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            tracing::info!(chapter = index, "crawl: cancelled");
            break;
        }

        match crawl_chapter(ctx, index).await {
            Ok(title) => {
                RunStats::bump(&ctx.stats.crawled);
                tracing::info!(chapter = index, n = n + 1, total, "crawl: saved");
                ctx.emit(PipelineEvent::ChapterCrawled { index, title });
                queue.push(index);
            }
            Err(err) => {
                let message = format!("{err:#}");
                tracing::warn!(chapter = index, error = %message, "crawl: failed");
                RunStats::bump(&ctx.stats.failed_crawl);
                ctx.stats.record_error(format!("crawl chapter {index}: {message}"));
                if let Err(err) = ctx
                    .progress
                    .update_chapter_status(index, ChapterStatus::Error, Some(message.clone()))
                    .await
                {
                    tracing::warn!(chapter = index, error = %format!("{err:#}"), "crawl: status write failed");
                }
                ctx.emit(PipelineEvent::ChapterFailed {
                    index,
                    phase: "crawl".to_owned(),
                    error: message,
                });
            }
        }
        ctx.emit_progress();

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = ctx.cancel.cancelled() => {}
        }
    }
}

/// fetch, extract, write raw file, mark crawled. Returns the chapter title.
async fn crawl_chapter(ctx: &PipelineContext, index: u32) -> anyhow::Result<String> {
    let (chapter, encoding, patterns) = {
        let progress = ctx.progress.snapshot().await;
        let chapter = progress
            .chapter(index)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown chapter index: {index}"))?;
        (chapter, progress.content_encoding, progress.patterns)
    };

    let crawler = &ctx.capabilities.crawler;
    let html = crawler
        .fetch(&chapter.source_url, Some(&encoding))
        .await
        .with_context(|| format!("fetch {}", chapter.source_url))?;
    let extracted = crawler.extract_content(&html, &patterns).await?;
    if extracted.body.trim().is_empty() {
        anyhow::bail!("no content extracted from {}", chapter.source_url);
    }

    let title = if extracted.title.trim().is_empty() {
        chapter.title_source.clone()
    } else {
        extracted.title.trim().to_owned()
    };
    raw_store::write_raw_chapter(ctx.book_dir(), index, &title, &extracted.body).await?;

    let stored_title = title.clone();
    ctx.progress
        .update(move |progress| {
            progress.apply_status(index, ChapterStatus::Crawled, None)?;
            if let Some(chapter) = progress.chapter_mut(index)
                && chapter.title_source.is_empty()
            {
                chapter.title_source = stored_title;
            }
            Ok(())
        })
        .await?;
    Ok(title)
}
