use std::collections::HashSet;

use tokio_util::sync::CancellationToken;

use crate::events::PipelineEvent;
use crate::glossary::GlossaryEntry;
use crate::raw_store;

use super::state::PipelineContext;

/// Flushes the extraction backlog every batch interval, and once more when
/// `stop` fires.
pub async fn run(ctx: &PipelineContext, stop: CancellationToken) {
    let interval = ctx.pipeline.glossary_batch_interval();
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                flush(ctx).await;
            }
            _ = stop.cancelled() => {
                flush(ctx).await;
                break;
            }
        }
    }
    tracing::debug!("glossary synchronizer stopped");
}

/// One extraction batch. Never fails: every error is logged and dropped.
pub async fn flush(ctx: &PipelineContext) -> usize {
    let pending = {
        let mut state = ctx.glossary.lock().await;
        std::mem::take(&mut state.backlog)
    };
    if pending.is_empty() {
        return 0;
    }

    let existing = ctx.glossary_snapshot();
    let max_new = ctx.translation.new_terms_per_chapter;
    let mut proposals = Vec::new();
    for path in &pending {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "term extraction: read failed");
                continue;
            }
        };
        let (_, body) = raw_store::split_raw_chapter(&text);
        match ctx
            .capabilities
            .glossary
            .extract_new_terms(body, existing.entries(), max_new)
            .await
        {
            Ok(terms) => proposals.extend(terms),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %format!("{err:#}"), "term extraction failed");
            }
        }
    }
    if proposals.is_empty() {
        return 0;
    }

    let mut state = ctx.glossary.lock().await;
    let fresh = dedupe(proposals, |term| state.glossary.contains(term));
    let added = fresh.len();
    if added == 0 {
        return 0;
    }
    for entry in fresh {
        state.glossary.add(entry);
    }
    if let Err(err) = state.glossary.save(ctx.book_dir()).await {
        tracing::warn!(error = %format!("{err:#}"), "glossary save failed");
    }
    ctx.publish_glossary(&state.glossary);
    let total = state.glossary.len();
    let rebuild = (state.versions_since_rebuild() > ctx.pipeline.glossary_scorer_rebuild_threshold)
        .then(|| state.mark_indexed());
    drop(state);

    tracing::info!(chapters = pending.len(), added, total, "glossary: merged new terms");
    ctx.emit(PipelineEvent::GlossaryUpdated { added, total });

    if let Some(terms) = rebuild
        && let Err(err) = ctx.rebuild_term_index(terms).await
    {
        tracing::warn!(error = %format!("{err:#}"), "term index rebuild failed");
    }
    added
}

/// Keeps the first proposal per source term, dropping blanks and terms the
/// glossary already has.
fn dedupe(
    proposals: Vec<GlossaryEntry>,
    known: impl Fn(&str) -> bool,
) -> Vec<GlossaryEntry> {
    let mut seen = HashSet::new();
    proposals
        .into_iter()
        .filter(|e| !e.source_term.trim().is_empty() && !known(&e.source_term))
        .filter(|e| seen.insert(e.source_term.clone()))
        .collect()
}
