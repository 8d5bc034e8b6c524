use std::path::PathBuf;

use anyhow::Context as _;

use crate::events::PipelineEvent;
use crate::raw_store;

use super::state::PipelineContext;

/// Progress of the one-time initial glossary generation.
///
/// `Done` is only ever entered on success (or when there is nothing to do).
/// A failed attempt goes back to `NotStarted`, so the next consumer that asks
/// will try again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    NotStarted,
    InProgress,
    Done,
}

/// Generates the initial glossary from sampled raw chapters if nobody has
/// yet. Safe to call from every consumer; all but the first return quickly.
pub async fn ensure_glossary(ctx: &PipelineContext) -> anyhow::Result<()> {
    if ctx.bootstrap_done() {
        return Ok(());
    }

    let mut state = ctx.glossary.lock().await;
    if state.bootstrap == BootstrapState::Done {
        return Ok(());
    }
    if !state.glossary.is_empty() {
        ctx.mark_bootstrap_done(&mut state);
        return Ok(());
    }

    let raw = raw_store::list_raw_chapters(ctx.book_dir()).await?;
    if raw.is_empty() {
        ctx.mark_bootstrap_done(&mut state);
        return Ok(());
    }

    state.bootstrap = BootstrapState::InProgress;
    let samples = match read_samples(ctx, &raw).await {
        Ok(samples) => samples,
        Err(err) => {
            state.bootstrap = BootstrapState::NotStarted;
            return Err(err);
        }
    };
    tracing::info!(samples = samples.len(), "glossary: generating from samples");

    let generated = ctx
        .capabilities
        .glossary
        .generate_from_samples(
            &samples,
            Some(ctx.style_prompt.as_str()),
            state.glossary.entries(),
        )
        .await
        .context("generate glossary");
    let entries = match generated {
        Ok(entries) => entries,
        Err(err) => {
            state.bootstrap = BootstrapState::NotStarted;
            return Err(err);
        }
    };

    let added = state.glossary.merge_new(entries);
    if let Err(err) = state.glossary.save(ctx.book_dir()).await {
        state.bootstrap = BootstrapState::NotStarted;
        return Err(err);
    }
    ctx.publish_glossary(&state.glossary);
    ctx.mark_bootstrap_done(&mut state);
    let total = state.glossary.len();
    let terms = state.mark_indexed();
    drop(state);

    tracing::info!(added, total, "glossary: generated");
    ctx.emit(PipelineEvent::GlossaryUpdated { added, total });

    if let Err(err) = ctx.rebuild_term_index(terms).await {
        tracing::warn!(error = %format!("{err:#}"), "term index rebuild failed");
    }
    Ok(())
}

async fn read_samples(ctx: &PipelineContext, raw: &[PathBuf]) -> anyhow::Result<Vec<String>> {
    let picked = pick_samples(
        raw,
        ctx.translation.glossary_sample_chapters,
        ctx.translation.glossary_random_sample,
    );
    let mut samples = Vec::with_capacity(picked.len());
    for path in picked {
        let contents = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("read sample: {}", path.display()))?;
        let (_, body) = raw_store::split_raw_chapter(&contents);
        let excerpt = body
            .chars()
            .take(ctx.translation.glossary_sample_size)
            .collect::<String>();
        if !excerpt.trim().is_empty() {
            samples.push(excerpt);
        }
    }
    Ok(samples)
}

fn pick_samples(paths: &[PathBuf], count: usize, random: bool) -> Vec<PathBuf> {
    if paths.len() <= count {
        return paths.to_vec();
    }
    if !random {
        return paths[..count].to_vec();
    }
    let mut picked = paths.to_vec();
    fastrand::shuffle(&mut picked);
    picked.truncate(count);
    picked.sort();
    picked
}
