//! CLI command implementations.

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

use crate::app::runner::book_dir_for_url;
use crate::cli::{GlossaryCommand, PipelineArgs, ResumableArgs, StatusArgs};
use crate::config::AppConfig;
use crate::events::EventSink;
use crate::glossary::{Category, Glossary, GlossaryEntry};
use crate::pipeline::{Pipeline, PipelineResult};
use crate::progress::{BookProgress, ChapterStatus};
use crate::settings::{self, PipelineSettings};

pub async fn pipeline(args: PipelineArgs, cancel: CancellationToken) -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("load config")?;
    let book_dir = match (&args.book_dir, &args.url) {
        (Some(dir), _) => dir.clone(),
        (None, Some(url)) => book_dir_for_url(&config.books_dir, url)?,
        (None, None) => anyhow::bail!("either --book-dir or --url is required"),
    };
    let options = args.run_options();

    let capabilities = crate::llm::capabilities(args.engine, &config)?;
    if let Some(csv) = &args.glossary_csv {
        tokio::fs::create_dir_all(&book_dir)
            .await
            .with_context(|| format!("create book dir: {}", book_dir.display()))?;
        Glossary::import_into(&book_dir, csv).await?;
    }

    let pipeline = Pipeline::new(&config, capabilities, EventSink::detached());
    let outcome = pipeline.run(&book_dir, &options, cancel).await;
    if let Err(err) = PipelineSettings::from_options(&options).save(&book_dir).await {
        tracing::warn!(error = %format!("{err:#}"), "pipeline settings not saved");
    }
    let result = outcome?;
    print_result(&book_dir, &result);
    Ok(())
}

fn print_result(book_dir: &std::path::Path, result: &PipelineResult) {
    println!("book: {}", book_dir.display());
    println!(
        "chapters: {}  crawled: {}  translated: {}",
        result.total_chapters, result.crawled, result.translated
    );
    println!(
        "skipped: {} crawl, {} translate  failed: {} crawl, {} translate",
        result.skipped_crawl, result.skipped_translate, result.failed_crawl, result.failed_translate
    );
    for error in &result.errors {
        println!("  error: {error}");
    }
    if result.cancelled {
        println!("cancelled");
    } else if result.all_done {
        println!("all chapters translated");
    }
}

pub async fn status(args: StatusArgs) -> anyhow::Result<()> {
    let progress = BookProgress::load(&args.book_dir)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no book.json in {}", args.book_dir.display()))?;

    let title = if progress.title_target.is_empty() {
        progress.title_source.clone()
    } else {
        format!("{} ({})", progress.title_target, progress.title_source)
    };
    println!("{title}");
    println!("source: {}", progress.source_url);
    for status in [
        ChapterStatus::Pending,
        ChapterStatus::Crawled,
        ChapterStatus::Translated,
        ChapterStatus::Formatted,
        ChapterStatus::Exported,
        ChapterStatus::Error,
    ] {
        let count = progress.chapters_with_status(status).len();
        if count > 0 {
            println!("{status}: {count}");
        }
    }
    for chapter in progress.chapters_with_status(ChapterStatus::Error) {
        println!(
            "  #{} {}: {}",
            chapter.index,
            chapter.title_source,
            chapter.error_message.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

pub async fn resumable(args: ResumableArgs) -> anyhow::Result<()> {
    let books_dir = match args.books_dir {
        Some(dir) => dir,
        None => AppConfig::from_env().context("load config")?.books_dir,
    };
    for book in settings::list_resumable_books(&books_dir).await? {
        println!(
            "{}\t{}\t{}/{} translated",
            book.book_dir.display(),
            book.title,
            book.translated,
            book.total_chapters
        );
    }
    Ok(())
}

pub async fn glossary(command: GlossaryCommand) -> anyhow::Result<()> {
    match command {
        GlossaryCommand::List(args) => {
            let glossary = Glossary::load_or_create(&args.book_dir).await?;
            let only = args.category.as_deref().map(Category::parse_lenient);
            for entry in glossary.entries() {
                if only.is_some_and(|c| c != entry.category) {
                    continue;
                }
                println!(
                    "{}\t{}\t{}\t{}",
                    entry.source_term,
                    entry.target_term,
                    entry.category,
                    entry.notes.as_deref().unwrap_or("")
                );
            }
        }
        GlossaryCommand::Add(args) => {
            let mut glossary = Glossary::load_or_create(&args.book_dir).await?;
            let entry = GlossaryEntry::new(
                args.source.trim(),
                args.target.trim(),
                Category::parse_lenient(&args.category),
            )
            .with_notes(args.notes.unwrap_or_default().trim());
            glossary.add(entry);
            glossary.save(&args.book_dir).await?;
            println!("{} entries", glossary.len());
        }
        GlossaryCommand::Remove(args) => {
            let mut glossary = Glossary::load_or_create(&args.book_dir).await?;
            if !glossary.remove(&args.source) {
                anyhow::bail!("term not found: {}", args.source);
            }
            glossary.save(&args.book_dir).await?;
            println!("{} entries", glossary.len());
        }
        GlossaryCommand::Import(args) => {
            let count = Glossary::import_into(&args.book_dir, &args.csv).await?;
            println!("imported {count} entries");
        }
        GlossaryCommand::Export(args) => {
            let glossary = Glossary::load(&args.book_dir)
                .await?
                .ok_or_else(|| anyhow::anyhow!("no glossary in {}", args.book_dir.display()))?;
            glossary.export_csv(&args.out).await?;
            println!("exported {} entries to {}", glossary.len(), args.out.display());
        }
    }
    Ok(())
}
