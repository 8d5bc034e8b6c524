mod support;

use std::path::Path;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use dich_truyen::events::{EventBus, EventSink};
use dich_truyen::glossary::Glossary;
use dich_truyen::pipeline::{Pipeline, PipelineResult, RunOptions};
use dich_truyen::progress::{BookProgress, ChapterStatus};
use dich_truyen::raw_store;

use support::{BOOK_URL, FakeCrawler, FakeGlossary, Fakes, chapter_url, test_config};

fn options() -> RunOptions {
    RunOptions {
        url: Some(BOOK_URL.to_owned()),
        workers: Some(2),
        ..RunOptions::default()
    }
}

async fn run(fakes: &Fakes, book_dir: &Path, options: &RunOptions) -> anyhow::Result<PipelineResult> {
    let config = test_config(book_dir.parent().unwrap_or(book_dir));
    Pipeline::new(&config, fakes.capabilities(), EventSink::detached())
        .run(book_dir, options, CancellationToken::new())
        .await
}

async fn load_progress(book_dir: &Path) -> BookProgress {
    BookProgress::load(book_dir)
        .await
        .expect("read book.json")
        .expect("book.json exists")
}

#[tokio::test]
async fn fresh_book_is_crawled_translated_and_gets_a_glossary() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let book_dir = temp.path().join("book");
    let fakes = Fakes::new(FakeCrawler::new(3), FakeGlossary::new(5));

    let result = run(&fakes, &book_dir, &options()).await?;

    assert_eq!(result.total_chapters, 3);
    assert_eq!(result.crawled, 3);
    assert_eq!(result.translated, 3);
    assert_eq!(result.failed_crawl, 0);
    assert_eq!(result.failed_translate, 0);
    assert!(!result.cancelled);
    assert!(result.all_done);

    let progress = load_progress(&book_dir).await;
    assert_eq!(progress.title_target, format!("[vi] 测试小说 {BOOK_URL}"));
    assert!(progress.chapters.iter().all(|c| c.status == ChapterStatus::Translated));
    assert!(progress.chapters.iter().all(|c| c.title_target.is_some()));

    for index in 1..=3 {
        assert!(raw_store::find_raw_chapter(&book_dir, index).await?.is_some());
        let translated =
            std::fs::read_to_string(raw_store::translated_chapter_path(&book_dir, index))?;
        assert!(translated.contains(&format!("[vi] 第{index}章的正文")));
    }

    let glossary = Glossary::load(&book_dir).await?.expect("glossary.csv");
    assert!(glossary.len() >= 3);
    assert!(glossary.contains("张三"));
    assert_eq!(
        fakes
            .glossary
            .generate_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
    Ok(())
}

#[tokio::test]
async fn progressive_terms_are_merged_before_the_run_returns() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let book_dir = temp.path().join("book");
    let fakes = Fakes::new(FakeCrawler::new(2), FakeGlossary::new(3));

    run(&fakes, &book_dir, &options()).await?;

    let glossary = Glossary::load(&book_dir).await?.expect("glossary.csv");
    assert!(glossary.contains("修炼"));
    Ok(())
}

#[tokio::test]
async fn resume_skips_finished_work() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let book_dir = temp.path().join("book");
    let fakes = Fakes::new(FakeCrawler::new(3), FakeGlossary::new(3));

    let first = run(
        &fakes,
        &book_dir,
        &RunOptions {
            chapters: Some("1".to_owned()),
            ..options()
        },
    )
    .await?;
    assert_eq!(first.translated, 1);
    assert!(first.all_done);

    let crawl_only = run(
        &fakes,
        &book_dir,
        &RunOptions {
            url: None,
            chapters: Some("2".to_owned()),
            crawl_only: true,
            ..options()
        },
    )
    .await?;
    assert_eq!(crawl_only.crawled, 1);
    assert_eq!(crawl_only.translated, 0);
    assert!(!fakes.translator.translated_chapter(2));

    let progress = load_progress(&book_dir).await;
    assert_eq!(progress.chapter(1).map(|c| c.status), Some(ChapterStatus::Translated));
    assert_eq!(progress.chapter(2).map(|c| c.status), Some(ChapterStatus::Crawled));
    assert_eq!(progress.chapter(3).map(|c| c.status), Some(ChapterStatus::Pending));

    let chunks_before = fakes.translator.chunk_calls();
    let last = run(&fakes, &book_dir, &options()).await?;

    assert_eq!(last.crawled, 1);
    assert_eq!(last.translated, 2);
    assert_eq!(last.skipped_crawl, 2);
    assert_eq!(last.skipped_translate, 1);
    assert!(last.all_done);
    for index in 1..=3 {
        assert_eq!(fakes.crawler.fetch_count(&chapter_url(index)), 1);
    }
    assert_eq!(fakes.translator.chunk_calls(), chunks_before + 2);
    assert_eq!(
        fakes
            .crawler
            .discovers
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
    Ok(())
}

#[tokio::test]
async fn second_run_of_a_finished_book_does_nothing() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let book_dir = temp.path().join("book");
    let fakes = Fakes::new(FakeCrawler::new(2), FakeGlossary::new(3));

    run(&fakes, &book_dir, &options()).await?;
    let fetches = fakes.crawler.total_fetches();
    let chunks = fakes.translator.chunk_calls();

    let again = run(&fakes, &book_dir, &options()).await?;
    assert_eq!(again.crawled, 0);
    assert_eq!(again.translated, 0);
    assert_eq!(again.skipped_translate, 2);
    assert!(again.all_done);
    assert_eq!(fakes.crawler.total_fetches(), fetches);
    assert_eq!(fakes.translator.chunk_calls(), chunks);
    Ok(())
}

#[tokio::test]
async fn force_without_url_retranslates_from_raw_files() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let book_dir = temp.path().join("book");
    let fakes = Fakes::new(FakeCrawler::new(3), FakeGlossary::new(3));

    run(&fakes, &book_dir, &options()).await?;
    let fetches = fakes.crawler.total_fetches();

    let forced = run(
        &fakes,
        &book_dir,
        &RunOptions {
            url: None,
            force: true,
            ..options()
        },
    )
    .await?;

    assert_eq!(forced.crawled, 0);
    assert_eq!(forced.translated, 3);
    assert!(forced.all_done);
    assert_eq!(fakes.crawler.total_fetches(), fetches);
    Ok(())
}

#[tokio::test]
async fn crawl_failures_are_recorded_and_not_retried_without_force() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let book_dir = temp.path().join("book");
    let fakes = Fakes::new(
        FakeCrawler::new(3).failing(chapter_url(2)),
        FakeGlossary::new(3),
    );

    let result = run(&fakes, &book_dir, &options()).await?;
    assert_eq!(result.crawled, 2);
    assert_eq!(result.translated, 2);
    assert_eq!(result.failed_crawl, 1);
    assert!(!result.all_done);
    assert!(result.errors.iter().any(|e| e.contains("HTTP 503")));

    let progress = load_progress(&book_dir).await;
    let failed = progress.chapter(2).expect("chapter 2");
    assert_eq!(failed.status, ChapterStatus::Error);
    assert!(failed.error_message.is_some());

    let again = run(&fakes, &book_dir, &options()).await?;
    assert_eq!(again.failed_crawl, 0);
    assert!(!again.all_done);
    assert_eq!(fakes.crawler.fetch_count(&chapter_url(2)), 1);
    Ok(())
}

#[tokio::test]
async fn failed_glossary_bootstrap_is_retried_by_a_later_chapter() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let book_dir = temp.path().join("book");
    let fakes = Fakes::new(FakeCrawler::new(3), FakeGlossary::new(3).failing_first(1));

    let result = run(
        &fakes,
        &book_dir,
        &RunOptions {
            workers: Some(1),
            ..options()
        },
    )
    .await?;

    assert_eq!(result.translated, 3);
    assert_eq!(
        fakes
            .glossary
            .generate_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        2
    );
    let glossary = Glossary::load(&book_dir).await?.expect("glossary.csv");
    assert!(glossary.contains("张三"));
    Ok(())
}

#[tokio::test]
async fn no_glossary_skips_initial_generation() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let book_dir = temp.path().join("book");
    let fakes = Fakes::new(FakeCrawler::new(2), FakeGlossary::new(3));

    let result = run(
        &fakes,
        &book_dir,
        &RunOptions {
            auto_glossary: false,
            ..options()
        },
    )
    .await?;

    assert!(result.all_done);
    assert_eq!(
        fakes
            .glossary
            .generate_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        0
    );
    Ok(())
}

#[tokio::test]
async fn cancellation_keeps_progress_and_reports_unfinished() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let book_dir = temp.path().join("book");
    let fakes = Fakes::new(
        FakeCrawler::new(8).with_delay(Duration::from_millis(200)),
        FakeGlossary::new(3),
    );
    let config = test_config(temp.path());
    let pipeline = Pipeline::new(&config, fakes.capabilities(), EventSink::detached());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        trigger.cancel();
    });

    let result = pipeline.run(&book_dir, &options(), cancel).await?;
    assert!(result.cancelled);
    assert!(!result.all_done);
    assert!(result.crawled < 8);

    let progress = load_progress(&book_dir).await;
    let pending = progress.chapters_with_status(ChapterStatus::Pending).len();
    assert!(pending > 0);
    assert!(book_dir.join(raw_store::GLOSSARY_CSV).exists());
    Ok(())
}

fn cancel_after(cancel: &CancellationToken, delay: Duration) {
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        trigger.cancel();
    });
}

#[tokio::test]
async fn chapter_in_flight_at_cancel_finishes_within_grace() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let book_dir = temp.path().join("book");
    let fakes = Fakes::new(FakeCrawler::new(2), FakeGlossary::new(3))
        .with_translate_delay(Duration::from_millis(600));
    let config = test_config(temp.path());
    let pipeline = Pipeline::new(&config, fakes.capabilities(), EventSink::detached());

    let cancel = CancellationToken::new();
    cancel_after(&cancel, Duration::from_millis(300));
    let opts = RunOptions {
        workers: Some(1),
        ..options()
    };
    let result = pipeline.run(&book_dir, &opts, cancel).await?;

    assert!(result.cancelled);
    assert!(!result.all_done);
    assert_eq!(result.translated, 1);

    let progress = load_progress(&book_dir).await;
    let status = |i| progress.chapter(i).map(|c| c.status);
    assert_eq!(status(1), Some(ChapterStatus::Translated));
    assert_eq!(status(2), Some(ChapterStatus::Crawled));
    let translated = std::fs::read_to_string(raw_store::translated_chapter_path(&book_dir, 1))?;
    assert!(translated.starts_with("[vi] "));
    assert!(!raw_store::translated_chapter_path(&book_dir, 2).exists());
    Ok(())
}

#[tokio::test]
async fn expired_grace_aborts_translation_and_still_saves() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let book_dir = temp.path().join("book");
    let fakes = Fakes::new(FakeCrawler::new(1), FakeGlossary::new(3))
        .with_translate_delay(Duration::from_secs(5));
    let mut config = test_config(temp.path());
    config.pipeline.shutdown_grace_secs = 1;
    let pipeline = Pipeline::new(&config, fakes.capabilities(), EventSink::detached());

    let cancel = CancellationToken::new();
    cancel_after(&cancel, Duration::from_millis(300));
    let started = std::time::Instant::now();
    let opts = RunOptions {
        workers: Some(1),
        ..options()
    };
    let result = pipeline.run(&book_dir, &opts, cancel).await?;

    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(result.cancelled);
    assert_eq!(result.translated, 0);

    let progress = load_progress(&book_dir).await;
    let chapter = progress.chapter(1).expect("chapter 1");
    assert_eq!(chapter.status, ChapterStatus::Crawled);
    assert_eq!(chapter.error_message, None);
    assert!(raw_store::find_raw_chapter(&book_dir, 1).await?.is_some());
    assert!(!raw_store::translated_chapter_path(&book_dir, 1).exists());
    assert!(book_dir.join(raw_store::GLOSSARY_CSV).exists());
    Ok(())
}

#[tokio::test]
async fn crawl_only_and_translate_only_conflict() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let book_dir = temp.path().join("book");
    let fakes = Fakes::new(FakeCrawler::new(1), FakeGlossary::new(3));

    let err = run(
        &fakes,
        &book_dir,
        &RunOptions {
            crawl_only: true,
            translate_only: true,
            ..options()
        },
    )
    .await
    .expect_err("conflicting flags");
    assert!(format!("{err:#}").contains("mutually exclusive"));
    Ok(())
}

#[tokio::test]
async fn new_book_without_url_is_an_error() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let book_dir = temp.path().join("book");
    let fakes = Fakes::new(FakeCrawler::new(1), FakeGlossary::new(3));

    let err = run(
        &fakes,
        &book_dir,
        &RunOptions {
            url: None,
            ..options()
        },
    )
    .await
    .expect_err("no url");
    assert!(format!("{err:#}").contains("source url is required"));
    Ok(())
}

#[tokio::test]
async fn translate_only_never_crawls() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let book_dir = temp.path().join("book");
    let fakes = Fakes::new(FakeCrawler::new(2), FakeGlossary::new(3));

    let result = run(
        &fakes,
        &book_dir,
        &RunOptions {
            translate_only: true,
            ..options()
        },
    )
    .await?;

    assert_eq!(result.crawled, 0);
    assert_eq!(result.translated, 0);
    assert!(!result.all_done);
    assert_eq!(fakes.crawler.total_fetches(), 0);
    Ok(())
}

#[tokio::test]
async fn events_cover_the_run() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let book_dir = temp.path().join("book");
    let fakes = Fakes::new(FakeCrawler::new(2), FakeGlossary::new(3));
    let config = test_config(temp.path());
    let bus = EventBus::new();
    let mut rx = bus.subscribe();

    Pipeline::new(&config, fakes.capabilities(), bus.scoped(Some("job-1".to_owned())))
        .run(&book_dir, &options(), CancellationToken::new())
        .await?;

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.job_id.as_deref(), Some("job-1"));
        kinds.push(event.event.kind());
    }
    assert_eq!(kinds.first(), Some(&"job_started"));
    assert_eq!(kinds.last(), Some(&"job_completed"));
    assert_eq!(kinds.iter().filter(|k| **k == "chapter_crawled").count(), 2);
    assert_eq!(kinds.iter().filter(|k| **k == "chapter_translated").count(), 2);
    assert!(kinds.contains(&"glossary_updated"));
    Ok(())
}
