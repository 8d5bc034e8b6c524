#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use dich_truyen::capabilities::{
    BookInfo, Capabilities, ChapterLink, ChunkRequest, Crawler, ExtractedChapter,
    GlossaryGenerator, TitleKind, Translator,
};
use dich_truyen::config::AppConfig;
use dich_truyen::glossary::{Category, GlossaryEntry};
use dich_truyen::progress::BookPatterns;

pub const BOOK_URL: &str = "https://novel.test/book/42/";

pub fn chapter_url(index: u32) -> String {
    format!("https://novel.test/book/42/{index}.html")
}

pub fn chapter_body(index: u32) -> String {
    format!("第{index}章的正文。张三走进了青云门，修炼九阳神功。")
}

/// Serves a book of `chapters` chapters without touching the network.
#[derive(Default)]
pub struct FakeCrawler {
    chapters: u32,
    failing: HashSet<String>,
    delay: Option<Duration>,
    fetches: Mutex<HashMap<String, usize>>,
    pub discovers: AtomicUsize,
}

impl FakeCrawler {
    pub fn new(chapters: u32) -> Self {
        Self {
            chapters,
            ..Self::default()
        }
    }

    pub fn failing(mut self, url: impl Into<String>) -> Self {
        self.failing.insert(url.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetches
            .lock()
            .expect("fetch counter")
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetches.lock().expect("fetch counter").values().sum()
    }
}

#[async_trait]
impl Crawler for FakeCrawler {
    async fn discover(&self, url: &str, _encoding: Option<&str>) -> anyhow::Result<BookInfo> {
        self.discovers.fetch_add(1, Ordering::SeqCst);
        let chapters = (1..=self.chapters)
            .map(|i| ChapterLink {
                id: i.to_string(),
                url: chapter_url(i),
                title: format!("第{i}章"),
            })
            .collect();
        Ok(BookInfo {
            title: format!("测试小说 {url}"),
            author: "佚名".to_owned(),
            encoding: "utf-8".to_owned(),
            patterns: BookPatterns::default(),
            chapters,
        })
    }

    async fn fetch(&self, url: &str, _encoding: Option<&str>) -> anyhow::Result<String> {
        *self
            .fetches
            .lock()
            .expect("fetch counter")
            .entry(url.to_owned())
            .or_default() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(url) {
            anyhow::bail!("GET {url}: HTTP 503");
        }
        let index = url
            .rsplit('/')
            .next()
            .and_then(|name| name.trim_end_matches(".html").parse::<u32>().ok())
            .ok_or_else(|| anyhow::anyhow!("unexpected url {url}"))?;
        Ok(format!("第{index}章\n{}", chapter_body(index)))
    }

    async fn extract_content(
        &self,
        html: &str,
        _patterns: &BookPatterns,
    ) -> anyhow::Result<ExtractedChapter> {
        let (title, body) = html
            .split_once('\n')
            .ok_or_else(|| anyhow::anyhow!("no body"))?;
        Ok(ExtractedChapter {
            title: title.to_owned(),
            body: body.to_owned(),
        })
    }
}

/// Prefixes every chunk with `[vi] ` and records what it was asked.
#[derive(Default)]
pub struct FakeTranslator {
    pub chunks: Mutex<Vec<String>>,
    pub titles: AtomicUsize,
    delay: Option<Duration>,
}

impl FakeTranslator {
    pub fn translated_chapter(&self, index: u32) -> bool {
        let marker = format!("第{index}章的正文");
        self.chunks
            .lock()
            .expect("chunk log")
            .iter()
            .any(|text| text.contains(&marker))
    }

    pub fn chunk_calls(&self) -> usize {
        self.chunks.lock().expect("chunk log").len()
    }
}

#[async_trait]
impl Translator for FakeTranslator {
    async fn translate_chunk(&self, request: ChunkRequest<'_>) -> anyhow::Result<String> {
        self.chunks
            .lock()
            .expect("chunk log")
            .push(request.text.to_owned());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(format!("[vi] {}", request.text))
    }

    async fn translate_title(&self, text: &str, _kind: TitleKind) -> anyhow::Result<String> {
        self.titles.fetch_add(1, Ordering::SeqCst);
        Ok(format!("[vi] {text}"))
    }
}

/// Returns `count` fixed entries from the initial generation. The first
/// `failures` calls fail.
pub struct FakeGlossary {
    count: usize,
    failures: AtomicUsize,
    pub generate_calls: AtomicUsize,
    pub extract_calls: AtomicUsize,
}

impl FakeGlossary {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            failures: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
            extract_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_first(mut self, failures: usize) -> Self {
        self.failures = AtomicUsize::new(failures);
        self
    }
}

#[async_trait]
impl GlossaryGenerator for FakeGlossary {
    async fn generate_from_samples(
        &self,
        samples: &[String],
        _style: Option<&str>,
        _existing: &[GlossaryEntry],
    ) -> anyhow::Result<Vec<GlossaryEntry>> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        if samples.is_empty() {
            anyhow::bail!("no samples");
        }
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            anyhow::bail!("llm unavailable");
        }
        let mut entries = vec![
            GlossaryEntry::new("张三", "Trương Tam", Category::Character),
            GlossaryEntry::new("青云门", "Thanh Vân Môn", Category::Organization),
            GlossaryEntry::new("九阳神功", "Cửu Dương Thần Công", Category::Technique),
        ];
        for i in entries.len()..self.count {
            entries.push(GlossaryEntry::new(
                format!("术语{i}"),
                format!("Thuật ngữ {i}"),
                Category::General,
            ));
        }
        entries.truncate(self.count.max(1));
        Ok(entries)
    }

    async fn extract_new_terms(
        &self,
        _chapter_text: &str,
        existing: &[GlossaryEntry],
        _max_new: usize,
    ) -> anyhow::Result<Vec<GlossaryEntry>> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        if existing.iter().any(|e| e.source_term == "修炼") {
            return Ok(Vec::new());
        }
        Ok(vec![GlossaryEntry::new("修炼", "tu luyện", Category::General)])
    }
}

pub struct Fakes {
    pub crawler: Arc<FakeCrawler>,
    pub translator: Arc<FakeTranslator>,
    pub glossary: Arc<FakeGlossary>,
}

impl Fakes {
    pub fn new(crawler: FakeCrawler, glossary: FakeGlossary) -> Self {
        Self {
            crawler: Arc::new(crawler),
            translator: Arc::new(FakeTranslator::default()),
            glossary: Arc::new(glossary),
        }
    }

    /// Every chunk translation takes `delay`.
    pub fn with_translate_delay(mut self, delay: Duration) -> Self {
        self.translator = Arc::new(FakeTranslator {
            delay: Some(delay),
            ..FakeTranslator::default()
        });
        self
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            crawler: self.crawler.clone(),
            translator: self.translator.clone(),
            glossary: self.glossary.clone(),
        }
    }
}

/// Defaults tuned for tests: no crawl delay, small glossary, fast shutdown.
pub fn test_config(books_dir: &Path) -> AppConfig {
    let mut config = AppConfig {
        books_dir: books_dir.to_path_buf(),
        ..AppConfig::default()
    };
    config.pipeline.crawl_delay_ms = 0;
    config.pipeline.glossary_batch_interval_secs = 1;
    config.pipeline.glossary_scorer_rebuild_threshold = 0;
    config.pipeline.shutdown_grace_secs = 2;
    config.translation.glossary_min_entries = 3;
    config.translation.glossary_random_sample = false;
    config.translation.enable_polish_pass = false;
    config
}
