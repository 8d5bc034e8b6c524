use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context as _;

/// Application configuration, built once and handed to the components that
/// need it.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub books_dir: PathBuf,
    pub llm: LlmConfig,
    pub crawler: CrawlerConfig,
    pub translation: TranslationConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_retries: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_owned(),
            model: "gpt-4o".to_owned(),
            max_tokens: 4096,
            temperature: 0.7,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub delay_ms: u64,
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub user_agent: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            delay_ms: 1000,
            timeout_secs: 30,
            max_retries: 3,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranslationConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub concurrent_requests: usize,
    pub progressive_glossary: bool,
    pub glossary_sample_chapters: usize,
    pub glossary_sample_size: usize,
    pub glossary_min_entries: usize,
    pub glossary_max_entries: usize,
    pub glossary_random_sample: bool,
    /// Upper bound on glossary terms placed into a single chunk prompt.
    pub relevant_terms_top_k: usize,
    pub new_terms_per_chapter: usize,
    pub enable_polish_pass: bool,
    pub polish_temperature: f32,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2000,
            chunk_overlap: 300,
            concurrent_requests: 3,
            progressive_glossary: true,
            glossary_sample_chapters: 5,
            glossary_sample_size: 3000,
            glossary_min_entries: 20,
            glossary_max_entries: 100,
            glossary_random_sample: true,
            relevant_terms_top_k: 30,
            new_terms_per_chapter: 3,
            enable_polish_pass: false,
            polish_temperature: 0.4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub translator_workers: usize,
    pub crawl_delay_ms: u64,
    pub glossary_batch_interval_secs: u64,
    /// The term index is rebuilt once glossary changes since the last build
    /// exceed this count.
    pub glossary_scorer_rebuild_threshold: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            translator_workers: 3,
            crawl_delay_ms: 1000,
            glossary_batch_interval_secs: 30,
            glossary_scorer_rebuild_threshold: 10,
            shutdown_grace_secs: 20,
        }
    }
}

impl PipelineConfig {
    pub fn crawl_delay(&self) -> Duration {
        Duration::from_millis(self.crawl_delay_ms)
    }

    pub fn glossary_batch_interval(&self) -> Duration {
        Duration::from_secs(self.glossary_batch_interval_secs.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl AppConfig {
    /// Reads every setting from the environment, falling back to defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self {
            books_dir: PathBuf::from("books"),
            ..Self::default()
        };

        if let Some(dir) = env_string("DICH_TRUYEN_BOOKS_DIR") {
            config.books_dir = PathBuf::from(dir);
        }

        let llm = &mut config.llm;
        if let Some(v) = env_string("OPENAI_API_KEY") {
            llm.api_key = v;
        }
        if let Some(v) = env_string("OPENAI_BASE_URL") {
            llm.base_url = v;
        }
        if let Some(v) = env_string("OPENAI_MODEL") {
            llm.model = v;
        }
        env_parse("OPENAI_MAX_TOKENS", &mut llm.max_tokens)?;
        env_parse("OPENAI_TEMPERATURE", &mut llm.temperature)?;
        env_parse("OPENAI_MAX_RETRIES", &mut llm.max_retries)?;

        let crawler = &mut config.crawler;
        env_parse("CRAWLER_DELAY_MS", &mut crawler.delay_ms)?;
        env_parse("CRAWLER_TIMEOUT_SECONDS", &mut crawler.timeout_secs)?;
        env_parse("CRAWLER_MAX_RETRIES", &mut crawler.max_retries)?;
        if let Some(v) = env_string("CRAWLER_USER_AGENT") {
            crawler.user_agent = v;
        }

        let t = &mut config.translation;
        env_parse("TRANSLATION_CHUNK_SIZE", &mut t.chunk_size)?;
        env_parse("TRANSLATION_CHUNK_OVERLAP", &mut t.chunk_overlap)?;
        env_parse("TRANSLATION_CONCURRENT_REQUESTS", &mut t.concurrent_requests)?;
        env_parse("TRANSLATION_PROGRESSIVE_GLOSSARY", &mut t.progressive_glossary)?;
        env_parse(
            "TRANSLATION_GLOSSARY_SAMPLE_CHAPTERS",
            &mut t.glossary_sample_chapters,
        )?;
        env_parse("TRANSLATION_GLOSSARY_SAMPLE_SIZE", &mut t.glossary_sample_size)?;
        env_parse("TRANSLATION_GLOSSARY_MIN_ENTRIES", &mut t.glossary_min_entries)?;
        env_parse("TRANSLATION_GLOSSARY_MAX_ENTRIES", &mut t.glossary_max_entries)?;
        env_parse(
            "TRANSLATION_GLOSSARY_RANDOM_SAMPLE",
            &mut t.glossary_random_sample,
        )?;
        env_parse("TRANSLATION_RELEVANT_TERMS_TOP_K", &mut t.relevant_terms_top_k)?;
        env_parse("TRANSLATION_NEW_TERMS_PER_CHAPTER", &mut t.new_terms_per_chapter)?;
        env_parse("TRANSLATION_ENABLE_POLISH_PASS", &mut t.enable_polish_pass)?;
        env_parse("TRANSLATION_POLISH_TEMPERATURE", &mut t.polish_temperature)?;

        let p = &mut config.pipeline;
        env_parse("PIPELINE_TRANSLATOR_WORKERS", &mut p.translator_workers)?;
        env_parse("PIPELINE_CRAWL_DELAY_MS", &mut p.crawl_delay_ms)?;
        env_parse(
            "PIPELINE_GLOSSARY_BATCH_INTERVAL",
            &mut p.glossary_batch_interval_secs,
        )?;
        env_parse(
            "PIPELINE_GLOSSARY_SCORER_REBUILD_THRESHOLD",
            &mut p.glossary_scorer_rebuild_threshold,
        )?;
        env_parse("PIPELINE_SHUTDOWN_GRACE_SECS", &mut p.shutdown_grace_secs)?;

        Ok(config)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str, slot: &mut T) -> anyhow::Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let Some(raw) = env_string(key) else {
        return Ok(());
    };
    *slot = raw
        .parse::<T>()
        .with_context(|| format!("invalid {key}={raw:?}"))?;
    Ok(())
}
