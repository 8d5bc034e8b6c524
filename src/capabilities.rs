//! Seams between the pipeline and the outside world.
//!
//! The pipeline only talks to the network and the LLM through these traits,
//! so tests can swap in scripted implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::glossary::GlossaryEntry;
use crate::progress::BookPatterns;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterLink {
    pub id: String,
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookInfo {
    pub title: String,
    pub author: String,
    pub encoding: String,
    pub patterns: BookPatterns,
    pub chapters: Vec<ChapterLink>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedChapter {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleKind {
    Book,
    Author,
    Chapter,
}

/// Everything a translator needs for one chunk.
#[derive(Debug, Clone, Copy)]
pub struct ChunkRequest<'a> {
    pub text: &'a str,
    pub style: &'a str,
    /// Pre-formatted, chunk-relevant glossary block. May be empty.
    pub glossary: &'a str,
    /// Source-language tail of the previous chunk.
    pub prior_context: Option<&'a str>,
}

#[async_trait]
pub trait Crawler: Send + Sync {
    /// Reads the book index page: metadata plus the ordered chapter links.
    async fn discover(&self, url: &str, encoding: Option<&str>) -> anyhow::Result<BookInfo>;

    /// Fetches a page and decodes it with `encoding` (or the detected charset).
    async fn fetch(&self, url: &str, encoding: Option<&str>) -> anyhow::Result<String>;

    async fn extract_content(
        &self,
        html: &str,
        patterns: &BookPatterns,
    ) -> anyhow::Result<ExtractedChapter>;
}

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate_chunk(&self, request: ChunkRequest<'_>) -> anyhow::Result<String>;

    async fn translate_title(&self, text: &str, kind: TitleKind) -> anyhow::Result<String>;

    /// Optional second pass over a draft translation.
    async fn polish(
        &self,
        _source: &str,
        draft: &str,
        _style: &str,
        _glossary: &str,
    ) -> anyhow::Result<String> {
        Ok(draft.to_owned())
    }
}

#[async_trait]
pub trait GlossaryGenerator: Send + Sync {
    async fn generate_from_samples(
        &self,
        samples: &[String],
        style: Option<&str>,
        existing: &[GlossaryEntry],
    ) -> anyhow::Result<Vec<GlossaryEntry>>;

    async fn extract_new_terms(
        &self,
        chapter_text: &str,
        existing: &[GlossaryEntry],
        max_new: usize,
    ) -> anyhow::Result<Vec<GlossaryEntry>>;
}

/// The three collaborators one pipeline run talks to.
#[derive(Clone)]
pub struct Capabilities {
    pub crawler: std::sync::Arc<dyn Crawler>,
    pub translator: std::sync::Arc<dyn Translator>,
    pub glossary: std::sync::Arc<dyn GlossaryGenerator>,
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities").finish_non_exhaustive()
    }
}
