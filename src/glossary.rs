//! Per-book term dictionary persisted as `glossary.csv`.
//!
//! The glossary keeps an ordered entry list plus a `source_term -> position`
//! index. Both are rewritten together on every mutation.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::raw_store;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Character,
    Realm,
    Technique,
    Location,
    Item,
    Organization,
    General,
}

impl Category {
    /// Prompt grouping order. Also the fallback priority when no relevance
    /// index is available.
    pub const ORDER: [Category; 7] = [
        Category::Character,
        Category::Realm,
        Category::Technique,
        Category::Location,
        Category::Item,
        Category::Organization,
        Category::General,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::Realm => "realm",
            Self::Technique => "technique",
            Self::Location => "location",
            Self::Item => "item",
            Self::Organization => "organization",
            Self::General => "general",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Character => "Nhân vật",
            Self::Realm => "Cảnh giới",
            Self::Technique => "Võ công/Pháp thuật",
            Self::Location => "Địa danh",
            Self::Item => "Vật phẩm",
            Self::Organization => "Môn phái/Thế lực",
            Self::General => "Thuật ngữ chung",
        }
    }

    pub fn priority(self) -> usize {
        Self::ORDER
            .iter()
            .position(|c| *c == self)
            .unwrap_or(Self::ORDER.len())
    }

    /// Lenient parse used for CSV import and LLM output. Unknown values map to
    /// `general`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "character" | "characters" | "person" | "name" => Self::Character,
            "realm" | "realms" | "cultivation" => Self::Realm,
            "technique" | "techniques" | "skill" | "martial_art" => Self::Technique,
            "location" | "locations" | "place" => Self::Location,
            "item" | "items" | "artifact" => Self::Item,
            "organization" | "organisation" | "sect" | "faction" => Self::Organization,
            _ => Self::General,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GlossaryEntry {
    pub source_term: String,
    pub target_term: String,
    pub category: Category,
    #[serde(default)]
    pub notes: Option<String>,
}

impl GlossaryEntry {
    pub fn new(
        source_term: impl Into<String>,
        target_term: impl Into<String>,
        category: Category,
    ) -> Self {
        Self {
            source_term: source_term.into(),
            target_term: target_term.into(),
            category,
            notes: None,
        }
    }

    /// An empty string means "no notes", matching how a blank CSV cell
    /// reads back.
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self.normalize();
        self
    }

    fn normalize(&mut self) {
        if self.notes.as_deref() == Some("") {
            self.notes = None;
        }
    }
}

/// Row shape of `glossary.csv`. Older files used `chinese`/`vietnamese`
/// headers; both spellings are accepted on read.
#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    #[serde(alias = "chinese")]
    source_term: String,
    #[serde(alias = "vietnamese")]
    target_term: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    notes: String,
}

#[derive(Debug, Clone, Default)]
pub struct Glossary {
    entries: Vec<GlossaryEntry>,
    index: HashMap<String, usize>,
    version: u64,
}

impl Glossary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[GlossaryEntry] {
        &self.entries
    }

    /// Number of mutations applied since this value was created or loaded.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn contains(&self, source_term: &str) -> bool {
        self.index.contains_key(source_term)
    }

    pub fn lookup(&self, source_term: &str) -> Option<&GlossaryEntry> {
        self.index.get(source_term).map(|&i| &self.entries[i])
    }

    /// Inserts or replaces the entry keyed by `source_term`. Entries with an
    /// empty `source_term` are ignored.
    pub fn add(&mut self, mut entry: GlossaryEntry) {
        if entry.source_term.is_empty() {
            return;
        }
        entry.normalize();
        match self.index.get(&entry.source_term) {
            Some(&i) => self.entries[i] = entry,
            None => {
                self.index.insert(entry.source_term.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
        self.version += 1;
    }

    pub fn remove(&mut self, source_term: &str) -> bool {
        let Some(i) = self.index.remove(source_term) else {
            return false;
        };
        self.entries.remove(i);
        self.rebuild_index();
        self.version += 1;
        true
    }

    /// Adds only entries whose `source_term` is not already present. Returns
    /// how many were added.
    pub fn merge_new(&mut self, entries: impl IntoIterator<Item = GlossaryEntry>) -> usize {
        let mut added = 0;
        for entry in entries {
            if entry.source_term.trim().is_empty() || self.contains(&entry.source_term) {
                continue;
            }
            self.add(entry);
            added += 1;
        }
        added
    }

    pub fn terms(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.source_term.clone()).collect()
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.source_term.clone(), i))
            .collect();
    }

    /// Category-grouped block for prompts, capped at `limit` entries.
    pub fn format_for_prompt(&self, limit: Option<usize>) -> String {
        let refs = self.entries.iter().collect::<Vec<_>>();
        format_entries(&refs, limit)
    }

    pub fn to_csv(&self) -> anyhow::Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        // Header is written explicitly so an empty glossary still has one.
        writer
            .write_record(["source_term", "target_term", "category", "notes"])
            .context("write csv header")?;
        for entry in &self.entries {
            writer
                .write_record([
                    entry.source_term.as_str(),
                    entry.target_term.as_str(),
                    entry.category.as_str(),
                    entry.notes.as_deref().unwrap_or(""),
                ])
                .with_context(|| format!("write csv row: {}", entry.source_term))?;
        }
        let bytes = writer.into_inner().context("flush csv")?;
        String::from_utf8(bytes).context("csv is not utf-8")
    }

    pub fn from_csv(text: &str) -> anyhow::Result<Self> {
        // Cells are kept verbatim so that `from_csv(to_csv(g))` is exact.
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::Headers)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut glossary = Self::new();
        for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
            let row = row.with_context(|| format!("parse csv row {}", line + 2))?;
            glossary.add(
                GlossaryEntry::new(
                    row.source_term,
                    row.target_term,
                    Category::parse_lenient(&row.category),
                )
                .with_notes(row.notes),
            );
        }
        glossary.version = 0;
        Ok(glossary)
    }

    pub async fn load(book_dir: &Path) -> anyhow::Result<Option<Self>> {
        let path = book_dir.join(raw_store::GLOSSARY_CSV);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err).with_context(|| format!("read: {}", path.display())),
        };
        Self::from_csv(&text)
            .with_context(|| format!("parse: {}", path.display()))
            .map(Some)
    }

    pub async fn load_or_create(book_dir: &Path) -> anyhow::Result<Self> {
        Ok(Self::load(book_dir).await?.unwrap_or_default())
    }

    pub async fn save(&self, book_dir: &Path) -> anyhow::Result<()> {
        self.export_csv(&book_dir.join(raw_store::GLOSSARY_CSV)).await
    }

    pub async fn import_csv(path: &Path) -> anyhow::Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("read: {}", path.display()))?;
        Self::from_csv(&text).with_context(|| format!("parse: {}", path.display()))
    }

    /// Upserts every row of `csv` into the book's glossary and saves it.
    /// Returns the number of imported rows.
    pub async fn import_into(book_dir: &Path, csv: &Path) -> anyhow::Result<usize> {
        let imported = Self::import_csv(csv).await?;
        let mut glossary = Self::load_or_create(book_dir).await?;
        for entry in imported.entries() {
            glossary.add(entry.clone());
        }
        glossary.save(book_dir).await?;
        tracing::info!(count = imported.len(), total = glossary.len(), "glossary imported");
        Ok(imported.len())
    }

    pub async fn export_csv(&self, path: &Path) -> anyhow::Result<()> {
        let text = self.to_csv()?;
        raw_store::write_atomic(path, text.as_bytes())
            .await
            .with_context(|| format!("write: {}", path.display()))
    }
}

/// Renders entries grouped by category in [`Category::ORDER`], skipping empty
/// groups.
pub fn format_entries(entries: &[&GlossaryEntry], limit: Option<usize>) -> String {
    let limit = limit.unwrap_or(usize::MAX);
    let mut remaining = limit;
    let mut out = String::new();
    for category in Category::ORDER {
        if remaining == 0 {
            break;
        }
        let group = entries
            .iter()
            .filter(|e| e.category == category)
            .take(remaining)
            .collect::<Vec<_>>();
        if group.is_empty() {
            continue;
        }
        remaining -= group.len();

        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("## {}\n", category.display_name()));
        for entry in group {
            match entry.notes.as_deref() {
                Some(notes) => out.push_str(&format!(
                    "- {} → {} ({notes})\n",
                    entry.source_term, entry.target_term
                )),
                None => out.push_str(&format!(
                    "- {} → {}\n",
                    entry.source_term, entry.target_term
                )),
            }
        }
    }
    out
}
