//! On-disk layout of a book directory.
//!
//! ```text
//! <book_dir>/
//!   book.json
//!   glossary.csv
//!   last_pipeline_settings.json
//!   raw/0001_<slug>.txt
//!   translated/1.txt
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use tokio::fs;

pub const BOOK_JSON: &str = "book.json";
pub const GLOSSARY_CSV: &str = "glossary.csv";
pub const SETTINGS_JSON: &str = "last_pipeline_settings.json";

pub fn raw_dir(book_dir: &Path) -> PathBuf {
    book_dir.join("raw")
}

pub fn translated_dir(book_dir: &Path) -> PathBuf {
    book_dir.join("translated")
}

pub fn raw_chapter_path(book_dir: &Path, index: u32, title: &str) -> PathBuf {
    raw_dir(book_dir).join(format!("{index:04}_{}.txt", slugify(title)))
}

pub fn translated_chapter_path(book_dir: &Path, index: u32) -> PathBuf {
    translated_dir(book_dir).join(format!("{index}.txt"))
}

/// Lowercased slug that keeps CJK characters and collapses separators.
pub fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_dash = false;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.extend(ch.to_lowercase());
        } else if ch.is_whitespace() || ch == '-' || ch == '_' {
            pending_dash = true;
        }
    }
    let slug = out.chars().take(50).collect::<String>();
    let slug = slug.trim_end_matches('-').to_owned();
    if slug.is_empty() {
        "unknown".to_owned()
    } else {
        slug
    }
}

/// Writes a crawled chapter: `# {title}`, a blank line, then the body.
///
/// Any earlier file for the same index under a different title is removed
/// once the new one is in place, so each chapter has exactly one raw file.
pub async fn write_raw_chapter(
    book_dir: &Path,
    index: u32,
    title: &str,
    body: &str,
) -> anyhow::Result<PathBuf> {
    let path = raw_chapter_path(book_dir, index, title);
    let contents = format!("# {title}\n\n{body}");
    write_atomic(&path, contents.as_bytes())
        .await
        .with_context(|| format!("write raw chapter: {}", path.display()))?;

    for stale in raw_chapter_files(book_dir, index).await? {
        if stale == path {
            continue;
        }
        fs::remove_file(&stale)
            .await
            .with_context(|| format!("remove stale raw chapter: {}", stale.display()))?;
        tracing::debug!(chapter = index, path = %stale.display(), "removed stale raw chapter");
    }
    Ok(path)
}

/// Finds the raw file for a chapter by its `{index:04}_` prefix.
pub async fn find_raw_chapter(book_dir: &Path, index: u32) -> anyhow::Result<Option<PathBuf>> {
    Ok(raw_chapter_files(book_dir, index).await?.into_iter().next())
}

async fn raw_chapter_files(book_dir: &Path, index: u32) -> anyhow::Result<Vec<PathBuf>> {
    let prefix = format!("{index:04}_");
    Ok(list_raw_chapters(book_dir)
        .await?
        .into_iter()
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix))
        })
        .collect())
}

/// Every `*.txt` under `raw/`, sorted by file name.
pub async fn list_raw_chapters(book_dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let dir = raw_dir(book_dir);
    let mut entries = match fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("read raw dir: {}", dir.display()));
        }
    };

    let mut paths = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("read raw dir entry: {}", dir.display()))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("txt") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Reads every raw chapter. Unreadable files are skipped.
pub async fn read_corpus(book_dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut docs = Vec::new();
    for path in list_raw_chapters(book_dir).await? {
        match fs::read_to_string(&path).await {
            Ok(text) => docs.push(text),
            Err(err) => tracing::debug!(path = %path.display(), ?err, "skip unreadable raw chapter"),
        }
    }
    Ok(docs)
}

/// Splits a raw chapter file into `(title, body)`.
pub fn split_raw_chapter(contents: &str) -> (Option<&str>, &str) {
    let Some(rest) = contents.strip_prefix("# ") else {
        return (None, contents);
    };
    match rest.split_once('\n') {
        Some((title, body)) => (Some(title.trim_end()), body.trim_start_matches('\n')),
        None => (Some(rest.trim_end()), ""),
    }
}

pub async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

pub async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    write_atomic(path, &data).await
}

/// Write-to-temp-then-rename so a crash never leaves a torn file behind.
pub async fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    fs::write(&tmp_path, data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
