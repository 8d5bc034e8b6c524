use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use encoding_rs::Encoding;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, USER_AGENT};
use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

use crate::capabilities::{BookInfo, ChapterLink, Crawler, ExtractedChapter};
use crate::config::CrawlerConfig;
use crate::progress::BookPatterns;

/// Tried in order when a book has no chapter selector yet. The one matching
/// the most links wins.
const CHAPTER_SELECTOR_CANDIDATES: &[&str] = &[
    "#list dd a",
    ".listmain dd a",
    "#chapterlist a",
    ".chapter-list a",
    ".chapterlist a",
    ".mulu a",
    "dd a",
    "ul li a",
];

/// Reqwest-backed crawler for static chapter sites.
#[derive(Debug, Clone)]
pub struct HttpCrawler {
    client: reqwest::Client,
    config: CrawlerConfig,
}

impl HttpCrawler {
    pub fn new(config: CrawlerConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build crawler http client")?;
        Ok(Self { client, config })
    }

    async fn fetch_bytes(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(FetchError::Permanent(err)) => return Err(err),
                Err(FetchError::Transient(err)) if attempt < self.config.max_retries => {
                    attempt += 1;
                    tracing::warn!(url, attempt, "fetch retry: {err:#}");
                    let delay = Duration::from_millis(self.config.delay_ms) * attempt as u32;
                    tokio::time::sleep(delay).await;
                }
                Err(FetchError::Transient(err)) => return Err(err),
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, &self.config.user_agent)
            .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .send()
            .await
            .with_context(|| format!("GET {url}"))
            .map_err(FetchError::Transient)?;

        let status = response.status();
        if !status.is_success() {
            let err = anyhow::anyhow!("GET {url}: HTTP {status}");
            return Err(
                if matches!(
                    status,
                    StatusCode::FORBIDDEN | StatusCode::NOT_FOUND | StatusCode::GONE
                ) {
                    FetchError::Permanent(err)
                } else {
                    FetchError::Transient(err)
                },
            );
        }

        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("read body: {url}"))
            .map_err(FetchError::Transient)?;
        Ok(bytes.to_vec())
    }
}

enum FetchError {
    Transient(anyhow::Error),
    Permanent(anyhow::Error),
}

#[async_trait]
impl Crawler for HttpCrawler {
    async fn discover(&self, url: &str, encoding: Option<&str>) -> anyhow::Result<BookInfo> {
        let base = Url::parse(url).with_context(|| format!("parse book url: {url}"))?;
        let bytes = self.fetch_bytes(url).await?;
        let encoding = match encoding {
            Some(label) => label.to_owned(),
            None => detect_encoding(&bytes),
        };
        let html = decode(&bytes, &encoding);
        let mut info = parse_index_page(&html, &base, &BookPatterns::default())?;
        info.encoding = encoding;
        tracing::info!(
            url,
            title = %info.title,
            chapters = info.chapters.len(),
            selector = %info.patterns.chapter_selector,
            "discovered book"
        );
        Ok(info)
    }

    async fn fetch(&self, url: &str, encoding: Option<&str>) -> anyhow::Result<String> {
        let bytes = self.fetch_bytes(url).await?;
        let encoding = match encoding {
            Some(label) => label.to_owned(),
            None => detect_encoding(&bytes),
        };
        Ok(decode(&bytes, &encoding))
    }

    async fn extract_content(
        &self,
        html: &str,
        patterns: &BookPatterns,
    ) -> anyhow::Result<ExtractedChapter> {
        let extracted = extract_chapter(html, patterns)?;
        if !extracted.body.trim().is_empty() {
            return Ok(extracted);
        }

        tracing::debug!(
            selector = %patterns.content_selector,
            "content selector matched nothing; trying readability"
        );
        let html = html.to_owned();
        let fallback = tokio::task::spawn_blocking(move || extract_with_readability(&html))
            .await
            .context("join readability task")??;
        let title = if extracted.title.is_empty() {
            fallback.title
        } else {
            extracted.title
        };
        if fallback.body.trim().is_empty() {
            anyhow::bail!("no chapter content found");
        }
        Ok(ExtractedChapter {
            title,
            body: fallback.body,
        })
    }
}

/// Guesses a page's charset from its `<meta>` declaration, then from whether
/// the bytes are valid UTF-8. Chinese sites without either are usually GBK.
pub fn detect_encoding(bytes: &[u8]) -> String {
    let head = &bytes[..bytes.len().min(4096)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();
    if let Some(pos) = head.find("charset=") {
        let label = head[pos + "charset=".len()..]
            .trim_start_matches(['"', '\''])
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect::<String>();
        if let Some(encoding) = Encoding::for_label(label.as_bytes()) {
            return normalize_encoding_name(encoding);
        }
    }
    if std::str::from_utf8(bytes).is_ok() {
        "utf-8".to_owned()
    } else {
        "gbk".to_owned()
    }
}

fn normalize_encoding_name(encoding: &'static Encoding) -> String {
    // gb2312 and gb18030 pages decode fine as GBK in practice.
    if encoding == encoding_rs::GB18030 || encoding == encoding_rs::GBK {
        "gbk".to_owned()
    } else {
        encoding.name().to_ascii_lowercase()
    }
}

/// Decodes with the named charset; unknown labels fall back to UTF-8.
pub fn decode(bytes: &[u8], label: &str) -> String {
    let encoding = Encoding::for_label(label.trim().as_bytes()).unwrap_or(encoding_rs::UTF_8);
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::debug!(encoding = encoding.name(), "decode had replacement characters");
    }
    text.into_owned()
}

fn selector(raw: &str) -> anyhow::Result<Selector> {
    Selector::parse(raw).map_err(|err| anyhow::anyhow!("invalid css selector {raw:?}: {err}"))
}

/// Reads title, author and the ordered chapter list from an index page.
pub fn parse_index_page(html: &str, base: &Url, patterns: &BookPatterns) -> anyhow::Result<BookInfo> {
    let document = Html::parse_document(html);

    let mut patterns = patterns.clone();
    let chapters = if patterns.chapter_selector.trim().is_empty() {
        let mut best: Option<(&str, Vec<ChapterLink>)> = None;
        for &candidate in CHAPTER_SELECTOR_CANDIDATES {
            let links = collect_chapter_links(&document, base, &selector(candidate)?);
            if links.len() > best.as_ref().map_or(0, |(_, l)| l.len()) {
                best = Some((candidate, links));
            }
        }
        let Some((chosen, links)) = best else {
            anyhow::bail!("no chapter links found on index page: {base}");
        };
        patterns.chapter_selector = chosen.to_owned();
        links
    } else {
        collect_chapter_links(&document, base, &selector(&patterns.chapter_selector)?)
    };

    let title = meta_content(&document, "og:novel:book_name")
        .or_else(|| first_text(&document, "h1"))
        .or_else(|| first_text(&document, "title"))
        .unwrap_or_default();
    let author = meta_content(&document, "og:novel:author").unwrap_or_default();

    Ok(BookInfo {
        title,
        author,
        encoding: "utf-8".to_owned(),
        patterns,
        chapters,
    })
}

fn collect_chapter_links(document: &Html, base: &Url, selector: &Selector) -> Vec<ChapterLink> {
    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();
    for element in document.select(selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
            continue;
        }
        let Ok(url) = base.join(href) else {
            continue;
        };
        if !seen.insert(url.to_string()) {
            continue;
        }
        links.push(ChapterLink {
            id: chapter_id_from_href(href),
            url: url.to_string(),
            title: element.text().collect::<String>().trim().to_owned(),
        });
    }
    links
}

/// `.../5588734.html` yields `5588734`; anything else yields the last path
/// segment.
pub fn chapter_id_from_href(href: &str) -> String {
    let path = href.split(['?', '#']).next().unwrap_or(href);
    let file = path.trim_end_matches('/').rsplit('/').next().unwrap_or(path);
    let stem = file
        .strip_suffix(".html")
        .or_else(|| file.strip_suffix(".htm"));
    if let Some(stem) = stem {
        let digits = stem
            .chars()
            .rev()
            .take_while(char::is_ascii_digit)
            .collect::<String>();
        if !digits.is_empty() {
            return digits.chars().rev().collect();
        }
    }
    if file.is_empty() {
        href.to_owned()
    } else {
        file.to_owned()
    }
}

fn meta_content(document: &Html, property: &str) -> Option<String> {
    let selector = Selector::parse(&format!("meta[property=\"{property}\"]")).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn first_text(document: &Html, raw_selector: &str) -> Option<String> {
    let selector = Selector::parse(raw_selector).ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| normalize_inline(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

/// Pulls the chapter title and body text out of a chapter page.
pub fn extract_chapter(html: &str, patterns: &BookPatterns) -> anyhow::Result<ExtractedChapter> {
    let document = Html::parse_document(html);
    let title = first_text(&document, &patterns.title_selector).unwrap_or_default();

    let content_selector = selector(&patterns.content_selector)?;
    let Some(content) = document.select(&content_selector).next() else {
        return Ok(ExtractedChapter {
            title,
            body: String::new(),
        });
    };

    let removed = patterns
        .elements_to_remove
        .iter()
        .filter_map(|raw| Selector::parse(raw).ok())
        .flat_map(|sel| content.select(&sel).collect::<Vec<_>>())
        .collect::<Vec<_>>();

    let mut text = String::new();
    collect_text(content, &removed, &mut text);

    let body = text
        .lines()
        .map(normalize_inline)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    Ok(ExtractedChapter { title, body })
}

fn collect_text(
    element: ElementRef<'_>,
    removed: &[ElementRef<'_>],
    out: &mut String,
) {
    for child in element.children() {
        if removed.iter().any(|r| r.id() == child.id()) {
            continue;
        }
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let name = el.name();
                if name == "br" {
                    out.push('\n');
                    continue;
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, removed, out);
                }
                if matches!(name, "p" | "div") {
                    out.push_str("\n\n");
                }
            }
            _ => {}
        }
    }
}

fn normalize_inline(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_with_readability(html: &str) -> anyhow::Result<ExtractedChapter> {
    use readability_js::{Readability, ReadabilityOptions};

    let readability = Readability::new().context("initialize readability-js")?;
    let options = ReadabilityOptions::new()
        .char_threshold(0)
        .nb_top_candidates(10)
        .link_density_modifier(2.0);
    let article = readability
        .parse_with_options(html, None, Some(options))
        .context("readability parse")?;
    let markdown = html2md::parse_html(&article.content);
    let body = markdown
        .lines()
        .map(normalize_inline)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    Ok(ExtractedChapter {
        title: article.title,
        body,
    })
}
