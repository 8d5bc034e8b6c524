use std::sync::{Arc, LazyLock};

use anyhow::Context as _;
use async_trait::async_trait;
use serde::Deserialize;

use crate::capabilities::{Capabilities, ChunkRequest, GlossaryGenerator, TitleKind, Translator};
use crate::cli::LlmEngine;
use crate::config::AppConfig;
use crate::crawl::HttpCrawler;
use crate::glossary::{Category, GlossaryEntry};
use crate::openai::{CompletionOptions, OpenAiClient};

const MAX_GLOSSARY_SAMPLES: usize = 5;

const TRANSLATION_RULES: &str = "## Yêu cầu
- Dịch chính xác, giữ nguyên ý nghĩa và cảm xúc của bản gốc
- Sử dụng ngôn ngữ tiếng Việt tự nhiên, mượt mà
- Giữ nguyên cấu trúc đoạn văn
- KHÔNG thêm giải thích hay chú thích
- Thuật ngữ trong bảng thuật ngữ PHẢI dịch đúng như đã chỉ định
- Chỉ trả về bản dịch";

const GLOSSARY_GENERATION_PROMPT: &str = "Phân tích các đoạn văn tiểu thuyết Trung Quốc sau và xác định các thuật ngữ quan trọng cần dịch nhất quán.

## Văn bản mẫu
{samples}

## Yêu cầu
Trích xuất từ {min} đến {max} thuật ngữ theo danh mục:
1. **character** - Tên nhân vật (人物)
2. **realm** - Cảnh giới tu luyện (境界)
3. **technique** - Võ công/Pháp thuật (武功/法术)
4. **location** - Địa danh (地点)
5. **item** - Vật phẩm/Pháp bảo (法宝/神器)
6. **organization** - Môn phái/Thế lực (门派/势力)
{existing}
## Định dạng trả về
Trả về CHÍNH XÁC JSON array, không có markdown:
[
    {\"chinese\": \"陈平安\", \"vietnamese\": \"Trần Bình An\", \"category\": \"character\", \"notes\": \"Nhân vật chính\"}
]";

const NEW_TERMS_PROMPT: &str = "Đọc chương truyện sau và tìm tối đa {max} thuật ngữ quan trọng CHƯA có trong bảng thuật ngữ hiện tại (tên riêng, cảnh giới, công pháp, địa danh, vật phẩm, môn phái).

## Thuật ngữ đã có (KHÔNG lặp lại)
{existing}

## Chương truyện
{chapter}

## Định dạng trả về
Trả về CHÍNH XÁC JSON array (có thể rỗng []), không có markdown:
[{\"chinese\": \"...\", \"vietnamese\": \"...\", \"category\": \"character\", \"notes\": \"\"}]";

static JSON_ARRAY: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"(?s)\[.*\]").expect("json array regex"));

/// Translation and glossary capabilities backed by an OpenAI-compatible API.
#[derive(Debug, Clone)]
pub struct OpenAiEngine {
    client: OpenAiClient,
    glossary_min_entries: usize,
    glossary_max_entries: usize,
    polish_temperature: f32,
}

impl OpenAiEngine {
    pub fn new(
        client: OpenAiClient,
        translation: &crate::config::TranslationConfig,
    ) -> Self {
        Self {
            client,
            glossary_min_entries: translation.glossary_min_entries,
            glossary_max_entries: translation.glossary_max_entries,
            polish_temperature: translation.polish_temperature,
        }
    }
}

fn translation_system_prompt(style: &str) -> String {
    format!(
        "Bạn là dịch giả chuyên nghiệp chuyên dịch tiểu thuyết Trung Quốc sang tiếng Việt.\n\n## Phong cách dịch thuật\n{style}\n\n{TRANSLATION_RULES}"
    )
}

fn translation_user_prompt(request: &ChunkRequest<'_>) -> String {
    let mut parts = Vec::new();
    if !request.glossary.trim().is_empty() {
        parts.push(format!(
            "## Bảng thuật ngữ (BẮT BUỘC sử dụng)\n{}\n",
            request.glossary
        ));
    }
    if let Some(context) = request.prior_context.filter(|c| !c.trim().is_empty()) {
        parts.push(format!(
            "## Đoạn trước (chỉ tham khảo, KHÔNG dịch lại)\n{context}\n"
        ));
    }
    parts.push(format!("## Văn bản cần dịch\n{}", request.text));
    parts.join("\n")
}

fn title_system_prompt(kind: TitleKind) -> &'static str {
    match kind {
        TitleKind::Author => {
            "Bạn là dịch giả chuyên nghiệp. Hãy phiên âm tên tác giả Trung Quốc sang tiếng Việt.
Quy tắc:
- Phiên âm Hán-Việt chuẩn xác
- VD: 烽火戏诸侯 -> Phong Hỏa Hí Chư Hầu
- CHỈ trả về tên đã phiên âm, không giải thích"
        }
        TitleKind::Chapter => {
            "Bạn là dịch giả chuyên nghiệp. Hãy dịch tiêu đề chương tiểu thuyết Trung Quốc sang tiếng Việt.
Quy tắc:
- Dịch ý nghĩa, giữ văn phong tiên hiệp/kiếm hiệp
- VD: 第一章 惊蛰 -> Chương 1: Kinh Trập
- CHỈ trả về tiêu đề đã dịch, không giải thích"
        }
        TitleKind::Book => {
            "Bạn là dịch giả chuyên nghiệp. Hãy dịch tên tiểu thuyết Trung Quốc sang tiếng Việt.
Quy tắc:
- Phiên âm Hán-Việt hoặc dịch nghĩa tùy ngữ cảnh
- VD: 剑来 -> Kiếm Lai
- CHỈ trả về tên đã dịch, không giải thích"
        }
    }
}

#[async_trait]
impl Translator for OpenAiEngine {
    async fn translate_chunk(&self, request: ChunkRequest<'_>) -> anyhow::Result<String> {
        self.client
            .complete(
                &translation_system_prompt(request.style),
                &translation_user_prompt(&request),
                CompletionOptions::default(),
            )
            .await
    }

    async fn translate_title(&self, text: &str, kind: TitleKind) -> anyhow::Result<String> {
        let options = CompletionOptions {
            temperature: Some(0.3),
            max_tokens: Some(100),
        };
        let out = self
            .client
            .complete(title_system_prompt(kind), &format!("Dịch: {text}"), options)
            .await?;
        Ok(out.lines().next().unwrap_or_default().trim().to_owned())
    }

    async fn polish(
        &self,
        source: &str,
        draft: &str,
        style: &str,
        glossary: &str,
    ) -> anyhow::Result<String> {
        let system = format!(
            "Bạn là biên tập viên cao cấp chuyên về tiểu thuyết tiên hiệp/kiếm hiệp.\n\
Nhận bản dịch thô và nguyên tác tiếng Trung, CHỈNH SỬA bản dịch cho tự nhiên, nhất quán với phong cách sau và đúng thuật ngữ.\n\n{style}\n\n\
## Quy tắc tuyệt đối\n- Nếu câu dịch đã tốt, GIỮ NGUYÊN\n- KHÔNG thêm giải thích\n- Giữ nguyên cấu trúc đoạn văn\n- Chỉ trả về văn bản đã chỉnh sửa"
        );
        let mut user = String::new();
        if !glossary.trim().is_empty() {
            user.push_str(&format!("## Bảng thuật ngữ (kiểm tra sử dụng đúng)\n{glossary}\n\n"));
        }
        user.push_str(&format!(
            "## Nguyên tác tiếng Trung\n{source}\n\n## Bản dịch thô cần chỉnh sửa\n{draft}"
        ));
        let options = CompletionOptions {
            temperature: Some(self.polish_temperature),
            max_tokens: None,
        };
        self.client.complete(&system, &user, options).await
    }
}

#[async_trait]
impl GlossaryGenerator for OpenAiEngine {
    async fn generate_from_samples(
        &self,
        samples: &[String],
        style: Option<&str>,
        existing: &[GlossaryEntry],
    ) -> anyhow::Result<Vec<GlossaryEntry>> {
        let combined = samples
            .iter()
            .take(MAX_GLOSSARY_SAMPLES)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");
        let existing_block = if existing.is_empty() {
            String::new()
        } else {
            let terms = existing
                .iter()
                .map(|e| e.source_term.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            format!("\nBỏ qua các thuật ngữ đã có: {terms}\n")
        };
        let mut prompt = GLOSSARY_GENERATION_PROMPT
            .replace("{samples}", &combined)
            .replace("{min}", &self.glossary_min_entries.to_string())
            .replace("{max}", &self.glossary_max_entries.to_string())
            .replace("{existing}", &existing_block);
        if let Some(style) = style {
            prompt.push_str(&format!("\n\n## Phong cách dịch\n{style}"));
        }

        let options = CompletionOptions {
            temperature: Some(0.3),
            max_tokens: None,
        };
        let response = self
            .client
            .complete(
                "Bạn là chuyên gia phân tích tiểu thuyết Trung Quốc. Trả về JSON chính xác.",
                &prompt,
                options,
            )
            .await?;
        let mut entries = parse_glossary_response(&response).context("parse glossary response")?;
        entries.truncate(self.glossary_max_entries);
        Ok(entries)
    }

    async fn extract_new_terms(
        &self,
        chapter_text: &str,
        existing: &[GlossaryEntry],
        max_new: usize,
    ) -> anyhow::Result<Vec<GlossaryEntry>> {
        if max_new == 0 {
            return Ok(Vec::new());
        }
        let existing_terms = existing
            .iter()
            .map(|e| e.source_term.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let prompt = NEW_TERMS_PROMPT
            .replace("{max}", &max_new.to_string())
            .replace("{existing}", &existing_terms)
            .replace("{chapter}", chapter_text);
        let options = CompletionOptions {
            temperature: Some(0.3),
            max_tokens: None,
        };
        let response = self
            .client
            .complete(
                "Bạn là chuyên gia phân tích tiểu thuyết Trung Quốc. Trả về JSON chính xác.",
                &prompt,
                options,
            )
            .await?;
        let mut entries = parse_glossary_response(&response).context("parse new terms response")?;
        entries.retain(|e| !existing.iter().any(|x| x.source_term == e.source_term));
        entries.truncate(max_new);
        Ok(entries)
    }
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(alias = "source_term")]
    chinese: String,
    #[serde(alias = "target_term")]
    vietnamese: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

/// Pulls the first JSON array out of an LLM reply and maps it to entries.
/// A reply without any array is an empty result, not an error.
pub fn parse_glossary_response(response: &str) -> anyhow::Result<Vec<GlossaryEntry>> {
    let Some(found) = JSON_ARRAY.find(response) else {
        return Ok(Vec::new());
    };
    let raw: Vec<RawEntry> = serde_json::from_str(found.as_str()).context("glossary json")?;
    Ok(raw
        .into_iter()
        .filter(|e| !e.chinese.trim().is_empty() && !e.vietnamese.trim().is_empty())
        .map(|e| {
            let category = Category::parse_lenient(e.category.as_deref().unwrap_or("general"));
            GlossaryEntry::new(e.chinese.trim(), e.vietnamese.trim(), category)
                .with_notes(e.notes.unwrap_or_default().trim())
        })
        .collect())
}

/// Builds the run's collaborators for `engine`. Crawling always goes over
/// HTTP; only translation and glossary generation depend on the engine.
pub fn capabilities(engine: LlmEngine, config: &AppConfig) -> anyhow::Result<Capabilities> {
    let crawler = Arc::new(HttpCrawler::new(config.crawler.clone())?);
    Ok(match engine {
        LlmEngine::Openai => {
            let client = OpenAiClient::new(&config.llm).context("openai client")?;
            let engine = Arc::new(OpenAiEngine::new(client, &config.translation));
            Capabilities {
                crawler,
                translator: engine.clone(),
                glossary: engine,
            }
        }
        LlmEngine::Noop => Capabilities {
            crawler,
            translator: Arc::new(NoopEngine),
            glossary: Arc::new(NoopEngine),
        },
    })
}

/// Offline engine: translation is the identity and no terms are ever found.
/// Used for dry runs and wiring checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEngine;

#[async_trait]
impl Translator for NoopEngine {
    async fn translate_chunk(&self, request: ChunkRequest<'_>) -> anyhow::Result<String> {
        Ok(request.text.to_owned())
    }

    async fn translate_title(&self, text: &str, _kind: TitleKind) -> anyhow::Result<String> {
        Ok(text.to_owned())
    }
}

#[async_trait]
impl GlossaryGenerator for NoopEngine {
    async fn generate_from_samples(
        &self,
        _samples: &[String],
        _style: Option<&str>,
        _existing: &[GlossaryEntry],
    ) -> anyhow::Result<Vec<GlossaryEntry>> {
        Ok(Vec::new())
    }

    async fn extract_new_terms(
        &self,
        _chapter_text: &str,
        _existing: &[GlossaryEntry],
        _max_new: usize,
    ) -> anyhow::Result<Vec<GlossaryEntry>> {
        Ok(Vec::new())
    }
}
