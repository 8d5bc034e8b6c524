use std::time::Duration;

use anyhow::Context as _;

use crate::config::LlmConfig;

pub fn chat_completions_endpoint(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/chat/completions")
}

/// Per-call overrides of the configured sampling parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Minimal OpenAI-compatible chat client with bounded retries.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: usize,
    retry_base_delay: Duration,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        if config.api_key.trim().is_empty() {
            anyhow::bail!("OPENAI_API_KEY is required for the openai engine");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoint: chat_completions_endpoint(&config.base_url),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_secs(1),
        })
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Sends one system + user exchange. Failed attempts are retried with
    /// exponential backoff (`base`, `2 * base`, `4 * base`, ...).
    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        options: CompletionOptions,
    ) -> anyhow::Result<String> {
        let mut attempt = 0;
        loop {
            match self.complete_once(system, user, options).await {
                Ok(text) => return Ok(text),
                Err(err) if attempt < self.max_retries => {
                    let delay = self.retry_base_delay * 2u32.saturating_pow(attempt as u32);
                    tracing::warn!(attempt = attempt + 1, ?delay, "llm retry: {err:#}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("chat completion failed after {} attempts", attempt + 1)
                    });
                }
            }
        }
    }

    async fn complete_once(
        &self,
        system: &str,
        user: &str,
        options: CompletionOptions,
    ) -> anyhow::Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "max_tokens": options.max_tokens.unwrap_or(self.max_tokens),
        });

        // NOTE: Some GPT-5 models reject sampling params like `temperature`.
        if !self.model.starts_with("gpt-5")
            && let Some(obj) = body.as_object_mut()
        {
            obj.insert(
                "temperature".to_owned(),
                serde_json::json!(options.temperature.unwrap_or(self.temperature)),
            );
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {}", self.endpoint))?;

        let status = response.status();
        let raw = response.text().await.context("read OpenAI response body")?;
        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
            anyhow::bail!("OpenAI API error ({status}): {message}");
        }

        let value: serde_json::Value = serde_json::from_str(&raw).context("parse OpenAI response")?;
        extract_message_text(&value).context("extract message text")
    }
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let message = value.get("error")?.get("message")?.as_str()?.to_owned();
    Some(message)
}

fn extract_message_text(value: &serde_json::Value) -> anyhow::Result<String> {
    let text = value
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str())
        .ok_or_else(|| anyhow::anyhow!("missing `choices[0].message.content` in response"))?;

    let text = text.trim();
    if text.is_empty() {
        anyhow::bail!("OpenAI message content is empty");
    }
    Ok(text.to_owned())
}
