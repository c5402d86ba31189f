use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::env_or;

/// The text-generation capability every workflow node talks to.
///
/// One fully formed prompt in, plain text out. Any JSON extraction from the
/// reply is the caller's job.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Fails when the capability cannot serve requests at all.
    fn ensure_available(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// OpenAI-compatible chat completions client.
pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

impl LlmClient {
    pub fn from_env() -> Result<Self> {
        let base_url = dotenv::var("LLM_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:1234/v1".to_string());
        let model =
            dotenv::var("LLM_MODEL").unwrap_or_else(|_| "qwen/qwen3-8b".to_string());
        let api_key = dotenv::var("LLM_API_KEY").ok().filter(|k| !k.is_empty());
        let timeout_secs: u64 = env_or("LLM_TIMEOUT_SECS", 120);

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            model,
            api_key,
            temperature: env_or("LLM_TEMPERATURE", 0.3),
            max_tokens: env_or("LLM_MAX_TOKENS", 4096),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Resolve the chat completions endpoint from the base URL.
    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    /// Non-streaming chat completion.
    pub async fn chat(&self, messages: &[Message]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.send().await.context("LLM request failed")?;
        let status = resp.status();
        let text = resp.text().await.context("Failed to read LLM response")?;
        if !status.is_success() {
            bail!("LLM endpoint returned status {}: {}", status, truncate(&text, 500));
        }
        let json: serde_json::Value =
            serde_json::from_str(&text).context("Failed to parse LLM JSON")?;

        // choices[0].message.content may be null
        let content = json["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str())
            .unwrap_or("")
            .to_string();

        debug!(model = %self.model, response_len = content.len(), "LLM completion");
        Ok(content)
    }
}

#[async_trait]
impl Completer for LlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let messages = [Message {
            role: "user".to_string(),
            content: prompt.to_string(),
        }];
        self.chat(&messages).await
    }

    fn ensure_available(&self) -> Result<()> {
        if self.base_url.trim().is_empty() || self.model.trim().is_empty() {
            bail!("LLM client is not configured (LLM_BASE_URL / LLM_MODEL)");
        }
        Ok(())
    }
}

/// Char-safe prefix of `s`, at most `max` characters.
pub fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> LlmClient {
        LlmClient {
            client: reqwest::Client::new(),
            base_url: base_url.to_string(),
            model: "test-model".to_string(),
            api_key: None,
            temperature: 0.3,
            max_tokens: 128,
        }
    }

    #[test]
    fn test_endpoint_normalisation() {
        assert_eq!(
            client("http://localhost:1234/v1").endpoint(),
            "http://localhost:1234/v1/chat/completions"
        );
        assert_eq!(
            client("http://localhost:1234/v1/").endpoint(),
            "http://localhost:1234/v1/chat/completions"
        );
        assert_eq!(
            client("https://api.example.com").endpoint(),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            client("https://api.example.com/v1/chat/completions").endpoint(),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_ensure_available_rejects_blank_model() {
        let mut c = client("http://localhost:1234/v1");
        assert!(c.ensure_available().is_ok());
        c.model = "  ".to_string();
        assert!(c.ensure_available().is_err());
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
        assert_eq!(truncate("", 3), "");
    }
}
