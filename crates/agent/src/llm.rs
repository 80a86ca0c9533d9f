use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use citabot_core::config::{LlmConfig, LlmProvider};

use crate::decision::LlmClient;

/// Thin completion client over the configured LLM provider. The prompt in,
/// raw text out; everything semantic lives in [`crate::decision`].
pub struct HttpLlmClient {
    http: reqwest::Client,
    provider: LlmProvider,
    base_url: Option<String>,
    api_key: Option<SecretString>,
    model: String,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("building llm http client")?;

        Ok(Self {
            http,
            provider: config.provider,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    fn base_url(&self, default: &str) -> String {
        self.base_url
            .as_deref()
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_string()
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_ref()
            .map(|key| key.expose_secret())
            .ok_or_else(|| anyhow!("llm api key is not configured"))
    }
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        match self.provider {
            LlmProvider::Ollama => {
                let url = format!("{}/api/generate", self.base_url("http://localhost:11434"));
                let response = self
                    .http
                    .post(&url)
                    .json(&json!({
                        "model": self.model,
                        "prompt": prompt,
                        "stream": false,
                    }))
                    .send()
                    .await
                    .context("ollama request failed")?
                    .error_for_status()
                    .context("ollama returned an error status")?;
                let payload: OllamaResponse =
                    response.json().await.context("decoding ollama response")?;
                Ok(payload.response)
            }
            LlmProvider::OpenAi => {
                let url =
                    format!("{}/v1/chat/completions", self.base_url("https://api.openai.com"));
                let response = self
                    .http
                    .post(&url)
                    .bearer_auth(self.api_key()?)
                    .json(&json!({
                        "model": self.model,
                        "messages": [{"role": "user", "content": prompt}],
                    }))
                    .send()
                    .await
                    .context("openai request failed")?
                    .error_for_status()
                    .context("openai returned an error status")?;
                let payload: OpenAiResponse =
                    response.json().await.context("decoding openai response")?;
                payload
                    .choices
                    .into_iter()
                    .next()
                    .map(|choice| choice.message.content)
                    .ok_or_else(|| anyhow!("openai response had no choices"))
            }
            LlmProvider::Anthropic => {
                let url = format!("{}/v1/messages", self.base_url("https://api.anthropic.com"));
                let response = self
                    .http
                    .post(&url)
                    .header("x-api-key", self.api_key()?)
                    .header("anthropic-version", "2023-06-01")
                    .json(&json!({
                        "model": self.model,
                        "max_tokens": 1024,
                        "messages": [{"role": "user", "content": prompt}],
                    }))
                    .send()
                    .await
                    .context("anthropic request failed")?
                    .error_for_status()
                    .context("anthropic returned an error status")?;
                let payload: AnthropicResponse =
                    response.json().await.context("decoding anthropic response")?;
                Ok(payload
                    .content
                    .into_iter()
                    .map(|block| block.text)
                    .collect::<Vec<_>>()
                    .join(""))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AnthropicResponse, OllamaResponse, OpenAiResponse};

    #[test]
    fn provider_response_shapes_decode() {
        let ollama: OllamaResponse =
            serde_json::from_str(r#"{"response": "{\"command\": \"list_services\"}"}"#)
                .expect("ollama shape");
        assert!(ollama.response.contains("list_services"));

        let openai: OpenAiResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": "{}"}}]}"#,
        )
        .expect("openai shape");
        assert_eq!(openai.choices.len(), 1);

        let anthropic: AnthropicResponse = serde_json::from_str(
            r#"{"content": [{"type": "text", "text": "{\"command\": \"reply\"}"}]}"#,
        )
        .expect("anthropic shape");
        assert_eq!(anthropic.content.len(), 1);
    }
}
