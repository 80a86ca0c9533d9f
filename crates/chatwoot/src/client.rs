use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

use citabot_core::config::ChatwootConfig;
use citabot_core::domain::conversation::ConversationId;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("chat transport failed: {0}")]
    Transport(String),
    #[error("chat API rejected the request with status {status}: {message}")]
    Status { status: u16, message: String },
}

impl ChatError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn send_reply(
        &self,
        conversation_id: ConversationId,
        text: &str,
    ) -> Result<(), ChatError>;
}

/// Outbound replies through the Chatwoot REST API. One bounded-timeout POST
/// per reply with a small transient-retry budget.
pub struct HttpChatClient {
    http: reqwest::Client,
    base_url: String,
    api_token: SecretString,
    account_id: i64,
    max_retries: u32,
}

impl HttpChatClient {
    pub fn from_config(config: &ChatwootConfig) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| ChatError::Transport(error.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            account_id: config.account_id,
            max_retries: 2,
        })
    }
}

#[derive(Serialize)]
struct OutgoingMessage<'a> {
    content: &'a str,
    message_type: &'static str,
    private: bool,
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn send_reply(
        &self,
        conversation_id: ConversationId,
        text: &str,
    ) -> Result<(), ChatError> {
        let url = format!(
            "{}/api/v1/accounts/{}/conversations/{}/messages",
            self.base_url, self.account_id, conversation_id.0
        );
        let body = OutgoingMessage { content: text, message_type: "outgoing", private: false };

        let mut attempt = 0u32;
        loop {
            let error = match self
                .http
                .post(&url)
                .header("api_access_token", self.api_token.expose_secret())
                .json(&body)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    let status = response.status().as_u16();
                    let message = response.text().await.unwrap_or_default();
                    ChatError::Status { status, message }
                }
                Err(error) => ChatError::Transport(error.to_string()),
            };

            if error.is_transient() && attempt < self.max_retries {
                warn!(
                    conversation_id = conversation_id.0,
                    attempt,
                    error = %error,
                    "reply delivery failed; retrying"
                );
                tokio::time::sleep(Duration::from_millis(250 << attempt.min(4))).await;
                attempt += 1;
                continue;
            }

            return Err(error);
        }
    }
}

/// Swallows replies; used when no helpdesk is configured and as a default
/// in tests that only assert on pipeline state.
#[derive(Default)]
pub struct NoopChatClient {
    sent: Mutex<Vec<(ConversationId, String)>>,
}

impl NoopChatClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<(ConversationId, String)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl ChatClient for NoopChatClient {
    async fn send_reply(
        &self,
        conversation_id: ConversationId,
        text: &str,
    ) -> Result<(), ChatError> {
        self.sent.lock().await.push((conversation_id, text.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use citabot_core::domain::conversation::ConversationId;

    use super::{ChatClient, ChatError, NoopChatClient};

    #[test]
    fn transient_classification_mirrors_http_semantics() {
        assert!(ChatError::Transport("timeout".to_string()).is_transient());
        assert!(ChatError::Status { status: 502, message: String::new() }.is_transient());
        assert!(!ChatError::Status { status: 401, message: String::new() }.is_transient());
    }

    #[tokio::test]
    async fn noop_client_records_outbound_replies() {
        let client = NoopChatClient::new();
        client.send_reply(ConversationId(7), "hola").await.expect("send");

        let sent = client.sent().await;
        assert_eq!(sent, vec![(ConversationId(7), "hola".to_string())]);
    }
}
