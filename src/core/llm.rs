use crate::domain::ports::{ChatClient, ChatMessage};
use crate::utils::error::{AppError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ChatClientSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub temperature: f32,
    pub max_response_tokens: usize,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: usize,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` client with a per-request
/// timeout and a bounded number of retries on transient failures.
pub struct OpenAiChatClient {
    client: Client,
    settings: ChatClientSettings,
}

impl OpenAiChatClient {
    pub fn new(settings: ChatClientSettings) -> Result<Self> {
        let client = Client::builder().timeout(settings.timeout).build()?;
        Ok(Self { client, settings })
    }

    async fn send_once(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        let body = ChatRequest {
            model,
            messages,
            max_tokens: self.settings.max_response_tokens,
            temperature: self.settings.temperature,
        };

        let mut request = self.client.post(&self.settings.endpoint).json(&body);
        if let Some(key) = &self.settings.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        tracing::debug!("Chat API response status: {}", status);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ApiStatusError {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AppError::processing("chat response contained no message content"))
    }
}

#[async_trait::async_trait]
impl ChatClient for OpenAiChatClient {
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.send_once(model, messages).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < self.settings.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "🔁 Transient API failure ({}), retry {}/{}",
                        e,
                        attempt,
                        self.settings.max_retries
                    );
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn settings(endpoint: String, max_retries: u32) -> ChatClientSettings {
        ChatClientSettings {
            endpoint,
            api_key: Some("sk-test".to_string()),
            timeout: Duration::from_secs(5),
            max_retries,
            retry_delay: Duration::from_millis(1),
            temperature: 0.7,
            max_response_tokens: 200,
        }
    }

    #[tokio::test]
    async fn test_complete_returns_first_choice() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("Authorization", "Bearer sk-test")
                .json_body_partial(r#"{"model": "gpt-4", "max_tokens": 200}"#);
            then.status(200).json_body(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "A climate dataset."}}]
            }));
        });

        let client = OpenAiChatClient::new(settings(server.url("/v1/chat/completions"), 0)).unwrap();
        let text = client
            .complete("gpt-4", &[ChatMessage::user("describe")])
            .await
            .unwrap();

        mock.assert();
        assert_eq!(text, "A climate dataset.");
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/chat");
            then.status(401).body("bad key");
        });

        let client = OpenAiChatClient::new(settings(server.url("/chat"), 3)).unwrap();
        let err = client
            .complete("gpt-4", &[ChatMessage::user("describe")])
            .await
            .unwrap_err();

        mock.assert_hits(1);
        assert!(matches!(err, AppError::ApiStatusError { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_server_error_retries_are_bounded() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/chat");
            then.status(503);
        });

        let client = OpenAiChatClient::new(settings(server.url("/chat"), 2)).unwrap();
        let err = client
            .complete("gpt-4", &[ChatMessage::user("describe")])
            .await
            .unwrap_err();

        mock.assert_hits(3);
        assert!(err.is_transient());
    }
}
