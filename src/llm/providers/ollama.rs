use crate::config::LlmConfig;
use crate::llm::models::ChatMessage;
use crate::llm::{ChatProvider, CompletionOptions, LlmError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

const DEFAULT_API_URL: &str = "http://localhost:11434/api/chat";

pub struct OllamaProvider {
    client: reqwest::Client,
    api_url: String,
    model: String,
}

#[derive(Serialize, Debug)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize, Debug)]
struct OllamaOptions {
    temperature: f32,
    num_predict: usize,
}

#[derive(Deserialize, Debug)]
struct OllamaResponse {
    message: OllamaMessage,
    #[serde(default)]
    done: Option<bool>,
}

#[derive(Deserialize, Debug)]
struct OllamaMessage {
    content: String,
}

impl OllamaProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_url = config
            .api_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            api_url,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl ChatProvider for OllamaProvider {
    async fn complete(&self, messages: &[ChatMessage], options: &CompletionOptions) -> Result<String, LlmError> {
        info!("Asking Ollama model {} ({} messages)", self.model, messages.len());

        let request = OllamaRequest {
            model: &self.model,
            messages,
            stream: false,
            options: OllamaOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        };

        let response = self
            .client
            .post(&self.api_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Ollama returned {}: {}", status, body);
            return Err(LlmError::ResponseError(format!("Ollama returned {}: {}", status, body)));
        }

        let response_text = response
            .text()
            .await
            .map_err(|e| LlmError::ResponseError(format!("Failed to read response body: {}", e)))?;

        debug!("Ollama replied with {} bytes", response_text.len());

        let ollama_response = serde_json::from_str::<OllamaResponse>(&response_text).map_err(|e| {
            error!("Failed to parse Ollama response: {} - Response was: {}", e, response_text);
            LlmError::ResponseError(format!("Failed to parse Ollama response: {}", e))
        })?;

        if ollama_response.done == Some(false) {
            debug!("Ollama reported an unfinished response");
        }

        let content = ollama_response.message.content;
        if content.trim().is_empty() {
            return Err(LlmError::ResponseError("Ollama returned an empty response".to_string()));
        }

        Ok(content)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::llm::providers::testing::serve;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    fn provider_for(url: String) -> OllamaProvider {
        let mut config = AppConfig::default().llm;
        config.backend = "ollama".to_string();
        config.model = "sqlcoder".to_string();
        config.api_url = Some(url);
        config.timeout_secs = 5;
        OllamaProvider::new(&config).unwrap()
    }

    fn options() -> CompletionOptions {
        CompletionOptions {
            temperature: 0.1,
            max_tokens: 128,
        }
    }

    #[tokio::test]
    async fn sends_non_streaming_chat_request() {
        let router = Router::new().route(
            "/api/chat",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["stream"], json!(false));
                assert_eq!(body["model"], json!("sqlcoder"));
                assert_eq!(body["messages"][0]["role"], json!("user"));
                Json(json!({
                    "model": "sqlcoder",
                    "message": {"role": "assistant", "content": "```sql\nSELECT 2;\n```"},
                    "done": true
                }))
            }),
        );
        let base = serve(router).await;
        let provider = provider_for(format!("{}/api/chat", base));

        let reply = provider
            .complete(&[ChatMessage::user("two?")], &options())
            .await
            .unwrap();
        assert_eq!(reply, "```sql\nSELECT 2;\n```");
    }

    #[tokio::test]
    async fn error_status_becomes_response_error() {
        let router = Router::new().route(
            "/api/chat",
            post(|| async { (StatusCode::NOT_FOUND, "model 'sqlcoder' not found") }),
        );
        let base = serve(router).await;
        let provider = provider_for(format!("{}/api/chat", base));

        let err = provider
            .complete(&[ChatMessage::user("two?")], &options())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::ResponseError(_)));
        assert!(err.to_string().contains("model 'sqlcoder' not found"));
    }
}
