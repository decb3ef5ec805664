use crate::config::LlmConfig;
use crate::llm::models::ChatMessage;
use crate::llm::{ChatProvider, CompletionOptions, LlmError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const APP_TITLE: &str = "SQLite Chat";
/// Pause before moving to the next key after a transport failure.
const KEY_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// OpenAI-compatible chat-completions client (OpenRouter by default).
pub struct RemoteLlmProvider {
    client: reqwest::Client,
    api_url: String,
    keys: KeyRing,
    model: String,
}

/// API keys handed out round-robin across requests.
struct KeyRing {
    keys: Vec<String>,
    next: AtomicUsize,
}

impl KeyRing {
    fn new(keys: Vec<String>) -> Self {
        Self {
            keys,
            next: AtomicUsize::new(0),
        }
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    /// Slot a new request starts from; each request advances the ring once.
    fn start(&self) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % self.keys.len()
    }

    /// Slot and key for the given attempt of a request that began at `start`.
    fn key(&self, start: usize, attempt: usize) -> (usize, &str) {
        let slot = (start + attempt) % self.keys.len();
        (slot, &self.keys[slot])
    }
}

#[derive(Serialize)]
struct PromptRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: usize,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct PromptResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl RemoteLlmProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_url = config
            .api_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        if config.api_keys.is_empty() {
            return Err(LlmError::ConfigError(
                "At least one API key is required for the remote LLM provider".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            api_url,
            keys: KeyRing::new(config.api_keys.clone()),
            model: config.model.clone(),
        })
    }

    async fn send(&self, api_key: &str, request: &PromptRequest<'_>) -> Result<String, LlmError> {
        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("X-Title", APP_TITLE)
            .json(request)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::ResponseError(format!(
                "API responded with status code: {} - {}",
                status, body
            )));
        }

        let prompt_response: PromptResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ResponseError(e.to_string()))?;

        prompt_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| LlmError::ResponseError("No content in response choices".to_string()))
    }
}

#[async_trait]
impl ChatProvider for RemoteLlmProvider {
    async fn complete(&self, messages: &[ChatMessage], options: &CompletionOptions) -> Result<String, LlmError> {
        let request = PromptRequest {
            model: &self.model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            response_format: ResponseFormat { kind: "text" },
        };

        let mut errors = Vec::new();
        let attempts = self.keys.len();
        let start = self.keys.start();

        // Every key gets one try per request
        for attempt in 0..attempts {
            let (slot, api_key) = self.keys.key(start, attempt);
            info!("Sending request to {} with API key #{}", self.model, slot + 1);

            match self.send(api_key, &request).await {
                Ok(content) => {
                    debug!("Response content length: {}", content.len());
                    return Ok(content);
                }
                Err(e) => {
                    warn!("API key #{} failed: {}", slot + 1, e);
                    let transport = matches!(e, LlmError::ConnectionError(_));
                    errors.push(format!("key #{}: {}", slot + 1, e));
                    if transport && attempt + 1 < attempts {
                        tokio::time::sleep(KEY_RETRY_PAUSE).await;
                    }
                }
            }
        }

        Err(LlmError::ResponseError(format!(
            "All API keys failed: {}",
            errors.join("; ")
        )))
    }

    fn name(&self) -> &str {
        "remote"
    }
}
