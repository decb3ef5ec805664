pub mod models;
pub mod parser;
pub mod prompt;
pub mod providers;

use crate::config::LlmConfig;
use crate::llm::models::ChatMessage;
use async_trait::async_trait;
use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum LlmError {
    ConnectionError(String),
    ResponseError(String),
    ConfigError(String),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::ConnectionError(msg) => write!(f, "LLM connection error: {}", msg),
            LlmError::ResponseError(msg) => write!(f, "LLM response error: {}", msg),
            LlmError::ConfigError(msg) => write!(f, "LLM configuration error: {}", msg),
        }
    }
}

impl Error for LlmError {}

/// Sampling settings sent with every completion request.
#[derive(Debug, Clone, Copy)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: usize,
}

impl From<&LlmConfig> for CompletionOptions {
    fn from(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Sends the conversation and returns the assistant's reply text.
    async fn complete(&self, messages: &[ChatMessage], options: &CompletionOptions) -> Result<String, LlmError>;

    fn name(&self) -> &str;
}

pub struct LlmManager {
    provider: Box<dyn ChatProvider + Send + Sync>,
    model: String,
    options: CompletionOptions,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let provider: Box<dyn ChatProvider + Send + Sync> = match config.backend.as_str() {
            "remote" => Box::new(providers::remote::RemoteLlmProvider::new(config)?),
            "ollama" => Box::new(providers::ollama::OllamaProvider::new(config)?),
            _ => {
                return Err(LlmError::ConfigError(format!(
                    "Unsupported LLM backend: {}",
                    config.backend
                )))
            }
        };

        Ok(Self {
            provider,
            model: config.model.clone(),
            options: CompletionOptions::from(config),
        })
    }

    #[cfg(test)]
    pub fn with_provider(provider: Box<dyn ChatProvider + Send + Sync>) -> Self {
        Self {
            provider,
            model: "test-model".to_string(),
            options: CompletionOptions {
                temperature: 0.2,
                max_tokens: 2048,
            },
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn backend(&self) -> &str {
        self.provider.name()
    }

    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        self.provider.complete(messages, &self.options).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Provider returning canned replies in order and recording what it was sent.
    pub(crate) struct ScriptedProvider {
        replies: Mutex<Vec<Result<String, String>>>,
        pub(crate) seen: std::sync::Arc<Mutex<Vec<Vec<ChatMessage>>>>,
    }

    impl ScriptedProvider {
        pub(crate) fn new(replies: Vec<Result<String, String>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                seen: Default::default(),
            }
        }

        pub(crate) fn replying(reply: &str) -> Self {
            Self::new(vec![Ok(reply.to_string())])
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        async fn complete(&self, messages: &[ChatMessage], _options: &CompletionOptions) -> Result<String, LlmError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            let mut replies = self.replies.lock().unwrap();
            // The last reply repeats once the script runs out
            let next = if replies.len() > 1 {
                replies.remove(0)
            } else {
                replies
                    .first()
                    .cloned()
                    .unwrap_or_else(|| Err("no scripted reply".to_string()))
            };
            next.map_err(LlmError::ConnectionError)
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }
}
