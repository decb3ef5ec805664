use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    pub backend: String, // "remote" or "ollama"
    pub model: String,
    pub api_url: Option<String>,
    /// Keys are rotated round-robin by the remote provider
    #[serde(default)]
    pub api_keys: Vec<String>,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatConfig {
    /// Conversation turns replayed to the model with each question
    pub max_history_length: usize,
    /// Sample rows read per table when building the schema snapshot
    pub max_sample_rows: usize,
    pub max_result_rows: usize,
    pub max_cell_chars: usize,
    pub allow_writes: bool,
    pub session_ttl_minutes: u64,
    pub max_upload_mb: usize,
    pub pool_size: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub web: WebConfig,
    pub llm: LlmConfig,
    pub chat: ChatConfig,
    pub data_dir: String,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory for uploaded databases
    #[arg(long)]
    pub data_dir: Option<String>,
}

/// Environment variables consulted when no keys are configured explicitly.
const API_KEY_ENV_VARS: [&str; 5] = [
    "OPENROUTER_API_KEY",
    "OPENROUTER_API_KEY_1",
    "OPENROUTER_API_KEY_2",
    "OPENROUTER_API_KEY_3",
    "OPENROUTER_API_KEY_4",
];

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        // Start with default configuration
        let mut config_builder =
            Config::builder().add_source(Config::try_from(&AppConfig::default())?);

        // Add configuration from file if specified
        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            // Check for config in default locations
            let default_locations = vec![
                "config.toml",
                "config/config.toml",
                "/etc/sqlite-chat/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        config_builder = config_builder.add_source(env_source());

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        // Override with command line args if provided
        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }
        if let Some(data_dir) = &args.data_dir {
            config.data_dir = data_dir.clone();
        }

        if config.llm.api_keys.is_empty() {
            config.llm.api_keys = keys_from_env(|name| std::env::var(name).ok());
        }
        config.llm.api_keys.retain(|key| !key.trim().is_empty());

        Ok(config)
    }

    pub fn upload_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("uploads")
    }
}

/// `SQLITE_CHAT__LLM__MODEL=...` style overrides. `SQLITE_CHAT__LLM__API_KEYS`
/// takes a comma-separated list.
fn env_source() -> Environment {
    Environment::with_prefix("SQLITE_CHAT")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("llm.api_keys")
}

fn keys_from_env<F>(lookup: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    API_KEY_ENV_VARS
        .iter()
        .filter_map(|name| lookup(name))
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .collect()
}

// Default implementation
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            web: WebConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            llm: LlmConfig {
                backend: "remote".to_string(),
                model: "google/gemini-2.5-pro-exp-03-25:free".to_string(),
                api_url: None,
                api_keys: Vec::new(),
                temperature: 0.2,
                max_tokens: 2048,
                timeout_secs: 300,
            },
            chat: ChatConfig {
                max_history_length: 10,
                max_sample_rows: 5,
                max_result_rows: 100,
                max_cell_chars: 100,
                allow_writes: true,
                session_ttl_minutes: 60,
                max_upload_mb: 200,
                pool_size: 4,
            },
            data_dir: "data".to_string(),
        }
    }
}
