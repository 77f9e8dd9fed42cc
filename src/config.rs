use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

const DEFAULT_PROMPT: &str = include_str!("../prompts/ranking_update.md");

/// Connection settings for the relational store and the event log.
#[derive(Debug, Clone, Args)]
pub struct StoreSettings {
    #[arg(long, env = "POSTGRES_URL", hide_env_values = true)]
    pub postgres_url: String,
    #[arg(long, env = "POSTGRES_MAX_CONNECTIONS", default_value_t = 5)]
    pub postgres_max_connections: u32,
    #[arg(long, env = "CLICKHOUSE_URL", default_value = "http://localhost:8123")]
    pub clickhouse_url: String,
    #[arg(long, env = "CLICKHOUSE_DATABASE", default_value = "tiga_logs")]
    pub clickhouse_database: String,
    #[arg(long, env = "CLICKHOUSE_USER", default_value = "default")]
    pub clickhouse_user: String,
    #[arg(
        long,
        env = "CLICKHOUSE_PASSWORD",
        default_value = "",
        hide_env_values = true
    )]
    pub clickhouse_password: String,
}

#[derive(Debug, Clone, Args)]
pub struct OracleSettings {
    /// Backend used for the ranking call: "aws" or "azure"
    #[arg(long, env = "AI_PROVIDER", default_value = "aws")]
    pub ai_provider: String,
    #[arg(long, env = "AI_TEMPERATURE", default_value_t = 0.6)]
    pub temperature: f32,
    #[arg(long, env = "AI_MAX_TOKENS", default_value_t = 3000)]
    pub max_tokens: u32,
    /// Override the built-in ranking instructions
    #[arg(long, env = "RANKING_PROMPT_FILE")]
    pub prompt_file: Option<PathBuf>,
    #[command(flatten)]
    pub aws: AwsSettings,
    #[command(flatten)]
    pub azure: AzureSettings,
}

impl OracleSettings {
    pub fn prompt_template(&self) -> anyhow::Result<String> {
        match &self.prompt_file {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read prompt file {}", path.display())),
            None => Ok(DEFAULT_PROMPT.to_string()),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct AwsSettings {
    #[arg(long, env = "AWS_REGION_NAME")]
    pub aws_region: Option<String>,
    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub aws_access_key_id: Option<String>,
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub aws_secret_access_key: Option<String>,
    #[arg(long, env = "ANTHROPIC_VERSION", default_value = "bedrock-2023-05-31")]
    pub anthropic_version: String,
    #[arg(long, env = "ANTHROPIC_MODEL_ID")]
    pub anthropic_model_id: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct AzureSettings {
    #[arg(long, env = "AZURE_API_KEY", hide_env_values = true)]
    pub azure_api_key: Option<String>,
    #[arg(long, env = "AZURE_ENDPOINT")]
    pub azure_endpoint: Option<String>,
    #[arg(long, env = "AZURE_MODEL_ID")]
    pub azure_model_id: Option<String>,
    #[arg(long, env = "AZURE_API_VERSION", default_value = "2024-06-01")]
    pub azure_api_version: String,
}
