use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{AzureChatBackend, BedrockBackend, OracleError};
use crate::config::OracleSettings;

/// Structured-text completion used by the ranking oracle.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn provider(&self) -> &str;

    /// Sends the instruction context and the evidence payload and returns the
    /// model's answer as one complete JSON object.
    async fn complete(&self, context: &str, payload: &str) -> Result<String, OracleError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// Direct model invocation through AWS Bedrock.
    Aws,
    /// Azure OpenAI chat completions.
    Azure,
}

impl FromStr for Provider {
    type Err = OracleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aws" => Ok(Provider::Aws),
            "azure" => Ok(Provider::Azure),
            _ => Err(OracleError::UnknownProvider(s.to_string())),
        }
    }
}

/// Stand-in for a backend that cannot be built. Every call fails with the
/// same error, so the oracle's retry budget still applies.
#[derive(Debug, Clone)]
pub struct UnavailableBackend {
    provider: String,
    missing: Option<&'static str>,
}

impl UnavailableBackend {
    pub fn unknown(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            missing: None,
        }
    }

    pub fn missing_setting(provider: impl Into<String>, setting: &'static str) -> Self {
        Self {
            provider: provider.into(),
            missing: Some(setting),
        }
    }
}

#[async_trait]
impl CompletionBackend for UnavailableBackend {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn complete(&self, _context: &str, _payload: &str) -> Result<String, OracleError> {
        Err(match self.missing {
            None => OracleError::UnknownProvider(self.provider.clone()),
            Some(setting) => OracleError::NotConfigured {
                provider: self.provider.clone(),
                setting,
            },
        })
    }
}

/// Builds the backend named by `AI_PROVIDER`.
pub async fn from_settings(settings: &OracleSettings) -> Arc<dyn CompletionBackend> {
    let built: Result<Arc<dyn CompletionBackend>, OracleError> =
        match settings.ai_provider.parse::<Provider>() {
            Ok(Provider::Aws) => BedrockBackend::from_settings(settings)
                .await
                .map(|b| Arc::new(b) as Arc<dyn CompletionBackend>),
            Ok(Provider::Azure) => {
                AzureChatBackend::from_settings(settings).map(|b| Arc::new(b) as Arc<dyn CompletionBackend>)
            }
            Err(err) => Err(err),
        };

    match built {
        Ok(backend) => {
            info!(provider = backend.provider(), "oracle backend ready");
            backend
        }
        Err(OracleError::NotConfigured { provider, setting }) => {
            warn!(%provider, setting, "oracle backend is missing configuration");
            Arc::new(UnavailableBackend::missing_setting(provider, setting))
        }
        Err(err) => {
            warn!(error = %err, "oracle backend unavailable");
            Arc::new(UnavailableBackend::unknown(settings.ai_provider.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_providers() {
        assert_eq!("aws".parse::<Provider>().ok(), Some(Provider::Aws));
        assert_eq!(" Azure ".parse::<Provider>().ok(), Some(Provider::Azure));
        assert!(matches!(
            "openai".parse::<Provider>(),
            Err(OracleError::UnknownProvider(p)) if p == "openai"
        ));
    }

    #[tokio::test]
    async fn missing_setting_is_reported_on_every_call() {
        let backend = UnavailableBackend::missing_setting("azure", "AZURE_API_KEY");
        for _ in 0..2 {
            let err = backend.complete("ctx", "[]").await.expect_err("unavailable");
            assert!(matches!(
                err,
                OracleError::NotConfigured { setting: "AZURE_API_KEY", .. }
            ));
        }
    }
}
