use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{CompletionBackend, OracleError};
use crate::config::OracleSettings;

const PROVIDER: &str = "azure";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Azure OpenAI chat completions in JSON-object mode.
pub struct AzureChatBackend {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model_id: String,
    api_version: String,
    max_tokens: u32,
    temperature: f32,
}

impl AzureChatBackend {
    pub fn from_settings(settings: &OracleSettings) -> Result<Self, OracleError> {
        let azure = &settings.azure;
        let missing = |setting: &'static str| OracleError::NotConfigured {
            provider: PROVIDER.to_string(),
            setting,
        };

        Ok(Self {
            client: reqwest::Client::new(),
            api_key: azure.azure_api_key.clone().ok_or_else(|| missing("AZURE_API_KEY"))?,
            endpoint: azure.azure_endpoint.clone().ok_or_else(|| missing("AZURE_ENDPOINT"))?,
            model_id: azure.azure_model_id.clone().ok_or_else(|| missing("AZURE_MODEL_ID"))?,
            api_version: azure.azure_api_version.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions",
            self.endpoint.trim_end_matches('/'),
            self.model_id
        )
    }

    fn request<'a>(&self, context: &'a str, payload: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: context,
                },
                ChatMessage {
                    role: "user",
                    content: payload,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: ResponseFormat { kind: "json_object" },
        }
    }
}

#[async_trait]
impl CompletionBackend for AzureChatBackend {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn complete(&self, context: &str, payload: &str) -> Result<String, OracleError> {
        let response = self
            .client
            .post(self.completions_url())
            .query(&[("api-version", self.api_version.as_str())])
            .header("api-key", &self.api_key)
            .json(&self.request(context, payload))
            .send()
            .await
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);
            return Err(OracleError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| OracleError::Malformed(e.to_string()))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| OracleError::Malformed("completion has no message content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(endpoint: &str) -> AzureChatBackend {
        AzureChatBackend {
            client: reqwest::Client::new(),
            api_key: "key".to_string(),
            endpoint: endpoint.to_string(),
            model_id: "gpt-4o".to_string(),
            api_version: "2024-06-01".to_string(),
            max_tokens: 3000,
            temperature: 0.6,
        }
    }

    #[test]
    fn url_targets_the_deployment() {
        assert_eq!(
            backend("https://example.openai.azure.com/").completions_url(),
            "https://example.openai.azure.com/openai/deployments/gpt-4o/chat/completions"
        );
    }

    #[test]
    fn request_asks_for_a_json_object() {
        let backend = backend("https://example.openai.azure.com");
        let json = serde_json::to_value(backend.request("rank drivers", "[]")).expect("serialize");

        assert_eq!(json["response_format"]["type"], "json_object");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "[]");
        assert_eq!(json["max_tokens"], 3000);
    }
}
