use async_trait::async_trait;
use aws_sdk_bedrockruntime::config::{Credentials, Region};
use aws_sdk_bedrockruntime::error::DisplayErrorContext;
use aws_sdk_bedrockruntime::primitives::Blob;
use aws_sdk_bedrockruntime::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CompletionBackend, OracleError};
use crate::config::OracleSettings;

const PROVIDER: &str = "aws";

/// Assistant turn the model is asked to continue. It ends inside the opening
/// brace, so the reply is the rest of a JSON object.
const PRIMER: &str = "Here is directly the JSON requested for with no additional text:\n{";

/// Rebuilds the object a primed model was continuing: restores the opening
/// brace and drops anything after the last closing one.
pub fn close_primed_object(continuation: &str) -> Result<String, OracleError> {
    let end = continuation.rfind('}').ok_or_else(|| {
        OracleError::Malformed("primed continuation has no closing brace".to_string())
    })?;
    Ok(format!("{{{}", &continuation[..=end]))
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    anthropic_version: &'a str,
    system: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: Vec<TextBlock<'a>>,
}

#[derive(Debug, Serialize)]
struct TextBlock<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
}

impl<'a> Message<'a> {
    fn text(role: &'static str, text: &'a str) -> Self {
        Self {
            role,
            content: vec![TextBlock { kind: "text", text }],
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

/// Anthropic models invoked directly through Bedrock's InvokeModel API.
pub struct BedrockBackend {
    client: Client,
    model_id: String,
    anthropic_version: String,
    max_tokens: u32,
    temperature: f32,
}

impl BedrockBackend {
    pub async fn from_settings(settings: &OracleSettings) -> Result<Self, OracleError> {
        let aws = &settings.aws;
        let model_id = aws
            .anthropic_model_id
            .clone()
            .ok_or(OracleError::NotConfigured {
                provider: PROVIDER.to_string(),
                setting: "ANTHROPIC_MODEL_ID",
            })?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &aws.aws_region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let (Some(access_key_id), Some(secret_access_key)) =
            (&aws.aws_access_key_id, &aws.aws_secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                "ranking_update_env",
            ));
        }
        let config = loader.load().await;

        Ok(Self {
            client: Client::new(&config),
            model_id,
            anthropic_version: aws.anthropic_version.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        })
    }

    fn request_body(&self, context: &str, payload: &str) -> Result<Vec<u8>, OracleError> {
        let request = MessagesRequest {
            anthropic_version: &self.anthropic_version,
            system: context,
            messages: vec![Message::text("user", payload), Message::text("assistant", PRIMER)],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        Ok(serde_json::to_vec(&request)?)
    }
}

#[async_trait]
impl CompletionBackend for BedrockBackend {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn complete(&self, context: &str, payload: &str) -> Result<String, OracleError> {
        let body = self.request_body(context, payload)?;

        let output = self
            .client
            .invoke_model()
            .model_id(&self.model_id)
            .accept("application/json")
            .content_type("application/json")
            .body(Blob::new(body))
            .send()
            .await
            .map_err(|e| OracleError::Transport(DisplayErrorContext(&e).to_string()))?;

        let response: MessagesResponse = serde_json::from_slice(output.body().as_ref())?;
        let continuation: String = response
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text)
            .collect();

        debug!(chars = continuation.len(), "bedrock continuation received");
        close_primed_object(&continuation)
    }
}
