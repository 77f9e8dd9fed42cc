//! Ranking oracle: asks an LLM backend for a new ranking and accepts only a
//! response that ranks every active driver exactly once.
//!
//! Backends ([`CompletionBackend`]) differ only in how they reach the model
//! and how they coax a bare JSON object out of it. Every attempt goes through
//! the same validator, and any failure, whether transport or validation,
//! spends one unit of the shared retry budget.

mod azure;
mod backend;
mod bedrock;
mod validate;

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

pub use azure::AzureChatBackend;
pub use backend::{from_settings, CompletionBackend};
pub use bedrock::BedrockBackend;
use validate::validate_proposal;

#[cfg(test)]
use backend::UnavailableBackend;

use crate::event_log::{record_event, EventSink, LogEvent, LogLevel, RANKING_UPDATE_URL};
use crate::models::{ActiveDriver, NewRankingProposal};

pub const DEFAULT_ATTEMPTS: u32 = 3;
const DRIVER_PLACEHOLDER: &str = "{active_driver_ids}";

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("invalid provider {0:?} - must be \"aws\" or \"azure\"")]
    UnknownProvider(String),

    #[error("{provider} backend is not configured: {setting} is missing")]
    NotConfigured {
        provider: String,
        setting: &'static str,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("response is not a JSON object")]
    NotAnObject,

    #[error("missing ranking_results key")]
    MissingRankingResults,

    #[error("additional fields present in response: {0:?}")]
    UnexpectedTopLevelKeys(Vec<String>),

    #[error("ranking_results is not an array")]
    NotAnArray,

    #[error("missing required field {field} in ranking_results[{index}]")]
    MissingField { index: usize, field: &'static str },

    #[error("additional fields present in ranking_results[{index}]")]
    UnexpectedFields { index: usize },

    #[error("invalid driver_id: {0}")]
    InvalidDriverId(Value),

    #[error("invalid rank: {0}")]
    InvalidRank(Value),

    #[error("duplicate rank: {0}")]
    DuplicateRank(i32),

    #[error("duplicate driver_id: {0}")]
    DuplicateDriver(i32),

    #[error("driver {0} is not an active driver")]
    InactiveDriver(i32),

    #[error("ranked {ranked} of {active} active drivers")]
    UnrankedDrivers { ranked: usize, active: usize },
}

/// Result of a ranking call. Exhaustion is an expected outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum OracleOutcome {
    Accepted(NewRankingProposal),
    Exhausted { attempts: u32, last_error: String },
}

impl OracleOutcome {
    pub fn ai_call_successful(&self) -> bool {
        matches!(self, OracleOutcome::Accepted(_))
    }
}

/// Substitutes the JSON-encoded active drivers into the instruction template.
pub fn render_system_prompt(
    template: &str,
    active_drivers: &[ActiveDriver],
) -> Result<String, serde_json::Error> {
    let drivers = serde_json::to_string(active_drivers)?;
    Ok(template.replace(DRIVER_PLACEHOLDER, &drivers))
}

pub struct OracleClient {
    backend: Arc<dyn CompletionBackend>,
    sink: Arc<dyn EventSink>,
    attempts: u32,
}

impl OracleClient {
    pub fn new(backend: Arc<dyn CompletionBackend>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            backend,
            sink,
            attempts: DEFAULT_ATTEMPTS,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn provider(&self) -> &str {
        self.backend.provider()
    }

    async fn attempt(
        &self,
        system_context: &str,
        evidence: &str,
        active_drivers: &[ActiveDriver],
    ) -> Result<NewRankingProposal, OracleError> {
        let raw = self.backend.complete(system_context, evidence).await?;
        validate_proposal(&raw, active_drivers)
    }

    pub async fn propose_ranking(
        &self,
        system_context: &str,
        evidence: &str,
        active_drivers: &[ActiveDriver],
    ) -> OracleOutcome {
        let mut retries = self.attempts;
        let mut last_error = String::from("no attempt was made");

        while retries > 0 {
            match self.attempt(system_context, evidence, active_drivers).await {
                Ok(proposal) => {
                    info!(
                        provider = self.provider(),
                        drivers = proposal.entries.len(),
                        "oracle proposal accepted"
                    );
                    return OracleOutcome::Accepted(proposal);
                }
                Err(err) => {
                    retries -= 1;
                    warn!(
                        provider = self.provider(),
                        retries_left = retries,
                        error = %err,
                        "oracle attempt failed"
                    );
                    let event =
                        LogEvent::new(LogLevel::Error, "Error in oracle call", RANKING_UPDATE_URL)
                            .with("provider", self.provider())
                            .with("error", err.to_string())
                            .with("retries_left", retries);
                    record_event(self.sink.as_ref(), event).await;
                    last_error = err.to_string();
                }
            }
        }

        OracleOutcome::Exhausted {
            attempts: self.attempts,
            last_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{active_drivers, RecordingSink, ScriptedBackend};
    use serde_json::json;

    fn valid_response() -> String {
        json!({
            "ranking_results": [
                {"driver_id": 1, "rank": 2, "tag": ""},
                {"driver_id": 2, "rank": 1, "tag": "Top rated"}
            ]
        })
        .to_string()
    }

    fn client(backend: ScriptedBackend, sink: Arc<RecordingSink>) -> (OracleClient, Arc<ScriptedBackend>) {
        let backend = Arc::new(backend);
        (OracleClient::new(backend.clone(), sink), backend)
    }

    #[test]
    fn prompt_embeds_active_drivers_as_json() {
        let drivers = active_drivers(&[4]);
        let prompt = render_system_prompt("Rank these: {active_driver_ids}", &drivers).expect("render");

        assert!(prompt.starts_with("Rank these: [{\"id\":4,"));
        assert!(!prompt.contains(DRIVER_PLACEHOLDER));
    }

    #[tokio::test]
    async fn accepts_first_valid_response() {
        let sink = Arc::new(RecordingSink::default());
        let (oracle, backend) = client(ScriptedBackend::new(vec![Ok(valid_response())]), sink.clone());

        let outcome = oracle
            .propose_ranking("rank", "[]", &active_drivers(&[1, 2]))
            .await;

        assert!(outcome.ai_call_successful());
        assert_eq!(backend.calls(), 1);
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn retries_after_invalid_response() {
        let sink = Arc::new(RecordingSink::default());
        let duplicate = json!({
            "ranking_results": [
                {"driver_id": 1, "rank": 1, "tag": ""},
                {"driver_id": 2, "rank": 1, "tag": ""}
            ]
        })
        .to_string();
        let (oracle, backend) = client(
            ScriptedBackend::new(vec![
                Err(OracleError::Transport("connection reset".to_string())),
                Ok(duplicate),
                Ok(valid_response()),
            ]),
            sink.clone(),
        );

        let outcome = oracle
            .propose_ranking("rank", "[]", &active_drivers(&[1, 2]))
            .await;

        assert!(outcome.ai_call_successful());
        assert_eq!(backend.calls(), 3);
        let retries: Vec<Value> = sink
            .events()
            .iter()
            .map(|e| e.context["retries_left"].clone())
            .collect();
        assert_eq!(retries, vec![json!(2), json!(1)]);
    }

    #[tokio::test]
    async fn exhaustion_returns_failure_without_raising() {
        let sink = Arc::new(RecordingSink::default());
        let (oracle, backend) = client(
            ScriptedBackend::new(vec![
                Ok("{}".to_string()),
                Ok("not json".to_string()),
                Ok(json!({"ranking_results": []}).to_string()),
                Ok(valid_response()),
            ]),
            sink.clone(),
        );

        let outcome = oracle
            .propose_ranking("rank", "[]", &active_drivers(&[1, 2]))
            .await;

        assert!(!outcome.ai_call_successful());
        assert!(matches!(
            outcome,
            OracleOutcome::Exhausted { attempts: 3, ref last_error } if last_error.contains("ranked 0 of 2")
        ));
        assert_eq!(backend.calls(), 3);
        assert_eq!(sink.events().len(), 3);
    }

    #[tokio::test]
    async fn unknown_provider_spends_the_retry_budget() {
        let sink = Arc::new(RecordingSink::default());
        let oracle = OracleClient::new(Arc::new(UnavailableBackend::unknown("gcp")), sink.clone())
            .with_attempts(2);

        let outcome = oracle
            .propose_ranking("rank", "[]", &active_drivers(&[1]))
            .await;

        assert!(!outcome.ai_call_successful());
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].context["retries_left"], json!(0));
        assert!(events[0].context["error"]
            .as_str()
            .is_some_and(|e| e.contains("invalid provider")));
    }
}
