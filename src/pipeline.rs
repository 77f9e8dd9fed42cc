use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use crate::commit::commit_ranking;
use crate::db::{RankingStore, StoreError};
use crate::enrichment::enrich_windows;
use crate::event_log::{
    record_event, EventLogError, EventSink, LogEvent, LogLevel, ProfileViewSource,
    RANKING_UPDATE_URL,
};
use crate::models::{ActiveDriver, EnrichedWindow, NewSnapshot};
use crate::oracle::{render_system_prompt, OracleClient, OracleOutcome};
use crate::windows::reconstruct;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to load ranking data: {0}")]
    Fetch(#[source] StoreError),

    #[error("failed to load profile views: {0}")]
    EventLog(#[from] EventLogError),

    #[error("failed to encode oracle request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("oracle call failed after {attempts} attempts: {last_error}")]
    OracleExhausted { attempts: u32, last_error: String },

    #[error("failed to commit ranking: {0}")]
    Commit(#[source] StoreError),
}

/// Everything a successful run produced, kept for the audit record.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub snapshot: NewSnapshot,
    pub evidence: Vec<EnrichedWindow>,
    pub active_drivers: Vec<ActiveDriver>,
}

/// Reconstructs the ranking windows as of `now` and attaches profile views.
pub async fn collect_evidence(
    store: &dyn RankingStore,
    views: &dyn ProfileViewSource,
    now: DateTime<Utc>,
) -> Result<Vec<EnrichedWindow>, PipelineError> {
    let windows = reconstruct(store, now).await.map_err(PipelineError::Fetch)?;
    Ok(enrich_windows(views, windows).await?)
}

pub struct RankingPipeline {
    store: Arc<dyn RankingStore>,
    views: Arc<dyn ProfileViewSource>,
    sink: Arc<dyn EventSink>,
    oracle: OracleClient,
    prompt_template: String,
}

impl RankingPipeline {
    pub fn new(
        store: Arc<dyn RankingStore>,
        views: Arc<dyn ProfileViewSource>,
        sink: Arc<dyn EventSink>,
        oracle: OracleClient,
        prompt_template: String,
    ) -> Self {
        Self {
            store,
            views,
            sink,
            oracle,
            prompt_template,
        }
    }

    /// Runs one ranking update and records its start and outcome.
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let run_id = Uuid::new_v4();
        info!(%run_id, provider = self.oracle.provider(), "ranking update started");
        record_event(
            self.sink.as_ref(),
            LogEvent::new(LogLevel::Info, "API called", RANKING_UPDATE_URL)
                .with("run_id", run_id.to_string()),
        )
        .await;

        match self.execute(run_id).await {
            Ok(report) => {
                info!(
                    %run_id,
                    drivers = report.snapshot.entries.len(),
                    enforced_at = %report.snapshot.enforced_at,
                    "ranking update finished"
                );
                let event = LogEvent::new(LogLevel::Info, "Successful response", RANKING_UPDATE_URL)
                    .with("run_id", run_id.to_string())
                    .with("new_rankings", to_audit_value(&report.snapshot))
                    .with("rank_effects", to_audit_value(&report.evidence))
                    .with("active_drivers", to_audit_value(&report.active_drivers));
                record_event(self.sink.as_ref(), event).await;
                Ok(report)
            }
            Err(err) => {
                error!(%run_id, error = %err, "ranking update failed");
                let event =
                    LogEvent::new(LogLevel::Error, "Error in updateDriverRanking", RANKING_UPDATE_URL)
                        .with("run_id", run_id.to_string())
                        .with("error", err.to_string())
                        .with("detail", format!("{err:?}"));
                record_event(self.sink.as_ref(), event).await;
                Err(err)
            }
        }
    }

    async fn execute(&self, run_id: Uuid) -> Result<RunReport, PipelineError> {
        let now = Utc::now();
        let evidence = collect_evidence(self.store.as_ref(), self.views.as_ref(), now).await?;
        let active_drivers = self
            .store
            .active_drivers()
            .await
            .map_err(PipelineError::Fetch)?;

        let system_context = render_system_prompt(&self.prompt_template, &active_drivers)?;
        let request = serde_json::to_string(&evidence)?;

        let proposal = match self
            .oracle
            .propose_ranking(&system_context, &request, &active_drivers)
            .await
        {
            OracleOutcome::Accepted(proposal) => proposal,
            OracleOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                return Err(PipelineError::OracleExhausted {
                    attempts,
                    last_error,
                })
            }
        };

        let snapshot = commit_ranking(self.store.as_ref(), proposal)
            .await
            .map_err(PipelineError::Commit)?;

        Ok(RunReport {
            run_id,
            snapshot,
            evidence,
            active_drivers,
        })
    }
}

fn to_audit_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_default()
}
