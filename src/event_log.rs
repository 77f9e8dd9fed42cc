use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickhouse::Row;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::models::{DriverId, ProfileViewStats, RankingWindow};
use crate::resources::Resources;

/// Log message other services write when a customer opens a driver profile.
pub const PROFILE_VIEW_MESSAGE: &str = "API called";
pub const PROFILE_VIEW_URL: &str = "/getAllContactsOf";
/// Url stamped on every event this job records.
pub const RANKING_UPDATE_URL: &str = "/updateDriverRanking";

const LOG_SOURCE: &str = "ranking-update-job";
const SCHEMA_VERSION: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("ClickHouse error: {0}")]
    ClickHouse(#[from] clickhouse::error::Error),

    #[error("failed to encode event context: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Error,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Error => "error",
        }
    }
}

/// Structured audit record appended to the event log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub level: LogLevel,
    pub admin_log: bool,
    pub message: String,
    pub url: String,
    pub context: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl LogEvent {
    pub fn new(level: LogLevel, message: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            level,
            admin_log: true,
            message: message.into(),
            url: url.into(),
            context: Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, event: LogEvent) -> Result<(), EventLogError>;
}

/// Appends an event, logging and discarding any sink failure.
pub async fn record_event(sink: &dyn EventSink, event: LogEvent) {
    let message = event.message.clone();
    if let Err(err) = sink.record(event).await {
        warn!(error = %err, message = %message, "failed to record event");
    }
}

#[async_trait]
pub trait ProfileViewSource: Send + Sync {
    /// Profile-view totals inside `window` for the given drivers. Drivers
    /// without views are absent from the result.
    async fn profile_views(
        &self,
        window: &RankingWindow,
        driver_ids: &[DriverId],
    ) -> Result<Vec<ProfileViewStats>, EventLogError>;
}

#[derive(Debug, Row, Serialize)]
struct LogRow {
    timestamp: i64,
    level: String,
    admin_log: bool,
    message: String,
    url: String,
    user_id: Option<i64>,
    driver_id: Option<i32>,
    source: String,
    schema_version: u8,
    context: String,
}

#[derive(Debug, Row, Deserialize)]
struct ProfileViewRow {
    driver_id: i32,
    profile_views: u64,
    distinct_profile_views: u64,
}

/// ClickHouse `logs` table: source of profile views and sink for audit events.
pub struct ClickHouseEventLog {
    resources: Arc<Resources>,
    table: String,
}

impl ClickHouseEventLog {
    pub fn new(resources: Arc<Resources>) -> Self {
        Self {
            resources,
            table: "logs".to_string(),
        }
    }

    pub async fn init_table(&self) -> Result<(), EventLogError> {
        self.resources
            .clickhouse()
            .query(include_str!("../clickhouse/logs.sql"))
            .execute()
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EventSink for ClickHouseEventLog {
    async fn record(&self, event: LogEvent) -> Result<(), EventLogError> {
        let row = LogRow {
            timestamp: event.timestamp.timestamp_millis(),
            level: event.level.as_str().to_string(),
            admin_log: event.admin_log,
            message: event.message,
            url: event.url,
            user_id: None,
            driver_id: None,
            source: LOG_SOURCE.to_string(),
            schema_version: SCHEMA_VERSION,
            context: serde_json::to_string(&event.context)?,
        };

        let mut insert = self.resources.clickhouse().insert(&self.table)?;
        insert.write(&row).await?;
        insert.end().await?;
        Ok(())
    }
}

/// Window bounds are bound as epoch milliseconds, cast to `Int64` for
/// `fromUnixTimestamp64Milli`.
fn profile_view_query(table: &str) -> String {
    format!(
        r#"
        SELECT
            assumeNotNull(driver_id) AS driver_id,
            count() AS profile_views,
            uniqExact(user_id) AS distinct_profile_views
        FROM {}
        WHERE message = ?
          AND url = ?
          AND timestamp > fromUnixTimestamp64Milli(toInt64(?))
          AND timestamp <= fromUnixTimestamp64Milli(toInt64(?))
          AND has(?, driver_id)
        GROUP BY driver_id
        "#,
        table
    )
}

#[async_trait]
impl ProfileViewSource for ClickHouseEventLog {
    async fn profile_views(
        &self,
        window: &RankingWindow,
        driver_ids: &[DriverId],
    ) -> Result<Vec<ProfileViewStats>, EventLogError> {
        if driver_ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = profile_view_query(&self.table);

        let rows: Vec<ProfileViewRow> = self
            .resources
            .clickhouse()
            .query(&query)
            .bind(PROFILE_VIEW_MESSAGE)
            .bind(PROFILE_VIEW_URL)
            .bind(window.start_time.timestamp_millis())
            .bind(window.end_time.timestamp_millis())
            .bind(driver_ids)
            .fetch_all()
            .await
            .map_err(|e| {
                error!(error = %e, "failed to fetch profile views");
                EventLogError::from(e)
            })?;

        debug!(
            start = %window.start_time,
            drivers = driver_ids.len(),
            matched = rows.len(),
            "fetched profile views"
        );

        Ok(rows
            .into_iter()
            .map(|row| ProfileViewStats {
                driver_id: row.driver_id,
                profile_views: row.profile_views,
                distinct_profile_views: row.distinct_profile_views,
            })
            .collect())
    }
}
