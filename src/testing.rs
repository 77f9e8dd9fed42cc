//! In-memory stand-ins for the stores, the event log and the oracle backend.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::{ensure_complete, RankingStore, StoreError};
use crate::event_log::{EventLogError, EventSink, LogEvent, ProfileViewSource};
use crate::models::{
    ActiveDriver, DriverId, NewSnapshot, ProfileViewStats, RankingRow, RankingWindow, Review,
};
use crate::oracle::{CompletionBackend, OracleError};

/// A fixed instant `minutes` after an arbitrary epoch.
pub fn at(minutes: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + minutes * 60, 0).expect("valid timestamp")
}

pub fn ranking_row(enforced_at: DateTime<Utc>, driver_id: DriverId, rank: i32) -> RankingRow {
    RankingRow {
        enforced_at,
        driver_id,
        rank,
        tag: String::new(),
        active: true,
    }
}

pub fn review(driver_id: DriverId, stars: i32, last_updated_at: DateTime<Utc>) -> Review {
    Review {
        driver_id,
        stars,
        comment: Some(format!("{stars} stars")),
        last_updated_at,
    }
}

pub fn driver(id: DriverId) -> ActiveDriver {
    ActiveDriver {
        id,
        last_updated_at: at(0),
    }
}

pub fn active_drivers(ids: &[DriverId]) -> Vec<ActiveDriver> {
    ids.iter().copied().map(driver).collect()
}

#[derive(Default)]
pub struct MemoryStore {
    history: Mutex<Vec<RankingRow>>,
    drivers: Vec<ActiveDriver>,
    reviews: Vec<Review>,
    fail_reads: bool,
    fail_writes: bool,
    interrupt_after: Option<usize>,
}

impl MemoryStore {
    pub fn with_history(mut self, rows: Vec<RankingRow>) -> Self {
        self.history = Mutex::new(rows);
        self
    }

    pub fn with_drivers(mut self, drivers: Vec<ActiveDriver>) -> Self {
        self.drivers = drivers;
        self
    }

    pub fn with_reviews(mut self, reviews: Vec<Review>) -> Self {
        self.reviews = reviews;
        self
    }

    pub fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// Stages only the first `rows` entries of a snapshot, like a statement
    /// cut off mid-batch, and discards them when the write is rejected.
    pub fn interrupting_writes_after(mut self, rows: usize) -> Self {
        self.interrupt_after = Some(rows);
        self
    }

    pub fn history(&self) -> Vec<RankingRow> {
        self.history.lock().expect("history lock").clone()
    }

    fn check_read(&self) -> Result<(), StoreError> {
        if self.fail_reads {
            return Err(StoreError::Postgres(sqlx::Error::PoolClosed));
        }
        Ok(())
    }
}

#[async_trait]
impl RankingStore for MemoryStore {
    async fn ranking_history(&self) -> Result<Vec<RankingRow>, StoreError> {
        self.check_read()?;
        let mut rows = self.history();
        rows.sort_by_key(|row| (row.enforced_at, row.rank));
        Ok(rows)
    }

    async fn reviews_between(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Review>, StoreError> {
        self.check_read()?;
        Ok(self
            .reviews
            .iter()
            .filter(|r| r.last_updated_at > after && r.last_updated_at <= until)
            .cloned()
            .collect())
    }

    async fn active_drivers(&self) -> Result<Vec<ActiveDriver>, StoreError> {
        self.check_read()?;
        Ok(self.drivers.clone())
    }

    async fn insert_snapshot(&self, snapshot: &NewSnapshot) -> Result<u64, StoreError> {
        if self.fail_writes {
            return Err(StoreError::Postgres(sqlx::Error::PoolClosed));
        }
        let limit = self.interrupt_after.unwrap_or(snapshot.entries.len());
        let staged: Vec<RankingRow> = snapshot
            .entries
            .iter()
            .take(limit)
            .map(|entry| RankingRow {
                enforced_at: snapshot.enforced_at,
                driver_id: entry.driver_id,
                rank: entry.rank,
                tag: entry.tag.clone(),
                active: true,
            })
            .collect();
        let written = staged.len() as u64;
        ensure_complete(snapshot.entries.len(), written)?;

        self.history.lock().expect("history lock").extend(staged);
        Ok(written)
    }
}

fn event_log_failure() -> EventLogError {
    EventLogError::Encode(serde_json::from_str::<serde_json::Value>("").expect_err("empty input"))
}

struct ViewEvent {
    driver_id: DriverId,
    user_id: i64,
    timestamp: DateTime<Utc>,
}

/// Profile-view events held in memory, aggregated like the ClickHouse query.
#[derive(Default)]
pub struct MemoryViews {
    events: Vec<ViewEvent>,
    fail: bool,
}

impl MemoryViews {
    pub fn view(mut self, driver_id: DriverId, user_id: i64, timestamp: DateTime<Utc>) -> Self {
        self.events.push(ViewEvent {
            driver_id,
            user_id,
            timestamp,
        });
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl ProfileViewSource for MemoryViews {
    async fn profile_views(
        &self,
        window: &RankingWindow,
        driver_ids: &[DriverId],
    ) -> Result<Vec<ProfileViewStats>, EventLogError> {
        if self.fail {
            return Err(event_log_failure());
        }

        let mut grouped: HashMap<DriverId, (u64, HashSet<i64>)> = HashMap::new();
        for event in &self.events {
            if window.contains(event.timestamp) && driver_ids.contains(&event.driver_id) {
                let entry = grouped.entry(event.driver_id).or_default();
                entry.0 += 1;
                entry.1.insert(event.user_id);
            }
        }

        let mut stats: Vec<ProfileViewStats> = grouped
            .into_iter()
            .map(|(driver_id, (views, users))| ProfileViewStats {
                driver_id,
                profile_views: views,
                distinct_profile_views: users.len() as u64,
            })
            .collect();
        stats.sort_by_key(|s| s.driver_id);
        Ok(stats)
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<LogEvent>>,
    fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().expect("events lock").clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn record(&self, event: LogEvent) -> Result<(), EventLogError> {
        if self.fail {
            return Err(event_log_failure());
        }
        self.events.lock().expect("events lock").push(event);
        Ok(())
    }
}

/// Replays canned responses in order and remembers every request.
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<Result<String, OracleError>>>,
    requests: Mutex<Vec<(String, String)>>,
}

impl ScriptedBackend {
    pub fn new(responses: Vec<Result<String, OracleError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }

    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    fn provider(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, context: &str, payload: &str) -> Result<String, OracleError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push((context.to_string(), payload.to_string()));
        self.responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .unwrap_or_else(|| Err(OracleError::Transport("script exhausted".to_string())))
    }
}
