use chrono::{DateTime, Utc};
use serde::Serialize;

pub type DriverId = i32;

/// One row of the append-only `driver_ranking` log, joined with the driver's
/// current removal flag.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingRow {
    pub enforced_at: DateTime<Utc>,
    pub driver_id: DriverId,
    pub rank: i32,
    pub tag: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveDriver {
    pub id: DriverId,
    pub last_updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Review {
    pub driver_id: DriverId,
    pub stars: i32,
    pub comment: Option<String>,
    pub last_updated_at: DateTime<Utc>,
}

/// Half-open interval during which one snapshot was in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RankingWindow {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl RankingWindow {
    /// Reviews and events belong to a window when `start < at <= end`.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at > self.start_time && at <= self.end_time
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewAggregate {
    pub avg_stars: f64,
    pub rating_count: i64,
    pub comments: Option<Vec<Option<String>>>,
}

impl ReviewAggregate {
    pub fn empty() -> Self {
        Self {
            avg_stars: 0.0,
            rating_count: 0,
            comments: None,
        }
    }
}

/// A snapshot entry joined with the reviews collected while it was in effect.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankEffect {
    pub rank: i32,
    pub tag: String,
    pub driver_id: DriverId,
    #[serde(flatten)]
    pub reviews: ReviewAggregate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowEffects {
    #[serde(flatten)]
    pub window: RankingWindow,
    pub rank_and_effect: Vec<RankEffect>,
}

impl WindowEffects {
    pub fn driver_ids(&self) -> Vec<DriverId> {
        self.rank_and_effect.iter().map(|e| e.driver_id).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProfileViewStats {
    pub driver_id: DriverId,
    pub profile_views: u64,
    pub distinct_profile_views: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedRankEffect {
    #[serde(flatten)]
    pub effect: RankEffect,
    pub profile_views: u64,
    pub distinct_profile_views: u64,
}

/// Evidence for one window, as handed to the ranking oracle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedWindow {
    #[serde(flatten)]
    pub window: RankingWindow,
    pub rank_and_effect: Vec<EnrichedRankEffect>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankingEntry {
    pub driver_id: DriverId,
    pub rank: i32,
    pub tag: String,
}

/// Validated oracle output covering exactly the active-driver set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct NewRankingProposal {
    pub entries: Vec<RankingEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewSnapshot {
    pub enforced_at: DateTime<Utc>,
    pub entries: Vec<RankingEntry>,
}
