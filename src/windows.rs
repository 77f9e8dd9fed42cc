use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::db::{RankingStore, StoreError};
use crate::models::{
    DriverId, RankEffect, RankingRow, RankingWindow, Review, ReviewAggregate, WindowEffects,
};

/// Turns snapshot boundaries into contiguous windows. Each window runs from
/// its boundary to the next one, and the last one runs until `now`.
pub fn window_bounds(boundaries: &[DateTime<Utc>], now: DateTime<Utc>) -> Vec<RankingWindow> {
    let mut sorted = boundaries.to_vec();
    sorted.sort();
    sorted.dedup();

    sorted
        .iter()
        .enumerate()
        .map(|(i, &start_time)| RankingWindow {
            start_time,
            end_time: sorted.get(i + 1).copied().unwrap_or(now),
        })
        .collect()
}

/// Index of the window a timestamp falls into, if any.
fn window_index(windows: &[RankingWindow], at: DateTime<Utc>) -> Option<usize> {
    let after_start = windows.partition_point(|w| w.start_time < at);
    let idx = after_start.checked_sub(1)?;
    windows[idx].contains(at).then_some(idx)
}

/// `stars / count` rounded to two decimals, halves away from zero. Computed
/// on integers so x.xx5 averages round up.
fn round_stars(stars: i64, count: i64) -> f64 {
    ((stars * 200 + count) / (2 * count)) as f64 / 100.0
}

#[derive(Default)]
struct ReviewTally {
    stars: i64,
    count: i64,
    comments: Vec<Option<String>>,
}

impl ReviewTally {
    fn into_aggregate(self) -> ReviewAggregate {
        ReviewAggregate {
            avg_stars: round_stars(self.stars, self.count),
            rating_count: self.count,
            comments: Some(self.comments),
        }
    }
}

/// Joins every snapshot with the reviews collected while it was in effect.
/// Entries of removed drivers are dropped; drivers without reviews keep an
/// empty aggregate.
pub fn assemble(history: &[RankingRow], reviews: &[Review], now: DateTime<Utc>) -> Vec<WindowEffects> {
    let boundaries: Vec<DateTime<Utc>> = history.iter().map(|row| row.enforced_at).collect();
    let windows = window_bounds(&boundaries, now);

    let mut tallies: HashMap<(usize, DriverId), ReviewTally> = HashMap::new();
    for review in reviews {
        let Some(idx) = window_index(&windows, review.last_updated_at) else {
            continue;
        };
        let tally = tallies.entry((idx, review.driver_id)).or_default();
        tally.stars += i64::from(review.stars);
        tally.count += 1;
        tally.comments.push(review.comment.clone());
    }

    let mut effects: Vec<WindowEffects> = windows
        .iter()
        .map(|&window| WindowEffects {
            window,
            rank_and_effect: Vec::new(),
        })
        .collect();

    for row in history.iter().filter(|row| row.active) {
        let idx = windows.partition_point(|w| w.start_time < row.enforced_at);
        let reviews = tallies
            .remove(&(idx, row.driver_id))
            .map(ReviewTally::into_aggregate)
            .unwrap_or_else(ReviewAggregate::empty);
        effects[idx].rank_and_effect.push(RankEffect {
            rank: row.rank,
            tag: row.tag.clone(),
            driver_id: row.driver_id,
            reviews,
        });
    }

    for window in &mut effects {
        window.rank_and_effect.sort_by_key(|effect| effect.rank);
    }
    effects
}

/// Reads the ranking log and reviews, then builds one window per snapshot.
pub async fn reconstruct(
    store: &dyn RankingStore,
    now: DateTime<Utc>,
) -> Result<Vec<WindowEffects>, StoreError> {
    let history = store.ranking_history().await?;
    let reviews = match history.iter().map(|row| row.enforced_at).min() {
        Some(first) => store.reviews_between(first, now).await?,
        None => Vec::new(),
    };

    let windows = assemble(&history, &reviews, now);
    info!(
        windows = windows.len(),
        reviews = reviews.len(),
        "reconstructed ranking windows"
    );
    Ok(windows)
}
