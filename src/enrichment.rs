use std::collections::HashMap;

use futures::future::try_join_all;
use tracing::info;

use crate::event_log::{EventLogError, ProfileViewSource};
use crate::models::{EnrichedRankEffect, EnrichedWindow, ProfileViewStats, WindowEffects};

/// Attaches profile-view counts to every entry of a window. Drivers absent
/// from `stats` get zero views.
pub fn apply_profile_views(window: WindowEffects, stats: &[ProfileViewStats]) -> EnrichedWindow {
    let by_driver: HashMap<_, _> = stats.iter().map(|s| (s.driver_id, s)).collect();

    let rank_and_effect = window
        .rank_and_effect
        .into_iter()
        .map(|effect| {
            let views = by_driver.get(&effect.driver_id);
            EnrichedRankEffect {
                profile_views: views.map_or(0, |v| v.profile_views),
                distinct_profile_views: views.map_or(0, |v| v.distinct_profile_views),
                effect,
            }
        })
        .collect();

    EnrichedWindow {
        window: window.window,
        rank_and_effect,
    }
}

pub async fn enrich_window(
    source: &dyn ProfileViewSource,
    window: WindowEffects,
) -> Result<EnrichedWindow, EventLogError> {
    let driver_ids = window.driver_ids();
    let stats = if driver_ids.is_empty() {
        Vec::new()
    } else {
        source.profile_views(&window.window, &driver_ids).await?
    };
    Ok(apply_profile_views(window, &stats))
}

/// Queries every window concurrently; a single failure fails the batch.
pub async fn enrich_windows(
    source: &dyn ProfileViewSource,
    windows: Vec<WindowEffects>,
) -> Result<Vec<EnrichedWindow>, EventLogError> {
    let count = windows.len();
    let enriched = try_join_all(windows.into_iter().map(|w| enrich_window(source, w))).await?;
    info!(windows = count, "enriched windows with profile views");
    Ok(enriched)
}
