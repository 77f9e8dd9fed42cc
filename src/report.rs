use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::{DriverId, EnrichedWindow};

#[derive(Debug, Clone, PartialEq)]
pub struct DriverSummary {
    pub driver_id: DriverId,
    pub windows: usize,
    pub rating_count: i64,
    pub avg_stars: f64,
    pub profile_views: u64,
}

/// Totals per driver across all windows, most viewed first.
pub fn summarize_by_driver(evidence: &[EnrichedWindow]) -> Vec<DriverSummary> {
    let mut map: std::collections::HashMap<DriverId, (usize, i64, f64, u64)> =
        std::collections::HashMap::new();

    for window in evidence {
        for entry in &window.rank_and_effect {
            let reviews = &entry.effect.reviews;
            let totals = map.entry(entry.effect.driver_id).or_insert((0, 0, 0.0, 0));
            totals.0 += 1;
            totals.1 += reviews.rating_count;
            totals.2 += reviews.avg_stars * reviews.rating_count as f64;
            totals.3 += entry.profile_views;
        }
    }

    let mut summaries: Vec<DriverSummary> = map
        .into_iter()
        .map(|(driver_id, (windows, rating_count, star_total, profile_views))| DriverSummary {
            driver_id,
            windows,
            rating_count,
            avg_stars: if rating_count == 0 {
                0.0
            } else {
                star_total / rating_count as f64
            },
            profile_views,
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.profile_views
            .cmp(&a.profile_views)
            .then(a.driver_id.cmp(&b.driver_id))
    });
    summaries
}

pub fn build_report(generated_at: DateTime<Utc>, evidence: &[EnrichedWindow]) -> String {
    let summaries = summarize_by_driver(evidence);
    let mut output = String::new();

    let _ = writeln!(output, "# Driver Ranking Evidence");
    let _ = writeln!(
        output,
        "Generated at {} across {} ranking windows",
        generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        evidence.len()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Driver Summary");

    if summaries.is_empty() {
        let _ = writeln!(output, "No ranked drivers in the history.");
    } else {
        for summary in &summaries {
            let _ = writeln!(
                output,
                "- driver {}: {} profile views, {} ratings (avg {:.2}) across {} windows",
                summary.driver_id,
                summary.profile_views,
                summary.rating_count,
                summary.avg_stars,
                summary.windows
            );
        }
    }

    for window in evidence.iter().rev() {
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "## {} to {}",
            window.window.start_time.format("%Y-%m-%d %H:%M"),
            window.window.end_time.format("%Y-%m-%d %H:%M")
        );

        if window.rank_and_effect.is_empty() {
            let _ = writeln!(output, "No active drivers were ranked in this window.");
            continue;
        }

        for entry in &window.rank_and_effect {
            let effect = &entry.effect;
            let tag = if effect.tag.is_empty() {
                String::new()
            } else {
                format!(" [{}]", effect.tag)
            };
            let _ = writeln!(
                output,
                "{}. driver {}{}: {:.2} stars from {} ratings, {} views by {} users",
                effect.rank,
                effect.driver_id,
                tag,
                effect.reviews.avg_stars,
                effect.reviews.rating_count,
                entry.profile_views,
                entry.distinct_profile_views
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EnrichedRankEffect, RankEffect, RankingWindow, ReviewAggregate};
    use crate::testing::at;

    fn entry(driver_id: i32, rank: i32, tag: &str, stars: f64, ratings: i64, views: u64) -> EnrichedRankEffect {
        EnrichedRankEffect {
            effect: RankEffect {
                rank,
                tag: tag.to_string(),
                driver_id,
                reviews: ReviewAggregate {
                    avg_stars: stars,
                    rating_count: ratings,
                    comments: None,
                },
            },
            profile_views: views,
            distinct_profile_views: views,
        }
    }

    fn evidence() -> Vec<EnrichedWindow> {
        vec![
            EnrichedWindow {
                window: RankingWindow {
                    start_time: at(0),
                    end_time: at(60),
                },
                rank_and_effect: vec![entry(1, 1, "Top rated", 5.0, 2, 4), entry(2, 2, "", 0.0, 0, 1)],
            },
            EnrichedWindow {
                window: RankingWindow {
                    start_time: at(60),
                    end_time: at(120),
                },
                rank_and_effect: vec![entry(2, 1, "", 3.0, 2, 6), entry(1, 2, "", 4.0, 2, 1)],
            },
        ]
    }

    #[test]
    fn summary_weights_stars_by_rating_count() {
        let summaries = summarize_by_driver(&evidence());

        assert_eq!(summaries[0].driver_id, 2);
        assert_eq!(summaries[0].profile_views, 7);
        assert_eq!(summaries[0].avg_stars, 3.0);
        assert_eq!(summaries[1].rating_count, 4);
        assert!((summaries[1].avg_stars - 4.5).abs() < 0.001);
        assert_eq!(summaries[1].windows, 2);
    }

    #[test]
    fn report_lists_newest_window_first() {
        let report = build_report(at(120), &evidence());

        assert!(report.starts_with("# Driver Ranking Evidence"));
        assert!(report.contains("across 2 ranking windows"));
        let newest = report.find("1. driver 2:").expect("newest window");
        let oldest = report.find("1. driver 1 [Top rated]").expect("oldest window");
        assert!(newest < oldest);
    }

    #[test]
    fn empty_history_is_reported() {
        let report = build_report(at(0), &[]);
        assert!(report.contains("No ranked drivers in the history."));
    }
}
