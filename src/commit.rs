use chrono::{SubsecRound, Utc};

use crate::db::{RankingStore, StoreError};
use crate::models::{NewRankingProposal, NewSnapshot};

/// Appends the proposal as a new snapshot stamped with a single commit time.
/// The time is truncated to microseconds, the precision `TIMESTAMPTZ` keeps.
pub async fn commit_ranking(
    store: &dyn RankingStore,
    proposal: NewRankingProposal,
) -> Result<NewSnapshot, StoreError> {
    let snapshot = NewSnapshot {
        enforced_at: Utc::now().trunc_subsecs(6),
        entries: proposal.entries,
    };
    store.insert_snapshot(&snapshot).await?;
    Ok(snapshot)
}
