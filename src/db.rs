use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::models::{ActiveDriver, NewSnapshot, RankingRow, Review};
use crate::resources::Resources;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("snapshot write incomplete: expected {expected} rows, wrote {written}")]
    PartialWrite { expected: usize, written: u64 },
}

/// Read and append access to the ranking log, the driver roster and reviews.
#[async_trait]
pub trait RankingStore: Send + Sync {
    /// Every `driver_ranking` row, ordered by `enforced_at` then rank.
    async fn ranking_history(&self) -> Result<Vec<RankingRow>, StoreError>;

    /// Reviews with `after < last_updated_at <= until`.
    async fn reviews_between(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Review>, StoreError>;

    async fn active_drivers(&self) -> Result<Vec<ActiveDriver>, StoreError>;

    /// Appends a whole snapshot or nothing. Returns the number of rows written.
    async fn insert_snapshot(&self, snapshot: &NewSnapshot) -> Result<u64, StoreError>;
}

pub struct PgRankingStore {
    resources: Arc<Resources>,
}

impl PgRankingStore {
    pub fn new(resources: Arc<Resources>) -> Self {
        Self { resources }
    }
}

#[async_trait]
impl RankingStore for PgRankingStore {
    async fn ranking_history(&self) -> Result<Vec<RankingRow>, StoreError> {
        let pool = self.resources.pg().await?;
        let rows = sqlx::query(
            r#"
            SELECT dr.enforced_at, dr.driver_id, dr.rank,
                   COALESCE(dr.tag, '') AS tag, NOT d.removed AS active
            FROM driver_ranking dr
            JOIN driver d ON d.id = dr.driver_id
            ORDER BY dr.enforced_at, dr.rank
            "#,
        )
        .fetch_all(pool)
        .await?;

        let mut history = Vec::with_capacity(rows.len());
        for row in rows {
            history.push(RankingRow {
                enforced_at: row.try_get("enforced_at")?,
                driver_id: row.try_get("driver_id")?,
                rank: row.try_get("rank")?,
                tag: row.try_get("tag")?,
                active: row.try_get("active")?,
            });
        }

        debug!(rows = history.len(), "loaded ranking history");
        Ok(history)
    }

    async fn reviews_between(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Review>, StoreError> {
        let pool = self.resources.pg().await?;
        let rows = sqlx::query(
            r#"
            SELECT driver_id, stars, comment, last_updated_at
            FROM review
            WHERE last_updated_at > $1 AND last_updated_at <= $2
            "#,
        )
        .bind(after)
        .bind(until)
        .fetch_all(pool)
        .await?;

        let mut reviews = Vec::with_capacity(rows.len());
        for row in rows {
            reviews.push(Review {
                driver_id: row.try_get("driver_id")?,
                stars: row.try_get("stars")?,
                comment: row.try_get("comment")?,
                last_updated_at: row.try_get("last_updated_at")?,
            });
        }

        debug!(reviews = reviews.len(), "loaded reviews");
        Ok(reviews)
    }

    async fn active_drivers(&self) -> Result<Vec<ActiveDriver>, StoreError> {
        let pool = self.resources.pg().await?;
        let rows = sqlx::query(
            "SELECT id, last_updated_at FROM driver WHERE removed = FALSE ORDER BY id",
        )
        .fetch_all(pool)
        .await?;

        let mut drivers = Vec::with_capacity(rows.len());
        for row in rows {
            drivers.push(ActiveDriver {
                id: row.try_get("id")?,
                last_updated_at: row.try_get("last_updated_at")?,
            });
        }
        Ok(drivers)
    }

    async fn insert_snapshot(&self, snapshot: &NewSnapshot) -> Result<u64, StoreError> {
        let pool = self.resources.pg().await?;
        let driver_ids: Vec<i32> = snapshot.entries.iter().map(|e| e.driver_id).collect();
        let ranks: Vec<i32> = snapshot.entries.iter().map(|e| e.rank).collect();
        let tags: Vec<String> = snapshot.entries.iter().map(|e| e.tag.clone()).collect();

        let mut tx = pool.begin().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO driver_ranking (driver_id, rank, tag, enforced_at)
            SELECT driver_id, rank, tag, $4
            FROM UNNEST($1::int4[], $2::int4[], $3::text[]) AS new_ranking(driver_id, rank, tag)
            "#,
        )
        .bind(&driver_ids)
        .bind(&ranks)
        .bind(&tags)
        .bind(snapshot.enforced_at)
        .execute(&mut *tx)
        .await?;

        let written = result.rows_affected();
        if let Err(err) = ensure_complete(snapshot.entries.len(), written) {
            tx.rollback().await?;
            return Err(err);
        }
        tx.commit().await?;

        info!(
            rows = written,
            enforced_at = %snapshot.enforced_at,
            "ranking snapshot committed"
        );
        Ok(written)
    }
}

/// A snapshot is only committed when every entry became a row.
pub fn ensure_complete(expected: usize, written: u64) -> Result<(), StoreError> {
    if written != expected as u64 {
        return Err(StoreError::PartialWrite { expected, written });
    }
    Ok(())
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Loads a small roster with two historical snapshots and a few reviews.
pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let now = Utc::now();
    let drivers = vec![
        (1, "Arjun Mehta", false),
        (2, "Priya Nair", false),
        (3, "Vikram Rao", false),
        (4, "Meera Iyer", true),
    ];

    for (id, name, removed) in drivers {
        sqlx::query(
            r#"
            INSERT INTO driver (id, name, removed, last_updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, removed = EXCLUDED.removed
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(removed)
        .bind(now - Duration::days(30))
        .execute(pool)
        .await?;
    }

    let snapshots = vec![
        (
            now - Duration::days(14),
            vec![(1, 1, "Top rated"), (2, 2, ""), (3, 3, "New"), (4, 4, "")],
        ),
        (
            now - Duration::days(7),
            vec![(2, 1, "Top rated"), (1, 2, ""), (3, 3, "New")],
        ),
    ];

    for (enforced_at, entries) in snapshots {
        for (driver_id, rank, tag) in entries {
            sqlx::query(
                r#"
                INSERT INTO driver_ranking (driver_id, rank, tag, enforced_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(driver_id)
            .bind(rank)
            .bind(tag)
            .bind(enforced_at)
            .execute(pool)
            .await?;
        }
    }

    let reviews = vec![
        (1, 5, Some("Very punctual"), Duration::days(12)),
        (1, 4, None, Duration::days(10)),
        (2, 5, Some("Careful driver, clean car"), Duration::days(5)),
        (3, 3, Some("Arrived late"), Duration::days(2)),
    ];

    for (driver_id, stars, comment, age) in reviews {
        sqlx::query(
            r#"
            INSERT INTO review (driver_id, stars, comment, last_updated_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(driver_id)
        .bind(stars)
        .bind(comment)
        .bind(now - age)
        .execute(pool)
        .await?;
    }

    Ok(())
}
