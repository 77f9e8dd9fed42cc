use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::StoreSettings;

/// Owns the process-wide store handles. Each handle is created on first use
/// and released once by [`Resources::shutdown`].
pub struct Resources {
    settings: StoreSettings,
    pg: OnceCell<PgPool>,
    clickhouse: OnceLock<clickhouse::Client>,
    released: AtomicBool,
}

impl Resources {
    pub fn new(settings: StoreSettings) -> Self {
        Self {
            settings,
            pg: OnceCell::new(),
            clickhouse: OnceLock::new(),
            released: AtomicBool::new(false),
        }
    }

    pub async fn pg(&self) -> Result<&PgPool, sqlx::Error> {
        self.pg
            .get_or_try_init(|| async {
                let pool = PgPoolOptions::new()
                    .max_connections(self.settings.postgres_max_connections)
                    .connect(&self.settings.postgres_url)
                    .await?;
                info!("connected to Postgres");
                Ok::<_, sqlx::Error>(pool)
            })
            .await
    }

    pub fn clickhouse(&self) -> &clickhouse::Client {
        self.clickhouse.get_or_init(|| {
            info!(
                url = %self.settings.clickhouse_url,
                database = %self.settings.clickhouse_database,
                "ClickHouse client initialized"
            );
            clickhouse::Client::default()
                .with_url(&self.settings.clickhouse_url)
                .with_database(&self.settings.clickhouse_database)
                .with_user(&self.settings.clickhouse_user)
                .with_password(&self.settings.clickhouse_password)
        })
    }

    /// Closes the Postgres pool. Later calls are no-ops.
    pub async fn shutdown(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(pool) = self.pg.get() {
            pool.close().await;
            info!("Postgres pool closed");
        }
        if self.clickhouse.get().is_some() {
            debug!("ClickHouse client released");
        }
    }
}
