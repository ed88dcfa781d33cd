//! # Database Pool Management
//!
//! A single shared PostgreSQL pool serving every organization. Isolation is
//! row-scoped: every audit table carries an `organization_id` column, and
//! Postgres row-level security policies key off the session GUC
//! `app.current_organization_id`, set for the lifetime of a transaction via
//! [`DatabasePool::scoped_transaction`]. This replaces schema-per-tenant
//! pooling -- one schema per organization does not scale to the event
//! volumes this system targets, and row-level security gives the same
//! isolation guarantee without the connection-pool fragmentation.

use crate::{config::DatabaseConfig, error::Result};
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};
use tracing::info;

#[derive(Clone)]
pub struct DatabasePool {
    pub main_pool: PgPool,
}

impl DatabasePool {
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        info!("initializing database pool");

        let main_pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        info!("database pool initialized successfully");

        Ok(Self { main_pool })
    }

    /// Open a transaction with the organization GUC set for its duration.
    /// Every query issued on the returned handle is implicitly scoped by
    /// Postgres RLS policies comparing rows' `organization_id` against
    /// `current_setting('app.current_organization_id')`.
    pub async fn scoped_transaction(
        &self,
        organization_id: &str,
    ) -> Result<Transaction<'_, Postgres>> {
        let mut tx = self.main_pool.begin().await?;
        sqlx::query("SELECT set_config('app.current_organization_id', $1, true)")
            .bind(organization_id)
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    pub async fn check_health(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.main_pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.main_pool
    }
}
