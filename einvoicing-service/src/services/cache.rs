//! Durable credential cache shared across process instances.
//!
//! The store is the single source of truth for a holder's live credential;
//! `load` applies the usability margin so callers never re-implement the
//! validity check. `save` is an upsert: at most one row per holder, refreshes
//! supersede in place.

use crate::error::FiscalError;
use crate::models::Credential;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, instrument};

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Stored credential for `holder_id`, if still usable. Expired rows are
    /// reported as absent; the next refresh overwrites them.
    async fn load(&self, holder_id: &str) -> Result<Option<Credential>, FiscalError>;

    /// Upserts the credential for its holder.
    async fn save(&self, credential: &Credential) -> Result<(), FiscalError>;
}

/// Credential cache on the application's relational store.
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, FiscalError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| FiscalError::Store(anyhow::anyhow!("failed to connect: {e}")))?;

        info!("credential store connection pool established");
        Ok(Self::new(pool))
    }

    pub async fn run_migrations(&self) -> Result<(), FiscalError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| FiscalError::Store(anyhow::anyhow!("migration failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    #[instrument(skip(self))]
    async fn load(&self, holder_id: &str) -> Result<Option<Credential>, FiscalError> {
        let row = sqlx::query_as::<_, Credential>(
            "SELECT holder_id, token, sign, expires_at
             FROM service_credentials
             WHERE holder_id = $1",
        )
        .bind(holder_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FiscalError::Store(anyhow::anyhow!("credential load failed: {e}")))?;

        Ok(row.filter(Credential::is_usable))
    }

    #[instrument(skip(self, credential), fields(holder = %credential.holder_id))]
    async fn save(&self, credential: &Credential) -> Result<(), FiscalError> {
        sqlx::query(
            "INSERT INTO service_credentials (holder_id, token, sign, expires_at, updated_utc)
             VALUES ($1, $2, $3, $4, now())
             ON CONFLICT (holder_id) DO UPDATE
             SET token = EXCLUDED.token,
                 sign = EXCLUDED.sign,
                 expires_at = EXCLUDED.expires_at,
                 updated_utc = now()",
        )
        .bind(&credential.holder_id)
        .bind(&credential.token)
        .bind(&credential.sign)
        .bind(credential.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| FiscalError::Store(anyhow::anyhow!("credential save failed: {e}")))?;

        Ok(())
    }
}

/// Process-local store for tests and single-instance deployments.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    entries: RwLock<HashMap<String, Credential>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn load(&self, holder_id: &str) -> Result<Option<Credential>, FiscalError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(holder_id)
            .filter(|c| c.is_usable())
            .cloned())
    }

    async fn save(&self, credential: &Credential) -> Result<(), FiscalError> {
        let mut entries = self.entries.write().await;
        entries.insert(credential.holder_id.clone(), credential.clone());
        Ok(())
    }
}
