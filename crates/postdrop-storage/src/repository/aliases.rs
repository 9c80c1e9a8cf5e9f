//! Alias repository

use crate::db::DatabasePool;
use crate::models::{Alias, CreateAlias};
use async_trait::async_trait;
use postdrop_common::types::AliasId;
use postdrop_common::{Error, Result};
use uuid::Uuid;

/// Alias repository trait
#[async_trait]
pub trait AliasRepository: Send + Sync {
    /// Create a new issued alias
    async fn create(&self, input: CreateAlias) -> Result<Alias>;

    /// Get an alias by ID
    async fn get(&self, id: AliasId) -> Result<Option<Alias>>;

    /// Find the most recently issued alias with this exact local part.
    ///
    /// The comparison is case-sensitive; when a local part has been reissued
    /// the newest record wins.
    async fn find_latest_by_local_part(&self, local_part: &str) -> Result<Option<Alias>>;

    /// Atomically increment the alias message counter
    async fn increment_message_count(&self, id: AliasId) -> Result<()>;
}

/// Database alias repository
pub struct DbAliasRepository {
    pool: DatabasePool,
}

impl DbAliasRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AliasRepository for DbAliasRepository {
    async fn create(&self, input: CreateAlias) -> Result<Alias> {
        let id = Uuid::new_v4();
        let now = chrono::Utc::now();

        sqlx::query(
            r#"
            INSERT INTO aliases (id, local_part, domain, source_ip, user_agent, message_count, created_at)
            VALUES ($1, $2, $3, $4, $5, 0, $6)
            "#,
        )
        .bind(id)
        .bind(&input.local_part)
        .bind(&input.domain)
        .bind(&input.source_ip)
        .bind(&input.user_agent)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        self.get(id)
            .await?
            .ok_or_else(|| Error::Internal("Failed to create alias".to_string()))
    }

    async fn get(&self, id: AliasId) -> Result<Option<Alias>> {
        sqlx::query_as::<_, Alias>("SELECT * FROM aliases WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn find_latest_by_local_part(&self, local_part: &str) -> Result<Option<Alias>> {
        sqlx::query_as::<_, Alias>(
            r#"
            SELECT * FROM aliases
            WHERE local_part = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(local_part)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn increment_message_count(&self, id: AliasId) -> Result<()> {
        // Single-statement increment so concurrent deliveries never lose an update
        sqlx::query("UPDATE aliases SET message_count = message_count + 1 WHERE id = $1")
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }
}
