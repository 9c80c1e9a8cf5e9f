//! Message repository

use crate::db::DatabasePool;
use crate::models::{CreateMessage, Message};
use async_trait::async_trait;
use postdrop_common::types::MessageId;
use postdrop_common::{Error, Result};
use uuid::Uuid;

/// Message repository trait
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Create a new message record (single insert)
    async fn create(&self, input: CreateMessage) -> Result<Message>;

    /// Get a message by ID
    async fn get(&self, id: MessageId) -> Result<Option<Message>>;

    /// List messages whose recipient list contains the given address,
    /// newest first
    async fn list_for_recipient(&self, address: &str, limit: i64) -> Result<Vec<Message>>;
}

/// Database message repository
pub struct DbMessageRepository {
    pool: DatabasePool,
}

impl DbMessageRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for DbMessageRepository {
    async fn create(&self, input: CreateMessage) -> Result<Message> {
        let id = Uuid::now_v7();

        let recipients = serde_json::to_value(&input.recipients)
            .map_err(|e| Error::Internal(e.to_string()))?;
        let headers =
            serde_json::to_value(&input.headers).map_err(|e| Error::Internal(e.to_string()))?;
        let attachments =
            serde_json::to_value(&input.attachments).map_err(|e| Error::Internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO messages (
                id, message_id_header, mail_from, recipients, subject,
                headers, body, attachments, alias_id, received_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(id)
        .bind(&input.message_id_header)
        .bind(&input.mail_from)
        .bind(&recipients)
        .bind(&input.subject)
        .bind(&headers)
        .bind(&input.body)
        .bind(&attachments)
        .bind(input.alias_id)
        .bind(input.received_at)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        self.get(id)
            .await?
            .ok_or_else(|| Error::Internal("Failed to retrieve created message".to_string()))
    }

    async fn get(&self, id: MessageId) -> Result<Option<Message>> {
        sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list_for_recipient(&self, address: &str, limit: i64) -> Result<Vec<Message>> {
        let needle = serde_json::json!([address]);

        sqlx::query_as::<_, Message>(
            r#"
            SELECT * FROM messages
            WHERE recipients @> $1
            ORDER BY received_at DESC
            LIMIT $2
            "#,
        )
        .bind(&needle)
        .bind(limit)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }
}
