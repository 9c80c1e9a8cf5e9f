//! Database models

use chrono::{DateTime, Utc};
use postdrop_common::types::{AliasId, MessageId};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Issued alias model
///
/// Aliases are created by the issuance surface; the ingestion pipeline only
/// reads them and bumps `message_count`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Alias {
    pub id: AliasId,
    pub local_part: String,
    pub domain: String,
    pub source_ip: String,
    pub user_agent: String,
    pub message_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Stored message model
///
/// Created exactly once per accepted delivery; never mutated afterward.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub message_id_header: String,
    pub mail_from: String,
    /// Envelope recipients, verbatim, as a JSON array of strings
    pub recipients: serde_json::Value,
    pub subject: String,
    /// Ordered name/value header pairs as a JSON array
    pub headers: serde_json::Value,
    pub body: String,
    /// JSON array of [`AttachmentRef`]
    pub attachments: serde_json::Value,
    pub alias_id: Option<AliasId>,
    pub received_at: DateTime<Utc>,
}

impl Message {
    /// Get recipients as a vector
    pub fn recipients_vec(&self) -> Vec<String> {
        serde_json::from_value(self.recipients.clone()).unwrap_or_default()
    }

    /// Get attachment references as a vector
    pub fn attachment_refs(&self) -> Vec<AttachmentRef> {
        serde_json::from_value(self.attachments.clone()).unwrap_or_default()
    }
}

/// Reference to an attachment file extracted from a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub filename: String,
    pub path: String,
    pub size: i64,
}

/// Create alias input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAlias {
    pub local_part: String,
    pub domain: String,
    pub source_ip: String,
    pub user_agent: String,
}

/// Create message input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMessage {
    pub message_id_header: String,
    pub mail_from: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub attachments: Vec<AttachmentRef>,
    pub alias_id: Option<AliasId>,
    pub received_at: DateTime<Utc>,
}
