//! API handlers

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use postdrop_storage::models::{CreateAlias, Message};
use postdrop_storage::repository::{
    AliasRepository, DbAliasRepository, DbMessageRepository, MessageRepository,
};
use postdrop_storage::DatabasePool;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

/// Messages returned per inbox query
const INBOX_LIMIT: i64 = 200;

/// Snippet length in the inbox listing
const SNIPPET_CHARS: usize = 200;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db_pool: DatabasePool,
    /// Mail domain used for issued addresses
    pub domain: String,
}

/// Generated address response
#[derive(Debug, Serialize, Deserialize)]
pub struct GeneratedAddress {
    pub local: String,
    pub address: String,
}

/// Message summary (inbox list view)
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: Uuid,
    pub subject: String,
    pub from: String,
    pub received_at: chrono::DateTime<chrono::Utc>,
    pub snippet: String,
}

impl From<Message> for MessageSummary {
    fn from(msg: Message) -> Self {
        Self {
            id: msg.id,
            subject: display_subject(&msg.subject),
            from: msg.mail_from,
            received_at: msg.received_at,
            snippet: msg.body.chars().take(SNIPPET_CHARS).collect(),
        }
    }
}

/// Inbox listing response
#[derive(Debug, Serialize, Deserialize)]
pub struct InboxResponse {
    pub local: String,
    pub address: String,
    pub messages: Vec<MessageSummary>,
}

/// Full message response
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageDetail {
    pub id: Uuid,
    pub subject: String,
    pub from: String,
    pub to: Vec<String>,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub attachments: serde_json::Value,
    pub received_at: chrono::DateTime<chrono::Utc>,
}

/// Issue a new disposable address.
///
/// The alias record carries the caller's source address and agent string for
/// issuance stats; a failed insert is logged but the generated local part is
/// still returned, matching the throwaway nature of the addresses.
pub async fn generate_address(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<GeneratedAddress> {
    let local = generate_local();

    let repo = DbAliasRepository::new(state.db_pool.clone());
    let input = CreateAlias {
        local_part: local.clone(),
        domain: state.domain.clone(),
        source_ip: client_ip(&headers),
        user_agent: client_agent(&headers),
    };

    if let Err(e) = repo.create(input).await {
        warn!(local = %local, error = %e, "Failed to record issued alias");
    }

    let address = format!("{}@{}", local, state.domain);
    Json(GeneratedAddress { local, address })
}

/// List messages delivered to a generated address, newest first
pub async fn inbox(
    State(state): State<Arc<AppState>>,
    Path(local): Path<String>,
) -> Result<Json<InboxResponse>, StatusCode> {
    let address = format!("{}@{}", local, state.domain);

    let repo = DbMessageRepository::new(state.db_pool.clone());
    let messages = repo
        .list_for_recipient(&address, INBOX_LIMIT)
        .await
        .map_err(internal_error)?;

    Ok(Json(InboxResponse {
        local,
        address,
        messages: messages.into_iter().map(MessageSummary::from).collect(),
    }))
}

/// Fetch one stored message
pub async fn get_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageDetail>, StatusCode> {
    let repo = DbMessageRepository::new(state.db_pool.clone());
    let message = repo
        .get(id)
        .await
        .map_err(internal_error)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let headers = serde_json::from_value(message.headers.clone()).unwrap_or_default();
    let to = message.recipients_vec();

    Ok(Json(MessageDetail {
        id: message.id,
        subject: display_subject(&message.subject),
        from: message.mail_from,
        to,
        headers,
        body: message.body,
        attachments: message.attachments,
        received_at: message.received_at,
    }))
}

/// Basic health check
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

/// Readiness check (database reachable)
pub async fn readiness(State(state): State<Arc<AppState>>) -> Result<StatusCode, StatusCode> {
    state
        .db_pool
        .health_check()
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    Ok(StatusCode::OK)
}

/// Random 8-character hex local part
fn generate_local() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn display_subject(subject: &str) -> String {
    if subject.is_empty() {
        "(no subject)".to_string()
    } else {
        subject.to_string()
    }
}

fn client_ip(headers: &HeaderMap) -> String {
    for name in ["x-real-ip", "x-forwarded-for"] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            if let Some(ip) = value.split(',').next() {
                return ip.trim().to_string();
            }
        }
    }
    String::new()
}

fn client_agent(headers: &HeaderMap) -> String {
    headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(|ua| ua.chars().take(1024).collect())
        .unwrap_or_default()
}

fn internal_error(e: postdrop_common::Error) -> StatusCode {
    error!(error = %e, "API request failed");
    StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_local_shape() {
        let local = generate_local();
        assert_eq!(local.len(), 8);
        assert!(local.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_display_subject_fallback() {
        assert_eq!(display_subject(""), "(no subject)");
        assert_eq!(display_subject("hello"), "hello");
    }

    #[test]
    fn test_client_ip_takes_first_forwarded_entry() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.1, 10.0.0.2".parse().unwrap());
        assert_eq!(client_ip(&headers), "10.0.0.1");
    }
}
