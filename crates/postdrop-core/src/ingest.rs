//! Delivery ingest pipeline
//!
//! One accepted payload flows Decoder -> Attachment store -> Alias matcher ->
//! Message insert -> alias counter bump. The SMTP session is the only caller
//! and treats the returned result as diagnostics, never as grounds to reject
//! the delivery.

use crate::matcher;
use crate::mime;
use chrono::Utc;
use postdrop_common::types::Envelope;
use postdrop_common::Result;
use postdrop_storage::file::AttachmentStore;
use postdrop_storage::models::{CreateMessage, Message};
use postdrop_storage::repository::{AliasRepository, MessageRepository};
use std::sync::Arc;
use tracing::{info, warn};

/// Ingest pipeline shared by all SMTP sessions
pub struct MessageIngest {
    aliases: Arc<dyn AliasRepository>,
    messages: Arc<dyn MessageRepository>,
    attachments: AttachmentStore,
}

impl MessageIngest {
    /// Create a new ingest pipeline
    pub fn new(
        aliases: Arc<dyn AliasRepository>,
        messages: Arc<dyn MessageRepository>,
        attachments: AttachmentStore,
    ) -> Self {
        Self {
            aliases,
            messages,
            attachments,
        }
    }

    /// Process one completed delivery and persist it.
    ///
    /// Decoding cannot fail; the payload is fully buffered before this runs,
    /// so a dropped connection never produces a partial message. An
    /// attachment that fails to store is dropped while the rest of the
    /// message is kept. A counter bump failure after a successful insert
    /// leaves the counter stale; the message stays visible.
    pub async fn deliver(&self, envelope: &Envelope, raw: &[u8]) -> Result<Message> {
        let received_at = Utc::now();
        let decoded = mime::decode(raw);

        let mut attachments = Vec::new();
        for candidate in &decoded.attachments {
            match self
                .attachments
                .store(received_at.timestamp(), &candidate.filename, &candidate.data)
                .await
            {
                Ok(stored) => attachments.push(stored),
                Err(e) => {
                    warn!(
                        filename = %candidate.filename,
                        error = %e,
                        "Dropping attachment that failed to store"
                    );
                }
            }
        }

        let alias = matcher::resolve_alias(self.aliases.as_ref(), &envelope.to).await;

        let message = self
            .messages
            .create(CreateMessage {
                message_id_header: decoded.message_id,
                mail_from: envelope.from.clone().unwrap_or_default(),
                recipients: envelope.to.clone(),
                subject: decoded.subject,
                headers: decoded.headers,
                body: decoded.body,
                attachments,
                alias_id: alias.as_ref().map(|a| a.id),
                received_at,
            })
            .await?;

        if let Some(alias) = &alias {
            if let Err(e) = self.aliases.increment_message_count(alias.id).await {
                warn!(
                    alias_id = %alias.id,
                    error = %e,
                    "Failed to increment alias message counter"
                );
            }
        }

        info!(
            message_id = %message.id,
            from = %message.mail_from,
            alias = ?alias.as_ref().map(|a| a.local_part.as_str()),
            attachments = message.attachment_refs().len(),
            "Stored inbound message"
        );

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use postdrop_common::types::AliasId;
    use postdrop_common::Error;
    use postdrop_storage::models::{Alias, CreateAlias};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use uuid::Uuid;

    struct MemoryAliases {
        aliases: Vec<Alias>,
        counters: HashMap<AliasId, AtomicI64>,
    }

    impl MemoryAliases {
        fn new(aliases: Vec<Alias>) -> Self {
            let counters = aliases
                .iter()
                .map(|a| (a.id, AtomicI64::new(0)))
                .collect();
            Self { aliases, counters }
        }

        fn count(&self, id: AliasId) -> i64 {
            self.counters[&id].load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AliasRepository for MemoryAliases {
        async fn create(&self, _input: CreateAlias) -> postdrop_common::Result<Alias> {
            unimplemented!("not used by ingest tests")
        }

        async fn get(&self, id: AliasId) -> postdrop_common::Result<Option<Alias>> {
            Ok(self.aliases.iter().find(|a| a.id == id).cloned())
        }

        async fn find_latest_by_local_part(
            &self,
            local_part: &str,
        ) -> postdrop_common::Result<Option<Alias>> {
            Ok(self
                .aliases
                .iter()
                .filter(|a| a.local_part == local_part)
                .max_by_key(|a| a.created_at)
                .cloned())
        }

        async fn increment_message_count(&self, id: AliasId) -> postdrop_common::Result<()> {
            self.counters[&id].fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryMessages {
        created: Mutex<Vec<Message>>,
        fail_inserts: bool,
    }

    #[async_trait]
    impl MessageRepository for MemoryMessages {
        async fn create(&self, input: CreateMessage) -> postdrop_common::Result<Message> {
            if self.fail_inserts {
                return Err(Error::Database("message store unavailable".to_string()));
            }

            let message = Message {
                id: Uuid::now_v7(),
                message_id_header: input.message_id_header,
                mail_from: input.mail_from,
                recipients: serde_json::to_value(&input.recipients).unwrap(),
                subject: input.subject,
                headers: serde_json::to_value(&input.headers).unwrap(),
                body: input.body,
                attachments: serde_json::to_value(&input.attachments).unwrap(),
                alias_id: input.alias_id,
                received_at: input.received_at,
            };
            self.created.lock().unwrap().push(message.clone());
            Ok(message)
        }

        async fn get(
            &self,
            id: postdrop_common::types::MessageId,
        ) -> postdrop_common::Result<Option<Message>> {
            Ok(self
                .created
                .lock()
                .unwrap()
                .iter()
                .find(|m| m.id == id)
                .cloned())
        }

        async fn list_for_recipient(
            &self,
            _address: &str,
            _limit: i64,
        ) -> postdrop_common::Result<Vec<Message>> {
            Ok(Vec::new())
        }
    }

    fn alias(local_part: &str) -> Alias {
        Alias {
            id: Uuid::new_v4(),
            local_part: local_part.to_string(),
            domain: "drop.example.com".to_string(),
            source_ip: String::new(),
            user_agent: String::new(),
            message_count: 0,
            created_at: Utc::now(),
        }
    }

    fn envelope(to: &[&str]) -> Envelope {
        Envelope {
            from: Some("sender@example.com".to_string()),
            to: to.iter().map(|s| s.to_string()).collect(),
            client_ip: Some("127.0.0.1".to_string()),
            helo: Some("client".to_string()),
        }
    }

    fn ingest_with(
        aliases: Arc<MemoryAliases>,
        messages: Arc<MemoryMessages>,
        dir: &TempDir,
    ) -> MessageIngest {
        MessageIngest::new(
            aliases,
            messages,
            AttachmentStore::new(dir.path()).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_matched_delivery_references_alias_and_bumps_counter() {
        let issued = alias("abc123");
        let aliases = Arc::new(MemoryAliases::new(vec![issued.clone()]));
        let messages = Arc::new(MemoryMessages::default());
        let dir = TempDir::new().unwrap();
        let ingest = ingest_with(aliases.clone(), messages.clone(), &dir);

        let raw = b"Subject: hello\r\n\r\nhi there";
        let stored = ingest
            .deliver(&envelope(&["abc123@drop.example.com"]), raw)
            .await
            .unwrap();

        assert_eq!(stored.alias_id, Some(issued.id));
        assert_eq!(stored.subject, "hello");
        assert_eq!(stored.recipients_vec(), vec!["abc123@drop.example.com"]);
        assert_eq!(aliases.count(issued.id), 1);
    }

    #[tokio::test]
    async fn test_unmatched_delivery_stores_without_alias() {
        let issued = alias("abc123");
        let aliases = Arc::new(MemoryAliases::new(vec![issued.clone()]));
        let messages = Arc::new(MemoryMessages::default());
        let dir = TempDir::new().unwrap();
        let ingest = ingest_with(aliases.clone(), messages.clone(), &dir);

        let stored = ingest
            .deliver(&envelope(&["stranger@drop.example.com"]), b"Subject: x\r\n\r\nbody")
            .await
            .unwrap();

        assert_eq!(stored.alias_id, None);
        assert_eq!(aliases.count(issued.id), 0);
    }

    #[tokio::test]
    async fn test_concurrent_deliveries_count_both() {
        let issued = alias("abc123");
        let aliases = Arc::new(MemoryAliases::new(vec![issued.clone()]));
        let messages = Arc::new(MemoryMessages::default());
        let dir = TempDir::new().unwrap();
        let ingest = Arc::new(ingest_with(aliases.clone(), messages.clone(), &dir));

        let env = envelope(&["abc123@drop.example.com"]);
        let (a, b) = tokio::join!(
            ingest.deliver(&env, b"Subject: one\r\n\r\n1"),
            ingest.deliver(&env, b"Subject: two\r\n\r\n2"),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(aliases.count(issued.id), 2);
    }

    #[tokio::test]
    async fn test_attachments_extracted_to_storage() {
        let aliases = Arc::new(MemoryAliases::new(vec![]));
        let messages = Arc::new(MemoryMessages::default());
        let dir = TempDir::new().unwrap();
        let ingest = ingest_with(aliases, messages, &dir);

        let raw = b"Subject: files\r\n\
            MIME-Version: 1.0\r\n\
            Content-Type: multipart/mixed; boundary=\"sep\"\r\n\
            \r\n\
            --sep\r\n\
            Content-Type: text/plain\r\n\
            \r\n\
            see attached\r\n\
            --sep\r\n\
            Content-Type: application/octet-stream\r\n\
            Content-Disposition: attachment; filename=\"data.bin\"\r\n\
            \r\n\
            payload\r\n\
            --sep--\r\n";

        let stored = ingest
            .deliver(&envelope(&["x@drop.example.com"]), raw)
            .await
            .unwrap();

        let refs = stored.attachment_refs();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].filename, "data.bin");
        assert_eq!(refs[0].size, 7);
        assert!(std::path::Path::new(&refs[0].path).exists());
    }

    #[tokio::test]
    async fn test_failed_attachment_dropped_message_kept() {
        let aliases = Arc::new(MemoryAliases::new(vec![]));
        let messages = Arc::new(MemoryMessages::default());
        let dir = TempDir::new().unwrap();
        let ingest = ingest_with(aliases, messages, &dir);

        // The first filename escapes the storage root and is refused by the
        // store; the delivery keeps the remaining attachment.
        let raw = b"Subject: mixed\r\n\
            MIME-Version: 1.0\r\n\
            Content-Type: multipart/mixed; boundary=\"sep\"\r\n\
            \r\n\
            --sep\r\n\
            Content-Type: application/octet-stream\r\n\
            Content-Disposition: attachment; filename=\"../evil.sh\"\r\n\
            \r\n\
            nope\r\n\
            --sep\r\n\
            Content-Type: application/octet-stream\r\n\
            Content-Disposition: attachment; filename=\"fine.bin\"\r\n\
            \r\n\
            ok\r\n\
            --sep--\r\n";

        let stored = ingest
            .deliver(&envelope(&["x@drop.example.com"]), raw)
            .await
            .unwrap();

        let refs = stored.attachment_refs();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].filename, "fine.bin");
    }

    #[tokio::test]
    async fn test_unparseable_payload_still_stored() {
        let aliases = Arc::new(MemoryAliases::new(vec![]));
        let messages = Arc::new(MemoryMessages::default());
        let dir = TempDir::new().unwrap();
        let ingest = ingest_with(aliases, messages.clone(), &dir);

        let stored = ingest
            .deliver(&envelope(&["x@drop.example.com"]), b"\xc3\x28\r\n\r\nraw noise")
            .await
            .unwrap();

        assert!(stored.body.contains("raw noise"));
        assert_eq!(messages.created.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_insert_failure_propagates_to_caller() {
        let aliases = Arc::new(MemoryAliases::new(vec![]));
        let messages = Arc::new(MemoryMessages {
            created: Mutex::new(Vec::new()),
            fail_inserts: true,
        });
        let dir = TempDir::new().unwrap();
        let ingest = ingest_with(aliases, messages, &dir);

        let result = ingest
            .deliver(&envelope(&["x@drop.example.com"]), b"Subject: x\r\n\r\nbody")
            .await;
        assert!(result.is_err());
    }
}
