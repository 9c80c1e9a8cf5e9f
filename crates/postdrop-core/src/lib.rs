//! Postdrop Core - SMTP listener and mail ingestion pipeline
//!
//! This crate receives inbound mail sessions, decodes MIME payloads into
//! structured records, resolves envelope recipients to issued aliases,
//! extracts attachments to file storage, and persists the result.

pub mod ingest;
pub mod matcher;
pub mod mime;
pub mod smtp;

pub use ingest::MessageIngest;
pub use mime::{AttachmentData, DecodedMessage};
pub use smtp::SmtpServer;
