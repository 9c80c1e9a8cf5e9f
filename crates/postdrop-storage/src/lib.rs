//! Postdrop Storage - Database and file storage abstraction
//!
//! This crate provides the durable side of Postdrop: the alias and message
//! tables behind the ingestion pipeline, and the filesystem store that holds
//! extracted attachment files.

pub mod db;
pub mod file;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use file::{AttachmentStore, FileStorage, LocalStorage};
pub use models::*;
pub use repository::*;
