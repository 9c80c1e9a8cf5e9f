//! Repository layer for data access

pub mod aliases;
pub mod messages;

// Re-export repository traits and concrete implementations
pub use aliases::{AliasRepository, DbAliasRepository};
pub use messages::{DbMessageRepository, MessageRepository};
