//! Postdrop API - address issuance and inbox query surface
//!
//! JSON endpoints for generating disposable addresses and reading the
//! messages delivered to them. The ingestion pipeline itself lives in
//! `postdrop-core`; this crate only creates alias records and reads what the
//! pipeline stored.

pub mod handlers;
pub mod routes;

pub use routes::create_router;
