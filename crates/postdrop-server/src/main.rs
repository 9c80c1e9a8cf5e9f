//! Postdrop - disposable email receiver entry point

use anyhow::Result;
use postdrop_common::config::Config;
use postdrop_core::{MessageIngest, SmtpServer};
use postdrop_storage::file::AttachmentStore;
use postdrop_storage::repository::{DbAliasRepository, DbMessageRepository};
use postdrop_storage::DatabasePool;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Starting Postdrop mail receiver...");

    let config = Config::load()?;

    let db_pool = DatabasePool::new(&config.database).await?;
    db_pool.migrate().await?;

    let attachments = AttachmentStore::new(&config.storage.path)?;

    let ingest = Arc::new(MessageIngest::new(
        Arc::new(DbAliasRepository::new(db_pool.clone())),
        Arc::new(DbMessageRepository::new(db_pool.clone())),
        attachments,
    ));

    // SMTP listener
    let smtp_server = SmtpServer::new(config.smtp.clone(), ingest);
    info!(
        "Starting SMTP server on {}:{}",
        config.smtp.host, config.smtp.port
    );
    let smtp_handle = tokio::spawn(async move {
        if let Err(e) = smtp_server.run().await {
            tracing::error!("SMTP server error: {}", e);
        }
    });

    // Address issuance / inbox API
    let api_handle = {
        let db_pool = db_pool.clone();
        let domain = config.server.domain.clone();
        let addr = format!("{}:{}", config.api.host, config.api.port);
        tokio::spawn(async move {
            let app = postdrop_api::create_router(db_pool, domain);
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .expect("Failed to bind API server");
            info!("Starting API server on {}", addr);
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("API server error: {}", e);
            }
        })
    };

    info!("Postdrop started successfully");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    smtp_handle.abort();
    api_handle.abort();

    info!("Postdrop shutdown complete");

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,postdrop=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_level(true))
        .with(filter)
        .init();
}
