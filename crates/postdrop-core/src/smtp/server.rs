//! SMTP server accept loop

use crate::ingest::MessageIngest;
use crate::smtp::SmtpSession;
use anyhow::Result;
use postdrop_common::config::SmtpConfig;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// SMTP server
///
/// Every accepted connection becomes an independent session task. There is no
/// connection cap or backpressure: unlimited concurrent sessions are accepted,
/// a documented limitation of the service.
pub struct SmtpServer {
    config: SmtpConfig,
    ingest: Arc<MessageIngest>,
}

impl SmtpServer {
    /// Create a new SMTP server
    pub fn new(config: SmtpConfig, ingest: Arc<MessageIngest>) -> Self {
        Self { config, ingest }
    }

    /// Run the accept loop
    pub async fn run(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;

        info!("SMTP server listening on {}", addr);

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let session =
                        SmtpSession::new(self.config.clone(), self.ingest.clone(), peer_addr);

                    // A failed session only affects itself
                    tokio::spawn(async move {
                        if let Err(e) = session.run(stream).await {
                            error!("SMTP session error from {}: {}", peer_addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}
