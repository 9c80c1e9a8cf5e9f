//! SMTP session state machine

use crate::ingest::MessageIngest;
use anyhow::Result;
use postdrop_common::config::SmtpConfig;
use postdrop_common::types::{EmailAddress, Envelope};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, warn};

/// Fixed acknowledgment for a completed payload transfer. Sent even when the
/// downstream pipeline failed; accept-then-best-effort-store is the contract.
const ACCEPTED: &str = "Message accepted for delivery";

/// SMTP session state
#[derive(Debug, Clone, Copy, PartialEq)]
enum SessionState {
    Connected,
    Greeted,
    MailFrom,
    RcptTo,
}

/// One inbound SMTP session
pub struct SmtpSession {
    config: SmtpConfig,
    ingest: Arc<MessageIngest>,
    peer_addr: SocketAddr,
}

impl SmtpSession {
    /// Create a new session
    pub fn new(config: SmtpConfig, ingest: Arc<MessageIngest>, peer_addr: SocketAddr) -> Self {
        Self {
            config,
            ingest,
            peer_addr,
        }
    }

    /// Drive the session over the given stream until QUIT or disconnect
    pub async fn run<S>(self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);
        let mut writer = BufWriter::new(writer);

        let mut state = SessionState::Connected;
        let mut envelope = Envelope {
            from: None,
            to: Vec::new(),
            client_ip: Some(self.peer_addr.ip().to_string()),
            helo: None,
        };

        self.send_response(&mut writer, 220, &format!("{} ESMTP Postdrop", self.config.hostname))
            .await?;

        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                debug!("Client {} disconnected", self.peer_addr);
                break;
            }

            let line = line.trim();
            debug!("SMTP from {}: {}", self.peer_addr, line);

            let (command, args) = parse_command(line);

            match command.to_uppercase().as_str() {
                "HELO" => {
                    envelope.helo = Some(args.to_string());
                    state = SessionState::Greeted;
                    self.send_response(&mut writer, 250, &format!("Hello {}", args))
                        .await?;
                }

                "EHLO" => {
                    envelope.helo = Some(args.to_string());
                    state = SessionState::Greeted;

                    let responses = [
                        format!("{} Hello {}", self.config.hostname, args),
                        format!("SIZE {}", self.config.max_message_size),
                        "8BITMIME".to_string(),
                        "PIPELINING".to_string(),
                    ];

                    for (i, resp) in responses.iter().enumerate() {
                        if i == responses.len() - 1 {
                            self.send_response(&mut writer, 250, resp).await?;
                        } else {
                            self.send_response_continue(&mut writer, 250, resp).await?;
                        }
                    }
                }

                "MAIL" => {
                    if state != SessionState::Greeted {
                        self.send_response(&mut writer, 503, "5.5.1 Bad sequence of commands")
                            .await?;
                        continue;
                    }

                    if let Some(from_addr) = parse_mail_from(args) {
                        envelope.from = from_addr;
                        state = SessionState::MailFrom;
                        self.send_response(&mut writer, 250, "2.1.0 OK").await?;
                    } else {
                        self.send_response(&mut writer, 501, "5.1.7 Bad sender address syntax")
                            .await?;
                    }
                }

                "RCPT" => {
                    if state != SessionState::MailFrom && state != SessionState::RcptTo {
                        self.send_response(&mut writer, 503, "5.5.1 Bad sequence of commands")
                            .await?;
                        continue;
                    }

                    // Any syntactically valid recipient is accepted; whether it
                    // maps to an issued alias is decided after DATA.
                    if let Some(to_addr) = parse_rcpt_to(args) {
                        envelope.to.push(to_addr);
                        state = SessionState::RcptTo;
                        self.send_response(&mut writer, 250, "2.1.5 OK").await?;
                    } else {
                        self.send_response(&mut writer, 501, "5.1.3 Bad recipient address syntax")
                            .await?;
                    }
                }

                "DATA" => {
                    if state != SessionState::RcptTo {
                        self.send_response(&mut writer, 503, "5.5.1 Bad sequence of commands")
                            .await?;
                        continue;
                    }

                    self.send_response(&mut writer, 354, "Start mail input; end with <CRLF>.<CRLF>")
                        .await?;

                    match self.read_data(&mut reader).await {
                        Ok(data) => {
                            if let Err(e) = self.ingest.deliver(&envelope, &data).await {
                                warn!(
                                    peer = %self.peer_addr,
                                    error = %e,
                                    "Delivery pipeline failed; acknowledging anyway"
                                );
                            }
                            self.send_response(&mut writer, 250, ACCEPTED).await?;
                        }
                        Err(e) => {
                            warn!("Failed to read message data from {}: {}", self.peer_addr, e);
                            self.send_response(&mut writer, 451, "4.3.0 Error reading message")
                                .await?;
                        }
                    }

                    // Reset for the next message on this connection
                    state = SessionState::Greeted;
                    envelope.from = None;
                    envelope.to.clear();
                }

                "RSET" => {
                    envelope.from = None;
                    envelope.to.clear();
                    if state != SessionState::Connected {
                        state = SessionState::Greeted;
                    }
                    self.send_response(&mut writer, 250, "2.0.0 OK").await?;
                }

                "NOOP" => {
                    self.send_response(&mut writer, 250, "2.0.0 OK").await?;
                }

                "QUIT" => {
                    self.send_response(&mut writer, 221, "2.0.0 Bye").await?;
                    break;
                }

                "VRFY" => {
                    self.send_response(&mut writer, 252, "2.5.2 Cannot VRFY user")
                        .await?;
                }

                _ => {
                    self.send_response(&mut writer, 500, "5.5.2 Command not recognized")
                        .await?;
                }
            }
        }

        Ok(())
    }

    /// Read message data until <CRLF>.<CRLF>
    async fn read_data<R: tokio::io::AsyncBufRead + Unpin>(
        &self,
        reader: &mut R,
    ) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                return Err(anyhow::anyhow!("Connection closed during DATA"));
            }

            if line.trim_end() == "." {
                break;
            }

            // Dot-stuffing: remove the escaping dot
            let line_bytes = if line.starts_with("..") {
                &line.as_bytes()[1..]
            } else {
                line.as_bytes()
            };

            data.extend_from_slice(line_bytes);

            if data.len() > self.config.max_message_size {
                return Err(anyhow::anyhow!("Message too large"));
            }
        }

        Ok(data)
    }

    /// Send an SMTP response
    async fn send_response<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut BufWriter<W>,
        code: u16,
        message: &str,
    ) -> Result<()> {
        let response = format!("{} {}\r\n", code, message);
        writer.write_all(response.as_bytes()).await?;
        writer.flush().await?;
        debug!("SMTP to {}: {}", self.peer_addr, response.trim());
        Ok(())
    }

    /// Send a multi-line response (intermediate line)
    async fn send_response_continue<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut BufWriter<W>,
        code: u16,
        message: &str,
    ) -> Result<()> {
        let response = format!("{}-{}\r\n", code, message);
        writer.write_all(response.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Parse an SMTP command line into command and arguments
fn parse_command(line: &str) -> (&str, &str) {
    let parts: Vec<&str> = line.splitn(2, ' ').collect();
    (parts.first().unwrap_or(&""), parts.get(1).unwrap_or(&""))
}

/// Parse MAIL FROM:<address>; outer None is a syntax error, inner None the
/// null sender
fn parse_mail_from(args: &str) -> Option<Option<String>> {
    let args = args.trim();

    let addr_part = if args.to_uppercase().starts_with("FROM:") {
        &args[5..]
    } else {
        return None;
    };

    let addr_part = addr_part.trim();

    if addr_part == "<>" {
        return Some(None);
    }

    let email = extract_address(addr_part)?;

    if email.is_empty() {
        Some(None)
    } else {
        EmailAddress::parse(email).map(|_| Some(email.to_string()))
    }
}

/// Parse RCPT TO:<address>
fn parse_rcpt_to(args: &str) -> Option<String> {
    let args = args.trim();

    let addr_part = if args.to_uppercase().starts_with("TO:") {
        &args[3..]
    } else {
        return None;
    };

    let email = extract_address(addr_part.trim())?;
    EmailAddress::parse(email).map(|_| email.to_string())
}

/// Extract the address from optional angle brackets
fn extract_address(addr_part: &str) -> Option<&str> {
    if addr_part.starts_with('<') && addr_part.contains('>') {
        let end = addr_part.find('>')?;
        Some(&addr_part[1..end])
    } else {
        addr_part.split_whitespace().next()
    }
}
