//! MIME payload decoding
//!
//! Turns raw DATA bytes into a structured record. Decoding never fails: when
//! the structured parse yields nothing, the whole payload is taken as UTF-8
//! text with invalid sequences replaced.

use mail_parser::{MessagePart, MessageParser, MimeHeaders, PartType};

/// Structured result of decoding one payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedMessage {
    /// Protocol Message-ID header, empty when absent
    pub message_id: String,
    pub subject: String,
    /// Header name/value pairs in original order, folding collapsed
    pub headers: Vec<(String, String)>,
    pub body: String,
    /// Attachment candidates in encounter order
    pub attachments: Vec<AttachmentData>,
}

/// One attachment candidate: original filename plus decoded bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentData {
    pub filename: String,
    pub data: Vec<u8>,
}

/// Decode a raw payload into a structured record
pub fn decode(raw: &[u8]) -> DecodedMessage {
    match MessageParser::default().parse(raw) {
        Some(parsed) => {
            let message_id = parsed.message_id().unwrap_or_default().to_string();
            let subject = parsed.subject().unwrap_or_default().to_string();

            let mut headers = Vec::new();
            for header in parsed.headers() {
                let value_raw =
                    &parsed.raw_message[header.offset_start as usize..header.offset_end as usize];
                let value = String::from_utf8_lossy(value_raw)
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ");
                headers.push((header.name.as_str().to_string(), value));
            }

            let mut body: Option<String> = None;
            let mut attachments = Vec::new();

            if parsed
                .parts
                .first()
                .is_some_and(|root| matches!(root.body, PartType::Multipart(_)))
            {
                // Walk leaf parts in document order. Any part carrying a
                // filename is an attachment candidate regardless of content
                // type; the first filename-less plain-text part is the body.
                for part in &parsed.parts {
                    if matches!(part.body, PartType::Multipart(_)) {
                        continue;
                    }

                    if let Some(filename) = part.attachment_name() {
                        attachments.push(AttachmentData {
                            filename: filename.to_string(),
                            data: part.contents().to_vec(),
                        });
                    } else if body.is_none() && is_plain_text(part) {
                        body = Some(part_text(part));
                    }
                }
            } else if let Some(root) = parsed.parts.first() {
                // Single-part payload: the decoded content is the body
                body = Some(part_text(root));
            }

            DecodedMessage {
                message_id,
                subject,
                headers,
                body: body.unwrap_or_default(),
                attachments,
            }
        }
        None => DecodedMessage {
            body: String::from_utf8_lossy(raw).into_owned(),
            ..Default::default()
        },
    }
}

fn is_plain_text(part: &MessagePart) -> bool {
    match part.content_type() {
        Some(ct) => {
            ct.ctype().eq_ignore_ascii_case("text")
                && ct
                    .subtype()
                    .map_or(true, |s| s.eq_ignore_ascii_case("plain"))
        }
        None => matches!(part.body, PartType::Text(_)),
    }
}

fn part_text(part: &MessagePart) -> String {
    part.text_contents()
        .map(str::to_string)
        .unwrap_or_else(|| String::from_utf8_lossy(part.contents()).into_owned())
}
