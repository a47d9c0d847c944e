//! RFC 822 / MIME parsing shared by every transport

use chrono::{DateTime, Local, NaiveDateTime};
use mailparse::{DispositionType, MailAddr, MailHeaderMap, ParsedMail};
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::models::{Attachment, Message};

/// Headers needed to order and window a message without decoding its body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderSummary {
    pub message_id: Option<String>,
    pub date: Option<NaiveDateTime>,
}

/// Convert epoch seconds to local wall-clock time
pub fn local_from_epoch(seconds: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp(seconds, 0).map(|utc| utc.with_timezone(&Local).naive_local())
}

/// Parse an RFC 2822 `Date` header into local wall-clock time.
///
/// Strict RFC 2822 first, then the lenient `mailparse` parser for legacy
/// formats. The lenient parser yields 0 for text it cannot read, so a zero
/// result is treated as unparseable.
pub fn parse_date_header(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc2822(value) {
        return Some(parsed.with_timezone(&Local).naive_local());
    }
    mailparse::dateparse(value)
        .ok()
        .filter(|seconds| *seconds != 0)
        .and_then(local_from_epoch)
}

pub fn summarize_headers(raw: &[u8]) -> Result<HeaderSummary> {
    let (headers, _) = mailparse::parse_headers(raw)
        .map_err(|e| IngestError::InvalidMessageFormat(format!("unreadable headers: {}", e)))?;

    Ok(HeaderSummary {
        message_id: headers
            .get_first_value("Message-ID")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()),
        date: headers
            .get_first_value("Date")
            .and_then(|v| parse_date_header(&v)),
    })
}

/// First mailbox address in a `From` header, falling back to the raw value
pub fn sender_address(value: &str) -> String {
    if let Ok(list) = mailparse::addrparse(value) {
        for address in list.into_inner() {
            match address {
                MailAddr::Single(single) => return single.addr,
                MailAddr::Group(group) => {
                    if let Some(single) = group.addrs.into_iter().next() {
                        return single.addr;
                    }
                }
            }
        }
    }
    value.trim().to_string()
}

/// Parse a full message.
///
/// `received` overrides the `Date` header (IMAP INTERNALDATE, store order);
/// without either, the message is rejected.
pub fn parse_message(
    raw: &[u8],
    fallback_id: &str,
    received: Option<NaiveDateTime>,
) -> Result<Message> {
    let parsed = mailparse::parse_mail(raw).map_err(|e| {
        IngestError::InvalidMessageFormat(format!("{}: broken MIME: {}", fallback_id, e))
    })?;
    let headers = parsed.headers.as_slice();

    let id = headers
        .get_first_value("Message-ID")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| fallback_id.to_string());

    let received = match received {
        Some(ts) => ts,
        None => headers
            .get_first_value("Date")
            .and_then(|v| parse_date_header(&v))
            .ok_or_else(|| {
                IngestError::InvalidMessageFormat(format!("{}: missing or invalid Date", id))
            })?,
    };

    let sender = headers
        .get_first_value("From")
        .map(|v| sender_address(&v))
        .unwrap_or_default();
    let subject = headers.get_first_value("Subject").unwrap_or_default();

    let mut message = Message {
        id,
        sender,
        subject,
        received,
        attachments: Vec::new(),
    };

    let origin = message.origin();
    let mut attachments = Vec::new();
    collect_attachments(&parsed, &mut |filename, content| {
        attachments.push(Attachment::new(filename, content, origin.clone()));
    })?;
    message.attachments = attachments;

    Ok(message)
}

fn collect_attachments(
    part: &ParsedMail<'_>,
    sink: &mut dyn FnMut(String, Vec<u8>),
) -> Result<()> {
    if !part.subparts.is_empty() {
        for subpart in &part.subparts {
            collect_attachments(subpart, sink)?;
        }
        return Ok(());
    }

    let disposition = part.get_content_disposition();
    let filename = disposition
        .params
        .get("filename")
        .cloned()
        .or_else(|| part.ctype.params.get("name").cloned());

    let Some(filename) = filename else {
        if matches!(disposition.disposition, DispositionType::Attachment) {
            debug!("Skipping attachment part without a file name");
        }
        return Ok(());
    };

    let content = part.get_body_raw().map_err(|e| {
        IngestError::InvalidMessageFormat(format!("attachment '{}' unreadable: {}", filename, e))
    })?;
    sink(filename, content);
    Ok(())
}
