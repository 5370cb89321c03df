//! Turns a fetched [`RawMessage`] into an [`InboundMessage`]
//!
//! Bodies are collected depth-first: every `text/plain` leaf is appended to the plain
//! accumulator and every `text/html` leaf to the html accumulator, in traversal order.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::error::{IngestError, Result};
use crate::models::{InboundMessage, MessagePart, RawMessage};

static EMAIL_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<?([a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,})>?").unwrap()
});

/// Decode a full message: headers from the top-level payload, bodies from the whole tree
pub fn decode_message(raw: &RawMessage) -> Result<InboundMessage> {
    let payload = raw.payload.as_ref().ok_or_else(|| {
        IngestError::InvalidMessageFormat(format!("Message {} has no payload", raw.id))
    })?;

    let headers = get_headers_map(payload);
    let header = |name: &str| headers.get(&name.to_lowercase()).cloned().unwrap_or_default();

    let from = header("From");
    let sender_email = extract_sender_email(&from).unwrap_or_default();
    let reply_to = headers
        .get("reply-to")
        .and_then(|value| extract_sender_email(value));

    let received_at = headers
        .get("date")
        .and_then(|date| parse_email_date(date))
        .or(raw.internal_date)
        .unwrap_or_else(Utc::now);

    let (plain_body, html_body) = collect_bodies(payload)?;

    Ok(InboundMessage {
        id: raw.id.clone(),
        thread_id: raw.thread_id.clone(),
        from,
        sender_email,
        reply_to,
        to: header("To"),
        subject: header("Subject"),
        received_at,
        plain_body,
        html_body,
    })
}

/// Walk the part tree and return `(plain, html)`
pub fn collect_bodies(root: &MessagePart) -> Result<(String, String)> {
    let mut plain = String::new();
    let mut html = String::new();
    collect_into(root, &mut plain, &mut html)?;
    Ok((plain, html))
}

fn collect_into(part: &MessagePart, plain: &mut String, html: &mut String) -> Result<()> {
    let mime_type = part
        .mime_type
        .as_deref()
        .unwrap_or("")
        .to_ascii_lowercase();

    if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) {
        if !data.is_empty() {
            if mime_type.starts_with("text/plain") {
                plain.push_str(&decode_part_data(data)?);
            } else if mime_type.starts_with("text/html") {
                html.push_str(&decode_part_data(data)?);
            }
        }
    }

    for child in part.parts.iter().flatten() {
        collect_into(child, plain, html)?;
    }
    Ok(())
}

/// Decode base64url body data by first normalising it to the standard alphabet
pub fn decode_part_data(data: &str) -> Result<String> {
    let mut normalized: String = data
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    while normalized.len() % 4 != 0 {
        normalized.push('=');
    }

    let bytes = STANDARD
        .decode(normalized.as_bytes())
        .map_err(|e| IngestError::InvalidMessageFormat(format!("Invalid body encoding: {}", e)))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Get the part's headers as a lower-cased name → value map
pub fn get_headers_map(part: &MessagePart) -> HashMap<String, String> {
    let mut headers = HashMap::new();

    for header in part.headers.iter().flatten() {
        if let (Some(name), Some(value)) = (&header.name, &header.value) {
            headers
                .entry(name.to_lowercase())
                .or_insert_with(|| value.clone());
        }
    }

    headers
}

/// Extract email address from a From / Reply-To header
pub fn extract_sender_email(header: &str) -> Option<String> {
    EMAIL_ADDRESS
        .captures(header)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_lowercase())
}

/// Extract sender name from From header
pub fn extract_sender_name(from_header: &str) -> Option<&str> {
    let pos = from_header.find('<')?;
    let name = from_header[..pos].trim().trim_matches('"').trim();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Parse email date header
pub fn parse_email_date(date_str: &str) -> Option<DateTime<Utc>> {
    // Some relays append a zone comment: "... +0100 (CET)"
    let trimmed = match date_str.find(" (") {
        Some(pos) => &date_str[..pos],
        None => date_str,
    };

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed.trim()) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed.trim()) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}
