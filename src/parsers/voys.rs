//! Telephony notifications: missed calls become phone-only leads

use once_cell::sync::Lazy;
use regex::Regex;

use super::extract::FieldExtractor;
use super::{clean_phone, details_for, find_phone, triage, ParseInput};
use crate::models::ParsedLead;

/// Name given to a caller the notification does not identify
pub const UNKNOWN_CALLER: &str = "Onbekende beller";

/// "Gemiste oproep van 0612345678 - Peugeot 208"
static MISSED_CALL_SUBJECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:gemiste oproep|missed call)\s+(?:van|from)\s+(\+?[\d][\d\s-]{6,}\d)(?:\s*-\s*(.+?))?\s*$")
        .unwrap()
});

pub fn parse(input: &ParseInput<'_>) -> Option<ParsedLead> {
    if let Some(noise) = triage(input.subject) {
        return Some(noise);
    }

    let fields = FieldExtractor::new(input.plain, input.html);
    let subject = MISSED_CALL_SUBJECT.captures(input.subject);

    let phone = subject
        .as_ref()
        .and_then(|caps| caps.get(1))
        .and_then(|m| clean_phone(m.as_str()))
        .or_else(|| {
            fields
                .field(&["Nummer", "Telefoonnummer", "Beller"])
                .and_then(|value| clean_phone(&value))
        })
        .or_else(|| find_phone(fields.text()))?;

    let name = fields
        .field(&["Naam", "Contact"])
        .filter(|name| clean_phone(name).is_none())
        .unwrap_or_else(|| UNKNOWN_CALLER.to_string());

    let mut details = details_for(&name)?;
    details.phone = Some(phone);
    details.vehicle = subject
        .as_ref()
        .and_then(|caps| caps.get(2))
        .map(|m| m.as_str().to_string())
        .or_else(|| fields.field(&["Voertuig", "Onderwerp"]));

    Some(ParsedLead::MissedCall(details))
}
