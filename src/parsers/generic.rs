//! Fallback for senders without a dedicated parser
//!
//! Only an email address is required. New portals should get their own parser rather
//! than more heuristics here.

use once_cell::sync::Lazy;
use regex::Regex;

use super::extract::{collapse_blank_lines, FieldExtractor};
use super::{
    detect_sub_type, details_for, find_emails, find_phone, is_no_reply_address, triage, ParseInput,
};
use crate::models::ParsedLead;

static SUBJECT_VEHICLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:interesse in|informatie over|vraag over|aanvraag voor|betreft)\s*:?\s*(.+?)\s*$")
        .unwrap()
});

static REPLY_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:\s*(?:re|fw|fwd|antw|doorst)\s*:\s*)+").unwrap());

const MESSAGE_START: &[&str] = &["Bericht:", "Message:", "Opmerking:", "Vraag:"];
const MESSAGE_END: &[&str] = &["Met vriendelijke groet", "Kind regards", "Verzonden vanaf"];

pub fn parse(input: &ParseInput<'_>) -> Option<ParsedLead> {
    if let Some(noise) = triage(input.subject) {
        return Some(noise);
    }

    let fields = FieldExtractor::new(input.plain, input.html);

    let email = input
        .reply_to
        .into_iter()
        .map(str::to_string)
        .chain(find_emails(fields.text()))
        .chain(std::iter::once(input.sender.to_string()))
        .map(|candidate| candidate.to_lowercase())
        .find(|candidate| candidate.contains('@') && !is_no_reply_address(candidate))?;

    let name = fields
        .field(&["Naam", "Name"])
        .or_else(|| input.sender_name.map(str::to_string))
        .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());

    let mut details = details_for(&name)?;
    details.email = Some(email);
    details.phone = find_phone(fields.text());
    details.vehicle = vehicle_from_subject(input.subject);
    details.clean_message = fields
        .isolate_message(MESSAGE_START, MESSAGE_END)
        .or_else(|| Some(collapse_blank_lines(fields.text())).filter(|text| !text.is_empty()));
    details.sub_type = details.clean_message.as_deref().and_then(detect_sub_type);

    Some(ParsedLead::Contact(details))
}

/// Best guess at the vehicle a free-form subject is about
pub fn vehicle_from_subject(subject: &str) -> Option<String> {
    let subject = REPLY_PREFIX.replace(subject, "");
    SUBJECT_VEHICLE
        .captures(&subject)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|vehicle| !vehicle.is_empty())
}
