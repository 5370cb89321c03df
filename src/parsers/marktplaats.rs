//! Marktplaats "new message about your listing" notifications

use once_cell::sync::Lazy;
use regex::Regex;

use super::extract::FieldExtractor;
use super::{clean_phone, detect_sub_type, details_for, find_phone, resolve_email, triage, ParseInput};
use crate::models::ParsedLead;

static LISTING_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https?://(?:www\.|link\.)?marktplaats\.nl/(?:v|a)/[^\s"'<>]+"#).unwrap()
});

static LISTING_SUBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)over (?:je|jouw|uw) advertentie:?\s*(.+?)\s*$").unwrap());

static RELAY_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+(?:via|namens)\s+marktplaats.*$").unwrap());

const MESSAGE_START: &[&str] = &["Bericht:"];
const MESSAGE_END: &[&str] = &[
    "Beantwoord dit bericht",
    "Met vriendelijke groet",
    "Marktplaats B.V.",
];

pub fn parse(input: &ParseInput<'_>) -> Option<ParsedLead> {
    if let Some(noise) = triage(input.subject) {
        return Some(noise);
    }

    let fields = FieldExtractor::new(input.plain, input.html);

    let name = fields
        .field(&["Naam", "Van"])
        .or_else(|| {
            input
                .sender_name
                .map(|name| RELAY_SUFFIX.replace(name, "").trim().to_string())
        })
        .filter(|name| !name.is_empty())?;
    let mut details = details_for(&name)?;

    let labelled_email = fields.field(&["E-mail", "E-mailadres"]);
    details.email = Some(resolve_email(input, labelled_email.as_deref())?);

    details.clean_message = fields.isolate_message(MESSAGE_START, MESSAGE_END);
    details.phone = fields
        .field(&["Telefoon", "Telefoonnummer"])
        .and_then(|phone| clean_phone(&phone))
        .or_else(|| details.clean_message.as_deref().and_then(find_phone));

    details.vehicle = LISTING_SUBJECT
        .captures(input.subject)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .or_else(|| fields.field(&["Advertentie"]));
    details.vehicle_url = fields.link_matching(&LISTING_URL);
    details.sub_type = details.clean_message.as_deref().and_then(detect_sub_type);

    Some(ParsedLead::Contact(details))
}
