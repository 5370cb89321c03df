//! AutoScout24 dealer inquiries, optionally with an "Inruilvoertuig" block

use once_cell::sync::Lazy;
use regex::Regex;

use super::extract::{isolate_between, FieldExtractor};
use super::{clean_phone, detect_sub_type, details_for, resolve_email, triage, ParseInput};
use crate::models::{ParsedLead, TradeIn};

static LISTING_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"https?://(?:www\.)?autoscout24\.(?:nl|com|de|be)/(?:aanbod|angebote|offers|lst)/[^\s"'<>]+"#,
    )
    .unwrap()
});

static SUBJECT_VEHICLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:aanvraag|vraag|interesse)\s+(?:voor|over)\s*:?\s*(.+?)\s*$").unwrap());

const MESSAGE_START: &[&str] = &["Bericht van de klant:", "Bericht:"];
const MESSAGE_END: &[&str] = &[
    "Inruilvoertuig",
    "Met vriendelijke groet",
    "AutoScout24 GmbH",
];

const TRADE_IN_START: &[&str] = &["Inruilvoertuig"];
const TRADE_IN_END: &[&str] = &["Met vriendelijke groet", "AutoScout24 GmbH"];

pub fn parse(input: &ParseInput<'_>) -> Option<ParsedLead> {
    if let Some(noise) = triage(input.subject) {
        return Some(noise);
    }

    let fields = FieldExtractor::new(input.plain, input.html);

    let name = fields.field(&["Naam", "Name"])?;
    let mut details = details_for(&name)?;
    let labelled_email = fields.field(&["E-mail", "E-mailadres", "Email"]);
    details.email = Some(resolve_email(input, labelled_email.as_deref())?);
    details.phone = fields
        .field(&["Telefoon", "Telefoonnummer"])
        .and_then(|phone| clean_phone(&phone));
    details.vehicle = fields.field(&["Voertuig"]).or_else(|| {
        SUBJECT_VEHICLE
            .captures(input.subject)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    });
    details.vehicle_url = fields.link_matching(&LISTING_URL);
    details.clean_message = fields.isolate_message(MESSAGE_START, MESSAGE_END);
    details.sub_type = details
        .clean_message
        .as_deref()
        .and_then(detect_sub_type)
        .or_else(|| detect_sub_type(input.subject));

    match trade_in(&fields) {
        Some(trade_in) => Some(ParsedLead::TradeIn { details, trade_in }),
        None => Some(ParsedLead::Contact(details)),
    }
}

/// Fields of the trade-in section, read from that section only
fn trade_in(fields: &FieldExtractor) -> Option<TradeIn> {
    let section = isolate_between(fields.text(), TRADE_IN_START, TRADE_IN_END)?;
    let section = FieldExtractor::new(&section, "");

    Some(TradeIn {
        plate: section.field(&["Kenteken"])?,
        mileage: section.field(&["Kilometerstand"]).unwrap_or_default(),
        condition: section.field(&["Staat"]),
        remarks: section.field(&["Opmerkingen"]),
    })
}
