//! Financing partner lead forms (business lease applications)

use super::extract::FieldExtractor;
use super::{clean_phone, detect_sub_type, details_for, resolve_email, triage, ParseInput};
use crate::models::ParsedLead;

const MESSAGE_START: &[&str] = &["Opmerking:", "Opmerkingen:", "Bericht:"];
const MESSAGE_END: &[&str] = &["Met vriendelijke groet", "FinancialLease.nl"];

pub fn parse(input: &ParseInput<'_>) -> Option<ParsedLead> {
    if let Some(noise) = triage(input.subject) {
        return Some(noise);
    }

    let fields = FieldExtractor::new(input.plain, input.html);

    let name = fields.field(&["Contactpersoon", "Naam"])?;
    let mut details = details_for(&name)?;
    let labelled_email = fields.field(&["E-mail", "E-mailadres"]);
    details.email = Some(resolve_email(input, labelled_email.as_deref())?);
    details.phone = fields
        .field(&["Telefoon", "Telefoonnummer"])
        .and_then(|phone| clean_phone(&phone));
    details.vehicle = fields.field(&["Voertuig", "Object"]);
    details.vehicle_url = fields
        .field(&["Link", "Advertentie"])
        .filter(|link| link.starts_with("http"));
    details.clean_message = fields.isolate_message(MESSAGE_START, MESSAGE_END);
    details.sub_type = details.clean_message.as_deref().and_then(detect_sub_type);

    Some(ParsedLead::FinancialLead {
        details,
        company_name: fields.field(&["Bedrijfsnaam", "Bedrijf"]),
    })
}
