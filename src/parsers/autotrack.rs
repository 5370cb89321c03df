//! AutoTrack and Gaspedaal contact forms
//!
//! Both portals send the same labelled-field template; a filled-in "Kenteken" means the
//! customer offered a car in trade.

use once_cell::sync::Lazy;
use regex::Regex;

use super::extract::FieldExtractor;
use super::{clean_phone, detect_sub_type, details_for, resolve_email, triage, ParseInput};
use crate::models::{ParsedLead, TradeIn};

static LISTING_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https?://(?:www\.)?(?:autotrack|gaspedaal)\.nl/(?:occasions?|aanbod|auto)/[^\s"'<>]+"#)
        .unwrap()
});

const MESSAGE_START: &[&str] = &["Bericht:", "Opmerking:", "Vraag:"];
const MESSAGE_END: &[&str] = &[
    "Met vriendelijke groet",
    "Dit bericht is verstuurd via",
    "AutoTrack B.V.",
    "Gaspedaal.nl",
];

pub fn parse(input: &ParseInput<'_>) -> Option<ParsedLead> {
    if let Some(noise) = triage(input.subject) {
        return Some(noise);
    }

    let fields = FieldExtractor::new(input.plain, input.html);

    let name = fields.field(&["Naam", "Name"])?;
    let mut details = details_for(&name)?;
    let labelled_email = fields.field(&["E-Mailadres", "E-mail", "Email"]);
    details.email = Some(resolve_email(input, labelled_email.as_deref())?);
    details.phone = fields
        .field(&["Telefoonnummer", "Telefoon"])
        .and_then(|phone| clean_phone(&phone));
    details.vehicle = fields.field(&["Voertuig", "Advertentie", "Auto"]);
    details.vehicle_url = fields.link_matching(&LISTING_URL);
    details.clean_message = fields.isolate_message(MESSAGE_START, MESSAGE_END);
    details.sub_type = details
        .clean_message
        .as_deref()
        .and_then(detect_sub_type)
        .or_else(|| detect_sub_type(input.subject));

    match fields.field(&["Kenteken"]) {
        Some(plate) => Some(ParsedLead::TradeIn {
            details,
            trade_in: TradeIn {
                plate,
                mileage: fields.field(&["Kilometerstand"]).unwrap_or_default(),
                condition: fields.field(&["Staat", "Conditie"]),
                remarks: fields.field(&["Toelichting inruil", "Opmerkingen inruil"]),
            },
        }),
        None => Some(ParsedLead::Contact(details)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InquirySubType, LeadDetails};

    fn input<'a>(plain: &'a str, html: &'a str, subject: &'a str) -> ParseInput<'a> {
        ParseInput {
            plain,
            html,
            subject,
            sender: "noreply@autotrack.nl",
            sender_name: Some("AutoTrack"),
            reply_to: None,
        }
    }

    #[test]
    fn test_trade_in_fixture() {
        let body = "Naam: Jan de Vries\n\
                    E-Mailadres: jan@example.com\n\
                    Telefoonnummer: 0612345678\n\
                    Kenteken: AB-123-C\n\
                    Kilometerstand: 45000 km\n";

        let parsed = parse(&input(body, "", "Nieuwe inruilaanvraag")).unwrap();

        assert_eq!(
            parsed,
            ParsedLead::TradeIn {
                details: LeadDetails {
                    first_name: "Jan".to_string(),
                    last_name: "de Vries".to_string(),
                    email: Some("jan@example.com".to_string()),
                    phone: Some("0612345678".to_string()),
                    ..Default::default()
                },
                trade_in: TradeIn {
                    plate: "AB-123-C".to_string(),
                    mileage: "45000 km".to_string(),
                    condition: None,
                    remarks: None,
                },
            }
        );
    }

    #[test]
    fn test_contact_from_html_with_listing_link() {
        let html = r#"<table>
            <tr><td>Naam</td><td>Sanne Bakker</td></tr>
            <tr><td>E-mail</td><td>sanne@example.nl</td></tr>
            <tr><td>Telefoon</td><td>06-98 76 54 32</td></tr>
            <tr><td>Voertuig</td><td>Toyota Yaris 1.5 Hybrid</td></tr>
            </table>
            <p>Bericht: Wanneer kan ik een proefrit maken?</p>
            <p>Met vriendelijke groet, AutoTrack</p>
            <a href="https://www.autotrack.nl/occasions/toyota-yaris-12345">Bekijk</a>"#;

        let parsed = parse(&input("", html, "Reactie op uw advertentie")).unwrap();
        let ParsedLead::Contact(details) = parsed else {
            panic!("expected contact, got {:?}", parsed);
        };

        assert_eq!(details.first_name, "Sanne");
        assert_eq!(details.last_name, "Bakker");
        assert_eq!(details.email.as_deref(), Some("sanne@example.nl"));
        assert_eq!(details.phone.as_deref(), Some("0698765432"));
        assert_eq!(details.vehicle.as_deref(), Some("Toyota Yaris 1.5 Hybrid"));
        assert_eq!(
            details.vehicle_url.as_deref(),
            Some("https://www.autotrack.nl/occasions/toyota-yaris-12345")
        );
        assert_eq!(
            details.clean_message.as_deref(),
            Some("Wanneer kan ik een proefrit maken?")
        );
        assert_eq!(details.sub_type, Some(InquirySubType::TestDriveRequest));
    }

    #[test]
    fn test_missing_email_is_parse_failure() {
        assert_eq!(parse(&input("Naam: Jan de Vries\n", "", "Aanvraag")), None);
    }

    #[test]
    fn test_missing_name_is_parse_failure() {
        assert_eq!(
            parse(&input("E-mail: jan@example.com\n", "", "Aanvraag")),
            None
        );
    }

    #[test]
    fn test_read_receipt_is_ignored() {
        let parsed = parse(&input("", "", "Gelezen: Uw aanvraag")).unwrap();
        assert!(parsed.is_ignored());
    }
}
