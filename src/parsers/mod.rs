//! Sender-routed heuristic parsers
//!
//! Every known portal has one parser, picked by a case-insensitive substring match of the
//! sender address against [`ROUTES`] in priority order; anything else goes to the generic
//! fallback. A parser returns `None` when it cannot find the required fields, which the
//! orchestrator counts as a parse error (distinct from triaged noise).

pub mod autoscout24;
pub mod autotrack;
pub mod extract;
pub mod financial;
pub mod generic;
pub mod marktplaats;
pub mod voys;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::decoder::extract_sender_name;
use crate::models::{InboundMessage, InquirySubType, LeadDetails, LeadSource, ParsedLead};

/// Borrowed view of the fields a parser may look at
#[derive(Debug, Clone, Copy)]
pub struct ParseInput<'a> {
    pub plain: &'a str,
    pub html: &'a str,
    pub subject: &'a str,
    /// Sender address (lower-cased)
    pub sender: &'a str,
    /// Display name from the `From` header, when present
    pub sender_name: Option<&'a str>,
    pub reply_to: Option<&'a str>,
}

impl<'a> ParseInput<'a> {
    pub fn from_message(message: &'a InboundMessage) -> Self {
        Self {
            plain: &message.plain_body,
            html: &message.html_body,
            subject: &message.subject,
            sender: &message.sender_email,
            sender_name: extract_sender_name(&message.from),
            reply_to: message.reply_to.as_deref(),
        }
    }
}

pub type ParseFn = fn(&ParseInput<'_>) -> Option<ParsedLead>;

/// One row of the routing table
#[derive(Clone, Copy)]
pub struct Route {
    pub domain: &'static str,
    pub source: LeadSource,
    pub parse: ParseFn,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("domain", &self.domain)
            .field("source", &self.source)
            .finish()
    }
}

/// Priority-ordered routing table; first substring match wins
pub const ROUTES: [Route; 6] = [
    Route {
        domain: "voys.nl",
        source: LeadSource::Voys,
        parse: voys::parse,
    },
    Route {
        domain: "financiallease.nl",
        source: LeadSource::FinancialLease,
        parse: financial::parse,
    },
    Route {
        domain: "autoscout24",
        source: LeadSource::AutoScout24,
        parse: autoscout24::parse,
    },
    Route {
        domain: "marktplaats.nl",
        source: LeadSource::Marktplaats,
        parse: marktplaats::parse,
    },
    Route {
        domain: "autotrack.nl",
        source: LeadSource::AutoTrack,
        parse: autotrack::parse,
    },
    Route {
        domain: "gaspedaal.nl",
        source: LeadSource::AutoTrack,
        parse: autotrack::parse,
    },
];

/// Used for every sender that matches no route
pub const FALLBACK: Route = Route {
    domain: "",
    source: LeadSource::Other,
    parse: generic::parse,
};

/// Dispatches a message to its source parser
#[derive(Debug, Clone)]
pub struct ParserRouter {
    routes: Vec<Route>,
    fallback: Route,
}

impl ParserRouter {
    pub fn new() -> Self {
        Self::with_routes(ROUTES.to_vec(), FALLBACK)
    }

    pub fn with_routes(routes: Vec<Route>, fallback: Route) -> Self {
        Self { routes, fallback }
    }

    /// Route for a sender address
    pub fn route(&self, sender: &str) -> &Route {
        let sender = sender.to_lowercase();
        self.routes
            .iter()
            .find(|route| sender.contains(route.domain))
            .unwrap_or(&self.fallback)
    }

    /// Parse a message with its route's parser
    pub fn parse(&self, input: &ParseInput<'_>) -> (LeadSource, Option<ParsedLead>) {
        let route = self.route(input.sender);
        debug!(
            "Routing {} to {} parser",
            input.sender,
            route.source.as_str()
        );
        (route.source, (route.parse)(input))
    }

    /// Distinct sender domains, for the search allow-list
    pub fn sender_domains(&self) -> Vec<&'static str> {
        let mut domains: Vec<&'static str> = Vec::new();
        for route in &self.routes {
            if !domains.contains(&route.domain) {
                domains.push(route.domain);
            }
        }
        domains
    }
}

impl Default for ParserRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// What a triage rule turns a message into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Noise {
    Ignored,
    IgnoredCall,
}

/// Where in the subject a fragment must appear
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    Prefix,
    Anywhere,
}

/// Subject fragments of known non-lead templates (lower-case)
const TRIAGE_RULES: &[(&str, Anchor, Noise, &str)] = &[
    ("delivery status notification", Anchor::Anywhere, Noise::Ignored, "delivery receipt"),
    ("undeliverable", Anchor::Anywhere, Noise::Ignored, "delivery receipt"),
    ("onbestelbaar", Anchor::Anywhere, Noise::Ignored, "delivery receipt"),
    ("mail delivery failed", Anchor::Anywhere, Noise::Ignored, "delivery receipt"),
    ("read:", Anchor::Prefix, Noise::Ignored, "read receipt"),
    ("gelezen:", Anchor::Prefix, Noise::Ignored, "read receipt"),
    ("leesbevestiging", Anchor::Anywhere, Noise::Ignored, "read receipt"),
    ("dagelijks overzicht", Anchor::Anywhere, Noise::Ignored, "digest"),
    ("weekoverzicht", Anchor::Anywhere, Noise::Ignored, "digest"),
    ("digest", Anchor::Anywhere, Noise::Ignored, "digest"),
    ("heeft je reactie bekeken", Anchor::Anywhere, Noise::Ignored, "reply viewed"),
    ("gesprek beantwoord", Anchor::Anywhere, Noise::IgnoredCall, "call answered"),
    ("beantwoorde oproep", Anchor::Anywhere, Noise::IgnoredCall, "call answered"),
    ("call answered", Anchor::Anywhere, Noise::IgnoredCall, "call answered"),
];

/// Recognise non-lead notification templates by subject
pub fn triage(subject: &str) -> Option<ParsedLead> {
    let subject = subject.trim().to_lowercase();
    TRIAGE_RULES
        .iter()
        .find(|(fragment, anchor, _, _)| match anchor {
            Anchor::Prefix => subject.starts_with(fragment),
            Anchor::Anywhere => subject.contains(fragment),
        })
        .map(|(_, _, noise, reason)| match noise {
            Noise::Ignored => ParsedLead::ignored(*reason),
            Noise::IgnoredCall => ParsedLead::IgnoredCall {
                reason: reason.to_string(),
            },
        })
}

/// First token is the first name, the rest the last name; a lone token is repeated
pub fn split_name(full_name: &str) -> Option<(String, String)> {
    let mut tokens = full_name.split_whitespace();
    let first = tokens.next()?.to_string();
    let rest = tokens.collect::<Vec<_>>().join(" ");
    if rest.is_empty() {
        Some((first.clone(), first))
    } else {
        Some((first, rest))
    }
}

/// Test-drive or callback phrasing in customer text
pub fn detect_sub_type(text: &str) -> Option<InquirySubType> {
    let text = text.to_lowercase();
    if ["proefrit", "test drive", "testrit"]
        .iter()
        .any(|p| text.contains(p))
    {
        Some(InquirySubType::TestDriveRequest)
    } else if ["terugbellen", "bel mij", "bel me", "teruggebeld", "callback"]
        .iter()
        .any(|p| text.contains(p))
    {
        Some(InquirySubType::CallbackRequest)
    } else {
        None
    }
}

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").unwrap());

static PHONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\+31|0031|0)[\s-]?[1-9](?:[\s-]?\d){7,8}").unwrap());

static NO_REPLY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(no-?reply|do-?not-?reply|noreply|notifications?|mailer-daemon|postmaster)[@.+-]")
        .unwrap()
});

/// First email address in `text`, lower-cased
pub fn find_email(text: &str) -> Option<String> {
    EMAIL.find(text).map(|m| m.as_str().to_lowercase())
}

/// Every email address in `text`, lower-cased, in order
pub fn find_emails(text: &str) -> Vec<String> {
    EMAIL
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// First Dutch phone-shaped token in `text`
pub fn find_phone(text: &str) -> Option<String> {
    PHONE.find(text).and_then(|m| clean_phone(m.as_str()))
}

/// Keep digits and a leading `+`; anything shorter than eight digits is not a phone
pub fn clean_phone(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 8 {
        return None;
    }
    if raw.starts_with('+') {
        Some(format!("+{}", digits))
    } else {
        Some(digits)
    }
}

pub fn is_no_reply_address(address: &str) -> bool {
    NO_REPLY.is_match(address)
}

/// Whether an address belongs to one of the routed portals
pub fn is_portal_address(address: &str) -> bool {
    let address = address.to_lowercase();
    ROUTES.iter().any(|route| address.contains(route.domain))
}

/// Customer email: `Reply-To`, then the labelled body field, then a non-relay `From`
pub fn resolve_email(input: &ParseInput<'_>, labelled: Option<&str>) -> Option<String> {
    if let Some(reply_to) = input.reply_to.and_then(find_email) {
        if !is_no_reply_address(&reply_to) {
            return Some(reply_to);
        }
    }
    if let Some(email) = labelled.and_then(find_email) {
        return Some(email);
    }
    find_email(input.sender).filter(|sender| {
        !is_no_reply_address(sender) && !is_portal_address(sender)
    })
}

/// Details with the name split and everything else empty
pub fn details_for(full_name: &str) -> Option<LeadDetails> {
    let (first_name, last_name) = split_name(full_name)?;
    Some(LeadDetails {
        first_name,
        last_name,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(sender: &'a str, subject: &'a str) -> ParseInput<'a> {
        ParseInput {
            plain: "",
            html: "",
            subject,
            sender,
            sender_name: None,
            reply_to: None,
        }
    }

    #[test]
    fn test_route_priority_and_fallback() {
        let router = ParserRouter::new();
        assert_eq!(router.route("noreply@voys.nl").source, LeadSource::Voys);
        assert_eq!(
            router.route("Leads@FinancialLease.nl").source,
            LeadSource::FinancialLease
        );
        assert_eq!(
            router.route("noreply@autoscout24.com").source,
            LeadSource::AutoScout24
        );
        assert_eq!(
            router.route("berichten@mail.marktplaats.nl").source,
            LeadSource::Marktplaats
        );
        assert_eq!(router.route("info@gaspedaal.nl").source, LeadSource::AutoTrack);
        assert_eq!(router.route("klant@gmail.com").source, LeadSource::Other);
    }

    #[test]
    fn test_first_matching_route_wins() {
        fn first(_: &ParseInput<'_>) -> Option<ParsedLead> {
            Some(ParsedLead::ignored("first"))
        }
        fn second(_: &ParseInput<'_>) -> Option<ParsedLead> {
            Some(ParsedLead::ignored("second"))
        }
        let router = ParserRouter::with_routes(
            vec![
                Route {
                    domain: "voys.nl",
                    source: LeadSource::Voys,
                    parse: first,
                },
                Route {
                    domain: ".nl",
                    source: LeadSource::Other,
                    parse: second,
                },
            ],
            FALLBACK,
        );

        let (source, parsed) = router.parse(&input("pbx@voys.nl", ""));
        assert_eq!(source, LeadSource::Voys);
        assert_eq!(parsed, Some(ParsedLead::ignored("first")));
    }

    #[test]
    fn test_sender_domains_are_distinct() {
        let domains = ParserRouter::new().sender_domains();
        assert_eq!(
            domains,
            vec![
                "voys.nl",
                "financiallease.nl",
                "autoscout24",
                "marktplaats.nl",
                "autotrack.nl",
                "gaspedaal.nl"
            ]
        );
    }

    #[test]
    fn test_triage_templates() {
        assert_eq!(
            triage("Delivery Status Notification (Failure)"),
            Some(ParsedLead::ignored("delivery receipt"))
        );
        assert_eq!(
            triage("Gelezen: Uw aanvraag"),
            Some(ParsedLead::ignored("read receipt"))
        );
        assert_eq!(
            triage("Iemand heeft je reactie bekeken"),
            Some(ParsedLead::ignored("reply viewed"))
        );
        assert!(matches!(
            triage("Gesprek beantwoord door Verkoop"),
            Some(ParsedLead::IgnoredCall { .. })
        ));
        assert_eq!(triage("Nieuw bericht over je advertentie: VW Golf"), None);
        assert_eq!(triage("Vraag over thread: onderhoud"), None);
    }

    #[test]
    fn test_split_name() {
        assert_eq!(
            split_name("Jan de Vries"),
            Some(("Jan".to_string(), "de Vries".to_string()))
        );
        assert_eq!(
            split_name("  Cher "),
            Some(("Cher".to_string(), "Cher".to_string()))
        );
        assert_eq!(split_name("   "), None);
    }

    #[test]
    fn test_detect_sub_type() {
        assert_eq!(
            detect_sub_type("Kan ik een proefrit maken?"),
            Some(InquirySubType::TestDriveRequest)
        );
        assert_eq!(
            detect_sub_type("Graag terugbellen na 17:00"),
            Some(InquirySubType::CallbackRequest)
        );
        assert_eq!(detect_sub_type("Is hij nog te koop?"), None);
    }

    #[test]
    fn test_clean_phone() {
        assert_eq!(clean_phone("06-12 34 56 78"), Some("0612345678".to_string()));
        assert_eq!(
            clean_phone("+31 6 1234 5678"),
            Some("+31612345678".to_string())
        );
        assert_eq!(clean_phone("12345"), None);
    }

    #[test]
    fn test_find_phone() {
        assert_eq!(
            find_phone("Bel me op 06 12345678 aub"),
            Some("0612345678".to_string())
        );
        assert_eq!(
            find_phone("Nummer: +31 20 123 4567"),
            Some("+31201234567".to_string())
        );
        assert_eq!(find_phone("Bouwjaar 2019"), None);
    }

    #[test]
    fn test_resolve_email_precedence() {
        let mut parse_input = input("noreply@autotrack.nl", "");
        assert_eq!(
            resolve_email(&parse_input, Some("jan@example.com")),
            Some("jan@example.com".to_string())
        );

        parse_input.reply_to = Some("Jan@Klant.nl");
        assert_eq!(
            resolve_email(&parse_input, Some("jan@example.com")),
            Some("jan@klant.nl".to_string())
        );

        let relay_only = input("berichten@marktplaats.nl", "");
        assert_eq!(resolve_email(&relay_only, None), None);

        let direct = input("piet@bedrijf.nl", "");
        assert_eq!(
            resolve_email(&direct, None),
            Some("piet@bedrijf.nl".to_string())
        );
    }

    #[test]
    fn test_no_reply_addresses() {
        assert!(is_no_reply_address("noreply@autotrack.nl"));
        assert!(is_no_reply_address("no-reply@marktplaats.nl"));
        assert!(is_no_reply_address("mailer-daemon@googlemail.com"));
        assert!(!is_no_reply_address("jan@example.com"));
    }
}
