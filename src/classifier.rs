//! Lead classification with an ordered, first-match-wins rule table

use crate::models::{
    Classification, InquirySubType, Intent, LeadTag, ParsedLead, Temperature, Urgency,
};

/// One row of the rule table
pub struct ClassificationRule {
    pub name: &'static str,
    pub matches: fn(&ParsedLead) -> bool,
    pub temperature: Temperature,
    pub tag: LeadTag,
}

fn sub_type(lead: &ParsedLead) -> Option<InquirySubType> {
    lead.details().and_then(|details| details.sub_type)
}

/// Evaluated top to bottom; the final rule matches everything
pub static RULES: &[ClassificationRule] = &[
    ClassificationRule {
        name: "financial lead",
        matches: |lead| matches!(lead, ParsedLead::FinancialLead { .. }),
        temperature: Temperature::Hot,
        tag: LeadTag::FinancialApproved,
    },
    ClassificationRule {
        name: "test drive",
        matches: |lead| sub_type(lead) == Some(InquirySubType::TestDriveRequest),
        temperature: Temperature::Hot,
        tag: LeadTag::TestDriveRequest,
    },
    ClassificationRule {
        name: "trade-in",
        matches: |lead| matches!(lead, ParsedLead::TradeIn { .. }),
        temperature: Temperature::Hot,
        tag: LeadTag::TradeInRequest,
    },
    ClassificationRule {
        name: "callback",
        matches: |lead| sub_type(lead) == Some(InquirySubType::CallbackRequest),
        temperature: Temperature::Warm,
        tag: LeadTag::CallbackRequest,
    },
    ClassificationRule {
        name: "vehicle inquiry",
        matches: |lead| matches!(lead, ParsedLead::Contact(details) if details.vehicle.is_some()),
        temperature: Temperature::Warm,
        tag: LeadTag::VehicleInquiry,
    },
    ClassificationRule {
        name: "general inquiry",
        matches: |lead| matches!(lead, ParsedLead::Contact(details) if details.vehicle.is_none()),
        temperature: Temperature::Warm,
        tag: LeadTag::GeneralInquiry,
    },
    ClassificationRule {
        name: "missed call",
        matches: |lead| matches!(lead, ParsedLead::MissedCall(_)),
        temperature: Temperature::Cold,
        tag: LeadTag::MissedCall,
    },
    ClassificationRule {
        name: "ignored",
        matches: |lead| {
            matches!(
                lead,
                ParsedLead::Ignored { .. } | ParsedLead::IgnoredCall { .. }
            )
        },
        temperature: Temperature::Ice,
        tag: LeadTag::Ignored,
    },
];

/// Used when no rule matches
const DEFAULT_RULE: (Temperature, LeadTag) = (Temperature::Warm, LeadTag::GeneralInquiry);

#[derive(Debug, Clone, Copy, Default)]
pub struct LeadClassifier;

impl LeadClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a parsed lead
    pub fn classify(&self, lead: &ParsedLead) -> Classification {
        apply_rules(RULES, lead)
    }
}

/// Run `rules` in order against `lead`, falling back to the default rule
pub fn apply_rules(rules: &[ClassificationRule], lead: &ParsedLead) -> Classification {
    let (temperature, tag) = rules
        .iter()
        .find(|rule| (rule.matches)(lead))
        .map(|rule| (rule.temperature, rule.tag))
        .unwrap_or(DEFAULT_RULE);

    Classification {
        temperature,
        tag,
        urgency: urgency_for(temperature),
        intent: intent_for(lead),
    }
}

pub fn urgency_for(temperature: Temperature) -> Urgency {
    match temperature {
        Temperature::Hot => Urgency::High,
        Temperature::Warm => Urgency::Medium,
        Temperature::Cold | Temperature::Ice => Urgency::Low,
    }
}

pub fn intent_for(lead: &ParsedLead) -> Intent {
    match lead {
        ParsedLead::TradeIn { .. } => Intent::TradeInRequest,
        ParsedLead::FinancialLead { .. } => Intent::FinancingRequest,
        ParsedLead::Contact(_)
        | ParsedLead::MissedCall(_)
        | ParsedLead::IgnoredCall { .. }
        | ParsedLead::Ignored { .. } => Intent::InformationRequest,
    }
}
