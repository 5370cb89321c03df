use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Id pair returned by a mailbox search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub id: String,
    pub thread_id: String,
}

/// Gmail `users.messages` resource in its wire shape (`format=full`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    pub thread_id: String,
    #[serde(default)]
    pub label_ids: Option<Vec<String>>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default, deserialize_with = "deserializers::deserialize_gmail_timestamp")]
    pub internal_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payload: Option<MessagePart>,
}

/// One node of the MIME tree; leaves carry body data, containers carry parts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub headers: Option<Vec<MessageHeader>>,
    #[serde(default)]
    pub body: Option<MessagePartBody>,
    #[serde(default)]
    pub parts: Option<Vec<MessagePart>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageHeader {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagePartBody {
    /// base64url text as sent by the API
    #[serde(default)]
    pub data: Option<String>,
}

/// A fetched message with headers pulled out and bodies decoded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub thread_id: String,
    /// Raw `From` header
    pub from: String,
    pub sender_email: String,
    pub reply_to: Option<String>,
    pub to: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    pub plain_body: String,
    pub html_body: String,
}

/// Portal or partner that produced an inquiry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadSource {
    Marktplaats,
    AutoScout24,
    AutoTrack,
    Voys,
    FinancialLease,
    Other,
}

impl LeadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadSource::Marktplaats => "marktplaats",
            LeadSource::AutoScout24 => "autoscout24",
            LeadSource::AutoTrack => "autotrack",
            LeadSource::Voys => "voys",
            LeadSource::FinancialLease => "financiallease",
            LeadSource::Other => "other",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            LeadSource::Marktplaats => "Marktplaats",
            LeadSource::AutoScout24 => "AutoScout24",
            LeadSource::AutoTrack => "AutoTrack",
            LeadSource::Voys => "Voys telefonie",
            LeadSource::FinancialLease => "FinancialLease",
            LeadSource::Other => "Overig",
        }
    }
}

/// Refinement of a request found in the customer's own words
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InquirySubType {
    TestDriveRequest,
    CallbackRequest,
}

/// Fields shared by every lead-producing variant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadDetails {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub vehicle: Option<String>,
    pub vehicle_url: Option<String>,
    pub clean_message: Option<String>,
    pub sub_type: Option<InquirySubType>,
}

/// Vehicle offered in trade
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeIn {
    pub plate: String,
    pub mileage: String,
    pub condition: Option<String>,
    pub remarks: Option<String>,
}

impl TradeIn {
    /// One-line summary for notes and logs
    pub fn summary(&self) -> String {
        let mut parts = vec![self.plate.clone(), self.mileage.clone()];
        if let Some(condition) = &self.condition {
            parts.push(format!("staat: {}", condition));
        }
        if let Some(remarks) = &self.remarks {
            parts.push(format!("opmerkingen: {}", remarks));
        }
        parts.retain(|p| !p.is_empty());
        format!("Inruil: {}", parts.join(", "))
    }
}

/// Result of running a source parser over one message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ParsedLead {
    Contact(LeadDetails),
    TradeIn {
        #[serde(flatten)]
        details: LeadDetails,
        #[serde(rename = "tradeIn")]
        trade_in: TradeIn,
    },
    FinancialLead {
        #[serde(flatten)]
        details: LeadDetails,
        #[serde(rename = "companyName")]
        company_name: Option<String>,
    },
    MissedCall(LeadDetails),
    IgnoredCall { reason: String },
    Ignored { reason: String },
}

/// Discriminant of [`ParsedLead`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeadKind {
    Contact,
    TradeIn,
    FinancialLead,
    MissedCall,
    IgnoredCall,
    Ignored,
}

impl LeadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadKind::Contact => "Contact",
            LeadKind::TradeIn => "TradeIn",
            LeadKind::FinancialLead => "FinancialLead",
            LeadKind::MissedCall => "MissedCall",
            LeadKind::IgnoredCall => "IgnoredCall",
            LeadKind::Ignored => "Ignored",
        }
    }
}

impl ParsedLead {
    pub fn kind(&self) -> LeadKind {
        match self {
            ParsedLead::Contact(_) => LeadKind::Contact,
            ParsedLead::TradeIn { .. } => LeadKind::TradeIn,
            ParsedLead::FinancialLead { .. } => LeadKind::FinancialLead,
            ParsedLead::MissedCall(_) => LeadKind::MissedCall,
            ParsedLead::IgnoredCall { .. } => LeadKind::IgnoredCall,
            ParsedLead::Ignored { .. } => LeadKind::Ignored,
        }
    }

    /// Contact details, or `None` for triaged noise
    pub fn details(&self) -> Option<&LeadDetails> {
        match self {
            ParsedLead::Contact(details)
            | ParsedLead::MissedCall(details)
            | ParsedLead::TradeIn { details, .. }
            | ParsedLead::FinancialLead { details, .. } => Some(details),
            ParsedLead::IgnoredCall { .. } | ParsedLead::Ignored { .. } => None,
        }
    }

    pub fn is_ignored(&self) -> bool {
        self.details().is_none()
    }

    pub fn ignored(reason: impl Into<String>) -> Self {
        ParsedLead::Ignored {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Temperature {
    Hot,
    Warm,
    Cold,
    Ice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Intent {
    TradeInRequest,
    FinancingRequest,
    InformationRequest,
}

/// Lead type tag stored on the lead row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadTag {
    FinancialApproved,
    TestDriveRequest,
    TradeInRequest,
    CallbackRequest,
    VehicleInquiry,
    GeneralInquiry,
    MissedCall,
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub temperature: Temperature,
    pub tag: LeadTag,
    pub urgency: Urgency,
    pub intent: Intent,
}

/// Cause tag of an invocation that failed as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RateLimitExceeded,
    GmailApiTimeout,
    GmailSearchError,
    CriticalError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::RateLimitExceeded => "rate_limit_exceeded",
            FailureKind::GmailApiTimeout => "gmail_api_timeout",
            FailureKind::GmailSearchError => "gmail_search_error",
            FailureKind::CriticalError => "critical_error",
        }
    }
}

/// Custom deserializers for Gmail API types
pub mod deserializers {
    use chrono::{DateTime, Utc};
    use serde::{
        de::{self, Deserializer},
        Deserialize,
    };

    /// Deserialize Gmail timestamp (milliseconds since epoch, as string or number)
    pub fn deserialize_gmail_timestamp<'de, D>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Millis {
            Text(String),
            Number(i64),
        }

        let opt: Option<Millis> = Option::deserialize(deserializer)?;
        let millis = match opt {
            Some(Millis::Text(s)) => s.parse::<i64>().map_err(de::Error::custom)?,
            Some(Millis::Number(n)) => n,
            None => return Ok(None),
        };
        let dt = DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| de::Error::custom("Invalid timestamp"))?;
        Ok(Some(dt))
    }
}
