//! Resolve a parsed lead to an existing or new Lead/Thread and log the message
//!
//! Resolution order, first match wins:
//! 1. thread match: the conversation is already known, reuse its lead
//! 2. contact match: same email (or phone) as a known lead, open a new thread for it
//! 3. no match: create the lead and its first thread
//!
//! The message row is appended in every branch.

use tracing::{debug, info};

use crate::error::{IngestError, Result};
use crate::models::{Classification, InboundMessage, LeadDetails, LeadSource, ParsedLead};
use crate::store::{LeadRepository, NewLead, NewMessage, NewThread};

/// Which branch a message resolved through
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Existing thread; `message_added` is false on replay of a stored message
    ThreadMatch { lead_id: String, message_added: bool },
    ContactMatch { lead_id: String },
    Created { lead_id: String },
}

impl Resolution {
    pub fn lead_id(&self) -> &str {
        match self {
            Resolution::ThreadMatch { lead_id, .. }
            | Resolution::ContactMatch { lead_id }
            | Resolution::Created { lead_id } => lead_id,
        }
    }

    pub fn created(&self) -> bool {
        matches!(self, Resolution::Created { .. })
    }
}

/// Runs against whatever repository it is given; the persister hands it a transaction
pub struct DeduplicationEngine<'a> {
    store: &'a dyn LeadRepository,
}

impl<'a> DeduplicationEngine<'a> {
    pub fn new(store: &'a dyn LeadRepository) -> Self {
        Self { store }
    }

    /// Match or create, then append the message
    pub fn resolve(
        &self,
        message: &InboundMessage,
        source: LeadSource,
        parsed: &ParsedLead,
        classification: &Classification,
    ) -> Result<Resolution> {
        let details = parsed.details().ok_or_else(|| {
            IngestError::Unknown(format!(
                "Message {} is {} and has no lead to resolve",
                message.id,
                parsed.kind().as_str()
            ))
        })?;

        if let Some(thread) = self.store.find_thread(&message.thread_id)? {
            let message_added = self.append_message(message, &thread.lead_id, source, parsed)?;
            if message_added {
                self.store
                    .touch_thread(&thread.thread_id, message.received_at)?;
            } else {
                debug!("Message {} already stored", message.id);
            }
            debug!("Message {} matched thread {}", message.id, thread.thread_id);
            return Ok(Resolution::ThreadMatch {
                lead_id: thread.lead_id,
                message_added,
            });
        }

        let email = details.email.as_deref();
        let phone = details.phone.as_deref();

        if let Some(lead_id) = self.store.find_lead_by_contact(email, phone)? {
            self.open_thread(message, &lead_id)?;
            self.append_message(message, &lead_id, source, parsed)?;
            info!(
                "Message {} matched existing lead {} by contact",
                message.id, lead_id
            );
            return Ok(Resolution::ContactMatch { lead_id });
        }

        let new_lead = NewLead {
            first_name: details.first_name.clone(),
            last_name: details.last_name.clone(),
            email: details.email.clone(),
            phone: details.phone.clone(),
            source,
            origin_address: message.sender_email.clone(),
            classification: *classification,
            vehicle: details.vehicle.clone(),
            vehicle_url: details.vehicle_url.clone(),
            notes: compose_notes(source, parsed, details, message),
        };
        let lead_id = self.store.insert_lead(&new_lead)?;
        self.open_thread(message, &lead_id)?;
        self.append_message(message, &lead_id, source, parsed)?;
        info!("Message {} created lead {}", message.id, lead_id);

        Ok(Resolution::Created { lead_id })
    }

    fn open_thread(&self, message: &InboundMessage, lead_id: &str) -> Result<()> {
        let mut participants = vec![message.sender_email.clone()];
        if let Some(reply_to) = &message.reply_to {
            if !participants.contains(reply_to) {
                participants.push(reply_to.clone());
            }
        }
        if !message.to.is_empty() {
            participants.push(message.to.clone());
        }

        self.store.insert_thread(&NewThread {
            thread_id: message.thread_id.clone(),
            lead_id: lead_id.to_string(),
            participants,
            started_at: message.received_at,
        })
    }

    fn append_message(
        &self,
        message: &InboundMessage,
        lead_id: &str,
        source: LeadSource,
        parsed: &ParsedLead,
    ) -> Result<bool> {
        self.store.insert_message(&NewMessage {
            message_id: message.id.clone(),
            thread_id: message.thread_id.clone(),
            lead_id: lead_id.to_string(),
            sender: message.from.clone(),
            recipient: message.to.clone(),
            plain_body: message.plain_body.clone(),
            html_body: message.html_body.clone(),
            clean_message: parsed.details().and_then(|d| d.clean_message.clone()),
            received_at: message.received_at,
            source,
            parsed: serde_json::to_string(parsed)?,
        })
    }
}

/// Human-readable summary stored on a new lead
pub fn compose_notes(
    source: LeadSource,
    parsed: &ParsedLead,
    details: &LeadDetails,
    message: &InboundMessage,
) -> String {
    let mut notes = vec![
        format!("Bron: {}", source.display_name()),
        format!("Type: {}", parsed.kind().as_str()),
    ];

    match parsed {
        ParsedLead::TradeIn { trade_in, .. } => notes.push(trade_in.summary()),
        ParsedLead::FinancialLead {
            company_name: Some(company),
            ..
        } => notes.push(format!("Bedrijf: {}", company)),
        _ => {}
    }

    if let Some(vehicle) = &details.vehicle {
        notes.push(format!("Interesse: {}", vehicle));
    }
    if let Some(url) = &details.vehicle_url {
        notes.push(format!("Advertentie: {}", url));
    }

    let text = details
        .clean_message
        .as_deref()
        .unwrap_or_else(|| message.plain_body.trim());
    if !text.is_empty() {
        notes.push(format!("Bericht:\n{}", text));
    }

    notes.join("\n")
}
