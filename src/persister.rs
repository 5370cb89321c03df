//! Write a processed message, then clear its unread flag
//!
//! All database writes for one message run in a single transaction, and the mailbox is
//! only touched after it committed. A failure anywhere before that leaves no rows behind
//! and the message unread for the next run.

use tracing::debug;

use crate::client::GmailClient;
use crate::dedup::{DeduplicationEngine, Resolution};
use crate::error::{IngestError, Result};
use crate::models::{Classification, InboundMessage, LeadSource, ParsedLead};
use crate::store::{LeadRepository, LeadStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Triaged noise: nothing written, marked read
    Ignored,
    Recorded(Resolution),
}

pub struct Persister<'a> {
    store: &'a dyn LeadStore,
    client: &'a dyn GmailClient,
}

impl<'a> Persister<'a> {
    pub fn new(store: &'a dyn LeadStore, client: &'a dyn GmailClient) -> Self {
        Self { store, client }
    }

    pub async fn persist(
        &self,
        message: &InboundMessage,
        source: LeadSource,
        parsed: &ParsedLead,
        classification: &Classification,
    ) -> Result<PersistOutcome> {
        if parsed.is_ignored() {
            self.client.mark_read(&message.id).await?;
            debug!("Message {} ignored ({})", message.id, parsed.kind().as_str());
            return Ok(PersistOutcome::Ignored);
        }

        let mut resolution = None;
        self.store
            .atomically(&mut |repo: &dyn LeadRepository| -> Result<()> {
                resolution = Some(
                    DeduplicationEngine::new(repo).resolve(message, source, parsed, classification)?,
                );
                Ok(())
            })?;
        let resolution = resolution.ok_or_else(|| {
            IngestError::Unknown(format!("Message {} resolved to nothing", message.id))
        })?;

        self.client.mark_read(&message.id).await?;
        Ok(PersistOutcome::Recorded(resolution))
    }
}
