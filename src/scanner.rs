//! One bounded mailbox search per invocation

use tracing::{info, warn};

use crate::client::GmailClient;
use crate::error::IngestError;
use crate::models::{FailureKind, MessageRef};

/// Result of the candidate search; failures are values, not errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Candidates(Vec<MessageRef>),
    Failed { kind: FailureKind, message: String },
}

/// Builds and runs the unread-lead search
#[derive(Debug, Clone)]
pub struct MailboxScanner {
    mailbox: String,
    sender_domains: Vec<String>,
    excluded_subjects: Vec<String>,
    window_days: u32,
    batch_size: u32,
}

impl MailboxScanner {
    pub fn new(
        mailbox: impl Into<String>,
        sender_domains: Vec<String>,
        excluded_subjects: Vec<String>,
        window_days: u32,
        batch_size: u32,
    ) -> Self {
        Self {
            mailbox: mailbox.into(),
            sender_domains,
            excluded_subjects,
            window_days,
            batch_size,
        }
    }

    /// Gmail search expression, e.g.
    /// `is:unread to:verkoop@x.nl newer_than:2d from:(voys.nl OR autoscout24) -subject:"Leesbevestiging"`
    pub fn build_query(&self) -> String {
        let mut query = vec![
            "is:unread".to_string(),
            format!("to:{}", self.mailbox),
            format!("newer_than:{}d", self.window_days.max(1)),
        ];

        if !self.sender_domains.is_empty() {
            query.push(format!("from:({})", self.sender_domains.join(" OR ")));
        }

        for subject in &self.excluded_subjects {
            query.push(format!("-subject:\"{}\"", subject.replace('"', "")));
        }

        query.join(" ")
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    /// Run the search; retries already happened inside the client
    pub async fn scan(&self, client: &dyn GmailClient) -> ScanOutcome {
        let query = self.build_query();
        info!("Searching mailbox: {}", query);

        match client.search_messages(&query, self.batch_size).await {
            Ok(mut refs) => {
                refs.truncate(self.batch_size as usize);
                info!("Found {} candidate messages", refs.len());
                ScanOutcome::Candidates(refs)
            }
            Err(e) => {
                warn!("Mailbox search failed: {}", e);
                ScanOutcome::Failed {
                    kind: search_failure_kind(&e),
                    message: e.to_string(),
                }
            }
        }
    }
}

/// Cause tag for a search that exhausted its retries
pub fn search_failure_kind(error: &IngestError) -> FailureKind {
    match error {
        IngestError::RateLimitExceeded { .. } => FailureKind::RateLimitExceeded,
        IngestError::Timeout(_) => FailureKind::GmailApiTimeout,
        _ => FailureKind::GmailSearchError,
    }
}
