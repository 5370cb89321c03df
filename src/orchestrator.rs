//! One invocation: search, then process candidates one by one under a budget
//!
//! Candidates are handled strictly in order. Before each one the orchestrator checks the
//! message cap, waits the fixed inter-message delay and checks the wall-clock budget; a
//! failure inside one message is recorded and the loop moves on. [`run_invocation`] never
//! returns an error: token and search failures come back as a `success: false` report.

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::auth::{build_gmail_hub, resolve_key_path, ServiceAccountTokenSource, TokenProvider};
use crate::classifier::LeadClassifier;
use crate::client::{GmailClient, ProductionGmailClient};
use crate::config::{BatchConfig, Config};
use crate::decoder::decode_message;
use crate::error::IngestError;
use crate::models::{FailureKind, LeadKind, LeadSource, MessageRef};
use crate::parsers::{ParseInput, ParserRouter};
use crate::persister::{PersistOutcome, Persister};
use crate::scanner::{MailboxScanner, ScanOutcome};
use crate::store::LeadStore;

/// Bounds applied to one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_messages: u32,
    pub time_budget: Duration,
    pub inter_message_delay: Duration,
    pub max_error_details: usize,
}

impl From<&BatchConfig> for BatchLimits {
    fn from(config: &BatchConfig) -> Self {
        Self {
            max_messages: config.max_messages,
            time_budget: config.time_budget(),
            inter_message_delay: config.inter_message_delay(),
            max_error_details: config.max_error_details,
        }
    }
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self::from(&BatchConfig::default())
    }
}

/// Why the loop ended before the candidate list did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TimeBudget,
    MessageCap,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStats {
    pub processed: u32,
    pub created: u32,
    pub updated: u32,
    pub ignored: u32,
    pub errors: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub message_id: String,
    pub error: String,
}

/// Counters for one batch, returned to the trigger caller
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStats {
    pub processed: u32,
    pub created: u32,
    pub updated: u32,
    pub ignored: u32,
    pub parse_errors: u32,
    pub errors: u32,
    pub rate_limit_skipped: u32,
    pub missed_calls: u32,
    pub trade_ins: u32,
    pub financial_leads: u32,
    pub by_source: BTreeMap<String, SourceStats>,
    pub error_details: Vec<ErrorDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_early: Option<StopReason>,
    pub duration_ms: u64,
}

impl BatchStats {
    fn source_mut(&mut self, source: LeadSource) -> &mut SourceStats {
        self.by_source
            .entry(source.as_str().to_string())
            .or_default()
    }

    fn record_success(&mut self, source: LeadSource, outcome: &Handled) {
        let per_source = self.source_mut(source);
        per_source.processed += 1;
        match outcome {
            Handled::Ignored => per_source.ignored += 1,
            Handled::Recorded { created: true, .. } => per_source.created += 1,
            Handled::Recorded { created: false, .. } => per_source.updated += 1,
        }

        match outcome {
            Handled::Ignored => self.ignored += 1,
            Handled::Recorded { kind, created } => {
                if *created {
                    self.created += 1;
                } else {
                    self.updated += 1;
                }
                match kind {
                    LeadKind::MissedCall => self.missed_calls += 1,
                    LeadKind::TradeIn => self.trade_ins += 1,
                    LeadKind::FinancialLead => self.financial_leads += 1,
                    LeadKind::Contact | LeadKind::IgnoredCall | LeadKind::Ignored => {}
                }
            }
        }
    }

    fn record_failure(&mut self, message_id: &str, failure: MessageFailure, max_details: usize) {
        if let Some(source) = failure.source {
            let per_source = self.source_mut(source);
            per_source.processed += 1;
            per_source.errors += 1;
        }

        // Expected backpressure: the message stays unread and is picked up next run
        if failure.error.is_rate_limit() {
            info!("Message {} skipped on rate limit: {}", message_id, failure.error);
            self.rate_limit_skipped += 1;
            return;
        }

        if matches!(failure.error, IngestError::ParseFailure(_)) {
            warn!("Message {} not parsed: {}", message_id, failure.error);
            self.parse_errors += 1;
        } else {
            error!("Message {} failed: {}", message_id, failure.error);
            self.errors += 1;
        }

        if self.error_details.len() < max_details {
            self.error_details.push(ErrorDetail {
                message_id: message_id.to_string(),
                error: failure.error.to_string(),
            });
        }
    }
}

/// What happened to a message that went through without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handled {
    Ignored,
    Recorded { kind: LeadKind, created: bool },
}

/// A per-message error, with the source when routing got that far
#[derive(Debug)]
struct MessageFailure {
    source: Option<LeadSource>,
    error: IngestError,
}

impl From<IngestError> for MessageFailure {
    fn from(error: IngestError) -> Self {
        Self {
            source: None,
            error,
        }
    }
}

/// Sequential per-message pipeline: fetch, decode, parse, classify, persist
pub struct BatchOrchestrator<'a> {
    client: &'a dyn GmailClient,
    store: &'a dyn LeadStore,
    router: ParserRouter,
    classifier: LeadClassifier,
    limits: BatchLimits,
}

impl<'a> BatchOrchestrator<'a> {
    pub fn new(client: &'a dyn GmailClient, store: &'a dyn LeadStore, limits: BatchLimits) -> Self {
        Self {
            client,
            store,
            router: ParserRouter::new(),
            classifier: LeadClassifier::new(),
            limits,
        }
    }

    pub fn with_router(mut self, router: ParserRouter) -> Self {
        self.router = router;
        self
    }

    /// Process candidates in order until done, capped or out of time
    pub async fn run(&self, candidates: &[MessageRef]) -> BatchStats {
        let started = Instant::now();
        let mut stats = BatchStats::default();

        for (index, candidate) in candidates.iter().enumerate() {
            if stats.processed >= self.limits.max_messages {
                info!("Message cap of {} reached", self.limits.max_messages);
                stats.stopped_early = Some(StopReason::MessageCap);
                break;
            }

            if index > 0 && !self.limits.inter_message_delay.is_zero() {
                tokio::time::sleep(self.limits.inter_message_delay).await;
            }

            if started.elapsed() > self.limits.time_budget {
                info!(
                    "Time budget of {:?} spent, leaving {} messages for the next run",
                    self.limits.time_budget,
                    candidates.len() - index
                );
                stats.stopped_early = Some(StopReason::TimeBudget);
                break;
            }

            stats.processed += 1;
            match self.process(candidate).await {
                Ok((source, outcome)) => stats.record_success(source, &outcome),
                Err(failure) => {
                    stats.record_failure(&candidate.id, failure, self.limits.max_error_details)
                }
            }
        }

        stats.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "Batch done: {} processed, {} created, {} updated, {} ignored, {} errors",
            stats.processed, stats.created, stats.updated, stats.ignored, stats.errors
        );
        stats
    }

    async fn process(
        &self,
        candidate: &MessageRef,
    ) -> std::result::Result<(LeadSource, Handled), MessageFailure> {
        let raw = self.client.get_message(&candidate.id).await?;
        let message = decode_message(&raw)?;

        let (source, parsed) = self.router.parse(&ParseInput::from_message(&message));
        let with_source = |error: IngestError| MessageFailure {
            source: Some(source),
            error,
        };

        let parsed = parsed.ok_or_else(|| {
            with_source(IngestError::ParseFailure(format!(
                "{} parser found no lead in \"{}\"",
                source.as_str(),
                message.subject
            )))
        })?;
        let classification = self.classifier.classify(&parsed);

        let outcome = Persister::new(self.store, self.client)
            .persist(&message, source, &parsed, &classification)
            .await
            .map_err(with_source)?;

        let handled = match outcome {
            PersistOutcome::Ignored => Handled::Ignored,
            PersistOutcome::Recorded(resolution) => Handled::Recorded {
                kind: parsed.kind(),
                created: resolution.created(),
            },
        };
        Ok((source, handled))
    }
}

/// JSON body answered to every trigger
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub success: bool,
    #[serde(flatten)]
    pub stats: Option<BatchStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BatchReport {
    pub fn completed(stats: BatchStats) -> Self {
        Self {
            success: true,
            stats: Some(stats),
            error_type: None,
            message: None,
        }
    }

    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            stats: None,
            error_type: Some(kind),
            message: Some(message.into()),
        }
    }
}

/// Full invocation against the live mailbox
pub async fn run_invocation(config: &Config, store: &dyn LeadStore) -> BatchReport {
    let mailbox = match config.require_mailbox() {
        Ok(mailbox) => mailbox.to_string(),
        Err(e) => return BatchReport::failed(FailureKind::CriticalError, e.to_string()),
    };

    let key_path = resolve_key_path(&config.mailbox.service_account_key);
    let tokens = TokenProvider::new(ServiceAccountTokenSource::new(key_path, mailbox));
    let token = match tokens.access_token().await {
        Ok(token) => token,
        Err(e) => {
            error!("Aborting invocation: {}", e);
            return BatchReport::failed(FailureKind::CriticalError, e.to_string());
        }
    };

    let hub = match build_gmail_hub(token) {
        Ok(hub) => hub,
        Err(e) => return BatchReport::failed(FailureKind::CriticalError, e.to_string()),
    };
    let client = ProductionGmailClient::new(hub, config.batch.call_timeout());

    ingest_with_client(config, &client, store).await
}

/// Search and batch against an already authenticated client
pub async fn ingest_with_client(
    config: &Config,
    client: &dyn GmailClient,
    store: &dyn LeadStore,
) -> BatchReport {
    let mailbox = match config.require_mailbox() {
        Ok(mailbox) => mailbox,
        Err(e) => return BatchReport::failed(FailureKind::CriticalError, e.to_string()),
    };

    let router = ParserRouter::new();
    let scanner = MailboxScanner::new(
        mailbox,
        router
            .sender_domains()
            .into_iter()
            .map(str::to_string)
            .collect(),
        config.mailbox.excluded_subjects.clone(),
        config.mailbox.search_window_days,
        config.batch.max_messages,
    );

    match scanner.scan(client).await {
        ScanOutcome::Failed { kind, message } => {
            error!("Aborting invocation, search failed: {}", message);
            BatchReport::failed(kind, message)
        }
        ScanOutcome::Candidates(candidates) => {
            let stats = BatchOrchestrator::new(client, store, BatchLimits::from(&config.batch))
                .with_router(router)
                .run(&candidates)
                .await;
            BatchReport::completed(stats)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorded(kind: LeadKind, created: bool) -> Handled {
        Handled::Recorded { kind, created }
    }

    #[test]
    fn test_limits_from_config() {
        let limits = BatchLimits::default();
        assert_eq!(limits.max_messages, 10);
        assert_eq!(limits.time_budget, Duration::from_secs(50));
        assert_eq!(limits.inter_message_delay, Duration::from_millis(750));
        assert_eq!(limits.max_error_details, 20);
    }

    #[test]
    fn test_success_counters_partition() {
        let mut stats = BatchStats::default();
        stats.record_success(LeadSource::Voys, &recorded(LeadKind::MissedCall, true));
        stats.record_success(LeadSource::AutoTrack, &recorded(LeadKind::TradeIn, false));
        stats.record_success(LeadSource::Marktplaats, &Handled::Ignored);

        assert_eq!((stats.created, stats.updated, stats.ignored), (1, 1, 1));
        assert_eq!((stats.missed_calls, stats.trade_ins), (1, 1));
        assert_eq!(stats.by_source["voys"].created, 1);
        assert_eq!(stats.by_source["autotrack"].updated, 1);
        assert_eq!(stats.by_source["marktplaats"].ignored, 1);
    }

    #[test]
    fn test_rate_limit_failure_is_not_an_error() {
        let mut stats = BatchStats::default();
        stats.record_failure(
            "m1",
            IngestError::RateLimitExceeded {
                retry_after: Some(30),
            }
            .into(),
            20,
        );

        assert_eq!(stats.rate_limit_skipped, 1);
        assert_eq!(stats.errors, 0);
        assert!(stats.error_details.is_empty());
    }

    #[test]
    fn test_error_details_are_capped() {
        let mut stats = BatchStats::default();
        for i in 0..5 {
            stats.record_failure(
                &format!("m{}", i),
                MessageFailure {
                    source: Some(LeadSource::AutoScout24),
                    error: IngestError::StoreUnavailable("lock poisoned".to_string()),
                },
                2,
            );
        }

        assert_eq!(stats.errors, 5);
        assert_eq!(stats.error_details.len(), 2);
        assert_eq!(stats.error_details[0].message_id, "m0");
        assert_eq!(stats.by_source["autoscout24"].errors, 5);
    }

    #[test]
    fn test_parse_failure_counted_separately() {
        let mut stats = BatchStats::default();
        stats.record_failure(
            "m1",
            IngestError::ParseFailure("no name".to_string()).into(),
            20,
        );
        assert_eq!((stats.parse_errors, stats.errors), (1, 0));
        assert_eq!(stats.error_details.len(), 1);
    }

    #[test]
    fn test_report_json_shapes() {
        let mut stats = BatchStats::default();
        stats.processed = 2;
        stats.stopped_early = Some(StopReason::TimeBudget);
        let ok = serde_json::to_value(BatchReport::completed(stats)).unwrap();
        assert_eq!(ok["success"], true);
        assert_eq!(ok["processed"], 2);
        assert_eq!(ok["rateLimitSkipped"], 0);
        assert_eq!(ok["stoppedEarly"], "time_budget");
        assert!(ok.get("errorType").is_none());

        let failed = serde_json::to_value(BatchReport::failed(
            FailureKind::GmailApiTimeout,
            "search exceeded 30s",
        ))
        .unwrap();
        assert_eq!(failed["success"], false);
        assert_eq!(failed["errorType"], "gmail_api_timeout");
        assert_eq!(failed["message"], "search exceeded 30s");
        assert!(failed.get("processed").is_none());
    }
}
