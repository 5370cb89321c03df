//! Gmail API client with per-call timeout and rate-limit-aware retry
//!
//! Every call goes through [`retry_with`] with the Gmail policy: 429s and quota-phrased
//! 403s back off on `Retry-After` or the fixed ladder, network errors and timeouts use the
//! ladder, anything else is handed straight back to the caller.

use async_trait::async_trait;
use google_gmail1::api::{Message, ModifyMessageRequest};
use std::time::Duration;
use tracing::debug;

use crate::auth::{GmailHub, MAILBOX_SCOPE};
use crate::error::{from_failure_response, parse_retry_after_header, IngestError, Result};
use crate::models::{MessageRef, RawMessage};
use crate::retry::{classify_gmail_error, retry_with, RetryPolicy};

/// The impersonated mailbox, as Gmail addresses it
const USER_ID: &str = "me";

/// Label removed to mark a message read
pub const UNREAD_LABEL: &str = "UNREAD";

/// Trait defining the mailbox operations the pipeline needs
#[async_trait]
pub trait GmailClient: Send + Sync {
    /// One bounded search; returns at most `max_results` id pairs
    async fn search_messages(&self, query: &str, max_results: u32) -> Result<Vec<MessageRef>>;

    /// Fetch a full message (headers and the whole MIME tree)
    async fn get_message(&self, id: &str) -> Result<RawMessage>;

    /// Clear the unread flag
    async fn mark_read(&self, id: &str) -> Result<()>;
}

/// Keeps the `Retry-After` of a failed response
///
/// The hub turns a JSON error body into `Error::BadRequest`, which carries no headers, so
/// the header is taken here while the response is still at hand.
#[derive(Debug, Default)]
struct RetryAfterCapture {
    retry_after: Option<u64>,
}

impl RetryAfterCapture {
    fn attach(&self, error: IngestError) -> IngestError {
        match (error, self.retry_after) {
            (IngestError::RateLimitExceeded { retry_after: None }, Some(secs)) => {
                IngestError::RateLimitExceeded {
                    retry_after: Some(secs),
                }
            }
            (error, _) => error,
        }
    }
}

impl google_gmail1::Delegate for RetryAfterCapture {
    fn http_failure(
        &mut self,
        response: &google_gmail1::common::Response,
        _err: Option<&serde_json::Value>,
    ) -> google_gmail1::common::Retry {
        self.retry_after = parse_retry_after_header(response);
        google_gmail1::common::Retry::Abort
    }
}

/// Production client over the generated Gmail hub
pub struct ProductionGmailClient {
    hub: GmailHub,
    policy: RetryPolicy,
    call_timeout: Duration,
}

impl ProductionGmailClient {
    /// Create a client with the standard Gmail retry policy
    pub fn new(hub: GmailHub, call_timeout: Duration) -> Self {
        Self::with_policy(hub, RetryPolicy::gmail_api(), call_timeout)
    }

    pub fn with_policy(hub: GmailHub, policy: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            hub,
            policy,
            call_timeout,
        }
    }

    /// Bound a single attempt by the call timeout
    async fn timed<T, F>(&self, operation_name: &str, call: F) -> Result<T>
    where
        F: std::future::Future<Output = std::result::Result<T, google_gmail1::Error>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(google_gmail1::Error::Failure(response))) => {
                Err(from_failure_response(response).await)
            }
            Ok(Err(e)) => Err(IngestError::from(e)),
            Err(_) => Err(IngestError::Timeout(format!(
                "{} exceeded {:?}",
                operation_name, self.call_timeout
            ))),
        }
    }
}

#[async_trait]
impl GmailClient for ProductionGmailClient {
    async fn search_messages(&self, query: &str, max_results: u32) -> Result<Vec<MessageRef>> {
        let (_, response) = retry_with(&self.policy, "search", classify_gmail_error, || async {
            let mut capture = RetryAfterCapture::default();
            let result = self
                .timed(
                    "search",
                    self.hub
                        .users()
                        .messages_list(USER_ID)
                        .q(query)
                        .max_results(max_results)
                        .add_scope(MAILBOX_SCOPE)
                        .delegate(&mut capture)
                        .doit(),
                )
                .await;
            result.map_err(|e| capture.attach(e))
        })
        .await?;

        let refs: Vec<MessageRef> = response
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| match (m.id, m.thread_id) {
                (Some(id), Some(thread_id)) => Some(MessageRef { id, thread_id }),
                _ => None,
            })
            .take(max_results as usize)
            .collect();

        debug!("Search returned {} candidates", refs.len());
        Ok(refs)
    }

    async fn get_message(&self, id: &str) -> Result<RawMessage> {
        let (_, message) = retry_with(&self.policy, "get message", classify_gmail_error, || async {
            let mut capture = RetryAfterCapture::default();
            let result = self
                .timed(
                    "get message",
                    self.hub
                        .users()
                        .messages_get(USER_ID, id)
                        .format("full")
                        .add_scope(MAILBOX_SCOPE)
                        .delegate(&mut capture)
                        .doit(),
                )
                .await;
            result.map_err(|e| capture.attach(e))
        })
        .await?;

        to_raw_message(&message)
    }

    async fn mark_read(&self, id: &str) -> Result<()> {
        retry_with(&self.policy, "mark read", classify_gmail_error, || async {
            let modify_request = ModifyMessageRequest {
                add_label_ids: None,
                remove_label_ids: Some(vec![UNREAD_LABEL.to_string()]),
            };
            let mut capture = RetryAfterCapture::default();
            let result = self
                .timed(
                    "mark read",
                    self.hub
                        .users()
                        .messages_modify(modify_request, USER_ID, id)
                        .add_scope(MAILBOX_SCOPE)
                        .delegate(&mut capture)
                        .doit(),
                )
                .await;
            result.map_err(|e| capture.attach(e))
        })
        .await?;

        debug!("Marked {} read", id);
        Ok(())
    }
}

/// Re-shape the generated type into the wire model the decoder understands
pub fn to_raw_message(message: &Message) -> Result<RawMessage> {
    let value = serde_json::to_value(message)?;
    let raw: RawMessage = serde_json::from_value(value)?;
    if raw.id.is_empty() {
        return Err(IngestError::InvalidMessageFormat(
            "Missing message ID".to_string(),
        ));
    }
    Ok(raw)
}
