//! Common test utilities and fixtures
#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use lead_ingest::client::GmailClient;
use lead_ingest::error::{IngestError, Result};
use lead_ingest::models::{MessageHeader, MessageRef, RawMessage};
use lead_ingest::store::{
    LeadRecord, LeadRepository, LeadStore, NewLead, NewMessage, NewThread, SqliteLeadStore,
    StoreCounts, ThreadRecord,
};
use mockall::mock;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub const MAILBOX: &str = "verkoop@autobedrijf.nl";

/// base64url without padding, the way the Gmail API sends body data
pub fn encode_body(text: &str) -> String {
    URL_SAFE_NO_PAD.encode(text.as_bytes())
}

/// Single-part plain text message in the `format=full` wire shape
pub fn raw_message(id: &str, thread_id: &str, from: &str, subject: &str, plain: &str) -> RawMessage {
    serde_json::from_value(json!({
        "id": id,
        "threadId": thread_id,
        "labelIds": ["INBOX", "UNREAD"],
        "internalDate": "1704099600000",
        "payload": {
            "mimeType": "text/plain",
            "headers": [
                {"name": "From", "value": from},
                {"name": "To", "value": MAILBOX},
                {"name": "Subject", "value": subject},
                {"name": "Date", "value": "Mon, 1 Jan 2024 10:00:00 +0100"}
            ],
            "body": {"data": encode_body(plain)}
        }
    }))
    .unwrap()
}

/// multipart/alternative message with both bodies
pub fn raw_multipart_message(
    id: &str,
    thread_id: &str,
    from: &str,
    subject: &str,
    plain: &str,
    html: &str,
) -> RawMessage {
    serde_json::from_value(json!({
        "id": id,
        "threadId": thread_id,
        "payload": {
            "mimeType": "multipart/alternative",
            "headers": [
                {"name": "From", "value": from},
                {"name": "To", "value": MAILBOX},
                {"name": "Subject", "value": subject}
            ],
            "parts": [
                {"mimeType": "text/plain", "body": {"data": encode_body(plain)}},
                {"mimeType": "text/html", "body": {"data": encode_body(html)}}
            ]
        }
    }))
    .unwrap()
}

/// Add a header to the top-level payload
pub fn with_header(mut raw: RawMessage, name: &str, value: &str) -> RawMessage {
    if let Some(payload) = raw.payload.as_mut() {
        payload.headers.get_or_insert_with(Vec::new).push(MessageHeader {
            name: Some(name.to_string()),
            value: Some(value.to_string()),
        });
    }
    raw
}

/// AutoTrack contact form for a given customer
pub fn autotrack_contact(
    id: &str,
    thread_id: &str,
    name: &str,
    email: &str,
    phone: &str,
) -> RawMessage {
    let body = format!(
        "Naam: {}\nE-Mailadres: {}\nTelefoonnummer: {}\n\nBericht:\nIs de auto nog beschikbaar?\n\nMet vriendelijke groet,\nAutoTrack B.V.\n",
        name, email, phone
    );
    raw_message(
        id,
        thread_id,
        "AutoTrack <noreply@autotrack.nl>",
        "Nieuwe aanvraag via AutoTrack",
        &body,
    )
}

/// How a scripted call should fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    RateLimit,
    Timeout,
    NotFound,
}

impl Failure {
    fn into_error(self, what: &str) -> IngestError {
        match self {
            Failure::RateLimit => IngestError::RateLimitExceeded {
                retry_after: Some(30),
            },
            Failure::Timeout => IngestError::Timeout(format!("{} exceeded 30s", what)),
            Failure::NotFound => IngestError::MessageNotFound(what.to_string()),
        }
    }
}

/// Scripted in-memory mailbox that records what the pipeline did to it
#[derive(Default)]
pub struct FakeGmail {
    messages: Mutex<Vec<RawMessage>>,
    fetch_failures: Mutex<HashMap<String, Failure>>,
    search_failure: Mutex<Option<Failure>>,
    pub queries: Mutex<Vec<String>>,
    pub fetched: Mutex<Vec<String>>,
    pub marked_read: Mutex<Vec<String>>,
}

impl FakeGmail {
    pub fn new(messages: Vec<RawMessage>) -> Self {
        Self {
            messages: Mutex::new(messages),
            ..Default::default()
        }
    }

    pub fn fail_fetch(self, id: &str, failure: Failure) -> Self {
        self.fetch_failures
            .lock()
            .unwrap()
            .insert(id.to_string(), failure);
        self
    }

    pub fn fail_search(self, failure: Failure) -> Self {
        *self.search_failure.lock().unwrap() = Some(failure);
        self
    }

    /// Refs of the messages that have not been marked read
    pub fn unread_refs(&self) -> Vec<MessageRef> {
        let read: HashSet<String> = self.marked_read.lock().unwrap().iter().cloned().collect();
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| !read.contains(&m.id))
            .map(|m| MessageRef {
                id: m.id.clone(),
                thread_id: m.thread_id.clone(),
            })
            .collect()
    }

    pub fn all_refs(&self) -> Vec<MessageRef> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|m| MessageRef {
                id: m.id.clone(),
                thread_id: m.thread_id.clone(),
            })
            .collect()
    }

    pub fn marked_read(&self) -> Vec<String> {
        self.marked_read.lock().unwrap().clone()
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl GmailClient for FakeGmail {
    async fn search_messages(&self, query: &str, max_results: u32) -> Result<Vec<MessageRef>> {
        self.queries.lock().unwrap().push(query.to_string());
        if let Some(failure) = *self.search_failure.lock().unwrap() {
            return Err(failure.into_error("search"));
        }
        let mut refs = self.unread_refs();
        refs.truncate(max_results as usize);
        Ok(refs)
    }

    async fn get_message(&self, id: &str) -> Result<RawMessage> {
        self.fetched.lock().unwrap().push(id.to_string());
        if let Some(failure) = self.fetch_failures.lock().unwrap().get(id) {
            return Err(failure.into_error(id));
        }
        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| IngestError::MessageNotFound(id.to_string()))
    }

    async fn mark_read(&self, id: &str) -> Result<()> {
        self.marked_read.lock().unwrap().push(id.to_string());
        Ok(())
    }
}

/// Store that fails message inserts for chosen ids while `failing` is set
pub struct FailingStore {
    inner: SqliteLeadStore,
    fail_message_ids: HashSet<String>,
    pub failing: AtomicBool,
}

impl FailingStore {
    pub fn new(fail_message_ids: &[&str]) -> Self {
        Self {
            inner: SqliteLeadStore::open_in_memory().unwrap(),
            fail_message_ids: fail_message_ids.iter().map(|s| s.to_string()).collect(),
            failing: AtomicBool::new(true),
        }
    }

    pub fn recover(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }
}

impl FailingStore {
    fn check(&self, message_id: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) && self.fail_message_ids.contains(message_id) {
            return Err(IngestError::StoreUnavailable(format!(
                "disk full while writing {}",
                message_id
            )));
        }
        Ok(())
    }
}

/// Repository view that applies the store's scripted failures
struct FailingView<'a> {
    inner: &'a dyn LeadRepository,
    store: &'a FailingStore,
}

impl LeadRepository for FailingView<'_> {
    fn find_thread(&self, thread_id: &str) -> Result<Option<ThreadRecord>> {
        self.inner.find_thread(thread_id)
    }

    fn find_lead_by_contact(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Option<String>> {
        self.inner.find_lead_by_contact(email, phone)
    }

    fn insert_lead(&self, lead: &NewLead) -> Result<String> {
        self.inner.insert_lead(lead)
    }

    fn insert_thread(&self, thread: &NewThread) -> Result<()> {
        self.inner.insert_thread(thread)
    }

    fn touch_thread(&self, thread_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.inner.touch_thread(thread_id, at)
    }

    fn insert_message(&self, message: &NewMessage) -> Result<bool> {
        self.store.check(&message.message_id)?;
        self.inner.insert_message(message)
    }

    fn get_lead(&self, lead_id: &str) -> Result<Option<LeadRecord>> {
        self.inner.get_lead(lead_id)
    }

    fn counts(&self) -> Result<StoreCounts> {
        self.inner.counts()
    }
}

impl LeadRepository for FailingStore {
    fn find_thread(&self, thread_id: &str) -> Result<Option<ThreadRecord>> {
        self.inner.find_thread(thread_id)
    }

    fn find_lead_by_contact(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Option<String>> {
        self.inner.find_lead_by_contact(email, phone)
    }

    fn insert_lead(&self, lead: &NewLead) -> Result<String> {
        self.inner.insert_lead(lead)
    }

    fn insert_thread(&self, thread: &NewThread) -> Result<()> {
        self.inner.insert_thread(thread)
    }

    fn touch_thread(&self, thread_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.inner.touch_thread(thread_id, at)
    }

    fn insert_message(&self, message: &NewMessage) -> Result<bool> {
        self.check(&message.message_id)?;
        self.inner.insert_message(message)
    }

    fn get_lead(&self, lead_id: &str) -> Result<Option<LeadRecord>> {
        self.inner.get_lead(lead_id)
    }

    fn counts(&self) -> Result<StoreCounts> {
        self.inner.counts()
    }
}

impl LeadStore for FailingStore {
    fn atomically(&self, work: &mut dyn FnMut(&dyn LeadRepository) -> Result<()>) -> Result<()> {
        self.inner
            .atomically(&mut |tx: &dyn LeadRepository| -> Result<()> {
                work(&FailingView {
                    inner: tx,
                    store: self,
                })
            })
    }
}

// Mock implementation of GmailClient for testing
mock! {
    pub GmailClient {}

    #[async_trait::async_trait]
    impl GmailClient for GmailClient {
        async fn search_messages(&self, query: &str, max_results: u32) -> Result<Vec<MessageRef>>;
        async fn get_message(&self, id: &str) -> Result<RawMessage>;
        async fn mark_read(&self, id: &str) -> Result<()>;
    }
}
