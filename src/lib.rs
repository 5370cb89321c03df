//! Lead Ingestion Pipeline
//!
//! A scheduled backend job that turns portal notifications arriving in a shared Gmail
//! mailbox into deduplicated sales leads.
//!
//! # Overview
//!
//! Each invocation:
//! - **Authenticates** as the mailbox through a service account with domain-wide delegation
//! - **Searches** for a bounded set of unread notifications from known portals
//! - **Decodes** each message's MIME tree into plain and HTML bodies
//! - **Parses** it with the parser for its sender, after triaging out noise
//! - **Classifies** the lead into a temperature and lead type
//! - **Deduplicates** against known threads and contacts, then stores Lead/Thread/Message rows
//! - **Marks the message read** only once every write for it succeeded
//!
//! # Example Usage
//!
//! ```no_run
//! use lead_ingest::{config::Config, orchestrator, store::SqliteLeadStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!     let store = SqliteLeadStore::open(&config.storage.database_path)?;
//!
//!     let report = orchestrator::run_invocation(&config, &store).await;
//!     println!("{}", serde_json::to_string(&report)?);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - Service-account token exchange and Gmail hub construction
//! - [`retry`] - Shared retry helper and backoff policies
//! - [`client`] - Gmail API client with per-call timeout and retry
//! - [`scanner`] - Bounded unread-lead search
//! - [`decoder`] - MIME tree walking and header extraction
//! - [`parsers`] - Triage, routing table and per-portal parsers
//! - [`classifier`] - Priority rule table for temperature and lead type
//! - [`store`] - SQLite Lead/Thread/Message store
//! - [`dedup`] - Thread and contact matching
//! - [`persister`] - Write-then-mark-read
//! - [`orchestrator`] - Budgeted batch loop and invocation report
//! - [`server`] - HTTP trigger endpoint
//! - [`cli`] - Command-line interface
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases
//! - [`models`] - Core data structures

pub mod auth;
pub mod classifier;
pub mod cli;
pub mod client;
pub mod config;
pub mod decoder;
pub mod dedup;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod parsers;
pub mod persister;
pub mod retry;
pub mod scanner;
pub mod server;
pub mod store;

// Re-export commonly used types for convenience
pub use error::{IngestError, Result};

// Core data models
pub use models::{
    Classification, FailureKind, InboundMessage, LeadKind, LeadSource, MessageRef, ParsedLead,
    RawMessage,
};

pub use classifier::LeadClassifier;
pub use client::{GmailClient, ProductionGmailClient};
pub use config::Config;
pub use dedup::{DeduplicationEngine, Resolution};
pub use orchestrator::{BatchOrchestrator, BatchReport, BatchStats};
pub use parsers::ParserRouter;
pub use store::{LeadRepository, LeadStore, SqliteLeadStore};
