//! Service-account authentication for the shared lead mailbox
//!
//! The job impersonates one fixed mailbox through domain-wide delegation: a signed JWT
//! assertion naming the mailbox as subject is exchanged for a short-lived bearer token.
//! The token is fetched once per invocation and handed to the Gmail hub as a static credential.

use async_trait::async_trait;
use google_gmail1::{hyper_rustls, hyper_util, yup_oauth2, Gmail};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{IngestError, Result};
use crate::retry::{retry_with, RetryDecision, RetryPolicy};

/// Read + modify: modify is needed to clear the UNREAD label
pub const MAILBOX_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";

/// Environment override for the service account key path
pub const SERVICE_ACCOUNT_KEY_ENV: &str = "LEAD_INGEST_SERVICE_ACCOUNT_KEY";

/// Type alias for Gmail Hub to simplify type signatures
pub type GmailHub =
    Gmail<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;

/// Something that can perform one token exchange
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<String>;
}

/// Signed-assertion exchange using a Google service account key
pub struct ServiceAccountTokenSource {
    key_path: PathBuf,
    mailbox: String,
}

impl ServiceAccountTokenSource {
    pub fn new(key_path: impl Into<PathBuf>, mailbox: impl Into<String>) -> Self {
        Self {
            key_path: key_path.into(),
            mailbox: mailbox.into(),
        }
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokenSource {
    async fn fetch_token(&self) -> Result<String> {
        let key = yup_oauth2::read_service_account_key(&self.key_path)
            .await
            .map_err(|e| {
                IngestError::AuthError(format!(
                    "Failed to read service account key {:?}: {}",
                    self.key_path, e
                ))
            })?;

        let auth = yup_oauth2::ServiceAccountAuthenticator::builder(key)
            .subject(self.mailbox.clone())
            .build()
            .await
            .map_err(|e| IngestError::AuthError(format!("Failed to build authenticator: {}", e)))?;

        let token = auth
            .token(&[MAILBOX_SCOPE])
            .await
            .map_err(|e| IngestError::AuthError(format!("Token exchange failed: {}", e)))?;

        token
            .token()
            .map(str::to_string)
            .ok_or_else(|| IngestError::AuthError("Token response had no access token".to_string()))
    }
}

/// Wraps a [`TokenSource`] with the exponential retry schedule
pub struct TokenProvider<S> {
    source: S,
    policy: RetryPolicy,
}

impl<S: TokenSource> TokenProvider<S> {
    pub fn new(source: S) -> Self {
        Self::with_policy(source, RetryPolicy::token_exchange())
    }

    pub fn with_policy(source: S, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    /// Obtain a bearer token; exhaustion is an `AuthError` that aborts the invocation
    pub async fn access_token(&self) -> Result<String> {
        let token = retry_with(
            &self.policy,
            "token exchange",
            |_| RetryDecision::Retry,
            || self.source.fetch_token(),
        )
        .await
        .map_err(|e| {
            let detail = match e {
                IngestError::AuthError(msg) => msg,
                other => other.to_string(),
            };
            IngestError::AuthError(format!(
                "gave up after {} attempts: {}",
                self.policy.max_attempts, detail
            ))
        })?;

        debug!("Obtained access token ({} chars)", token.len());
        Ok(token)
    }
}

/// Resolve the service account key path, preferring the environment override
pub fn resolve_key_path(configured: &Path) -> PathBuf {
    env::var(SERVICE_ACCOUNT_KEY_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| configured.to_path_buf())
}

/// Build a Gmail hub that sends `access_token` on every request
///
/// HTTP/1 client with TLS, same as any other hub; the token itself is the authenticator.
pub fn build_gmail_hub(access_token: String) -> Result<GmailHub> {
    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .map_err(|e| IngestError::AuthError(format!("Failed to load TLS roots: {}", e)))?
                .https_or_http()
                .enable_http1()
                .build(),
        );

    info!("Gmail hub initialised");
    Ok(Gmail::new(client, access_token))
}
