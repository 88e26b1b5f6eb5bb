//! Swap Relay
//!
//! Drives one notification run: claim the id, fetch the transaction, check
//! eligibility, decode the swap, send the webhook, and record the id. The id is
//! recorded only after the webhook succeeded; every failure releases the claim.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::decoder::{self, DecodeError};
use crate::dedup::{Claim, DedupError, DedupLedger};
use crate::filter::{self, Ineligible, NotifyPolicy, TradingPosts};
use crate::ledger::{LedgerClient, LedgerError};
use crate::publisher::{Notifier, NotifyError, SwapSummary, WebhookMessage};

/// Errors a relay run can end with
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Invalid request")]
    InvalidRequest,

    #[error("Already sent")]
    AlreadyNotified,

    #[error("{0}")]
    Ineligible(#[from] Ineligible),

    #[error("{0}")]
    Decode(DecodeError),

    #[error("Ledger request failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("{0}")]
    Notify(#[from] NotifyError),

    #[error("{0}")]
    Dedup(#[from] DedupError),
}

impl From<DecodeError> for RelayError {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::Ledger(e) => RelayError::Ledger(e),
            other => RelayError::Decode(other),
        }
    }
}

impl RelayError {
    /// Whether the request was refused (as opposed to failing upstream)
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            RelayError::InvalidRequest
                | RelayError::AlreadyNotified
                | RelayError::Ineligible(_)
                | RelayError::Decode(_)
        )
    }
}

/// Where the accepted trading posts come from
#[derive(Debug, Clone, Default)]
pub enum TradingPostSource {
    /// A fixed allow-list
    Fixed(TradingPosts),
    /// Looked up from the live directory on every run
    #[default]
    Directory,
}

/// Settings of a relay
#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    pub policy: NotifyPolicy,
    pub trading_posts: TradingPostSource,
}

/// A caller's request to announce a transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwapRequest {
    pub id: String,
    /// Legacy pre-computed legs; used only when both are present
    pub from: Option<String>,
    pub to: Option<String>,
}

impl SwapRequest {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_legs(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self.to = Some(to.into());
        self
    }

    /// Validated transaction id
    pub fn id(&self) -> Result<&str, RelayError> {
        let id = self.id.trim();
        if id.is_empty() {
            return Err(RelayError::InvalidRequest);
        }
        Ok(id)
    }

    fn precomputed(&self) -> Option<SwapSummary> {
        let from = self.from.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let to = self.to.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        Some(SwapSummary::Precomputed {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// An acquired claim; released on drop unless kept
struct ClaimGuard {
    dedup: Arc<dyn DedupLedger>,
    id: String,
    armed: bool,
}

impl ClaimGuard {
    fn new(dedup: Arc<dyn DedupLedger>, id: &str) -> Self {
        Self {
            dedup,
            id: id.to_string(),
            armed: true,
        }
    }

    /// Hand the id back after a failed run
    async fn release(mut self) {
        self.armed = false;
        if let Err(e) = self.dedup.release(&self.id).await {
            error!("Failed to release claim on {}: {}", self.id, e);
        }
    }

    /// Keep the claim; the caller commits it
    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("Run for {} was cancelled, releasing its claim", self.id);
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            error!("No runtime to release claim on {}", self.id);
            return;
        };
        let dedup = self.dedup.clone();
        let id = std::mem::take(&mut self.id);
        handle.spawn(async move {
            if let Err(e) = dedup.release(&id).await {
                error!("Failed to release claim on {}: {}", id, e);
            }
        });
    }
}

/// The notification pipeline
#[derive(Clone)]
pub struct Relay {
    ledger: Arc<dyn LedgerClient>,
    notifier: Arc<dyn Notifier>,
    dedup: Arc<dyn DedupLedger>,
    config: RelayConfig,
}

impl Relay {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        notifier: Arc<dyn Notifier>,
        dedup: Arc<dyn DedupLedger>,
        config: RelayConfig,
    ) -> Self {
        Self {
            ledger,
            notifier,
            dedup,
            config,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn dedup(&self) -> &Arc<dyn DedupLedger> {
        &self.dedup
    }

    /// Run the pipeline for one request, returning the message that was sent
    ///
    /// If the returned future is dropped before the webhook fired, the claim
    /// is released in the background so the id can be retried.
    pub async fn process(&self, request: &SwapRequest) -> Result<WebhookMessage, RelayError> {
        let id = request.id()?;

        let claim = match self.dedup.claim(id).await? {
            Claim::Acquired => ClaimGuard::new(self.dedup.clone(), id),
            Claim::AlreadyNotified | Claim::InFlight => {
                debug!("Skipping {}: already notified", id);
                return Err(RelayError::AlreadyNotified);
            }
        };

        let message = match self.notify(id, request).await {
            Ok(message) => message,
            Err(e) => {
                claim.release().await;
                return Err(e);
            }
        };

        // The webhook already fired; a failed commit is surfaced but the claim is kept
        claim.keep();
        if let Err(e) = self.dedup.mark_notified(id).await {
            error!("Notified {} but could not record it: {}", id, e);
            return Err(e.into());
        }

        info!("Sent notification for {}", id);
        Ok(message)
    }

    async fn notify(&self, id: &str, request: &SwapRequest) -> Result<WebhookMessage, RelayError> {
        let tx = self.ledger.fetch_transaction(id).await?;

        let posts = match &self.config.trading_posts {
            TradingPostSource::Fixed(posts) => posts.clone(),
            TradingPostSource::Directory => self.ledger.fetch_trading_posts().await?.into(),
        };

        if let Err(reason) = filter::evaluate(&tx, &posts, self.config.policy) {
            warn!("Transaction {} is not eligible: {}", id, reason);
            return Err(reason.into());
        }

        let summary = match request.precomputed() {
            Some(summary) => summary,
            None => {
                let desc = decoder::extract(self.ledger.as_ref(), &tx).await.map_err(|e| {
                    warn!("Could not decode swap {}: {}", id, e);
                    RelayError::from(e)
                })?;
                SwapSummary::Decoded(desc)
            }
        };

        let message = WebhookMessage::for_swap(&tx.id, &summary);
        self.notifier.send(&message).await?;
        Ok(message)
    }
}
