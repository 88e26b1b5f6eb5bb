//! Webhook Publisher
//!
//! Formats swap notifications as rich chat-webhook messages and POSTs them to
//! the configured webhook.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::decoder::{SwapDescription, NATIVE_EXPLORER_URL};

/// Environment variable holding the webhook URL
pub const DEFAULT_WEBHOOK_ENV: &str = "WEBHOOK";

/// Name the webhook posts under
pub const WEBHOOK_USERNAME: &str = "Verto";

/// Footer text of every swap message
pub const FOOTER_TEXT: &str = "Verto Exchange";

/// Embed accent color
pub const EMBED_COLOR: u32 = 0x8C_5A_E8;

/// Timeout for webhook calls in milliseconds
pub const WEBHOOK_TIMEOUT_MS: u64 = 20000;

/// Errors that can occur while sending a notification
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook rejected the message with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Webhook URL not configured: environment variable {0} is not set")]
    MissingWebhook(String),
}

/// What a notification says about a swap
#[derive(Debug, Clone, PartialEq)]
pub enum SwapSummary {
    /// Details decoded from the transaction's tags
    Decoded(SwapDescription),
    /// Legs supplied by the caller
    Precomputed { from: String, to: String },
}

/// Footer of an embed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbedFooter {
    pub text: String,
}

/// A single rich embed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Embed {
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub color: u32,
    pub footer: EmbedFooter,
}

/// Webhook request body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookMessage {
    pub username: String,
    pub embeds: Vec<Embed>,
}

impl WebhookMessage {
    /// Build the message announcing a swap
    pub fn for_swap(tx_id: &str, summary: &SwapSummary) -> Self {
        let (description, url) = match summary {
            SwapSummary::Decoded(desc) => (
                format!("{}\n`{}`", desc.summary(), desc.display_id),
                desc.link(),
            ),
            SwapSummary::Precomputed { from, to } => (
                format!("{} → {}\n`{}`", from, to, tx_id),
                format!("{}{}", NATIVE_EXPLORER_URL, tx_id),
            ),
        };

        WebhookMessage {
            username: WEBHOOK_USERNAME.to_string(),
            embeds: vec![Embed {
                title: "New Swap".to_string(),
                description,
                url: Some(url),
                color: EMBED_COLOR,
                footer: EmbedFooter {
                    text: FOOTER_TEXT.to_string(),
                },
            }],
        }
    }

    /// Serialize the message to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize a message from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Sends notifications somewhere
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &WebhookMessage) -> Result<(), NotifyError>;
}

/// Where the webhook URL comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookTarget {
    /// Read from this environment variable on every send
    Env(String),
    Url(String),
}

impl Default for WebhookTarget {
    fn default() -> Self {
        WebhookTarget::Env(DEFAULT_WEBHOOK_ENV.to_string())
    }
}

impl WebhookTarget {
    pub fn resolve(&self) -> Result<String, NotifyError> {
        match self {
            WebhookTarget::Url(url) => Ok(url.clone()),
            WebhookTarget::Env(var) => std::env::var(var)
                .ok()
                .filter(|url| !url.is_empty())
                .ok_or_else(|| NotifyError::MissingWebhook(var.clone())),
        }
    }
}

/// Posts messages to a chat webhook
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    target: WebhookTarget,
}

impl WebhookNotifier {
    pub fn new(target: WebhookTarget) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(WEBHOOK_TIMEOUT_MS))
            .build()?;
        Ok(Self { client, target })
    }

    pub fn target(&self) -> &WebhookTarget {
        &self.target
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, message: &WebhookMessage) -> Result<(), NotifyError> {
        let url = self.target.resolve()?;
        let response = self.client.post(&url).json(message).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!("Webhook accepted message ({})", status);
        Ok(())
    }
}
