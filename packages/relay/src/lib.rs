//! Verto Relay Library
//!
//! This crate provides the components of a swap notification relay: a ledger
//! client for Arweave gateways, swap eligibility filtering, tag decoding into
//! swap descriptions, a deduplication ledger, and a chat-webhook publisher.

pub mod config;
pub mod decoder;
pub mod dedup;
pub mod filter;
pub mod ledger;
pub mod publisher;
pub mod relay;
pub mod server;

// Re-export commonly used types
pub use decoder::{classify, extract, SwapDescription, SwapShape};
pub use dedup::{Claim, DedupLedger, FileLedger, MemoryLedger, RedisLedger};
pub use filter::{evaluate, is_eligible, Ineligible, NotifyPolicy, TradingPosts};
pub use ledger::{ArweaveClient, ConfirmationState, LedgerClient, Tag, Transaction};
pub use publisher::{Notifier, WebhookMessage, WebhookNotifier};
pub use relay::{Relay, RelayConfig, RelayError, SwapRequest};
