//! Swap Eligibility Filtering
//!
//! Decides whether a transaction is a notifiable Verto swap: it must carry the
//! exchange protocol tag, be addressed to a known trading post, and be in the
//! lifecycle state selected by the notify policy.

use std::collections::HashSet;

use thiserror::Error;

use crate::ledger::{ConfirmationState, Transaction};

/// Tag name of the protocol marker
pub const PROTOCOL_TAG_NAME: &str = "Exchange";

/// Tag value of the protocol marker
pub const PROTOCOL_TAG_VALUE: &str = "Verto";

/// When in a transaction's lifecycle a notification fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifyPolicy {
    /// Fire while the transaction is pending, so consumers see the swap as it happens
    #[default]
    OnBroadcast,
    /// Fire once the transaction is mined
    OnConfirmation,
}

impl NotifyPolicy {
    fn check(&self, state: ConfirmationState) -> Result<(), Ineligible> {
        match (self, state) {
            (NotifyPolicy::OnBroadcast, ConfirmationState::Pending) => Ok(()),
            (NotifyPolicy::OnBroadcast, s) if s.is_final() => Err(Ineligible::AlreadyFinalized),
            (NotifyPolicy::OnConfirmation, ConfirmationState::Confirmed) => Ok(()),
            (NotifyPolicy::OnConfirmation, ConfirmationState::Pending) => {
                Err(Ineligible::NotYetConfirmed)
            }
            (NotifyPolicy::OnConfirmation, ConfirmationState::Failed) => {
                Err(Ineligible::AlreadyFinalized)
            }
            _ => Err(Ineligible::UnknownStatus),
        }
    }
}

/// Why a transaction does not qualify for a notification
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
    #[error("Invalid tags")]
    MissingProtocolTag,

    #[error("Invalid trading post")]
    UnknownTradingPost,

    #[error("Already completed")]
    AlreadyFinalized,

    #[error("Not yet confirmed")]
    NotYetConfirmed,

    #[error("Unknown status")]
    UnknownStatus,
}

/// The set of recipients accepted as trading posts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TradingPosts {
    addresses: HashSet<String>,
}

impl TradingPosts {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, address: &str) -> bool {
        self.addresses.contains(address)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

impl From<HashSet<String>> for TradingPosts {
    fn from(addresses: HashSet<String>) -> Self {
        Self { addresses }
    }
}

/// Check whether the transaction carries the `Exchange: Verto` marker
pub fn has_protocol_tag(tx: &Transaction) -> bool {
    tx.has_tag(PROTOCOL_TAG_NAME, PROTOCOL_TAG_VALUE)
}

/// Evaluate a transaction, returning the first rule it fails
///
/// Rules are checked in order: protocol tag, trading post, lifecycle state.
pub fn evaluate(
    tx: &Transaction,
    posts: &TradingPosts,
    policy: NotifyPolicy,
) -> Result<(), Ineligible> {
    if !has_protocol_tag(tx) {
        return Err(Ineligible::MissingProtocolTag);
    }
    if !posts.contains(&tx.recipient) {
        return Err(Ineligible::UnknownTradingPost);
    }
    policy.check(tx.confirmation)
}

/// Whether a transaction qualifies as a notifiable swap
pub fn is_eligible(tx: &Transaction, posts: &TradingPosts, policy: NotifyPolicy) -> bool {
    evaluate(tx, posts, policy).is_ok()
}
