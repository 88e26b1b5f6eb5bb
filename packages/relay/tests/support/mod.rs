//! Shared fakes for the integration tests: an in-memory ledger and a
//! notifier that records what it was asked to send.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use verto_relay::ledger::{ConfirmationState, LedgerClient, LedgerError, Tag, Transaction};
use verto_relay::publisher::{Notifier, NotifyError, WebhookMessage};

pub const TRADING_POST: &str = "trading-post-1";

/// Ledger backed by maps, counting the transaction fetches it serves
#[derive(Default)]
pub struct MockLedger {
    transactions: Mutex<HashMap<String, Transaction>>,
    contracts: Mutex<HashMap<String, Value>>,
    posts: HashSet<String>,
    fetches: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            posts: HashSet::from([TRADING_POST.to_string()]),
            ..Default::default()
        }
    }

    pub fn add_transaction(&self, tx: Transaction) {
        self.transactions.lock().unwrap().insert(tx.id.clone(), tx);
    }

    pub fn add_token(&self, contract_id: &str, ticker: &str) {
        self.add_contract_state(contract_id, json!({ "ticker": ticker, "balances": {} }));
    }

    pub fn add_contract_state(&self, contract_id: &str, state: Value) {
        self.contracts
            .lock()
            .unwrap()
            .insert(contract_id.to_string(), state);
    }

    /// Make every transaction fetch stall for `delay`
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn fetch_transaction(&self, id: &str) -> Result<Transaction, LedgerError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.transactions
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))
    }

    async fn fetch_contract_state(&self, contract_id: &str) -> Result<Value, LedgerError> {
        self.contracts
            .lock()
            .unwrap()
            .get(contract_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(contract_id.to_string()))
    }

    async fn fetch_trading_posts(&self) -> Result<HashSet<String>, LedgerError> {
        Ok(self.posts.clone())
    }
}

/// Notifier that captures messages and can be told to fail
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    messages: Arc<Mutex<Vec<WebhookMessage>>>,
    fail_next: Arc<Mutex<usize>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<WebhookMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn set_fail_next(&self, count: usize) {
        *self.fail_next.lock().unwrap() = count;
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &WebhookMessage) -> Result<(), NotifyError> {
        {
            let mut fail_count = self.fail_next.lock().unwrap();
            if *fail_count > 0 {
                *fail_count -= 1;
                return Err(NotifyError::Rejected {
                    status: 503,
                    body: "webhook unavailable".to_string(),
                });
            }
        }
        // give concurrent runs a chance to interleave
        tokio::task::yield_now().await;
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// A pending transaction to the trading post carrying the given tags
pub fn swap_tx(id: &str, quantity: u128, tags: &[(&str, &str)]) -> Transaction {
    let mut all_tags = vec![Tag::new("Exchange", "Verto")];
    all_tags.extend(tags.iter().map(|(n, v)| Tag::new(*n, *v)));
    Transaction {
        id: id.to_string(),
        owner: Some("trader".to_string()),
        recipient: TRADING_POST.to_string(),
        quantity,
        tags: all_tags,
        confirmation: ConfirmationState::Pending,
    }
}

/// The ETH → AR swap used throughout the tests
pub fn eth_deposit_tx(id: &str) -> Transaction {
    swap_tx(id, 0, &[("Chain", "ETH"), ("Hash", "0xdead"), ("Value", "2.5")])
}
