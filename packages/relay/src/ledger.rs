//! Ledger Client
//!
//! Fetches transactions, their confirmation state and token contract
//! configuration from an Arweave gateway. Two query backends are supported:
//! the raw transaction API (`/tx/{id}` + `/tx/{id}/status`) and the graph API
//! (`/graphql`), which returns block inclusion and tags in a single call.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

/// Default gateway queried for transactions
pub const DEFAULT_GATEWAY: &str = "https://arweave.net";

/// Request timeout for gateway calls in milliseconds
pub const REQUEST_TIMEOUT_MS: u64 = 20000;

/// Number of winston (base unit) in one AR
pub const WINSTON_PER_AR: u128 = 1_000_000_000_000;

/// Number of trading posts requested per directory page
pub const DIRECTORY_PAGE_SIZE: u32 = 100;

const TRANSACTION_QUERY: &str = "query($id: ID!) { transaction(id: $id) { id recipient owner { address } quantity { winston } tags { name value } block { height } } }";

const TRADING_POST_QUERY: &str = "query($first: Int!, $after: String) { transactions(tags: [{ name: \"Exchange\", values: [\"Verto\"] }, { name: \"Type\", values: [\"Genesis\"] }], first: $first, after: $after) { pageInfo { hasNextPage } edges { cursor node { owner { address } } } } }";

/// Errors that can occur while querying the ledger
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transaction not found: {0}")]
    NotFound(String),

    #[error("Unexpected status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("Malformed gateway response: {0}")]
    Malformed(String),

    #[error("Graph query failed: {0}")]
    Graphql(String),
}

/// A single `{name, value}` transaction tag, already decoded to text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Where a transaction is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfirmationState {
    /// Broadcast but not yet mined
    Pending,
    Confirmed,
    Failed,
    Unknown,
}

impl ConfirmationState {
    /// Map a `/tx/{id}/status` response code to a confirmation state
    pub fn from_status_code(code: u16) -> Self {
        match code {
            200 => ConfirmationState::Confirmed,
            202 => ConfirmationState::Pending,
            400 | 410 => ConfirmationState::Failed,
            _ => ConfirmationState::Unknown,
        }
    }

    /// Whether the transaction has reached a terminal state
    pub fn is_final(&self) -> bool {
        matches!(self, ConfirmationState::Confirmed | ConfirmationState::Failed)
    }
}

/// A transaction as returned by the ledger, read-only to the relay
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: String,
    /// Sender address, when the backend reports one
    pub owner: Option<String>,
    pub recipient: String,
    /// Transferred amount in winston
    pub quantity: u128,
    pub tags: Vec<Tag>,
    pub confirmation: ConfirmationState,
}

impl Transaction {
    /// Value of the first tag with the given name
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.name == name)
            .map(|tag| tag.value.as_str())
    }

    /// Whether any tag is exactly `name: value`
    pub fn has_tag(&self, name: &str, value: &str) -> bool {
        self.tags.iter().any(|tag| tag.name == name && tag.value == value)
    }
}

/// Read access to the ledger
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Fetch a transaction together with its confirmation state
    async fn fetch_transaction(&self, id: &str) -> Result<Transaction, LedgerError>;

    /// Fetch the stored configuration document of a token contract
    async fn fetch_contract_state(&self, contract_id: &str) -> Result<Value, LedgerError>;

    /// List the addresses of all trading posts registered on the exchange
    async fn fetch_trading_posts(&self) -> Result<HashSet<String>, LedgerError>;
}

/// Which gateway API is used to read transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryBackend {
    #[default]
    Raw,
    Graphql,
}

/// Configuration for the gateway client
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the gateway, without a trailing slash
    pub url: String,
    pub backend: QueryBackend,
    pub timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_GATEWAY.to_string(),
            backend: QueryBackend::default(),
            timeout_ms: REQUEST_TIMEOUT_MS,
        }
    }
}

impl GatewayConfig {
    /// Create a new config pointing at the given gateway
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// HTTP client for an Arweave gateway
#[derive(Debug, Clone)]
pub struct ArweaveClient {
    config: GatewayConfig,
    http: Client,
}

impl ArweaveClient {
    pub fn new(config: GatewayConfig) -> Result<Self, LedgerError> {
        let http = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self { config, http })
    }

    pub fn gateway(&self) -> &str {
        &self.config.url
    }

    pub fn backend(&self) -> QueryBackend {
        self.config.backend
    }

    async fn fetch_raw(&self, id: &str) -> Result<Transaction, LedgerError> {
        let status_url = format!("{}/tx/{}/status", self.config.url, id);
        let status = self.http.get(&status_url).send().await?.status();
        let confirmation = ConfirmationState::from_status_code(status.as_u16());
        debug!("Status of {} is {} ({:?})", id, status, confirmation);

        let url = format!("{}/tx/{}", self.config.url, id);
        let response = self.http.get(&url).send().await?;
        match response.status() {
            StatusCode::OK => {}
            // unmined transactions answer with a plain "Pending" body
            StatusCode::ACCEPTED => return self.fetch_unconfirmed(id).await,
            StatusCode::NOT_FOUND => return Err(LedgerError::NotFound(id.to_string())),
            other => {
                return Err(LedgerError::UnexpectedStatus {
                    status: other.as_u16(),
                    url,
                })
            }
        }

        let body = response.text().await?;
        parse_raw_transaction(&body, confirmation)
    }

    /// Read a transaction that is still in the mempool
    async fn fetch_unconfirmed(&self, id: &str) -> Result<Transaction, LedgerError> {
        let url = format!("{}/unconfirmed_tx/{}", self.config.url, id);
        let response = self.http.get(&url).send().await?;
        match response.status() {
            StatusCode::OK => {
                let body = response.text().await?;
                parse_raw_transaction(&body, ConfirmationState::Pending)
            }
            StatusCode::NOT_FOUND => {
                debug!("{} is not served as unconfirmed, asking the graph", id);
                let mut tx = self.fetch_graphql(id).await?;
                tx.confirmation = ConfirmationState::Pending;
                Ok(tx)
            }
            other => Err(LedgerError::UnexpectedStatus {
                status: other.as_u16(),
                url,
            }),
        }
    }

    async fn fetch_graphql(&self, id: &str) -> Result<Transaction, LedgerError> {
        let body = self
            .graphql(json!({ "query": TRANSACTION_QUERY, "variables": { "id": id } }))
            .await?;
        parse_graphql_transaction(&body)?.ok_or_else(|| LedgerError::NotFound(id.to_string()))
    }

    async fn graphql(&self, payload: Value) -> Result<String, LedgerError> {
        let url = format!("{}/graphql", self.config.url);
        let response = self.http.post(&url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(LedgerError::UnexpectedStatus {
                status: response.status().as_u16(),
                url,
            });
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl LedgerClient for ArweaveClient {
    async fn fetch_transaction(&self, id: &str) -> Result<Transaction, LedgerError> {
        match self.config.backend {
            QueryBackend::Raw => self.fetch_raw(id).await,
            QueryBackend::Graphql => self.fetch_graphql(id).await,
        }
    }

    async fn fetch_contract_state(&self, contract_id: &str) -> Result<Value, LedgerError> {
        // A contract's data is its initial state document
        let url = format!("{}/{}", self.config.url, contract_id);
        let response = self.http.get(&url).send().await?;
        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(LedgerError::NotFound(contract_id.to_string())),
            other => {
                return Err(LedgerError::UnexpectedStatus {
                    status: other.as_u16(),
                    url,
                })
            }
        }
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| LedgerError::Malformed(e.to_string()))
    }

    async fn fetch_trading_posts(&self) -> Result<HashSet<String>, LedgerError> {
        let mut posts = HashSet::new();
        let mut after: Option<String> = None;
        loop {
            let body = self
                .graphql(json!({
                    "query": TRADING_POST_QUERY,
                    "variables": { "first": DIRECTORY_PAGE_SIZE, "after": after },
                }))
                .await?;
            let page = parse_trading_post_page(&body)?;
            posts.extend(page.posts);
            match page.next_cursor {
                Some(cursor) if after.as_deref() != Some(cursor.as_str()) => after = Some(cursor),
                Some(cursor) => {
                    warn!("Trading post directory repeated cursor {}, stopping", cursor);
                    break;
                }
                None => break,
            }
        }
        debug!("Trading post directory lists {} posts", posts.len());
        if posts.is_empty() {
            warn!("Trading post directory returned no entries");
        }
        Ok(posts)
    }
}

// ==================== Wire formats ====================

#[derive(Deserialize)]
struct RawTransaction {
    id: String,
    #[serde(default)]
    target: String,
    #[serde(default)]
    quantity: String,
    #[serde(default)]
    tags: Vec<RawTag>,
}

#[derive(Deserialize)]
struct RawTag {
    name: String,
    value: String,
}

#[derive(Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlErrorEntry>,
}

#[derive(Deserialize)]
struct GraphqlErrorEntry {
    message: String,
}

#[derive(Deserialize)]
struct TransactionData {
    transaction: Option<GqlTransaction>,
}

#[derive(Deserialize)]
struct GqlTransaction {
    id: String,
    #[serde(default)]
    recipient: String,
    owner: Option<GqlOwner>,
    quantity: GqlAmount,
    #[serde(default)]
    tags: Vec<RawTag>,
    block: Option<GqlBlock>,
}

#[derive(Deserialize)]
struct GqlOwner {
    address: String,
}

#[derive(Deserialize)]
struct GqlAmount {
    winston: String,
}

#[derive(Deserialize)]
#[allow(dead_code)]
struct GqlBlock {
    height: u64,
}

#[derive(Deserialize)]
struct TransactionsData {
    transactions: GqlConnection,
}

#[derive(Deserialize)]
struct GqlConnection {
    #[serde(rename = "pageInfo")]
    page_info: Option<GqlPageInfo>,
    edges: Vec<GqlEdge>,
}

#[derive(Deserialize)]
struct GqlPageInfo {
    #[serde(rename = "hasNextPage")]
    has_next_page: bool,
}

#[derive(Deserialize)]
struct GqlEdge {
    cursor: Option<String>,
    node: GqlNode,
}

#[derive(Deserialize)]
struct GqlNode {
    owner: GqlOwner,
}

/// Decode a base64url field, tolerating trailing padding
pub fn decode_b64url(encoded: &str) -> Result<String, LedgerError> {
    let bytes = base64::decode_config(encoded.trim_end_matches('='), base64::URL_SAFE_NO_PAD)
        .map_err(|e| LedgerError::Malformed(format!("invalid base64url '{}': {}", encoded, e)))?;
    String::from_utf8(bytes).map_err(|e| LedgerError::Malformed(e.to_string()))
}

/// Parse a winston amount, treating an empty string as zero
pub fn parse_winston(quantity: &str) -> Result<u128, LedgerError> {
    let quantity = quantity.trim();
    if quantity.is_empty() {
        return Ok(0);
    }
    quantity
        .parse()
        .map_err(|_| LedgerError::Malformed(format!("invalid quantity '{}'", quantity)))
}

/// Parse a `/tx/{id}` response body; tags arrive base64url encoded
pub fn parse_raw_transaction(
    body: &str,
    confirmation: ConfirmationState,
) -> Result<Transaction, LedgerError> {
    let raw: RawTransaction =
        serde_json::from_str(body).map_err(|e| LedgerError::Malformed(e.to_string()))?;

    let tags = raw
        .tags
        .iter()
        .map(|tag| Ok(Tag::new(decode_b64url(&tag.name)?, decode_b64url(&tag.value)?)))
        .collect::<Result<Vec<_>, LedgerError>>()?;

    Ok(Transaction {
        id: raw.id,
        owner: None,
        recipient: raw.target,
        quantity: parse_winston(&raw.quantity)?,
        tags,
        confirmation,
    })
}

/// Parse a graph transaction query response
///
/// Returns `Ok(None)` when the gateway does not know the transaction.
pub fn parse_graphql_transaction(body: &str) -> Result<Option<Transaction>, LedgerError> {
    let response: GraphqlResponse<TransactionData> =
        serde_json::from_str(body).map_err(|e| LedgerError::Malformed(e.to_string()))?;
    let data = graphql_data(response)?;

    let Some(tx) = data.transaction else {
        return Ok(None);
    };

    let confirmation = if tx.block.is_some() {
        ConfirmationState::Confirmed
    } else {
        ConfirmationState::Pending
    };

    Ok(Some(Transaction {
        id: tx.id,
        owner: tx.owner.map(|o| o.address),
        recipient: tx.recipient,
        quantity: parse_winston(&tx.quantity.winston)?,
        tags: tx
            .tags
            .into_iter()
            .map(|tag| Tag::new(tag.name, tag.value))
            .collect(),
        confirmation,
    }))
}

/// One page of the trading post directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryPage {
    pub posts: HashSet<String>,
    /// Cursor to continue from, when the gateway reports more pages
    pub next_cursor: Option<String>,
}

/// Parse a trading post directory query response into the owner addresses
pub fn parse_trading_post_page(body: &str) -> Result<DirectoryPage, LedgerError> {
    let response: GraphqlResponse<TransactionsData> =
        serde_json::from_str(body).map_err(|e| LedgerError::Malformed(e.to_string()))?;
    let connection = graphql_data(response)?.transactions;

    let has_next_page = connection.page_info.is_some_and(|info| info.has_next_page);
    let next_cursor = if has_next_page {
        connection.edges.last().and_then(|edge| edge.cursor.clone())
    } else {
        None
    };

    Ok(DirectoryPage {
        posts: connection
            .edges
            .into_iter()
            .map(|edge| edge.node.owner.address)
            .collect(),
        next_cursor,
    })
}

fn graphql_data<T>(response: GraphqlResponse<T>) -> Result<T, LedgerError> {
    if let Some(err) = response.errors.first() {
        return Err(LedgerError::Graphql(err.message.clone()));
    }
    response
        .data
        .ok_or_else(|| LedgerError::Malformed("graph response has no data".to_string()))
}
