//! Swap Decoder
//!
//! Turns an eligible transaction's tags into a swap description. Tags are
//! scanned once into a [`SwapShape`], then any token contract reference is
//! resolved to its ticker through the ledger.

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::ledger::{LedgerClient, LedgerError, Transaction, WINSTON_PER_AR};

/// Symbol of the ledger's native coin
pub const NATIVE_SYMBOL: &str = "AR";

/// Symbol of the external chain swaps can settle on
pub const EXTERNAL_SYMBOL: &str = "ETH";

/// Explorer for transactions on the native ledger
pub const NATIVE_EXPLORER_URL: &str = "https://viewblock.io/arweave/tx/";

/// Explorer for transactions on the external chain
pub const EXTERNAL_EXPLORER_URL: &str = "https://etherscan.io/tx/";

/// Errors that can occur while decoding a swap
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Incomplete swap tags: missing or invalid {0}")]
    IncompleteTagSet(&'static str),

    #[error("Incomplete swap tags: Hash {0:?} is not a hex transaction hash")]
    InvalidHash(String),

    #[error("Conflicting swap tags")]
    ConflictingTags,

    #[error("Incomplete swap tags: no swap shape matches")]
    UnrecognizedShape,

    #[error("Could not resolve ticker: {0}")]
    TickerResolution(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// The five ways a swap can be encoded in a transaction's tags
#[derive(Debug, Clone, PartialEq)]
pub enum SwapShape {
    /// Token transfer into a trading post, paid out in AR
    TokenToNative { contract: String, qty: f64 },
    /// ETH deposited on the external chain, paid out in AR
    ExternalToNative { value: f64, hash: String },
    /// ETH deposited on the external chain, paid out in a token
    ExternalToToken { token: String, value: f64, hash: String },
    /// AR sent to a trading post, paid out in ETH
    NativeToExternal { quantity: u128 },
    /// AR sent to a trading post, paid out in a token
    NativeToToken { token: String, quantity: u128 },
}

impl SwapShape {
    /// Short human-readable name of the shape
    pub fn name(&self) -> &'static str {
        match self {
            SwapShape::TokenToNative { .. } => "token→AR",
            SwapShape::ExternalToNative { .. } => "ETH→AR",
            SwapShape::ExternalToToken { .. } => "ETH→token",
            SwapShape::NativeToExternal { .. } => "AR→ETH",
            SwapShape::NativeToToken { .. } => "AR→token",
        }
    }

    fn legs(&self) -> (Currency, Currency) {
        match self {
            SwapShape::TokenToNative { contract, .. } => {
                (Currency::Token(contract.clone()), Currency::Native)
            }
            SwapShape::ExternalToNative { .. } => (Currency::External, Currency::Native),
            SwapShape::ExternalToToken { token, .. } => {
                (Currency::External, Currency::Token(token.clone()))
            }
            SwapShape::NativeToExternal { .. } => (Currency::Native, Currency::External),
            SwapShape::NativeToToken { token, .. } => {
                (Currency::Native, Currency::Token(token.clone()))
            }
        }
    }

    fn from_amount(&self) -> f64 {
        match self {
            SwapShape::TokenToNative { qty, .. } => *qty,
            SwapShape::ExternalToNative { value, .. } | SwapShape::ExternalToToken { value, .. } => {
                *value
            }
            SwapShape::NativeToExternal { quantity } | SwapShape::NativeToToken { quantity, .. } => {
                winston_to_ar(*quantity)
            }
        }
    }

    /// Hash of the counterparty leg on the external chain, if any
    fn external_hash(&self) -> Option<&str> {
        match self {
            SwapShape::ExternalToNative { hash, .. } | SwapShape::ExternalToToken { hash, .. } => {
                Some(hash)
            }
            _ => None,
        }
    }
}

/// A currency leg before ticker resolution
#[derive(Debug, Clone, PartialEq, Eq)]
enum Currency {
    Native,
    External,
    /// Token contract id
    Token(String),
}

/// Normalized swap details shown in a notification
#[derive(Debug, Clone, PartialEq)]
pub struct SwapDescription {
    pub from_currency: String,
    pub to_currency: String,
    pub from_amount: f64,
    /// Identifier shown and linked in the notification
    pub display_id: String,
    /// Whether `display_id` lives on the external chain
    pub external: bool,
}

impl SwapDescription {
    /// Explorer link for the display id
    pub fn link(&self) -> String {
        if self.external {
            format!("{}{}", EXTERNAL_EXPLORER_URL, self.display_id)
        } else {
            format!("{}{}", NATIVE_EXPLORER_URL, self.display_id)
        }
    }

    /// One-line summary, e.g. `2.5 ETH → AR`
    pub fn summary(&self) -> String {
        format!(
            "{} {} → {}",
            self.from_amount, self.from_currency, self.to_currency
        )
    }
}

/// Convert a winston amount to AR
pub fn winston_to_ar(quantity: u128) -> f64 {
    quantity as f64 / WINSTON_PER_AR as f64
}

/// First occurrence of each swap-relevant tag
#[derive(Debug, Default)]
struct SwapTags<'a> {
    contract: Option<&'a str>,
    input: Option<&'a str>,
    chain: Option<&'a str>,
    value: Option<&'a str>,
    hash: Option<&'a str>,
    token: Option<&'a str>,
}

impl<'a> SwapTags<'a> {
    fn scan(tx: &'a Transaction) -> Self {
        let mut tags = SwapTags::default();
        for tag in &tx.tags {
            let slot = match tag.name.as_str() {
                "Contract" => &mut tags.contract,
                "Input" => &mut tags.input,
                "Chain" => &mut tags.chain,
                "Value" => &mut tags.value,
                "Hash" => &mut tags.hash,
                "Token" => &mut tags.token,
                _ => continue,
            };
            slot.get_or_insert(tag.value.as_str());
        }
        tags
    }

    fn external_chain(&self) -> bool {
        self.chain == Some(EXTERNAL_SYMBOL)
    }
}

/// Classify a transaction's tags into exactly one swap shape
pub fn classify(tx: &Transaction) -> Result<SwapShape, DecodeError> {
    let tags = SwapTags::scan(tx);

    if tx.quantity == 0 {
        match (tags.contract, tags.external_chain()) {
            (Some(_), true) => Err(DecodeError::ConflictingTags),
            (Some(contract), false) => {
                let input = tags.input.ok_or(DecodeError::IncompleteTagSet("Input"))?;
                Ok(SwapShape::TokenToNative {
                    contract: contract.to_string(),
                    qty: parse_input_qty(input)?,
                })
            }
            (None, true) => {
                let value = parse_amount(tags.value.ok_or(DecodeError::IncompleteTagSet("Value"))?)
                    .ok_or(DecodeError::IncompleteTagSet("Value"))?;
                let hash = tags.hash.ok_or(DecodeError::IncompleteTagSet("Hash"))?;
                if !is_hex_hash(hash) {
                    return Err(DecodeError::InvalidHash(hash.to_string()));
                }
                let hash = hash.to_string();
                Ok(match tags.token {
                    Some(token) => SwapShape::ExternalToToken {
                        token: token.to_string(),
                        value,
                        hash,
                    },
                    None => SwapShape::ExternalToNative { value, hash },
                })
            }
            (None, false) => Err(DecodeError::UnrecognizedShape),
        }
    } else {
        match (tags.external_chain(), tags.token) {
            (true, Some(_)) => Err(DecodeError::ConflictingTags),
            (true, None) => Ok(SwapShape::NativeToExternal {
                quantity: tx.quantity,
            }),
            (false, Some(token)) => Ok(SwapShape::NativeToToken {
                token: token.to_string(),
                quantity: tx.quantity,
            }),
            (false, None) => Err(DecodeError::UnrecognizedShape),
        }
    }
}

/// Read `qty` out of a contract interaction's JSON `Input` tag
fn parse_input_qty(input: &str) -> Result<f64, DecodeError> {
    let input: Value =
        serde_json::from_str(input).map_err(|_| DecodeError::IncompleteTagSet("Input"))?;
    let qty = match input.get("qty") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => parse_amount(s),
        _ => None,
    };
    qty.ok_or(DecodeError::IncompleteTagSet("Input"))
}

fn parse_amount(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

/// Whether a value looks like a hex transaction hash (with or without 0x)
pub fn is_hex_hash(hash: &str) -> bool {
    let digits = hash.strip_prefix("0x").unwrap_or(hash);
    !digits.is_empty() && hex::decode(digits).is_ok()
}

/// Resolve a token contract id to its ticker
pub async fn resolve_ticker<L>(ledger: &L, contract_id: &str) -> Result<String, DecodeError>
where
    L: LedgerClient + ?Sized,
{
    let state = match ledger.fetch_contract_state(contract_id).await {
        Ok(state) => state,
        Err(LedgerError::NotFound(_)) | Err(LedgerError::Malformed(_)) => {
            return Err(DecodeError::TickerResolution(contract_id.to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    state
        .get("ticker")
        .and_then(Value::as_str)
        .filter(|ticker| !ticker.is_empty())
        .map(str::to_string)
        .ok_or_else(|| DecodeError::TickerResolution(contract_id.to_string()))
}

async fn currency_symbol<L>(ledger: &L, currency: Currency) -> Result<String, DecodeError>
where
    L: LedgerClient + ?Sized,
{
    match currency {
        Currency::Native => Ok(NATIVE_SYMBOL.to_string()),
        Currency::External => Ok(EXTERNAL_SYMBOL.to_string()),
        Currency::Token(contract) => resolve_ticker(ledger, &contract).await,
    }
}

/// Build the swap description for a classified transaction
///
/// Ticker lookups happen here, after tag scanning has finished.
pub async fn describe<L>(
    ledger: &L,
    tx_id: &str,
    shape: &SwapShape,
) -> Result<SwapDescription, DecodeError>
where
    L: LedgerClient + ?Sized,
{
    let (from, to) = shape.legs();
    let from_currency = currency_symbol(ledger, from).await?;
    let to_currency = currency_symbol(ledger, to).await?;

    let (display_id, external) = match shape.external_hash() {
        Some(hash) => (hash.to_string(), true),
        None => (tx_id.to_string(), false),
    };

    debug!("Decoded {} swap for {}", shape.name(), tx_id);

    Ok(SwapDescription {
        from_currency,
        to_currency,
        from_amount: shape.from_amount(),
        display_id,
        external,
    })
}

/// Classify and describe a transaction in one step
pub async fn extract<L>(ledger: &L, tx: &Transaction) -> Result<SwapDescription, DecodeError>
where
    L: LedgerClient + ?Sized,
{
    let shape = classify(tx)?;
    describe(ledger, &tx.id, &shape).await
}
