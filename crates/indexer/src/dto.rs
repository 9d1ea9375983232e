//! Normalized upstream shapes and the parsing helpers shared by both
//! sources. Everything downstream of this module sees one block shape
//! regardless of which indexer produced it.

use {
    serde::{Deserialize, Deserializer, de},
    serde_json::Value,
};

/// A block with its relevant transactions fully resolved.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChainBlock {
    pub height: i64,
    pub hash: String,
    pub time: i64,
    /// Bytes; zero when the source does not report it.
    pub size: i64,
    /// Total transactions in the block, including ones not fetched.
    pub tx_count: i64,
    pub txs: Vec<ChainTransaction>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChainTransaction {
    pub txid: String,
    pub kind: Option<TxKind>,
    pub vin: Vec<TxInput>,
    pub vout: Vec<TxOutput>,
}

impl ChainTransaction {
    pub fn total_input_sats(&self) -> u64 {
        self.vin.iter().map(|input| input.value_sats).sum()
    }

    pub fn total_output_sats(&self) -> u64 {
        self.vout.iter().map(|output| output.value_sats).sum()
    }
}

/// Transaction kind as reported by the primary indexer's block summary.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TxKind {
    Transfer,
    Coinbase,
    NodeConfirmation,
    Other,
}

impl TxKind {
    pub fn parse(raw: &str) -> Self {
        let lower = raw.to_ascii_lowercase();
        match lower.as_str() {
            "transfer" => Self::Transfer,
            "coinbase" => Self::Coinbase,
            _ if lower.contains("node") => Self::NodeConfirmation,
            _ => Self::Other,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TxInput {
    pub addresses: Vec<String>,
    pub value_sats: u64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TxOutput {
    /// Output index within the transaction.
    pub n: i64,
    pub addresses: Vec<String>,
    pub value_sats: u64,
}

/// One entry of a wallet's chronological transaction list.
#[derive(Clone, Debug, PartialEq)]
pub struct AddressTx {
    pub txid: String,
    pub block_height: i64,
    pub timestamp: i64,
    pub direction: Direction,
    pub is_coinbase: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    Sent,
    Received,
}

/// Satoshi amounts arrive as integers from the private indexer and as
/// decimal strings from the public explorer.
pub(crate) fn de_sats<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Float(f64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Int(value) => Ok(value),
        Raw::Float(value) => Ok(value.round() as u64),
        Raw::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("bad satoshi amount {text:?}"))),
    }
}

pub(crate) fn de_sats_default<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "de_sats")] u64);
    Option::<Wrapper>::deserialize(deserializer)
        .map(|wrapper| wrapper.map(|Wrapper(value)| value).unwrap_or_default())
}

/// Wire shape of a full transaction body, shared by both API versions.
/// Unknown fields are ignored; the explorers attach plenty.
#[derive(Debug, Deserialize)]
pub(crate) struct RawTransaction {
    pub txid: String,
    #[serde(default, alias = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub vin: Vec<RawVin>,
    #[serde(default)]
    pub vout: Vec<RawVout>,
    #[serde(default, rename = "blockHeight")]
    pub block_height: Option<i64>,
    #[serde(default, rename = "blockTime")]
    pub block_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawVin {
    #[serde(default)]
    pub addresses: Option<Vec<String>>,
    /// Older API versions report a single address instead of a list.
    #[serde(default)]
    pub addr: Option<String>,
    #[serde(default, deserialize_with = "de_sats_default")]
    pub value: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawVout {
    #[serde(default)]
    pub n: Option<i64>,
    #[serde(default, deserialize_with = "de_sats_default")]
    pub value: u64,
    #[serde(default)]
    pub addresses: Option<Vec<String>>,
    #[serde(default, rename = "scriptPubKey")]
    pub script_pub_key: Option<RawScriptPubKey>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawScriptPubKey {
    #[serde(default)]
    pub addresses: Option<Vec<String>>,
}

impl RawVin {
    fn addresses(self) -> Vec<String> {
        match (self.addresses, self.addr) {
            (Some(addresses), _) => addresses,
            (None, Some(addr)) => vec![addr],
            (None, None) => Vec::new(),
        }
    }
}

impl RawTransaction {
    /// Whether every input lacks an address, which is how a block reward
    /// transaction looks on sources that do not report transaction kinds.
    pub(crate) fn looks_like_coinbase(&self) -> bool {
        !self.vin.is_empty()
            && self
                .vin
                .iter()
                .all(|vin| vin.addresses.as_deref().is_none_or(|a| a.is_empty()) && vin.addr.is_none())
    }

    /// Lifts `scriptPubKey.addresses` onto the outputs and fills in missing
    /// output indexes positionally.
    pub(crate) fn normalize(self) -> ChainTransaction {
        let kind = self.kind.as_deref().map(TxKind::parse);
        ChainTransaction {
            txid: self.txid,
            kind,
            vin: self
                .vin
                .into_iter()
                .map(|vin| TxInput {
                    value_sats: vin.value,
                    addresses: vin.addresses(),
                })
                .collect(),
            vout: self
                .vout
                .into_iter()
                .enumerate()
                .map(|(index, vout)| TxOutput {
                    n: vout.n.unwrap_or_else(|| i64::try_from(index).unwrap_or(i64::MAX)),
                    value_sats: vout.value,
                    addresses: vout
                        .addresses
                        .or(vout.script_pub_key.and_then(|script| script.addresses))
                        .unwrap_or_default(),
                })
                .collect(),
        }
    }
}

/// Probes a status or latest-block response for the chain height. The known
/// positions differ between API versions, so all of them are tried.
pub fn extract_height(value: &Value) -> Option<i64> {
    const KEYS: &[&str] = &["height", "blockHeight", "blocks", "bestHeight"];
    const NESTS: &[&str] = &["data", "blockbook", "backend"];
    let direct = KEYS.iter().find_map(|key| as_height(value.get(key)?));
    direct.or_else(|| {
        NESTS
            .iter()
            .filter_map(|nest| value.get(nest))
            .find_map(|nested| KEYS.iter().find_map(|key| as_height(nested.get(key)?)))
    })
}

fn as_height(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}
