use {
    crate::{
        FetchError, check_status,
        client::DataSource,
        dto::{self, AddressTx, ChainBlock, ChainTransaction, Direction, TxKind},
        primary::ensure_trailing_slash,
        settings::SourceSettings,
    },
    serde::Deserialize,
    serde_json::Value,
    url::Url,
};

/// The public explorer (v2, blockbook style API). Full transactions arrive
/// inline with the block; no kind summaries, so block rewards are recognized
/// by their address-less inputs instead.
pub struct FallbackSource {
    base: Url,
    client: reqwest::Client,
    settings: SourceSettings,
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    height: i64,
    hash: String,
    time: i64,
    #[serde(default)]
    size: i64,
    #[serde(default, rename = "txCount")]
    tx_count: Option<i64>,
    #[serde(default)]
    txs: Vec<dto::RawTransaction>,
}

#[derive(Debug, Deserialize)]
struct RawAddress {
    #[serde(default)]
    transactions: Vec<dto::RawTransaction>,
}

impl FallbackSource {
    pub fn new(base: Url, client: reqwest::Client, settings: SourceSettings) -> Self {
        Self {
            base: ensure_trailing_slash(base),
            client,
            settings,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let url = self
            .base
            .join(path)
            .map_err(|err| FetchError::Shape(format!("bad path {path:?}: {err}")))?;
        let response = self
            .client
            .get(url)
            .timeout(self.settings.request_timeout)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }
}

fn classify_kind(raw: &dto::RawTransaction) -> Option<TxKind> {
    raw.looks_like_coinbase().then_some(TxKind::Coinbase)
}

fn to_address_tx(tx: dto::RawTransaction, address: &str) -> AddressTx {
    let is_coinbase = tx.looks_like_coinbase();
    let block_height = tx.block_height.unwrap_or_default();
    let timestamp = tx.block_time.unwrap_or_default();
    let normalized = tx.normalize();
    let sent = normalized
        .vin
        .iter()
        .any(|vin| vin.addresses.iter().any(|a| a == address));
    AddressTx {
        txid: normalized.txid,
        block_height,
        timestamp,
        direction: if sent { Direction::Sent } else { Direction::Received },
        is_coinbase,
    }
}

#[async_trait::async_trait]
impl DataSource for FallbackSource {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    async fn chain_height(&self) -> Result<i64, FetchError> {
        let status: Value = self.get_json("api/v2/status").await?;
        if let Some(height) = dto::extract_height(&status) {
            return Ok(height);
        }
        // Blockbook also reports the best height on its API root.
        let root: Value = self.get_json("api/").await?;
        dto::extract_height(&root)
            .ok_or_else(|| FetchError::Shape("no chain height in explorer status".into()))
    }

    async fn get_block(&self, height: i64) -> Result<ChainBlock, FetchError> {
        let raw: RawBlock = self.get_json(&format!("api/v2/block/{height}")).await?;
        let tx_count = raw
            .tx_count
            .unwrap_or_else(|| i64::try_from(raw.txs.len()).unwrap_or(i64::MAX));
        let txs = raw
            .txs
            .into_iter()
            .take(self.settings.tx_fetch_limit)
            .map(|tx| {
                let kind = classify_kind(&tx);
                let mut tx = tx.normalize();
                tx.kind = tx.kind.or(kind);
                tx
            })
            .collect();
        Ok(ChainBlock {
            height: raw.height,
            hash: raw.hash,
            time: raw.time,
            size: raw.size,
            tx_count,
            txs,
        })
    }

    async fn get_transaction(&self, txid: &str) -> Result<ChainTransaction, FetchError> {
        let raw: dto::RawTransaction = self.get_json(&format!("api/v2/tx/{txid}")).await?;
        Ok(raw.normalize())
    }

    /// The explorer does not report per-wallet direction, so it is derived:
    /// a transaction spending one of the wallet's outputs counts as sent,
    /// everything else as received.
    async fn get_address_transactions(&self, address: &str) -> Result<Vec<AddressTx>, FetchError> {
        let raw: RawAddress = self
            .get_json(&format!("api/v2/address/{address}?details=txs"))
            .await?;
        let mut txs: Vec<AddressTx> = raw
            .transactions
            .into_iter()
            .map(|tx| to_address_tx(tx, address))
            .collect();
        txs.sort_by_key(|tx| (tx.block_height, tx.timestamp));
        Ok(txs)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn block_rewards_are_marked_coinbase() {
        let raw: RawBlock = serde_json::from_value(json!({
            "height": 1000,
            "hash": "h",
            "time": 30000,
            "txCount": 2,
            "txs": [
                {
                    "txid": "cb",
                    "vin": [{"value": "5625000000"}],
                    "vout": [{"value": "5625000000", "addresses": ["t1miner"]}]
                },
                {
                    "txid": "aa",
                    "vin": [{"addresses": ["t1from"], "value": "100"}],
                    "vout": [{"value": "90", "addresses": ["t1to"]}]
                }
            ]
        }))
        .unwrap();
        let kinds: Vec<Option<TxKind>> = raw
            .txs
            .iter()
            .map(classify_kind)
            .collect();
        assert_eq!(kinds, vec![Some(TxKind::Coinbase), None]);
    }

    #[test]
    fn address_direction_is_derived_from_inputs() {
        let raw: RawAddress = serde_json::from_value(json!({
            "transactions": [
                {
                    "txid": "recv",
                    "blockHeight": 1100,
                    "blockTime": 33000,
                    "vin": [{"addresses": ["t1other"], "value": "100"}],
                    "vout": [{"value": "100", "addresses": ["t1me"]}]
                },
                {
                    "txid": "sent",
                    "blockHeight": 1000,
                    "blockTime": 30000,
                    "vin": [{"addresses": ["t1me"], "value": "50"}],
                    "vout": [{"value": "50", "addresses": ["t1other"]}]
                }
            ]
        }))
        .unwrap();

        let mut txs: Vec<AddressTx> = raw
            .transactions
            .into_iter()
            .map(|tx| to_address_tx(tx, "t1me"))
            .collect();
        txs.sort_by_key(|tx| (tx.block_height, tx.timestamp));
        assert_eq!(txs[0].txid, "sent");
        assert_eq!(txs[0].direction, Direction::Sent);
        assert_eq!(txs[1].txid, "recv");
        assert_eq!(txs[1].direction, Direction::Received);
    }
}
