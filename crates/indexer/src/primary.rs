use {
    crate::{
        FetchError, check_status,
        client::DataSource,
        dto::{self, AddressTx, ChainBlock, ChainTransaction, Direction, TxKind},
        settings::SourceSettings,
    },
    futures::future::join_all,
    serde::Deserialize,
    serde_json::Value,
    url::Url,
};

/// The private local indexer (v1 API). Exposes transaction kind summaries
/// inline with each block so irrelevant transactions are dropped before any
/// full fetch.
pub struct PrimarySource {
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
    /// All txids in the block.
    #[serde(default)]
    tx: Vec<String>,
    /// Kind summary per transaction, when the indexer provides one.
    #[serde(default, rename = "txDetails")]
    tx_details: Vec<RawTxSummary>,
}

#[derive(Debug, Deserialize)]
struct RawTxSummary {
    txid: String,
    #[serde(default)]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAddressTx {
    txid: String,
    #[serde(default)]
    block_height: i64,
    #[serde(default)]
    timestamp: i64,
    direction: String,
    #[serde(default)]
    is_coinbase: bool,
}

impl PrimarySource {
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

    /// Which transactions of a block deserve a full fetch. With kind
    /// summaries available only transfers survive; without them every txid
    /// is fetched and filtered later.
    fn relevant_txids(&self, raw: &RawBlock) -> Vec<(String, Option<TxKind>)> {
        let mut txids: Vec<(String, Option<TxKind>)> = if raw.tx_details.is_empty() {
            raw.tx.iter().map(|txid| (txid.clone(), None)).collect()
        } else {
            raw.tx_details
                .iter()
                .filter_map(|summary| {
                    let kind = summary.kind.as_deref().map(TxKind::parse);
                    matches!(kind, None | Some(TxKind::Transfer))
                        .then(|| (summary.txid.clone(), kind))
                })
                .collect()
        };
        txids.truncate(self.settings.tx_fetch_limit);
        txids
    }
}

#[async_trait::async_trait]
impl DataSource for PrimarySource {
    fn name(&self) -> &'static str {
        "primary"
    }

    fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    async fn chain_height(&self) -> Result<i64, FetchError> {
        let status: Value = self.get_json("api/v1/status").await?;
        if let Some(height) = dto::extract_height(&status) {
            return Ok(height);
        }
        let latest: Value = self.get_json("api/v1/blocks/latest").await?;
        dto::extract_height(&latest)
            .ok_or_else(|| FetchError::Shape("no chain height in status or latest block".into()))
    }

    async fn get_block(&self, height: i64) -> Result<ChainBlock, FetchError> {
        let raw: RawBlock = self.get_json(&format!("api/v1/blocks/{height}")).await?;
        let tx_count = i64::try_from(raw.tx.len().max(raw.tx_details.len())).unwrap_or(i64::MAX);
        let txids = self.relevant_txids(&raw);

        let fetched = join_all(txids.iter().map(|(txid, _)| self.get_transaction(txid))).await;
        let mut txs = Vec::with_capacity(fetched.len());
        for ((_, kind), result) in txids.into_iter().zip(fetched) {
            let mut tx = result?;
            tx.kind = tx.kind.or(kind);
            txs.push(tx);
        }

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
        let raw: dto::RawTransaction =
            self.get_json(&format!("api/v1/transactions/{txid}")).await?;
        Ok(raw.normalize())
    }

    async fn get_address_transactions(&self, address: &str) -> Result<Vec<AddressTx>, FetchError> {
        let raw: Vec<RawAddressTx> = self
            .get_json(&format!("api/v1/addresses/{address}/transactions"))
            .await?;
        let mut txs: Vec<AddressTx> = raw
            .into_iter()
            .filter_map(|tx| {
                let direction = match tx.direction.as_str() {
                    "sent" => Direction::Sent,
                    "received" => Direction::Received,
                    other => {
                        tracing::debug!(txid = %tx.txid, direction = other, "skipping record with unknown direction");
                        return None;
                    }
                };
                Some(AddressTx {
                    txid: tx.txid,
                    block_height: tx.block_height,
                    timestamp: tx.timestamp,
                    direction,
                    is_coinbase: tx.is_coinbase,
                })
            })
            .collect();
        txs.sort_by_key(|tx| (tx.block_height, tx.timestamp));
        Ok(txs)
    }
}

pub(crate) fn ensure_trailing_slash(mut base: Url) -> Url {
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    fn source() -> PrimarySource {
        PrimarySource::new(
            "http://localhost:3000".parse().unwrap(),
            reqwest::Client::new(),
            SourceSettings::primary(),
        )
    }

    #[test]
    fn trailing_slash_is_added_once() {
        assert_eq!(
            ensure_trailing_slash("http://localhost:3000".parse().unwrap()).as_str(),
            "http://localhost:3000/"
        );
        assert_eq!(
            ensure_trailing_slash("http://localhost:3000/indexer/".parse().unwrap()).as_str(),
            "http://localhost:3000/indexer/"
        );
    }

    #[test]
    fn kind_summaries_filter_full_fetches() {
        let raw: RawBlock = serde_json::from_value(json!({
            "height": 1000,
            "hash": "h",
            "time": 30000,
            "tx": ["aa", "bb", "cc"],
            "txDetails": [
                {"txid": "aa", "kind": "coinbase"},
                {"txid": "bb", "kind": "transfer"},
                {"txid": "cc", "kind": "fluxnode_confirmation"}
            ]
        }))
        .unwrap();
        let txids = source().relevant_txids(&raw);
        assert_eq!(txids.len(), 1);
        assert_eq!(txids[0], ("bb".to_string(), Some(TxKind::Transfer)));
    }

    #[test]
    fn missing_summaries_fetch_everything_up_to_the_cap() {
        let raw: RawBlock = serde_json::from_value(json!({
            "height": 1000,
            "hash": "h",
            "time": 30000,
            "tx": ["aa", "bb"]
        }))
        .unwrap();
        let txids = source().relevant_txids(&raw);
        assert_eq!(txids.len(), 2);
        assert_eq!(txids[0].1, None);

        let mut capped = source();
        capped.settings.tx_fetch_limit = 1;
        assert_eq!(capped.relevant_txids(&raw).len(), 1);
    }

    #[test]
    fn address_transactions_parse() {
        let raw: Vec<RawAddressTx> = serde_json::from_value(json!([
            {"txid": "bb", "blockHeight": 1050, "timestamp": 31500, "direction": "sent", "isCoinbase": false},
            {"txid": "aa", "blockHeight": 1000, "timestamp": 30000, "direction": "received", "isCoinbase": true},
            {"txid": "cc", "blockHeight": 1100, "timestamp": 33000, "direction": "self"}
        ]))
        .unwrap();
        assert_eq!(raw.len(), 3);
        assert_eq!(raw[0].direction, "sent");
        assert!(raw[1].is_coinbase);
    }
}
