use {
    crate::classification::{AddressType, DataSource, Details, FlowType},
    serde::{Deserialize, Serialize},
};

/// A chain block as persisted by the store. Immutable once written except by
/// height keyed overwrite.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub height: i64,
    pub hash: String,
    /// Unix timestamp of the block.
    pub time: i64,
    pub tx_count: i64,
    /// Size of the block in bytes.
    pub size: i64,
}

/// Aggregate shape of one persisted transaction.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: String,
    pub block_height: i64,
    pub input_count: i64,
    pub output_count: i64,
    pub total_input: f64,
    pub total_output: f64,
}

/// The central entity: one row per (txid, vout) pair whose transaction
/// involves at least one classified address.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowEvent {
    /// Assigned by the store on insert; zero on freshly built events.
    #[serde(default)]
    pub id: i64,
    pub txid: String,
    pub vout: i64,
    pub block_height: i64,
    pub block_time: i64,
    pub from_address: String,
    pub from_type: AddressType,
    pub from_details: Option<Details>,
    pub to_address: String,
    pub to_type: AddressType,
    pub to_details: Option<Details>,
    pub flow_type: FlowType,
    /// Decimal FLUX.
    pub amount: f64,
    /// Number of intermediary wallets between the observed address and a
    /// node operator; zero for directly classified events.
    pub classification_level: i64,
    /// First hop of `hop_chain`, denormalized. The chain is canonical.
    pub intermediary_wallet: Option<String>,
    /// Ordered intermediary wallets, excluding the final node operator
    /// wallet. Present iff `classification_level > 0`, with matching length.
    pub hop_chain: Option<Vec<String>>,
    /// Unix timestamp of the last enhancement attempt.
    pub analysis_timestamp: Option<i64>,
    pub data_source: DataSource,
}

/// Partial update applied to a flow event row by the enhancement engine.
/// Fields left `None` keep their stored value, which makes applying the same
/// patch twice a no-op.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClassificationPatch {
    pub classification_level: Option<i64>,
    pub intermediary_wallet: Option<String>,
    pub hop_chain: Option<Vec<String>>,
    pub analysis_timestamp: Option<i64>,
    pub data_source: Option<DataSource>,
    pub from_type: Option<AddressType>,
    pub from_details: Option<Details>,
    pub to_type: Option<AddressType>,
    pub to_details: Option<Details>,
}

impl ClassificationPatch {
    /// A patch that only stamps the analysis timestamp, used after an
    /// enhancement attempt that found nothing.
    pub fn analyzed_at(timestamp: i64) -> Self {
        Self {
            analysis_timestamp: Some(timestamp),
            ..Default::default()
        }
    }
}
