use serde::{Deserialize, Serialize};

/// How an address classifies against the known exchange, foundation and node
/// operator sets.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressType {
    Exchange,
    Foundation,
    NodeOperator,
    #[default]
    Unknown,
}

impl AddressType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exchange => "exchange",
            Self::Foundation => "foundation",
            Self::NodeOperator => "node_operator",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exchange" => Some(Self::Exchange),
            "foundation" => Some(Self::Foundation),
            "node_operator" => Some(Self::NodeOperator),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// The direction of a flow event relative to the exchanges.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    Buying,
    Selling,
    #[default]
    P2p,
}

impl FlowType {
    /// The flow type is a deterministic function of the two sides:
    /// funds leaving an exchange are a buy, funds arriving at an exchange are
    /// a sell, everything else (including exchange to exchange) is p2p.
    pub fn derive(from: AddressType, to: AddressType) -> Self {
        match (from == AddressType::Exchange, to == AddressType::Exchange) {
            (true, false) => Self::Buying,
            (false, true) => Self::Selling,
            _ => Self::P2p,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buying => "buying",
            Self::Selling => "selling",
            Self::P2p => "p2p",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buying" => Some(Self::Buying),
            "selling" => Some(Self::Selling),
            "p2p" => Some(Self::P2p),
            _ => None,
        }
    }
}

/// Whether a flow event row was written by the ingestion pipeline or later
/// rewritten by the enhancement engine.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    #[default]
    Sync,
    Enhanced,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Enhanced => "enhanced",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sync" => Some(Self::Sync),
            "enhanced" => Some(Self::Enhanced),
            _ => None,
        }
    }
}

/// How the enhancement engine established that a wallet belongs to a node
/// operator.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// The wallet is in the current node operator registry snapshot.
    CurrentApi,
    /// The wallet received coinbase rewards inside the detection window.
    HistoricalCoinbase,
    /// The wallet transacted with a (current or historical) operator inside
    /// the detection window.
    HistoricalConnection,
}

/// Whether the detected operator is active right now or only known from
/// history.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorStatus {
    Active,
    Historical,
}

/// Node counts per tier for one payment address.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct TierCounts {
    pub cumulus: u32,
    pub nimbus: u32,
    pub stratus: u32,
}

impl TierCounts {
    pub fn total(&self) -> u32 {
        self.cumulus + self.nimbus + self.stratus
    }
}

/// Self-describing side-car payload attached to either side of a flow event.
///
/// Serialized into the `from_details` / `to_details` JSON columns. The `kind`
/// tag makes the payloads distinguishable without schema knowledge so new
/// variants can be added without migrating stored rows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Details {
    Exchange {
        name: String,
        logo: String,
    },
    Foundation {
        name: String,
    },
    Node {
        node_count: u32,
        tiers: TierCounts,
    },
    /// Written by the enhancement engine when a node operator was reached
    /// through zero or more intermediary wallets.
    EnhancedNode {
        node_wallet: String,
        detection_method: DetectionMethod,
        status: OperatorStatus,
        hop_count: u32,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        intermediary_txids: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_count: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tiers: Option<TierCounts>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        days_inactive: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        coinbase_count: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_coinbase_block: Option<i64>,
    },
    /// Written when the observed wallet itself transacted with an operator
    /// inside the detection window.
    HistoricalConnection {
        node_wallet: String,
        connection_txid: String,
        days_ago: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        coinbase_count: Option<u32>,
    },
}

/// The result of classifying a single address.
#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub address_type: AddressType,
    pub details: Option<Details>,
}

impl Classification {
    pub fn unknown() -> Self {
        Self {
            address_type: AddressType::Unknown,
            details: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_type_is_deterministic_in_both_sides() {
        use AddressType::*;
        let all = [Exchange, Foundation, NodeOperator, Unknown];
        for from in all {
            for to in all {
                let expected = if from == Exchange && to != Exchange {
                    FlowType::Buying
                } else if to == Exchange && from != Exchange {
                    FlowType::Selling
                } else {
                    FlowType::P2p
                };
                assert_eq!(FlowType::derive(from, to), expected, "{from:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn exchange_to_exchange_is_p2p() {
        assert_eq!(
            FlowType::derive(AddressType::Exchange, AddressType::Exchange),
            FlowType::P2p
        );
    }

    #[test]
    fn details_round_trip() {
        let details = [
            Details::Exchange {
                name: "Binance".to_string(),
                logo: "binance.png".to_string(),
            },
            Details::Foundation {
                name: "Flux Foundation".to_string(),
            },
            Details::Node {
                node_count: 3,
                tiers: TierCounts {
                    cumulus: 2,
                    nimbus: 1,
                    stratus: 0,
                },
            },
            Details::EnhancedNode {
                node_wallet: "t1node".to_string(),
                detection_method: DetectionMethod::CurrentApi,
                status: OperatorStatus::Active,
                hop_count: 1,
                intermediary_txids: vec!["aa".to_string()],
                node_count: Some(5),
                tiers: None,
                days_inactive: None,
                coinbase_count: None,
                last_coinbase_block: None,
            },
            Details::HistoricalConnection {
                node_wallet: "t1node".to_string(),
                connection_txid: "bb".to_string(),
                days_ago: 12,
                coinbase_count: Some(3),
            },
        ];
        for original in details {
            let json = serde_json::to_string(&original).unwrap();
            let parsed: Details = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, original);
        }
    }

    #[test]
    fn details_serialization_is_tagged() {
        let json = serde_json::to_value(Details::Foundation {
            name: "Flux Foundation".to_string(),
        })
        .unwrap();
        assert_eq!(json["kind"], "foundation");
    }

    #[test]
    fn tier_counts_serialize_uppercase() {
        let json = serde_json::to_value(TierCounts {
            cumulus: 1,
            nimbus: 2,
            stratus: 3,
        })
        .unwrap();
        assert_eq!(json["CUMULUS"], 1);
        assert_eq!(json["NIMBUS"], 2);
        assert_eq!(json["STRATUS"], 3);
    }
}
