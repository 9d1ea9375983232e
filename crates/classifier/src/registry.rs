use {
    model::TierCounts,
    serde::Deserialize,
    std::collections::HashMap,
};

/// One record from the node registry endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct RegistryRecord {
    pub payment_address: String,
    #[serde(default)]
    pub tier: String,
    #[serde(default)]
    pub collateral: Option<String>,
}

/// Aggregated node holdings of one payment address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeOperator {
    pub node_count: u32,
    pub tiers: TierCounts,
}

/// The registry endpoint has changed its envelope over time; all three known
/// shapes are accepted.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RegistryResponse {
    Keyed {
        #[serde(rename = "fluxNodes", alias = "FluxNodes")]
        flux_nodes: Vec<RegistryRecord>,
    },
    Bare(Vec<RegistryRecord>),
}

pub fn parse_registry(raw: &str) -> anyhow::Result<Vec<RegistryRecord>> {
    let response: RegistryResponse = serde_json::from_str(raw)?;
    Ok(match response {
        RegistryResponse::Keyed { flux_nodes } => flux_nodes,
        RegistryResponse::Bare(records) => records,
    })
}

/// Groups raw records by payment address, counting nodes per tier.
pub fn group_operators(records: Vec<RegistryRecord>) -> HashMap<String, NodeOperator> {
    let mut operators: HashMap<String, NodeOperator> = HashMap::with_capacity(records.len());
    for record in records {
        let operator = operators.entry(record.payment_address).or_default();
        operator.node_count += 1;
        match record.tier.to_ascii_uppercase().as_str() {
            "CUMULUS" => operator.tiers.cumulus += 1,
            "NIMBUS" => operator.tiers.nimbus += 1,
            "STRATUS" => operator.tiers.stratus += 1,
            _ => {}
        }
    }
    operators
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(address: &str, tier: &str) -> RegistryRecord {
        RegistryRecord {
            payment_address: address.to_string(),
            tier: tier.to_string(),
            collateral: None,
        }
    }

    #[test]
    fn parses_all_known_envelopes() {
        let record = r#"{"payment_address": "t1op", "tier": "CUMULUS", "collateral": "txid:0"}"#;
        for raw in [
            format!(r#"{{"FluxNodes": [{record}]}}"#),
            format!(r#"{{"fluxNodes": [{record}]}}"#),
            format!("[{record}]"),
        ] {
            let records = parse_registry(&raw).unwrap();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].payment_address, "t1op");
        }
    }

    #[test]
    fn groups_by_payment_address_and_counts_tiers() {
        let operators = group_operators(vec![
            record("t1a", "CUMULUS"),
            record("t1a", "cumulus"),
            record("t1a", "STRATUS"),
            record("t1b", "Nimbus"),
        ]);
        assert_eq!(operators.len(), 2);
        let a = &operators["t1a"];
        assert_eq!(a.node_count, 3);
        assert_eq!((a.tiers.cumulus, a.tiers.nimbus, a.tiers.stratus), (2, 0, 1));
        assert_eq!(operators["t1b"].tiers.nimbus, 1);
    }

    #[test]
    fn unknown_tier_still_counts_node() {
        let operators = group_operators(vec![record("t1a", "BAMF")]);
        assert_eq!(operators["t1a"].node_count, 1);
        assert_eq!(operators["t1a"].tiers.total(), 0);
    }
}
