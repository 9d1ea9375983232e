//! Relevance filtering and flow event construction for one block.

use {
    classifier::Classifier,
    indexer::{ChainBlock, ChainTransaction, TxKind},
    model::{AddressType, Classification, FlowEvent, FlowType},
};

/// A transaction is relevant iff at least one input or output address
/// classifies as something other than unknown. Everything else never reaches
/// the store.
pub fn is_relevant(tx: &ChainTransaction, classifier: &Classifier) -> bool {
    tx.vin
        .iter()
        .flat_map(|input| &input.addresses)
        .chain(tx.vout.iter().flat_map(|output| &output.addresses))
        .any(|address| classifier.classify(address).address_type != AddressType::Unknown)
}

/// Transactions the pipeline should not even look at: block rewards and
/// node confirmations, identified by the source-reported kind.
pub fn is_ignored_kind(tx: &ChainTransaction) -> bool {
    matches!(
        tx.kind,
        Some(TxKind::Coinbase | TxKind::NodeConfirmation | TxKind::Other)
    )
}

/// Picks the identity for the source side of every emitted event. When a
/// transaction spends from several addresses the most telling one wins:
/// exchange over node operator over foundation over unknown.
pub fn primary_input_classification(
    tx: &ChainTransaction,
    classifier: &Classifier,
) -> (String, Classification) {
    let mut best: Option<(String, Classification)> = None;
    for address in tx.vin.iter().flat_map(|input| &input.addresses) {
        let classification = classifier.classify(address);
        let better = match &best {
            None => true,
            Some((_, current)) => {
                priority(classification.address_type) < priority(current.address_type)
            }
        };
        if better {
            best = Some((address.clone(), classification));
        }
    }
    best.unwrap_or_else(|| (String::new(), Classification::unknown()))
}

fn priority(address_type: AddressType) -> u8 {
    match address_type {
        AddressType::Exchange => 0,
        AddressType::NodeOperator => 1,
        AddressType::Foundation => 2,
        AddressType::Unknown => 3,
    }
}

/// One flow event per output carrying an address. The source side repeats
/// the primary input identity; the destination side is classified per
/// output.
pub fn build_flow_events(
    block: &ChainBlock,
    tx: &ChainTransaction,
    classifier: &Classifier,
) -> Vec<FlowEvent> {
    let (from_address, from) = primary_input_classification(tx, classifier);
    tx.vout
        .iter()
        .filter_map(|output| {
            let to_address = output.addresses.first()?;
            let to = classifier.classify(to_address);
            Some(FlowEvent {
                txid: tx.txid.clone(),
                vout: output.n,
                block_height: block.height,
                block_time: block.time,
                from_address: from_address.clone(),
                from_type: from.address_type,
                from_details: from.details.clone(),
                to_address: to_address.clone(),
                to_type: to.address_type,
                to_details: to.details,
                flow_type: FlowType::derive(from.address_type, to.address_type),
                amount: model::sats_to_flux(output.value_sats),
                ..Default::default()
            })
        })
        .collect()
}

pub fn to_stored_block(block: &ChainBlock) -> model::Block {
    model::Block {
        height: block.height,
        hash: block.hash.clone(),
        time: block.time,
        tx_count: block.tx_count,
        size: block.size,
    }
}

pub fn to_stored_transaction(block: &ChainBlock, tx: &ChainTransaction) -> model::Transaction {
    model::Transaction {
        txid: tx.txid.clone(),
        block_height: block.height,
        input_count: i64::try_from(tx.vin.len()).unwrap_or(i64::MAX),
        output_count: i64::try_from(tx.vout.len()).unwrap_or(i64::MAX),
        total_input: model::sats_to_flux(tx.total_input_sats()),
        total_output: model::sats_to_flux(tx.total_output_sats()),
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        classifier::{AddressBook, NodeOperator},
        indexer::{TxInput, TxOutput},
        model::{DataSource, Details, TierCounts},
    };

    fn classifier() -> Classifier {
        let book = AddressBook::from_toml(
            r#"
                [exchanges.t1binance]
                name = "Binance"
                logo = "binance.png"

                [foundation.t1foundation]
                name = "Flux Foundation"
            "#,
        )
        .unwrap();
        let classifier = Classifier::new(
            book,
            "http://localhost:1/".parse().unwrap(),
            reqwest::Client::new(),
        );
        classifier.install_operators(
            [(
                "t1node".to_string(),
                NodeOperator {
                    node_count: 3,
                    tiers: TierCounts {
                        cumulus: 2,
                        nimbus: 1,
                        stratus: 0,
                    },
                },
            )]
            .into_iter()
            .collect(),
        );
        classifier
    }

    fn block() -> ChainBlock {
        ChainBlock {
            height: 1000,
            hash: "blockhash".to_string(),
            time: 30_000,
            size: 1234,
            tx_count: 1,
            txs: Vec::new(),
        }
    }

    fn transfer(vin: Vec<(&str, u64)>, vout: Vec<(&str, u64)>) -> ChainTransaction {
        ChainTransaction {
            txid: "aa".to_string(),
            kind: Some(TxKind::Transfer),
            vin: vin
                .into_iter()
                .map(|(address, value_sats)| TxInput {
                    addresses: vec![address.to_string()],
                    value_sats,
                })
                .collect(),
            vout: vout
                .into_iter()
                .enumerate()
                .map(|(n, (address, value_sats))| TxOutput {
                    n: i64::try_from(n).unwrap(),
                    addresses: if address.is_empty() {
                        Vec::new()
                    } else {
                        vec![address.to_string()]
                    },
                    value_sats,
                })
                .collect(),
        }
    }

    #[test]
    fn relevance_requires_one_classified_address() {
        let classifier = classifier();
        let relevant = transfer(
            vec![("t1binance", 10_0000_0000)],
            vec![("t1someone", 10_0000_0000)],
        );
        assert!(is_relevant(&relevant, &classifier));

        let relevant_output_only = transfer(
            vec![("t1someone", 10_0000_0000)],
            vec![("t1node", 10_0000_0000)],
        );
        assert!(is_relevant(&relevant_output_only, &classifier));

        let irrelevant = transfer(
            vec![("t1someone", 10_0000_0000)],
            vec![("t1else", 10_0000_0000)],
        );
        assert!(!is_relevant(&irrelevant, &classifier));
    }

    #[test]
    fn ignored_kinds() {
        let mut tx = transfer(vec![("t1a", 1)], vec![("t1b", 1)]);
        assert!(!is_ignored_kind(&tx));
        tx.kind = None;
        assert!(!is_ignored_kind(&tx));
        tx.kind = Some(TxKind::Coinbase);
        assert!(is_ignored_kind(&tx));
        tx.kind = Some(TxKind::NodeConfirmation);
        assert!(is_ignored_kind(&tx));
    }

    #[test]
    fn primary_input_follows_priority_order() {
        let classifier = classifier();
        let tx = transfer(
            vec![
                ("t1foundation", 1),
                ("t1node", 1),
                ("t1binance", 1),
                ("t1someone", 1),
            ],
            vec![("t1else", 1)],
        );
        let (address, classification) = primary_input_classification(&tx, &classifier);
        assert_eq!(address, "t1binance");
        assert_eq!(classification.address_type, AddressType::Exchange);

        let tx = transfer(vec![("t1foundation", 1), ("t1node", 1)], vec![("t1else", 1)]);
        let (address, classification) = primary_input_classification(&tx, &classifier);
        assert_eq!(address, "t1node");
        assert_eq!(classification.address_type, AddressType::NodeOperator);
    }

    #[test]
    fn direct_buy_with_change_output() {
        // Exchange spends to a node operator plus its own change address.
        let classifier = classifier();
        let block = block();
        let tx = transfer(
            vec![("t1binance", 10_5000_0000)],
            vec![("t1node", 10_0000_0000), ("t1binance", 5000_0000)],
        );

        let events = build_flow_events(&block, &tx, &classifier);
        assert_eq!(events.len(), 2);

        let buy = &events[0];
        assert_eq!(buy.flow_type, FlowType::Buying);
        assert_eq!(buy.from_type, AddressType::Exchange);
        assert_eq!(buy.to_type, AddressType::NodeOperator);
        assert_eq!(buy.amount, 10.0);
        assert_eq!(buy.vout, 0);
        assert_eq!(buy.block_height, 1000);
        assert_eq!(buy.classification_level, 0);
        assert_eq!(buy.data_source, DataSource::Sync);
        assert_eq!(
            buy.to_details,
            Some(Details::Node {
                node_count: 3,
                tiers: TierCounts {
                    cumulus: 2,
                    nimbus: 1,
                    stratus: 0,
                },
            })
        );

        let change = &events[1];
        assert_eq!(change.flow_type, FlowType::P2p);
        assert_eq!(change.from_type, AddressType::Exchange);
        assert_eq!(change.to_type, AddressType::Exchange);
        assert_eq!(change.amount, 0.5);
    }

    #[test]
    fn direct_sell_to_exchange() {
        let classifier = classifier();
        let tx = transfer(
            vec![("t1node", 100_0000_0000)],
            vec![("t1binance", 100_0000_0000)],
        );
        let events = build_flow_events(&block(), &tx, &classifier);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].flow_type, FlowType::Selling);
        assert_eq!(events[0].from_type, AddressType::NodeOperator);
        assert_eq!(events[0].to_type, AddressType::Exchange);
        assert_eq!(events[0].amount, 100.0);
        assert_eq!(events[0].classification_level, 0);
    }

    #[test]
    fn outputs_without_addresses_are_skipped() {
        let classifier = classifier();
        let tx = transfer(
            vec![("t1binance", 3_0000_0000)],
            vec![("", 1_0000_0000), ("t1someone", 2_0000_0000)],
        );
        let events = build_flow_events(&block(), &tx, &classifier);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].vout, 1);
    }
}
