//! Full balance history of one address, newest first, for address-detail displays.

use crate::chain::abi::normalize_address;
use crate::chain::{BlockTag, ChainReader};
use crate::compute::aggregate::{load_rebases, AnalysisError};
use crate::compute::transactions::{analyze_transactions, TransactionClass};
use crate::ousd::events::LedgerEntry;
use crate::ousd::merge::merge_ledger;
use crate::ousd::precision::Precision;
use crate::ousd::protocol_config::ProtocolConfig;
use crate::ousd::reconstruct::reconstruct;
use crate::store::{AccountScope, LedgerStore};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use time::OffsetDateTime;
use tracing::debug;

/// What moved the balance at one history record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryKind {
    Yield,
    Transaction(TransactionClass),
    /// Transfer whose transaction is not in the store.
    UnknownTransactionNotFound,
}

impl HistoryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Yield => "yield",
            Self::Transaction(class) => class.as_str(),
            Self::UnknownTransactionNotFound => "unknown_transaction_not_found",
        }
    }
}

impl Serialize for HistoryKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for HistoryKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "yield" => Ok(Self::Yield),
            "unknown_transaction_not_found" => Ok(Self::UnknownTransactionNotFound),
            other => TransactionClass::parse(other)
                .map(Self::Transaction)
                .ok_or_else(|| serde::de::Error::custom(format!("unknown history type {other}"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub block_number: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub time: Option<OffsetDateTime>,
    pub balance: Decimal,
    pub tx_hash: String,
    pub amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_index: Option<u64>,
    #[serde(rename = "type")]
    pub kind: HistoryKind,
}

/// All-time history of `address`: every rebase and transfer reconstructed from the credits
/// held at the latest block. Rebases older than the first transfer are dropped.
pub fn address_history<S, R>(
    store: &S,
    chain: &R,
    config: &ProtocolConfig,
    address: &str,
    precision: Precision,
) -> Result<Vec<HistoryRecord>, AnalysisError>
where
    S: LedgerStore + ?Sized,
    R: ChainReader + ?Sized,
{
    let address = normalize_address(address);
    let scope = AccountScope::Account(address.clone());

    let rebases = load_rebases(store, config, None)?;
    let classes: HashMap<String, TransactionClass> =
        analyze_transactions(store, &scope, None, config)?
            .into_iter()
            .map(|a| (a.tx_hash, a.classification))
            .collect();
    let transfers = store.events_for_account(&scope, None)?;
    let credits = chain.credits_balance_of(&address, BlockTag::Latest)?;

    let merged = merge_ledger(&rebases, transfers, config.relaunch_block);
    let mut ledger = reconstruct(credits.credits, merged, precision)?;
    let keep = ledger
        .iter()
        .rposition(|e| !e.entry.is_rebase())
        .map_or(0, |i| i + 1);
    ledger.truncate(keep);
    debug!(address = %address, records = ledger.len(), "address history built");

    Ok(ledger
        .into_iter()
        .map(|e| {
            let time = e.entry.block_time();
            match e.entry {
                LedgerEntry::Rebase(r) => HistoryRecord {
                    block_number: r.block_number,
                    time,
                    balance: e.balance,
                    tx_hash: r.transaction_hash,
                    amount: e.amount,
                    from_address: None,
                    to_address: None,
                    log_index: None,
                    kind: HistoryKind::Yield,
                },
                LedgerEntry::Transfer(t) => HistoryRecord {
                    kind: classes
                        .get(&t.transaction_hash)
                        .map_or(HistoryKind::UnknownTransactionNotFound, |c| {
                            HistoryKind::Transaction(*c)
                        }),
                    block_number: t.block_number,
                    time,
                    balance: e.balance,
                    tx_hash: t.transaction_hash,
                    amount: e.amount,
                    from_address: Some(t.from_address),
                    to_address: Some(t.to_address),
                    log_index: Some(t.log_index),
                },
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::aggregate::tests::{fake_chain, seeded_ledger, test_config, ALICE, BOB};
    use crate::store::{SqliteLedger, TransactionRecord};
    use rust_decimal_macros::dec;

    #[test]
    fn kind_serializes_as_plain_string() {
        assert_eq!(serde_json::to_value(HistoryKind::Yield).unwrap(), "yield");
        assert_eq!(
            serde_json::to_value(HistoryKind::Transaction(TransactionClass::TransferIn)).unwrap(),
            "transfer_in"
        );
        let kind: HistoryKind = serde_json::from_str("\"unknown_transaction_not_found\"").unwrap();
        assert_eq!(kind, HistoryKind::UnknownTransactionNotFound);
        assert!(serde_json::from_str::<HistoryKind>("\"gift\"").is_err());
    }

    #[test]
    fn history_newest_first_and_trimmed() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();
        seeded_ledger(&mut ledger);
        ledger
            .import_transactions(&[TransactionRecord {
                hash: "0xt200".into(),
                block_number: 200,
                from_address: BOB.into(),
                to_address: Some(crate::ousd::protocol_config::OUSD_ADDRESS.into()),
                value: "0x0".into(),
                internal_transactions: vec![],
            }])
            .unwrap();
        let chain = fake_chain();

        let alice =
            address_history(&ledger, &chain, &test_config(), ALICE, Precision::ON_CHAIN).unwrap();
        // the rebase at 110 predates alice's only transfer
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].block_number, 200);
        assert_eq!(alice[0].balance, dec!(10));
        assert_eq!(alice[0].amount, dec!(10));
        assert_eq!(
            alice[0].kind,
            HistoryKind::Transaction(TransactionClass::TransferIn)
        );

        let bob =
            address_history(&ledger, &chain, &test_config(), BOB, Precision::ON_CHAIN).unwrap();
        let blocks: Vec<u64> = bob.iter().map(|r| r.block_number).collect();
        assert_eq!(blocks, vec![200, 150]);
        assert_eq!(bob[0].amount, dec!(-10));
        assert_eq!(bob[0].balance, dec!(40));
        assert_eq!(bob[1].balance, dec!(50));
        assert_eq!(bob[1].kind, HistoryKind::UnknownTransactionNotFound);
        let json = serde_json::to_value(&bob[1]).unwrap();
        assert_eq!(json["type"], "unknown_transaction_not_found");
        assert_eq!(json["from_address"], crate::ousd::protocol_config::ZERO_ADDRESS);
    }

    #[test]
    fn no_transfers_means_empty_history() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();
        seeded_ledger(&mut ledger);
        let mut chain = fake_chain();
        let nobody = "0x9999999999999999999999999999999999999999";
        chain.credits.insert(
            nobody.into(),
            crate::chain::CreditsBalance {
                credits: dec!(0),
                credits_per_token: dec!(2),
            },
        );
        let history =
            address_history(&ledger, &chain, &test_config(), nobody, Precision::ON_CHAIN).unwrap();
        assert!(history.is_empty());
    }
}
