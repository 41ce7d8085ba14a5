//! Transaction analytics: what each transaction did from an account's side, and which
//! contracts OUSD volume went through.

use crate::chain::abi::{is_nonzero_quantity, normalize_address};
use crate::compute::aggregate::{AnalysisError, ReportWindow};
use crate::ousd::classify::{classify_log, Perspective};
use crate::ousd::events::{LogEvent, RawLog};
use crate::ousd::precision::Precision;
use crate::ousd::protocol_config::ProtocolConfig;
use crate::store::{AccountScope, InternalTransaction, LedgerStore, TransactionRecord};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionClass {
    TransferIn,
    TransferOut,
    SwapGainOusd,
    SwapGiveOusd,
    Unknown,
    UnknownTransfer,
}

impl TransactionClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TransferIn => "transfer_in",
            Self::TransferOut => "transfer_out",
            Self::SwapGainOusd => "swap_gain_ousd",
            Self::SwapGiveOusd => "swap_give_ousd",
            Self::Unknown => "unknown",
            Self::UnknownTransfer => "unknown_transfer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            Self::TransferIn,
            Self::TransferOut,
            Self::SwapGainOusd,
            Self::SwapGiveOusd,
            Self::Unknown,
            Self::UnknownTransfer,
        ]
        .into_iter()
        .find(|c| c.as_str() == s)
    }

    pub fn is_swap(self) -> bool {
        matches!(self, Self::SwapGainOusd | Self::SwapGiveOusd)
    }
}

impl fmt::Display for TransactionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionAnalysis {
    /// Sender of the transaction.
    pub account: String,
    pub tx_hash: String,
    /// Called contract; None for contract creation.
    pub contract_address: Option<String>,
    pub internal_transactions: Vec<InternalTransaction>,
    pub received_eth: bool,
    pub sent_eth: bool,
    pub transfer_ousd_out: bool,
    pub transfer_ousd_in: bool,
    pub transfer_coin_out: bool,
    pub transfer_coin_in: bool,
    pub ousd_transfer_from: Option<String>,
    pub ousd_transfer_to: Option<String>,
    /// Amount of the last tracked-token transfer in the transaction.
    pub ousd_transfer_amount: Option<Decimal>,
    pub transfer_log_count: u32,
    pub classification: TransactionClass,
}

/// Classify one transaction from `scope`'s side. Outside account scope everything is `unknown`.
pub fn classify_transaction(
    tx: &TransactionRecord,
    logs: &[RawLog],
    scope: &AccountScope,
    token: &str,
) -> TransactionAnalysis {
    let account = scope.address();
    let received_eth = account.is_some_and(|a| {
        tx.internal_transactions
            .iter()
            .any(|i| normalize_address(&i.to) == a && is_nonzero_quantity(&i.value))
    });
    let sent_eth = is_nonzero_quantity(&tx.value);

    let mut analysis = TransactionAnalysis {
        account: normalize_address(&tx.from_address),
        tx_hash: tx.hash.clone(),
        contract_address: tx.to_address.as_deref().map(normalize_address),
        internal_transactions: tx.internal_transactions.clone(),
        received_eth,
        sent_eth,
        transfer_ousd_out: false,
        transfer_ousd_in: false,
        transfer_coin_out: false,
        transfer_coin_in: false,
        ousd_transfer_from: None,
        ousd_transfer_to: None,
        ousd_transfer_amount: None,
        transfer_log_count: 0,
        classification: TransactionClass::Unknown,
    };

    for log in logs {
        let (is_ousd, from, to) = match classify_log(log, Perspective::All, token) {
            Ok(Some(LogEvent::Transfer(t))) => {
                analysis.ousd_transfer_from = Some(t.from_address.clone());
                analysis.ousd_transfer_to = Some(t.to_address.clone());
                analysis.ousd_transfer_amount = Some(t.amount);
                (true, t.from_address, t.to_address)
            }
            Ok(Some(LogEvent::TokenTransfer(t))) => (false, t.from_address, t.to_address),
            Ok(_) => continue,
            Err(fault) => {
                warn!(error = %fault, "ignoring undecodable transfer log");
                continue;
            }
        };
        analysis.transfer_log_count += 1;
        let Some(account) = account else { continue };
        if from == account {
            if is_ousd {
                analysis.transfer_ousd_out = true;
            } else {
                analysis.transfer_coin_out = true;
            }
        }
        if to == account {
            if is_ousd {
                analysis.transfer_ousd_in = true;
            } else {
                analysis.transfer_coin_in = true;
            }
        }
    }

    if account.is_some() {
        let a = &analysis;
        let mut class = TransactionClass::Unknown;
        if a.transfer_log_count > 0 {
            class = if a.transfer_ousd_in {
                TransactionClass::TransferIn
            } else if a.transfer_ousd_out {
                TransactionClass::TransferOut
            } else {
                TransactionClass::UnknownTransfer
            };
        }
        if a.transfer_ousd_in && (a.transfer_coin_out || a.sent_eth) {
            class = TransactionClass::SwapGainOusd;
        } else if a.transfer_ousd_out && (a.transfer_coin_in || a.received_eth) {
            class = TransactionClass::SwapGiveOusd;
        }
        analysis.classification = class;
    }
    analysis
}

/// Transactions sent from or to the scope in the window's blocks, plus every transaction
/// carrying a tracked-token transfer for the scope in the window's time span. `None` means
/// all time. Each hash is analyzed once.
pub fn analyze_transactions<S: LedgerStore + ?Sized>(
    store: &S,
    scope: &AccountScope,
    window: Option<&ReportWindow>,
    config: &ProtocolConfig,
) -> Result<Vec<TransactionAnalysis>, AnalysisError> {
    let direct = store.transactions(scope, window.map(ReportWindow::block_range))?;
    let transfer_hashes =
        store.transfer_transaction_hashes(scope, window.map(ReportWindow::time_window))?;

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut analyze = |tx: &TransactionRecord| -> Result<(), AnalysisError> {
        if !seen.insert(tx.hash.clone()) {
            return Ok(());
        }
        let logs = store.logs_for_transaction(&tx.hash)?;
        out.push(classify_transaction(tx, &logs, scope, &config.token_address));
        Ok(())
    };
    for tx in &direct {
        analyze(tx)?;
    }
    for hash in transfer_hashes {
        match store.transaction(&hash)? {
            Some(tx) => analyze(&tx)?,
            None => debug!(tx = %hash, "transfer transaction not in store"),
        }
    }
    Ok(out)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractStats {
    pub address: Option<String>,
    pub name: String,
    pub total_transactions: u64,
    /// Transactions that moved the tracked token.
    pub total_swaps: u64,
    pub total_ousd_swapped: Decimal,
    pub total_swapped_ousd_share: Decimal,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReport {
    /// Contracts behind swap-classified transactions, by swapped volume.
    pub contracts_swaps: Vec<ContractStats>,
    /// All other contracts, by swap count.
    pub contracts_other: Vec<ContractStats>,
}

pub fn transaction_report(
    analyses: &[TransactionAnalysis],
    config: &ProtocolConfig,
) -> TransactionReport {
    let mut swaps = Vec::new();
    let mut other = Vec::new();
    let mut swap_index: HashMap<Option<String>, usize> = HashMap::new();
    let mut other_index: HashMap<Option<String>, usize> = HashMap::new();

    for a in analyses {
        if a.transfer_log_count > 1 || a.sent_eth || a.received_eth {
            debug!(
                tx = %a.tx_hash,
                transfer_logs = a.transfer_log_count,
                sent_eth = a.sent_eth,
                received_eth = a.received_eth,
                class = %a.classification,
                "transaction may need further investigation"
            );
        }
        let (stats, index) = if a.classification.is_swap() {
            (&mut swaps, &mut swap_index)
        } else {
            (&mut other, &mut other_index)
        };
        let i = *index.entry(a.contract_address.clone()).or_insert_with(|| {
            stats.push(ContractStats {
                address: a.contract_address.clone(),
                name: a
                    .contract_address
                    .as_deref()
                    .and_then(|c| config.contract_name(c))
                    .unwrap_or("N/A")
                    .to_string(),
                total_transactions: 0,
                total_swaps: 0,
                total_ousd_swapped: Decimal::ZERO,
                total_swapped_ousd_share: Decimal::ZERO,
            });
            stats.len() - 1
        });
        let entry = &mut stats[i];
        entry.total_transactions += 1;
        if let Some(amount) = a.ousd_transfer_amount {
            entry.total_swaps += 1;
            entry.total_ousd_swapped += amount;
        }
    }

    finish(&mut swaps, |s| s.total_ousd_swapped);
    finish(&mut other, |s| Decimal::from(s.total_swaps));
    TransactionReport {
        contracts_swaps: swaps,
        contracts_other: other,
    }
}

fn finish(stats: &mut [ContractStats], sort_key: impl Fn(&ContractStats) -> Decimal) {
    let total: Decimal = stats.iter().map(|s| s.total_ousd_swapped).sum();
    for s in stats.iter_mut() {
        s.total_swapped_ousd_share = if total > Decimal::ZERO {
            Precision::ON_CHAIN
                .div(s.total_ousd_swapped, total)
                .unwrap_or(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };
    }
    stats.sort_by(|a, b| sort_key(b).cmp(&sort_key(a)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::abi::address_to_topic;
    use crate::ousd::classify::TRANSFER_TOPIC;
    use crate::ousd::protocol_config::OUSD_ADDRESS;
    use rust_decimal_macros::dec;

    const ALICE: &str = "0x1111111111111111111111111111111111111111";
    const POOL: &str = "0x3333333333333333333333333333333333333333";
    const ROUTER: &str = "0x7a250d5630b4cf539739df2c5dacb4c659f2488d";
    const USDT: &str = "0xdac17f958d2ee523a2206206994597c13d831ec7";

    fn transfer(token: &str, from: &str, to: &str, value: u128, log_index: u64) -> RawLog {
        RawLog {
            address: token.into(),
            topics: vec![
                TRANSFER_TOPIC.into(),
                address_to_topic(from),
                address_to_topic(to),
            ],
            data: format!("0x{:064x}", value),
            block_number: 1,
            transaction_hash: "0xt".into(),
            transaction_index: 0,
            log_index,
            block_time: None,
        }
    }

    fn tx(hash: &str, to: &str, value: &str) -> TransactionRecord {
        TransactionRecord {
            hash: hash.into(),
            block_number: 1,
            from_address: ALICE.into(),
            to_address: Some(to.into()),
            value: value.into(),
            internal_transactions: vec![],
        }
    }

    fn classify(tx: &TransactionRecord, logs: &[RawLog]) -> TransactionClass {
        classify_transaction(tx, logs, &AccountScope::account(ALICE), OUSD_ADDRESS).classification
    }

    #[test]
    fn ousd_in_coin_out_is_swap_gain() {
        let logs = [
            transfer(USDT, ALICE, POOL, 5_000_000, 0),
            transfer(OUSD_ADDRESS, POOL, ALICE, 5 * 10u128.pow(18), 1),
        ];
        let a = classify_transaction(
            &tx("0x1", ROUTER, "0x0"),
            &logs,
            &AccountScope::account(ALICE),
            OUSD_ADDRESS,
        );
        assert_eq!(a.classification, TransactionClass::SwapGainOusd);
        assert_eq!(a.transfer_log_count, 2);
        assert_eq!(a.ousd_transfer_amount, Some(dec!(5)));
    }

    #[test]
    fn ousd_in_with_eth_sent_is_swap_gain() {
        let logs = [transfer(OUSD_ADDRESS, POOL, ALICE, 1, 0)];
        assert_eq!(
            classify(&tx("0x1", ROUTER, "0x2386f26fc10000"), &logs),
            TransactionClass::SwapGainOusd
        );
        assert_eq!(
            classify(&tx("0x1", ROUTER, "0x0"), &logs),
            TransactionClass::TransferIn
        );
    }

    #[test]
    fn ousd_out_for_eth_is_swap_give() {
        let mut record = tx("0x1", ROUTER, "0x0");
        record.internal_transactions.push(InternalTransaction {
            to: ALICE.into(),
            value: "0x10".into(),
        });
        let logs = [transfer(OUSD_ADDRESS, ALICE, POOL, 1, 0)];
        assert_eq!(classify(&record, &logs), TransactionClass::SwapGiveOusd);
        assert_eq!(
            classify(&tx("0x1", ROUTER, "0x0"), &logs),
            TransactionClass::TransferOut
        );
    }

    #[test]
    fn other_transfers_and_all_scope() {
        let logs = [transfer(USDT, POOL, ROUTER, 1, 0)];
        let record = tx("0x1", ROUTER, "0x0");
        assert_eq!(classify(&record, &logs), TransactionClass::UnknownTransfer);
        assert_eq!(classify(&record, &[]), TransactionClass::Unknown);
        let all = classify_transaction(
            &record,
            &[transfer(OUSD_ADDRESS, POOL, ALICE, 1, 0)],
            &AccountScope::All,
            OUSD_ADDRESS,
        );
        assert_eq!(all.classification, TransactionClass::Unknown);
        assert!(!all.transfer_ousd_in);
    }

    fn analysis(contract: &str, class: TransactionClass, amount: Option<Decimal>) -> TransactionAnalysis {
        TransactionAnalysis {
            account: ALICE.into(),
            tx_hash: "0x1".into(),
            contract_address: Some(contract.into()),
            internal_transactions: vec![],
            received_eth: false,
            sent_eth: false,
            transfer_ousd_out: false,
            transfer_ousd_in: false,
            transfer_coin_out: false,
            transfer_coin_in: false,
            ousd_transfer_from: None,
            ousd_transfer_to: None,
            ousd_transfer_amount: amount,
            transfer_log_count: 1,
            classification: class,
        }
    }

    #[test]
    fn report_groups_and_sorts() {
        let config = ProtocolConfig::default();
        let analyses = vec![
            analysis(POOL, TransactionClass::SwapGainOusd, Some(dec!(10))),
            analysis(ROUTER, TransactionClass::SwapGiveOusd, Some(dec!(30))),
            analysis(ROUTER, TransactionClass::SwapGainOusd, Some(dec!(10))),
            analysis(POOL, TransactionClass::TransferIn, Some(dec!(1))),
            analysis(ROUTER, TransactionClass::Unknown, None),
        ];
        let report = transaction_report(&analyses, &config);

        assert_eq!(report.contracts_swaps.len(), 2);
        let top = &report.contracts_swaps[0];
        assert_eq!(top.name, "Uniswap V2: Router 2");
        assert_eq!(top.total_transactions, 2);
        assert_eq!(top.total_swaps, 2);
        assert_eq!(top.total_ousd_swapped, dec!(40));
        assert_eq!(top.total_swapped_ousd_share, dec!(0.8));
        assert_eq!(report.contracts_swaps[1].name, "N/A");

        assert_eq!(report.contracts_other[0].address.as_deref(), Some(POOL));
        assert_eq!(report.contracts_other[0].total_swaps, 1);
        assert_eq!(report.contracts_other[0].total_swapped_ousd_share, dec!(1));
        assert_eq!(report.contracts_other[1].total_swaps, 0);
        assert_eq!(report.contracts_other[1].total_swapped_ousd_share, dec!(0));
    }

    #[test]
    fn class_names_roundtrip() {
        for class in [
            TransactionClass::TransferIn,
            TransactionClass::SwapGiveOusd,
            TransactionClass::UnknownTransfer,
        ] {
            assert_eq!(TransactionClass::parse(class.as_str()), Some(class));
        }
        assert_eq!(
            serde_json::to_value(TransactionClass::SwapGainOusd).unwrap(),
            "swap_gain_ousd"
        );
    }
}
