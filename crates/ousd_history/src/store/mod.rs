//! Ledger store: raw logs, OUSD transfers, blocks, and transactions.

mod sqlite;

pub use sqlite::{ImportSummary, SqliteConnector, SqliteLedger};

use crate::chain::abi::normalize_address;
use crate::ousd::events::{RawLog, TransferEvent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no block time stored for block {block_number}")]
    MissingBlockTime { block_number: u64 },
    #[error("no block {direction} {time}")]
    MissingTimeBoundary {
        time: OffsetDateTime,
        direction: TimeDirection,
    },
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Whose transfers and transactions a query returns.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AccountScope {
    Account(String),
    All,
}

impl AccountScope {
    pub fn account(address: &str) -> Self {
        Self::Account(normalize_address(address))
    }

    pub fn address(&self) -> Option<&str> {
        match self {
            Self::Account(a) => Some(a),
            Self::All => None,
        }
    }
}

/// Half-open block range `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub start: u64,
    pub end: u64,
}

impl BlockRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Both ends included.
    pub fn through(first: u64, last: u64) -> Self {
        Self {
            start: first,
            end: last.saturating_add(1),
        }
    }

    pub fn contains(&self, block: u64) -> bool {
        block >= self.start && block < self.end
    }
}

/// Half-open time window `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
}

impl TimeWindow {
    pub fn new(start: OffsetDateTime, end: OffsetDateTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: OffsetDateTime) -> bool {
        t >= self.start && t < self.end
    }
}

/// Which side of a timestamp to look for the nearest block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeDirection {
    /// Earliest block with `block_time >= t`.
    AtOrAfter,
    /// Latest block with `block_time <= t`.
    AtOrBefore,
}

impl fmt::Display for TimeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AtOrAfter => write!(f, "at or after"),
            Self::AtOrBefore => write!(f, "at or before"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub block_number: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub block_time: OffsetDateTime,
}

/// Value moved by a contract call inside a transaction. `value` is a hex quantity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalTransaction {
    pub to: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub hash: String,
    pub block_number: u64,
    pub from_address: String,
    /// None for contract creation.
    #[serde(default)]
    pub to_address: Option<String>,
    /// Hex quantity of ETH sent with the call.
    #[serde(default = "zero_quantity")]
    pub value: String,
    #[serde(default)]
    pub internal_transactions: Vec<InternalTransaction>,
}

fn zero_quantity() -> String {
    "0x0".to_string()
}

/// Read side of the ledger. All addresses returned are normalized.
pub trait LedgerStore {
    /// Rebase logs emitted by `token`, at most one per (signature, transaction), newest first.
    fn rebase_logs(&self, token: &str, range: Option<BlockRange>)
        -> Result<Vec<RawLog>, StoreError>;

    /// Tracked-token transfers touching the scope, signed from its side, oldest first.
    fn events_for_account(
        &self,
        scope: &AccountScope,
        window: Option<TimeWindow>,
    ) -> Result<Vec<TransferEvent>, StoreError>;

    /// Every address that ever sent or received the tracked token.
    fn all_transfer_addresses(&self) -> Result<Vec<String>, StoreError>;

    /// Block times for the given blocks. Unknown blocks are absent from the map.
    fn block_times(&self, blocks: &[u64]) -> Result<BTreeMap<u64, OffsetDateTime>, StoreError>;

    fn block_number_at(
        &self,
        time: OffsetDateTime,
        direction: TimeDirection,
    ) -> Result<Option<u64>, StoreError>;

    /// Transactions sent from or to the scope within `blocks`.
    fn transactions(
        &self,
        scope: &AccountScope,
        blocks: Option<BlockRange>,
    ) -> Result<Vec<TransactionRecord>, StoreError>;

    /// Hashes of transactions carrying a tracked-token transfer touching the scope.
    fn transfer_transaction_hashes(
        &self,
        scope: &AccountScope,
        window: Option<TimeWindow>,
    ) -> Result<Vec<String>, StoreError>;

    fn transaction(&self, hash: &str) -> Result<Option<TransactionRecord>, StoreError>;

    fn logs_for_transaction(&self, hash: &str) -> Result<Vec<RawLog>, StoreError>;
}

/// Opens a fresh store. Parallel workers each take their own connection.
pub trait LedgerConnector: Send + Sync {
    type Store: LedgerStore;

    fn connect(&self) -> Result<Self::Store, StoreError>;
}

/// Nearest block to `time`, or `MissingTimeBoundary` when the store has none on that side.
pub fn block_number_for_time<S: LedgerStore + ?Sized>(
    store: &S,
    time: OffsetDateTime,
    direction: TimeDirection,
) -> Result<u64, StoreError> {
    store
        .block_number_at(time, direction)?
        .ok_or(StoreError::MissingTimeBoundary { time, direction })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn ranges_are_half_open() {
        let r = BlockRange::through(10, 20);
        assert!(r.contains(10));
        assert!(r.contains(20));
        assert!(!r.contains(21));
        assert_eq!(BlockRange::through(1, u64::MAX).end, u64::MAX);

        let w = TimeWindow::new(
            datetime!(2021-04-05 00:00 UTC),
            datetime!(2021-04-12 00:00 UTC),
        );
        assert!(w.contains(datetime!(2021-04-05 00:00 UTC)));
        assert!(!w.contains(datetime!(2021-04-12 00:00 UTC)));
    }

    #[test]
    fn account_scope_normalizes() {
        let scope = AccountScope::account("0xABCD");
        assert_eq!(scope.address(), Some("0xabcd"));
        assert_eq!(AccountScope::All.address(), None);
    }

    #[test]
    fn transaction_defaults() {
        let tx: TransactionRecord = serde_json::from_str(
            r#"{"hash":"0x1","block_number":5,"from_address":"0xa"}"#,
        )
        .unwrap();
        assert_eq!(tx.value, "0x0");
        assert!(tx.to_address.is_none());
        assert!(tx.internal_transactions.is_empty());
    }
}
