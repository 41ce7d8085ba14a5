//! ousd_history: per-account OUSD balance history from Ethereum logs.
//!
//! Merges transfer and rebase logs into one ledger, reconstructs balances from the token's
//! internal credits, and attributes every change to a transfer or to yield. Reports tally
//! holder facts over a week or month. Read-only.

pub mod chain;
pub mod compute;
pub mod ousd;
pub mod report;
pub mod store;

pub use chain::{
    ChainError, ChainReader, ResponseCache, RpcChainReader, RpcConfig, SupplySource,
};
pub use compute::{
    address_history, generate_report, generate_report_parallel, AccountFacts, AggregateReport,
    AnalysisError, HistoryRecord, ReportWindow, TrailingApy, TransactionReport,
};
pub use ousd::{LedgerEntry, Precision, ProtocolConfig, RebaseEvent, TransferEvent};
pub use report::{AnalyticsReportRecord, ReportArchive, ReportChanges, ReportPeriod, ReportView};
pub use store::{LedgerStore, SqliteConnector, SqliteLedger};
