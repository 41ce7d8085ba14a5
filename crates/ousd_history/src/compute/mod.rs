//! Account facts, population reports, transaction analytics, history, APY.

pub mod aggregate;
pub mod apy;
pub mod facts;
pub mod history;
pub mod transactions;

pub use aggregate::{
    analyze_account, analyze_accounts, analyze_accounts_parallel, build_report, curve_data,
    generate_report, generate_report_parallel, holder_set, load_rebases, prepare_context,
    AccountCounts, AccountFailure, AggregateReport, AnalysisContext, AnalysisError, ReportInputs,
    ReportWindow,
};
pub use apy::{apr_to_apy, trailing_apr, AprCacheEntry, TrailingApy, BLOCKS_PER_DAY};
pub use facts::{derive_facts, AccountFacts};
pub use history::{address_history, HistoryKind, HistoryRecord};
pub use transactions::{
    analyze_transactions, classify_transaction, transaction_report, ContractStats,
    TransactionAnalysis, TransactionClass, TransactionReport,
};
