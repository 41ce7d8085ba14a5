//! OUSD ledger: log classification, ledger merging, and balance reconstruction.

pub mod classify;
pub mod events;
pub mod merge;
pub mod precision;
pub mod protocol_config;
pub mod reconstruct;

pub use classify::{classify_batch, classify_log, ClassifiedBatch, DecodingFault, Perspective};
pub use events::{
    LedgerEntry, LedgerError, LogEvent, RawLog, RebaseEvent, TokenTransfer, TransferEvent,
};
pub use merge::{merge_ledger, MergedEntry};
pub use precision::{Precision, PrecisionError};
pub use protocol_config::ProtocolConfig;
pub use reconstruct::{calculate_balance, reconstruct, ReconstructError, ReconstructedEntry};
