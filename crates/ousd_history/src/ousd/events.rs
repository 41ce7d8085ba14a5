//! Raw log records and the typed events classified out of them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

/// One log as held by the ledger store: emitting contract, topics, data, and block context.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: u64,
    pub transaction_hash: String,
    #[serde(default)]
    pub transaction_index: u64,
    pub log_index: u64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub block_time: Option<OffsetDateTime>,
}

/// Protocol-wide change of the credits/token conversion rate.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RebaseEvent {
    pub block_number: u64,
    pub transaction_hash: String,
    pub credits_per_token: Decimal,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub block_time: Option<OffsetDateTime>,
}

impl RebaseEvent {
    pub fn new(block_number: u64, transaction_hash: String, credits_per_token: Decimal) -> Self {
        Self {
            block_number,
            transaction_hash,
            credits_per_token,
            block_time: None,
        }
    }

    pub fn with_block_time(self, block_time: OffsetDateTime) -> Self {
        Self {
            block_time: Some(block_time),
            ..self
        }
    }
}

/// Token movement seen from one account: `amount` is positive when received, negative when sent.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TransferEvent {
    pub block_number: u64,
    pub transaction_hash: String,
    pub amount: Decimal,
    pub from_address: String,
    pub to_address: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub block_time: Option<OffsetDateTime>,
    pub log_index: u64,
}

/// ERC-20 transfer of some asset other than the tracked token. Only direction matters.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TokenTransfer {
    pub token: String,
    pub transaction_hash: String,
    pub from_address: String,
    pub to_address: String,
    pub log_index: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEvent {
    Rebase(RebaseEvent),
    Transfer(TransferEvent),
    TokenTransfer(TokenTransfer),
}

impl LogEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            LogEvent::Rebase(_) => "rebase",
            LogEvent::Transfer(_) => "transfer",
            LogEvent::TokenTransfer(_) => "token_transfer",
        }
    }

    pub fn transaction_hash(&self) -> &str {
        match self {
            LogEvent::Rebase(r) => &r.transaction_hash,
            LogEvent::Transfer(t) => &t.transaction_hash,
            LogEvent::TokenTransfer(t) => &t.transaction_hash,
        }
    }
}

/// What a balance walk can consume.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerEntry {
    Rebase(RebaseEvent),
    Transfer(TransferEvent),
}

impl LedgerEntry {
    pub fn block_number(&self) -> u64 {
        match self {
            LedgerEntry::Rebase(r) => r.block_number,
            LedgerEntry::Transfer(t) => t.block_number,
        }
    }

    pub fn transaction_hash(&self) -> &str {
        match self {
            LedgerEntry::Rebase(r) => &r.transaction_hash,
            LedgerEntry::Transfer(t) => &t.transaction_hash,
        }
    }

    pub fn block_time(&self) -> Option<OffsetDateTime> {
        match self {
            LedgerEntry::Rebase(r) => r.block_time,
            LedgerEntry::Transfer(t) => t.block_time,
        }
    }

    pub fn is_rebase(&self) -> bool {
        matches!(self, LedgerEntry::Rebase(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("unrecognized ledger entry `{kind}` in {transaction_hash}")]
    UnrecognizedLedgerEntry {
        kind: &'static str,
        transaction_hash: String,
    },
}

impl TryFrom<LogEvent> for LedgerEntry {
    type Error = LedgerError;

    fn try_from(event: LogEvent) -> Result<Self, Self::Error> {
        match event {
            LogEvent::Rebase(r) => Ok(LedgerEntry::Rebase(r)),
            LogEvent::Transfer(t) => Ok(LedgerEntry::Transfer(t)),
            other => Err(LedgerError::UnrecognizedLedgerEntry {
                kind: other.kind(),
                transaction_hash: other.transaction_hash().to_string(),
            }),
        }
    }
}

/// Account transfer streams must hold transfers only.
impl TryFrom<LogEvent> for TransferEvent {
    type Error = LedgerError;

    fn try_from(event: LogEvent) -> Result<Self, Self::Error> {
        match event {
            LogEvent::Transfer(t) => Ok(t),
            other => Err(LedgerError::UnrecognizedLedgerEntry {
                kind: other.kind(),
                transaction_hash: other.transaction_hash().to_string(),
            }),
        }
    }
}
