//! Raw log → typed event. Recognizes the two rebase signatures and ERC-20 transfers.

use crate::chain::abi::{decimal_at, normalize_address, topic_to_address, AbiError};
use crate::ousd::events::{LogEvent, RawLog, RebaseEvent, TokenTransfer, TransferEvent};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::warn;

/// `Transfer(address,address,uint256)`
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
/// `TotalSupplyUpdated(uint256,uint256,uint256)`
pub const TOTAL_SUPPLY_UPDATED_TOPIC: &str =
    "0x99e56f783b536ffacf422d59183ea321dd80dcd6d23daa13023e8afea38c3df1";
/// `TotalSupplyUpdatedHighres(uint256,uint256,uint256)`
pub const TOTAL_SUPPLY_UPDATED_HIGHRES_TOPIC: &str =
    "0x41645eb819d3011b13f97696a8109d14bfcddfaca7d063ec0564d62a3e257235";

const TOKEN_DECIMALS: u32 = 18;
const CREDITS_PER_TOKEN_WORD: usize = 2;

/// Rebase log layouts. The high-resolution one carries 9 more decimals in its rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebaseFormat {
    Standard,
    HighResolution,
}

impl RebaseFormat {
    pub fn from_topic(topic: &str) -> Option<Self> {
        if topic.eq_ignore_ascii_case(TOTAL_SUPPLY_UPDATED_TOPIC) {
            Some(Self::Standard)
        } else if topic.eq_ignore_ascii_case(TOTAL_SUPPLY_UPDATED_HIGHRES_TOPIC) {
            Some(Self::HighResolution)
        } else {
            None
        }
    }

    pub fn topic(self) -> &'static str {
        match self {
            Self::Standard => TOTAL_SUPPLY_UPDATED_TOPIC,
            Self::HighResolution => TOTAL_SUPPLY_UPDATED_HIGHRES_TOPIC,
        }
    }

    /// Divisor bringing a decoded rate onto the standard 1e18 scale.
    pub fn rate_divisor(self) -> Decimal {
        match self {
            Self::Standard => Decimal::ONE,
            Self::HighResolution => Decimal::from(1_000_000_000u64),
        }
    }
}

/// Whose point of view sets the sign of a transfer amount.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Perspective<'a> {
    Account(&'a str),
    /// Every transfer counts as received.
    All,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot decode log {log_index} of {transaction_hash}: {source}")]
pub struct DecodingFault {
    pub transaction_hash: String,
    pub log_index: u64,
    #[source]
    pub source: AbiError,
}

impl DecodingFault {
    fn new(log: &RawLog, source: AbiError) -> Self {
        Self {
            transaction_hash: log.transaction_hash.clone(),
            log_index: log.log_index,
            source,
        }
    }
}

/// Classify one log. `Ok(None)` means the signature is not one we track.
pub fn classify_log(
    log: &RawLog,
    perspective: Perspective<'_>,
    token_address: &str,
) -> Result<Option<LogEvent>, DecodingFault> {
    let Some(topic0) = log.topics.first() else {
        return Ok(None);
    };
    let is_token = normalize_address(&log.address) == normalize_address(token_address);

    if let Some(format) = RebaseFormat::from_topic(topic0) {
        if !is_token {
            return Ok(None);
        }
        let rate = decimal_at(&log.data, CREDITS_PER_TOKEN_WORD, TOKEN_DECIMALS)
            .map_err(|e| DecodingFault::new(log, e))?;
        let credits_per_token = (rate / format.rate_divisor()).normalize();
        return Ok(Some(LogEvent::Rebase(RebaseEvent::new(
            log.block_number,
            log.transaction_hash.clone(),
            credits_per_token,
        ))));
    }

    if !topic0.eq_ignore_ascii_case(TRANSFER_TOPIC) {
        return Ok(None);
    }
    if log.topics.len() < 3 {
        return Err(DecodingFault::new(
            log,
            AbiError::MissingTopic {
                needed: 3,
                available: log.topics.len(),
            },
        ));
    }
    let from_address = topic_to_address(&log.topics[1]).map_err(|e| DecodingFault::new(log, e))?;
    let to_address = topic_to_address(&log.topics[2]).map_err(|e| DecodingFault::new(log, e))?;

    if !is_token {
        return Ok(Some(LogEvent::TokenTransfer(TokenTransfer {
            token: normalize_address(&log.address),
            transaction_hash: log.transaction_hash.clone(),
            from_address,
            to_address,
            log_index: log.log_index,
        })));
    }

    let value = decimal_at(&log.data, 0, TOKEN_DECIMALS).map_err(|e| DecodingFault::new(log, e))?;
    let amount = match perspective {
        Perspective::Account(account) if normalize_address(account) != to_address => -value,
        _ => value,
    };
    Ok(Some(LogEvent::Transfer(TransferEvent {
        block_number: log.block_number,
        transaction_hash: log.transaction_hash.clone(),
        amount,
        from_address,
        to_address,
        block_time: log.block_time,
        log_index: log.log_index,
    })))
}

/// Result of classifying many logs: faults are kept per record, the batch never aborts.
#[derive(Debug, Default)]
pub struct ClassifiedBatch {
    pub events: Vec<LogEvent>,
    pub faults: Vec<DecodingFault>,
    pub unrecognized: usize,
}

pub fn classify_batch(
    logs: &[RawLog],
    perspective: Perspective<'_>,
    token_address: &str,
) -> ClassifiedBatch {
    let mut batch = ClassifiedBatch::default();
    for log in logs {
        match classify_log(log, perspective, token_address) {
            Ok(Some(event)) => batch.events.push(event),
            Ok(None) => batch.unrecognized += 1,
            Err(fault) => {
                warn!(error = %fault, "skipping undecodable log");
                batch.faults.push(fault);
            }
        }
    }
    batch
}
