//! Balance walk: newest to oldest, rolling credits back through each transfer.
//!
//! Credits are the token's internal unit; `balance = credits / credits_per_token`. Between
//! rebases an account's credits only move with transfers, so starting from the current
//! credits and undoing each transfer yields the balance at every ledger entry. Rebase entries
//! additionally carry the yield attributed to them: the balance difference the rate change
//! alone produced.

use crate::ousd::events::LedgerEntry;
use crate::ousd::merge::MergedEntry;
use crate::ousd::precision::{Precision, PrecisionError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconstructError {
    #[error("overflow reconstructing {transaction_hash} at block {block_number}: {source}")]
    Overflow {
        block_number: u64,
        transaction_hash: String,
        #[source]
        source: PrecisionError,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReconstructedEntry {
    pub entry: LedgerEntry,
    pub credits_per_token: Decimal,
    /// Token balance right after this entry.
    pub balance: Decimal,
    /// Yield for a rebase, the signed transfer amount for a transfer.
    pub amount: Decimal,
    /// Credits held right after this entry.
    pub credit_balance: Decimal,
}

/// `credits / credits_per_token`, or zero when either side is zero.
pub fn calculate_balance(
    credits: Decimal,
    credits_per_token: Decimal,
    precision: Precision,
) -> Result<Decimal, PrecisionError> {
    if credits.is_zero() || credits_per_token.is_zero() {
        return Ok(Decimal::ZERO);
    }
    precision.div(credits, credits_per_token)
}

/// Walk a block-descending merged ledger from `credit_balance` (credits at the newest point).
pub fn reconstruct(
    credit_balance: Decimal,
    merged: Vec<MergedEntry>,
    precision: Precision,
) -> Result<Vec<ReconstructedEntry>, ReconstructError> {
    // rate of the nearest older rebase, per position
    let mut older_rebase_rate = vec![None; merged.len()];
    let mut seen = None;
    for (i, m) in merged.iter().enumerate().rev() {
        older_rebase_rate[i] = seen;
        if m.entry.is_rebase() {
            seen = Some(m.credits_per_token);
        }
    }

    let mut credits = credit_balance;
    let mut out = Vec::with_capacity(merged.len());
    for (m, older_rate) in merged.into_iter().zip(older_rebase_rate) {
        let overflow = |source| ReconstructError::Overflow {
            block_number: m.entry.block_number(),
            transaction_hash: m.entry.transaction_hash().to_string(),
            source,
        };
        let rate = m.credits_per_token;
        let balance = calculate_balance(credits, rate, precision).map_err(overflow)?;
        let credits_here = credits;
        let amount = match &m.entry {
            LedgerEntry::Rebase(_) => match older_rate {
                Some(prev) => {
                    let prev_balance =
                        calculate_balance(credits, prev, precision).map_err(overflow)?;
                    precision.sub(balance, prev_balance).map_err(overflow)?
                }
                None => Decimal::ZERO,
            },
            LedgerEntry::Transfer(t) => {
                let change = precision.mul(-t.amount, rate).map_err(overflow)?;
                credits = precision.add(credits, change).map_err(overflow)?;
                t.amount
            }
        };
        out.push(ReconstructedEntry {
            entry: m.entry,
            credits_per_token: rate,
            balance,
            amount,
            credit_balance: credits_here,
        });
    }
    Ok(out)
}
