//! Per-account facts for one reporting window.

use crate::ousd::events::{LedgerEntry, TransferEvent};
use crate::ousd::reconstruct::ReconstructedEntry;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Balance above which an account counts as holding (0.1 tokens).
pub const HOLDING_THRESHOLD: Decimal = Decimal::from_parts(1, 0, 0, false, 1);
pub const LARGE_HOLDER_THRESHOLD: Decimal = Decimal::ONE_HUNDRED;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountFacts {
    pub address: String,
    pub balance: Decimal,
    pub is_holding: bool,
    pub is_large_holder: bool,
    /// No transfers between the start of the protocol and the window start.
    pub is_new_account: bool,
    /// No transfers between the start of the protocol and the curve campaign start.
    pub is_new_after_campaign_start: bool,
    pub new_after_campaign_and_large: bool,
    /// Sum of in-window transfer amounts; rebases excluded.
    pub non_rebase_balance_diff: Decimal,
}

impl AccountFacts {
    pub fn has_increased(&self) -> bool {
        self.non_rebase_balance_diff > Decimal::ZERO
    }

    pub fn has_decreased(&self) -> bool {
        self.non_rebase_balance_diff < Decimal::ZERO
    }
}

pub fn derive_facts(
    address: &str,
    ledger: &[ReconstructedEntry],
    previous_transfers: &[TransferEvent],
    pre_campaign_transfers: &[TransferEvent],
    current_balance: Decimal,
) -> AccountFacts {
    let is_large_holder = current_balance > LARGE_HOLDER_THRESHOLD;
    let is_new_after_campaign_start = pre_campaign_transfers.is_empty();
    let non_rebase_balance_diff = ledger
        .iter()
        .filter_map(|e| match &e.entry {
            LedgerEntry::Transfer(t) => Some(t.amount),
            LedgerEntry::Rebase(_) => None,
        })
        .sum();
    AccountFacts {
        address: address.to_string(),
        balance: current_balance,
        is_holding: current_balance > HOLDING_THRESHOLD,
        is_large_holder,
        is_new_account: previous_transfers.is_empty(),
        is_new_after_campaign_start,
        new_after_campaign_and_large: is_large_holder && is_new_after_campaign_start,
        non_rebase_balance_diff,
    }
}
