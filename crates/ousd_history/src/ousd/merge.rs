//! One account's rebases and transfers → one block-descending ledger.

use crate::ousd::events::{LedgerEntry, RebaseEvent, TransferEvent};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A ledger entry plus the credits/token rate in effect for it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MergedEntry {
    pub entry: LedgerEntry,
    pub credits_per_token: Decimal,
}

/// Transfers first, then rebases; drop everything at or before `relaunch_block`; stable
/// sort by block descending. Same-block ties keep that arrival order.
pub fn merge_ledger(
    rebases: &[RebaseEvent],
    transfers: Vec<TransferEvent>,
    relaunch_block: u64,
) -> Vec<MergedEntry> {
    let mut entries: Vec<LedgerEntry> = transfers
        .into_iter()
        .map(LedgerEntry::Transfer)
        .chain(rebases.iter().cloned().map(LedgerEntry::Rebase))
        .filter(|e| e.block_number() > relaunch_block)
        .collect();
    entries.sort_by(|a, b| b.block_number().cmp(&a.block_number()));
    propagate_rates(entries)
}

/// Annotate a descending ledger with rates. Walks oldest to newest: a transfer takes the
/// latest rebase seen so far, or the oldest rebase when none precedes it, or zero when the
/// ledger has no rebase at all.
pub fn propagate_rates(entries: Vec<LedgerEntry>) -> Vec<MergedEntry> {
    let mut current = entries
        .iter()
        .rev()
        .find_map(|e| match e {
            LedgerEntry::Rebase(r) => Some(r.credits_per_token),
            LedgerEntry::Transfer(_) => None,
        })
        .unwrap_or(Decimal::ZERO);

    let mut merged: Vec<MergedEntry> = entries
        .into_iter()
        .rev()
        .map(|entry| {
            if let LedgerEntry::Rebase(r) = &entry {
                current = r.credits_per_token;
            }
            MergedEntry {
                entry,
                credits_per_token: current,
            }
        })
        .collect();
    merged.reverse();
    merged
}
