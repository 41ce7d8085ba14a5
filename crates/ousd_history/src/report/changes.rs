//! Period-over-period change of every report stat, in percent.

use crate::report::ReportView;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportChanges {
    pub total_supply: Decimal,
    pub apy: Decimal,
    pub accounts_analyzed: Decimal,
    pub accounts_holding_ousd: Decimal,
    pub accounts_holding_more_than_100_ousd: Decimal,
    pub accounts_holding_more_than_100_ousd_after_curve_start: Decimal,
    pub new_accounts: Decimal,
    pub new_accounts_after_curve_start: Decimal,
    pub accounts_with_non_rebase_balance_increase: Decimal,
    pub accounts_with_non_rebase_balance_decrease: Decimal,
    pub other_rebasing: Decimal,
    pub other_non_rebasing: Decimal,
    pub curve_metapool_total_supply: Decimal,
    pub share_earning_curve_ogn: Decimal,
}

/// `(current - previous) / previous * 100`, zero when either side is missing or previous is zero.
pub fn percent_change(current: Option<Decimal>, previous: Option<Decimal>) -> Decimal {
    match (current, previous) {
        (Some(cur), Some(prev)) if !prev.is_zero() => (cur - prev)
            .checked_div(prev)
            .and_then(|r| r.checked_mul(Decimal::ONE_HUNDRED))
            .map(|r| r.normalize())
            .unwrap_or_default(),
        _ => Decimal::ZERO,
    }
}

fn count_change(current: u64, previous: u64) -> Decimal {
    percent_change(Some(current.into()), Some(previous.into()))
}

impl ReportChanges {
    /// All zero without a previous report. Supply and curve stats only compare when both
    /// reports carry them.
    pub fn between(current: &ReportView, previous: Option<&ReportView>) -> Self {
        let Some(previous) = previous else {
            return Self::default();
        };
        let (c, p) = (&current.counts, &previous.counts);
        let mut changes = Self {
            total_supply: percent_change(current.total_supply, previous.total_supply),
            apy: percent_change(current.apy, previous.apy),
            accounts_analyzed: count_change(c.accounts_analyzed, p.accounts_analyzed),
            accounts_holding_ousd: count_change(c.accounts_holding_ousd, p.accounts_holding_ousd),
            accounts_holding_more_than_100_ousd: count_change(
                c.accounts_holding_more_than_100_ousd,
                p.accounts_holding_more_than_100_ousd,
            ),
            accounts_holding_more_than_100_ousd_after_curve_start: count_change(
                c.accounts_holding_more_than_100_ousd_after_curve_start,
                p.accounts_holding_more_than_100_ousd_after_curve_start,
            ),
            new_accounts: count_change(c.new_accounts, p.new_accounts),
            new_accounts_after_curve_start: count_change(
                c.new_accounts_after_curve_start,
                p.new_accounts_after_curve_start,
            ),
            accounts_with_non_rebase_balance_increase: count_change(
                c.accounts_with_non_rebase_balance_increase,
                p.accounts_with_non_rebase_balance_increase,
            ),
            accounts_with_non_rebase_balance_decrease: count_change(
                c.accounts_with_non_rebase_balance_decrease,
                p.accounts_with_non_rebase_balance_decrease,
            ),
            ..Self::default()
        };
        if current.has_supply_data() && previous.has_supply_data() {
            changes.other_rebasing = percent_change(current.other_rebasing, previous.other_rebasing);
            changes.other_non_rebasing =
                percent_change(current.other_non_rebasing, previous.other_non_rebasing);
        }
        if current.has_curve_data() && previous.has_curve_data() {
            changes.curve_metapool_total_supply = percent_change(
                current.curve_metapool_total_supply,
                previous.curve_metapool_total_supply,
            );
            changes.share_earning_curve_ogn = percent_change(
                current.share_earning_curve_ogn,
                previous.share_earning_curve_ogn,
            );
        }
        changes
    }
}
