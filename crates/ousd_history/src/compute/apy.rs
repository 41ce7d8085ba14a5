//! Trailing APR from the rebasing credits ratio, compounded weekly into APY.

use crate::chain::{ApyProvider, ChainError, SupplySource};
use crate::ousd::precision::{Precision, PrecisionError};
use rust_decimal::{Decimal, MathematicalOps, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use time::{Duration, OffsetDateTime};
use tracing::debug;

/// One block every 15 seconds.
pub const BLOCKS_PER_DAY: u64 = 4 * 60 * 24;
pub const TRAILING_DAYS: u32 = 7;
pub const DEFAULT_APR_TTL: Duration = Duration::minutes(5);

const DAYS_PER_YEAR: Decimal = Decimal::from_parts(36525, 0, 0, false, 2);

/// A computed APR and how long it may be reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AprCacheEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub computed_at: OffsetDateTime,
    pub at_block: u64,
    pub apr: Decimal,
    pub ttl: Duration,
}

impl AprCacheEntry {
    pub fn is_fresh(&self, now: OffsetDateTime, block: u64) -> bool {
        self.at_block == block && now - self.computed_at < self.ttl
    }
}

fn round_2dp(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

/// Annualized growth of the ratio over `days`, in percent.
pub fn trailing_apr(
    ratio_now: Decimal,
    ratio_then: Decimal,
    days: u32,
) -> Result<Decimal, PrecisionError> {
    let p = Precision::ON_CHAIN;
    let growth = p.sub(p.div(ratio_now, ratio_then)?, Decimal::ONE)?;
    let yearly = p.mul(p.mul(growth, Decimal::ONE_HUNDRED)?, DAYS_PER_YEAR)?;
    Ok(round_2dp(p.div(yearly, Decimal::from(days))?))
}

/// APR compounded once per week.
pub fn apr_to_apy(apr: Decimal) -> Result<Decimal, PrecisionError> {
    let periods = DAYS_PER_YEAR
        .checked_div(Decimal::from(TRAILING_DAYS))
        .ok_or(PrecisionError::Overflow)?;
    let rate = apr
        .checked_div(periods)
        .and_then(|r| r.checked_div(Decimal::ONE_HUNDRED))
        .ok_or(PrecisionError::Overflow)?;
    let compounded = (Decimal::ONE + rate)
        .checked_powd(periods)
        .ok_or(PrecisionError::Overflow)?;
    let apy = (compounded - Decimal::ONE)
        .checked_mul(Decimal::ONE_HUNDRED)
        .ok_or(PrecisionError::Overflow)?;
    Ok(round_2dp(apy))
}

/// Reuse `cached` while fresh for `block`, otherwise compute a new entry from two ratio reads
/// [`TRAILING_DAYS`] apart.
pub fn cached_trailing_apr<S: SupplySource + ?Sized>(
    source: &S,
    block: u64,
    now: OffsetDateTime,
    cached: Option<AprCacheEntry>,
    ttl: Duration,
) -> Result<AprCacheEntry, ChainError> {
    if let Some(entry) = cached.filter(|e| e.is_fresh(now, block)) {
        return Ok(entry);
    }
    let then = block.saturating_sub(BLOCKS_PER_DAY * u64::from(TRAILING_DAYS));
    let ratio_now = source.rebasing_credits_ratio(block)?;
    let ratio_then = source.rebasing_credits_ratio(then)?;
    let apr = trailing_apr(ratio_now, ratio_then, TRAILING_DAYS)?;
    debug!(block, then, %apr, "trailing apr computed");
    Ok(AprCacheEntry {
        computed_at: now,
        at_block: block,
        apr,
        ttl,
    })
}

/// [`ApyProvider`] over a supply source, holding the last APR entry.
pub struct TrailingApy<S> {
    source: S,
    ttl: Duration,
    cache: Mutex<Option<AprCacheEntry>>,
}

impl<S: SupplySource> TrailingApy<S> {
    pub fn new(source: S) -> Self {
        Self::with_ttl(source, DEFAULT_APR_TTL)
    }

    pub fn with_ttl(source: S, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cache: Mutex::new(None),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn trailing_apr(&self, block: u64) -> Result<Decimal, ChainError> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = cached_trailing_apr(
            &self.source,
            block,
            OffsetDateTime::now_utc(),
            *cache,
            self.ttl,
        )?;
        *cache = Some(entry);
        Ok(entry.apr)
    }
}

impl<S: SupplySource> ApyProvider for TrailingApy<S> {
    fn trailing_apy(&self, block: u64) -> Result<Decimal, ChainError> {
        Ok(apr_to_apy(self.trailing_apr(block)?)?)
    }
}
