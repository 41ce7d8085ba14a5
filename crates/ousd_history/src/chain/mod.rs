//! Chain access: contract reads at a block, supply snapshots, response caching.

pub mod abi;
mod cache;
mod normalize;
mod rpc;

pub use cache::{CacheError, ResponseCache};
pub use normalize::{parse_block_or_time, BlockOrTime, NormalizeError};
pub use rpc::{RpcChainReader, RpcConfig};

use crate::ousd::precision::{Precision, PrecisionError};
use crate::ousd::protocol_config::PoolConfig;
use crate::ousd::reconstruct::calculate_balance;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("request: {0}")]
    Request(#[from] reqwest::Error),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("decode: {0}")]
    Decode(String),
    #[error("cache: {0}")]
    Cache(#[from] CacheError),
    #[error("config: {0}")]
    Config(String),
    #[error("offline mode: no cached response for {0}")]
    OfflineMiss(String),
    #[error("arithmetic: {0}")]
    Precision(#[from] PrecisionError),
}

impl From<abi::AbiError> for ChainError {
    fn from(e: abi::AbiError) -> Self {
        ChainError::Decode(e.to_string())
    }
}

/// Block to read state at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockTag {
    Number(u64),
    Latest,
}

impl BlockTag {
    /// JSON-RPC block parameter.
    pub fn to_param(self) -> String {
        match self {
            BlockTag::Number(n) => format!("0x{:x}", n),
            BlockTag::Latest => "latest".to_string(),
        }
    }

    /// Pinned reads never change and may be cached.
    pub fn is_pinned(self) -> bool {
        matches!(self, BlockTag::Number(_))
    }
}

impl From<Option<u64>> for BlockTag {
    fn from(block: Option<u64>) -> Self {
        block.map_or(BlockTag::Latest, BlockTag::Number)
    }
}

/// An account's internal credits and the rate they convert at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditsBalance {
    pub credits: Decimal,
    pub credits_per_token: Decimal,
}

impl CreditsBalance {
    pub fn balance(&self, precision: Precision) -> Result<Decimal, PrecisionError> {
        calculate_balance(self.credits, self.credits_per_token, precision)
    }
}

/// Contract reads used by reconstruction and reporting.
pub trait ChainReader: Send + Sync {
    fn credits_balance_of(&self, account: &str, at: BlockTag)
        -> Result<CreditsBalance, ChainError>;

    fn balance_of(
        &self,
        token: &str,
        account: &str,
        decimals: u32,
        at: BlockTag,
    ) -> Result<Decimal, ChainError>;

    fn total_supply(&self, token: &str, decimals: u32, at: BlockTag)
        -> Result<Decimal, ChainError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSupply {
    pub name: String,
    pub address: String,
    pub balance: Decimal,
    pub rebasing: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebasingTotals {
    pub rebasing: Decimal,
    pub non_rebasing: Decimal,
}

/// Token supply at one block, split by rebasing opt-in and by tracked pools.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyData {
    pub total_supply: Decimal,
    pub pools: Vec<PoolSupply>,
    pub totals_by_rebasing: RebasingTotals,
    /// Rebasing supply outside the tracked pools.
    pub other_rebasing: Decimal,
    /// Non-rebasing supply outside the tracked pools.
    pub other_non_rebasing: Decimal,
}

impl SupplyData {
    pub fn from_parts(
        total_supply: Decimal,
        non_rebasing_supply: Decimal,
        pools: Vec<PoolSupply>,
    ) -> Self {
        let rebasing = total_supply - non_rebasing_supply;
        let (pooled_rebasing, pooled_non_rebasing) =
            pools.iter().fold((Decimal::ZERO, Decimal::ZERO), |(r, n), p| {
                if p.rebasing {
                    (r + p.balance, n)
                } else {
                    (r, n + p.balance)
                }
            });
        Self {
            total_supply,
            pools,
            totals_by_rebasing: RebasingTotals {
                rebasing,
                non_rebasing: non_rebasing_supply,
            },
            other_rebasing: rebasing - pooled_rebasing,
            other_non_rebasing: non_rebasing_supply - pooled_non_rebasing,
        }
    }
}

/// Supply snapshots and the rebasing credits ratio APR is derived from.
pub trait SupplySource: Send + Sync {
    fn supply_data(&self, block: u64) -> Result<SupplyData, ChainError>;

    /// Tokens per rebasing credit. Grows as yield accrues.
    fn rebasing_credits_ratio(&self, block: u64) -> Result<Decimal, ChainError>;
}

impl<T: SupplySource + ?Sized> SupplySource for Arc<T> {
    fn supply_data(&self, block: u64) -> Result<SupplyData, ChainError> {
        (**self).supply_data(block)
    }

    fn rebasing_credits_ratio(&self, block: u64) -> Result<Decimal, ChainError> {
        (**self).rebasing_credits_ratio(block)
    }
}

pub trait ApyProvider: Send + Sync {
    fn trailing_apy(&self, block: u64) -> Result<Decimal, ChainError>;
}

/// Curve metapool size and the share of it staked in the gauge (earning OGN).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurveData {
    pub total_supply: Decimal,
    pub earning_ogn: Decimal,
}

pub(crate) fn pool_supplies<R: ChainReader + ?Sized>(
    reader: &R,
    token: &str,
    pools: &[PoolConfig],
    at: BlockTag,
) -> Result<Vec<PoolSupply>, ChainError> {
    pools
        .iter()
        .map(|p| {
            Ok(PoolSupply {
                name: p.name.clone(),
                address: p.address.clone(),
                balance: reader.balance_of(token, &p.address, 18, at)?,
                rebasing: p.rebasing,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn supply_split_by_pool_kind() {
        let pools = vec![
            PoolSupply {
                name: "curve".into(),
                address: "0xc".into(),
                balance: dec!(300),
                rebasing: false,
            },
            PoolSupply {
                name: "rebasing pool".into(),
                address: "0xr".into(),
                balance: dec!(50),
                rebasing: true,
            },
        ];
        let data = SupplyData::from_parts(dec!(1000), dec!(400), pools);
        assert_eq!(data.totals_by_rebasing.rebasing, dec!(600));
        assert_eq!(data.other_rebasing, dec!(550));
        assert_eq!(data.other_non_rebasing, dec!(100));
    }

    #[test]
    fn block_tag_params() {
        assert_eq!(BlockTag::Number(255).to_param(), "0xff");
        assert_eq!(BlockTag::from(None), BlockTag::Latest);
        assert!(!BlockTag::Latest.is_pinned());
    }

    #[test]
    fn credits_balance_guarded() {
        let cb = CreditsBalance {
            credits: dec!(40),
            credits_per_token: dec!(0),
        };
        assert_eq!(cb.balance(Precision::ON_CHAIN).unwrap(), dec!(0));
    }
}
