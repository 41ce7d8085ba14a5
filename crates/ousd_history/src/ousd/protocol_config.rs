//! OUSD protocol constants used by the classifier, the merger, and the report builder.
//!
//! Every field has a mainnet default; a JSON file can override any subset of them.
//!
//! Load from: env `OUSD_CONFIG_PATH`, or `./config/ousd.json`, or `./ousd.json`.

use crate::chain::abi::normalize_address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use time::macros::datetime;
use time::OffsetDateTime;
use tracing::warn;

pub const OUSD_ADDRESS: &str = "0x2a8e1e676ec238d8a992307b495b45b3feaa5e86";
pub const OUSD_VAULT_ADDRESS: &str = "0xe75d77b1865ae93c7eaa3040b038d7aa7bc02f70";
pub const CURVE_METAPOOL: &str = "0x87650d7bbfc3a9f10587d7778206671719d9910d";
pub const CURVE_METAPOOL_GAUGE: &str = "0x25f0ce4e2f8dba112d9b115710ac297f816087cd";
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";
pub const BURN_ADDRESS: &str = "0x000000000000000000000000000000000000dead";

/// Accounts analyzed per parallel worker.
pub const ACCOUNT_ANALYZE_PARALLELISM: usize = 30;

/// A holder contract whose balance is broken out of the supply figures.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub name: String,
    pub address: String,
    /// Contracts are non-rebasing unless they opted in.
    #[serde(default)]
    pub rebasing: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// The rebasing token (OUSD).
    pub token_address: String,

    /// Logs at or before this block predate the relaunch and never enter a ledger.
    pub relaunch_block: u64,

    /// Lower bound for "has this account ever transferred" queries.
    #[serde(with = "time::serde::rfc3339")]
    pub start_of_everything: OffsetDateTime,

    /// Second, independent boundary for the "new after campaign" statistics.
    #[serde(with = "time::serde::rfc3339")]
    pub curve_campaign_start: OffsetDateTime,

    pub curve_metapool: String,
    pub curve_metapool_gauge: String,

    /// Counterparty display names for transaction analytics, keyed by lowercase address.
    pub contract_names: BTreeMap<String, String>,

    pub pools: Vec<PoolConfig>,

    /// Chunk size for parallel account analysis.
    pub parallelism: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        let contract_names = [
            (OUSD_VAULT_ADDRESS, "OUSD Vault"),
            (CURVE_METAPOOL, "Curve OUSD/3CRV Metapool"),
            (
                "0x7a250d5630b4cf539739df2c5dacb4c659f2488d",
                "Uniswap V2: Router 2",
            ),
            (
                "0xe592427a0aece92de3edee1f18e0157c05861564",
                "Uniswap V3: Router",
            ),
            (
                "0xd9e1ce17f2641f24ae83637ab66a2cca9c378b9f",
                "SushiSwap: Router",
            ),
            (
                "0x881d40237659c251811cec9c364ef91dc08d300c",
                "Metamask: Swap Router",
            ),
            (
                "0xdef1c0ded9bec7f1a1670819833240f027b25eff",
                "0x: Exchange Proxy",
            ),
            (
                "0x11111112542d85b3ef69ae05771c2dccff4faa26",
                "1inch v3: Router",
            ),
        ]
        .into_iter()
        .map(|(address, name)| (address.to_string(), name.to_string()))
        .collect();

        Self {
            token_address: OUSD_ADDRESS.to_string(),
            relaunch_block: 11_596_940,
            start_of_everything: datetime!(2020-09-17 00:00:00 UTC),
            curve_campaign_start: datetime!(2021-09-02 00:00:00 UTC),
            curve_metapool: CURVE_METAPOOL.to_string(),
            curve_metapool_gauge: CURVE_METAPOOL_GAUGE.to_string(),
            contract_names,
            pools: vec![PoolConfig {
                name: "Curve OUSD/3CRV".to_string(),
                address: CURVE_METAPOOL.to_string(),
                rebasing: false,
            }],
            parallelism: ACCOUNT_ANALYZE_PARALLELISM,
        }
    }
}

impl ProtocolConfig {
    /// Load config from path. Returns default on error or missing file.
    pub fn load_from_path(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str::<Self>(&content) {
            Ok(config) => config.normalized(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "invalid protocol config, using defaults");
                Self::default()
            }
        }
    }

    /// Load config: env OUSD_CONFIG_PATH, then ./config/ousd.json, then ./ousd.json.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("OUSD_CONFIG_PATH") {
            let p = Path::new(&path);
            if p.exists() {
                return Self::load_from_path(p);
            }
        }
        for candidate in [Path::new("./config/ousd.json"), Path::new("./ousd.json")] {
            if candidate.exists() {
                return Self::load_from_path(candidate);
            }
        }
        Self::default()
    }

    /// Lowercase every address so lookups against normalized log addresses match.
    pub fn normalized(mut self) -> Self {
        self.token_address = normalize_address(&self.token_address);
        self.curve_metapool = normalize_address(&self.curve_metapool);
        self.curve_metapool_gauge = normalize_address(&self.curve_metapool_gauge);
        self.contract_names = self
            .contract_names
            .into_iter()
            .map(|(address, name)| (normalize_address(&address), name))
            .collect();
        for pool in &mut self.pools {
            pool.address = normalize_address(&pool.address);
        }
        self
    }

    pub fn is_token(&self, address: &str) -> bool {
        normalize_address(address) == self.token_address
    }

    pub fn contract_name(&self, address: &str) -> Option<&str> {
        self.contract_names
            .get(&normalize_address(address))
            .map(String::as_str)
    }

    /// Zero and burn addresses never count as holders.
    pub fn is_excluded_holder(address: &str) -> bool {
        let a = normalize_address(address);
        a == ZERO_ADDRESS || a == BURN_ADDRESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn partial_file_keeps_defaults() {
        let tmp = NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            r#"{"relaunch_block": 42, "token_address": "0xABCDEF"}"#,
        )
        .unwrap();
        let config = ProtocolConfig::load_from_path(tmp.path());
        assert_eq!(config.relaunch_block, 42);
        assert_eq!(config.token_address, "0xabcdef");
        assert_eq!(config.curve_metapool, CURVE_METAPOOL);
        assert_eq!(config.parallelism, ACCOUNT_ANALYZE_PARALLELISM);
    }

    #[test]
    fn missing_file_is_default() {
        let config = ProtocolConfig::load_from_path(Path::new("/nonexistent/ousd.json"));
        assert_eq!(config, ProtocolConfig::default());
    }

    #[test]
    fn contract_names_are_case_insensitive() {
        let config = ProtocolConfig::default();
        assert_eq!(
            config.contract_name("0x7A250D5630B4CF539739DF2C5DACB4C659F2488D"),
            Some("Uniswap V2: Router 2")
        );
        assert!(ProtocolConfig::is_excluded_holder(
            "0x000000000000000000000000000000000000dEaD"
        ));
    }
}
