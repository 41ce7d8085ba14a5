//! JSON-RPC chain reader with rate limiting, optional retries, and a pinned-block cache.

use crate::chain::abi::{decimal_at, encode_call};
use crate::chain::cache::ResponseCache;
use crate::chain::{
    pool_supplies, BlockTag, ChainError, ChainReader, CreditsBalance, SupplyData, SupplySource,
};
use crate::ousd::precision::Precision;
use crate::ousd::protocol_config::{PoolConfig, ProtocolConfig};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

const DEFAULT_RPC_URL: &str = "http://localhost:8545";
const RATE_LIMIT_MS: u64 = 50;
const RETRY_BACKOFF_MS: u64 = 500;
const TIMEOUT_SECS: u64 = 30;
const TOKEN_DECIMALS: u32 = 18;

#[derive(Clone, Debug)]
pub struct RpcConfig {
    pub url: String,
    pub rate_limit_ms: u64,
    /// Extra attempts after a transport failure. Zero means fail on first error.
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub timeout_secs: u64,
    /// Serve from cache only.
    pub offline: bool,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_RPC_URL.to_string(),
            rate_limit_ms: RATE_LIMIT_MS,
            max_retries: 0,
            retry_backoff_ms: RETRY_BACKOFF_MS,
            timeout_secs: TIMEOUT_SECS,
            offline: false,
        }
    }
}

impl RpcConfig {
    pub fn endpoint(&self) -> Result<Url, ChainError> {
        let url = Url::parse(&self.url)
            .map_err(|e| ChainError::Config(format!("rpc url {}: {}", self.url, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ChainError::Config(format!(
                "rpc url scheme must be http or https, got {}",
                other
            ))),
        }
    }
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Blocking reader. Construct and drop it outside async contexts.
pub struct RpcChainReader {
    config: RpcConfig,
    endpoint: Url,
    client: Option<reqwest::blocking::Client>,
    cache: Option<ResponseCache>,
    token: String,
    pools: Vec<PoolConfig>,
    last_request: Mutex<Option<Instant>>,
    request_count: AtomicU64,
}

impl RpcChainReader {
    pub fn new(
        config: RpcConfig,
        protocol: &ProtocolConfig,
        cache: Option<ResponseCache>,
    ) -> Result<Self, ChainError> {
        let endpoint = config.endpoint()?;
        let client = if config.offline {
            None
        } else {
            Some(
                reqwest::blocking::Client::builder()
                    .use_rustls_tls()
                    .timeout(Duration::from_secs(config.timeout_secs))
                    .build()?,
            )
        };
        Ok(Self {
            config,
            endpoint,
            client,
            cache,
            token: protocol.token_address.clone(),
            pools: protocol.pools.clone(),
            last_request: Mutex::new(None),
            request_count: AtomicU64::new(0),
        })
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    fn rate_limit(&self) {
        let need = Duration::from_millis(self.config.rate_limit_ms);
        let mut last = self
            .last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < need {
                std::thread::sleep(need - elapsed);
            }
        }
        *last = Some(Instant::now());
    }

    fn send(&self, client: &reqwest::blocking::Client, body: &Value) -> Result<Value, ChainError> {
        let response = client.post(self.endpoint.clone()).json(body).send()?;
        let status = response.status();
        let text = response.text()?;
        if !status.is_success() {
            return Err(ChainError::Rpc {
                code: i64::from(status.as_u16()),
                message: text,
            });
        }
        let parsed: RpcResponse = serde_json::from_str(&text)
            .map_err(|e| ChainError::Decode(format!("rpc response: {}", e)))?;
        if let Some(err) = parsed.error {
            return Err(ChainError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        parsed
            .result
            .ok_or_else(|| ChainError::Decode("rpc response without result".to_string()))
    }

    fn request(&self, method: &str, params: Value, pinned: bool) -> Result<Value, ChainError> {
        let key = match (&self.cache, pinned) {
            (Some(_), true) => Some(ResponseCache::key_for(method, &params)?),
            _ => None,
        };
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(hit) = cache.get(key)? {
                debug!(key = %key, method, "cache hit");
                return Ok(hit);
            }
        }
        let Some(client) = &self.client else {
            return Err(ChainError::OfflineMiss(method.to_string()));
        };

        let body = json!({
            "jsonrpc": "2.0",
            "id": self.request_count.load(Ordering::Relaxed) + 1,
            "method": method,
            "params": params,
        });
        let mut attempt = 0;
        let result = loop {
            self.rate_limit();
            match self.send(client, &body) {
                Err(ChainError::Request(e)) if attempt < self.config.max_retries => {
                    let ms = self.config.retry_backoff_ms * (1 << attempt);
                    warn!(attempt, ms, error = %e, "retry after error");
                    std::thread::sleep(Duration::from_millis(ms));
                    attempt += 1;
                }
                other => break other?,
            }
        };
        self.request_count.fetch_add(1, Ordering::Relaxed);
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Err(e) = cache.put(key, method, &result) {
                warn!(error = %e, "failed to cache rpc response");
            }
        }
        Ok(result)
    }

    /// `eth_call` returning the raw hex output.
    pub fn eth_call(&self, to: &str, data: &str, at: BlockTag) -> Result<String, ChainError> {
        let params = json!([{ "to": to, "data": data }, at.to_param()]);
        let result = self.request("eth_call", params, at.is_pinned())?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ChainError::Decode(format!("eth_call result not a string: {}", result)))
    }

    fn call_word(
        &self,
        to: &str,
        signature: &str,
        args: &[&str],
        decimals: u32,
        at: BlockTag,
    ) -> Result<Decimal, ChainError> {
        let output = self.eth_call(to, &encode_call(signature, args), at)?;
        Ok(decimal_at(&output, 0, decimals)?)
    }
}

impl ChainReader for RpcChainReader {
    fn credits_balance_of(
        &self,
        account: &str,
        at: BlockTag,
    ) -> Result<CreditsBalance, ChainError> {
        let output = self.eth_call(
            &self.token,
            &encode_call("creditsBalanceOf(address)", &[account]),
            at,
        )?;
        Ok(CreditsBalance {
            credits: decimal_at(&output, 0, TOKEN_DECIMALS)?,
            credits_per_token: decimal_at(&output, 1, TOKEN_DECIMALS)?,
        })
    }

    fn balance_of(
        &self,
        token: &str,
        account: &str,
        decimals: u32,
        at: BlockTag,
    ) -> Result<Decimal, ChainError> {
        self.call_word(token, "balanceOf(address)", &[account], decimals, at)
    }

    fn total_supply(
        &self,
        token: &str,
        decimals: u32,
        at: BlockTag,
    ) -> Result<Decimal, ChainError> {
        self.call_word(token, "totalSupply()", &[], decimals, at)
    }
}

impl SupplySource for RpcChainReader {
    fn supply_data(&self, block: u64) -> Result<SupplyData, ChainError> {
        let at = BlockTag::Number(block);
        let total = self.total_supply(&self.token, TOKEN_DECIMALS, at)?;
        let non_rebasing =
            self.call_word(&self.token, "nonRebasingSupply()", &[], TOKEN_DECIMALS, at)?;
        let pools = pool_supplies(self, &self.token, &self.pools, at)?;
        Ok(SupplyData::from_parts(total, non_rebasing, pools))
    }

    fn rebasing_credits_ratio(&self, block: u64) -> Result<Decimal, ChainError> {
        let cpt = self.call_word(
            &self.token,
            "rebasingCreditsPerToken()",
            &[],
            TOKEN_DECIMALS,
            BlockTag::Number(block),
        )?;
        Precision::ON_CHAIN
            .div(Decimal::ONE, cpt)
            .map_err(|e| ChainError::Decode(format!("rebasing credits per token {}: {}", cpt, e)))
    }
}
