//! ABI word handling: log topics and data slots in, eth_call payloads out.

use alloy_primitives::keccak256;
use rust_decimal::Decimal;
use thiserror::Error;

/// Hex characters in one 32-byte ABI word.
pub const WORD_HEX_LEN: usize = 64;
const ADDRESS_HEX_LEN: usize = 40;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AbiError {
    #[error("topic is not a 32-byte word: {0}")]
    MalformedTopic(String),
    #[error("address topic is not zero-padded: {0}")]
    UnpaddedAddress(String),
    #[error("log has {available} topics, needed {needed}")]
    MissingTopic { needed: usize, available: usize },
    #[error("data word {index} missing (data has {available} words)")]
    MissingWord { index: usize, available: usize },
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("value does not fit a decimal: {0}")]
    Overflow(String),
}

fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

fn is_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Lowercase, 0x-prefixed address. Comparisons across the crate go through this.
pub fn normalize_address(address: &str) -> String {
    format!("0x{}", strip_0x(address.trim()).to_lowercase())
}

/// Indexed address topic (`0x` + 24 zero chars + 40 address chars) to a normalized address.
pub fn topic_to_address(topic: &str) -> Result<String, AbiError> {
    let body = strip_0x(topic.trim());
    if body.len() != WORD_HEX_LEN || !is_hex(body) {
        return Err(AbiError::MalformedTopic(topic.to_string()));
    }
    let (padding, address) = body.split_at(WORD_HEX_LEN - ADDRESS_HEX_LEN);
    if padding.bytes().any(|b| b != b'0') {
        return Err(AbiError::UnpaddedAddress(topic.to_string()));
    }
    Ok(format!("0x{}", address.to_lowercase()))
}

/// Address to its indexed-topic form, as stored alongside raw logs.
pub fn address_to_topic(address: &str) -> String {
    format!("0x{:0>64}", strip_0x(address.trim()).to_lowercase())
}

/// Slice the `index`-th 32-byte word out of hex log data or call output.
pub fn data_word(data: &str, index: usize) -> Result<&str, AbiError> {
    let body = strip_0x(data.trim());
    if !is_hex(body) || body.len() % WORD_HEX_LEN != 0 {
        return Err(AbiError::InvalidHex(data.to_string()));
    }
    let available = body.len() / WORD_HEX_LEN;
    if index >= available {
        return Err(AbiError::MissingWord { index, available });
    }
    Ok(&body[index * WORD_HEX_LEN..(index + 1) * WORD_HEX_LEN])
}

/// Unsigned word to a decimal with `decimals` fractional digits (1e18 fixed point for OUSD).
pub fn word_to_decimal(word: &str, decimals: u32) -> Result<Decimal, AbiError> {
    let body = strip_0x(word.trim());
    if !is_hex(body) {
        return Err(AbiError::InvalidHex(word.to_string()));
    }
    let significant = body.trim_start_matches('0');
    if significant.is_empty() {
        return Ok(Decimal::ZERO);
    }
    if significant.len() > 32 {
        return Err(AbiError::Overflow(word.to_string()));
    }
    let raw = u128::from_str_radix(significant, 16)
        .map_err(|_| AbiError::InvalidHex(word.to_string()))?;
    let raw = i128::try_from(raw).map_err(|_| AbiError::Overflow(word.to_string()))?;
    Decimal::try_from_i128_with_scale(raw, decimals)
        .map(|d| d.normalize())
        .map_err(|_| AbiError::Overflow(word.to_string()))
}

/// Convenience for `word_to_decimal(data_word(data, index)?, decimals)`.
pub fn decimal_at(data: &str, index: usize, decimals: u32) -> Result<Decimal, AbiError> {
    word_to_decimal(data_word(data, index)?, decimals)
}

/// True when a hex quantity (`0x0`, `0x`, `0x00..`) is nonzero.
pub fn is_nonzero_quantity(value: &str) -> bool {
    strip_0x(value.trim()).bytes().any(|b| b != b'0')
}

/// Topic hash of an event signature, e.g. `Transfer(address,address,uint256)`.
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak256(signature.as_bytes())))
}

/// Four-byte function selector.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash[..4]);
    out
}

/// Call data for a function taking only address arguments.
pub fn encode_call(signature: &str, addresses: &[&str]) -> String {
    let mut out = format!("0x{}", hex::encode(selector(signature)));
    for address in addresses {
        out.push_str(&address_to_topic(address)[2..]);
    }
    out
}
