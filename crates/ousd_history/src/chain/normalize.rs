//! Block-or-time range bounds as accepted on the command line.

use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("empty block or time")]
    Empty,
    #[error("invalid time: {0}")]
    InvalidTime(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockOrTime {
    Block(u64),
    Time(OffsetDateTime),
}

/// A bare integer is a block number; anything else must be RFC 3339.
pub fn parse_block_or_time(s: &str) -> Result<BlockOrTime, NormalizeError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(NormalizeError::Empty);
    }
    if let Ok(block) = s.parse::<u64>() {
        return Ok(BlockOrTime::Block(block));
    }
    OffsetDateTime::parse(s, &Rfc3339)
        .map(BlockOrTime::Time)
        .map_err(|e| NormalizeError::InvalidTime(e.to_string()))
}
