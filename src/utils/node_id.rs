//! Node id parsing.
//!
//! Node ids show up in three spellings: the `!1a2b3c4d` form used by the
//! firmware and gateway ids, `0x1a2b3c4d` hex, and plain decimal.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::analysis::types::NodeId;

static BANG_HEX: LazyLock<Regex> = LazyLock::new(||
    Regex::new(r"^!([0-9a-fA-F]{1,8})$").unwrap()
);

static PREFIXED_HEX: LazyLock<Regex> = LazyLock::new(||
    Regex::new(r"^0[xX]([0-9a-fA-F]{1,8})$").unwrap()
);

static DECIMAL: LazyLock<Regex> = LazyLock::new(||
    Regex::new(r"^[0-9]{1,10}$").unwrap()
);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeIdError {
    #[error("Invalid node id '{0}': expected !hex, 0xhex or decimal")]
    Malformed(String),

    #[error("Node id '{0}' does not fit in 32 bits")]
    OutOfRange(String),
}

/// Parse a node id from `!1a2b3c4d`, `0x1a2b3c4d` or decimal form
pub fn parse_node_id(input: &str) -> Result<NodeId, NodeIdError> {
    let trimmed = input.trim();

    let hex = BANG_HEX
        .captures(trimmed)
        .or_else(|| PREFIXED_HEX.captures(trimmed))
        .and_then(|caps| caps.get(1));
    if let Some(digits) = hex {
        return u32::from_str_radix(digits.as_str(), 16)
            .map(NodeId)
            .map_err(|_| NodeIdError::Malformed(input.to_string()));
    }

    if DECIMAL.is_match(trimmed) {
        return trimmed
            .parse::<u32>()
            .map(NodeId)
            .map_err(|_| NodeIdError::OutOfRange(input.to_string()));
    }

    Err(NodeIdError::Malformed(input.to_string()))
}
