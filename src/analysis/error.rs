//! Error types for the analysis engine.
//!
//! Nothing here aborts a batch: decode failures are attached to the record
//! they concern, and comparisons are validated before any work is done.

use serde::{Deserialize, Serialize};

/// Malformed traceroute payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum DecodeError {
    #[error("packet is not a traceroute")]
    NotTraceroute,

    #[error("traceroute packet carries no route payload")]
    MissingPayload,

    #[error("{direction} route is empty")]
    EmptyRoute { direction: super::types::Direction },

    #[error("{direction} route has a single node and no hops")]
    SingleNodeRoute { direction: super::types::Direction },

    #[error("{direction} route has {nodes} nodes but {snr} SNR values (at most {max} expected)")]
    ExcessSnr {
        direction: super::types::Direction,
        nodes: usize,
        snr: usize,
        max: usize,
    },
}

/// Errors returned by analysis operations
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Invalid comparison: {reason}")]
    InvalidComparison { reason: String },

    #[error("Failed to decode traceroute {packet}: {source}")]
    Decode {
        packet: String,
        #[source]
        source: DecodeError,
    },
}

impl AnalysisError {
    pub fn invalid_comparison(reason: impl Into<String>) -> Self {
        AnalysisError::InvalidComparison {
            reason: reason.into(),
        }
    }
}
